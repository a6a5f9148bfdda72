//! Request shapes for the Tako API. Responses are kept as loose JSON and
//! shaped per tool, since each handler exposes a different projection.

use serde::Serialize;
use serde_json::Value;

pub const SOURCE_INDEX_TAKO: &str = "tako";
pub const SOURCE_INDEX_TAKO_DEEP: &str = "tako_deep";
pub const SOURCE_INDEX_WEB: &str = "web";

#[derive(Debug, Serialize)]
pub struct KnowledgeSearchRequest {
    pub inputs: KnowledgeSearchInputs,
    pub source_indexes: Vec<String>,
    pub search_effort: String,
    pub country_code: String,
    pub locale: String,
}

#[derive(Debug, Serialize)]
pub struct KnowledgeSearchInputs {
    pub text: String,
    pub count: u32,
}

#[derive(Debug, Serialize)]
pub struct ExploreRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_types: Option<Vec<String>>,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
pub struct CreateChartRequest {
    pub components: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VisualizeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}
