//! Search-side tools: knowledge search, web search with insight fan-out,
//! chart images, card insights, and knowledge-graph exploration.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::tools::{
    create_error_response, create_json_response, extract_optional_param, extract_param,
    extract_param_or, ToolHandler,
};
use super::types::{CallToolResponse, Tool};
use crate::tako::client::{TakoClient, TakoError};
use crate::tako::types::{
    ExploreRequest, KnowledgeSearchInputs, KnowledgeSearchRequest, SOURCE_INDEX_TAKO,
    SOURCE_INDEX_TAKO_DEEP, SOURCE_INDEX_WEB,
};
use crate::{error::Result, server::AppState};

/// Worker count for the per-card insight fan-out.
const INSIGHT_POOL_SIZE: usize = 5;

fn search_request(
    query: &str,
    count: u32,
    search_effort: &str,
    country_code: String,
    locale: String,
    source_indexes: &[&str],
) -> KnowledgeSearchRequest {
    KnowledgeSearchRequest {
        inputs: KnowledgeSearchInputs {
            text: query.to_string(),
            count,
        },
        source_indexes: source_indexes.iter().map(|s| s.to_string()).collect(),
        search_effort: search_effort.to_string(),
        country_code,
        locale,
    }
}

/// Project a knowledge card down to the fields an agent acts on, with a
/// hint pointing at the interactive embed tool.
fn shape_card(card: &Value) -> Value {
    let card_id = card.get("card_id").cloned().unwrap_or(Value::Null);
    let mut shaped = json!({
        "card_id": card_id,
        "title": card.get("title").cloned().unwrap_or(Value::Null),
        "description": card.get("description").cloned().unwrap_or(Value::Null),
        "url": card.get("url").cloned().unwrap_or(Value::Null),
        "source": card.get("source").cloned().unwrap_or(Value::Null),
    });
    if let Some(id) = card.get("card_id").and_then(Value::as_str) {
        shaped["open_ui_tool"] = json!("open_chart_ui");
        shaped["open_ui_args"] = json!({"pub_id": id});
    }
    shaped
}

fn cards_of(data: &Value) -> Vec<Value> {
    data.pointer("/outputs/knowledge_cards")
        .and_then(Value::as_array)
        .map(|cards| cards.iter().map(shape_card).collect())
        .unwrap_or_default()
}

/// Fetch AI insights for each card through a bounded worker pool and attach
/// them by card id. Completion order does not matter; results are re-keyed
/// after the pool drains. A failed fetch degrades to a placeholder rather
/// than failing the search.
pub(crate) async fn attach_insights(tako: &Arc<TakoClient>, cards: &mut [Value]) {
    let card_ids: Vec<String> = cards
        .iter()
        .filter_map(|card| card.get("card_id").and_then(Value::as_str))
        .map(str::to_string)
        .collect();

    let fetched: Vec<(String, Value)> = stream::iter(card_ids)
        .map(|card_id| {
            let tako = Arc::clone(tako);
            async move {
                let insight = match tako.card_insights(&card_id, "medium").await {
                    Ok(data) => data.get("insights").cloned().unwrap_or(Value::Null),
                    Err(e) => {
                        debug!("no insight for card {}: {}", card_id, e);
                        json!("No insight found")
                    }
                };
                (card_id, insight)
            }
        })
        .buffer_unordered(INSIGHT_POOL_SIZE)
        .collect()
        .await;

    for card in cards.iter_mut() {
        if let Some(id) = card.get("card_id").and_then(Value::as_str) {
            if let Some((_, insight)) = fetched.iter().find(|(card_id, _)| card_id == id) {
                card["insight"] = insight.clone();
            }
        }
    }
}

fn search_schema(description: &str) -> Tool {
    Tool {
        name: String::new(),
        description: description.to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural language search query for charts and data"
                },
                "count": {
                    "type": "integer",
                    "description": "Number of results to return (1-20), defaults to 5"
                },
                "search_effort": {
                    "type": "string",
                    "description": "Search depth - 'fast' for quick results, 'deep' for comprehensive search"
                },
                "country_code": {
                    "type": "string",
                    "description": "ISO country code for localized results (e.g., 'US', 'GB')"
                },
                "locale": {
                    "type": "string",
                    "description": "Locale for results (e.g., 'en-US', 'en-GB')"
                }
            },
            "required": ["query"]
        }),
    }
}

pub struct KnowledgeSearchTool;

#[async_trait]
impl ToolHandler for KnowledgeSearchTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let query: String = extract_param(&arguments, "query")?;
        let count: u32 = extract_param_or(&arguments, "count", 5)?;
        let search_effort: String =
            extract_param_or(&arguments, "search_effort", "deep".to_string())?;
        let country_code: String = extract_param_or(&arguments, "country_code", "US".to_string())?;
        let locale: String = extract_param_or(&arguments, "locale", "en-US".to_string())?;

        let request = search_request(
            &query,
            count,
            &search_effort,
            country_code,
            locale,
            &[SOURCE_INDEX_TAKO],
        );
        let started = Instant::now();
        match state.tako.knowledge_search(&request).await {
            Ok(data) => {
                let results = cards_of(&data);
                debug!(
                    "knowledge_search completed in {:.2}s: query={}, count={}, effort={}",
                    started.elapsed().as_secs_f64(),
                    truncate(&query),
                    results.len(),
                    search_effort
                );
                Ok(create_json_response(&json!({
                    "results": results,
                    "count": results.len(),
                })))
            }
            Err(TakoError::Timeout) => {
                warn!(
                    "knowledge_search timed out after {:.2}s: query={}, effort={}",
                    started.elapsed().as_secs_f64(),
                    truncate(&query),
                    search_effort
                );
                Ok(create_json_response(&json!({
                    "error": "Request timed out",
                    "message": "The search request took too long. Try using search_effort='fast' for quicker results.",
                })))
            }
            Err(e) => Ok(create_error_response(&format!("Search failed: {}", e))),
        }
    }

    fn definition(&self) -> Tool {
        let mut tool = search_schema(
            "Search Tako's knowledge base for charts and data visualizations. \
             Returns matching charts with URLs, titles, descriptions, and metadata.",
        );
        tool.name = "knowledge_search".to_string();
        tool
    }
}

pub struct WebSearchTool;

#[async_trait]
impl ToolHandler for WebSearchTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let query: String = extract_param(&arguments, "query")?;
        let count: u32 = extract_param_or(&arguments, "count", 5)?;
        let search_effort: String =
            extract_param_or(&arguments, "search_effort", "deep".to_string())?;
        let country_code: String = extract_param_or(&arguments, "country_code", "US".to_string())?;
        let locale: String = extract_param_or(&arguments, "locale", "en-US".to_string())?;

        let request = search_request(
            &query,
            count,
            &search_effort,
            country_code,
            locale,
            &[SOURCE_INDEX_WEB],
        );
        match state.tako.knowledge_search(&request).await {
            Ok(data) => {
                let mut results = cards_of(&data);
                attach_insights(&state.tako, &mut results).await;
                Ok(create_json_response(&json!({
                    "results": results,
                    "count": results.len(),
                })))
            }
            Err(TakoError::Timeout) => Ok(create_json_response(&json!({
                "error": "Request timed out",
                "message": "The search request took too long. Try using search_effort='fast' for quicker results.",
            }))),
            Err(e) => Ok(create_error_response(&format!("Search failed: {}", e))),
        }
    }

    fn definition(&self) -> Tool {
        let mut tool = search_schema(
            "Search the general web for data and visualizations. Each result \
             is enriched with AI-generated insights.",
        );
        tool.name = "web_search".to_string();
        tool
    }
}

pub struct DeepSearchTool;

#[async_trait]
impl ToolHandler for DeepSearchTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let query: String = extract_param(&arguments, "query")?;
        let count: u32 = extract_param_or(&arguments, "count", 5)?;
        let country_code: String = extract_param_or(&arguments, "country_code", "US".to_string())?;
        let locale: String = extract_param_or(&arguments, "locale", "en-US".to_string())?;

        let request = search_request(
            &query,
            count,
            "deep",
            country_code,
            locale,
            &[SOURCE_INDEX_TAKO_DEEP],
        );
        match state.tako.knowledge_search(&request).await {
            Ok(data) => {
                let results = cards_of(&data);
                Ok(create_json_response(&json!({
                    "results": results,
                    "count": results.len(),
                })))
            }
            Err(TakoError::Timeout) => Ok(create_json_response(&json!({
                "error": "Request timed out",
                "message": "The deep search took too long. Use knowledge_search for a faster answer.",
            }))),
            Err(e) => Ok(create_error_response(&format!("Search failed: {}", e))),
        }
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "deep_search".to_string(),
            description: "Run an analytical deep search against Tako's deep knowledge index. Slower than knowledge_search but answers comparative and analytical questions.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Analytical question or comparison to research in depth"
                    },
                    "count": {
                        "type": "integer",
                        "description": "Number of results to return (1-20), defaults to 5"
                    },
                    "country_code": {
                        "type": "string",
                        "description": "ISO country code for localized results (e.g., 'US', 'GB')"
                    },
                    "locale": {
                        "type": "string",
                        "description": "Locale for results (e.g., 'en-US', 'en-GB')"
                    }
                },
                "required": ["query"]
            }),
        }
    }
}

pub struct DataSearchTool;

#[async_trait]
impl ToolHandler for DataSearchTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let query: String = extract_param(&arguments, "query")?;
        let count: u32 = extract_param_or(&arguments, "count", 5)?;
        let country_code: String = extract_param_or(&arguments, "country_code", "US".to_string())?;
        let locale: String = extract_param_or(&arguments, "locale", "en-US".to_string())?;

        let request = search_request(
            &query,
            count,
            "deep",
            country_code,
            locale,
            &[SOURCE_INDEX_TAKO, SOURCE_INDEX_TAKO_DEEP],
        );
        match state.tako.knowledge_search_with_data(&request).await {
            Ok(data) => {
                let results = cards_of(&data);
                let raw_data = fetch_raw_data_by_card(&state.tako, &data).await;
                Ok(create_json_response(&json!({
                    "results": results,
                    "count": results.len(),
                    "raw_data_by_card_id": raw_data,
                })))
            }
            Err(TakoError::Timeout) => Ok(create_json_response(&json!({
                "error": "Request timed out",
                "message": "The data search took too long. Use knowledge_search for a faster answer.",
            }))),
            Err(e) => Ok(create_error_response(&format!("Search failed: {}", e))),
        }
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "data_search".to_string(),
            description: "Search Tako and return each matching chart together with its raw underlying data, keyed by card id. Use this when the agent needs the numbers, not just the chart.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural language search query for charts whose data you want"
                    },
                    "count": {
                        "type": "integer",
                        "description": "Number of results to return (1-20), defaults to 5"
                    },
                    "country_code": {
                        "type": "string",
                        "description": "ISO country code for localized results (e.g., 'US', 'GB')"
                    },
                    "locale": {
                        "type": "string",
                        "description": "Locale for results (e.g., 'en-US', 'en-GB')"
                    }
                },
                "required": ["query"]
            }),
        }
    }
}

/// Resolve each card's `data_url` into its raw data, keyed by card id.
/// A card without a data url, or whose fetch fails, is simply absent from
/// the map.
async fn fetch_raw_data_by_card(tako: &Arc<TakoClient>, data: &Value) -> Value {
    let mut raw = serde_json::Map::new();
    let cards = data
        .pointer("/outputs/knowledge_cards")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for card in &cards {
        let (Some(card_id), Some(data_url)) = (
            card.get("card_id").and_then(Value::as_str),
            card.get("data_url").and_then(Value::as_str),
        ) else {
            continue;
        };
        match tako.fetch_raw_data(data_url).await {
            Ok(text) => {
                raw.insert(card_id.to_string(), json!(text));
            }
            Err(e) => debug!("no raw data for card {}: {}", card_id, e),
        }
    }
    Value::Object(raw)
}

pub struct GetChartImageTool;

#[async_trait]
impl ToolHandler for GetChartImageTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let pub_id: String = extract_param(&arguments, "pub_id")?;
        let dark_mode: bool = extract_param_or(&arguments, "dark_mode", true)?;

        let payload = match state.tako.chart_image_exists(&pub_id, dark_mode).await {
            Ok(()) => json!({
                "image_url": state.tako.image_url(&pub_id, dark_mode),
                "pub_id": pub_id,
                "dark_mode": dark_mode,
            }),
            Err(TakoError::NotFound(_)) => json!({
                "error": "Chart image not found",
                "pub_id": pub_id,
            }),
            Err(TakoError::RetryableTimeout(_)) => json!({
                "error": "Image generation timed out, try again",
                "pub_id": pub_id,
            }),
            Err(TakoError::Timeout) => json!({
                "error": "Request timed out",
                "message": "The image request took too long.",
            }),
            Err(e) => return Ok(create_error_response(&format!("Image lookup failed: {}", e))),
        };
        Ok(create_json_response(&payload))
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "get_chart_image".to_string(),
            description: "Get the preview image URL for a chart.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pub_id": {
                        "type": "string",
                        "description": "The unique identifier (pub_id/card_id) of the chart"
                    },
                    "dark_mode": {
                        "type": "boolean",
                        "description": "Whether to return the dark mode version of the image (default: true)"
                    }
                },
                "required": ["pub_id"]
            }),
        }
    }
}

pub struct GetCardInsightsTool;

#[async_trait]
impl ToolHandler for GetCardInsightsTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let pub_id: String = extract_param(&arguments, "pub_id")?;
        let effort: String = extract_param_or(&arguments, "effort", "medium".to_string())?;

        let payload = match state.tako.card_insights(&pub_id, &effort).await {
            Ok(data) => json!({
                "pub_id": pub_id,
                "insights": data.get("insights").cloned().unwrap_or(json!("")),
                "description": data.get("description").cloned().unwrap_or(json!("")),
            }),
            Err(TakoError::NotFound(_)) => json!({
                "error": "Chart not found",
                "pub_id": pub_id,
            }),
            Err(TakoError::Timeout) => json!({
                "error": "Request timed out",
                "message": "The insights request took too long. Try effort='low' for a faster answer.",
            }),
            Err(e) => return Ok(create_error_response(&format!("Insights lookup failed: {}", e))),
        };
        Ok(create_json_response(&payload))
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "get_card_insights".to_string(),
            description: "Get AI-generated insights for a chart: bullet-point findings and a description analyzing the chart's data.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pub_id": {
                        "type": "string",
                        "description": "The unique identifier (pub_id/card_id) of the chart"
                    },
                    "effort": {
                        "type": "string",
                        "description": "Reasoning effort level - 'low', 'medium', or 'high' (default: 'medium')"
                    }
                },
                "required": ["pub_id"]
            }),
        }
    }
}

pub struct ExploreKnowledgeGraphTool;

#[async_trait]
impl ToolHandler for ExploreKnowledgeGraphTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let query: String = extract_param(&arguments, "query")?;
        let node_types: Option<Vec<String>> = extract_optional_param(&arguments, "node_types")?;
        let limit: u32 = extract_param_or(&arguments, "limit", 20)?;

        let request = ExploreRequest {
            query: query.clone(),
            node_types,
            limit,
        };
        let started = Instant::now();
        let payload = match state.tako.explore(&request).await {
            Ok(data) => {
                let result = shape_explore(&data);
                debug!(
                    "explore_knowledge_graph completed in {:.2}s: query={}, total_matches={}",
                    started.elapsed().as_secs_f64(),
                    truncate(&query),
                    result["total_matches"]
                );
                result
            }
            Err(TakoError::Timeout) => json!({
                "error": "Request timed out",
                "message": "The explore request took too long. Try a more specific query.",
            }),
            Err(TakoError::Status { status, message }) => json!({
                "error": format!("HTTP {}", status),
                "message": message,
            }),
            Err(e) => json!({
                "error": "Unexpected error",
                "message": e.to_string(),
            }),
        };
        Ok(create_json_response(&payload))
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "explore_knowledge_graph".to_string(),
            description: "Explore Tako's knowledge graph to discover available entities, metrics, cohorts, and other data before constructing a search query.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural language query to explore the knowledge graph (e.g., 'tech companies', 'GDP metrics')"
                    },
                    "node_types": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Optional filter: entity, metric, cohort, db, units, time_period, property"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results per type (1-50), defaults to 20"
                    }
                },
                "required": ["query"]
            }),
        }
    }
}

fn shape_explore(data: &Value) -> Value {
    json!({
        "query": data.get("query").cloned().unwrap_or(Value::Null),
        "total_matches": data.get("total_matches").cloned().unwrap_or(json!(0)),
        "entities": map_items(data, "entities", |e| json!({
            "name": e.get("name").cloned().unwrap_or(Value::Null),
            "type": e.get("type").cloned().unwrap_or(Value::Null),
            "description": e.get("description").cloned().unwrap_or(Value::Null),
            "aliases": head(e, "aliases"),
            "available_tables": head(e, "available_tables"),
            "node_id": e.get("node_id").cloned().unwrap_or(Value::Null),
        })),
        "metrics": map_items(data, "metrics", |m| json!({
            "name": m.get("name").cloned().unwrap_or(Value::Null),
            "description": m.get("description").cloned().unwrap_or(Value::Null),
            "units": head(m, "units"),
            "time_periods": head(m, "time_periods"),
            "compatible_tables": head(m, "compatible_tables"),
            "node_id": m.get("node_id").cloned().unwrap_or(Value::Null),
        })),
        "cohorts": map_items(data, "cohorts", |c| json!({
            "name": c.get("name").cloned().unwrap_or(Value::Null),
            "description": c.get("description").cloned().unwrap_or(Value::Null),
            "member_count": c.get("member_count").cloned().unwrap_or(Value::Null),
            "sample_members": c.get("sample_members").cloned().unwrap_or(json!([])),
            "node_id": c.get("node_id").cloned().unwrap_or(Value::Null),
        })),
        "time_periods": data.get("time_periods").cloned().unwrap_or(json!([])),
        "execution_time_ms": data.get("execution_time_ms").cloned().unwrap_or(json!(0)),
    })
}

fn map_items(data: &Value, key: &str, f: impl Fn(&Value) -> Value) -> Value {
    data.get(key)
        .and_then(Value::as_array)
        .map(|items| Value::Array(items.iter().map(f).collect()))
        .unwrap_or(json!([]))
}

/// First three entries of a nested list, for readability.
fn head(item: &Value, key: &str) -> Value {
    item.get(key)
        .and_then(Value::as_array)
        .map(|list| Value::Array(list.iter().take(3).cloned().collect()))
        .unwrap_or(json!([]))
}

fn truncate(query: &str) -> &str {
    match query.char_indices().nth(50) {
        Some((idx, _)) => &query[..idx],
        None => query,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_shaping_adds_ui_hint_when_card_id_present() {
        let card = json!({
            "card_id": "abc123",
            "title": "GDP of France",
            "url": "https://trytako.com/card/abc123",
            "extra_field": "dropped",
        });
        let shaped = shape_card(&card);
        assert_eq!(shaped["card_id"], "abc123");
        assert_eq!(shaped["open_ui_tool"], "open_chart_ui");
        assert_eq!(shaped["open_ui_args"]["pub_id"], "abc123");
        assert!(shaped.get("extra_field").is_none());
    }

    #[test]
    fn card_shaping_skips_ui_hint_without_card_id() {
        let shaped = shape_card(&json!({"title": "no id"}));
        assert!(shaped.get("open_ui_tool").is_none());
    }

    #[test]
    fn explore_shaping_trims_nested_lists() {
        let data = json!({
            "query": "tech",
            "total_matches": 2,
            "entities": [{
                "name": "Apple",
                "aliases": ["AAPL", "Apple Inc", "Apple Computer", "Cupertino"],
            }],
        });
        let shaped = shape_explore(&data);
        assert_eq!(shaped["entities"][0]["aliases"].as_array().unwrap().len(), 3);
        assert_eq!(shaped["total_matches"], 2);
    }
}
