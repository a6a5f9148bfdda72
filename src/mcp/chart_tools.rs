//! Chart authoring tools: schema discovery and chart creation.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::tools::{
    create_error_response, create_json_response, extract_optional_param, extract_param,
    ToolHandler,
};
use super::types::{CallToolResponse, Tool};
use crate::tako::client::TakoError;
use crate::tako::types::CreateChartRequest;
use crate::{error::Result, server::AppState};

pub struct ListChartSchemasTool;

#[async_trait]
impl ToolHandler for ListChartSchemasTool {
    async fn call(&self, state: &AppState, _arguments: Option<Value>) -> Result<CallToolResponse> {
        let payload = match state.tako.list_schemas().await {
            Ok(data) => json!({
                "schemas": shape_schemas(&data),
            }),
            Err(TakoError::Timeout) => json!({
                "error": "Request timed out",
                "message": "The schema listing took too long.",
            }),
            Err(e) => return Ok(create_error_response(&format!("Schema listing failed: {}", e))),
        };
        Ok(create_json_response(&payload))
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "list_chart_schemas".to_string(),
            description: "List the available chart schemas that can be used with create_chart, with the component types each accepts.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        }
    }
}

pub struct GetChartSchemaTool;

#[async_trait]
impl ToolHandler for GetChartSchemaTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let schema_name: String = extract_param(&arguments, "schema_name")?;

        let payload = match state.tako.get_schema(&schema_name).await {
            Ok(data) => data,
            Err(TakoError::NotFound(_)) => json!({
                "error": format!("Schema '{}' not found", schema_name),
            }),
            Err(TakoError::Timeout) => json!({
                "error": "Request timed out",
                "message": "The schema fetch took too long.",
            }),
            Err(e) => return Ok(create_error_response(&format!("Schema fetch failed: {}", e))),
        };
        Ok(create_json_response(&payload))
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "get_chart_schema".to_string(),
            description: "Get the full JSON schema for one chart type, describing the component structure create_chart expects.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "schema_name": {
                        "type": "string",
                        "description": "Name of the schema, as returned by list_chart_schemas"
                    }
                },
                "required": ["schema_name"]
            }),
        }
    }
}

pub struct CreateChartTool;

#[async_trait]
impl ToolHandler for CreateChartTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let schema_name: String = extract_param(&arguments, "schema_name")?;
        let components: Value = extract_param(&arguments, "components")?;
        let source: Option<String> = extract_optional_param(&arguments, "source")?;

        if !components.is_array() {
            return Ok(create_json_response(&json!({
                "error": "Invalid component configuration",
                "details": "'components' must be an array of component objects",
            })));
        }

        let request = CreateChartRequest { components, source };
        let payload = match state.tako.create_chart(&schema_name, &request).await {
            Ok(data) => {
                let pub_id = data.get("pub_id").cloned().unwrap_or(Value::Null);
                debug!("created chart: schema={}, pub_id={}", schema_name, pub_id);
                let mut result = json!({
                    "pub_id": pub_id,
                    "url": data.get("url").cloned().unwrap_or(Value::Null),
                    "title": data.get("title").cloned().unwrap_or(Value::Null),
                });
                if let Some(id) = data.get("pub_id").and_then(Value::as_str) {
                    result["open_ui_tool"] = json!("open_chart_ui");
                    result["open_ui_args"] = json!({"pub_id": id});
                }
                result
            }
            Err(TakoError::NotFound(_)) => json!({
                "error": format!("Schema '{}' not found", schema_name),
            }),
            Err(TakoError::InvalidRequest { details }) => json!({
                "error": "Invalid component configuration",
                "details": details,
            }),
            Err(TakoError::Timeout) => json!({
                "error": "Request timed out",
                "message": "Chart creation took too long.",
            }),
            Err(e) => return Ok(create_error_response(&format!("Chart creation failed: {}", e))),
        };
        Ok(create_json_response(&payload))
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "create_chart".to_string(),
            description: "Create a new chart from a component configuration. Use get_chart_schema first to learn the component structure for the chosen schema.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "schema_name": {
                        "type": "string",
                        "description": "Name of the schema to create the chart with"
                    },
                    "components": {
                        "type": "array",
                        "description": "Component configuration matching the schema"
                    },
                    "source": {
                        "type": "string",
                        "description": "Optional attribution for the chart's data source"
                    }
                },
                "required": ["schema_name", "components"]
            }),
        }
    }
}

fn shape_schemas(data: &Value) -> Value {
    data.get("schemas")
        .and_then(Value::as_array)
        .map(|schemas| {
            Value::Array(
                schemas
                    .iter()
                    .map(|s| {
                        json!({
                            "name": s.get("name").cloned().unwrap_or(Value::Null),
                            "description": s.get("description").cloned().unwrap_or(Value::Null),
                            "component_types": s.get("component_types").cloned().unwrap_or(json!([])),
                        })
                    })
                    .collect(),
            )
        })
        .unwrap_or(json!([]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_shaping_keeps_name_and_component_types() {
        let data = json!({
            "schemas": [
                {"name": "line", "description": "Line chart", "component_types": ["axis", "series"], "internal": true},
            ],
        });
        let shaped = shape_schemas(&data);
        assert_eq!(shaped[0]["name"], "line");
        assert_eq!(shaped[0]["component_types"][1], "series");
        assert!(shaped[0].get("internal").is_none());
    }

    #[test]
    fn schema_shaping_tolerates_missing_list() {
        assert_eq!(shape_schemas(&json!({})), json!([]));
    }
}
