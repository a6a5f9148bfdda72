//! File upload and visualization tools.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use tracing::debug;

use super::search_tools::attach_insights;
use super::tools::{
    create_error_response, create_json_response, extract_optional_param, extract_param,
    extract_param_or, ToolHandler,
};
use super::types::{CallToolResponse, Tool};
use crate::tako::client::TakoError;
use crate::tako::types::VisualizeRequest;
use crate::{error::Result, server::AppState};

pub struct UploadFileTool;

#[async_trait]
impl ToolHandler for UploadFileTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let filename: String = extract_param(&arguments, "filename")?;
        let content: String = extract_param(&arguments, "content")?;
        let encoding: String = extract_param_or(&arguments, "encoding", "base64".to_string())?;

        if encoding != "base64" {
            return Ok(create_json_response(&json!({
                "error": "Unsupported encoding",
                "message": format!("Encoding '{}' is not supported, content must be base64", encoding),
            })));
        }
        let bytes = match base64::engine::general_purpose::STANDARD.decode(&content) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(create_json_response(&json!({
                    "error": "Invalid base64 content",
                    "message": e.to_string(),
                })))
            }
        };

        let payload = match state.tako.upload_file(&filename, bytes).await {
            Ok(file_id) => {
                debug!("uploaded file: filename={}, file_id={}", filename, file_id);
                json!({
                    "file_id": file_id,
                    "filename": filename,
                })
            }
            Err(TakoError::Timeout) => json!({
                "error": "Request timed out",
                "message": "The upload took too long. Try a smaller file.",
            }),
            Err(TakoError::InvalidRequest { details }) => json!({
                "error": "Upload rejected",
                "details": details,
            }),
            Err(e) => return Ok(create_error_response(&format!("Upload failed: {}", e))),
        };
        Ok(create_json_response(&payload))
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "upload_file".to_string(),
            description: "Upload a data file (CSV, Excel, JSON) for visualization. Content must be base64-encoded. Returns a file_id to pass to visualize_file.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filename": {
                        "type": "string",
                        "description": "Name of the file including extension (e.g., 'sales.csv')"
                    },
                    "content": {
                        "type": "string",
                        "description": "Base64-encoded file content"
                    },
                    "encoding": {
                        "type": "string",
                        "description": "Content encoding, only 'base64' is supported (default)"
                    }
                },
                "required": ["filename", "content"]
            }),
        }
    }
}

pub struct UploadFileFromUrlTool;

#[async_trait]
impl ToolHandler for UploadFileFromUrlTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let url: String = extract_param(&arguments, "url")?;

        let payload = match state.tako.upload_file_from_url(&url).await {
            Ok(file_id) => {
                debug!("ingested file from url: url={}, file_id={}", url, file_id);
                json!({
                    "file_id": file_id,
                    "url": url,
                })
            }
            Err(TakoError::Timeout) => json!({
                "error": "Request timed out",
                "message": "Fetching the file took too long. Check that the URL is reachable.",
            }),
            Err(TakoError::InvalidRequest { details }) => json!({
                "error": "Upload rejected",
                "details": details,
            }),
            Err(e) => return Ok(create_error_response(&format!("Upload failed: {}", e))),
        };
        Ok(create_json_response(&payload))
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "upload_file_from_url".to_string(),
            description: "Have Tako ingest a data file from an external URL. Returns a file_id to pass to visualize_file.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "Publicly reachable URL of the data file"
                    }
                },
                "required": ["url"]
            }),
        }
    }
}

pub struct UploadFileFromLocalPathTool;

#[async_trait]
impl ToolHandler for UploadFileFromLocalPathTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let local_path: String = extract_param(&arguments, "local_path")?;

        let bytes = match tokio::fs::read(&local_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(create_json_response(&json!({
                    "error": "Could not read file",
                    "local_path": local_path,
                    "message": e.to_string(),
                })))
            }
        };
        let filename = std::path::Path::new(&local_path)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload.dat")
            .to_string();

        let payload = match state.tako.upload_file(&filename, bytes).await {
            Ok(file_id) => {
                debug!(
                    "uploaded local file: path={}, file_id={}",
                    local_path, file_id
                );
                json!({
                    "file_id": file_id,
                    "filename": filename,
                })
            }
            Err(TakoError::Timeout) => json!({
                "error": "Request timed out",
                "message": "The upload took too long. Try a smaller file.",
            }),
            Err(TakoError::InvalidRequest { details }) => json!({
                "error": "Upload rejected",
                "details": details,
            }),
            Err(e) => return Ok(create_error_response(&format!("Upload failed: {}", e))),
        };
        Ok(create_json_response(&payload))
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "upload_file_from_local_path".to_string(),
            description: "Upload a data file from a path on the server's filesystem. Returns a file_id to pass to visualize_file.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "local_path": {
                        "type": "string",
                        "description": "Filesystem path of the data file on the server host"
                    }
                },
                "required": ["local_path"]
            }),
        }
    }
}

pub struct VisualizeFileTool;

#[async_trait]
impl ToolHandler for VisualizeFileTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let file_id: String = extract_param(&arguments, "file_id")?;
        let query: Option<String> = extract_optional_param(&arguments, "query")?;

        let request = VisualizeRequest {
            file_id: Some(file_id.clone()),
            dataset: None,
            query,
        };
        visualize(state, &request, &json!({"file_id": file_id})).await
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "visualize_file".to_string(),
            description: "Generate charts from a previously uploaded file. Returns the generated charts enriched with AI insights.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "file_id": {
                        "type": "string",
                        "description": "The file_id returned by upload_file"
                    },
                    "query": {
                        "type": "string",
                        "description": "Optional natural language guidance for what to visualize"
                    }
                },
                "required": ["file_id"]
            }),
        }
    }
}

pub struct VisualizeDatasetTool;

#[async_trait]
impl ToolHandler for VisualizeDatasetTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let dataset: Value = extract_param(&arguments, "dataset")?;
        let query: Option<String> = extract_optional_param(&arguments, "query")?;

        if !dataset.is_object() {
            return Ok(create_json_response(&json!({
                "error": "Invalid dataset",
                "message": "'dataset' must be an object with column names mapped to value arrays",
            })));
        }

        let request = VisualizeRequest {
            file_id: None,
            dataset: Some(dataset),
            query,
        };
        visualize(state, &request, &json!({})).await
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "visualize_dataset".to_string(),
            description: "Generate charts directly from inline tabular data, without uploading a file first. Dataset is an object mapping column names to arrays of values.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "dataset": {
                        "type": "object",
                        "description": "Column-oriented data, e.g. {\"year\": [2020, 2021], \"revenue\": [10, 12]}"
                    },
                    "query": {
                        "type": "string",
                        "description": "Optional natural language guidance for what to visualize"
                    }
                },
                "required": ["dataset"]
            }),
        }
    }
}

/// Shared visualize path: call the API, shape the generated cards, and
/// enrich them with insights through the same fan-out the searches use.
async fn visualize(
    state: &AppState,
    request: &VisualizeRequest,
    context: &Value,
) -> Result<CallToolResponse> {
    let payload = match state.tako.visualize(request).await {
        Ok(data) => {
            let mut cards = shape_visualize_cards(&data);
            attach_insights(&state.tako, &mut cards).await;
            let mut result = json!({
                "charts": cards,
            });
            if let Some(obj) = context.as_object() {
                for (key, value) in obj {
                    result[key] = value.clone();
                }
            }
            result
        }
        Err(TakoError::NotFound(resource)) => json!({
            "error": "File not found",
            "file_id": resource,
        }),
        Err(TakoError::InvalidRequest { details }) => json!({
            "error": "Could not visualize the data",
            "details": details,
        }),
        Err(TakoError::Timeout) => json!({
            "error": "Request timed out",
            "message": "Visualization took too long. Try a smaller dataset or a more specific query.",
        }),
        Err(e) => return Ok(create_error_response(&format!("Visualization failed: {}", e))),
    };
    Ok(create_json_response(&payload))
}

fn shape_visualize_cards(data: &Value) -> Vec<Value> {
    data.get("cards")
        .and_then(Value::as_array)
        .map(|cards| {
            cards
                .iter()
                .map(|card| {
                    let mut shaped = json!({
                        "card_id": card.get("card_id").cloned().unwrap_or(Value::Null),
                        "title": card.get("title").cloned().unwrap_or(Value::Null),
                        "url": card.get("url").cloned().unwrap_or(Value::Null),
                    });
                    if let Some(id) = card.get("card_id").and_then(Value::as_str) {
                        shaped["open_ui_tool"] = json!("open_chart_ui");
                        shaped["open_ui_args"] = json!({"pub_id": id});
                    }
                    shaped
                })
                .collect()
        })
        .unwrap_or_default()
}
