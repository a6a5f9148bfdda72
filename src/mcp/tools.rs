use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use super::types::{CallToolRequest, CallToolResponse, Tool, ToolContent};
use crate::{error::Result, server::AppState};

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse>;
    fn definition(&self) -> Tool;
}

pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn ToolHandler>>,
    order: Vec<String>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register<T: ToolHandler + 'static>(&mut self, tool: T) {
        let name = tool.definition().name.clone();
        self.order.push(name.clone());
        self.tools.insert(name, Box::new(tool));
    }

    pub fn get_tool(&self, name: &str) -> Option<&dyn ToolHandler> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    /// Tools in registration order.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    pub async fn call_tool(
        &self,
        state: &AppState,
        request: CallToolRequest,
    ) -> Result<CallToolResponse> {
        match self.get_tool(&request.name) {
            Some(tool) => tool.call(state, request.arguments).await,
            None => Ok(create_error_response(&format!(
                "Tool '{}' not found",
                request.name
            ))),
        }
    }
}

pub fn create_success_response(message: &str) -> CallToolResponse {
    CallToolResponse {
        content: vec![ToolContent {
            content_type: "text".to_string(),
            text: Some(message.to_string()),
            resource: None,
        }],
        is_error: None,
    }
}

pub fn create_error_response(error: &str) -> CallToolResponse {
    CallToolResponse {
        content: vec![ToolContent {
            content_type: "text".to_string(),
            text: Some(error.to_string()),
            resource: None,
        }],
        is_error: Some(true),
    }
}

/// Render a JSON payload as the tool's text content, pretty-printed for the
/// calling agent.
pub fn create_json_response(payload: &Value) -> CallToolResponse {
    let text = serde_json::to_string_pretty(payload)
        .unwrap_or_else(|_| "Failed to serialize payload".to_string());
    create_success_response(&text)
}

// Utility function to extract and validate parameters
pub fn extract_param<T>(arguments: &Option<Value>, key: &str) -> Result<T>
where
    T: for<'de> serde::Deserialize<'de>,
{
    match arguments {
        Some(Value::Object(map)) => match map.get(key) {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                crate::error::AppError::BadRequest(format!("Invalid parameter '{}': {}", key, e))
            }),
            None => Err(crate::error::AppError::BadRequest(format!(
                "Missing required parameter '{}'",
                key
            ))),
        },
        _ => Err(crate::error::AppError::BadRequest(
            "Arguments must be an object".to_string(),
        )),
    }
}

pub fn extract_optional_param<T>(arguments: &Option<Value>, key: &str) -> Result<Option<T>>
where
    T: for<'de> serde::Deserialize<'de>,
{
    match arguments {
        Some(Value::Object(map)) => match map.get(key) {
            Some(value) if !value.is_null() => {
                let parsed: T = serde_json::from_value(value.clone()).map_err(|e| {
                    crate::error::AppError::BadRequest(format!(
                        "Invalid parameter '{}': {}",
                        key, e
                    ))
                })?;
                Ok(Some(parsed))
            }
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

pub fn extract_param_or<T>(arguments: &Option<Value>, key: &str, default: T) -> Result<T>
where
    T: for<'de> serde::Deserialize<'de>,
{
    Ok(extract_optional_param(arguments, key)?.unwrap_or(default))
}
