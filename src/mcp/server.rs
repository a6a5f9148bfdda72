use serde_json::Value;
use tracing::{debug, error, info};

use super::{
    chart_tools::*, search_tools::*, tools::ToolRegistry, types::*, ui_tools::*, upload_tools::*,
    MCP_PROTOCOL_VERSION,
};
use crate::server::AppState;

pub struct McpServer {
    pub tools: ToolRegistry,
}

impl Default for McpServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Macro to register multiple tools at once
macro_rules! register_tools {
    ($registry:expr, $($tool:expr),+ $(,)?) => {
        $(
            $registry.register($tool);
        )+
    };
}

impl McpServer {
    pub fn new() -> Self {
        let mut tools = ToolRegistry::new();

        Self::register_search_tools(&mut tools);
        Self::register_chart_tools(&mut tools);
        Self::register_upload_tools(&mut tools);
        Self::register_ui_tools(&mut tools);

        Self { tools }
    }

    /// Register search and discovery tools
    fn register_search_tools(tools: &mut ToolRegistry) {
        register_tools!(
            tools,
            KnowledgeSearchTool,
            WebSearchTool,
            DeepSearchTool,
            DataSearchTool,
            GetChartImageTool,
            GetCardInsightsTool,
            ExploreKnowledgeGraphTool,
        );
    }

    /// Register chart authoring tools
    fn register_chart_tools(tools: &mut ToolRegistry) {
        register_tools!(
            tools,
            ListChartSchemasTool,
            GetChartSchemaTool,
            CreateChartTool,
        );
    }

    /// Register file upload and visualization tools
    fn register_upload_tools(tools: &mut ToolRegistry) {
        register_tools!(
            tools,
            UploadFileTool,
            UploadFileFromUrlTool,
            UploadFileFromLocalPathTool,
            VisualizeFileTool,
            VisualizeDatasetTool,
        );
    }

    /// Register interactive UI tools
    fn register_ui_tools(tools: &mut ToolRegistry) {
        register_tools!(tools, OpenChartUiTool,);
    }

    pub async fn handle_request(
        &self,
        state: &AppState,
        request: JsonRpcRequest,
    ) -> JsonRpcResponse {
        debug!("Handling MCP request: {}", request.method);

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "notifications/initialized" => self.handle_initialized().await,
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_call_tool(state, request.params).await,
            "prompts/list" => self.handle_list_prompts().await,
            "prompts/get" => self.handle_get_prompt(request.params).await,
            _ => Err(JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Method '{}' not found", request.method),
                data: None,
            }),
        };

        match response {
            Ok(result) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: request.id,
                result: Some(result),
                error: None,
            },
            Err(error) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: request.id,
                result: None,
                error: Some(error),
            },
        }
    }

    async fn handle_initialize(
        &self,
        params: Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(params) => serde_json::from_value(params).map_err(|e| JsonRpcError {
                code: INVALID_PARAMS,
                message: format!("Invalid initialize params: {}", e),
                data: None,
            })?,
            None => {
                return Err(JsonRpcError {
                    code: INVALID_PARAMS,
                    message: "Missing initialize parameters".to_string(),
                    data: None,
                })
            }
        };

        // We accept any client version but return what we actually support
        if request.protocol_version != MCP_PROTOCOL_VERSION {
            info!(
                "Protocol version mismatch: client requested {}, negotiating down to {}",
                request.protocol_version, MCP_PROTOCOL_VERSION
            );
        }

        let response = InitializeResponse {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
                prompts: PromptsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "tako-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        serde_json::to_value(response).map_err(|e| JsonRpcError {
            code: INTERNAL_ERROR,
            message: format!("Failed to serialize response: {}", e),
            data: None,
        })
    }

    async fn handle_initialized(&self) -> std::result::Result<Value, JsonRpcError> {
        // notifications/initialized requires no response, acknowledge with null
        Ok(Value::Null)
    }

    async fn handle_list_tools(&self) -> std::result::Result<Value, JsonRpcError> {
        let response = ListToolsResponse {
            tools: self.tools.list_tools(),
        };

        serde_json::to_value(response).map_err(|e| JsonRpcError {
            code: INTERNAL_ERROR,
            message: format!("Failed to serialize tools: {}", e),
            data: None,
        })
    }

    async fn handle_call_tool(
        &self,
        state: &AppState,
        params: Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(params) => serde_json::from_value(params).map_err(|e| JsonRpcError {
                code: INVALID_PARAMS,
                message: format!("Invalid call_tool params: {}", e),
                data: None,
            })?,
            None => {
                return Err(JsonRpcError {
                    code: INVALID_PARAMS,
                    message: "Missing call_tool parameters".to_string(),
                    data: None,
                })
            }
        };

        info!("Calling tool: {}", request.name);

        let response = self.tools.call_tool(state, request).await.map_err(|e| {
            error!("Tool execution error: {}", e);
            JsonRpcError {
                code: INTERNAL_ERROR,
                message: format!("Tool execution failed: {}", e),
                data: None,
            }
        })?;

        serde_json::to_value(response).map_err(|e| JsonRpcError {
            code: INTERNAL_ERROR,
            message: format!("Failed to serialize tool response: {}", e),
            data: None,
        })
    }

    async fn handle_list_prompts(&self) -> std::result::Result<Value, JsonRpcError> {
        let prompts = vec![
            Prompt {
                name: "generate_search_prompt".to_string(),
                description: "Guidance for turning a user question into effective Tako knowledge search queries".to_string(),
                arguments: vec![PromptArgument {
                    name: "text".to_string(),
                    description: "The user's question or topic of interest".to_string(),
                    required: true,
                }],
            },
            Prompt {
                name: "generate_visualization_prompt".to_string(),
                description: "Guidance for tidying a dataset and choosing a chart before calling the visualization tools".to_string(),
                arguments: vec![PromptArgument {
                    name: "text".to_string(),
                    description: "A description of the data to visualize".to_string(),
                    required: true,
                }],
            },
        ];

        let response = ListPromptsResponse { prompts };

        serde_json::to_value(response).map_err(|e| JsonRpcError {
            code: INTERNAL_ERROR,
            message: format!("Failed to serialize prompts: {}", e),
            data: None,
        })
    }

    async fn handle_get_prompt(
        &self,
        params: Option<Value>,
    ) -> std::result::Result<Value, JsonRpcError> {
        let request: GetPromptRequest = match params {
            Some(params) => serde_json::from_value(params).map_err(|e| JsonRpcError {
                code: INVALID_PARAMS,
                message: format!("Invalid get_prompt params: {}", e),
                data: None,
            })?,
            None => {
                return Err(JsonRpcError {
                    code: INVALID_PARAMS,
                    message: "Missing get_prompt parameters".to_string(),
                    data: None,
                })
            }
        };

        let text = request
            .arguments
            .as_ref()
            .and_then(|args| args.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("");

        let template = match request.name.as_str() {
            "generate_search_prompt" => {
                include_str!("../../templates/prompts/search-guidance.md")
            }
            "generate_visualization_prompt" => {
                include_str!("../../templates/prompts/visualization-guidance.md")
            }
            _ => {
                return Err(JsonRpcError {
                    code: INVALID_PARAMS,
                    message: format!("Unknown prompt: {}", request.name),
                    data: None,
                })
            }
        };

        let response = GetPromptResponse {
            messages: vec![PromptMessage {
                role: "user".to_string(),
                content: PromptContent {
                    content_type: "text".to_string(),
                    text: template.replace("{text}", text),
                },
            }],
        };

        serde_json::to_value(response).map_err(|e| JsonRpcError {
            code: INTERNAL_ERROR,
            message: format!("Failed to serialize prompt response: {}", e),
            data: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::config::Config;
    use crate::session::SessionRegistry;
    use crate::tako::TakoClient;

    fn test_state() -> AppState {
        let config = Config {
            tako_api_url: "http://127.0.0.1:1".to_string(),
            public_base_url: "https://trytako.com".to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            allowed_origins: Vec::new(),
            origin_protection: false,
            api_key: None,
        };
        AppState {
            tako: Arc::new(TakoClient::new(&config)),
            config,
            sessions: Arc::new(SessionRegistry::new()),
            mcp_server: Arc::new(McpServer::new()),
        }
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(1)),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn initialize_returns_server_info_and_protocol_version() {
        let state = test_state();
        let response = state
            .mcp_server
            .handle_request(
                &state,
                request(
                    "initialize",
                    Some(json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "clientInfo": {"name": "test", "version": "0.0.1"},
                    })),
                ),
            )
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "tako-mcp");
    }

    #[tokio::test]
    async fn tools_list_includes_every_registered_tool() {
        let state = test_state();
        let response = state
            .mcp_server
            .handle_request(&state, request("tools/list", None))
            .await;
        let tools = response.result.unwrap()["tools"].clone();
        let names: Vec<&str> = tools
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 16);
        assert_eq!(names[0], "knowledge_search");
        assert!(names.contains(&"deep_search"));
        assert!(names.contains(&"data_search"));
        assert!(names.contains(&"upload_file_from_url"));
        assert!(names.contains(&"open_chart_ui"));
        assert!(names.contains(&"visualize_dataset"));
    }

    #[tokio::test]
    async fn unknown_method_maps_to_method_not_found() {
        let state = test_state();
        let response = state
            .mcp_server
            .handle_request(&state, request("resources/list", None))
            .await;
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_tool_returns_error_content_not_rpc_error() {
        let state = test_state();
        let response = state
            .mcp_server
            .handle_request(
                &state,
                request("tools/call", Some(json!({"name": "no_such_tool"}))),
            )
            .await;
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("not found"));
    }

    #[tokio::test]
    async fn get_prompt_substitutes_the_text_argument() {
        let state = test_state();
        let response = state
            .mcp_server
            .handle_request(
                &state,
                request(
                    "prompts/get",
                    Some(json!({
                        "name": "generate_search_prompt",
                        "arguments": {"text": "EV adoption in Norway"},
                    })),
                ),
            )
            .await;
        let result = response.result.unwrap();
        let text = result["messages"][0]["content"]["text"].as_str().unwrap();
        assert!(text.contains("EV adoption in Norway"));
    }
}
