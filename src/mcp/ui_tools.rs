//! Interactive UI tool: embeds a live Tako chart as an HTML resource.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::tools::{extract_param, extract_param_or, ToolHandler};
use super::types::{CallToolResponse, Tool, ToolContent};
use crate::{error::Result, server::AppState};

pub struct OpenChartUiTool;

#[async_trait]
impl ToolHandler for OpenChartUiTool {
    async fn call(&self, state: &AppState, arguments: Option<Value>) -> Result<CallToolResponse> {
        let pub_id: String = extract_param(&arguments, "pub_id")?;
        let dark_mode: bool = extract_param_or(&arguments, "dark_mode", true)?;
        let width: u32 = extract_param_or(&arguments, "width", 900)?;
        let height: u32 = extract_param_or(&arguments, "height", 600)?;

        let theme = if dark_mode { "dark" } else { "light" };
        let embed_url = format!(
            "{}/embed/{}/?theme={}",
            state.config.public_base_url, pub_id, theme
        );
        let html = embed_document(&embed_url, width, height);

        Ok(CallToolResponse {
            content: vec![ToolContent {
                content_type: "resource".to_string(),
                text: None,
                resource: Some(json!({
                    "uri": format!("ui://tako/embed/{}", pub_id),
                    "mimeType": "text/html",
                    "text": html,
                })),
            }],
            is_error: None,
        })
    }

    fn definition(&self) -> Tool {
        Tool {
            name: "open_chart_ui".to_string(),
            description: "Open an interactive Tako chart in an embedded UI panel. Use this when the user wants to explore a chart from a search or creation result.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pub_id": {
                        "type": "string",
                        "description": "The unique identifier (pub_id/card_id) of the chart to open"
                    },
                    "dark_mode": {
                        "type": "boolean",
                        "description": "Render the chart with the dark theme (default: true)"
                    },
                    "width": {
                        "type": "integer",
                        "description": "Preferred panel width in pixels (default: 900)"
                    },
                    "height": {
                        "type": "integer",
                        "description": "Preferred panel height in pixels (default: 600)"
                    }
                },
                "required": ["pub_id"]
            }),
        }
    }
}

/// Minimal HTML document hosting the embed iframe. The resize listener
/// forwards the chart's natural height to the host panel.
fn embed_document(embed_url: &str, width: u32, height: u32) -> String {
    let src = escape_attr(embed_url);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<style>
  html, body {{ margin: 0; padding: 0; background: transparent; }}
  iframe {{ border: 0; width: 100%; height: {height}px; }}
</style>
</head>
<body>
<iframe id="tako-embed" src="{src}" width="{width}" height="{height}" allowfullscreen></iframe>
<script>
  window.addEventListener("message", function (event) {{
    var data = event.data;
    if (data && data.type === "tako::resize" && typeof data.height === "number") {{
      document.getElementById("tako-embed").style.height = data.height + "px";
    }}
  }});
</script>
</body>
</html>
"#
    )
}

/// HTML attribute escaping for URLs interpolated into the iframe src.
fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_escaping_covers_html_metacharacters() {
        assert_eq!(
            escape_attr(r#"https://x/?a=1&b="2"<s>"#),
            "https://x/?a=1&amp;b=&quot;2&quot;&lt;s&gt;"
        );
    }

    #[test]
    fn embed_document_escapes_the_url() {
        let html = embed_document("https://trytako.com/embed/p1/?theme=dark&x=\"y\"", 900, 600);
        assert!(html.contains("theme=dark&amp;x=&quot;y&quot;"));
        assert!(!html.contains("x=\"y\""));
        assert!(html.contains("height=\"600\""));
    }
}
