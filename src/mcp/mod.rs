pub mod chart_tools;
pub mod constants;
pub mod search_tools;
pub mod server;
pub mod tools;
pub mod types;
pub mod ui_tools;
pub mod upload_tools;

pub use constants::{JsonRpcEnvelopes, MCP_PROTOCOL_VERSION};
