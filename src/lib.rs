pub mod config;
pub mod dispatch;
pub mod error;
pub mod fault;
pub mod mcp;
pub mod server;
pub mod session;
pub mod sse;
pub mod tako;
