use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tako_mcp::{
    config::{normalize_base_url, parse_allowed_origins, Config},
    server::run_server,
};

#[derive(Parser)]
#[command(name = "tako-mcp")]
#[command(about = "An MCP server exposing Tako's knowledge and visualization API")]
struct Args {
    /// Base URL of the Tako API
    #[arg(long, env = "TAKO_API_URL", default_value = "https://api.trytako.com")]
    tako_api_url: String,

    /// Public base URL used to build chart embed links
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "https://trytako.com")]
    public_base_url: String,

    /// Server host
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, env = "PORT", default_value = "8001")]
    port: u16,

    /// Comma-separated list of additional origins allowed by CORS
    #[arg(long, env = "MCP_ALLOWED_ORIGINS", default_value = "")]
    allowed_origins: String,

    /// Restrict cross-origin requests to the allowed origins
    #[arg(
        long,
        env = "MCP_ENABLE_ORIGIN_PROTECTION",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    origin_protection: bool,

    /// API key applied to outbound Tako calls
    #[arg(long, env = "TAKO_API_KEY")]
    api_key: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting Tako MCP Server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Tako API: {}", args.tako_api_url);
    info!("Server: {}:{}", args.host, args.port);
    info!("Origin protection: {}", args.origin_protection);

    let config = Config {
        tako_api_url: normalize_base_url(&args.tako_api_url),
        public_base_url: normalize_base_url(&args.public_base_url),
        host: args.host,
        port: args.port,
        allowed_origins: parse_allowed_origins(&args.allowed_origins),
        origin_protection: args.origin_protection,
        api_key: args.api_key,
    };

    run_server(config).await?;

    Ok(())
}
