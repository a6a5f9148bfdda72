#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Tako API, no trailing slash.
    pub tako_api_url: String,
    /// Public base URL used to build chart embed links, no trailing slash.
    pub public_base_url: String,
    pub host: String,
    pub port: u16,
    /// Extra origins allowed by the CORS layer, beyond localhost.
    pub allowed_origins: Vec<String>,
    /// When disabled, any origin is accepted (development only).
    pub origin_protection: bool,
    /// API key applied to outbound Tako calls.
    pub api_key: Option<String>,
}

impl Config {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Trim trailing slashes so endpoint paths can be joined with a plain
/// format string.
pub fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Split a comma-separated origin allow-list, dropping empty entries.
pub fn parse_allowed_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_normalization_strips_trailing_slashes() {
        assert_eq!(normalize_base_url("https://trytako.com/"), "https://trytako.com");
        assert_eq!(normalize_base_url("https://trytako.com"), "https://trytako.com");
    }

    #[test]
    fn origin_list_parsing_drops_empty_entries() {
        assert_eq!(
            parse_allowed_origins("https://a.example, https://b.example,,"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_allowed_origins("").is_empty());
    }
}
