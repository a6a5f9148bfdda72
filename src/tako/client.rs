//! Outbound HTTP client for the Tako API.
//!
//! Timeout discipline lives here: every call carries its own per-endpoint
//! budget instead of a router-level deadline. Status codes with a defined
//! meaning (404 not found, 408 retryable generation timeout, 400 invalid
//! payload) are mapped to typed errors so tool handlers can shape them
//! into payloads without inspecting raw responses.

use std::time::Duration;

use reqwest::multipart;
use serde_json::Value;

use crate::config::Config;
use crate::tako::types::{
    CreateChartRequest, ExploreRequest, KnowledgeSearchRequest, VisualizeRequest,
};

/// Per-endpoint timeout budgets. Searches and image probes get a minute,
/// insight generation and visualization get longer, uploads the longest.
#[derive(Debug, Clone)]
pub struct Timeouts {
    pub search: Duration,
    pub explore: Duration,
    pub image: Duration,
    pub insights: Duration,
    pub schema: Duration,
    pub create: Duration,
    pub upload: Duration,
    pub visualize: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            search: Duration::from_secs(60),
            explore: Duration::from_secs(60),
            image: Duration::from_secs(60),
            insights: Duration::from_secs(90),
            schema: Duration::from_secs(30),
            create: Duration::from_secs(60),
            upload: Duration::from_secs(120),
            visualize: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TakoError {
    #[error("request timed out")]
    Timeout,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("generation timed out, retryable: {0}")]
    RetryableTimeout(String),

    #[error("invalid request payload")]
    InvalidRequest { details: Value },

    #[error("upstream returned HTTP {status}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(reqwest::Error),
}

impl From<reqwest::Error> for TakoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TakoError::Timeout
        } else {
            TakoError::Transport(err)
        }
    }
}

pub struct TakoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeouts: Timeouts,
}

impl TakoClient {
    pub fn new(config: &Config) -> Self {
        Self::with_timeouts(config, Timeouts::default())
    }

    pub fn with_timeouts(config: &Config, timeouts: Timeouts) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.tako_api_url.clone(),
            api_key: config.api_key.clone(),
            timeouts,
        }
    }

    fn get(&self, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        self.authorize(
            self.http
                .get(format!("{}{}", self.base_url, path))
                .timeout(timeout),
        )
    }

    fn post(&self, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        self.authorize(
            self.http
                .post(format!("{}{}", self.base_url, path))
                .timeout(timeout),
        )
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("X-API-Key", key),
            None => builder,
        }
    }

    /// The public image URL for a chart, independent of any request.
    pub fn image_url(&self, pub_id: &str, dark_mode: bool) -> String {
        format!(
            "{}/api/v1/image/{}/?dark_mode={}",
            self.base_url, pub_id, dark_mode
        )
    }

    pub async fn knowledge_search(
        &self,
        request: &KnowledgeSearchRequest,
    ) -> Result<Value, TakoError> {
        let resp = self
            .post("/api/v1/knowledge_search", self.timeouts.search)
            .json(request)
            .send()
            .await?;
        Ok(check(resp, "knowledge search").await?.json().await?)
    }

    /// Knowledge search variant that asks the API to attach a `data_url`
    /// to each card, pointing at the card's raw underlying data.
    pub async fn knowledge_search_with_data(
        &self,
        request: &KnowledgeSearchRequest,
    ) -> Result<Value, TakoError> {
        let resp = self
            .post("/api/v1/knowledge_search", self.timeouts.search)
            .query(&[("include_data_url", "true")])
            .json(request)
            .send()
            .await?;
        Ok(check(resp, "knowledge search").await?.json().await?)
    }

    /// Fetch the raw data a card's `data_url` points at. The URL is
    /// absolute and unauthenticated.
    pub async fn fetch_raw_data(&self, data_url: &str) -> Result<String, TakoError> {
        let resp = self
            .http
            .get(data_url)
            .timeout(self.timeouts.search)
            .send()
            .await?;
        Ok(check(resp, data_url).await?.text().await?)
    }

    /// Ingest a file Tako can reach at an external URL. Returns the file id.
    pub async fn upload_file_from_url(&self, url: &str) -> Result<String, TakoError> {
        let resp = self
            .post("/api/v1/beta/file_connector/", self.timeouts.upload)
            .json(&serde_json::json!({"url": url}))
            .send()
            .await?;
        let body: Value = check(resp, url).await?.json().await?;
        body.get("file_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TakoError::Status {
                status: 200,
                message: "file connector response missing file_id".to_string(),
            })
    }

    /// Probe whether the preview image for a chart has been rendered.
    pub async fn chart_image_exists(
        &self,
        pub_id: &str,
        dark_mode: bool,
    ) -> Result<(), TakoError> {
        let resp = self
            .get(&format!("/api/v1/image/{}/", pub_id), self.timeouts.image)
            .query(&[("dark_mode", dark_mode.to_string())])
            .send()
            .await?;
        check(resp, pub_id).await?;
        Ok(())
    }

    pub async fn card_insights(&self, pub_id: &str, effort: &str) -> Result<Value, TakoError> {
        let resp = self
            .get(
                &format!("/api/v1/internal/chart-configs/{}/chart-insights/", pub_id),
                self.timeouts.insights,
            )
            .query(&[("effort", effort)])
            .send()
            .await?;
        Ok(check(resp, pub_id).await?.json().await?)
    }

    pub async fn explore(&self, request: &ExploreRequest) -> Result<Value, TakoError> {
        let resp = self
            .post("/api/v1/explore/", self.timeouts.explore)
            .json(request)
            .send()
            .await?;
        Ok(check(resp, "explore").await?.json().await?)
    }

    pub async fn list_schemas(&self) -> Result<Value, TakoError> {
        let resp = self
            .get("/api/v1/thin_viz/default_schema/", self.timeouts.schema)
            .send()
            .await?;
        Ok(check(resp, "schemas").await?.json().await?)
    }

    pub async fn get_schema(&self, schema_name: &str) -> Result<Value, TakoError> {
        let resp = self
            .get(
                &format!("/api/v1/thin_viz/default_schema/{}/", schema_name),
                self.timeouts.schema,
            )
            .send()
            .await?;
        Ok(check(resp, schema_name).await?.json().await?)
    }

    pub async fn create_chart(
        &self,
        schema_name: &str,
        request: &CreateChartRequest,
    ) -> Result<Value, TakoError> {
        let resp = self
            .post(
                &format!("/api/v1/thin_viz/default_schema/{}/create/", schema_name),
                self.timeouts.create,
            )
            .json(request)
            .send()
            .await?;
        Ok(check(resp, schema_name).await?.json().await?)
    }

    /// Upload raw file bytes for later visualization. Returns the file id.
    pub async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<String, TakoError> {
        let part = multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);
        let resp = self
            .authorize(
                self.http
                    .post(format!("{}/api/v1/beta/files/", self.base_url))
                    .timeout(self.timeouts.upload),
            )
            .multipart(form)
            .send()
            .await?;
        let body: Value = check(resp, filename).await?.json().await?;
        body.get("file_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TakoError::Status {
                status: 200,
                message: "upload response missing file_id".to_string(),
            })
    }

    pub async fn visualize(&self, request: &VisualizeRequest) -> Result<Value, TakoError> {
        let resp = self
            .post("/api/v1/beta/visualize/", self.timeouts.visualize)
            .json(request)
            .send()
            .await?;
        Ok(check(resp, "visualize").await?.json().await?)
    }
}

async fn check(resp: reqwest::Response, resource: &str) -> Result<reqwest::Response, TakoError> {
    let status = resp.status();
    match status.as_u16() {
        404 => Err(TakoError::NotFound(resource.to_string())),
        408 => Err(TakoError::RetryableTimeout(resource.to_string())),
        400 => {
            let details = resp.json().await.unwrap_or(Value::Null);
            Err(TakoError::InvalidRequest { details })
        }
        _ if status.is_success() => Ok(resp),
        code => {
            let message = resp.text().await.unwrap_or_default();
            Err(TakoError::Status {
                status: code,
                message,
            })
        }
    }
}
