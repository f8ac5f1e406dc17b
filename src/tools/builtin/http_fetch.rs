//! HTTP GET tool used for live-data lookups
//!
//! Fetches a URL with optional query parameters and returns the status,
//! content type and body. JSON bodies are parsed; HTML is reduced to its
//! readable article text.

use crate::tools::{Tool, ToolDescription, ToolError};
use article_scraper::Readability;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_RESPONSE_BYTES: usize = 256 * 1024;

pub struct HttpFetchTool {
    client: Option<reqwest::Client>,
    timeout: Duration,
    max_response_bytes: usize,
    /// Empty means any host
    allowed_hosts: Vec<String>,
}

impl Default for HttpFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetchTool {
    pub fn new() -> Self {
        Self {
            client: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            allowed_hosts: Vec::new(),
        }
    }

    fn build_url(&self, raw: &str, query: Option<&serde_json::Map<String, Value>>) -> Result<Url, ToolError> {
        let mut url = Url::parse(raw)
            .map_err(|e| ToolError::ExecutionError(format!("Invalid URL '{raw}': {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::ExecutionError(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        if !self.allowed_hosts.is_empty() {
            let host = url.host_str().unwrap_or_default();
            if !self.allowed_hosts.iter().any(|allowed| allowed == host) {
                return Err(ToolError::ExecutionError(format!(
                    "Host '{host}' is not in the allowed host list"
                )));
            }
        }

        if let Some(query) = query {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                match value {
                    Value::String(s) => pairs.append_pair(key, s),
                    other => pairs.append_pair(key, &other.to_string()),
                };
            }
        }

        Ok(url)
    }

    /// Read the body in chunks, failing once it exceeds the configured cap
    async fn read_capped(&self, mut response: reqwest::Response) -> Result<Vec<u8>, ToolError> {
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(map_reqwest_error)? {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(ToolError::ExecutionError(format!(
                    "Response exceeds {} bytes",
                    self.max_response_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ToolError {
    if e.is_timeout() {
        ToolError::Timeout(e.to_string())
    } else {
        ToolError::ExecutionError(format!("HTTP request failed: {e}"))
    }
}

/// Decode a response body according to its content type
async fn decode_body(url: &Url, content_type: &str, bytes: &[u8]) -> Result<Value, ToolError> {
    let text = String::from_utf8_lossy(bytes);
    if content_type.contains("json") {
        if let Ok(parsed) = serde_json::from_slice::<Value>(bytes) {
            return Ok(parsed);
        }
    }
    if content_type.contains("html") {
        return extract_readable_text(&text, url).await.map(Value::String);
    }
    Ok(Value::String(text.into_owned()))
}

/// Pull the main article out of a page with Readability, flattening the
/// result to text. Falls back to flattening the whole page when extraction
/// finds nothing.
async fn extract_readable_text(html: &str, url: &Url) -> Result<String, ToolError> {
    let html_owned = html.to_string();
    let base_url = Some(url.clone());
    // article_scraper can panic on malformed markup
    let result = tokio::task::spawn_blocking(move || {
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tokio::runtime::Handle::current()
                .block_on(async { Readability::extract(&html_owned, base_url).await })
        }))
    })
    .await;

    match result {
        Ok(Ok(Ok(article))) => {
            let text = html_to_text(&article);
            if text.is_empty() {
                debug!(url = %url, "Readability found no article, flattening whole page");
                Ok(html_to_text(html))
            } else {
                Ok(text)
            }
        }
        Ok(Ok(Err(e))) => {
            debug!(url = %url, error = %e, "Readability extraction failed, flattening whole page");
            Ok(html_to_text(html))
        }
        Ok(Err(_panic)) => Err(ToolError::ExecutionError(format!(
            "Content extraction failed for '{url}': the page's HTML could not be parsed"
        ))),
        Err(e) => {
            warn!(url = %url, error = %e, "Extraction task failed, flattening whole page");
            Ok(html_to_text(html))
        }
    }
}

/// Strip tags, scripts and styles; block elements become line breaks
fn html_to_text(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;
    let mut tag_name = String::new();

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag_name.clear();
            }
            '>' if in_tag => {
                let tag = tag_name
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_lowercase();
                match tag.as_str() {
                    "script" => in_script = true,
                    "/script" => in_script = false,
                    "style" => in_style = true,
                    "/style" => in_style = false,
                    _ => {}
                }
                let bare = tag.trim_start_matches('/').trim_end_matches('/');
                if matches!(
                    bare,
                    "div" | "p" | "br" | "li" | "tr" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
                ) {
                    result.push('\n');
                }
                in_tag = false;
            }
            _ if in_tag => tag_name.push(ch),
            _ if in_script || in_style => {}
            _ if ch.is_whitespace() => {
                if !result.ends_with(' ') && !result.ends_with('\n') {
                    result.push(' ');
                }
            }
            _ => result.push(ch),
        }
    }

    result
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for HttpFetchTool {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: "http_fetch".to_string(),
            description: "Fetch a URL over HTTP GET and return its body as JSON or text"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "minLength": 1
                    },
                    "query": {
                        "type": "object",
                        "additionalProperties": {
                            "type": ["string", "number", "boolean"]
                        }
                    },
                    "headers": {
                        "type": "object",
                        "additionalProperties": {"type": "string"}
                    }
                },
                "required": ["url"],
                "additionalProperties": false
            }),
        }
    }

    async fn initialize(&mut self, config: Option<&Value>) -> Result<(), ToolError> {
        if let Some(config) = config {
            if let Some(secs) = config.get("timeout_secs").and_then(Value::as_u64) {
                if secs == 0 {
                    return Err(ToolError::InitializationError(
                        "timeout_secs must be greater than zero".to_string(),
                    ));
                }
                self.timeout = Duration::from_secs(secs);
            }
            if let Some(max) = config.get("max_response_bytes").and_then(Value::as_u64) {
                self.max_response_bytes = max as usize;
            }
            if let Some(hosts) = config.get("allowed_hosts").and_then(Value::as_array) {
                self.allowed_hosts = hosts
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
            }
        }

        self.client = Some(
            reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| ToolError::InitializationError(e.to_string()))?,
        );

        Ok(())
    }

    async fn execute(&self, parameters: &Value) -> Result<Value, ToolError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ToolError::ExecutionError("Tool not initialized".to_string()))?;

        let raw_url = parameters
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::ValidationError("url is required".to_string()))?;
        let url = self.build_url(raw_url, parameters.get("query").and_then(Value::as_object))?;

        let mut request = client.get(url.clone());
        if let Some(headers) = parameters.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key, value);
                }
            }
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/plain")
            .to_string();

        let bytes = self.read_capped(response).await?;

        if !status.is_success() {
            return Err(ToolError::ExecutionError(format!(
                "{url} returned HTTP {}",
                status.as_u16()
            )));
        }

        Ok(json!({
            "url": url.as_str(),
            "status": status.as_u16(),
            "content_type": content_type,
            "body": decode_body(&url, &content_type, &bytes).await?,
        }))
    }
}
