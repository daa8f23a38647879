//! Fetch a web page and extract its readable text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, instrument};
use url::Url;

use crate::tools::html::extract_page;
use crate::tools::{SourcedText, TextResult, ToolCapability, ToolError, classify_reqwest_error};

pub const DEFAULT_MAX_BODY_BYTES: usize = 2_000_000;

pub struct ScrapeWebsiteTool {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl ScrapeWebsiteTool {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("crew/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        })
    }

    /// Pages larger than this are not read.
    pub fn with_max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    async fn read_body(
        &self,
        url: &Url,
        mut response: reqwest::Response,
        timeout: Duration,
    ) -> Result<String, ToolError> {
        let too_large = || {
            ToolError::NotFound(format!(
                "{url} is larger than {} bytes",
                self.max_body_bytes
            ))
        };
        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(too_large());
        }
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| classify_reqwest_error(&err, timeout))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[async_trait]
impl ToolCapability for ScrapeWebsiteTool {
    fn name(&self) -> &str {
        "read_website_content"
    }

    fn description(&self) -> &str {
        "Read a web page. The query is the page URL; returns the page text with code blocks intact."
    }

    #[instrument(skip_all, fields(tool = "read_website_content"))]
    async fn invoke(&self, query: &str, timeout: Duration) -> Result<TextResult, ToolError> {
        let url = Url::parse(query.trim())
            .map_err(|err| ToolError::NotFound(format!("`{}` is not a URL: {err}", query.trim())))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::NotFound(format!("unsupported scheme in {url}")));
        }
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| classify_reqwest_error(&err, timeout))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(ToolError::NotFound(format!("{url} returned {status}")));
        }
        if !status.is_success() {
            return Err(ToolError::Network(format!("{url} returned HTTP {status}")));
        }
        let source = response.url().to_string();
        let body = self.read_body(&url, response, timeout).await?;

        let page = extract_page(&body);
        if page.text.is_empty() {
            return Err(ToolError::NotFound(format!("{url} has no readable content")));
        }
        Ok(TextResult {
            entries: vec![SourcedText {
                source,
                title: page.title,
                content: page.text,
            }],
        })
    }
}
