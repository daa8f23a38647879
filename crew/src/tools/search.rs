//! Web search over a Serper-compatible JSON API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::scope::SourceScope;
use crate::tools::{SourcedText, TextResult, ToolCapability, ToolError, classify_reqwest_error};

pub const DEFAULT_API_BASE: &str = "https://google.serper.dev";

pub struct SerperSearchTool {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    results_per_query: u32,
    scope: Option<SourceScope>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    num: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: Option<String>,
    link: String,
    #[serde(default)]
    snippet: String,
}

impl SerperSearchTool {
    pub fn new(api_base: impl Into<String>, api_key: Option<String>) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("crew/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            results_per_query: 5,
            scope: None,
        })
    }

    pub fn with_results_per_query(mut self, results: u32) -> Self {
        self.results_per_query = results.max(1);
        self
    }

    /// Restrict queries to `scope` with a `site:` filter.
    pub fn with_scope(mut self, scope: SourceScope) -> Self {
        self.scope = Some(scope);
        self
    }

    fn scoped_query(&self, query: &str) -> String {
        match &self.scope {
            Some(scope) => format!("{} site:{}", query.trim(), scope.site_filter()),
            None => query.trim().to_string(),
        }
    }
}

#[async_trait]
impl ToolCapability for SerperSearchTool {
    fn name(&self) -> &str {
        "search_internet"
    }

    fn description(&self) -> &str {
        "Search the internet. Returns ranked snippets, each with its source URL."
    }

    #[instrument(skip_all, fields(tool = "search_internet"))]
    async fn invoke(&self, query: &str, timeout: Duration) -> Result<TextResult, ToolError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::Network("search api key is not configured".to_string()))?;
        let q = self.scoped_query(query);
        debug!(query = %q, "searching");

        let response = self
            .client
            .post(format!("{}/search", self.api_base))
            .header("X-API-KEY", api_key)
            .timeout(timeout)
            .json(&SearchRequest {
                q: &q,
                num: self.results_per_query,
            })
            .send()
            .await
            .map_err(|err| classify_reqwest_error(&err, timeout))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ToolError::NotFound(format!("search endpoint returned {status}")));
        }
        if !status.is_success() {
            return Err(ToolError::Network(format!("search returned HTTP {status}")));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|err| ToolError::Network(format!("parse search response: {err}")))?;
        let result = snippets(body, self.results_per_query as usize);
        if result.is_empty() {
            return Err(ToolError::NotFound(format!("no results for `{q}`")));
        }
        Ok(result)
    }
}

fn snippets(body: SearchResponse, limit: usize) -> TextResult {
    TextResult {
        entries: body
            .organic
            .into_iter()
            .take(limit)
            .map(|hit| SourcedText {
                source: hit.link,
                title: hit.title,
                content: hit.snippet,
            })
            .collect(),
    }
}
