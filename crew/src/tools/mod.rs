//! Lookup tools offered to agents.
//!
//! A tool takes a free-text query and returns source-attributed text. Tool
//! failures are typed ([`ToolError`]) and never leave the reasoning step that
//! called the tool.

pub mod html;
pub mod scrape;
pub mod search;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::scope::SourceScope;

pub use scrape::ScrapeWebsiteTool;
pub use search::SerperSearchTool;

/// Separator placed between entries when a result is rendered for a prompt.
pub const ENTRY_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Timeout(_) => "timeout",
            ToolError::Network(_) => "network",
            ToolError::NotFound(_) => "not_found",
        }
    }
}

/// One attributed piece of tool output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourcedText {
    /// URL the content came from.
    pub source: String,
    pub title: Option<String>,
    /// Body text; fenced code blocks inside are verbatim.
    pub content: String,
}

/// Ranked snippets or a page body, each entry with its source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TextResult {
    pub entries: Vec<SourcedText>,
}

impl TextResult {
    pub fn single(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            entries: vec![SourcedText {
                source: source.into(),
                title: None,
                content: content.into(),
            }],
        }
    }

    pub fn push(&mut self, entry: SourcedText) {
        self.entries.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only entries whose source lies inside `scope`.
    pub fn restrict_to(self, scope: &SourceScope) -> TextResult {
        TextResult {
            entries: self
                .entries
                .into_iter()
                .filter(|entry| scope.contains(&entry.source))
                .collect(),
        }
    }

    /// Render for a model prompt. Entry content is emitted unchanged.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|entry| {
                let mut out = String::new();
                if let Some(title) = &entry.title {
                    out.push_str(title);
                    out.push('\n');
                }
                out.push_str("Source: ");
                out.push_str(&entry.source);
                out.push_str("\n\n");
                out.push_str(&entry.content);
                out
            })
            .collect::<Vec<_>>()
            .join(ENTRY_SEPARATOR)
    }
}

/// An external lookup callable by agents.
#[async_trait]
pub trait ToolCapability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Tools with side effects are offered only to agents allowed to run them.
    fn has_side_effects(&self) -> bool {
        false
    }

    async fn invoke(&self, query: &str, timeout: Duration) -> Result<TextResult, ToolError>;
}

/// Invoke `tool`, enforcing `timeout` even if the tool ignores it.
#[instrument(skip_all, fields(tool = tool.name(), timeout_ms = timeout.as_millis() as u64))]
pub async fn invoke_with_timeout(
    tool: &dyn ToolCapability,
    query: &str,
    timeout: Duration,
) -> Result<TextResult, ToolError> {
    let outcome = match tokio::time::timeout(timeout, tool.invoke(query, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(ToolError::Timeout(timeout)),
    };
    match &outcome {
        Ok(result) => debug!(entries = result.entries.len(), "tool succeeded"),
        Err(err) => debug!(kind = err.kind(), error = %err, "tool failed"),
    }
    outcome
}

/// Map a transport failure to the tool error taxonomy.
pub(crate) fn classify_reqwest_error(err: &reqwest::Error, timeout: Duration) -> ToolError {
    if err.is_timeout() {
        ToolError::Timeout(timeout)
    } else {
        ToolError::Network(err.to_string())
    }
}
