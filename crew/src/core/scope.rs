//! Authoritative source scopes (URL prefixes) for lookup results.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid source scope `{input}`: {reason}")]
pub struct ScopeError {
    pub input: String,
    pub reason: String,
}

/// A URL prefix that tool results must fall under, e.g.
/// `https://platform.openai.com/docs`.
///
/// Matching compares scheme, host and port exactly, and requires the
/// candidate path to sit at or below the scope path on a segment boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceScope {
    url: Url,
}

impl SourceScope {
    pub fn parse(input: &str) -> Result<Self, ScopeError> {
        let url = Url::parse(input.trim()).map_err(|err| ScopeError {
            input: input.to_string(),
            reason: err.to_string(),
        })?;
        if url.host_str().is_none() {
            return Err(ScopeError {
                input: input.to_string(),
                reason: "scope must name a host".to_string(),
            });
        }
        Ok(Self { url })
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Scope as a search-engine `site:` filter (`host/path` without scheme).
    pub fn site_filter(&self) -> String {
        let path = self.path();
        if path.is_empty() {
            self.host().to_string()
        } else {
            format!("{}{}", self.host(), path)
        }
    }

    pub fn contains(&self, candidate: &str) -> bool {
        let Ok(candidate) = Url::parse(candidate.trim()) else {
            return false;
        };
        if candidate.scheme() != self.url.scheme()
            || candidate.host_str() != self.url.host_str()
            || candidate.port_or_known_default() != self.url.port_or_known_default()
        {
            return false;
        }
        let scope_path = self.path();
        if scope_path.is_empty() {
            return true;
        }
        let path = candidate.path();
        path == scope_path
            || path
                .strip_prefix(scope_path)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    fn path(&self) -> &str {
        self.url.path().trim_end_matches('/')
    }
}

impl FromStr for SourceScope {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.url.scheme(), self.site_filter())
    }
}
