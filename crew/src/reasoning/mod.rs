//! Agent reasoning step: the boundary between the pipeline and the model.
//!
//! The pipeline only sees [`Reasoner::reason`]: a prompt context goes in, a
//! final text with its tool and delegation history comes out. The default
//! [`agent_loop::AgentReasoner`] drives a function-calling model over the
//! task's tools; tests substitute scripted reasoners.

pub mod agent_loop;
pub mod model;
pub mod openai;
pub mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::scope::SourceScope;
use crate::core::types::Agent;
use crate::tools::{TextResult, ToolCapability, ToolError};

pub use agent_loop::{AgentReasoner, ReasoningLimits};
pub use model::{LanguageModel, ModelError};

/// Everything a reasoning step may see about its task.
#[derive(Clone)]
pub struct PromptContext {
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub task_description: String,
    pub expected_output: String,
    /// Latest completed stage's text, if any.
    pub prior_result_text: Option<String>,
    /// Whether that prior text was produced without any successful lookup.
    pub prior_used_fallback: bool,
    pub available_tools: Vec<Arc<dyn ToolCapability>>,
    pub allow_delegation: bool,
    /// Resolved agents of the pipeline; delegation targets are everyone but `role`.
    pub roster: Vec<Arc<Agent>>,
    pub source_scope: Option<SourceScope>,
    pub verbose: bool,
}

impl PromptContext {
    pub fn coworkers(&self) -> impl Iterator<Item = &Arc<Agent>> {
        self.roster.iter().filter(|agent| agent.role != self.role)
    }

    pub fn coworker(&self, role: &str) -> Option<&Arc<Agent>> {
        let wanted = role.trim();
        self.coworkers()
            .find(|agent| agent.role.eq_ignore_ascii_case(wanted))
    }

    pub fn tool(&self, name: &str) -> Option<&Arc<dyn ToolCapability>> {
        self.available_tools.iter().find(|tool| tool.name() == name)
    }
}

impl std::fmt::Debug for PromptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptContext")
            .field("role", &self.role)
            .field("prior_result", &self.prior_result_text.as_ref().map(String::len))
            .field("prior_used_fallback", &self.prior_used_fallback)
            .field("tools", &self.available_tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("allow_delegation", &self.allow_delegation)
            .field("source_scope", &self.source_scope)
            .finish_non_exhaustive()
    }
}

/// A single tool call made during a reasoning step, in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool: String,
    pub query: String,
    pub response: Result<TextResult, ToolError>,
}

impl ToolInvocation {
    pub fn succeeded(&self) -> bool {
        self.response.is_ok()
    }
}

/// A sub-task handed to a coworker and what came back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DelegationRecord {
    pub coworker: String,
    pub task: String,
    /// Depth the coworker reasoned at.
    pub depth: u32,
    pub text: String,
    pub used_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReasoningOutput {
    pub text: String,
    pub tool_invocations: Vec<ToolInvocation>,
    pub delegations: Vec<DelegationRecord>,
    /// Tools were called but none returned usable content.
    pub used_fallback: bool,
}

impl ReasoningOutput {
    /// Output with `used_fallback` derived from the invocations.
    pub fn new(
        text: impl Into<String>,
        tool_invocations: Vec<ToolInvocation>,
        delegations: Vec<DelegationRecord>,
    ) -> Self {
        let used_fallback = fallback_used(&tool_invocations);
        Self {
            text: text.into(),
            tool_invocations,
            delegations,
            used_fallback,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(text, Vec::new(), Vec::new())
    }
}

/// True when at least one tool was invoked and every invocation failed.
pub fn fallback_used(invocations: &[ToolInvocation]) -> bool {
    !invocations.is_empty() && invocations.iter().all(|inv| !inv.succeeded())
}

#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("render prompt: {0}")]
    Prompt(#[from] minijinja::Error),
    #[error("delegation depth {depth} exceeds maximum of {max}")]
    DelegationDepthExceeded { depth: u32, max: u32 },
    #[error("no final answer after {0} model turns")]
    NoFinalAnswer(u32),
    #[error("model returned an empty answer")]
    EmptyAnswer,
    #[error("{missing} code block(s) from the prior result were altered or dropped")]
    CodeBlocksAltered { missing: usize },
    #[error("cancelled")]
    Cancelled,
}

/// One agent working one task; may call tools and delegate.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// `depth` is 0 for pipeline stages and grows by one per delegation hop.
    async fn reason(
        &self,
        ctx: &PromptContext,
        depth: u32,
        cancel: &CancellationToken,
    ) -> Result<ReasoningOutput, ReasoningError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(ok: bool) -> ToolInvocation {
        ToolInvocation {
            tool: "search".to_string(),
            query: "q".to_string(),
            response: if ok {
                Ok(TextResult::single("https://a.example", "x"))
            } else {
                Err(ToolError::Network("down".to_string()))
            },
        }
    }

    #[test]
    fn fallback_requires_calls_that_all_failed() {
        assert!(!fallback_used(&[]));
        assert!(fallback_used(&[invocation(false), invocation(false)]));
        assert!(!fallback_used(&[invocation(false), invocation(true)]));
    }

    #[test]
    fn coworkers_exclude_own_role() {
        let a = Arc::new(Agent::new("Support", "g", "b"));
        let b = Arc::new(Agent::new("QA", "g", "b"));
        let ctx = PromptContext {
            role: "Support".to_string(),
            goal: String::new(),
            backstory: String::new(),
            task_description: String::new(),
            expected_output: String::new(),
            prior_result_text: None,
            prior_used_fallback: false,
            available_tools: Vec::new(),
            allow_delegation: true,
            roster: vec![a, b],
            source_scope: None,
            verbose: false,
        };
        let roles: Vec<&str> = ctx.coworkers().map(|a| a.role.as_str()).collect();
        assert_eq!(roles, vec!["QA"]);
        assert!(ctx.coworker(" qa ").is_some());
        assert!(ctx.coworker("Support").is_none());
    }
}
