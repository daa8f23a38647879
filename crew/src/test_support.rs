//! Test-only helpers: scripted models, canned tools and recording reasoners.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::types::InputBindings;
use crate::reasoning::model::{LanguageModel, ModelError, ModelReply, ModelRequest, ToolCall};
use crate::reasoning::{PromptContext, Reasoner, ReasoningError, ReasoningOutput};
use crate::tools::{SourcedText, TextResult, ToolCapability, ToolError};

pub const ACME_INQUIRY: &str =
    "How do I set the temperature parameter and what's the code example?";

/// Bindings for the Acme scenario.
pub fn acme_bindings() -> InputBindings {
    InputBindings::new()
        .with("customer", "Acme")
        .with("person", "Jo")
        .with("inquiry", ACME_INQUIRY)
}

/// A prompt context for `role` with no tools, prior result or coworkers.
pub fn prompt_context(role: &str) -> PromptContext {
    PromptContext {
        role: role.to_string(),
        goal: format!("{role} goal"),
        backstory: format!("{role} backstory"),
        task_description: format!("{role} task"),
        expected_output: "an answer".to_string(),
        prior_result_text: None,
        prior_used_fallback: false,
        available_tools: Vec::new(),
        allow_delegation: false,
        roster: Vec::new(),
        source_scope: None,
        verbose: false,
    }
}

static CALL_IDS: AtomicUsize = AtomicUsize::new(0);

/// A model tool call with a fresh id.
pub fn call(name: &str, arguments: Value) -> ToolCall {
    let id = CALL_IDS.fetch_add(1, Ordering::Relaxed);
    ToolCall {
        id: format!("call_{id}"),
        name: name.to_string(),
        arguments,
    }
}

/// Tool returning a fixed result and recording every query.
pub struct StaticTool {
    name: String,
    result: TextResult,
    calls: Mutex<Vec<String>>,
}

impl StaticTool {
    /// Single entry sourced under the OpenAI docs site.
    pub fn text(name: &str, content: &str) -> Self {
        Self::sourced(
            name,
            &format!("https://platform.openai.com/docs/{name}"),
            content,
        )
    }

    pub fn sourced(name: &str, source: &str, content: &str) -> Self {
        Self::with_result(name, TextResult::single(source, content))
    }

    pub fn with_result(name: &str, result: TextResult) -> Self {
        Self {
            name: name.to_string(),
            result,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ToolCapability for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "static test tool"
    }

    async fn invoke(&self, query: &str, _timeout: Duration) -> Result<TextResult, ToolError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(query.to_string());
        }
        Ok(self.result.clone())
    }
}

/// Tool that always fails with the given error.
pub struct FailingTool {
    name: String,
    error: ToolError,
    calls: AtomicUsize,
}

impl FailingTool {
    pub fn new(name: &str, error: ToolError) -> Self {
        Self {
            name: name.to_string(),
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolCapability for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "failing test tool"
    }

    async fn invoke(&self, _query: &str, _timeout: Duration) -> Result<TextResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// Tool that declares side effects (e.g. code execution).
pub struct SideEffectTool {
    name: String,
}

impl SideEffectTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ToolCapability for SideEffectTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "side-effecting test tool"
    }

    fn has_side_effects(&self) -> bool {
        true
    }

    async fn invoke(&self, query: &str, _timeout: Duration) -> Result<TextResult, ToolError> {
        Ok(TextResult {
            entries: vec![SourcedText {
                source: "local://exec".to_string(),
                title: None,
                content: format!("ran {query}"),
            }],
        })
    }
}

/// Tool that sleeps before answering, ignoring its timeout.
pub struct SlowTool {
    name: String,
    delay: Duration,
}

impl SlowTool {
    pub fn new(name: &str, delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
        }
    }
}

#[async_trait]
impl ToolCapability for SlowTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "slow test tool"
    }

    async fn invoke(&self, query: &str, _timeout: Duration) -> Result<TextResult, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(TextResult::single("https://platform.openai.com/docs/slow", query))
    }
}

/// Model that replays a fixed script of replies and records requests.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ModelReply>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ModelReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .ok_or_else(|| ModelError::InvalidResponse("script exhausted".to_string()))
    }
}

type ModelFn = dyn Fn(&ModelRequest) -> Result<ModelReply, ModelError> + Send + Sync;

/// Model whose replies are computed from each request.
pub struct FnModel {
    reply: Box<ModelFn>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl FnModel {
    pub fn new(
        reply: impl Fn(&ModelRequest) -> Result<ModelReply, ModelError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reply: Box::new(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for FnModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        (self.reply)(request)
    }
}

type ReasonFn =
    dyn Fn(&PromptContext, u32) -> Result<ReasoningOutput, ReasoningError> + Send + Sync;

/// Reasoner that answers with a closure and records every context it saw.
pub struct RecordingReasoner {
    respond: Box<ReasonFn>,
    contexts: Mutex<Vec<PromptContext>>,
}

impl RecordingReasoner {
    pub fn new(
        respond: impl Fn(&PromptContext, u32) -> Result<ReasoningOutput, ReasoningError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Answers `"<role>: <task description>"`.
    pub fn echo() -> Self {
        Self::new(|ctx, _| {
            Ok(ReasoningOutput::text(format!(
                "{}: {}",
                ctx.role, ctx.task_description
            )))
        })
    }

    pub fn contexts(&self) -> Vec<PromptContext> {
        self.contexts.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Reasoner for RecordingReasoner {
    async fn reason(
        &self,
        ctx: &PromptContext,
        depth: u32,
        cancel: &CancellationToken,
    ) -> Result<ReasoningOutput, ReasoningError> {
        if cancel.is_cancelled() {
            return Err(ReasoningError::Cancelled);
        }
        if let Ok(mut contexts) = self.contexts.lock() {
            contexts.push(ctx.clone());
        }
        (self.respond)(ctx, depth)
    }
}
