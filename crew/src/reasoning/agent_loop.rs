//! Function-calling reasoning loop.
//!
//! Each turn the model either answers in text (done) or requests calls. Tool
//! calls from one turn run concurrently and are all joined before the next
//! turn. `delegate_work` calls recurse into this same loop for a coworker at
//! `depth + 1`, capped by [`ReasoningLimits::max_delegation_depth`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, join_all};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::reasoning::model::{ChatMessage, LanguageModel, ModelRequest, ToolCall};
use crate::reasoning::prompt::{DELEGATE_FUNCTION, FORCE_FINAL_ANSWER, PromptEngine, function_specs};
use crate::reasoning::{
    DelegationRecord, PromptContext, Reasoner, ReasoningError, ReasoningOutput, ToolInvocation,
};
use crate::tools::{ToolError, invoke_with_timeout};

const DELEGATED_EXPECTED_OUTPUT: &str =
    "A complete answer to the delegated task, citing the sources you used.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReasoningLimits {
    /// Model turns allowed to request calls before a final answer is forced.
    pub max_iterations: u32,
    pub max_delegation_depth: u32,
    pub tool_timeout: Duration,
}

impl Default for ReasoningLimits {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            max_delegation_depth: 2,
            tool_timeout: Duration::from_secs(30),
        }
    }
}

pub struct AgentReasoner {
    model: Arc<dyn LanguageModel>,
    prompts: PromptEngine,
    limits: ReasoningLimits,
}

impl AgentReasoner {
    pub fn new(model: Arc<dyn LanguageModel>, limits: ReasoningLimits) -> Self {
        Self {
            model,
            prompts: PromptEngine::new(),
            limits,
        }
    }

    pub fn limits(&self) -> ReasoningLimits {
        self.limits
    }

    fn reason_at<'a>(
        &'a self,
        ctx: &'a PromptContext,
        depth: u32,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ReasoningOutput, ReasoningError>> {
        let span = info_span!("reason", role = %ctx.role, depth);
        Box::pin(self.run_turns(ctx, depth, cancel).instrument(span))
    }

    async fn run_turns(
        &self,
        ctx: &PromptContext,
        depth: u32,
        cancel: &CancellationToken,
    ) -> Result<ReasoningOutput, ReasoningError> {
        let mut messages = self.prompts.opening_messages(ctx)?;
        let functions = function_specs(ctx);
        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let mut delegations: Vec<DelegationRecord> = Vec::new();

        for turn in 0..self.limits.max_iterations {
            if cancel.is_cancelled() {
                return Err(ReasoningError::Cancelled);
            }
            let reply = self
                .model
                .complete(&ModelRequest {
                    messages: messages.clone(),
                    functions: functions.clone(),
                })
                .await?;

            if reply.tool_calls.is_empty() {
                return finish(ctx, reply.content, invocations, delegations);
            }
            debug!(turn, calls = reply.tool_calls.len(), "model requested calls");

            let calls = reply.tool_calls;
            messages.push(ChatMessage::assistant(
                reply.content.unwrap_or_default(),
                calls.clone(),
            ));
            let answers = self
                .dispatch(ctx, depth, cancel, &calls, &mut invocations, &mut delegations)
                .await?;
            messages.extend(answers);
        }

        warn!(
            role = %ctx.role,
            max_iterations = self.limits.max_iterations,
            "iteration limit reached, forcing final answer"
        );
        messages.push(ChatMessage::user(FORCE_FINAL_ANSWER));
        let reply = self
            .model
            .complete(&ModelRequest {
                messages,
                functions: Vec::new(),
            })
            .await?;
        if reply.content.as_deref().is_none_or(|c| c.trim().is_empty()) {
            return Err(ReasoningError::NoFinalAnswer(self.limits.max_iterations + 1));
        }
        finish(ctx, reply.content, invocations, delegations)
    }

    /// Run one turn's calls and return the tool messages, in call order.
    async fn dispatch(
        &self,
        ctx: &PromptContext,
        depth: u32,
        cancel: &CancellationToken,
        calls: &[ToolCall],
        invocations: &mut Vec<ToolInvocation>,
        delegations: &mut Vec<DelegationRecord>,
    ) -> Result<Vec<ChatMessage>, ReasoningError> {
        let tool_futures = calls
            .iter()
            .filter(|call| call.name != DELEGATE_FUNCTION)
            .map(|call| self.invoke_tool(ctx, call, cancel));
        let mut tool_results = join_all(tool_futures).await.into_iter();
        if cancel.is_cancelled() {
            return Err(ReasoningError::Cancelled);
        }

        let mut answers = Vec::with_capacity(calls.len());
        for call in calls {
            let content = if call.name == DELEGATE_FUNCTION {
                self.delegate(ctx, depth, cancel, call, delegations).await?
            } else {
                let Some(Some(invocation)) = tool_results.next() else {
                    return Err(ReasoningError::Cancelled);
                };
                let content = tool_message(&invocation);
                log_invocation(ctx.verbose, &invocation);
                invocations.push(invocation);
                content
            };
            answers.push(ChatMessage::tool(call.id.clone(), content));
        }
        Ok(answers)
    }

    /// `None` when cancellation was observed before the call was dispatched.
    async fn invoke_tool(
        &self,
        ctx: &PromptContext,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Option<ToolInvocation> {
        if cancel.is_cancelled() {
            return None;
        }
        let query = call.argument("query").unwrap_or_default().trim().to_string();
        let response = match ctx.tool(&call.name) {
            None => Err(ToolError::NotFound(format!(
                "no tool named `{}` is available",
                call.name
            ))),
            Some(_) if query.is_empty() => {
                Err(ToolError::NotFound("missing `query` argument".to_string()))
            }
            Some(tool) => invoke_with_timeout(tool.as_ref(), &query, self.limits.tool_timeout)
                .await
                .and_then(|result| match &ctx.source_scope {
                    Some(scope) => {
                        let scoped = result.restrict_to(scope);
                        if scoped.is_empty() {
                            Err(ToolError::NotFound(format!("no results within {scope}")))
                        } else {
                            Ok(scoped)
                        }
                    }
                    None => Ok(result),
                }),
        };
        Some(ToolInvocation {
            tool: call.name.clone(),
            query,
            response,
        })
    }

    async fn delegate(
        &self,
        ctx: &PromptContext,
        depth: u32,
        cancel: &CancellationToken,
        call: &ToolCall,
        delegations: &mut Vec<DelegationRecord>,
    ) -> Result<String, ReasoningError> {
        if !ctx.allow_delegation {
            return Ok("Delegation is not available for this task.".to_string());
        }
        let requested = call.argument("coworker").unwrap_or_default();
        let Some(coworker) = ctx.coworker(requested) else {
            let known: Vec<&str> = ctx.coworkers().map(|a| a.role.as_str()).collect();
            return Ok(format!(
                "There is no coworker named `{requested}`. Choose one of: {}.",
                known.join(", ")
            ));
        };

        let child_depth = depth + 1;
        if child_depth > self.limits.max_delegation_depth {
            warn!(
                from = %ctx.role,
                to = %coworker.role,
                depth = child_depth,
                "delegation depth exceeded"
            );
            return Err(ReasoningError::DelegationDepthExceeded {
                depth: child_depth,
                max: self.limits.max_delegation_depth,
            });
        }

        let task = call.argument("task").unwrap_or_default().trim().to_string();
        let context = call.argument("context").unwrap_or_default().trim();
        let child = PromptContext {
            role: coworker.role.clone(),
            goal: coworker.goal.clone(),
            backstory: coworker.backstory.clone(),
            task_description: task.clone(),
            expected_output: DELEGATED_EXPECTED_OUTPUT.to_string(),
            prior_result_text: (!context.is_empty()).then(|| context.to_string()),
            prior_used_fallback: false,
            available_tools: coworker.permitted_tools(&coworker.allowed_tools),
            allow_delegation: coworker.can_delegate,
            roster: ctx.roster.clone(),
            source_scope: ctx.source_scope.clone(),
            verbose: coworker.verbose,
        };
        if ctx.verbose {
            info!(from = %ctx.role, to = %child.role, depth = child_depth, "delegating");
        } else {
            debug!(from = %ctx.role, to = %child.role, depth = child_depth, "delegating");
        }

        let output = self.reason_at(&child, child_depth, cancel).await?;
        delegations.push(DelegationRecord {
            coworker: child.role.clone(),
            task,
            depth: child_depth,
            text: output.text.clone(),
            used_fallback: output.used_fallback,
        });
        Ok(output.text)
    }
}

#[async_trait]
impl Reasoner for AgentReasoner {
    async fn reason(
        &self,
        ctx: &PromptContext,
        depth: u32,
        cancel: &CancellationToken,
    ) -> Result<ReasoningOutput, ReasoningError> {
        if cancel.is_cancelled() {
            return Err(ReasoningError::Cancelled);
        }
        self.reason_at(ctx, depth, cancel).await
    }
}

fn finish(
    ctx: &PromptContext,
    content: Option<String>,
    invocations: Vec<ToolInvocation>,
    delegations: Vec<DelegationRecord>,
) -> Result<ReasoningOutput, ReasoningError> {
    let text = content.unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(ReasoningError::EmptyAnswer);
    }
    let output = ReasoningOutput::new(text, invocations, delegations);
    if output.used_fallback {
        warn!(role = %ctx.role, "every tool call failed; answer is unsourced");
    }
    Ok(output)
}

fn tool_message(invocation: &ToolInvocation) -> String {
    match &invocation.response {
        Ok(result) => result.render(),
        Err(err) => format!(
            "Tool `{}` failed ({}): {err}. Do not invent a result for this lookup.",
            invocation.tool,
            err.kind()
        ),
    }
}

fn log_invocation(verbose: bool, invocation: &ToolInvocation) {
    let ok = invocation.succeeded();
    if verbose {
        info!(tool = %invocation.tool, query = %invocation.query, ok, "tool call");
    } else {
        debug!(tool = %invocation.tool, query = %invocation.query, ok, "tool call");
    }
}
