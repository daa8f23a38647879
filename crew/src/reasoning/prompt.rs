//! Prompt construction for the agent loop.

use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::json;

use crate::reasoning::PromptContext;
use crate::reasoning::model::{ChatMessage, FunctionSpec};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md");

/// Function offered to agents that may delegate.
pub const DELEGATE_FUNCTION: &str = "delegate_work";

pub const FORCE_FINAL_ANSWER: &str = "You have used all of your tool calls. Give your best final answer now, \
using only what you have already gathered. Do not call any more tools.";

#[derive(Debug, Serialize)]
struct ToolView<'a> {
    name: &'a str,
    description: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)
            .expect("system template should be valid");
        env.add_template("task", TASK_TEMPLATE)
            .expect("task template should be valid");
        Self { env }
    }

    pub fn render_system(&self, ctx: &PromptContext) -> Result<String, minijinja::Error> {
        let tools: Vec<ToolView<'_>> = ctx
            .available_tools
            .iter()
            .map(|tool| ToolView {
                name: tool.name(),
                description: tool.description(),
            })
            .collect();
        let coworkers: Vec<&str> = if ctx.allow_delegation {
            ctx.coworkers().map(|agent| agent.role.as_str()).collect()
        } else {
            Vec::new()
        };
        let template = self.env.get_template("system")?;
        template.render(context! {
            role => ctx.role.trim(),
            goal => ctx.goal.trim(),
            backstory => ctx.backstory.trim(),
            tools => tools,
            scope => ctx.source_scope.as_ref().map(ToString::to_string),
            coworkers => coworkers,
            delegate_function => DELEGATE_FUNCTION,
        })
    }

    pub fn render_task(&self, ctx: &PromptContext) -> Result<String, minijinja::Error> {
        let template = self.env.get_template("task")?;
        template.render(context! {
            description => ctx.task_description.trim(),
            expected_output => ctx.expected_output.trim(),
            prior => ctx.prior_result_text.as_deref().filter(|s| !s.trim().is_empty()),
            prior_used_fallback => ctx.prior_used_fallback,
        })
    }

    /// Opening system and user messages for a reasoning step.
    pub fn opening_messages(
        &self,
        ctx: &PromptContext,
    ) -> Result<Vec<ChatMessage>, minijinja::Error> {
        Ok(vec![
            ChatMessage::system(self.render_system(ctx)?),
            ChatMessage::user(self.render_task(ctx)?),
        ])
    }
}

/// Functions the model may call for this context: its tools, then delegation.
pub fn function_specs(ctx: &PromptContext) -> Vec<FunctionSpec> {
    let mut specs: Vec<FunctionSpec> = ctx
        .available_tools
        .iter()
        .map(|tool| FunctionSpec {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "What to look up" }
                },
                "required": ["query"]
            }),
        })
        .collect();

    let coworkers: Vec<&str> = ctx.coworkers().map(|agent| agent.role.as_str()).collect();
    if ctx.allow_delegation && !coworkers.is_empty() {
        specs.push(FunctionSpec {
            name: DELEGATE_FUNCTION.to_string(),
            description: "Delegate a specific sub-task to a coworker and get their answer back."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "coworker": { "type": "string", "enum": coworkers },
                    "task": { "type": "string", "description": "The narrowed sub-task" },
                    "context": {
                        "type": "string",
                        "description": "Everything the coworker needs to know"
                    }
                },
                "required": ["coworker", "task", "context"]
            }),
        });
    }
    specs
}
