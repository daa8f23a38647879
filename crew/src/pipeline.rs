//! Sequential pipeline orchestrator.
//!
//! A run validates every template up front, then walks the tasks in order.
//! Each stage receives the latest completed stage's text as its prior
//! context; the last stage's text is the run's output. Any template or
//! reasoning failure aborts the run; there is no partial output.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::core::code_blocks::missing_blocks;
use crate::core::state::{RunState, StateError};
use crate::core::template::{PRIOR_OUTPUT_KEY, Resolver, TemplateError, placeholders};
use crate::core::types::{Agent, ExecutionContext, InputBindings, StageRecord, Task};
use crate::reasoning::{PromptContext, Reasoner, ReasoningError};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline has no tasks")]
    Empty,
    #[error("stage {} ({role}) failed: {source}", .index + 1)]
    Template {
        index: usize,
        role: String,
        #[source]
        source: TemplateError,
    },
    #[error("stage {} ({role}) failed: {cause}", .index + 1)]
    Failed {
        index: usize,
        role: String,
        #[source]
        cause: ReasoningError,
    },
    #[error("run cancelled before stage {} completed", .index + 1)]
    Cancelled { index: usize },
    #[error(transparent)]
    State(#[from] StateError),
}

impl PipelineError {
    /// Zero-based index of the stage that failed, if the failure is stage-bound.
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            PipelineError::Template { index, .. }
            | PipelineError::Failed { index, .. }
            | PipelineError::Cancelled { index } => Some(*index),
            PipelineError::Empty | PipelineError::State(_) => None,
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    /// Final stage's text.
    pub output: String,
    pub context: ExecutionContext,
    pub duration: Duration,
}

pub struct Pipeline {
    tasks: Vec<Task>,
    reasoner: Arc<dyn Reasoner>,
}

/// Agents with their templates resolved, one per task, sharing `Arc`s where
/// tasks share an agent.
struct Plan {
    stage_agents: Vec<Arc<Agent>>,
    roster: Vec<Arc<Agent>>,
}

impl Pipeline {
    pub fn new(tasks: Vec<Task>, reasoner: Arc<dyn Reasoner>) -> Result<Self, PipelineError> {
        if tasks.is_empty() {
            return Err(PipelineError::Empty);
        }
        Ok(Self { tasks, reasoner })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Binding keys referenced by any agent or task template.
    pub fn required_bindings(&self) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for task in &self.tasks {
            let agent = &task.agent;
            let templates = [
                task.description.as_str(),
                task.expected_output.as_str(),
                agent.role.as_str(),
                agent.goal.as_str(),
                agent.backstory.as_str(),
            ];
            for template in templates {
                keys.extend(
                    placeholders(template)
                        .into_iter()
                        .filter(|key| *key != PRIOR_OUTPUT_KEY)
                        .map(str::to_string),
                );
            }
        }
        keys
    }

    /// Check that every template resolves for `bindings` without running anything.
    pub fn validate(&self, bindings: &InputBindings) -> Result<(), PipelineError> {
        self.prepare(bindings).map(|_| ())
    }

    /// Run to completion and return the final text.
    pub async fn run(&self, bindings: &InputBindings) -> Result<String, PipelineError> {
        let report = self.execute(bindings, &CancellationToken::new()).await?;
        Ok(report.output)
    }

    pub async fn execute(
        &self,
        bindings: &InputBindings,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        self.execute_with(bindings, cancel, |_| {}).await
    }

    /// Run the pipeline, calling `on_stage` after each completed stage.
    pub async fn execute_with<F: FnMut(&StageRecord)>(
        &self,
        bindings: &InputBindings,
        cancel: &CancellationToken,
        on_stage: F,
    ) -> Result<RunReport, PipelineError> {
        let run_id = new_run_id();
        let span = info_span!("pipeline", run_id = %run_id, stages = self.tasks.len());
        self.run_stages(run_id, bindings, cancel, on_stage)
            .instrument(span)
            .await
    }

    async fn run_stages<F: FnMut(&StageRecord)>(
        &self,
        run_id: String,
        bindings: &InputBindings,
        cancel: &CancellationToken,
        mut on_stage: F,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let plan = self.prepare(bindings)?;
        let total = self.tasks.len();
        let mut context = ExecutionContext::new();
        let mut state = RunState::Pending.begin()?;
        info!(%state, "run started");

        while let Some(index) = state.running_index() {
            let task = &self.tasks[index];
            let agent = &plan.stage_agents[index];
            if cancel.is_cancelled() {
                warn!(stage = index, role = %agent.role, "run cancelled");
                return Err(PipelineError::Cancelled { index });
            }

            let prior = context
                .latest()
                .map(|record| (record.output.text.clone(), record.output.used_fallback));
            let resolver = Resolver::new(bindings)
                .with_prior_output(prior.as_ref().map(|(text, _)| text.as_str()));
            let template_error = |source| PipelineError::Template {
                index,
                role: agent.role.clone(),
                source,
            };
            let description = resolver
                .resolve(&format!("{}.description", task.name), &task.description)
                .map_err(template_error)?;
            let expected_output = resolver
                .resolve(&format!("{}.expected_output", task.name), &task.expected_output)
                .map_err(template_error)?;

            let ctx = PromptContext {
                role: agent.role.clone(),
                goal: agent.goal.clone(),
                backstory: agent.backstory.clone(),
                task_description: description.clone(),
                expected_output,
                prior_result_text: prior.as_ref().map(|(text, _)| text.clone()),
                prior_used_fallback: prior.as_ref().is_some_and(|(_, fallback)| *fallback),
                available_tools: task.effective_tools(),
                allow_delegation: task.delegation_allowed(),
                roster: plan.roster.clone(),
                source_scope: task.source_scope.clone(),
                verbose: agent.verbose,
            };
            debug!(
                stage = index,
                role = %agent.role,
                tools = ctx.available_tools.len(),
                delegation = ctx.allow_delegation,
                "stage started"
            );

            let outcome = self
                .reasoner
                .reason(&ctx, 0, cancel)
                .await
                .and_then(|output| {
                    if !task.preserve_code_blocks {
                        return Ok(output);
                    }
                    let Some((prior_text, _)) = &prior else {
                        return Ok(output);
                    };
                    let missing = missing_blocks(prior_text, &output.text).len();
                    if missing > 0 {
                        return Err(ReasoningError::CodeBlocksAltered { missing });
                    }
                    Ok(output)
                });

            let output = match outcome {
                Ok(output) => output,
                Err(ReasoningError::Cancelled) => {
                    warn!(stage = index, role = %agent.role, "run cancelled");
                    return Err(PipelineError::Cancelled { index });
                }
                Err(cause) => {
                    let failed = state.fail(cause.to_string())?;
                    error!(%failed, role = %agent.role, error = %cause, "stage failed");
                    return Err(PipelineError::Failed {
                        index,
                        role: agent.role.clone(),
                        cause,
                    });
                }
            };

            if agent.verbose {
                info!(
                    stage = index,
                    role = %agent.role,
                    tool_calls = output.tool_invocations.len(),
                    delegations = output.delegations.len(),
                    used_fallback = output.used_fallback,
                    "stage completed"
                );
            } else {
                debug!(
                    stage = index,
                    role = %agent.role,
                    tool_calls = output.tool_invocations.len(),
                    used_fallback = output.used_fallback,
                    "stage completed"
                );
            }

            let record = StageRecord {
                index,
                task_name: task.name.clone(),
                role: agent.role.clone(),
                description,
                output,
            };
            on_stage(&record);
            context.push(record);
            state = state.complete_stage(total)?;
        }

        let output = context
            .latest()
            .map(|record| record.output.text.clone())
            .unwrap_or_default();
        let duration = started.elapsed();
        info!(%state, duration_ms = duration.as_millis() as u64, "run completed");
        Ok(RunReport {
            run_id,
            output,
            context,
            duration,
        })
    }

    /// Resolve agent templates and check task templates for every stage.
    fn prepare(&self, bindings: &InputBindings) -> Result<Plan, PipelineError> {
        let resolver = Resolver::new(bindings);
        let mut resolved: Vec<(Arc<Agent>, Arc<Agent>)> = Vec::new();
        let mut stage_agents = Vec::with_capacity(self.tasks.len());

        for (index, task) in self.tasks.iter().enumerate() {
            let source = &task.agent;
            let template_error = |source| PipelineError::Template {
                index,
                role: task.agent.role.clone(),
                source,
            };

            let agent = match resolved.iter().find(|(orig, _)| Arc::ptr_eq(orig, source)) {
                Some((_, agent)) => Arc::clone(agent),
                None => {
                    let mut agent = Agent::clone(source);
                    agent.role = resolver
                        .resolve(&format!("agent `{}`.role", source.role), &source.role)
                        .map_err(template_error)?;
                    agent.goal = resolver
                        .resolve(&format!("agent `{}`.goal", source.role), &source.goal)
                        .map_err(template_error)?;
                    agent.backstory = resolver
                        .resolve(&format!("agent `{}`.backstory", source.role), &source.backstory)
                        .map_err(template_error)?;
                    let agent = Arc::new(agent);
                    resolved.push((Arc::clone(source), Arc::clone(&agent)));
                    agent
                }
            };

            let prior_available = index > 0;
            resolver
                .check(
                    &format!("{}.description", task.name),
                    &task.description,
                    prior_available,
                )
                .map_err(template_error)?;
            resolver
                .check(
                    &format!("{}.expected_output", task.name),
                    &task.expected_output,
                    prior_available,
                )
                .map_err(template_error)?;
            stage_agents.push(agent);
        }

        Ok(Plan {
            stage_agents,
            roster: resolved.into_iter().map(|(_, agent)| agent).collect(),
        })
    }
}

/// `YYYYMMDD_HHMMSS_xxxxxx` with a random lowercase suffix.
pub fn new_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut rng = rand::thread_rng();
    let short_id = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("{timestamp}_{short_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::ReasoningOutput;
    use crate::test_support::{RecordingReasoner, acme_bindings};

    fn agent(role: &str) -> Arc<Agent> {
        Arc::new(Agent::new(role, "help {customer}", "works for {customer}"))
    }

    fn two_stage(reasoner: Arc<RecordingReasoner>) -> Pipeline {
        let support = agent("Support");
        let qa = agent("QA");
        Pipeline::new(
            vec![
                Task::new("resolve", "{person} asks: {inquiry}", "an answer", support),
                Task::new("review", "Review the draft for {customer}", "a reviewed answer", qa),
            ],
            reasoner,
        )
        .expect("pipeline")
    }

    #[test]
    fn empty_pipeline_is_rejected() {
        let reasoner = Arc::new(RecordingReasoner::echo());
        assert!(matches!(
            Pipeline::new(Vec::new(), reasoner),
            Err(PipelineError::Empty)
        ));
    }

    #[test]
    fn required_bindings_cover_agents_and_tasks() {
        let pipeline = two_stage(Arc::new(RecordingReasoner::echo()));
        let keys: Vec<String> = pipeline.required_bindings().into_iter().collect();
        assert_eq!(keys, vec!["customer", "inquiry", "person"]);
    }

    #[tokio::test]
    async fn stages_run_in_order_with_prior_context() {
        let reasoner = Arc::new(RecordingReasoner::new(|ctx, _| {
            Ok(ReasoningOutput::text(format!("{} output", ctx.role)))
        }));
        let pipeline = two_stage(reasoner.clone());

        let mut seen = Vec::new();
        let report = pipeline
            .execute_with(&acme_bindings(), &CancellationToken::new(), |record| {
                seen.push(record.index);
            })
            .await
            .expect("run");

        assert_eq!(seen, vec![0, 1]);
        assert_eq!(report.output, "QA output");
        assert_eq!(report.context.len(), 2);
        let contexts = reasoner.contexts();
        assert_eq!(contexts[0].prior_result_text, None);
        assert_eq!(contexts[1].prior_result_text.as_deref(), Some("Support output"));
        assert_eq!(contexts[0].backstory, "works for Acme");
        assert!(contexts[0].task_description.starts_with("Jo asks: How do I set"));
    }

    #[tokio::test]
    async fn missing_binding_fails_before_any_stage() {
        let reasoner = Arc::new(RecordingReasoner::echo());
        let pipeline = two_stage(reasoner.clone());
        let bindings = InputBindings::new().with("customer", "Acme").with("person", "Jo");

        let err = pipeline.run(&bindings).await.unwrap_err();

        match &err {
            PipelineError::Template { index, source, .. } => {
                assert_eq!(*index, 0);
                assert_eq!(source.key(), "inquiry");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(reasoner.contexts().is_empty());
    }

    #[tokio::test]
    async fn prior_output_placeholder_is_rejected_on_first_stage() {
        let pipeline = Pipeline::new(
            vec![Task::new("only", "Edit {prior_output}", "text", agent("Editor"))],
            Arc::new(RecordingReasoner::echo()),
        )
        .expect("pipeline");
        let err = pipeline.validate(&acme_bindings()).unwrap_err();
        assert!(err.to_string().contains("no earlier stage"));
    }

    #[tokio::test]
    async fn reasoning_failure_aborts_remaining_stages() {
        let reasoner = Arc::new(RecordingReasoner::new(|ctx, _| {
            if ctx.role == "Support" {
                Err(ReasoningError::EmptyAnswer)
            } else {
                Ok(ReasoningOutput::text("unreachable"))
            }
        }));
        let pipeline = two_stage(reasoner.clone());

        let err = pipeline.run(&acme_bindings()).await.unwrap_err();

        assert_eq!(err.stage_index(), Some(0));
        assert_eq!(
            err.to_string(),
            "stage 1 (Support) failed: model returned an empty answer"
        );
        assert_eq!(reasoner.contexts().len(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_at_the_next_boundary() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let reasoner = Arc::new(RecordingReasoner::new(move |_, _| {
            trigger.cancel();
            Ok(ReasoningOutput::text("first"))
        }));
        let pipeline = two_stage(reasoner.clone());

        let err = pipeline.execute(&acme_bindings(), &cancel).await.unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled { index: 1 }));
        assert_eq!(reasoner.contexts().len(), 1);
    }

    #[tokio::test]
    async fn shared_agents_appear_once_in_roster() {
        let shared = agent("Support");
        let reasoner = Arc::new(RecordingReasoner::echo());
        let pipeline = Pipeline::new(
            vec![
                Task::new("a", "first {inquiry}", "x", Arc::clone(&shared)),
                Task::new("b", "second", "x", shared),
                Task::new("c", "third", "x", agent("QA")),
            ],
            reasoner.clone(),
        )
        .expect("pipeline");

        pipeline.run(&acme_bindings()).await.expect("run");

        let roles: Vec<String> = reasoner.contexts()[0]
            .roster
            .iter()
            .map(|a| a.role.clone())
            .collect();
        assert_eq!(roles, vec!["Support", "QA"]);
    }

    #[test]
    fn run_id_has_timestamp_and_suffix() {
        let id = new_run_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[2].len(), 6);
    }
}
