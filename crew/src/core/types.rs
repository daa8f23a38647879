//! Shared data model for pipeline definitions and runs.
//!
//! Agents and tasks are immutable once a pipeline is constructed. The only
//! mutable state of a run is the append-only [`ExecutionContext`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::core::scope::SourceScope;
use crate::reasoning::ReasoningOutput;
use crate::tools::ToolCapability;

/// Variable bindings supplied once at run start (e.g. `customer`, `inquiry`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct InputBindings(BTreeMap<String, String>);

impl InputBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for InputBindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A configured reasoning role.
///
/// `role`, `goal` and `backstory` may contain `{var}` placeholders; they are
/// resolved against the run's bindings before the first stage starts.
#[derive(Clone)]
pub struct Agent {
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub allowed_tools: Vec<Arc<dyn ToolCapability>>,
    pub can_delegate: bool,
    /// Whether tools that declare side effects may be offered to this agent.
    pub can_execute_side_effects: bool,
    pub verbose: bool,
}

impl Agent {
    pub fn new(
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            allowed_tools: Vec::new(),
            can_delegate: false,
            can_execute_side_effects: false,
            verbose: false,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn ToolCapability>>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn with_delegation(mut self, can_delegate: bool) -> Self {
        self.can_delegate = can_delegate;
        self
    }

    pub fn with_side_effects(mut self, allowed: bool) -> Self {
        self.can_execute_side_effects = allowed;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Drop tools this agent is not permitted to run, and duplicate names.
    pub fn permitted_tools(
        &self,
        tools: &[Arc<dyn ToolCapability>],
    ) -> Vec<Arc<dyn ToolCapability>> {
        let mut permitted: Vec<Arc<dyn ToolCapability>> = Vec::with_capacity(tools.len());
        for tool in tools {
            if tool.has_side_effects() && !self.can_execute_side_effects {
                continue;
            }
            if permitted.iter().any(|t| t.name() == tool.name()) {
                continue;
            }
            permitted.push(Arc::clone(tool));
        }
        permitted
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("role", &self.role)
            .field("goal", &self.goal)
            .field("tools", &tool_names(&self.allowed_tools))
            .field("can_delegate", &self.can_delegate)
            .field("can_execute_side_effects", &self.can_execute_side_effects)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

/// One pipeline stage's work contract, bound to an agent.
#[derive(Clone)]
pub struct Task {
    /// Short identifier used in logs, errors and transcripts.
    pub name: String,
    pub description: String,
    pub expected_output: String,
    pub agent: Arc<Agent>,
    /// Replaces the agent's tools for this task when set.
    pub tools: Option<Vec<Arc<dyn ToolCapability>>>,
    /// Overrides the agent's delegation flag for this task when set.
    pub allow_delegation: Option<bool>,
    /// Tool results from outside this scope are discarded.
    pub source_scope: Option<SourceScope>,
    /// Every fenced code block of the prior result must survive this stage unchanged.
    pub preserve_code_blocks: bool,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
        agent: Arc<Agent>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            expected_output: expected_output.into(),
            agent,
            tools: None,
            allow_delegation: None,
            source_scope: None,
            preserve_code_blocks: false,
        }
    }

    pub fn with_tools(mut self, tools: Vec<Arc<dyn ToolCapability>>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_delegation(mut self, allow: bool) -> Self {
        self.allow_delegation = Some(allow);
        self
    }

    pub fn with_source_scope(mut self, scope: SourceScope) -> Self {
        self.source_scope = Some(scope);
        self
    }

    pub fn with_preserved_code_blocks(mut self) -> Self {
        self.preserve_code_blocks = true;
        self
    }

    /// Tools offered to the agent for this task, after side-effect gating.
    pub fn effective_tools(&self) -> Vec<Arc<dyn ToolCapability>> {
        let source = self
            .tools
            .as_deref()
            .unwrap_or(self.agent.allowed_tools.as_slice());
        self.agent.permitted_tools(source)
    }

    pub fn delegation_allowed(&self) -> bool {
        self.allow_delegation.unwrap_or(self.agent.can_delegate)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("agent", &self.agent.role)
            .field("tools", &self.tools.as_deref().map(tool_names))
            .field("allow_delegation", &self.allow_delegation)
            .field("source_scope", &self.source_scope)
            .field("preserve_code_blocks", &self.preserve_code_blocks)
            .finish_non_exhaustive()
    }
}

fn tool_names(tools: &[Arc<dyn ToolCapability>]) -> Vec<&str> {
    tools.iter().map(|t| t.name()).collect()
}

/// A completed stage within one run.
#[derive(Debug, Clone)]
pub struct StageRecord {
    pub index: usize,
    pub task_name: String,
    pub role: String,
    /// Description after template resolution.
    pub description: String,
    pub output: ReasoningOutput,
}

/// Append-only record of completed stages for a single run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    records: Vec<StageRecord>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: StageRecord) {
        self.records.push(record);
    }

    pub fn latest(&self) -> Option<&StageRecord> {
        self.records.last()
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
