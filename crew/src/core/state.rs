//! Pipeline run state machine.
//!
//! `Pending -> Running(0) -> ... -> Running(n-1) -> Completed`, with any
//! running stage able to move to `Failed`. Terminal states never change.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running { index: usize },
    Completed,
    Failed { index: usize, cause: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid run state transition: {action} from {from}")]
pub struct StateError {
    pub from: String,
    pub action: &'static str,
}

impl RunState {
    /// Enter the first stage.
    pub fn begin(&self) -> Result<RunState, StateError> {
        match self {
            RunState::Pending => Ok(RunState::Running { index: 0 }),
            _ => Err(self.invalid("begin")),
        }
    }

    /// Finish the running stage; advances or completes when it was the last of `total`.
    pub fn complete_stage(&self, total: usize) -> Result<RunState, StateError> {
        match self {
            RunState::Running { index } if index + 1 < total => {
                Ok(RunState::Running { index: index + 1 })
            }
            RunState::Running { index } if index + 1 == total => Ok(RunState::Completed),
            _ => Err(self.invalid("complete_stage")),
        }
    }

    pub fn fail(&self, cause: impl Into<String>) -> Result<RunState, StateError> {
        match self {
            RunState::Running { index } => Ok(RunState::Failed {
                index: *index,
                cause: cause.into(),
            }),
            _ => Err(self.invalid("fail")),
        }
    }

    pub fn running_index(&self) -> Option<usize> {
        match self {
            RunState::Running { index } => Some(*index),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed { .. })
    }

    fn invalid(&self, action: &'static str) -> StateError {
        StateError {
            from: self.to_string(),
            action,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Running { index } => write!(f, "running({index})"),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed { index, .. } => write!(f, "failed({index})"),
        }
    }
}
