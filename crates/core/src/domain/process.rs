// Process State Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Lifecycle state of one supervised office process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Restarting,
    Failed,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "STOPPED"),
            ProcessState::Starting => write!(f, "STARTING"),
            ProcessState::Running => write!(f, "RUNNING"),
            ProcessState::Restarting => write!(f, "RESTARTING"),
            ProcessState::Failed => write!(f, "FAILED"),
        }
    }
}

impl ProcessState {
    /// Whether the state machine allows moving from `self` to `to`
    pub fn can_transition_to(self, to: ProcessState) -> bool {
        use ProcessState::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Starting, Stopped)
                | (Running, Restarting)
                | (Running, Stopped)
                | (Restarting, Running)
                | (Restarting, Failed)
                | (Restarting, Stopped)
                | (Failed, Starting)
                | (Failed, Restarting)
                | (Failed, Stopped)
        )
    }

    /// Validate a transition, returning the target state
    pub fn transition(self, to: ProcessState) -> Result<ProcessState> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(DomainError::InvalidStateTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// A process in this state may be handed a task
    pub fn accepts_tasks(self) -> bool {
        self == ProcessState::Running
    }
}
