//! Session data models.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use crate::probe::Endpoint;

/// Lifecycle phase of a session, as driven by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No compute group exists (or none has been observed yet).
    #[default]
    Absent,
    /// A create-or-update request has been submitted.
    Creating,
    /// An existing group accepted a start request and is being reused.
    StartingExisting,
    /// Waiting for the group to become ready.
    Polling,
    /// The session answered a readiness probe.
    Ready,
    /// An unrecoverable provider or storage error occurred.
    Failed,
    /// Readiness was not achieved within the spawn budget.
    TimedOut,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Absent => write!(f, "absent"),
            SessionPhase::Creating => write!(f, "creating"),
            SessionPhase::StartingExisting => write!(f, "starting_existing"),
            SessionPhase::Polling => write!(f, "polling"),
            SessionPhase::Ready => write!(f, "ready"),
            SessionPhase::Failed => write!(f, "failed"),
            SessionPhase::TimedOut => write!(f, "timed_out"),
        }
    }
}

impl std::str::FromStr for SessionPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "absent" => Ok(SessionPhase::Absent),
            "creating" => Ok(SessionPhase::Creating),
            "starting_existing" => Ok(SessionPhase::StartingExisting),
            "polling" => Ok(SessionPhase::Polling),
            "ready" => Ok(SessionPhase::Ready),
            "failed" => Ok(SessionPhase::Failed),
            "timed_out" => Ok(SessionPhase::TimedOut),
            _ => Err(format!("unknown session phase: {s}")),
        }
    }
}

impl SessionPhase {
    /// Whether this phase is a terminal error state.
    pub fn is_terminal_error(&self) -> bool {
        matches!(self, SessionPhase::Failed | SessionPhase::TimedOut)
    }
}

/// Command and environment supplied by the caller at start time.
///
/// Transient; never stored.
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    /// Command to run in the session container.
    pub command: Vec<String>,
    /// Environment variables for the session container.
    pub env: HashMap<String, String>,
}

impl LaunchSpec {
    /// Create a launch spec with the given command.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            env: HashMap::new(),
        }
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add multiple environment variables.
    pub fn envs(mut self, envs: HashMap<String, String>) -> Self {
        self.env.extend(envs);
        self
    }
}

/// Serializable controller state, for hub-side persistence across restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionState {
    /// Current lifecycle phase.
    pub phase: SessionPhase,
    /// Endpoint from the last successful start, if any.
    pub endpoint: Option<Endpoint>,
    /// API token recovered from a reused group's container environment.
    pub api_token: Option<String>,
}
