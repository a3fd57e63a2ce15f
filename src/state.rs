// ABOUTME: Runtime state machine for the deployment lifecycle.
// ABOUTME: Transitions are checked against a precomputed successor table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle states of a single deployment run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Initialized,
    ValidatingParameters,
    Linting,
    Planning,
    AwaitingConfirmation,
    Deploying,
    VerifyingHealth,
    Completed,
    Failed,
    RolledBack,
}

impl DeploymentState {
    /// Stable name used as the metadata map key and in audit details.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::ValidatingParameters => "validating_parameters",
            Self::Linting => "linting",
            Self::Planning => "planning",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Deploying => "deploying",
            Self::VerifyingHealth => "verifying_health",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }

    /// States this state may legally transition to.
    ///
    /// `Failed` is reachable from every non-terminal state; `Deploying` may
    /// go straight to `Completed` when health verification is skipped.
    pub fn allowed_successors(&self) -> &'static [DeploymentState] {
        use DeploymentState::*;
        match self {
            Initialized => &[ValidatingParameters, Failed],
            ValidatingParameters => &[Linting, Failed],
            Linting => &[Planning, Failed],
            Planning => &[AwaitingConfirmation, Deploying, Failed],
            AwaitingConfirmation => &[Deploying, Failed],
            Deploying => &[VerifyingHealth, Completed, Failed],
            VerifyingHealth => &[Completed, Failed],
            Failed => &[RolledBack],
            Completed | RolledBack => &[],
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub state: DeploymentState,
    pub at: DateTime<Utc>,
}

/// A transition request that was not in the allowed-successor set.
///
/// The machine is left untouched when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {from} -> {to}")]
pub struct TransitionRejected {
    pub from: DeploymentState,
    pub to: DeploymentState,
}

/// Tracks the current lifecycle state, the ordered transition history, and
/// per-state metadata attached at transition time.
#[derive(Debug)]
pub struct DeploymentStateMachine {
    current: DeploymentState,
    history: Vec<StateEntry>,
    metadata: HashMap<&'static str, serde_json::Map<String, serde_json::Value>>,
}

impl DeploymentStateMachine {
    /// Create a machine in `Initialized` with one history entry.
    pub fn new() -> Self {
        Self {
            current: DeploymentState::Initialized,
            history: vec![StateEntry {
                state: DeploymentState::Initialized,
                at: Utc::now(),
            }],
            metadata: HashMap::new(),
        }
    }

    pub fn current(&self) -> DeploymentState {
        self.current
    }

    pub fn history(&self) -> &[StateEntry] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Metadata recorded for a state, if any transition attached some.
    pub fn metadata_for(
        &self,
        state: DeploymentState,
    ) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.metadata.get(state.as_str())
    }

    /// Apply a transition if `target` is an allowed successor of the
    /// current state.
    ///
    /// On success the history gains a `(target, now)` entry and `metadata`
    /// is merged under the target state's name. On rejection nothing
    /// changes and the caller gets the offending state pair back.
    ///
    /// # Errors
    ///
    /// Returns `TransitionRejected` when `target` is not a legal successor.
    pub fn transition_to(
        &mut self,
        target: DeploymentState,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<(), TransitionRejected> {
        if !self.current.allowed_successors().contains(&target) {
            return Err(TransitionRejected {
                from: self.current,
                to: target,
            });
        }

        self.current = target;
        self.history.push(StateEntry {
            state: target,
            at: Utc::now(),
        });

        if let Some(extra) = metadata {
            let entry = self.metadata.entry(target.as_str()).or_default();
            for (k, v) in extra {
                entry.insert(k, v);
            }
        }

        Ok(())
    }

    /// Wall-clock time between the first and last history entries.
    ///
    /// Zero if fewer than two entries exist.
    pub fn duration(&self) -> chrono::Duration {
        match (self.history.first(), self.history.last()) {
            (Some(first), Some(last)) if self.history.len() >= 2 => last.at - first.at,
            _ => chrono::Duration::zero(),
        }
    }
}

impl Default for DeploymentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
