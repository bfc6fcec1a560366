//! Failure taxonomy for the farming loop.
//!
//! Recoverable variants are routed to the recovery classifier by the state
//! machine; the rest end the process after one diagnostic capture.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FarmError {
    /// An expected signal did not appear within the state's budget.
    #[error("signal timeout ({tag})")]
    SignalTimeout { tag: &'static str },

    /// An action's success condition never materialised.
    #[error("action not confirmed ({tag})")]
    ActionNotConfirmed { tag: &'static str },

    /// The host window or process cannot be found or controlled.
    #[error("environment failure: {0}")]
    Environment(String),

    #[error("maximum restart attempts reached ({attempts} > {max})")]
    RestartBudgetExceeded { attempts: u32, max: u32 },
}

impl FarmError {
    pub fn timeout(tag: &'static str) -> Self {
        FarmError::SignalTimeout { tag }
    }

    pub fn environment(err: impl std::fmt::Display) -> Self {
        FarmError::Environment(err.to_string())
    }

    /// Whether the state machine should try recovery instead of exiting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FarmError::SignalTimeout { .. } | FarmError::ActionNotConfirmed { .. }
        )
    }

    /// Short tag used to name diagnostic captures.
    pub fn tag(&self) -> &str {
        match self {
            FarmError::SignalTimeout { tag } | FarmError::ActionNotConfirmed { tag } => tag,
            FarmError::Environment(_) => "environment_failure",
            FarmError::RestartBudgetExceeded { .. } => "max_restarts_reached",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_and_unconfirmed_actions_are_recoverable() {
        assert!(FarmError::timeout("timeout_ready").is_recoverable());
        assert!(FarmError::ActionNotConfirmed { tag: "join" }.is_recoverable());
        assert!(!FarmError::environment("window gone").is_recoverable());
        assert!(!FarmError::RestartBudgetExceeded { attempts: 4, max: 3 }.is_recoverable());
    }

    #[test]
    fn fatal_errors_have_stable_tags() {
        assert_eq!(
            FarmError::RestartBudgetExceeded { attempts: 4, max: 3 }.tag(),
            "max_restarts_reached"
        );
        assert_eq!(FarmError::timeout("quest_timeout").tag(), "quest_timeout");
    }
}
