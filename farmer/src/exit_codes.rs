//! Stable exit codes for farmer CLI commands.

use crate::core::errors::FarmError;

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid CLI usage, config, or template catalog.
pub const INVALID: i32 = 1;
/// The game window or process could not be found or controlled.
pub const ENVIRONMENT: i32 = 2;
/// `farmer run` gave up after too many consecutive game restarts.
pub const RESTARTS_EXHAUSTED: i32 = 3;

/// Exit code for an error that ended the farming loop.
pub fn for_fatal(err: &FarmError) -> i32 {
    match err {
        FarmError::RestartBudgetExceeded { .. } => RESTARTS_EXHAUSTED,
        _ => ENVIRONMENT,
    }
}
