//! Process-wide session record owned by the farming state machine.

use serde::Serialize;

use crate::core::errors::FarmError;
use crate::core::geometry::Region;
use crate::core::state::FarmState;

/// Opaque identifier of the host application's top-level window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WindowHandle(pub u64);

/// The host window and the on-screen area all matching is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GameWindow {
    pub handle: WindowHandle,
    pub region: Region,
}

/// Mutable loop bookkeeping.
///
/// `run_count` only grows on a completed cycle. `restart_attempts` grows on
/// every forced restart and drops back to zero on a completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub current: FarmState,
    pub(crate) run_count: u32,
    pub(crate) restart_attempts: u32,
    pub(crate) window: Option<GameWindow>,
}

impl SessionState {
    pub fn new(initial: FarmState, window: Option<GameWindow>) -> Self {
        Self {
            current: initial,
            run_count: 0,
            restart_attempts: 0,
            window,
        }
    }

    pub fn run_count(&self) -> u32 {
        self.run_count
    }

    /// 1-based number of the run in progress, as shown in logs.
    pub fn run_number(&self) -> u32 {
        self.run_count + 1
    }

    pub fn restart_attempts(&self) -> u32 {
        self.restart_attempts
    }

    pub fn window(&self) -> Option<GameWindow> {
        self.window
    }

    pub fn capture_region(&self) -> Option<Region> {
        self.window.map(|window| window.region)
    }

    /// Window to act on, or an environment failure if none is bound yet.
    pub fn require_window(&self) -> Result<GameWindow, FarmError> {
        self.window
            .ok_or_else(|| FarmError::environment("no game window bound"))
    }

    pub fn rebind_window(&mut self, window: GameWindow) {
        self.window = Some(window);
    }

    /// Record a fully completed activity cycle.
    pub fn complete_run(&mut self) {
        self.run_count += 1;
        self.restart_attempts = 0;
    }

    /// Count a forced restart, refusing once the budget is exceeded.
    pub fn begin_restart(&mut self, max_restarts: u32) -> Result<u32, FarmError> {
        self.restart_attempts += 1;
        if self.restart_attempts > max_restarts {
            return Err(FarmError::RestartBudgetExceeded {
                attempts: self.restart_attempts,
                max: max_restarts,
            });
        }
        Ok(self.restart_attempts)
    }
}
