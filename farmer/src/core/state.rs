//! Farming state enumeration and the completion-sequence resume logic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::signal::Signal;

/// States of the farming loop. There is no terminal state: fatal exits leave
/// the loop through an error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FarmState {
    GameStartup,
    Menu,
    EnterRoomList,
    ScanRooms,
    Ready,
    CheckRunStart,
    Running,
    Finish,
    RestartGame,
}

impl FarmState {
    pub const ALL: [FarmState; 9] = [
        FarmState::GameStartup,
        FarmState::Menu,
        FarmState::EnterRoomList,
        FarmState::ScanRooms,
        FarmState::Ready,
        FarmState::CheckRunStart,
        FarmState::Running,
        FarmState::Finish,
        FarmState::RestartGame,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FarmState::GameStartup => "GAME_STARTUP",
            FarmState::Menu => "MENU",
            FarmState::EnterRoomList => "ENTER_ROOM_LIST",
            FarmState::ScanRooms => "SCAN_ROOMS",
            FarmState::Ready => "READY",
            FarmState::CheckRunStart => "CHECK_RUN_START",
            FarmState::Running => "RUNNING",
            FarmState::Finish => "FINISH",
            FarmState::RestartGame => "RESTART_GAME",
        }
    }
}

impl fmt::Display for FarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FarmState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FarmState::ALL
            .into_iter()
            .find(|state| state.name() == s)
            .ok_or_else(|| format!("unknown state '{s}'"))
    }
}

/// Where the post-run acknowledgement sequence resumes.
///
/// The sequence is tap1 → tap2 → retry. A crash or restart can land the
/// screen anywhere inside it, so FINISH starts from the most advanced
/// acknowledgement that is currently visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishStage {
    Tap1,
    Tap2,
    Retry,
}

impl FinishStage {
    /// Pick the most advanced visible stage, or `None` if nothing is visible.
    pub fn detect(tap1: bool, tap2: bool, retry: bool) -> Option<FinishStage> {
        if retry {
            Some(FinishStage::Retry)
        } else if tap2 {
            Some(FinishStage::Tap2)
        } else if tap1 {
            Some(FinishStage::Tap1)
        } else {
            None
        }
    }

    /// Acknowledgements still to perform, in order.
    pub fn remaining(self) -> &'static [FinishStage] {
        match self {
            FinishStage::Tap1 => &[FinishStage::Tap1, FinishStage::Tap2, FinishStage::Retry],
            FinishStage::Tap2 => &[FinishStage::Tap2, FinishStage::Retry],
            FinishStage::Retry => &[FinishStage::Retry],
        }
    }

    pub fn signal(self) -> Signal {
        match self {
            FinishStage::Tap1 => Signal::Tap1,
            FinishStage::Tap2 => Signal::Tap2,
            FinishStage::Retry => Signal::Retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back() {
        for state in FarmState::ALL {
            assert_eq!(state.name().parse::<FarmState>(), Ok(state));
        }
    }

    #[test]
    fn detect_prefers_most_advanced_stage() {
        assert_eq!(
            FinishStage::detect(true, true, true),
            Some(FinishStage::Retry)
        );
        assert_eq!(
            FinishStage::detect(true, true, false),
            Some(FinishStage::Tap2)
        );
        assert_eq!(
            FinishStage::detect(true, false, false),
            Some(FinishStage::Tap1)
        );
        assert_eq!(FinishStage::detect(false, false, false), None);
    }

    #[test]
    fn resume_from_retry_only_acknowledges_retry() {
        let signals = |stage: FinishStage| -> Vec<Signal> {
            stage.remaining().iter().map(|s| s.signal()).collect()
        };
        assert_eq!(signals(FinishStage::Retry), vec![Signal::Retry]);
        assert_eq!(signals(FinishStage::Tap2), vec![Signal::Tap2, Signal::Retry]);
        assert_eq!(
            signals(FinishStage::Tap1),
            vec![Signal::Tap1, Signal::Tap2, Signal::Retry]
        );
    }
}
