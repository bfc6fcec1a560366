//! Re-derives the loop state purely from which signals are visible.
//!
//! The classifier knows nothing about why it was invoked: it maps each hit to
//! its owning state and resolves conflicts with a priority list that runs from
//! the most advanced activity state to the least specific menu state.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use crate::core::signal::Signal;
use crate::core::state::FarmState;

/// Signals scanned during recovery, in scan order, with the state each one
/// implies. Lingering popups send the loop back to the menu.
pub const RECOVERY_CATALOG: &[(Signal, FarmState, &str)] = &[
    (Signal::GameStart, FarmState::GameStartup, "game startup, start button visible"),
    (Signal::CloseNews, FarmState::GameStartup, "game startup, news popup visible"),
    (Signal::Coop1, FarmState::GameStartup, "game startup, first co-op navigation visible"),
    (Signal::Coop2, FarmState::GameStartup, "game startup, second co-op navigation visible"),
    (Signal::CoopQuest, FarmState::Menu, "main menu, co-op quest button visible"),
    (Signal::OpenCoopQuest, FarmState::Menu, "quest selection, specific quest visible"),
    (Signal::EnterRoom, FarmState::EnterRoomList, "join screen, room list not entered"),
    (Signal::AutoMarker, FarmState::ScanRooms, "room list, auto markers visible"),
    (Signal::SearchAgain, FarmState::ScanRooms, "room list, search again visible"),
    (Signal::ReadyButton, FarmState::Ready, "room lobby, ready button visible"),
    (Signal::IngameAutoOff, FarmState::CheckRunStart, "run starting, auto toggle off"),
    (Signal::IngameAutoOn, FarmState::Running, "run in progress, auto toggle on"),
    (Signal::Tap1, FarmState::Finish, "run complete, first acknowledgement"),
    (Signal::Tap2, FarmState::Finish, "run complete, second acknowledgement"),
    (Signal::Retry, FarmState::Finish, "run complete, retry button"),
    (Signal::Close, FarmState::Menu, "error popup, restarting from menu"),
    (Signal::Retire, FarmState::Menu, "stuck in lobby, restarting from menu"),
    (Signal::Okay, FarmState::Menu, "confirmation dialog, restarting from menu"),
];

/// Hand-tuned default resolution order, most trusted first.
pub const DEFAULT_PRIORITY: [FarmState; 8] = [
    FarmState::Running,
    FarmState::CheckRunStart,
    FarmState::Finish,
    FarmState::Ready,
    FarmState::ScanRooms,
    FarmState::EnterRoomList,
    FarmState::Menu,
    FarmState::GameStartup,
];

/// State implied by a visible signal, if the signal takes part in recovery.
pub fn owning_state(signal: Signal) -> Option<FarmState> {
    RECOVERY_CATALOG
        .iter()
        .find(|(candidate, _, _)| *candidate == signal)
        .map(|(_, state, _)| *state)
}

/// Popups that keep the menu from responding until they are clicked away.
pub fn is_blocking_popup(signal: Signal) -> bool {
    matches!(signal, Signal::Close | Signal::Retire | Signal::Okay)
}

pub fn describe(signal: Signal) -> &'static str {
    RECOVERY_CATALOG
        .iter()
        .find(|(candidate, _, _)| *candidate == signal)
        .map_or("not a recovery signal", |(_, _, description)| *description)
}

/// Result of classifying the visible signal set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// A single state was identified. `ambiguous` is set when several states
    /// were hit and the priority order decided.
    Resolved {
        state: FarmState,
        signal: Signal,
        ambiguous: bool,
    },
    /// Nothing recognisable on screen; the host application must be restarted.
    RestartRequired,
}

impl RecoveryOutcome {
    pub fn next_state(self) -> FarmState {
        match self {
            RecoveryOutcome::Resolved { state, .. } => state,
            RecoveryOutcome::RestartRequired => FarmState::RestartGame,
        }
    }
}

/// Rejected priority configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PriorityError {
    #[error("recovery priority lists {0} more than once")]
    Duplicate(FarmState),
    #[error("recovery priority is missing {0}")]
    Missing(FarmState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryClassifier {
    priority: Vec<FarmState>,
}

impl Default for RecoveryClassifier {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY.to_vec(),
        }
    }
}

impl RecoveryClassifier {
    /// Build a classifier from a priority list.
    ///
    /// The list must name every state the catalog can produce exactly once,
    /// which makes resolution a total order.
    pub fn new(priority: Vec<FarmState>) -> Result<Self, PriorityError> {
        let mut seen = HashSet::new();
        for state in &priority {
            if !seen.insert(*state) {
                return Err(PriorityError::Duplicate(*state));
            }
        }
        for (_, state, _) in RECOVERY_CATALOG {
            if !seen.contains(state) {
                return Err(PriorityError::Missing(*state));
            }
        }
        Ok(Self { priority })
    }

    /// Resolve the visible signals into a next state.
    ///
    /// Signals outside the recovery catalog are ignored. Among the hits, the
    /// first signal (in input order) owned by the highest-priority state is
    /// reported.
    pub fn classify(&self, visible: &[Signal]) -> RecoveryOutcome {
        let hits: Vec<(Signal, FarmState)> = visible
            .iter()
            .filter_map(|signal| owning_state(*signal).map(|state| (*signal, state)))
            .collect();

        let Some(&(first_signal, first_state)) = hits.first() else {
            return RecoveryOutcome::RestartRequired;
        };
        let ambiguous = hits.iter().any(|(_, state)| *state != first_state);
        if !ambiguous {
            return RecoveryOutcome::Resolved {
                state: first_state,
                signal: first_signal,
                ambiguous: false,
            };
        }

        self.priority
            .iter()
            .find_map(|wanted| hits.iter().find(|(_, state)| state == wanted))
            .map_or(RecoveryOutcome::RestartRequired, |&(signal, state)| {
                RecoveryOutcome::Resolved {
                    state,
                    signal,
                    ambiguous: true,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_hits_require_restart() {
        let classifier = RecoveryClassifier::default();
        assert_eq!(classifier.classify(&[]), RecoveryOutcome::RestartRequired);
        assert_eq!(
            classifier.classify(&[Signal::RoomRules]),
            RecoveryOutcome::RestartRequired
        );
        assert_eq!(
            RecoveryOutcome::RestartRequired.next_state(),
            FarmState::RestartGame
        );
    }

    #[test]
    fn single_hit_maps_directly() {
        let classifier = RecoveryClassifier::default();
        assert_eq!(
            classifier.classify(&[Signal::ReadyButton]),
            RecoveryOutcome::Resolved {
                state: FarmState::Ready,
                signal: Signal::ReadyButton,
                ambiguous: false,
            }
        );
    }

    #[test]
    fn several_hits_of_one_state_are_not_ambiguous() {
        let classifier = RecoveryClassifier::default();
        let outcome = classifier.classify(&[Signal::Tap2, Signal::Retry]);
        assert_eq!(
            outcome,
            RecoveryOutcome::Resolved {
                state: FarmState::Finish,
                signal: Signal::Tap2,
                ambiguous: false,
            }
        );
    }

    #[test]
    fn running_beats_finish() {
        let classifier = RecoveryClassifier::default();
        let outcome = classifier.classify(&[Signal::Tap1, Signal::IngameAutoOn]);
        assert_eq!(outcome.next_state(), FarmState::Running);
        assert!(matches!(
            outcome,
            RecoveryOutcome::Resolved {
                ambiguous: true,
                ..
            }
        ));
    }

    #[test]
    fn lingering_popup_loses_to_lobby() {
        let classifier = RecoveryClassifier::default();
        let outcome = classifier.classify(&[Signal::Close, Signal::ReadyButton]);
        assert_eq!(outcome.next_state(), FarmState::Ready);
    }

    #[test]
    fn startup_signals_rank_last() {
        let classifier = RecoveryClassifier::default();
        let outcome = classifier.classify(&[Signal::GameStart, Signal::CoopQuest]);
        assert_eq!(outcome.next_state(), FarmState::Menu);
    }

    #[test]
    fn classification_is_order_independent_across_states() {
        let classifier = RecoveryClassifier::default();
        let signals: Vec<Signal> = RECOVERY_CATALOG.iter().map(|(s, _, _)| *s).collect();
        let forward = classifier.classify(&signals).next_state();
        let mut reversed = signals.clone();
        reversed.reverse();
        assert_eq!(forward, FarmState::Running);
        assert_eq!(classifier.classify(&reversed).next_state(), forward);
    }

    #[test]
    fn custom_priority_changes_resolution() {
        let mut priority = DEFAULT_PRIORITY.to_vec();
        priority.swap(0, 2);
        let classifier = RecoveryClassifier::new(priority).expect("valid priority");
        let outcome = classifier.classify(&[Signal::Tap1, Signal::IngameAutoOn]);
        assert_eq!(outcome.next_state(), FarmState::Finish);
    }

    #[test]
    fn priority_must_be_total_over_catalog_states() {
        let missing = vec![FarmState::Running, FarmState::Menu];
        assert!(matches!(
            RecoveryClassifier::new(missing),
            Err(PriorityError::Missing(_))
        ));

        let mut duplicated = DEFAULT_PRIORITY.to_vec();
        duplicated.push(FarmState::Menu);
        let err = RecoveryClassifier::new(duplicated).expect_err("duplicate");
        assert_eq!(err, PriorityError::Duplicate(FarmState::Menu));
        assert_eq!(err.to_string(), "recovery priority lists MENU more than once");
    }

    #[test]
    fn only_popups_that_lead_to_the_menu_block_it() {
        for (signal, state, _) in RECOVERY_CATALOG {
            if is_blocking_popup(*signal) {
                assert_eq!(*state, FarmState::Menu, "{signal}");
            }
        }
        assert!(is_blocking_popup(Signal::Close));
        assert!(!is_blocking_popup(Signal::CoopQuest));
    }

    #[test]
    fn every_catalog_state_is_prioritised() {
        for (signal, state, _) in RECOVERY_CATALOG {
            assert!(DEFAULT_PRIORITY.contains(state), "{signal} maps to {state}");
        }
    }
}
