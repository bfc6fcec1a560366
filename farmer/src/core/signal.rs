//! Semantic keys for every template the farmer knows how to look for.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A catalog template whose presence on screen means something to the farmer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Signal {
    GameStart,
    CloseNews,
    #[serde(rename = "coop-1")]
    Coop1,
    #[serde(rename = "coop-2")]
    Coop2,
    CoopQuest,
    OpenCoopQuest,
    EnterRoom,
    SearchAgain,
    /// Recurring marker: one per joinable room in the browser.
    AutoMarker,
    /// Companion that certifies the room above it is eligible.
    RoomRules,
    IngameAutoOff,
    IngameAutoOn,
    Close,
    ReadyButton,
    Retire,
    Okay,
    RoomClosed,
    Tap1,
    Tap2,
    Retry,
}

/// Match-confidence tier a signal is searched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
    High,
    Normal,
    Loose,
}

impl Signal {
    pub const ALL: [Signal; 20] = [
        Signal::GameStart,
        Signal::CloseNews,
        Signal::Coop1,
        Signal::Coop2,
        Signal::CoopQuest,
        Signal::OpenCoopQuest,
        Signal::EnterRoom,
        Signal::SearchAgain,
        Signal::AutoMarker,
        Signal::RoomRules,
        Signal::IngameAutoOff,
        Signal::IngameAutoOn,
        Signal::Close,
        Signal::ReadyButton,
        Signal::Retire,
        Signal::Okay,
        Signal::RoomClosed,
        Signal::Tap1,
        Signal::Tap2,
        Signal::Retry,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Signal::GameStart => "game-start",
            Signal::CloseNews => "close-news",
            Signal::Coop1 => "coop-1",
            Signal::Coop2 => "coop-2",
            Signal::CoopQuest => "coop-quest",
            Signal::OpenCoopQuest => "open-coop-quest",
            Signal::EnterRoom => "enter-room",
            Signal::SearchAgain => "search-again",
            Signal::AutoMarker => "auto-marker",
            Signal::RoomRules => "room-rules",
            Signal::IngameAutoOff => "ingame-auto-off",
            Signal::IngameAutoOn => "ingame-auto-on",
            Signal::Close => "close",
            Signal::ReadyButton => "ready-button",
            Signal::Retire => "retire",
            Signal::Okay => "okay",
            Signal::RoomClosed => "room-closed",
            Signal::Tap1 => "tap1",
            Signal::Tap2 => "tap2",
            Signal::Retry => "retry",
        }
    }

    /// Template file name under the templates directory unless overridden.
    pub fn default_file(self) -> &'static str {
        match self {
            Signal::GameStart => "game_start.png",
            Signal::CloseNews => "close_news.png",
            Signal::Coop1 => "coop-1.png",
            Signal::Coop2 => "coop-2.png",
            Signal::CoopQuest => "coop_quest.png",
            Signal::OpenCoopQuest => "open_coop_quest.png",
            Signal::EnterRoom => "join_coop_quest.png",
            Signal::SearchAgain => "search_again.png",
            Signal::AutoMarker => "auto_icon.png",
            Signal::RoomRules => "room_rules_valid.png",
            Signal::IngameAutoOff => "ingame_auto_off.png",
            Signal::IngameAutoOn => "ingame_auto_on.png",
            Signal::Close => "close.png",
            Signal::ReadyButton => "ready_button.png",
            Signal::Retire => "retire.png",
            Signal::Okay => "okay.png",
            Signal::RoomClosed => "closed_room_coop_quest_menu.png",
            Signal::Tap1 => "tap1.png",
            Signal::Tap2 => "tap2.png",
            Signal::Retry => "retry.png",
        }
    }

    pub fn tier(self) -> ConfidenceTier {
        match self {
            Signal::RoomRules | Signal::IngameAutoOff => ConfidenceTier::Loose,
            Signal::IngameAutoOn => ConfidenceTier::High,
            _ => ConfidenceTier::Normal,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Signal::ALL
            .into_iter()
            .find(|signal| signal.key() == s)
            .ok_or_else(|| format!("unknown signal '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_round_trip_through_from_str() {
        for signal in Signal::ALL {
            assert_eq!(signal.key().parse::<Signal>(), Ok(signal));
        }
        assert!("ready".parse::<Signal>().is_err());
    }

    #[test]
    fn serde_names_match_keys() {
        for signal in Signal::ALL {
            let json = serde_json::to_string(&signal).expect("serialize");
            assert_eq!(json, format!("\"{}\"", signal.key()));
        }
    }

    #[test]
    fn default_files_are_unique() {
        let files: HashSet<_> = Signal::ALL.iter().map(|s| s.default_file()).collect();
        assert_eq!(files.len(), Signal::ALL.len());
    }
}
