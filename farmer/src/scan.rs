//! One-shot screen classification for `farmer scan`.

use std::fmt::Write as _;

use anyhow::{Result, anyhow};

use crate::core::recovery::{RecoveryOutcome, describe};
use crate::io::config::FarmerConfig;
use crate::recover::{ScreenReport, scan_screen};
use crate::verify::Host;

/// Scan the game window for every recovery signal. Nothing is clicked.
pub fn scan_once(host: Host<'_>, config: &FarmerConfig) -> Result<ScreenReport> {
    let window = host
        .desktop
        .find_window()?
        .ok_or_else(|| anyhow!("game window '{}' not found", config.window.title))?;
    let classifier = config.classifier()?;
    Ok(scan_screen(
        host.matcher,
        &classifier,
        window.region,
        config.matching.normal,
    ))
}

/// Human-readable report, one line per visible signal.
pub fn render_text(report: &ScreenReport) -> String {
    let mut out = String::new();
    for detection in &report.visible {
        let center = detection.center();
        let _ = writeln!(
            out,
            "{:<16} ({:>4},{:>4}) {:.2}  {}",
            detection.signal.key(),
            center.x,
            center.y,
            detection.confidence,
            describe(detection.signal)
        );
    }
    match report.outcome {
        RecoveryOutcome::Resolved {
            state,
            signal,
            ambiguous: false,
        } => {
            let _ = writeln!(out, "state: {state} (from {signal})");
        }
        RecoveryOutcome::Resolved {
            state,
            signal,
            ambiguous: true,
        } => {
            let _ = writeln!(out, "state: {state} (from {signal}, by priority)");
        }
        RecoveryOutcome::RestartRequired => {
            let _ = writeln!(out, "state: unknown, restart required");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signal::Signal;
    use crate::test_support::{ScriptedScreen, region};

    #[test]
    fn reports_priority_decision() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::Tap1, region(600, 500));
        screen.show(Signal::IngameAutoOn, region(1200, 100));
        let report = scan_once(screen.host(), &FarmerConfig::default()).expect("scan");

        let text = render_text(&report);
        assert!(text.contains("ingame-auto-on"));
        assert!(text.contains("state: RUNNING (from ingame-auto-on, by priority)"));
    }

    #[test]
    fn json_report_tags_the_outcome() {
        let screen = ScriptedScreen::new();
        let report = scan_once(screen.host(), &FarmerConfig::default()).expect("scan");
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["outcome"]["outcome"], "restart_required");
        assert!(json["visible"].as_array().expect("array").is_empty());
    }

    #[test]
    fn missing_window_is_an_error() {
        let screen = ScriptedScreen::new();
        screen.set_window(None);
        assert!(scan_once(screen.host(), &FarmerConfig::default()).is_err());
    }
}
