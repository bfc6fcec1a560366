//! Screen-wide scan feeding the recovery classifier.

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::geometry::{Detection, Region};
use crate::core::recovery::{RECOVERY_CATALOG, RecoveryClassifier, RecoveryOutcome, describe};
use crate::io::matcher::Matcher;
use crate::verify::Host;

/// Everything recognised on screen and what it implies.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenReport {
    pub visible: Vec<Detection>,
    pub outcome: RecoveryOutcome,
}

/// Scan the whole recovery catalog inside `region` and classify the hits.
pub fn scan_screen(
    matcher: &dyn Matcher,
    classifier: &RecoveryClassifier,
    region: Region,
    confidence: f32,
) -> ScreenReport {
    let signals: Vec<_> = RECOVERY_CATALOG.iter().map(|(signal, _, _)| *signal).collect();
    let visible = matcher.locate_each(&signals, region, confidence);
    let hits: Vec<_> = visible.iter().map(|d| d.signal).collect();
    let outcome = classifier.classify(&hits);
    ScreenReport { visible, outcome }
}

/// Re-derive the loop state from the screen after `tag` went wrong.
///
/// When nothing is recognisable a diagnostic capture named
/// `{tag}_run{run_count}` is kept before asking for a restart. The report
/// carries the detections so the caller can act on the deciding one.
#[instrument(skip_all, fields(tag = %tag))]
pub fn recover(
    host: Host<'_>,
    classifier: &RecoveryClassifier,
    region: Region,
    confidence: f32,
    tag: &str,
    run_count: u32,
) -> ScreenReport {
    info!("identifying current screen");
    let report = scan_screen(host.matcher, classifier, region, confidence);
    for detection in &report.visible {
        info!(signal = %detection.signal, "found: {}", describe(detection.signal));
    }

    match report.outcome {
        RecoveryOutcome::RestartRequired => {
            warn!("no known signal on screen, restart required");
            host.diagnostics
                .capture(&format!("{tag}_run{run_count}"), Some(region));
        }
        RecoveryOutcome::Resolved {
            state,
            signal,
            ambiguous,
        } => {
            if ambiguous {
                info!(%state, %signal, hits = report.visible.len(), "resolved by priority");
            } else {
                info!(%state, %signal, "clear state identified");
            }
        }
    }
    report
}
