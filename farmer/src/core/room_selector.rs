//! Turns raw marker and companion detections into a join target.
//!
//! Markers are deduplicated (imprecise matching reports the same on-screen
//! marker several times), then each surviving marker is paired with the
//! closest companion strictly below it. Selection stops at the first valid
//! pair in marker input order.

use crate::core::geometry::{Detection, Point, center_distance, pair_distance};

/// Tunables for deduplication and pairing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectorParams {
    /// Markers whose centers are closer than this collapse into one.
    pub min_marker_separation: f64,
    /// Pairs at or beyond this directional distance are rejected.
    pub max_pair_distance: f64,
    /// Weight applied to horizontal offset in [`pair_distance`].
    pub horizontal_weight: f64,
}

impl Default for SelectorParams {
    fn default() -> Self {
        Self {
            min_marker_separation: 60.0,
            max_pair_distance: 100.0,
            horizontal_weight: 0.1,
        }
    }
}

/// A validated marker/companion pair.
///
/// Only constructed by this module, so every instance has its companion below
/// the marker and `distance < max_pair_distance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomCandidate {
    marker: Detection,
    companion: Detection,
    distance: f64,
}

impl RoomCandidate {
    pub fn marker(&self) -> &Detection {
        &self.marker
    }

    pub fn companion(&self) -> &Detection {
        &self.companion
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// Point to click to join: horizontally between the marker's left edge and
    /// the companion's right edge, on the marker's row.
    pub fn join_point(&self) -> Point {
        let marker = self.marker.region;
        let companion = self.companion.region;
        Point::new(
            (marker.left + companion.right()) / 2,
            marker.center().y,
        )
    }
}

/// Collapse markers whose centers lie within `min_separation` of an already
/// accepted marker. Input order decides which duplicate survives.
pub fn dedup_markers(markers: &[Detection], min_separation: f64) -> Vec<Detection> {
    let mut unique: Vec<Detection> = Vec::new();
    for marker in markers {
        let duplicate = unique
            .iter()
            .any(|kept| center_distance(&kept.region, &marker.region) < min_separation);
        if !duplicate {
            unique.push(*marker);
        }
    }
    unique
}

/// Whether `companion` lies strictly below `marker`.
fn is_below(marker: &Detection, companion: &Detection) -> bool {
    companion.region.top > marker.region.top && companion.center().y > marker.center().y
}

/// Closest qualifying companion for `marker`, if any.
///
/// Ties keep the earlier companion.
pub fn pair_marker(
    marker: &Detection,
    companions: &[Detection],
    params: &SelectorParams,
) -> Option<RoomCandidate> {
    let mut best: Option<RoomCandidate> = None;
    for companion in companions {
        if !is_below(marker, companion) {
            continue;
        }
        let distance = pair_distance(&marker.region, &companion.region, params.horizontal_weight);
        if distance >= params.max_pair_distance {
            continue;
        }
        if best.is_none_or(|current| distance < current.distance) {
            best = Some(RoomCandidate {
                marker: *marker,
                companion: *companion,
                distance,
            });
        }
    }
    best
}

/// Ranked join targets: at most one, the first marker (after dedup) that has a
/// qualifying companion. Empty output is a normal outcome.
pub fn select_rooms(
    markers: &[Detection],
    companions: &[Detection],
    params: &SelectorParams,
) -> Vec<RoomCandidate> {
    dedup_markers(markers, params.min_marker_separation)
        .iter()
        .find_map(|marker| pair_marker(marker, companions, params))
        .into_iter()
        .collect()
}
