//! Locating catalog templates on the live screen.

use anyhow::Result;
use image::{GrayImage, imageops};
use tracing::{debug, warn};

use crate::core::correlate::find_matches;
use crate::core::geometry::{Detection, Region};
use crate::core::signal::Signal;
use crate::io::capture::{FrameSource, visible_part};
use crate::io::catalog::TemplateCatalog;

/// Template search restricted to a screen region.
///
/// A miss is `Ok(None)` / an empty vector; `Err` means the screen could not
/// be inspected at all.
pub trait Matcher {
    fn locate_one(&self, signal: Signal, region: Region, confidence: f32)
    -> Result<Option<Detection>>;

    fn locate_all(&self, signal: Signal, region: Region, confidence: f32)
    -> Result<Vec<Detection>>;

    /// Best detection of each visible signal, in input order. Signals that
    /// cannot be inspected are skipped with a warning.
    fn locate_each(&self, signals: &[Signal], region: Region, confidence: f32) -> Vec<Detection> {
        signals
            .iter()
            .filter_map(|signal| match self.locate_one(*signal, region, confidence) {
                Ok(hit) => hit,
                Err(err) => {
                    warn!(%signal, err = %format!("{err:#}"), "scan failed");
                    None
                }
            })
            .collect()
    }
}

/// Normalised cross-correlation against freshly captured frames.
pub struct TemplateMatcher<S> {
    source: S,
    catalog: TemplateCatalog,
    coarse_scale: u32,
}

impl<S: FrameSource> TemplateMatcher<S> {
    pub fn new(source: S, catalog: TemplateCatalog, coarse_scale: u32) -> Self {
        Self {
            source,
            catalog,
            coarse_scale,
        }
    }

    fn gray_frame(&self) -> Result<GrayImage> {
        Ok(imageops::grayscale(&self.source.frame()?))
    }

    fn search(
        &self,
        frame: &GrayImage,
        signal: Signal,
        region: Region,
        confidence: f32,
    ) -> Result<Vec<Detection>> {
        let template = &self.catalog.get(signal)?.image;
        let Some(area) = visible_part(region, frame.width(), frame.height()) else {
            debug!(%signal, ?region, "search region is off screen");
            return Ok(Vec::new());
        };
        let cropped = imageops::crop_imm(
            frame,
            area.left as u32,
            area.top as u32,
            area.width as u32,
            area.height as u32,
        )
        .to_image();

        let (tw, th) = (template.width() as i32, template.height() as i32);
        Ok(
            find_matches(&cropped, template, confidence, self.coarse_scale)
                .into_iter()
                .map(|peak| {
                    let found = Region::new(
                        area.left + peak.x as i32,
                        area.top + peak.y as i32,
                        tw,
                        th,
                    );
                    Detection::new(signal, found, peak.score)
                })
                .collect(),
        )
    }
}

fn strongest(detections: Vec<Detection>) -> Option<Detection> {
    detections
        .into_iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

impl<S: FrameSource> Matcher for TemplateMatcher<S> {
    fn locate_one(
        &self,
        signal: Signal,
        region: Region,
        confidence: f32,
    ) -> Result<Option<Detection>> {
        let frame = self.gray_frame()?;
        Ok(strongest(self.search(&frame, signal, region, confidence)?))
    }

    fn locate_all(
        &self,
        signal: Signal,
        region: Region,
        confidence: f32,
    ) -> Result<Vec<Detection>> {
        let frame = self.gray_frame()?;
        self.search(&frame, signal, region, confidence)
    }

    /// Scans every signal against a single capture.
    fn locate_each(&self, signals: &[Signal], region: Region, confidence: f32) -> Vec<Detection> {
        let frame = match self.gray_frame() {
            Ok(frame) => frame,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "capture failed during scan");
                return Vec::new();
            }
        };
        signals
            .iter()
            .filter_map(|signal| match self.search(&frame, *signal, region, confidence) {
                Ok(hits) => strongest(hits),
                Err(err) => {
                    warn!(%signal, err = %format!("{err:#}"), "scan failed");
                    None
                }
            })
            .collect()
    }
}
