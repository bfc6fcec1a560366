//! Full-screen captures of a monitor through `xcap`.

use anyhow::{Context, Result, anyhow};
use image::{DynamicImage, RgbImage};
use tracing::{debug, instrument};
use xcap::Monitor;

use crate::core::geometry::Region;
use crate::io::config::CaptureConfig;

/// Something that can produce the current screen contents.
pub trait FrameSource {
    fn frame(&self) -> Result<RgbImage>;
}

/// Grabs the configured monitor in-process. Frame pixels are screen
/// coordinates, so the monitor should sit at the desktop origin.
#[derive(Debug, Clone)]
pub struct ScreenGrabber {
    monitor: String,
}

impl ScreenGrabber {
    pub fn new(cfg: &CaptureConfig) -> Self {
        Self {
            monitor: cfg.monitor.clone(),
        }
    }

    fn monitor(&self) -> Result<Monitor> {
        let monitors = Monitor::all().context("list monitors")?;
        let described: Vec<(String, bool)> = monitors
            .iter()
            .map(|m| (m.name().unwrap_or_default(), m.is_primary().unwrap_or(false)))
            .collect();
        let index = pick_monitor(&described, &self.monitor).ok_or_else(|| {
            let names: Vec<&str> = described.iter().map(|(name, _)| name.as_str()).collect();
            anyhow!("monitor {:?} not found among {names:?}", self.monitor)
        })?;
        monitors
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow!("monitor list changed while capturing"))
    }
}

impl FrameSource for ScreenGrabber {
    #[instrument(skip_all)]
    fn frame(&self) -> Result<RgbImage> {
        let monitor = self.monitor()?;
        let image = monitor.capture_image().context("capture monitor")?;
        let image = DynamicImage::ImageRgba8(image).to_rgb8();
        debug!(width = image.width(), height = image.height(), "screen captured");
        Ok(image)
    }
}

/// Index of the monitor named `wanted`, or of the primary one (falling back
/// to the first) when `wanted` is empty.
fn pick_monitor(monitors: &[(String, bool)], wanted: &str) -> Option<usize> {
    if wanted.is_empty() {
        let primary = monitors.iter().position(|(_, primary)| *primary);
        return primary.or((!monitors.is_empty()).then_some(0));
    }
    monitors.iter().position(|(name, _)| name == wanted)
}

/// The part of `region` that lies inside a `width` x `height` frame.
pub fn visible_part(region: Region, width: u32, height: u32) -> Option<Region> {
    let frame_w = i32::try_from(width).unwrap_or(i32::MAX);
    let frame_h = i32::try_from(height).unwrap_or(i32::MAX);
    let left = region.left.max(0);
    let top = region.top.max(0);
    let right = region.right().min(frame_w);
    let bottom = region.bottom().min(frame_h);
    (right > left && bottom > top).then(|| Region::new(left, top, right - left, bottom - top))
}
