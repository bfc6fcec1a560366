//! Failure screenshots.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use image::imageops;
use tracing::{info, warn};

use crate::core::geometry::Region;
use crate::io::capture::{FrameSource, visible_part};

pub trait Diagnostics {
    /// Save evidence of the current screen under `tag`. Never fails: the
    /// loop is already handling a problem when this is called.
    fn capture(&self, tag: &str, region: Option<Region>);
}

/// Writes `{dir}/{tag}_{unix_ts}.png`, cropped to the given region.
pub struct ScreenshotDiagnostics<S> {
    source: S,
    dir: PathBuf,
}

impl<S: FrameSource> ScreenshotDiagnostics<S> {
    pub fn new(source: S, dir: PathBuf) -> Self {
        Self { source, dir }
    }

    fn save(&self, tag: &str, region: Option<Region>) -> Result<PathBuf> {
        let frame = self.source.frame()?;
        let image = match region {
            Some(region) => {
                let area = visible_part(region, frame.width(), frame.height())
                    .ok_or_else(|| anyhow!("capture region {region:?} is off screen"))?;
                imageops::crop_imm(
                    &frame,
                    area.left as u32,
                    area.top as u32,
                    area.width as u32,
                    area.height as u32,
                )
                .to_image()
            }
            None => frame,
        };
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create {}", self.dir.display()))?;
        let path = self.dir.join(file_name(tag, chrono::Utc::now().timestamp()));
        image
            .save(&path)
            .with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

impl<S: FrameSource> Diagnostics for ScreenshotDiagnostics<S> {
    fn capture(&self, tag: &str, region: Option<Region>) {
        match self.save(tag, region) {
            Ok(path) => info!(tag, path = %path.display(), "diagnostic screenshot saved"),
            Err(err) => warn!(tag, err = %format!("{err:#}"), "diagnostic screenshot failed"),
        }
    }
}

fn file_name(tag: &str, unix_ts: i64) -> String {
    let safe: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("{safe}_{unix_ts}.png")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    struct StillFrame(RgbImage);

    impl FrameSource for StillFrame {
        fn frame(&self) -> Result<RgbImage> {
            Ok(self.0.clone())
        }
    }

    struct BrokenScreen;

    impl FrameSource for BrokenScreen {
        fn frame(&self) -> Result<RgbImage> {
            Err(anyhow!("display unavailable"))
        }
    }

    #[test]
    fn file_names_are_sanitised() {
        assert_eq!(file_name("timeout_ready_run3", 17), "timeout_ready_run3_17.png");
        assert_eq!(file_name("a/b c", 5), "a_b_c_5.png");
    }

    #[test]
    fn capture_writes_cropped_png() {
        let temp = tempfile::tempdir().expect("tempdir");
        let diagnostics = ScreenshotDiagnostics::new(
            StillFrame(RgbImage::from_pixel(100, 80, Rgb([1, 2, 3]))),
            temp.path().join("shots"),
        );
        diagnostics.capture("quest_timeout_run0", Some(Region::new(10, 10, 30, 20)));

        let entries: Vec<_> = fs::read_dir(temp.path().join("shots"))
            .expect("read dir")
            .map(|e| e.expect("entry").path())
            .collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].file_name().expect("name").to_string_lossy().to_string();
        assert!(name.starts_with("quest_timeout_run0_"));
        let saved = image::open(&entries[0]).expect("decode");
        assert_eq!((saved.width(), saved.height()), (30, 20));
    }

    #[test]
    fn capture_failure_is_swallowed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let diagnostics = ScreenshotDiagnostics::new(BrokenScreen, temp.path().join("shots"));
        diagnostics.capture("environment_failure_run0", None);
        assert!(!temp.path().join("shots").exists());
    }
}
