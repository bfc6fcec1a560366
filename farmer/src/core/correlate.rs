//! Zero-mean normalised cross-correlation for locating templates in frames.
//!
//! Scores are in `[-1, 1]`. `imageproc` supplies the raw correlation and the
//! integral images; subtracting the window means turns that into a zero-mean
//! score, so bright or flat backgrounds do not pass for a match. Large searches
//! run on a downscaled copy first and refine the surviving candidates at full
//! resolution.

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::definitions::Image;
use imageproc::integral_image::{integral_image, integral_squared_image};
use imageproc::template_matching::{MatchTemplateMethod, find_extremes, match_template};

/// Slack subtracted from the threshold when screening the coarse level.
const COARSE_SLACK: f32 = 0.15;
/// Coarse candidates refined at full resolution, best first.
const MAX_COARSE_CANDIDATES: usize = 64;
/// Templates smaller than this (after downscaling) skip the coarse pass.
const MIN_COARSE_SIDE: u32 = 4;

/// Top-left corner of a match in haystack coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

struct TemplateStats {
    n: f64,
    mean: f64,
    /// Sum of squared deviations from the mean.
    norm: f64,
}

impl TemplateStats {
    fn new(template: &GrayImage) -> Self {
        let n = f64::from(template.width() * template.height());
        let (sum, sq) = template.pixels().fold((0.0, 0.0), |(sum, sq), pixel| {
            let value = f64::from(pixel.0[0]);
            (sum + value, sq + value * value)
        });
        let mean = sum / n;
        Self {
            n,
            mean,
            norm: sq - sum * mean,
        }
    }
}

/// Sum over the `w` x `h` window at `(x, y)` of an integral image.
fn window_sum(table: &Image<Luma<u64>>, x: u32, y: u32, w: u32, h: u32) -> f64 {
    let at = |x, y| table.get_pixel(x, y).0[0] as f64;
    at(x + w, y + h) - at(x, y + h) - at(x + w, y) + at(x, y)
}

fn zncc(cross: f64, sum: f64, sq: f64, template: &TemplateStats) -> f32 {
    let variance = sq - sum * sum / template.n;
    let flat = 1e-6 * template.n;
    if template.norm <= flat || variance <= flat {
        // A flat template only matches a flat window of the same level.
        let same_level = (sum / template.n - template.mean).abs() < 1.0;
        return if template.norm <= flat && variance <= flat && same_level {
            1.0
        } else {
            0.0
        };
    }
    let centered = cross - template.mean * sum;
    ((centered / (template.norm * variance).sqrt()) as f32).clamp(-1.0, 1.0)
}

/// Score of `template` at every offset of `haystack`.
fn score_map(haystack: &GrayImage, template: &GrayImage) -> Image<Luma<f32>> {
    let (tw, th) = template.dimensions();
    let stats = TemplateStats::new(template);
    let sums = integral_image::<_, u64>(haystack);
    let squares = integral_squared_image::<_, u64>(haystack);
    let cross = match_template(haystack, template, MatchTemplateMethod::CrossCorrelation);
    ImageBuffer::from_fn(cross.width(), cross.height(), |x, y| {
        let raw = f64::from(cross.get_pixel(x, y).0[0]);
        let sum = window_sum(&sums, x, y, tw, th);
        let sq = window_sum(&squares, x, y, tw, th);
        Luma([zncc(raw, sum, sq, &stats)])
    })
}

fn exhaustive(haystack: &GrayImage, template: &GrayImage, threshold: f32) -> Vec<Peak> {
    score_map(haystack, template)
        .enumerate_pixels()
        .filter(|(_, _, score)| score.0[0] >= threshold)
        .map(|(x, y, score)| Peak {
            x,
            y,
            score: score.0[0],
        })
        .collect()
}

fn downscale(image: &GrayImage, scale: u32) -> GrayImage {
    let width = (image.width() / scale).max(1);
    let height = (image.height() / scale).max(1);
    imageops::resize(image, width, height, FilterType::Triangle)
}

fn coarse_to_fine(
    haystack: &GrayImage,
    template: &GrayImage,
    threshold: f32,
    scale: u32,
) -> Vec<Peak> {
    let small_haystack = downscale(haystack, scale);
    let small_template = downscale(template, scale);
    let mut candidates = exhaustive(&small_haystack, &small_template, threshold - COARSE_SLACK);
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(MAX_COARSE_CANDIDATES);

    let (tw, th) = template.dimensions();
    let max_x = haystack.width() - tw;
    let max_y = haystack.height() - th;

    let mut peaks = Vec::new();
    for candidate in candidates {
        let left = (candidate.x * scale).saturating_sub(scale).min(max_x);
        let top = (candidate.y * scale).saturating_sub(scale).min(max_y);
        let right = (candidate.x * scale + scale).min(max_x);
        let bottom = (candidate.y * scale + scale).min(max_y);
        let patch =
            imageops::crop_imm(haystack, left, top, right - left + tw, bottom - top + th).to_image();

        let best = find_extremes(&score_map(&patch, template));
        if best.max_value >= threshold {
            let (x, y) = best.max_value_location;
            peaks.push(Peak {
                x: left + x,
                y: top + y,
                score: best.max_value,
            });
        }
    }
    peaks
}

/// Drop peaks that overlap a stronger one by more than half the template in
/// both axes.
fn suppress_overlaps(mut peaks: Vec<Peak>, width: u32, height: u32) -> Vec<Peak> {
    peaks.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Peak> = Vec::new();
    for peak in peaks {
        let overlaps = kept.iter().any(|other| {
            peak.x.abs_diff(other.x) < width.div_ceil(2)
                && peak.y.abs_diff(other.y) < height.div_ceil(2)
        });
        if !overlaps {
            kept.push(peak);
        }
    }
    kept
}

/// All non-overlapping positions where `template` scores at least
/// `threshold`, ordered top-to-bottom then left-to-right.
///
/// `coarse_scale` of 1 (or 0) searches every position at full resolution.
pub fn find_matches(
    haystack: &GrayImage,
    template: &GrayImage,
    threshold: f32,
    coarse_scale: u32,
) -> Vec<Peak> {
    let (tw, th) = template.dimensions();
    if tw == 0 || th == 0 || tw > haystack.width() || th > haystack.height() {
        return Vec::new();
    }

    let use_coarse = coarse_scale > 1
        && tw / coarse_scale >= MIN_COARSE_SIDE
        && th / coarse_scale >= MIN_COARSE_SIDE;
    let peaks = if use_coarse {
        coarse_to_fine(haystack, template, threshold, coarse_scale)
    } else {
        exhaustive(haystack, template, threshold)
    };

    let mut peaks = suppress_overlaps(peaks, tw, th);
    peaks.sort_by_key(|peak| (peak.y, peak.x));
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic noise so that only the true offset scores near 1.
    fn pattern(width: u32, height: u32, seed: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let mut h = x.wrapping_mul(374_761_393)
                ^ y.wrapping_mul(668_265_263)
                ^ seed.wrapping_mul(2_654_435_761);
            h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
            Luma([(h >> 24) as u8])
        })
    }

    fn paste(canvas: &mut GrayImage, patch: &GrayImage, left: u32, top: u32) {
        imageops::replace(canvas, patch, i64::from(left), i64::from(top));
    }

    fn blocky_checker(width: u32, height: u32, block: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            if ((x / block) + (y / block)) % 2 == 0 {
                Luma([220])
            } else {
                Luma([30])
            }
        })
    }

    #[test]
    fn finds_template_at_exact_offset() {
        let mut canvas = GrayImage::from_pixel(120, 80, Luma([128]));
        let needle = pattern(16, 12, 3);
        paste(&mut canvas, &needle, 40, 25);

        let peaks = find_matches(&canvas, &needle, 0.95, 1);
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].x, peaks[0].y), (40, 25));
        assert!(peaks[0].score > 0.999);
    }

    #[test]
    fn reports_every_copy_in_reading_order() {
        let mut canvas = GrayImage::from_pixel(200, 160, Luma([90]));
        let needle = pattern(20, 20, 7);
        paste(&mut canvas, &needle, 150, 20);
        paste(&mut canvas, &needle, 10, 100);
        paste(&mut canvas, &needle, 60, 20);

        let peaks = find_matches(&canvas, &needle, 0.9, 1);
        let positions: Vec<(u32, u32)> = peaks.iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(positions, vec![(60, 20), (150, 20), (10, 100)]);
    }

    #[test]
    fn bright_background_does_not_pass_for_a_match() {
        // Plain normalised correlation rates a white window close to any
        // light template; the zero-mean score must not.
        let canvas = GrayImage::from_pixel(80, 60, Luma([250]));
        let needle = blocky_checker(16, 16, 4);
        assert!(find_matches(&canvas, &needle, 0.5, 1).is_empty());
    }

    #[test]
    fn coarse_search_locates_block_aligned_match() {
        let mut canvas = GrayImage::from_pixel(320, 240, Luma([128]));
        let needle = blocky_checker(32, 24, 8);
        paste(&mut canvas, &needle, 200, 120);

        let peaks = find_matches(&canvas, &needle, 0.9, 4);
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].x, peaks[0].y), (200, 120));
    }

    #[test]
    fn coarse_search_refines_unaligned_offset() {
        let mut canvas = GrayImage::from_pixel(320, 240, Luma([128]));
        let needle = blocky_checker(40, 32, 8);
        paste(&mut canvas, &needle, 101, 63);

        let peaks = find_matches(&canvas, &needle, 0.9, 4);
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].x, peaks[0].y), (101, 63));
    }

    #[test]
    fn absent_template_yields_nothing() {
        let canvas = pattern(100, 100, 1);
        let needle = blocky_checker(16, 16, 4);
        assert!(find_matches(&canvas, &needle, 0.95, 1).is_empty());
    }

    #[test]
    fn template_larger_than_haystack_is_a_miss() {
        let canvas = GrayImage::from_pixel(10, 10, Luma([0]));
        let needle = GrayImage::from_pixel(12, 4, Luma([0]));
        assert!(find_matches(&canvas, &needle, 0.5, 1).is_empty());
    }

    #[test]
    fn flat_template_matches_only_flat_window_of_same_level() {
        let mut canvas = pattern(60, 60, 5);
        let needle = GrayImage::from_pixel(8, 8, Luma([200]));
        paste(&mut canvas, &needle, 30, 30);
        let peaks = find_matches(&canvas, &needle, 0.99, 1);
        assert_eq!(peaks.len(), 1);
        assert_eq!((peaks[0].x, peaks[0].y), (30, 30));
    }
}
