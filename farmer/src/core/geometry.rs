//! Screen geometry value types: regions, points and labelled detections.
//!
//! All coordinates are absolute screen pixels. Equality is geometric; nothing
//! here performs I/O.

use serde::Serialize;

use crate::core::signal::Signal;

/// Integer pixel coordinate on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    pub const fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Center point, rounded towards the top-left like the capture grid.
    pub fn center(&self) -> Point {
        Point::new(self.left + self.width / 2, self.top + self.height / 2)
    }

    pub fn right(&self) -> i32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.left
            && point.x < self.right()
            && point.y >= self.top
            && point.y < self.bottom()
    }

    /// Clamp this region into `bounds`, keeping at least one pixel of extent.
    pub fn clamp_to(&self, bounds: Region) -> Region {
        let left = self.left.clamp(bounds.left, bounds.right());
        let top = self.top.clamp(bounds.top, bounds.bottom());
        let width = self.width.clamp(1, (bounds.right() - left).max(1));
        let height = self.height.clamp(1, (bounds.bottom() - top).max(1));
        Region::new(left, top, width, height)
    }
}

/// A located occurrence of a signal's template.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Detection {
    pub signal: Signal,
    pub region: Region,
    pub confidence: f32,
}

impl Detection {
    pub fn new(signal: Signal, region: Region, confidence: f32) -> Self {
        Self {
            signal,
            region,
            confidence,
        }
    }

    pub fn center(&self) -> Point {
        self.region.center()
    }
}

/// Directional distance between a marker and a candidate companion.
///
/// `|dy| + weight * |dx|` over region centers: companions are expected in a
/// column below the marker, so horizontal offset is penalised far less.
pub fn pair_distance(marker: &Region, companion: &Region, horizontal_weight: f64) -> f64 {
    let a = marker.center();
    let b = companion.center();
    let dy = f64::from((b.y - a.y).abs());
    let dx = f64::from((b.x - a.x).abs());
    dy + horizontal_weight * dx
}

/// Euclidean distance between two region centers.
pub fn center_distance(a: &Region, b: &Region) -> f64 {
    let a = a.center();
    let b = b.center();
    let dx = f64::from(b.x - a.x);
    let dy = f64::from(b.y - a.y);
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_uses_integer_halves() {
        let region = Region::new(10, 20, 31, 11);
        assert_eq!(region.center(), Point::new(25, 25));
    }

    #[test]
    fn contains_is_half_open() {
        let region = Region::new(0, 0, 10, 10);
        assert!(region.contains(Point::new(0, 0)));
        assert!(region.contains(Point::new(9, 9)));
        assert!(!region.contains(Point::new(10, 5)));
        assert!(!region.contains(Point::new(5, -1)));
    }

    #[test]
    fn clamp_to_screen_keeps_region_on_screen() {
        let screen = Region::new(0, 0, 1920, 1080);
        let window = Region::new(-40, 1000, 800, 600);
        assert_eq!(window.clamp_to(screen), Region::new(0, 1000, 800, 80));

        let off_screen = Region::new(2000, 0, 300, 300);
        let clamped = off_screen.clamp_to(screen);
        assert_eq!(clamped.left, 1920);
        assert_eq!(clamped.width, 1);
    }

    #[test]
    fn pair_distance_weights_horizontal_offset() {
        let marker = Region::new(100, 500, 20, 20);
        let below = Region::new(100, 560, 20, 20);
        let below_right = Region::new(200, 560, 20, 20);
        assert_eq!(pair_distance(&marker, &below, 0.1), 60.0);
        assert_eq!(pair_distance(&marker, &below_right, 0.1), 70.0);
    }

    #[test]
    fn pair_distance_is_monotonic_moving_down_or_right() {
        let marker = Region::new(100, 100, 30, 30);
        let mut previous = 0.0;
        for step in 0..20 {
            let companion = Region::new(100 + step * 7, 140 + step * 5, 30, 30);
            let distance = pair_distance(&marker, &companion, 0.1);
            assert!(distance >= previous, "distance decreased at step {step}");
            previous = distance;
        }
    }
}
