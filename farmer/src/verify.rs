//! Bounded polling and the act-then-confirm protocol every UI action uses.
//!
//! A click can silently miss (stale coordinates, focus lost, input dropped),
//! so the only proof of success is a visible change. Every wait here is
//! bounded by a [`Deadline`] on the injected clock and always looks at least
//! once, so a signal that flickers out for one poll does not fail the wait.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::core::budget::Deadline;
use crate::core::geometry::{Detection, Point, Region};
use crate::core::session::WindowHandle;
use crate::core::signal::Signal;
use crate::io::clock::Clock;
use crate::io::config::{FarmerConfig, secs};
use crate::io::desktop::Desktop;
use crate::io::diagnostics::Diagnostics;
use crate::io::launcher::Launcher;
use crate::io::matcher::Matcher;

/// The collaborators the loop talks to.
#[derive(Clone, Copy)]
pub struct Host<'a> {
    pub matcher: &'a dyn Matcher,
    pub desktop: &'a dyn Desktop,
    pub launcher: &'a dyn Launcher,
    pub diagnostics: &'a dyn Diagnostics,
    pub clock: &'a dyn Clock,
}

/// Where inside a located box a click lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickStyle {
    /// Uniformly random point inside the box.
    Anywhere,
    /// Box centre plus up to `width / divisor`, `height / divisor` of jitter.
    Centered { divisor: i32 },
}

impl ClickStyle {
    pub const CENTERED: ClickStyle = ClickStyle::Centered { divisor: 6 };
    /// Round toggles are unreliable near their edges.
    pub const TOGGLE: ClickStyle = ClickStyle::Centered { divisor: 10 };
}

/// Pick the click point for `region`. The result always lies inside it.
pub fn pick_point(region: Region, style: ClickStyle, rng: &mut impl Rng) -> Point {
    let width = region.width.max(1);
    let height = region.height.max(1);
    match style {
        ClickStyle::Anywhere => Point::new(
            rng.gen_range(region.left..region.left + width),
            rng.gen_range(region.top..region.top + height),
        ),
        ClickStyle::Centered { divisor } => {
            let center = region.center();
            let jitter_x = width / divisor.max(1);
            let jitter_y = height / divisor.max(1);
            Point::new(
                center.x + rng.gen_range(-jitter_x..=jitter_x),
                center.y + rng.gen_range(-jitter_y..=jitter_y),
            )
        }
    }
}

/// What proves that an action took effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessCondition {
    /// The clicked signal is no longer visible.
    Vanishes,
    /// A different signal became visible.
    Appears(Signal),
}

/// Screen access for one state handler: matching restricted to a region,
/// clicks delivered to the game window.
#[derive(Clone, Copy)]
pub struct Verifier<'a> {
    host: Host<'a>,
    config: &'a FarmerConfig,
    region: Region,
    window: Option<WindowHandle>,
}

impl<'a> Verifier<'a> {
    pub fn new(
        host: Host<'a>,
        config: &'a FarmerConfig,
        region: Region,
        window: Option<WindowHandle>,
    ) -> Self {
        Self {
            host,
            config,
            region,
            window,
        }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn deadline(&self, timeout: Duration) -> Deadline {
        Deadline::after(self.host.clock.now(), timeout)
    }

    pub fn sleep(&self, duration: Duration) {
        self.host.clock.sleep(duration);
    }

    /// Sleep until the next poll. Returns `false` once `deadline` has passed.
    pub fn pause_until(&self, deadline: &Deadline, interval: Duration) -> bool {
        let now = self.host.clock.now();
        if deadline.is_expired(now) {
            return false;
        }
        self.sleep(deadline.next_wait(now, interval));
        true
    }

    fn confidence(&self, signal: Signal) -> f32 {
        self.config.matching.threshold(signal.tier())
    }

    /// Locate `signal` at its tier's confidence. A matcher failure counts as a miss.
    pub fn find(&self, signal: Signal) -> Option<Detection> {
        self.find_at(signal, self.confidence(signal))
    }

    pub fn find_at(&self, signal: Signal, confidence: f32) -> Option<Detection> {
        match self.host.matcher.locate_one(signal, self.region, confidence) {
            Ok(hit) => hit,
            Err(err) => {
                warn!(%signal, err = %format!("{err:#}"), "locate failed");
                None
            }
        }
    }

    pub fn find_all(&self, signal: Signal) -> Vec<Detection> {
        match self
            .host
            .matcher
            .locate_all(signal, self.region, self.confidence(signal))
        {
            Ok(hits) => hits,
            Err(err) => {
                warn!(%signal, err = %format!("{err:#}"), "locate failed");
                Vec::new()
            }
        }
    }

    /// Poll `check` until it yields or `timeout` elapses.
    pub fn poll<T>(
        &self,
        timeout: Duration,
        interval: Duration,
        mut check: impl FnMut() -> Option<T>,
    ) -> Option<T> {
        let deadline = self.deadline(timeout);
        loop {
            if let Some(found) = check() {
                return Some(found);
            }
            if !self.pause_until(&deadline, interval) {
                return None;
            }
        }
    }

    pub fn wait_for(&self, signal: Signal, timeout: Duration, interval: Duration) -> Option<Detection> {
        self.poll(timeout, interval, || self.find(signal))
    }

    /// First of `signals` (in priority order) to become visible.
    pub fn wait_for_any(
        &self,
        signals: &[Signal],
        timeout: Duration,
        interval: Duration,
    ) -> Option<Detection> {
        self.poll(timeout, interval, || {
            signals.iter().find_map(|signal| self.find(*signal))
        })
    }

    /// Poll until `signal` is confirmed absent. A failed lookup proves nothing
    /// and keeps the wait going.
    pub fn wait_until_gone(&self, signal: Signal, timeout: Duration, interval: Duration) -> bool {
        let confidence = self.confidence(signal);
        self.poll(timeout, interval, || {
            match self.host.matcher.locate_one(signal, self.region, confidence) {
                Ok(None) => Some(()),
                Ok(Some(_)) => None,
                Err(err) => {
                    warn!(%signal, err = %format!("{err:#}"), "locate failed, absence unconfirmed");
                    None
                }
            }
        })
        .is_some()
    }

    /// Deliver one click. Failures are logged and reported as `false`.
    pub fn click_point(&self, point: Point, what: &str) -> bool {
        let Some(window) = self.window else {
            warn!(what, "no game window to click in");
            return false;
        };
        match self.host.desktop.click(window, point) {
            Ok(()) => {
                debug!(what, x = point.x, y = point.y, "clicked");
                true
            }
            Err(err) => {
                warn!(what, err = %format!("{err:#}"), "click failed");
                false
            }
        }
    }

    /// Wait for the matcher to settle, then click inside `detection`.
    pub fn click_detection(&self, detection: &Detection, style: ClickStyle) -> bool {
        self.sleep(secs(self.config.timing.click_soak));
        let point = pick_point(detection.region, style, &mut rand::thread_rng());
        self.click_point(point, detection.signal.key())
    }

    /// Poll for `signal` and click it once found.
    pub fn poll_and_click(&self, signal: Signal, timeout: Duration, style: ClickStyle) -> bool {
        let started = self.host.clock.now();
        let interval = secs(self.config.timing.action_poll);
        let Some(found) = self.wait_for(signal, timeout, interval) else {
            info!(%signal, timeout_secs = timeout.as_secs_f64(), "not found before timeout");
            return false;
        };
        debug!(
            %signal,
            after_secs = self.host.clock.now().duration_since(started).as_secs_f64(),
            "found"
        );
        self.click_detection(&found, style)
    }

    /// Click `point` for `target`, then poll until `condition` holds.
    ///
    /// Does not retry the click; the owning state decides whether to.
    pub fn perform_and_verify(
        &self,
        target: Signal,
        point: Point,
        condition: SuccessCondition,
        timeout: Duration,
    ) -> bool {
        if !self.click_point(point, target.key()) {
            return false;
        }
        let interval = secs(self.config.timing.quick_poll);
        let confirmed = match condition {
            SuccessCondition::Vanishes => self.wait_until_gone(target, timeout, interval),
            SuccessCondition::Appears(next) => self.wait_for(next, timeout, interval).is_some(),
        };
        if confirmed {
            debug!(%target, ?condition, "action confirmed");
        } else {
            warn!(%target, ?condition, timeout_secs = timeout.as_secs_f64(), "action not confirmed");
        }
        confirmed
    }

    /// [`Self::perform_and_verify`] on a located signal, after the usual soak.
    pub fn click_and_verify(
        &self,
        detection: &Detection,
        style: ClickStyle,
        condition: SuccessCondition,
        timeout: Duration,
    ) -> bool {
        self.sleep(secs(self.config.timing.click_soak));
        let point = pick_point(detection.region, style, &mut rand::thread_rng());
        self.perform_and_verify(detection.signal, point, condition, timeout)
    }
}
