//! Scripted stand-in for the screen, mouse, game process and clock.
//!
//! A [`ScriptedScreen`] holds the set of visible signals and reacts to clicks
//! and launches with [`Effect`]s, so state handlers can be driven through
//! whole scenarios without a display. Time only advances when something
//! sleeps.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};

use crate::core::geometry::{Detection, Point, Region};
use crate::core::session::{GameWindow, SessionState, WindowHandle};
use crate::core::signal::Signal;
use crate::core::state::FarmState;
use crate::io::clock::Clock;
use crate::io::config::FarmerConfig;
use crate::io::desktop::Desktop;
use crate::io::diagnostics::Diagnostics;
use crate::io::launcher::Launcher;
use crate::io::matcher::Matcher;
use crate::verify::{Host, Verifier};

pub const WINDOW_HANDLE: WindowHandle = WindowHandle(0x0420_0001);
const SCREEN: Region = Region {
    left: 0,
    top: 0,
    width: 2560,
    height: 1440,
};
const WINDOW: Region = Region {
    left: 0,
    top: 0,
    width: 1920,
    height: 1080,
};
/// Score of scripted detections unless a test says otherwise.
const CONFIDENCE: f32 = 0.95;

/// An 80x30 box centred on `(cx, cy)`.
pub fn region(cx: i32, cy: i32) -> Region {
    Region::new(cx - 40, cy - 15, 80, 30)
}

/// A session in `state` already bound to the scripted window.
pub fn start_session(screen: &ScriptedScreen, state: FarmState) -> SessionState {
    SessionState::new(state, Some(screen.window()))
}

/// Changes applied to the visible signal set.
#[derive(Debug, Clone, Default)]
pub struct Effect {
    hide: Vec<Signal>,
    show: Vec<(Signal, Region, f32)>,
}

impl Effect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hide(mut self, signal: Signal) -> Self {
        self.hide.push(signal);
        self
    }

    pub fn show(self, signal: Signal, region: Region) -> Self {
        self.show_with_confidence(signal, region, CONFIDENCE)
    }

    pub fn show_with_confidence(mut self, signal: Signal, region: Region, confidence: f32) -> Self {
        self.show.push((signal, region, confidence));
        self
    }
}

enum Trigger {
    Signal(Signal),
    NthClick(Signal, usize),
    Area(Region),
}

#[derive(Default)]
struct Script {
    visible: Vec<(Signal, Region, f32)>,
    blinks: HashMap<Signal, u32>,
    reactions: Vec<(Trigger, Effect)>,
    on_launch: Vec<Effect>,
    scheduled: Vec<(Duration, Effect)>,
    fail_clicks: bool,
    fail_locates: bool,
    window: Option<GameWindow>,
    clicks: Vec<(Point, Option<Signal>)>,
    locate_calls: HashMap<Signal, usize>,
    captures: Vec<String>,
    kills: usize,
    launches: usize,
}

impl Script {
    fn apply(&mut self, effect: &Effect) {
        self.visible
            .retain(|(signal, _, _)| !effect.hide.contains(signal));
        self.visible.extend(effect.show.iter().copied());
    }

    fn locate(&mut self, signal: Signal, area: Region, threshold: f32) -> Result<Vec<Detection>> {
        *self.locate_calls.entry(signal).or_default() += 1;
        if self.fail_locates {
            return Err(anyhow!("injected capture failure"));
        }
        if let Some(remaining) = self.blinks.get_mut(&signal)
            && *remaining > 0
        {
            *remaining -= 1;
            return Ok(Vec::new());
        }
        Ok(self
            .visible
            .iter()
            .filter(|(candidate, at, confidence)| {
                *candidate == signal && area.contains(at.center()) && *confidence >= threshold
            })
            .map(|(signal, at, confidence)| Detection::new(*signal, *at, *confidence))
            .collect())
    }

    fn clicks_on(&self, signal: Signal) -> usize {
        self.clicks
            .iter()
            .filter(|(_, hit)| *hit == Some(signal))
            .count()
    }
}

/// Fake implementation of every host collaborator.
pub struct ScriptedScreen {
    script: RefCell<Script>,
    origin: Instant,
    elapsed: Cell<Duration>,
}

impl Default for ScriptedScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedScreen {
    pub fn new() -> Self {
        let script = Script {
            window: Some(GameWindow {
                handle: WINDOW_HANDLE,
                region: WINDOW,
            }),
            ..Script::default()
        };
        Self {
            script: RefCell::new(script),
            origin: Instant::now(),
            elapsed: Cell::new(Duration::ZERO),
        }
    }

    /// Make another instance of `signal` visible at `at`.
    pub fn show(&self, signal: Signal, at: Region) {
        self.show_with_confidence(signal, at, CONFIDENCE);
    }

    /// Like [`Self::show`], but the matcher only reports it at thresholds up to `confidence`.
    pub fn show_with_confidence(&self, signal: Signal, at: Region, confidence: f32) {
        self.script
            .borrow_mut()
            .visible
            .push((signal, at, confidence));
    }

    pub fn hide(&self, signal: Signal) {
        self.script.borrow_mut().apply(&Effect::new().hide(signal));
    }

    /// The next `misses` lookups of `signal` come back empty.
    pub fn blink(&self, signal: Signal, misses: u32) {
        self.script.borrow_mut().blinks.insert(signal, misses);
    }

    /// Apply `effect` every time a click lands on `signal`.
    pub fn on_click(&self, signal: Signal, effect: Effect) {
        self.script
            .borrow_mut()
            .reactions
            .push((Trigger::Signal(signal), effect));
    }

    /// Apply `effect` only on the `nth` (1-based) click landing on `signal`.
    pub fn on_click_nth(&self, signal: Signal, nth: usize, effect: Effect) {
        self.script
            .borrow_mut()
            .reactions
            .push((Trigger::NthClick(signal, nth), effect));
    }

    /// Apply `effect` when a click lands anywhere inside `area`.
    pub fn on_click_area(&self, area: Region, effect: Effect) {
        self.script
            .borrow_mut()
            .reactions
            .push((Trigger::Area(area), effect));
    }

    /// Apply `effect` on every launch.
    pub fn on_launch(&self, effect: Effect) {
        self.script.borrow_mut().on_launch.push(effect);
    }

    /// Apply `effect` once the fake clock reaches `at`.
    pub fn schedule(&self, at: Duration, effect: Effect) {
        self.script.borrow_mut().scheduled.push((at, effect));
    }

    pub fn fail_clicks(&self, fail: bool) {
        self.script.borrow_mut().fail_clicks = fail;
    }

    /// Every lookup errors, as if the screen could not be captured.
    pub fn fail_locates(&self, fail: bool) {
        self.script.borrow_mut().fail_locates = fail;
    }

    /// Window reported by `find_window`; `None` simulates a vanished game.
    pub fn set_window(&self, window: Option<GameWindow>) {
        self.script.borrow_mut().window = window;
    }

    pub fn window(&self) -> GameWindow {
        GameWindow {
            handle: WINDOW_HANDLE,
            region: WINDOW,
        }
    }

    pub fn window_region(&self) -> Region {
        WINDOW
    }

    pub fn clicks(&self) -> usize {
        self.script.borrow().clicks.len()
    }

    pub fn clicks_on(&self, signal: Signal) -> usize {
        self.script.borrow().clicks_on(signal)
    }

    pub fn click_points(&self) -> Vec<Point> {
        self.script
            .borrow()
            .clicks
            .iter()
            .map(|(point, _)| *point)
            .collect()
    }

    /// Signals hit by clicks, in click order. Clicks on empty space are skipped.
    pub fn clicked_signals(&self) -> Vec<Signal> {
        self.script
            .borrow()
            .clicks
            .iter()
            .filter_map(|(_, hit)| *hit)
            .collect()
    }

    pub fn locate_calls(&self, signal: Signal) -> usize {
        self.script
            .borrow()
            .locate_calls
            .get(&signal)
            .copied()
            .unwrap_or(0)
    }

    pub fn captures(&self) -> Vec<String> {
        self.script.borrow().captures.clone()
    }

    pub fn kills(&self) -> usize {
        self.script.borrow().kills
    }

    pub fn launches(&self) -> usize {
        self.script.borrow().launches
    }

    /// Fake time spent sleeping so far.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }

    pub fn host(&self) -> Host<'_> {
        Host {
            matcher: self,
            desktop: self,
            launcher: self,
            diagnostics: self,
            clock: self,
        }
    }

    pub fn verifier<'a>(&'a self, config: &'a FarmerConfig) -> Verifier<'a> {
        Verifier::new(self.host(), config, WINDOW, Some(WINDOW_HANDLE))
    }
}

impl Matcher for ScriptedScreen {
    fn locate_one(
        &self,
        signal: Signal,
        region: Region,
        confidence: f32,
    ) -> Result<Option<Detection>> {
        let hits = self.script.borrow_mut().locate(signal, region, confidence)?;
        Ok(hits.into_iter().next())
    }

    fn locate_all(
        &self,
        signal: Signal,
        region: Region,
        confidence: f32,
    ) -> Result<Vec<Detection>> {
        self.script.borrow_mut().locate(signal, region, confidence)
    }
}

impl Desktop for ScriptedScreen {
    fn find_window(&self) -> Result<Option<GameWindow>> {
        Ok(self.script.borrow().window)
    }

    fn screen_region(&self) -> Result<Region> {
        Ok(SCREEN)
    }

    fn click(&self, _window: WindowHandle, point: Point) -> Result<()> {
        let mut script = self.script.borrow_mut();
        if script.fail_clicks {
            return Err(anyhow!("injected click failure"));
        }
        let hit = script
            .visible
            .iter()
            .find(|(_, at, _)| at.contains(point))
            .map(|(signal, _, _)| *signal);
        script.clicks.push((point, hit));

        let effects: Vec<Effect> = script
            .reactions
            .iter()
            .filter(|(trigger, _)| match trigger {
                Trigger::Signal(signal) => hit == Some(*signal),
                Trigger::NthClick(signal, nth) => {
                    hit == Some(*signal) && script.clicks_on(*signal) == *nth
                }
                Trigger::Area(area) => area.contains(point),
            })
            .map(|(_, effect)| effect.clone())
            .collect();
        for effect in &effects {
            script.apply(effect);
        }
        Ok(())
    }

    fn pin_on_top(&self, _window: WindowHandle) -> Result<()> {
        Ok(())
    }
}

impl Launcher for ScriptedScreen {
    fn kill(&self) -> Result<()> {
        self.script.borrow_mut().kills += 1;
        Ok(())
    }

    fn launch(&self) -> Result<()> {
        let mut script = self.script.borrow_mut();
        script.launches += 1;
        let effects = script.on_launch.clone();
        for effect in &effects {
            script.apply(effect);
        }
        Ok(())
    }
}

impl Diagnostics for ScriptedScreen {
    fn capture(&self, tag: &str, _region: Option<Region>) {
        self.script.borrow_mut().captures.push(tag.to_string());
    }
}

impl Clock for ScriptedScreen {
    fn now(&self) -> Instant {
        self.origin + self.elapsed.get()
    }

    fn sleep(&self, duration: Duration) {
        let elapsed = self.elapsed.get() + duration;
        self.elapsed.set(elapsed);

        let mut script = self.script.borrow_mut();
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut script.scheduled)
            .into_iter()
            .partition(|(at, _)| *at <= elapsed);
        script.scheduled = pending;
        for (_, effect) in &due {
            script.apply(effect);
        }
    }
}
