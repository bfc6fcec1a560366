//! The farming state machine.
//!
//! One handler per [`FarmState`]. A handler either returns the next state or a
//! [`FarmError`]; recoverable errors are turned into a next state by the
//! recovery scan, fatal ones leave the loop after a single diagnostic capture.

use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, info_span, warn};

use crate::core::budget::Deadline;
use crate::core::errors::FarmError;
use crate::core::geometry::Detection;
use crate::core::recovery::{RecoveryClassifier, RecoveryOutcome, is_blocking_popup};
use crate::core::room_selector::select_rooms;
use crate::core::session::SessionState;
use crate::core::signal::Signal;
use crate::core::state::{FarmState, FinishStage};
use crate::io::config::{FarmerConfig, secs};
use crate::recover::recover;
use crate::verify::{ClickStyle, Host, SuccessCondition, Verifier};

pub struct FarmMachine<'a> {
    host: Host<'a>,
    config: &'a FarmerConfig,
    classifier: RecoveryClassifier,
    session: SessionState,
    /// Game-start button located by the restart handler, clicked without re-scanning.
    prefound_start: Option<Detection>,
    /// Budget for consecutive room-list rescans.
    scan_deadline: Option<Deadline>,
    /// Budget for recoveries since the last completed run or relaunch.
    recovery_deadline: Option<Deadline>,
}

impl<'a> FarmMachine<'a> {
    pub fn new(host: Host<'a>, config: &'a FarmerConfig, session: SessionState) -> Result<Self> {
        Ok(Self {
            host,
            config,
            classifier: config.classifier()?,
            session,
            prefound_start: None,
            scan_deadline: None,
            recovery_deadline: None,
        })
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Run until a fatal error. The loop has no other exit.
    pub fn run(&mut self) -> FarmError {
        loop {
            if let Err(err) = self.step() {
                return err;
            }
        }
    }

    /// Execute the current state's handler once and move to the next state.
    pub fn step(&mut self) -> Result<FarmState, FarmError> {
        let state = self.session.current;
        let span = info_span!("run", n = self.session.run_number());
        let _enter = span.enter();
        info!(%state, "entering state");

        let next = match self.handle(state) {
            Ok(next) => next,
            Err(err) if err.is_recoverable() => {
                warn!(%state, %err, "expected signal missing, attempting recovery");
                self.recover(err.tag())?
            }
            Err(err) => {
                error!(%state, %err, "fatal");
                let tag = format!("{}_run{}", err.tag(), self.session.run_count());
                self.host
                    .diagnostics
                    .capture(&tag, self.session.capture_region());
                return Err(err);
            }
        };

        if next != FarmState::ScanRooms {
            self.scan_deadline = None;
        }
        if next != state {
            info!(from = %state, to = %next, "transition");
        }
        self.session.current = next;
        Ok(next)
    }

    fn handle(&mut self, state: FarmState) -> Result<FarmState, FarmError> {
        match state {
            FarmState::GameStartup => self.game_startup(),
            FarmState::Menu => self.menu(),
            FarmState::EnterRoomList => self.enter_room_list(),
            FarmState::ScanRooms => self.scan_rooms(),
            FarmState::Ready => self.ready(),
            FarmState::CheckRunStart => self.check_run_start(),
            FarmState::Running => self.running(),
            FarmState::Finish => self.finish(),
            FarmState::RestartGame => self.restart_game(),
        }
    }

    fn recover(&mut self, tag: &str) -> Result<FarmState, FarmError> {
        let window = self.session.require_window()?;
        let now = self.host.clock.now();
        let budget = Duration::from_secs(self.config.restart.recovery_budget_secs);
        let deadline = *self
            .recovery_deadline
            .get_or_insert_with(|| Deadline::after(now, budget));
        if deadline.is_expired(now) {
            warn!(
                budget_secs = budget.as_secs(),
                "recovery made no progress within budget, restarting game"
            );
            self.recovery_deadline = None;
            let tag = format!("recovery_budget_exhausted_run{}", self.session.run_count());
            self.host.diagnostics.capture(&tag, Some(window.region));
            return Ok(FarmState::RestartGame);
        }

        let report = recover(
            self.host,
            &self.classifier,
            window.region,
            self.config.matching.normal,
            tag,
            self.session.run_count(),
        );
        if let RecoveryOutcome::Resolved { signal, .. } = report.outcome
            && is_blocking_popup(signal)
            && let Some(popup) = report.visible.iter().find(|d| d.signal == signal)
        {
            info!(%signal, "dismissing popup");
            let v = self.verifier()?;
            v.click_detection(popup, ClickStyle::Anywhere);
            v.sleep(secs(self.config.timing.popup_dismiss_delay));
        }
        Ok(report.outcome.next_state())
    }

    fn verifier(&self) -> Result<Verifier<'a>, FarmError> {
        let window = self.session.require_window()?;
        Ok(Verifier::new(
            self.host,
            self.config,
            window.region,
            Some(window.handle),
        ))
    }

    fn game_startup(&mut self) -> Result<FarmState, FarmError> {
        let t = &self.config.timing;
        let v = self.verifier()?;

        if let Some(start) = self.prefound_start.take() {
            info!("clicking game start button found during relaunch");
            v.click_point(start.center(), Signal::GameStart.key());
        } else if !v.poll_and_click(
            Signal::GameStart,
            secs(t.game_start_timeout),
            ClickStyle::CENTERED,
        ) {
            return Err(FarmError::timeout("timeout_game_start"));
        }

        let step = secs(t.startup_step_timeout);
        if !v.poll_and_click(Signal::CloseNews, step, ClickStyle::Anywhere) {
            return Err(FarmError::timeout("timeout_close_news"));
        }
        v.sleep(secs(t.news_settle));

        if !v.poll_and_click(Signal::Coop1, step, ClickStyle::Anywhere) {
            return Err(FarmError::timeout("timeout_coop_1"));
        }
        v.sleep(secs(t.coop_settle));

        if !v.poll_and_click(Signal::Coop2, step, ClickStyle::Anywhere) {
            return Err(FarmError::timeout("timeout_coop_2"));
        }
        v.sleep(secs(t.coop_menu_settle));

        info!("startup navigation complete");
        Ok(FarmState::Menu)
    }

    fn menu(&mut self) -> Result<FarmState, FarmError> {
        let t = &self.config.timing;
        let v = self.verifier()?;
        info!(run = self.session.run_number(), "starting run");

        // The co-op banner only expands to the quest after one or more clicks.
        let deadline = v.deadline(secs(t.menu_timeout));
        let mut quest_visible = false;
        loop {
            if v.find(Signal::OpenCoopQuest).is_some() {
                quest_visible = true;
                break;
            }
            if deadline.is_expired(self.host.clock.now()) {
                break;
            }
            if !v.poll_and_click(
                Signal::CoopQuest,
                secs(t.coop_quest_timeout),
                ClickStyle::Anywhere,
            ) {
                warn!("co-op quest button not found");
                break;
            }
            v.sleep(secs(t.coop_settle));
        }
        if !quest_visible {
            return Err(FarmError::timeout("fail_open_coop_appear"));
        }

        let Some(quest) = v.wait_for(
            Signal::OpenCoopQuest,
            secs(t.quest_click_timeout),
            secs(t.action_poll),
        ) else {
            return Err(FarmError::timeout("timeout_open_coop_quest"));
        };
        if !v.click_and_verify(
            &quest,
            ClickStyle::Anywhere,
            SuccessCondition::Appears(Signal::EnterRoom),
            secs(t.room_list_arrival),
        ) {
            return Err(FarmError::ActionNotConfirmed {
                tag: "fail_menu_navigation",
            });
        }
        Ok(FarmState::EnterRoomList)
    }

    fn enter_room_list(&mut self) -> Result<FarmState, FarmError> {
        let t = &self.config.timing;
        let v = self.verifier()?;

        let Some(button) = v.wait_for(
            Signal::EnterRoom,
            secs(t.enter_room_timeout),
            secs(t.action_poll),
        ) else {
            return Err(FarmError::timeout("timeout_enter_room_button"));
        };
        if !v.click_and_verify(
            &button,
            ClickStyle::CENTERED,
            SuccessCondition::Appears(Signal::AutoMarker),
            secs(t.room_load_timeout),
        ) {
            return Err(FarmError::ActionNotConfirmed {
                tag: "room_list_load_timeout",
            });
        }
        info!("room list loaded");
        v.sleep(secs(t.room_load_delay));
        Ok(FarmState::ScanRooms)
    }

    fn scan_rooms(&mut self) -> Result<FarmState, FarmError> {
        let t = &self.config.timing;
        let v = self.verifier()?;

        let budget = Duration::from_secs(self.config.rooms.scan_budget_secs);
        let deadline = *self.scan_deadline.get_or_insert_with(|| v.deadline(budget));
        if deadline.is_expired(self.host.clock.now()) {
            self.scan_deadline = None;
            return Err(FarmError::timeout("scan_budget_exhausted"));
        }

        let markers = v.find_all(Signal::AutoMarker);
        let companions = v.find_all(Signal::RoomRules);
        let rooms = select_rooms(&markers, &companions, &self.config.rooms.selector_params());
        info!(
            markers = markers.len(),
            companions = companions.len(),
            valid = rooms.len(),
            "room scan"
        );

        let Some(room) = rooms.first() else {
            info!("no valid rooms, searching again");
            if !v.poll_and_click(
                Signal::SearchAgain,
                secs(t.search_again_timeout),
                ClickStyle::Anywhere,
            ) {
                return Err(FarmError::timeout("timeout_search_again"));
            }
            v.sleep(secs(t.search_again_delay));
            return Ok(FarmState::ScanRooms);
        };

        let target = room.join_point();
        info!(x = target.x, y = target.y, distance = room.distance(), "joining room");
        if !v.click_point(target, "room join") {
            return Ok(FarmState::ScanRooms);
        }

        let outcome = v.wait_for_any(
            &[Signal::ReadyButton, Signal::RoomClosed, Signal::Close],
            secs(t.join_timeout),
            secs(t.room_list_poll),
        );
        match outcome.map(|d| (d.signal, d)) {
            Some((Signal::ReadyButton, _)) => {
                info!("room joined");
                Ok(FarmState::Ready)
            }
            Some((Signal::RoomClosed, popup)) => {
                info!("room full, returning to menu");
                v.click_detection(&popup, ClickStyle::Anywhere);
                v.sleep(secs(t.popup_dismiss_delay));
                Ok(FarmState::Menu)
            }
            Some((_, popup)) => {
                info!("room unavailable, rescanning");
                v.click_detection(&popup, ClickStyle::Anywhere);
                v.sleep(secs(t.popup_dismiss_delay));
                Ok(FarmState::ScanRooms)
            }
            None => {
                warn!("join click had no visible effect, rescanning");
                Ok(FarmState::ScanRooms)
            }
        }
    }

    fn ready(&mut self) -> Result<FarmState, FarmError> {
        let t = &self.config.timing;
        let v = self.verifier()?;

        let deadline = v.deadline(secs(t.ready_timeout));
        loop {
            if let Some(closed) = v.find(Signal::RoomClosed) {
                info!("room closed while waiting to ready up");
                v.click_detection(&closed, ClickStyle::Anywhere);
                v.sleep(secs(t.popup_dismiss_delay));
                return Ok(FarmState::Menu);
            }
            if let Some(button) = v.find(Signal::ReadyButton) {
                v.sleep(secs(t.ready_settle));
                if v.perform_and_verify(
                    Signal::ReadyButton,
                    button.center(),
                    SuccessCondition::Vanishes,
                    secs(t.ready_vanish_timeout),
                ) {
                    info!("ready confirmed");
                    return Ok(FarmState::CheckRunStart);
                }
                warn!("ready button still visible, retrying");
            }
            if !v.pause_until(&deadline, secs(t.ready_poll)) {
                return Err(FarmError::timeout("timeout_ready"));
            }
        }
    }

    fn check_run_start(&mut self) -> Result<FarmState, FarmError> {
        let t = &self.config.timing;
        let v = self.verifier()?;

        let deadline = v.deadline(secs(t.check_run_start_timeout));
        loop {
            if let Some(toggle) = v.find(Signal::IngameAutoOff) {
                info!("run started with auto off, enabling it");
                v.sleep(secs(t.ingame_auto_ready_delay));
                if !v.click_and_verify(
                    &toggle,
                    ClickStyle::TOGGLE,
                    SuccessCondition::Vanishes,
                    secs(t.toggle_confirm_timeout),
                ) {
                    warn!("auto toggle did not change, continuing");
                }
                return Ok(FarmState::Running);
            }
            if v.find(Signal::IngameAutoOn).is_some() {
                info!("run started with auto already on");
                return Ok(FarmState::Running);
            }
            if let Some(closed) = v.find(Signal::RoomClosed) {
                info!("room closed by owner");
                v.click_detection(&closed, ClickStyle::Anywhere);
                v.sleep(secs(t.retirement_step_delay));
                return Ok(FarmState::Menu);
            }
            if let Some(popup) = v.find(Signal::Close) {
                info!("disconnected before run start");
                v.click_detection(&popup, ClickStyle::Anywhere);
                v.sleep(secs(t.disconnect_recovery_delay));
                return Ok(FarmState::Menu);
            }
            if !v.pause_until(&deadline, secs(t.run_start_poll)) {
                break;
            }
        }

        warn!(
            timeout_secs = t.check_run_start_timeout,
            "run did not start, leaving lobby"
        );
        self.retire(&v)
    }

    /// Leave a stalled lobby: retire, confirm, dismiss.
    fn retire(&self, v: &Verifier<'_>) -> Result<FarmState, FarmError> {
        let t = &self.config.timing;
        let Some(retire) = v.find(Signal::Retire) else {
            warn!("no retire button, game likely stuck loading");
            return Ok(FarmState::RestartGame);
        };
        v.click_detection(&retire, ClickStyle::Anywhere);
        v.sleep(secs(t.retirement_step_delay));

        let confirm = secs(t.retire_confirm_timeout);
        if !v.poll_and_click(Signal::Okay, confirm, ClickStyle::Anywhere) {
            return Err(FarmError::timeout("timeout_retire_okay"));
        }
        v.sleep(secs(t.retirement_step_delay));

        if !v.poll_and_click(Signal::RoomClosed, confirm, ClickStyle::Anywhere) {
            return Err(FarmError::timeout("timeout_final_retire_confirm"));
        }
        v.sleep(secs(t.retirement_step_delay));
        info!("retired from room");
        Ok(FarmState::Menu)
    }

    fn running(&mut self) -> Result<FarmState, FarmError> {
        let t = &self.config.timing;
        let v = self.verifier()?;

        let started = self.host.clock.now();
        let deadline = v.deadline(secs(t.quest_max_time));
        loop {
            if v.find(Signal::Tap1).is_some() {
                let elapsed = self.host.clock.now().duration_since(started);
                info!(elapsed_secs = elapsed.as_secs(), "quest completed");
                return Ok(FarmState::Finish);
            }
            if let Some(popup) = v.find(Signal::Close) {
                warn!("disconnected mid-run, dismissing and continuing");
                v.click_detection(&popup, ClickStyle::Anywhere);
            }
            if !v.pause_until(&deadline, secs(t.quest_poll)) {
                return Err(FarmError::timeout("quest_timeout"));
            }
        }
    }

    fn finish(&mut self) -> Result<FarmState, FarmError> {
        let t = &self.config.timing;
        let v = self.verifier()?;

        let stage = FinishStage::detect(
            v.find(Signal::Tap1).is_some(),
            v.find(Signal::Tap2).is_some(),
            v.find(Signal::Retry).is_some(),
        );
        let Some(stage) = stage else {
            return Err(FarmError::timeout("no_finish_buttons"));
        };
        if stage != FinishStage::Tap1 {
            info!(?stage, "resuming acknowledgement sequence");
        }

        for step in stage.remaining() {
            let (timeout, style, pause, tag) = match step {
                FinishStage::Tap1 => (t.tap1_timeout, ClickStyle::CENTERED, t.tap_pause, "timeout_tap1"),
                FinishStage::Tap2 => (
                    t.tap2_timeout,
                    ClickStyle::CENTERED,
                    t.screen_transition_delay,
                    "timeout_tap2",
                ),
                FinishStage::Retry => (t.retry_timeout, ClickStyle::Anywhere, t.retry_pause, "timeout_retry"),
            };
            if !v.poll_and_click(step.signal(), secs(timeout), style) {
                return Err(FarmError::timeout(tag));
            }
            v.sleep(secs(pause));
        }

        info!(run = self.session.run_number(), "run completed");
        self.session.complete_run();
        self.recovery_deadline = None;
        v.sleep(secs(t.final_pause));
        Ok(FarmState::EnterRoomList)
    }

    fn restart_game(&mut self) -> Result<FarmState, FarmError> {
        let max = self.config.restart.max_restarts;
        let attempt = self.session.begin_restart(max)?;
        warn!(attempt, max, "restarting game");

        let launch = &self.config.launch;
        if let Err(err) = self.host.launcher.kill() {
            warn!(err = %format!("{err:#}"), "failed to stop game process");
        }
        self.host.clock.sleep(Duration::from_secs(launch.kill_settle_secs));
        self.host
            .launcher
            .launch()
            .map_err(|err| FarmError::environment(format!("launch game: {err:#}")))?;

        let screen = self
            .host
            .desktop
            .screen_region()
            .map_err(|err| FarmError::environment(format!("{err:#}")))?;
        let full_screen = Verifier::new(self.host, self.config, screen, None);
        let Some(start) = full_screen.wait_for(
            Signal::GameStart,
            Duration::from_secs(launch.launch_timeout_secs),
            Duration::from_secs(launch.launch_poll_secs),
        ) else {
            return Err(FarmError::environment(format!(
                "game did not show its start screen within {}s",
                launch.launch_timeout_secs
            )));
        };
        info!("game launched");

        let window = self
            .host
            .desktop
            .find_window()
            .map_err(|err| FarmError::environment(format!("{err:#}")))?
            .ok_or_else(|| FarmError::environment("game window not found after relaunch"))?;
        info!(wid = window.handle.0, region = ?window.region, "window rediscovered");
        if self.config.window.always_on_top
            && let Err(err) = self.host.desktop.pin_on_top(window.handle)
        {
            warn!(err = %format!("{err:#}"), "failed to pin window on top");
        }
        self.session.rebind_window(window);
        self.prefound_start = Some(start);
        self.recovery_deadline = None;
        Ok(FarmState::GameStartup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::Region;
    use crate::test_support::{Effect, ScriptedScreen, region, start_session};

    fn machine<'a>(
        screen: &'a ScriptedScreen,
        cfg: &'a FarmerConfig,
        state: FarmState,
    ) -> FarmMachine<'a> {
        FarmMachine::new(screen.host(), cfg, start_session(screen, state)).expect("machine")
    }

    #[test]
    fn empty_room_list_searches_again() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::SearchAgain, region(900, 900));
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::ScanRooms);

        assert_eq!(farm.step(), Ok(FarmState::ScanRooms));
        assert_eq!(screen.clicks_on(Signal::SearchAgain), 1);
    }

    #[test]
    fn joins_the_room_paired_below_the_marker() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::AutoMarker, Region::new(290, 490, 20, 20));
        screen.show(Signal::RoomRules, Region::new(260, 440, 80, 20));
        screen.show(Signal::RoomRules, Region::new(260, 550, 80, 20));
        // marker.left = 290, companion.right = 340, marker row y = 500
        screen.on_click_area(
            Region::new(314, 499, 3, 3),
            Effect::new().show(Signal::ReadyButton, region(800, 800)),
        );
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::ScanRooms);

        assert_eq!(farm.step(), Ok(FarmState::Ready));
        assert_eq!(screen.click_points()[0], crate::core::geometry::Point::new(315, 500));
    }

    #[test]
    fn full_room_popup_returns_to_menu() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::AutoMarker, Region::new(290, 490, 20, 20));
        screen.show(Signal::RoomRules, Region::new(260, 550, 80, 20));
        screen.on_click_area(
            Region::new(300, 480, 40, 40),
            Effect::new().show(Signal::RoomClosed, region(960, 540)),
        );
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::ScanRooms);

        assert_eq!(farm.step(), Ok(FarmState::Menu));
        assert_eq!(screen.clicks_on(Signal::RoomClosed), 1);
    }

    #[test]
    fn rescans_share_one_budget() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::SearchAgain, region(900, 900));
        let mut cfg = FarmerConfig::default();
        cfg.rooms.scan_budget_secs = 20;
        let mut farm = machine(&screen, &cfg, FarmState::ScanRooms);

        while screen.elapsed() < Duration::from_secs(20) {
            assert_eq!(farm.step(), Ok(FarmState::ScanRooms));
        }
        let searches = screen.clicks_on(Signal::SearchAgain);
        // Budget spent: recovery runs instead of another search, then a fresh budget starts.
        assert_eq!(farm.step(), Ok(FarmState::ScanRooms));
        assert_eq!(screen.clicks_on(Signal::SearchAgain), searches);
        assert_eq!(farm.step(), Ok(FarmState::ScanRooms));
        assert_eq!(screen.clicks_on(Signal::SearchAgain), searches + 1);
    }

    #[test]
    fn exhausted_scan_budget_on_blank_screen_restarts() {
        let screen = ScriptedScreen::new();
        let mut cfg = FarmerConfig::default();
        cfg.rooms.scan_budget_secs = 0;
        let mut farm = machine(&screen, &cfg, FarmState::ScanRooms);

        assert_eq!(farm.step(), Ok(FarmState::RestartGame));
        assert_eq!(screen.captures(), vec!["scan_budget_exhausted_run0".to_string()]);
    }

    #[test]
    fn running_and_finish_visible_recover_to_running() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::IngameAutoOn, region(1200, 100));
        screen.show(Signal::Tap1, region(600, 500));
        let cfg = FarmerConfig::default();
        // READY times out because no ready button is visible.
        let mut farm = machine(&screen, &cfg, FarmState::Ready);

        assert_eq!(farm.step(), Ok(FarmState::Running));
    }

    #[test]
    fn blank_screen_after_timeout_requests_restart() {
        let screen = ScriptedScreen::new();
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::Running);

        assert_eq!(farm.step(), Ok(FarmState::RestartGame));
        assert_eq!(screen.captures(), vec!["quest_timeout_run0".to_string()]);
    }

    #[test]
    fn finish_resumes_at_retry_only() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::Retry, region(960, 900));
        screen.on_click(Signal::Retry, Effect::new().hide(Signal::Retry));
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::Finish);

        assert_eq!(farm.step(), Ok(FarmState::EnterRoomList));
        assert_eq!(screen.clicks_on(Signal::Retry), 1);
        assert_eq!(screen.clicks_on(Signal::Tap1), 0);
        assert_eq!(screen.clicks_on(Signal::Tap2), 0);
        assert_eq!(farm.session().run_count(), 1);
    }

    #[test]
    fn finish_walks_the_whole_sequence_from_tap1() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::Tap1, region(960, 800));
        screen.on_click(
            Signal::Tap1,
            Effect::new().hide(Signal::Tap1).show(Signal::Tap2, region(960, 850)),
        );
        screen.on_click(
            Signal::Tap2,
            Effect::new().hide(Signal::Tap2).show(Signal::Retry, region(960, 900)),
        );
        screen.on_click(Signal::Retry, Effect::new().hide(Signal::Retry));
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::Finish);

        assert_eq!(farm.step(), Ok(FarmState::EnterRoomList));
        assert_eq!(screen.clicked_signals(), vec![Signal::Tap1, Signal::Tap2, Signal::Retry]);
    }

    #[test]
    fn restart_budget_exhaustion_is_fatal_without_relaunch() {
        let screen = ScriptedScreen::new();
        let cfg = FarmerConfig::default();
        let mut session = start_session(&screen, FarmState::RestartGame);
        session.restart_attempts = cfg.restart.max_restarts;
        let mut farm = FarmMachine::new(screen.host(), &cfg, session).expect("machine");

        let err = farm.step().expect_err("fatal");
        assert_eq!(
            err,
            FarmError::RestartBudgetExceeded {
                attempts: cfg.restart.max_restarts + 1,
                max: cfg.restart.max_restarts,
            }
        );
        assert_eq!(screen.launches(), 0);
        assert_eq!(screen.captures(), vec!["max_restarts_reached_run0".to_string()]);
    }

    #[test]
    fn restart_relaunches_and_reuses_found_start_button() {
        let screen = ScriptedScreen::new();
        screen.on_launch(Effect::new().show(Signal::GameStart, region(960, 700)));
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::RestartGame);

        assert_eq!(farm.step(), Ok(FarmState::GameStartup));
        assert_eq!(screen.kills(), 1);
        assert_eq!(screen.launches(), 1);
        assert_eq!(farm.session().restart_attempts(), 1);

        screen.on_click(
            Signal::GameStart,
            Effect::new().hide(Signal::GameStart).show(Signal::CloseNews, region(1500, 200)),
        );
        screen.on_click(
            Signal::CloseNews,
            Effect::new().hide(Signal::CloseNews).show(Signal::Coop1, region(300, 900)),
        );
        screen.on_click(
            Signal::Coop1,
            Effect::new().hide(Signal::Coop1).show(Signal::Coop2, region(300, 600)),
        );
        screen.on_click(Signal::Coop2, Effect::new().hide(Signal::Coop2));
        let before = screen.locate_calls(Signal::GameStart);
        assert_eq!(farm.step(), Ok(FarmState::Menu));
        assert_eq!(screen.locate_calls(Signal::GameStart), before);
        assert_eq!(screen.clicks_on(Signal::GameStart), 1);
    }

    #[test]
    fn launch_without_start_screen_is_an_environment_failure() {
        let screen = ScriptedScreen::new();
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::RestartGame);

        let err = farm.step().expect_err("fatal");
        assert!(matches!(err, FarmError::Environment(_)));
        assert_eq!(screen.captures(), vec!["environment_failure_run0".to_string()]);
    }

    #[test]
    fn stalled_lobby_retires_back_to_menu() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::Retire, region(200, 900));
        screen.on_click(
            Signal::Retire,
            Effect::new().hide(Signal::Retire).show(Signal::Okay, region(960, 600)),
        );
        screen.on_click(
            Signal::Okay,
            Effect::new().hide(Signal::Okay).show(Signal::RoomClosed, region(960, 540)),
        );
        screen.on_click(Signal::RoomClosed, Effect::new().hide(Signal::RoomClosed));
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::CheckRunStart);

        assert_eq!(farm.step(), Ok(FarmState::Menu));
        assert_eq!(
            screen.clicked_signals(),
            vec![Signal::Retire, Signal::Okay, Signal::RoomClosed]
        );
    }

    #[test]
    fn stalled_lobby_without_retire_restarts_game() {
        let screen = ScriptedScreen::new();
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::CheckRunStart);
        assert_eq!(farm.step(), Ok(FarmState::RestartGame));
    }

    #[test]
    fn auto_off_toggle_is_switched_on() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::IngameAutoOff, region(1800, 80));
        screen.on_click(
            Signal::IngameAutoOff,
            Effect::new()
                .hide(Signal::IngameAutoOff)
                .show(Signal::IngameAutoOn, region(1800, 80)),
        );
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::CheckRunStart);

        assert_eq!(farm.step(), Ok(FarmState::Running));
        assert_eq!(screen.clicks_on(Signal::IngameAutoOff), 1);
    }

    #[test]
    fn ready_click_that_does_not_take_is_retried() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::ReadyButton, region(1600, 950));
        screen.on_click_nth(Signal::ReadyButton, 2, Effect::new().hide(Signal::ReadyButton));
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::Ready);

        assert_eq!(farm.step(), Ok(FarmState::CheckRunStart));
        assert_eq!(screen.clicks_on(Signal::ReadyButton), 2);
    }

    #[test]
    fn disconnect_mid_run_is_dismissed_and_run_continues() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::Close, region(960, 600));
        screen.on_click(Signal::Close, Effect::new().hide(Signal::Close));
        screen.schedule(
            Duration::from_secs(60),
            Effect::new().show(Signal::Tap1, region(960, 800)),
        );
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::Running);

        assert_eq!(farm.step(), Ok(FarmState::Finish));
        assert_eq!(screen.clicks_on(Signal::Close), 1);
    }

    #[test]
    fn lost_window_is_fatal() {
        let screen = ScriptedScreen::new();
        let cfg = FarmerConfig::default();
        let session = SessionState::new(FarmState::Menu, None);
        let mut farm = FarmMachine::new(screen.host(), &cfg, session).expect("machine");
        assert!(matches!(farm.step(), Err(FarmError::Environment(_))));
    }

    #[test]
    fn lingering_popup_is_dismissed_during_recovery() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::Close, region(960, 700));
        screen.on_click(Signal::Close, Effect::new().hide(Signal::Close));
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::Menu);

        assert_eq!(farm.step(), Ok(FarmState::Menu));
        assert_eq!(screen.clicks_on(Signal::Close), 1);
        assert!(screen.captures().is_empty());
    }

    #[test]
    fn popup_that_never_clears_escalates_to_restart() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::Close, region(960, 700));
        let mut cfg = FarmerConfig::default();
        cfg.restart.recovery_budget_secs = 60;
        cfg.restart.max_restarts = 0;
        let mut farm = machine(&screen, &cfg, FarmState::Menu);

        let fatal = farm.run();

        assert_eq!(fatal, FarmError::RestartBudgetExceeded { attempts: 1, max: 0 });
        assert!(screen.clicks_on(Signal::Close) >= 1);
        assert!(screen.elapsed() >= Duration::from_secs(60));
        assert!(screen.elapsed() < Duration::from_secs(120));
        assert_eq!(
            screen.captures(),
            vec![
                "recovery_budget_exhausted_run0".to_string(),
                "max_restarts_reached_run0".to_string(),
            ]
        );
    }

    #[test]
    fn companion_matched_at_loose_confidence_still_pairs() {
        let screen = ScriptedScreen::new();
        screen.show(Signal::AutoMarker, Region::new(290, 490, 20, 20));
        screen.show_with_confidence(Signal::RoomRules, Region::new(260, 550, 80, 20), 0.75);
        screen.on_click_area(
            Region::new(300, 480, 40, 40),
            Effect::new().show_with_confidence(Signal::ReadyButton, region(800, 800), 0.75),
        );
        screen.show(Signal::SearchAgain, region(1700, 1000));
        let cfg = FarmerConfig::default();
        let mut farm = machine(&screen, &cfg, FarmState::ScanRooms);

        // The join lands, but a ready button below the normal tier is not trusted.
        assert_eq!(farm.step(), Ok(FarmState::ScanRooms));
        assert_eq!(screen.click_points().len(), 1);
        assert_eq!(screen.clicks_on(Signal::SearchAgain), 0);
    }
}
