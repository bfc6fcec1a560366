//! Orchestration for `farmer run`.
//!
//! Wires the live collaborators from config, binds the game window and hands
//! control to the state machine until it reports a fatal error.

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use crate::core::errors::FarmError;
use crate::core::session::{GameWindow, SessionState};
use crate::core::state::FarmState;
use crate::farm::FarmMachine;
use crate::io::capture::ScreenGrabber;
use crate::io::catalog::TemplateCatalog;
use crate::io::clock::SystemClock;
use crate::io::config::{FarmerConfig, secs};
use crate::io::desktop::X11Desktop;
use crate::io::diagnostics::ScreenshotDiagnostics;
use crate::io::launcher::ProcessLauncher;
use crate::io::matcher::TemplateMatcher;
use crate::verify::Host;

/// Production collaborators built from config.
pub struct LiveHost {
    matcher: TemplateMatcher<ScreenGrabber>,
    desktop: X11Desktop,
    launcher: ProcessLauncher,
    diagnostics: ScreenshotDiagnostics<ScreenGrabber>,
    clock: SystemClock,
}

impl LiveHost {
    /// Load the template catalog and build every collaborator.
    pub fn connect(config: &FarmerConfig) -> Result<Self> {
        let catalog = TemplateCatalog::load(&config.templates).context("load templates")?;
        info!(templates = catalog.len(), "template catalog loaded");
        let grabber = ScreenGrabber::new(&config.capture);
        Ok(Self {
            matcher: TemplateMatcher::new(grabber.clone(), catalog, config.matching.coarse_scale),
            desktop: X11Desktop::new(
                &config.window,
                secs(config.timing.focus_restore),
                SystemClock,
            ),
            launcher: ProcessLauncher::new(&config.launch),
            diagnostics: ScreenshotDiagnostics::new(grabber, config.diagnostics.dir.clone()),
            clock: SystemClock,
        })
    }

    pub fn host(&self) -> Host<'_> {
        Host {
            matcher: &self.matcher,
            desktop: &self.desktop,
            launcher: &self.launcher,
            diagnostics: &self.diagnostics,
            clock: &self.clock,
        }
    }
}

/// Locate the game window and pin it on top if configured.
#[instrument(skip_all)]
pub fn resolve_window(host: Host<'_>, config: &FarmerConfig) -> Result<GameWindow, FarmError> {
    let window = host
        .desktop
        .find_window()
        .map_err(|err| FarmError::environment(format!("{err:#}")))?
        .ok_or_else(|| {
            FarmError::environment(format!("game window '{}' not found", config.window.title))
        })?;
    info!(wid = window.handle.0, region = ?window.region, "game window found");
    if config.window.always_on_top
        && let Err(err) = host.desktop.pin_on_top(window.handle)
    {
        warn!(err = %format!("{err:#}"), "failed to pin window on top");
    }
    Ok(window)
}

/// Run the farming loop until it stops. Returns the fatal error that ended it.
///
/// The loop starts at MENU with the game already open. With `restart_first`
/// it begins by relaunching the game instead, so a missing window is not an
/// error.
pub fn start_farm(
    host: Host<'_>,
    config: &FarmerConfig,
    restart_first: bool,
) -> Result<FarmError> {
    let session = if restart_first {
        let window = resolve_window(host, config).ok();
        SessionState::new(FarmState::RestartGame, window)
    } else {
        match resolve_window(host, config) {
            Ok(window) => SessionState::new(FarmState::Menu, Some(window)),
            Err(err) => {
                error!(%err, "cannot start");
                host.diagnostics.capture(err.tag(), None);
                return Ok(err);
            }
        }
    };

    info!(initial = %session.current, "farming started");
    let mut farm = FarmMachine::new(host, config, session)?;
    let fatal = farm.run();
    info!(
        completed_runs = farm.session().run_count(),
        restart_attempts = farm.session().restart_attempts(),
        "farming stopped"
    );
    Ok(fatal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedScreen;

    #[test]
    fn missing_window_is_fatal_with_one_capture() {
        let screen = ScriptedScreen::new();
        screen.set_window(None);
        let cfg = FarmerConfig::default();

        let fatal = start_farm(screen.host(), &cfg, false).expect("start");
        assert!(matches!(fatal, FarmError::Environment(_)));
        assert_eq!(screen.captures(), vec!["environment_failure".to_string()]);
        assert_eq!(screen.clicks(), 0);
    }

    #[test]
    fn farming_starts_from_the_menu() {
        let screen = ScriptedScreen::new();
        let mut cfg = FarmerConfig::default();
        cfg.restart.max_restarts = 0;

        // Blank screen: the menu times out, recovery asks for a restart and
        // the zero budget ends the loop.
        let fatal = start_farm(screen.host(), &cfg, false).expect("start");
        assert!(matches!(fatal, FarmError::RestartBudgetExceeded { .. }));
        assert_eq!(
            screen.captures(),
            vec![
                "fail_open_coop_appear_run0".to_string(),
                "max_restarts_reached_run0".to_string(),
            ]
        );
    }

    #[test]
    fn restart_first_without_window_goes_straight_to_relaunch() {
        let screen = ScriptedScreen::new();
        screen.set_window(None);
        let mut cfg = FarmerConfig::default();
        cfg.restart.max_restarts = 0;

        let fatal = start_farm(screen.host(), &cfg, true).expect("start");
        assert_eq!(
            fatal,
            FarmError::RestartBudgetExceeded {
                attempts: 1,
                max: 0
            }
        );
        assert_eq!(screen.launches(), 0);
    }
}
