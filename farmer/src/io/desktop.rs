//! Window discovery and input injection on an X11 desktop.

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::geometry::{Point, Region};
use crate::core::session::{GameWindow, WindowHandle};
use crate::io::clock::{Clock, SystemClock};
use crate::io::config::WindowConfig;
use crate::io::process::{DEFAULT_OUTPUT_LIMIT, run_checked, run_command_with_timeout};

const TOOL_TIMEOUT: Duration = Duration::from_secs(5);

pub trait Desktop {
    /// The game window, if one is open and belongs to the game process.
    fn find_window(&self) -> Result<Option<GameWindow>>;

    /// The whole display, for searches that must not assume a window.
    fn screen_region(&self) -> Result<Region>;

    /// Click `point` (screen coordinates) in `window` and hand focus back to
    /// whatever was active before.
    fn click(&self, window: WindowHandle, point: Point) -> Result<()>;

    /// Keep `window` sticky and above other windows.
    fn pin_on_top(&self, window: WindowHandle) -> Result<()>;
}

/// `xdotool`/`wmctrl` backed desktop. The focus-restore pause runs on `clock`.
#[derive(Debug, Clone)]
pub struct X11Desktop<C = SystemClock> {
    title: String,
    process_markers: Vec<String>,
    focus_restore: Duration,
    clock: C,
}

impl<C: Clock> X11Desktop<C> {
    pub fn new(cfg: &WindowConfig, focus_restore: Duration, clock: C) -> Self {
        Self {
            title: cfg.title.clone(),
            process_markers: cfg.process_markers.clone(),
            focus_restore,
            clock,
        }
    }

    fn is_game_process(&self, wid: &str) -> Result<bool> {
        let pid = run_checked(&["xdotool", "getwindowpid", wid], TOOL_TIMEOUT)?;
        let pid: u32 = pid
            .parse()
            .with_context(|| format!("parse pid {pid:?}"))?;
        let raw = fs::read(format!("/proc/{pid}/cmdline"))
            .with_context(|| format!("read cmdline of pid {pid}"))?;
        Ok(cmdline_matches(&raw, &self.process_markers))
    }

    fn window_region(&self, wid: &str) -> Result<Region> {
        let shell = run_checked(&["xdotool", "getwindowgeometry", "--shell", wid], TOOL_TIMEOUT)?;
        let geometry = parse_window_geometry(&shell)?;
        let screen = self.screen_region()?;
        Ok(clamp_to_screen(geometry, screen))
    }
}

impl<C: Clock> Desktop for X11Desktop<C> {
    #[instrument(skip_all, fields(title = %self.title))]
    fn find_window(&self) -> Result<Option<GameWindow>> {
        let pattern = format!("^{}$", regex::escape(&self.title));
        let mut cmd = std::process::Command::new("xdotool");
        cmd.args(["search", "--onlyvisible", "--name", pattern.as_str()]);
        let output = run_command_with_timeout(cmd, TOOL_TIMEOUT, DEFAULT_OUTPUT_LIMIT)?;
        // xdotool exits non-zero when nothing matches.
        if !output.status.success() {
            debug!("no window with matching title");
            return Ok(None);
        }

        for wid in parse_window_ids(&output.stdout_text()) {
            let wid_arg = wid.to_string();
            match self.is_game_process(&wid_arg) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(wid, "title matches but process does not");
                    continue;
                }
                Err(err) => {
                    debug!(wid, err = %format!("{err:#}"), "skipping window");
                    continue;
                }
            }
            let region = self.window_region(&wid_arg)?;
            info!(wid, ?region, "found game window");
            return Ok(Some(GameWindow {
                handle: WindowHandle(wid),
                region,
            }));
        }
        Ok(None)
    }

    fn screen_region(&self) -> Result<Region> {
        let out = run_checked(&["xdotool", "getdisplaygeometry"], TOOL_TIMEOUT)?;
        let (width, height) = parse_display_geometry(&out)?;
        Ok(Region::new(0, 0, width, height))
    }

    #[instrument(skip_all, fields(wid = window.0, x = point.x, y = point.y))]
    fn click(&self, window: WindowHandle, point: Point) -> Result<()> {
        let previous = run_checked(&["xdotool", "getactivewindow"], TOOL_TIMEOUT).ok();
        let wid = window.0.to_string();
        let (x, y) = (point.x.to_string(), point.y.to_string());
        run_checked(
            &[
                "xdotool",
                "windowactivate",
                "--sync",
                wid.as_str(),
                "mousemove",
                x.as_str(),
                y.as_str(),
                "click",
                "1",
            ],
            TOOL_TIMEOUT,
        )
        .context("send click")?;

        if let Some(previous) = focus_to_restore(previous, &wid) {
            self.clock.sleep(self.focus_restore);
            let restored = run_checked(
                &[
                    "xdotool",
                    "windowactivate",
                    "--sync",
                    previous.as_str(),
                    "windowraise",
                    previous.as_str(),
                ],
                TOOL_TIMEOUT,
            );
            if let Err(err) = restored {
                warn!(previous = %previous, err = %format!("{err:#}"), "failed to restore focus");
            }
        }
        debug!("click sent");
        Ok(())
    }

    fn pin_on_top(&self, window: WindowHandle) -> Result<()> {
        let id = format!("0x{:08x}", window.0);
        run_checked(
            &["wmctrl", "-i", "-r", id.as_str(), "-b", "add,sticky,above"],
            TOOL_TIMEOUT,
        )
        .context("pin window on top")?;
        info!(wid = window.0, "window pinned sticky and above");
        Ok(())
    }
}

fn parse_window_ids(stdout: &str) -> Vec<u64> {
    stdout
        .split_whitespace()
        .filter_map(|id| id.parse().ok())
        .collect()
}

/// Whether a NUL-separated `/proc/<pid>/cmdline` mentions any marker.
fn cmdline_matches(raw: &[u8], markers: &[String]) -> bool {
    let cmdline = String::from_utf8_lossy(raw).replace('\0', " ");
    markers
        .iter()
        .filter(|marker| !marker.is_empty())
        .any(|marker| cmdline.contains(marker.as_str()))
}

/// Parse `xdotool getwindowgeometry --shell` output.
fn parse_window_geometry(shell: &str) -> Result<Region> {
    let fields: HashMap<&str, i32> = shell
        .lines()
        .filter_map(|line| line.split_once('='))
        .filter_map(|(key, value)| value.trim().parse().ok().map(|v| (key.trim(), v)))
        .collect();
    let field = |name: &str| {
        fields
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("window geometry missing {name}"))
    };
    Ok(Region::new(
        field("X")?,
        field("Y")?,
        field("WIDTH")?,
        field("HEIGHT")?,
    ))
}

/// The previously active window, unless it was the game itself or unknown.
fn focus_to_restore(previous: Option<String>, wid: &str) -> Option<String> {
    previous.filter(|prev| !prev.is_empty() && prev != wid)
}

fn parse_display_geometry(out: &str) -> Result<(i32, i32)> {
    let mut parts = out.split_whitespace().map(str::parse::<i32>);
    match (parts.next(), parts.next()) {
        (Some(Ok(width)), Some(Ok(height))) if width > 0 && height > 0 => Ok((width, height)),
        _ => Err(anyhow!("unexpected display geometry {out:?}")),
    }
}

/// Keep the window inside the display and at least one pixel in size.
fn clamp_to_screen(window: Region, screen: Region) -> Region {
    let left = window.left.clamp(0, screen.width);
    let top = window.top.clamp(0, screen.height);
    let width = window.width.min(screen.width - left).max(1);
    let height = window.height.min(screen.height - top).max(1);
    Region::new(left, top, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shell_geometry() {
        let shell = "WINDOW=71303175\nX=120\nY=45\nWIDTH=1280\nHEIGHT=720\nSCREEN=0\n";
        assert_eq!(
            parse_window_geometry(shell).expect("parse"),
            Region::new(120, 45, 1280, 720)
        );
        assert!(parse_window_geometry("X=1\nY=2\n").is_err());
    }

    #[test]
    fn parses_display_geometry() {
        assert_eq!(parse_display_geometry("1920 1080\n").expect("parse"), (1920, 1080));
        assert!(parse_display_geometry("garbage").is_err());
    }

    #[test]
    fn focus_goes_back_only_to_another_window() {
        assert_eq!(
            focus_to_restore(Some("777".to_string()), "123"),
            Some("777".to_string())
        );
        assert_eq!(focus_to_restore(Some("123".to_string()), "123"), None);
        assert_eq!(focus_to_restore(Some(String::new()), "123"), None);
        assert_eq!(focus_to_restore(None, "123"), None);
    }

    #[test]
    fn window_ids_skip_junk() {
        assert_eq!(parse_window_ids("123\n456\n\nabc\n"), vec![123, 456]);
    }

    #[test]
    fn cmdline_must_contain_a_marker() {
        let markers = vec!["BleachBraveSouls.exe".to_string()];
        let game = b"wine\0C:\\Games\\BleachBraveSouls.exe\0--windowed\0";
        let browser = b"firefox\0--new-tab\0";
        assert!(cmdline_matches(game, &markers));
        assert!(!cmdline_matches(browser, &markers));
    }

    #[test]
    fn window_partly_off_screen_is_clamped() {
        let screen = Region::new(0, 0, 1920, 1080);
        assert_eq!(
            clamp_to_screen(Region::new(-50, 100, 800, 600), screen),
            Region::new(0, 100, 800, 600)
        );
        assert_eq!(
            clamp_to_screen(Region::new(1800, 900, 800, 600), screen),
            Region::new(1800, 900, 120, 180)
        );
        assert_eq!(
            clamp_to_screen(Region::new(2500, 1200, 800, 600), screen).width,
            1
        );
    }
}
