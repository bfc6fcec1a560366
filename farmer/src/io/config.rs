//! Farmer configuration stored in `farmer.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::recovery::{DEFAULT_PRIORITY, RecoveryClassifier};
use crate::core::room_selector::SelectorParams;
use crate::core::signal::{ConfidenceTier, Signal};
use crate::core::state::FarmState;

pub const DEFAULT_CONFIG_PATH: &str = "farmer.toml";

const WINDOW_TITLE_PATTERN: &str = r"^[a-zA-Z0-9\s:.-]+$";

/// Longest wait any timing entry may ask for.
const MAX_WAIT_SECS: f64 = 86_400.0;

/// Farmer configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields fall back to
/// the values the bot was tuned with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FarmerConfig {
    pub window: WindowConfig,
    pub launch: LaunchConfig,
    pub templates: TemplateConfig,
    pub matching: MatchingConfig,
    pub rooms: RoomConfig,
    pub timing: TimingConfig,
    pub restart: RestartConfig,
    pub recovery: RecoveryConfig,
    pub diagnostics: DiagnosticsConfig,
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WindowConfig {
    /// Exact title of the game window.
    pub title: String,
    /// A window only counts if its process command line contains one of these.
    pub process_markers: Vec<String>,
    /// Pin the window sticky and above others before farming.
    pub always_on_top: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Bleach: Brave Souls".to_string(),
            process_markers: vec![
                "BleachBraveSouls.exe".to_string(),
                "BLEACH Brave Souls".to_string(),
            ],
            always_on_top: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LaunchConfig {
    /// Passed to `pkill -f` to stop a hung game.
    pub kill_pattern: String,
    /// Command that starts the game (e.g. `["steam", "-applaunch", "1201240"]`).
    pub command: Vec<String>,
    pub kill_settle_secs: u64,
    pub launch_timeout_secs: u64,
    pub launch_poll_secs: u64,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            kill_pattern: "BleachBraveSouls.exe".to_string(),
            command: vec![
                "steam".to_string(),
                "-applaunch".to_string(),
                "1201240".to_string(),
            ],
            kill_settle_secs: 5,
            launch_timeout_secs: 120,
            launch_poll_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TemplateConfig {
    /// Directory holding the template images.
    pub dir: PathBuf,
    /// Signal key to file name, for templates that differ from the defaults.
    pub overrides: BTreeMap<String, String>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("images"),
            overrides: BTreeMap::new(),
        }
    }
}

impl TemplateConfig {
    /// Path of the template image for `signal`.
    pub fn path_for(&self, signal: Signal) -> PathBuf {
        let file = self
            .overrides
            .get(signal.key())
            .map_or(signal.default_file(), String::as_str);
        self.dir.join(file)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchingConfig {
    pub high: f32,
    pub normal: f32,
    pub loose: f32,
    /// Downscale factor of the coarse search pass (1 disables it).
    pub coarse_scale: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            high: 0.95,
            normal: 0.8,
            loose: 0.7,
            coarse_scale: 4,
        }
    }
}

impl MatchingConfig {
    pub fn threshold(&self, tier: ConfidenceTier) -> f32 {
        match tier {
            ConfidenceTier::High => self.high,
            ConfidenceTier::Normal => self.normal,
            ConfidenceTier::Loose => self.loose,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoomConfig {
    pub min_marker_separation: f64,
    pub max_pair_distance: f64,
    pub horizontal_weight: f64,
    /// Upper bound on consecutive room-list rescans.
    pub scan_budget_secs: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        let params = SelectorParams::default();
        Self {
            min_marker_separation: params.min_marker_separation,
            max_pair_distance: params.max_pair_distance,
            horizontal_weight: params.horizontal_weight,
            scan_budget_secs: 600,
        }
    }
}

impl RoomConfig {
    pub fn selector_params(&self) -> SelectorParams {
        SelectorParams {
            min_marker_separation: self.min_marker_separation,
            max_pair_distance: self.max_pair_distance,
            horizontal_weight: self.horizontal_weight,
        }
    }
}

/// Every wait of the loop, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub click_soak: f64,
    pub focus_restore: f64,
    pub game_start_timeout: f64,
    pub startup_step_timeout: f64,
    pub news_settle: f64,
    pub coop_settle: f64,
    pub coop_menu_settle: f64,
    pub menu_timeout: f64,
    pub coop_quest_timeout: f64,
    pub quest_click_timeout: f64,
    pub room_list_arrival: f64,
    pub enter_room_timeout: f64,
    pub room_load_timeout: f64,
    pub room_load_delay: f64,
    pub room_list_poll: f64,
    pub search_again_timeout: f64,
    pub search_again_delay: f64,
    pub join_timeout: f64,
    pub popup_dismiss_delay: f64,
    pub ready_timeout: f64,
    pub ready_settle: f64,
    pub ready_vanish_timeout: f64,
    pub ready_poll: f64,
    pub check_run_start_timeout: f64,
    pub run_start_poll: f64,
    pub ingame_auto_ready_delay: f64,
    pub toggle_confirm_timeout: f64,
    pub disconnect_recovery_delay: f64,
    pub retirement_step_delay: f64,
    pub retire_confirm_timeout: f64,
    pub quest_max_time: f64,
    pub quest_poll: f64,
    pub tap1_timeout: f64,
    pub tap2_timeout: f64,
    pub tap_pause: f64,
    pub screen_transition_delay: f64,
    pub retry_timeout: f64,
    pub retry_pause: f64,
    pub final_pause: f64,
    pub action_poll: f64,
    pub quick_poll: f64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            click_soak: 0.5,
            focus_restore: 0.01,
            game_start_timeout: 90.0,
            startup_step_timeout: 30.0,
            news_settle: 7.0,
            coop_settle: 1.0,
            coop_menu_settle: 3.0,
            menu_timeout: 20.0,
            coop_quest_timeout: 1.0,
            quest_click_timeout: 5.0,
            room_list_arrival: 15.0,
            enter_room_timeout: 10.0,
            room_load_timeout: 5.0,
            room_load_delay: 1.0,
            room_list_poll: 0.5,
            search_again_timeout: 10.0,
            search_again_delay: 2.0,
            join_timeout: 15.0,
            popup_dismiss_delay: 3.0,
            ready_timeout: 15.0,
            ready_settle: 2.0,
            ready_vanish_timeout: 5.0,
            ready_poll: 0.5,
            check_run_start_timeout: 300.0,
            run_start_poll: 2.0,
            ingame_auto_ready_delay: 1.5,
            toggle_confirm_timeout: 3.0,
            disconnect_recovery_delay: 2.0,
            retirement_step_delay: 1.0,
            retire_confirm_timeout: 10.0,
            quest_max_time: 300.0,
            quest_poll: 5.0,
            tap1_timeout: 15.0,
            tap2_timeout: 20.0,
            tap_pause: 5.0,
            screen_transition_delay: 2.0,
            retry_timeout: 30.0,
            retry_pause: 3.0,
            final_pause: 0.5,
            action_poll: 0.5,
            quick_poll: 0.2,
        }
    }
}

impl TimingConfig {
    fn entries(&self) -> [(&'static str, f64); 41] {
        [
            ("click_soak", self.click_soak),
            ("focus_restore", self.focus_restore),
            ("game_start_timeout", self.game_start_timeout),
            ("startup_step_timeout", self.startup_step_timeout),
            ("news_settle", self.news_settle),
            ("coop_settle", self.coop_settle),
            ("coop_menu_settle", self.coop_menu_settle),
            ("menu_timeout", self.menu_timeout),
            ("coop_quest_timeout", self.coop_quest_timeout),
            ("quest_click_timeout", self.quest_click_timeout),
            ("room_list_arrival", self.room_list_arrival),
            ("enter_room_timeout", self.enter_room_timeout),
            ("room_load_timeout", self.room_load_timeout),
            ("room_load_delay", self.room_load_delay),
            ("room_list_poll", self.room_list_poll),
            ("search_again_timeout", self.search_again_timeout),
            ("search_again_delay", self.search_again_delay),
            ("join_timeout", self.join_timeout),
            ("popup_dismiss_delay", self.popup_dismiss_delay),
            ("ready_timeout", self.ready_timeout),
            ("ready_settle", self.ready_settle),
            ("ready_vanish_timeout", self.ready_vanish_timeout),
            ("ready_poll", self.ready_poll),
            ("check_run_start_timeout", self.check_run_start_timeout),
            ("run_start_poll", self.run_start_poll),
            ("ingame_auto_ready_delay", self.ingame_auto_ready_delay),
            ("toggle_confirm_timeout", self.toggle_confirm_timeout),
            ("disconnect_recovery_delay", self.disconnect_recovery_delay),
            ("retirement_step_delay", self.retirement_step_delay),
            ("retire_confirm_timeout", self.retire_confirm_timeout),
            ("quest_max_time", self.quest_max_time),
            ("quest_poll", self.quest_poll),
            ("tap1_timeout", self.tap1_timeout),
            ("tap2_timeout", self.tap2_timeout),
            ("tap_pause", self.tap_pause),
            ("screen_transition_delay", self.screen_transition_delay),
            ("retry_timeout", self.retry_timeout),
            ("retry_pause", self.retry_pause),
            ("final_pause", self.final_pause),
            ("action_poll", self.action_poll),
            ("quick_poll", self.quick_poll),
        ]
    }

    /// Poll intervals must be positive or a poll loop would spin.
    fn poll_intervals(&self) -> [(&'static str, f64); 6] {
        [
            ("room_list_poll", self.room_list_poll),
            ("ready_poll", self.ready_poll),
            ("run_start_poll", self.run_start_poll),
            ("quest_poll", self.quest_poll),
            ("action_poll", self.action_poll),
            ("quick_poll", self.quick_poll),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RestartConfig {
    pub max_restarts: u32,
    /// Time the loop may spend recovering without completing a run before
    /// the game is relaunched.
    pub recovery_budget_secs: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            recovery_budget_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Resolution order when several states are visible, most trusted first.
    pub priority: Vec<FarmState>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Where failure screenshots are written.
    pub dir: PathBuf,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("screenshots"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Monitor to capture by name; empty means the primary monitor.
    pub monitor: String,
}

impl FarmerConfig {
    pub fn validate(&self) -> Result<()> {
        let title = Regex::new(WINDOW_TITLE_PATTERN).context("compile window title pattern")?;
        if !title.is_match(&self.window.title) {
            return Err(anyhow!(
                "window.title {:?} must match {WINDOW_TITLE_PATTERN}",
                self.window.title
            ));
        }
        if self.window.process_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(anyhow!("window.process_markers must name at least one marker"));
        }
        if self.launch.command.is_empty() || self.launch.command[0].trim().is_empty() {
            return Err(anyhow!("launch.command must be a non-empty array"));
        }
        if self.launch.kill_pattern.trim().is_empty() {
            return Err(anyhow!("launch.kill_pattern must not be empty"));
        }
        if self.launch.launch_timeout_secs == 0 || self.launch.launch_poll_secs == 0 {
            return Err(anyhow!("launch timeouts must be > 0"));
        }
        for key in self.templates.overrides.keys() {
            key.parse::<Signal>()
                .map_err(|err| anyhow!("templates.overrides: {err}"))?;
        }
        for (name, value) in [
            ("matching.high", self.matching.high),
            ("matching.normal", self.matching.normal),
            ("matching.loose", self.matching.loose),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("{name} must be in (0, 1], got {value}"));
            }
        }
        if self.matching.coarse_scale == 0 {
            return Err(anyhow!("matching.coarse_scale must be >= 1"));
        }
        for (name, value) in [
            ("rooms.min_marker_separation", self.rooms.min_marker_separation),
            ("rooms.max_pair_distance", self.rooms.max_pair_distance),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(anyhow!("{name} must be > 0, got {value}"));
            }
        }
        if !(self.rooms.horizontal_weight.is_finite() && self.rooms.horizontal_weight >= 0.0) {
            return Err(anyhow!("rooms.horizontal_weight must be >= 0"));
        }
        if self.rooms.scan_budget_secs == 0 {
            return Err(anyhow!("rooms.scan_budget_secs must be > 0"));
        }
        if self.restart.recovery_budget_secs == 0 {
            return Err(anyhow!("restart.recovery_budget_secs must be > 0"));
        }
        for (name, value) in self.timing.entries() {
            if !(value.is_finite() && value >= 0.0) {
                return Err(anyhow!("timing.{name} must be a non-negative number, got {value}"));
            }
            if value > MAX_WAIT_SECS {
                return Err(anyhow!("timing.{name} must be at most {MAX_WAIT_SECS}s, got {value}"));
            }
        }
        for (name, value) in self.timing.poll_intervals() {
            if value <= 0.0 {
                return Err(anyhow!("timing.{name} must be > 0"));
            }
        }
        self.classifier()?;
        Ok(())
    }

    pub fn classifier(&self) -> Result<RecoveryClassifier> {
        RecoveryClassifier::new(self.recovery.priority.clone()).context("recovery.priority")
    }
}

/// Seconds from config to a `Duration`. Out-of-range values saturate.
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FarmerConfig::default()`.
pub fn load_config(path: &Path) -> Result<FarmerConfig> {
    if !path.exists() {
        let cfg = FarmerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FarmerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FarmerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
