//! Killing and relaunching the game process.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{info, instrument, warn};

use crate::io::config::LaunchConfig;
use crate::io::process::{DEFAULT_OUTPUT_LIMIT, run_command_with_timeout, spawn_detached};

const KILL_TIMEOUT: Duration = Duration::from_secs(10);

pub trait Launcher {
    /// Stop any running game process. Nothing to stop is not an error.
    fn kill(&self) -> Result<()>;

    /// Start the game without waiting for it.
    fn launch(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    kill_pattern: String,
    command: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(cfg: &LaunchConfig) -> Self {
        Self {
            kill_pattern: cfg.kill_pattern.clone(),
            command: cfg.command.clone(),
        }
    }
}

impl Launcher for ProcessLauncher {
    #[instrument(skip_all, fields(pattern = %self.kill_pattern))]
    fn kill(&self) -> Result<()> {
        let mut cmd = Command::new("pkill");
        cmd.args(["-f", self.kill_pattern.as_str()]);
        let output = run_command_with_timeout(cmd, KILL_TIMEOUT, DEFAULT_OUTPUT_LIMIT)?;
        if output.timed_out {
            bail!("pkill timed out");
        }
        // pkill: 0 = signalled, 1 = no process matched.
        match output.status.code() {
            Some(0) => info!("game process signalled"),
            Some(1) => info!("no game process running"),
            code => {
                warn!(?code, stderr = %output.stderr_text(), "pkill failed");
                bail!("pkill exited with {code:?}");
            }
        }
        Ok(())
    }

    #[instrument(skip_all, fields(command = ?self.command))]
    fn launch(&self) -> Result<()> {
        let pid = spawn_detached(&self.command)?;
        info!(pid, "launch command started");
        Ok(())
    }
}
