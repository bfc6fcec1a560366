//! Unattended co-op quest farmer.
//!
//! Reads `farmer.toml` (or `--config`), finds the game window and loops
//! through the quest cycle until a fatal error. See `farmer --help`.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};

use farmer::check::check_setup;
use farmer::exit_codes;
use farmer::io::config::{DEFAULT_CONFIG_PATH, FarmerConfig, load_config, write_config};
use farmer::logging;
use farmer::scan::{render_text, scan_once};
use farmer::start::{LiveHost, start_farm};

#[derive(Parser)]
#[command(name = "farmer", version, about = "Unattended co-op quest farmer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Find the game window and farm until a fatal error.
    Run {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Kill and relaunch the game before the first run.
        #[arg(long)]
        restart_first: bool,
    },
    /// Write the default config file.
    Init {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Validate the config and decode every template image.
    Check {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Classify the current screen once without clicking anything.
    Scan {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run {
            config,
            restart_first,
        } => cmd_run(&config, restart_first),
        Command::Init { config, force } => cmd_init(&config, force),
        Command::Check { config } => cmd_check(&config),
        Command::Scan { config, json } => cmd_scan(&config, json),
    }
}

fn cmd_run(path: &Path, restart_first: bool) -> Result<i32> {
    let config = load_config(path)?;
    let live = LiveHost::connect(&config)?;
    let fatal = start_farm(live.host(), &config, restart_first)?;
    eprintln!("{fatal}");
    Ok(exit_codes::for_fatal(&fatal))
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &FarmerConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_check(path: &Path) -> Result<i32> {
    let outcome = check_setup(path)?;
    println!(
        "ok: {} templates in {}",
        outcome.templates,
        outcome.template_dir.display()
    );
    Ok(exit_codes::OK)
}

fn cmd_scan(path: &Path, json: bool) -> Result<i32> {
    let config = load_config(path)?;
    let live = LiveHost::connect(&config)?;
    let report = match scan_once(live.host(), &config) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("{:#}", err);
            return Ok(exit_codes::ENVIRONMENT);
        }
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_text(&report));
    }
    Ok(exit_codes::OK)
}
