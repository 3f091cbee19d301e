//! pilotd - Realm Pilot daemon
//!
//! This daemon:
//! 1. Loads and validates configuration (file from --config or PILOT_CONFIG, then env)
//! 2. Opens the frame source, the template library and the input backend
//! 3. Runs the perception-action loop until stopped (stop file, Ctrl-C, the hotkey when
//!    built with `operator-keys`, --max-cycles, or repeated input failures)
//! 4. Releases every key before exiting

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use realm_pilot::config::{InputBackendKind, PilotConfig};
use realm_pilot::{BotSession, StopReason};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML by extension).
    #[arg(long, env = "PILOT_CONFIG")]
    config: Option<PathBuf>,
    /// Stop after this many control cycles.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    max_cycles: Option<u64>,
    /// Record input instead of injecting it.
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = PilotConfig::load_from(args.config.as_deref())?;
    if let Some(max) = args.max_cycles {
        cfg.max_cycles = Some(max);
    }
    if args.dry_run {
        cfg.input_backend = InputBackendKind::DryRun;
    }
    log::info!(
        "pilotd {} source={} input={} tick={}Hz movement={:?}",
        env!("CARGO_PKG_VERSION"),
        cfg.capture.source,
        cfg.input_backend.as_str(),
        cfg.tick_rate_hz,
        cfg.decision.movement_mode
    );
    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let interrupt = Arc::clone(&interrupt);
        ctrlc::set_handler(move || {
            interrupt.store(true, Ordering::SeqCst);
        })
        .expect("error setting Ctrl-C handler");
    }

    let session = BotSession::from_config(&cfg, interrupt)?;
    if let Some(path) = &cfg.safety.stop_file {
        log::info!("emergency stop: create {}", path.display());
    }
    if session.hotkey_armed() {
        log::info!("emergency stop: press {}", cfg.safety.hotkey);
    }
    let report = session.run()?;
    log::info!(
        "session {} after {} cycles (captures={} capture_failures={} input_faults={})",
        report.status.as_str(),
        report.cycles,
        report.captures,
        report.capture_failures,
        report.input_faults
    );
    println!("{}", serde_json::to_string(&report)?);

    match report.stop_reason {
        Some(reason @ StopReason::InputFailures(_)) => Err(anyhow!("session halted: {}", reason)),
        _ => Ok(()),
    }
}
