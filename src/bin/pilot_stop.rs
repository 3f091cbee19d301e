//! pilot_stop - create (or clear) the emergency stop marker file
//!
//! A running pilotd polls for the marker and halts within one safety poll, releasing
//! every key. The marker must be cleared before the next session can run.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stop marker path; must match the daemon's safety.stop_file.
    #[arg(long, env = "PILOT_STOP_FILE")]
    stop_file: PathBuf,
    /// Remove the marker instead of creating it.
    #[arg(long)]
    clear: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.clear {
        match std::fs::remove_file(&args.stop_file) {
            Ok(()) => log::info!("cleared stop marker {}", args.stop_file.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("no stop marker at {}", args.stop_file.display())
            }
            Err(e) => {
                return Err(anyhow!(
                    "failed to remove {}: {}",
                    args.stop_file.display(),
                    e
                ))
            }
        }
        return Ok(());
    }

    if let Some(parent) = args.stop_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&args.stop_file, b"stop\n")
        .with_context(|| format!("failed to write {}", args.stop_file.display()))?;
    log::warn!("emergency stop requested via {}", args.stop_file.display());
    Ok(())
}
