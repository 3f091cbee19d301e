//! pilot_probe - one-shot perception diagnostics
//!
//! Loads a screenshot (or captures one frame from the configured source), reads the
//! health bar, runs detection and prints a JSON report with the decision the engine
//! would take. Nothing is injected.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use realm_pilot::config::PilotConfig;
use realm_pilot::detect::{Detection, DegradedTemplate};
use realm_pilot::{
    open_source, CancelToken, DecisionEngine, Detector, Frame, StateEstimator, TemplateLibrary,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML by extension).
    #[arg(long, env = "PILOT_CONFIG")]
    config: Option<PathBuf>,
    /// Screenshot to analyze instead of capturing from the configured source.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Pretty-print the report.
    #[arg(long)]
    pretty: bool,
}

#[derive(Serialize)]
struct ProbeReport {
    source: String,
    width: u32,
    height: u32,
    hp_percent: Option<f32>,
    hp_error: Option<String>,
    templates_loaded: usize,
    templates_degraded: Vec<DegradedReport>,
    detections: Vec<Detection>,
    mode: String,
    action: String,
}

#[derive(Serialize)]
struct DegradedReport {
    label: String,
    reason: String,
}

impl From<&DegradedTemplate> for DegradedReport {
    fn from(d: &DegradedTemplate) -> Self {
        Self {
            label: d.label.clone(),
            reason: d.reason.clone(),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let cfg = PilotConfig::load_from(args.config.as_deref())?;

    let (source, frame) = match &args.image {
        Some(path) => {
            let img = image::open(path)
                .with_context(|| format!("failed to open screenshot {}", path.display()))?;
            (path.display().to_string(), Frame::new(img.to_rgb8()))
        }
        None => {
            let mut source =
                open_source(&cfg.capture.source, cfg.capture.window_title.as_deref())?;
            let frame = source
                .capture()
                .map_err(|e| anyhow!("capture from {} failed: {}", cfg.capture.source, e))?;
            (cfg.capture.source.clone(), frame)
        }
    };

    let library = match &cfg.templates.root {
        Some(root) => TemplateLibrary::load(root)?,
        None => TemplateLibrary::default(),
    };
    let detections = Detector::new(cfg.detector_config()).detect(
        &frame,
        &library,
        &CancelToken::new(),
    )?;

    let estimator = StateEstimator::new(cfg.estimator_config());
    let hp_error = estimator.hp_reader().read(&frame).err().map(|e| e.to_string());
    let state = estimator.estimate(&frame, &detections, None);
    let mut engine = DecisionEngine::new(cfg.decision_config());
    let action = engine.decide(&state);

    let report = ProbeReport {
        source,
        width: frame.width(),
        height: frame.height(),
        hp_percent: state.hp.percent(),
        hp_error,
        templates_loaded: library.len(),
        templates_degraded: library.degraded().iter().map(DegradedReport::from).collect(),
        detections: detections.detections,
        mode: engine.mode().to_string(),
        action: action.to_string(),
    };
    let json = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", json);
    Ok(())
}
