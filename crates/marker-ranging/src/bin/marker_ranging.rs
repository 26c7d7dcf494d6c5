//! marker-ranging CLI: detect markers in a frame sequence and report the
//! distance between every pair.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, LevelFilter};
use marker_ranging::core::CameraModel;
use marker_ranging::{
    quit_after, run_loop, ImageSequenceSource, JsonReportSink, LogSink, OverlaySink, RangingConfig,
    RangingSession, SinkSet,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "marker-ranging")]
#[command(about = "Measure distances between ArUco markers in a frame sequence")]
#[command(version)]
struct Cli {
    /// Image files or directories of frames, processed in order.
    #[arg(long, required = true, num_args = 1..)]
    input: Vec<PathBuf>,

    /// JSON session config; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera calibration JSON. A missing file selects the default camera.
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Marker side length in meters.
    #[arg(long)]
    marker_size: Option<f64>,

    /// Marker dictionary, e.g. DICT_4X4_50.
    #[arg(long)]
    dictionary: Option<String>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<usize>,

    /// Stop once this many seconds have passed; the current frame finishes.
    #[arg(long)]
    max_seconds: Option<f64>,

    /// Write per-frame annotations to this file, one JSON object per line.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace).
    #[arg(long, default_value = "info", value_parser = parse_level)]
    log_level: LevelFilter,

    /// Emit JSON log lines.
    #[cfg(feature = "tracing")]
    #[arg(long)]
    json_logs: bool,
}

fn parse_level(raw: &str) -> Result<LevelFilter, String> {
    LevelFilter::from_str(raw).map_err(|_| format!("unknown log level `{raw}`"))
}

impl Cli {
    fn apply_overrides(&self, config: &mut RangingConfig) {
        if let Some(path) = &self.calibration {
            config.calibration_path = path.clone();
        }
        if let Some(size) = self.marker_size {
            config.marker_size_m = size;
        }
        if let Some(name) = &self.dictionary {
            config.dictionary = name.clone();
        }
        if self.max_frames.is_some() {
            config.max_frames = self.max_frames;
        }
    }
}

#[cfg(not(feature = "tracing"))]
fn init_logging(cli: &Cli) {
    let _ = marker_ranging::core::init_with_level(cli.log_level);
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli) {
    let filter = cli.log_level.to_string().to_lowercase();
    marker_ranging::core::init_tracing(cli.json_logs, &filter);
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let mut config = match &cli.config {
        Some(path) => RangingConfig::load_json(path).map_err(|e| -> CliError {
            format!("failed to read config {}: {e}", path.display()).into()
        })?,
        None => RangingConfig::default(),
    };
    cli.apply_overrides(&mut config);

    let camera = CameraModel::load(&config.calibration_path);
    let mut session = RangingSession::from_config(&config, camera.model)?;

    let mut source = match ImageSequenceSource::open(&cli.input) {
        Ok(source) => source,
        Err(err) => {
            error!("cannot open frame source: {err}");
            return Err(err.into());
        }
    };

    let mut sinks = SinkSet::new().with(LogSink);
    if let Some(path) = &cli.report {
        let report = JsonReportSink::create(path).map_err(|e| -> CliError {
            format!("cannot create report {}: {e}", path.display()).into()
        })?;
        sinks = sinks.with(report);
    }

    let quit = Arc::new(AtomicBool::new(false));
    if let Some(secs) = cli.max_seconds {
        let budget = Duration::try_from_secs_f64(secs)
            .map_err(|e| -> CliError { format!("invalid --max-seconds {secs}: {e}").into() })?;
        // Detached: the process exits with main.
        quit_after(Arc::clone(&quit), budget);
    }
    let summary = run_loop(
        &mut session,
        &mut source,
        &mut sinks,
        &quit,
        config.max_frames,
    );
    sinks.finish()?;
    info!("done: {} frames ({:?})", summary.frames, summary.reason);
    Ok(())
}
