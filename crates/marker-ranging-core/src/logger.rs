//! Stderr logging for the ranging loop.
//!
//! Each record becomes one line, `[   1.234s  INFO aruco] message`: the time
//! since [`init_with_level`] ran, the level, and the workspace crate that
//! emitted it. Records from other crates are capped at `warn` so a `debug`
//! run stays readable.
//!
//! With the `tracing` feature, [`init_tracing`] installs a
//! `tracing-subscriber` formatter instead, with per-stage span timings.

use std::fmt::Write as _;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const WORKSPACE_PREFIX: &str = "marker_ranging";

/// Short tag for a record target: `marker_ranging_aruco::detector` -> `aruco`,
/// `marker_ranging::pipeline` -> `ranging`, anything else verbatim up to `::`.
fn target_tag(target: &str) -> &str {
    let krate = target.split("::").next().unwrap_or(target);
    match krate.strip_prefix(WORKSPACE_PREFIX) {
        Some("") => "ranging",
        Some(rest) => rest.trim_start_matches('_'),
        None => krate,
    }
}

fn is_workspace_target(target: &str) -> bool {
    target.starts_with(WORKSPACE_PREFIX)
}

fn format_line(
    out: &mut String,
    elapsed_s: f64,
    level: Level,
    target: &str,
    args: &std::fmt::Arguments<'_>,
) {
    out.clear();
    let _ = writeln!(
        out,
        "[{elapsed_s:8.3}s {level:>5} {}] {args}",
        target_tag(target)
    );
}

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl StderrLogger {
    fn level_for(&self, target: &str) -> LevelFilter {
        if is_workspace_target(target) {
            self.level
        } else {
            self.level.min(LevelFilter::Warn)
        }
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level_for(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut line = String::with_capacity(96);
        format_line(
            &mut line,
            self.started.elapsed().as_secs_f64(),
            record.level(),
            record.target(),
            record.args(),
        );
        // One write per record keeps lines whole when several threads log.
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger. Later calls are no-ops.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_some() {
        return Ok(());
    }
    let logger = LOGGER.get_or_init(|| StderrLogger {
        level,
        started: Instant::now(),
    });
    log::set_logger(logger)?;
    log::set_max_level(level);
    Ok(())
}

/// Install a `tracing-subscriber` formatter; `RUST_LOG` overrides
/// `default_filter`. Spans are reported on close.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
