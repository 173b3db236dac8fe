use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result, anyhow};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, RollingFileAppender},
};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};
use uuid::Uuid;

use crate::config::{LoggingConfig, LoggingRotation};

const LOG_FILE_PREFIX: &str = "cvm-decision.log";

/// Keeps the non-blocking file writer alive; drop it last so buffered lines are flushed.
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
    run_id: String,
}

impl LoggingGuard {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

/// Installs the global subscriber.
///
/// With the file layer on, JSON lines go to a rolling file under `logging.dir` and stderr only
/// sees warnings. With it off, stderr carries everything `logging.filter` admits, since stdout is
/// reserved for decision output.
pub fn init_tracing(logging_config: &LoggingConfig) -> Result<LoggingGuard> {
    if logging_config.filter.trim().is_empty() {
        return Err(anyhow!("logging.filter cannot be empty"));
    }

    let mut retention_warnings = Vec::new();
    let mut log_dir = None;
    let (file_layer, worker_guard) = if logging_config.file_enabled {
        if logging_config.dir.as_os_str().is_empty() {
            return Err(anyhow!("logging.dir cannot be empty"));
        }
        let dir = resolve_log_dir(&logging_config.dir)?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create logging directory {}", dir.display()))?;

        retention_warnings =
            purge_old_log_files(&dir, LOG_FILE_PREFIX, logging_config.retention_days);
        let appender = build_rolling_appender(&dir, &logging_config.rotation);
        let (non_blocking_writer, worker_guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .json()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_target(true)
            .with_current_span(true)
            .with_span_list(true)
            .with_ansi(false)
            .with_writer(non_blocking_writer)
            .with_filter(build_env_filter(&logging_config.filter)?);
        log_dir = Some(dir);
        (Some(layer), Some(worker_guard))
    } else {
        (None, None)
    };

    let stderr_layer = if logging_config.file_enabled {
        logging_config.stderr_warn_enabled.then(|| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(LevelFilter::WARN)
                .boxed()
        })
    } else {
        Some(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_filter(build_env_filter(&logging_config.filter)?)
                .boxed(),
        )
    };

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    let run_id = Uuid::now_v7().to_string();
    tracing::info!(
        target: "logging",
        run_id = %run_id,
        dir = ?log_dir.as_ref().map(|dir| dir.display().to_string()),
        filter = %logging_config.filter,
        rotation = ?logging_config.rotation,
        retention_days = logging_config.retention_days,
        stderr_warn_enabled = logging_config.stderr_warn_enabled,
        "logging_initialized"
    );
    for warning in retention_warnings {
        tracing::warn!(target: "logging", warning = %warning, "logging_retention_warning");
    }

    Ok(LoggingGuard {
        _worker_guard: worker_guard,
        run_id,
    })
}

fn build_env_filter(filter: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(filter)
        .with_context(|| format!("failed to parse logging.filter '{}'", filter))
}

fn build_rolling_appender(log_dir: &Path, rotation: &LoggingRotation) -> RollingFileAppender {
    match rotation {
        LoggingRotation::Daily => rolling::daily(log_dir, LOG_FILE_PREFIX),
        LoggingRotation::Hourly => rolling::hourly(log_dir, LOG_FILE_PREFIX),
    }
}

fn resolve_log_dir(dir: &Path) -> Result<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }

    Ok(std::env::current_dir()
        .context("failed to read current working directory for logging.dir resolution")?
        .join(dir))
}

fn purge_old_log_files(log_dir: &Path, prefix: &str, retention_days: usize) -> Vec<String> {
    purge_old_log_files_at(log_dir, prefix, retention_days, SystemTime::now())
}

/// Deletes `prefix*` files last modified before `now - retention_days`. Problems are returned
/// as warnings because logging is not up yet.
fn purge_old_log_files_at(
    log_dir: &Path,
    prefix: &str,
    retention_days: usize,
    now: SystemTime,
) -> Vec<String> {
    let retention = Duration::from_secs((retention_days as u64).saturating_mul(24 * 60 * 60));
    let cutoff = now.checked_sub(retention).unwrap_or(SystemTime::UNIX_EPOCH);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(err) => {
            return vec![format!(
                "failed to scan logging directory {}: {}",
                log_dir.display(),
                err
            )];
        }
    };

    let mut warnings = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warnings.push(format!("failed to iterate logging directory: {}", err));
                continue;
            }
        };
        if !entry.file_name().to_string_lossy().starts_with(prefix) {
            continue;
        }

        let path = entry.path();
        let modified = match entry.metadata().and_then(|metadata| {
            if metadata.is_file() {
                metadata.modified().map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(modified)) => modified,
            Ok(None) => continue,
            Err(err) => {
                warnings.push(format!("failed to stat {}: {}", path.display(), err));
                continue;
            }
        };

        if modified <= cutoff
            && let Err(err) = fs::remove_file(&path)
        {
            warnings.push(format!(
                "failed to remove expired log file {}: {}",
                path.display(),
                err
            ));
        }
    }

    warnings
}
