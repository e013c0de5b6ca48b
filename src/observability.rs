//! Logging initialization
//!
//! Builds the tracing-subscriber registry from the observability section
//! of the config: an EnvFilter (RUST_LOG takes precedence over the
//! configured filter level) plus a fmt layer writing to stdout or to a
//! non-blocking file appender.

use crate::error::Result;
use rollcall_common::config::{ObservabilityConfig, RollcallConfig};
use std::fs;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Guard for observability resources (log writer)
#[derive(Default)]
pub struct ObservabilityGuard {
    log_guard: Option<WorkerGuard>,
}

/// Initialize logging based on configuration
pub fn init_observability(config: &RollcallConfig) -> Result<ObservabilityGuard> {
    let mut guard = ObservabilityGuard::default();
    let observability = &config.observability;

    match observability.log.output.as_str() {
        "file" => {
            fs::create_dir_all(&observability.log.path)?;
            let (non_blocking, worker_guard) = build_file_writer(observability)?;
            guard.log_guard = Some(worker_guard);

            init_subscriber_with_writer(non_blocking, false, observability);
        }
        _ => {
            init_subscriber_with_writer(std::io::stdout, true, observability);
        }
    }

    Ok(guard)
}

/// Create an EnvFilter from config, with RUST_LOG taking precedence
fn create_env_filter(config: &ObservabilityConfig) -> EnvFilter {
    let directive = std::env::var("RUST_LOG")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| config.filter_level.clone());

    EnvFilter::try_new(&directive).unwrap_or_else(|_| {
        println!(
            "Failed to parse filter directive: {}. Falling back to default: info",
            directive
        );
        EnvFilter::new("info")
    })
}

fn init_subscriber_with_writer<W>(writer: W, use_ansi: bool, config: &ObservabilityConfig)
where
    W: for<'a> fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(use_ansi)
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(create_env_filter(config))
        .with(fmt_layer)
        .try_init()
        .ok();
}

fn build_file_writer(config: &ObservabilityConfig) -> Result<(NonBlocking, WorkerGuard)> {
    if config.log.rotate {
        let file_appender = tracing_appender::rolling::daily(&config.log.path, "rollcall.log");
        Ok(tracing_appender::non_blocking(file_appender))
    } else {
        let log_file_path = std::path::Path::new(&config.log.path).join("rollcall.log");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path)?;
        Ok(tracing_appender::non_blocking(file))
    }
}
