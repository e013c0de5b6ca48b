//! Rollcall service host
//!
//! Loads configuration, initializes observability and serves the
//! verification router over HTTP.

mod cli;
mod error;
mod observability;

use anyhow::Context;
use clap::Parser;
use observability::init_observability;
use rollcall_common::config::RollcallConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

use cli::{Cli, Commands};
use error::{Error, Result};

/// Application launcher utilities
struct ApplicationLauncher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Test { config_file }) => {
            let config_path =
                ApplicationLauncher::find_config_file(config_file.as_ref().unwrap_or(&cli.config))?;
            ApplicationLauncher::test_config_file(&config_path)
        }
        None => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            runtime.block_on(ApplicationLauncher::run_application(&config_path))
        }
    }
}

impl ApplicationLauncher {
    /// Find config file with fallback locations
    fn find_config_file(provided_path: &PathBuf) -> Result<PathBuf> {
        // If the provided path is not the default "config.toml", check if it exists
        if provided_path != Path::new("config.toml") {
            if provided_path.exists() {
                bootstrap_info!("Using provided config file: {:?}", provided_path);
                return Ok(provided_path.clone());
            } else {
                bootstrap_error!("Provided config file not found: {:?}", provided_path);
                return Err(Error::custom(format!(
                    "Config file not found: {provided_path:?}"
                )));
            }
        }

        // Otherwise, try fallback locations
        let fallback_paths = vec![
            // 1. Current working directory
            PathBuf::from("config.toml"),
            // 2. System config directory
            PathBuf::from("/etc/rollcall/config.toml"),
        ];

        bootstrap_info!("Searching for config file in default locations...");

        for path in &fallback_paths {
            if path.exists() {
                bootstrap_info!("Found config file: {:?}", path);
                return Ok(path.clone());
            } else {
                bootstrap_info!("Config not found at: {:?}", path);
            }
        }

        bootstrap_error!("No configuration file found!");
        bootstrap_error!("Please create a config file in one of these locations:");
        for (i, path) in fallback_paths.iter().enumerate() {
            bootstrap_error!("  {}. {:?}", i + 1, path);
        }
        bootstrap_error!("Or specify a custom path with: rollcall --config <path>");

        Err(Error::custom(
            "No configuration file found. Please create one or specify path with --config",
        ))
    }

    /// Validate a configuration file and exit
    fn test_config_file(config_path: &Path) -> Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();

        match RollcallConfig::load_from_file(config_path) {
            Ok(config) => {
                info!("Config file parsed and validated: {:?}", config_path);
                info!(
                    "  instance: {}, env: {}, bind: {}",
                    config.name,
                    config.env,
                    config.bind_addr()
                );
                Ok(())
            }
            Err(e) => {
                error!("Config file validation failed: {}", e);
                Err(Error::Config(e))
            }
        }
    }

    /// Main application entry
    async fn run_application(config_path: &Path) -> Result<()> {
        bootstrap_info!("Loading config file: {:?}", config_path);

        let config = RollcallConfig::load_from_file(config_path).map_err(|e| {
            bootstrap_error!("Config loading failed: {}", e);
            Error::Config(e)
        })?;
        bootstrap_info!("Config loaded successfully");

        // ensure sqlite_path directory exists
        if !config.sqlite_path.exists() {
            std::fs::create_dir_all(&config.sqlite_path).with_context(|| {
                format!(
                    "Failed to create SQLite data directory: {}",
                    config.sqlite_path.display()
                )
            })?;
        }

        let _observability_guard = init_observability(&config)?;

        info!(
            "Starting rollcall instance '{}' (env: {})",
            config.name, config.env
        );

        let verification_router = verification::create_verification_router(&config)
            .await
            .map_err(|e| Error::service_startup(format!("Verification router: {e}")))?;

        let app = axum::Router::new()
            .nest("/verification", verification_router)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive());

        let addr = config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::service_startup(format!("Failed to bind {addr}: {e}")))?;

        info!("HTTP server listening on {}", addr);

        // Connect info is required by the per-IP rate limiter when no
        // proxy headers are present.
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::service_startup(format!("HTTP server error: {e}")))?;

        info!("Shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
