//! # Meridian Zone Cluster - Main Entry Point
//!
//! Runs the full zone shard cluster: a grid partition of the world,
//! one authoritative shard per zone on a shared message bus, and the
//! orchestrator that places players and tracks shard liveness. This
//! entry point handles CLI parsing, configuration loading, and
//! application lifecycle management.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! meridian
//!
//! # Specify custom configuration
//! meridian --config production.toml
//!
//! # Override specific settings
//! meridian --grid 4x4 --base-port 9000 --log-level debug
//!
//! # JSON logging for production
//! meridian --json-logs
//! ```
//!
//! ## Configuration
//!
//! The cluster loads configuration from a TOML file (default:
//! `config.toml`). If the file doesn't exist, a default configuration
//! will be created.
//!
//! ## Signal Handling
//!
//! The cluster handles graceful shutdown on:
//! - SIGINT (Ctrl+C)
//! - SIGTERM (Unix systems)

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point for the Meridian zone cluster.
///
/// Handles the complete application lifecycle including:
/// 1. Command-line argument parsing
/// 2. Configuration loading and validation
/// 3. Logging system initialization
/// 4. Application creation and execution
/// 5. Error handling and cleanup
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
///
/// Note: This function is called from an async context (main with
/// #[tokio::main]), so it should NOT have #[tokio::main] itself.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments first
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    // Setup logging before anything else
    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    // Create and run application
    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export main types for potential library usage
pub use config::{LoggingSettings, RegionSettings, WorldSettings};
