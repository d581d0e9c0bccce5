//! Configuration management for the Meridian zone cluster.
//!
//! This module handles loading, validation, and conversion of cluster
//! configuration from TOML files and command-line arguments.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;
use zone_server::partition::ZoneBounds;
use zone_server::{ShardConfig, WorldPartition};

fn default_grid_cols() -> u32 {
    2
}
fn default_grid_rows() -> u32 {
    2
}

/// Application configuration loaded from TOML file.
///
/// This is the main configuration structure that encompasses all cluster
/// settings including world geometry, shard tuning, and logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// World geometry and zone grid settings
    pub world: WorldSettings,
    /// Shard tuning shared by every zone in the cluster
    #[serde(default)]
    pub sharding: ShardConfig,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// World geometry configuration.
///
/// Defines the simulated coordinate space and how it is cut into zones.
/// The grid dimensions times the aura margin must leave each zone wide
/// enough for its overlap regions; `validate` rejects degenerate grids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSettings {
    /// Spatial boundaries of the whole simulated world
    pub region: RegionSettings,
    /// Number of zone columns in the partition grid
    #[serde(default = "default_grid_cols")]
    pub grid_cols: u32,
    /// Number of zone rows in the partition grid
    #[serde(default = "default_grid_rows")]
    pub grid_rows: u32,
}

/// Spatial region boundary configuration.
///
/// Defines the 3D coordinate space the cluster manages. Zones partition
/// the X/Z plane; the Y range is shared by every zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionSettings {
    /// Minimum X coordinate
    pub min_x: f64,
    /// Maximum X coordinate
    pub max_x: f64,
    /// Minimum Y coordinate
    pub min_y: f64,
    /// Maximum Y coordinate
    pub max_y: f64,
    /// Minimum Z coordinate
    pub min_z: f64,
    /// Maximum Z coordinate
    pub max_z: f64,
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
    /// Optional log file path
    #[serde(default)]
    pub file_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            world: WorldSettings {
                region: RegionSettings {
                    min_x: 0.0,
                    max_x: 2000.0,
                    min_y: -100.0,
                    max_y: 100.0,
                    min_z: 0.0,
                    max_z: 2000.0,
                },
                grid_cols: default_grid_cols(),
                grid_rows: default_grid_rows(),
            },
            sharding: ShardConfig::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
                file_path: None,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at
    /// the specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation failed.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config file
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Builds the static zone partition described by the world settings.
    ///
    /// # Returns
    ///
    /// A `WorldPartition` covering the configured region, or an error if
    /// the grid is too fine for the configured aura margin.
    pub fn to_partition(&self) -> Result<WorldPartition, Box<dyn std::error::Error>> {
        let region = &self.world.region;
        let world = ZoneBounds {
            min_x: region.min_x,
            max_x: region.max_x,
            min_z: region.min_z,
            max_z: region.max_z,
            min_y: region.min_y,
            max_y: region.max_y,
        };
        Ok(WorldPartition::create_grid(
            self.world.grid_cols,
            self.world.grid_rows,
            world,
            &self.sharding,
        )?)
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// Checks region boundaries, grid dimensions, shard tuning, and log
    /// level for validity.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        // Validate region bounds
        let region = &self.world.region;
        if region.min_x >= region.max_x {
            return Err("Region min_x must be less than max_x".to_string());
        }
        if region.min_y >= region.max_y {
            return Err("Region min_y must be less than max_y".to_string());
        }
        if region.min_z >= region.max_z {
            return Err("Region min_z must be less than max_z".to_string());
        }

        // Validate grid dimensions
        if self.world.grid_cols == 0 || self.world.grid_rows == 0 {
            return Err("Partition grid must have at least one zone".to_string());
        }
        let zone_width = (region.max_x - region.min_x) / self.world.grid_cols as f64;
        let zone_height = (region.max_z - region.min_z) / self.world.grid_rows as f64;
        if zone_width <= 2.0 * self.sharding.aura_margin
            || zone_height <= 2.0 * self.sharding.aura_margin
        {
            return Err(format!(
                "Zones of {zone_width:.0}x{zone_height:.0} units are too small for a {:.0} unit aura margin",
                self.sharding.aura_margin
            ));
        }

        // Validate shard tuning
        self.sharding
            .validate()
            .map_err(|e| format!("Shard configuration invalid: {e}"))?;

        // Validate log level
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => Err(format!("Invalid log level: {}", self.logging.level)),
        }
    }
}
