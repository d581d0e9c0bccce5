//! Shard configuration types and defaults.
//!
//! All geometry and timing heuristics used by the zone components live
//! in one struct, validated once at startup and shared by reference
//! into every component that needs it. Defaults mirror the tuning the
//! handoff layer was designed around: 50 m aura margin, 25 m ownership
//! transfer threshold, and strictly decreasing handoff distances.

use crate::error::ShardError;
use serde::{Deserialize, Serialize};

fn default_aura_margin() -> f64 {
    50.0
}
fn default_ownership_threshold() -> f64 {
    25.0
}
fn default_migration_timeout() -> u64 {
    5000
}
fn default_max_players() -> u32 {
    400
}
fn default_base_port() -> u16 {
    7777
}
fn default_tick_rate() -> u32 {
    60
}
fn default_sync_rate() -> u32 {
    20
}
fn default_token_ttl() -> u64 {
    10_000
}
fn default_heartbeat_timeout() -> u64 {
    30_000
}
fn default_mirror_ttl() -> u64 {
    300
}

/// Distance thresholds and per-phase timeouts for the handoff state
/// machine.
///
/// The four distances gate the phases in order (preparation, aura
/// entry, migration, final handoff) and must be strictly decreasing:
/// a player first prepares far from the edge, then crosses into the
/// shared aura, and only migrates once committed to the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffConfig {
    /// Distance to edge at which handoff preparation begins
    pub preparation_distance: f64,
    /// Distance at which the entity enters the shared aura
    pub aura_enter_distance: f64,
    /// Distance at which entity migration is initiated
    pub migration_distance: f64,
    /// Distance at which the connection switch completes
    pub handoff_distance: f64,

    /// Timeout for the PREPARING phase in milliseconds
    pub preparation_timeout_ms: u64,
    /// Timeout for the MIGRATING phase in milliseconds
    pub migration_timeout_ms: u64,
    /// Timeout for the SWITCHING phase in milliseconds
    pub switch_timeout_ms: u64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            preparation_distance: 75.0,
            aura_enter_distance: 50.0,
            migration_distance: 25.0,
            handoff_distance: 10.0,
            preparation_timeout_ms: 5000,
            migration_timeout_ms: 3000,
            switch_timeout_ms: 2000,
        }
    }
}

/// Configuration shared by all zone components on one shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Width of the overlap region between adjacent zones
    #[serde(default = "default_aura_margin")]
    pub aura_margin: f64,

    /// How far inside its own bounds a zone must see an entity before
    /// claiming ownership. Strictly smaller than the aura margin so an
    /// entity oscillating at the boundary does not flip owners.
    #[serde(default = "default_ownership_threshold")]
    pub ownership_transfer_threshold: f64,

    /// Handoff distance thresholds and phase timeouts
    #[serde(default)]
    pub handoff: HandoffConfig,

    /// Global per-migration timeout budget in milliseconds
    #[serde(default = "default_migration_timeout")]
    pub migration_timeout_ms: u64,

    /// Player capacity of one zone shard
    #[serde(default = "default_max_players")]
    pub max_players_per_zone: u32,

    /// Base network port; zone N listens on `base_port + N`
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Simulation tick rate in Hz
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,

    /// Outbound aura entity sync rate in Hz (must divide the tick rate)
    #[serde(default = "default_sync_rate")]
    pub sync_rate: u32,

    /// Lifetime of a minted handoff token in milliseconds
    #[serde(default = "default_token_ttl")]
    pub handoff_token_ttl_ms: u64,

    /// Shard heartbeat staleness threshold in milliseconds
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,

    /// TTL for best-effort session mirror entries in seconds
    #[serde(default = "default_mirror_ttl")]
    pub mirror_ttl_secs: u64,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            aura_margin: default_aura_margin(),
            ownership_transfer_threshold: default_ownership_threshold(),
            handoff: HandoffConfig::default(),
            migration_timeout_ms: default_migration_timeout(),
            max_players_per_zone: default_max_players(),
            base_port: default_base_port(),
            tick_rate: default_tick_rate(),
            sync_rate: default_sync_rate(),
            handoff_token_ttl_ms: default_token_ttl(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            mirror_ttl_secs: default_mirror_ttl(),
        }
    }
}

impl ShardConfig {
    /// Validates the configuration at startup.
    ///
    /// Configuration errors are fatal: a shard with malformed geometry
    /// constants or out-of-order handoff thresholds refuses to start.
    pub fn validate(&self) -> Result<(), ShardError> {
        if self.aura_margin <= 0.0 {
            return Err(ShardError::Config(format!(
                "aura margin must be positive, got {}",
                self.aura_margin
            )));
        }
        if self.ownership_transfer_threshold <= 0.0
            || self.ownership_transfer_threshold >= self.aura_margin
        {
            return Err(ShardError::Config(format!(
                "ownership transfer threshold ({}) must be positive and smaller than the aura margin ({})",
                self.ownership_transfer_threshold, self.aura_margin
            )));
        }

        let h = &self.handoff;
        if !(h.preparation_distance > h.aura_enter_distance
            && h.aura_enter_distance > h.migration_distance
            && h.migration_distance > h.handoff_distance
            && h.handoff_distance > 0.0)
        {
            return Err(ShardError::Config(format!(
                "handoff distances must be strictly decreasing: {} / {} / {} / {}",
                h.preparation_distance,
                h.aura_enter_distance,
                h.migration_distance,
                h.handoff_distance
            )));
        }

        if self.migration_timeout_ms == 0 {
            return Err(ShardError::Config(
                "migration timeout must be non-zero".to_string(),
            ));
        }
        if self.tick_rate == 0 || self.sync_rate == 0 || self.tick_rate % self.sync_rate != 0 {
            return Err(ShardError::Config(format!(
                "sync rate ({}) must be non-zero and divide the tick rate ({})",
                self.sync_rate, self.tick_rate
            )));
        }
        if self.max_players_per_zone == 0 {
            return Err(ShardError::Config(
                "zone capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of ticks between outbound aura sync broadcasts.
    pub fn sync_interval_ticks(&self) -> u64 {
        (self.tick_rate / self.sync_rate) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ShardConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_decreasing_handoff_distances() {
        let mut config = ShardConfig::default();
        config.handoff.aura_enter_distance = 80.0; // above preparation
        assert!(matches!(config.validate(), Err(ShardError::Config(_))));

        let mut config = ShardConfig::default();
        config.handoff.migration_distance = config.handoff.aura_enter_distance;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_ownership_threshold_wider_than_aura() {
        let mut config = ShardConfig::default();
        config.ownership_transfer_threshold = config.aura_margin;
        assert!(config.validate().is_err());

        config.ownership_transfer_threshold = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_sync_rate_not_dividing_tick_rate() {
        let mut config = ShardConfig::default();
        config.sync_rate = 25;
        assert!(config.validate().is_err());

        config.sync_rate = 20;
        assert!(config.validate().is_ok());
        assert_eq!(config.sync_interval_ticks(), 3);
    }
}
