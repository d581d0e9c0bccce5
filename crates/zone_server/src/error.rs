//! Error types for the zone sharding layer.
//!
//! Categorizes failures along the lines the shard loop cares about:
//! configuration errors are fatal at startup, capacity and migration
//! errors are surfaced to callers as rejections, and everything else is
//! absorbed (duplicate or malformed cross-zone messages never raise an
//! error across the tick boundary).

use crate::types::{EntityId, PlayerId, ZoneId};

/// Enumeration of possible shard errors.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    /// Invalid startup configuration (malformed geometry, non-decreasing
    /// handoff thresholds). Fatal: the shard refuses to initialize.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The target zone and all of its adjacent zones are at capacity.
    #[error("Zone {0} is at capacity and no adjacent zone has room")]
    Capacity(ZoneId),

    /// No zone's core region contains the given position.
    #[error("No zone contains position ({x:.1}, {z:.1})")]
    NoZoneForPosition { x: f64, z: f64 },

    /// A migration was requested for an entity that already has one
    /// in flight.
    #[error("Entity {0} is already migrating")]
    AlreadyMigrating(EntityId),

    /// The entity does not exist in this shard's store.
    #[error("Entity {0} not found")]
    UnknownEntity(EntityId),

    /// A cancellation arrived after the handover had already entered
    /// its completion phase.
    #[error("Migration for entity {0} can no longer be cancelled")]
    MigrationNotCancellable(EntityId),

    /// The zone id does not name a known zone.
    #[error("Unknown zone {0}")]
    UnknownZone(ZoneId),

    /// No handoff is active for the given player.
    #[error("No active handoff for player {0}")]
    NoActiveHandoff(PlayerId),

    /// A reconnect presented a token that is wrong, expired, or
    /// already spent.
    #[error("Handoff token rejected for player {0}")]
    TokenRejected(PlayerId),

    /// Payload encoding or decoding failed.
    #[error("Payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),

    /// Best-effort session mirror failure. Callers log and continue.
    #[error("Session mirror error: {0}")]
    Mirror(String),
}
