//! # Core Type Definitions
//!
//! Fundamental identifier and geometry types shared by every zone
//! component. Wrapper types prevent ID confusion (a `ZoneId` can never
//! be passed where an `EntityId` is expected), and all of them are
//! `Copy` so they move freely through the per-tick state machines.
//!
//! Identifiers are plain integers rather than UUIDs because they travel
//! in the fixed-width cross-zone wire envelope (`ZoneMessage`), where
//! zone ids are `u32` and entity/player ids are `u64`.

use serde::{Deserialize, Serialize};

/// Unique identifier for a zone (and the shard process that owns it).
///
/// Zone ids are 1-based; id 0 is reserved as the broadcast target in
/// cross-zone messages and never names a real zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub u32);

impl ZoneId {
    /// The reserved "all zones" target used in message envelopes.
    pub const BROADCAST: ZoneId = ZoneId(0);

    /// Returns true if this id addresses every zone rather than one.
    pub fn is_broadcast(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for ZoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a simulated entity within the world.
///
/// Entity ids are stable across migration: the receiving shard
/// re-creates the entity under the same id so that aura ghosts and
/// in-flight references stay coherent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persistent identifier for a connected player account.
///
/// NPCs carry [`PlayerId::NONE`]; anything that needs to distinguish
/// player-driven entities checks [`PlayerId::is_player`]. The default
/// value is the NPC sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub u64);

impl PlayerId {
    /// Sentinel for entities with no owning player (NPCs).
    pub const NONE: PlayerId = PlayerId(0);

    /// Returns true for real players, false for the NPC sentinel.
    pub fn is_player(self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one live network connection on this shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 3D vector with double precision, used for both positions and
/// velocities.
///
/// Zone geometry is planar: partitioning, distance-to-edge, and
/// direction math operate on the X/Z plane, with Y carried along for
/// entity state only.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// X coordinate (east-west axis)
    pub x: f64,
    /// Y coordinate (vertical axis)
    pub y: f64,
    /// Z coordinate (north-south axis)
    pub z: f64,
}

impl Vec3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Distance to `other` ignoring the vertical axis.
    pub fn distance_planar(&self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }

    /// Unit vector on the X/Z plane pointing in this vector's
    /// direction, or zero if the planar magnitude is negligible.
    pub fn normalized_planar(&self) -> Vec3 {
        let len = (self.x * self.x + self.z * self.z).sqrt();
        if len > 1e-3 {
            Vec3::new(self.x / len, 0.0, self.z / len)
        } else {
            Vec3::zero()
        }
    }
}
