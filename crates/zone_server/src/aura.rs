//! Aura projection.
//!
//! Each zone's box extends past its core by the aura margin, so
//! entities near a boundary exist in up to four zones at once: owned
//! by exactly one, mirrored as read-only ghosts in the others. This
//! module maintains the ghost table fed by `EntitySync` messages,
//! decides which neighbors an owned entity must be synced into, and
//! evaluates the ownership-claim hysteresis.
//!
//! Ownership transfers only when a neighbor's center is strictly
//! nearest AND the entity sits at least the transfer threshold inside
//! that neighbor's box. The threshold is below the aura margin, so an
//! entity oscillating on the seam keeps its owner instead of
//! ping-ponging.

use crate::config::ShardConfig;
use crate::partition::{WorldPartition, ZoneDefinition};
use crate::types::{EntityId, Vec3, ZoneId};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Read-only mirror of an entity owned by an adjacent zone.
#[derive(Debug, Clone)]
pub struct AuraEntityState {
    pub entity: EntityId,
    pub source_zone: ZoneId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub last_update_ms: u64,
}

/// Ghosts that miss this many milliseconds of updates are dropped.
/// Twenty missed intervals at the 20 Hz sync rate; generous enough to
/// ride out transient bus hiccups without keeping dead ghosts around.
const GHOST_STALE_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, Default)]
pub struct AuraStats {
    pub ghost_count: usize,
    pub syncs_received: u64,
    pub ghosts_pruned: u64,
}

/// Per-zone aura bookkeeping.
pub struct AuraProjectionManager {
    zone: ZoneDefinition,
    ownership_transfer_threshold: f64,
    ghosts: HashMap<EntityId, AuraEntityState>,
    syncs_received: u64,
    ghosts_pruned: u64,
}

impl AuraProjectionManager {
    pub fn new(zone: ZoneDefinition, config: &ShardConfig) -> Self {
        Self {
            zone,
            ownership_transfer_threshold: config.ownership_transfer_threshold,
            ghosts: HashMap::new(),
            syncs_received: 0,
            ghosts_pruned: 0,
        }
    }

    pub fn zone_id(&self) -> ZoneId {
        self.zone.id
    }

    /// Applies an `EntitySync` from a neighbor. Positions outside this
    /// zone's box drop the ghost: the entity has left our aura.
    pub fn record_remote_sync(
        &mut self,
        entity: EntityId,
        source_zone: ZoneId,
        position: Vec3,
        velocity: Vec3,
        now_ms: u64,
    ) {
        self.syncs_received += 1;
        if !self.zone.bounds.contains(position.x, position.z) {
            if self.ghosts.remove(&entity).is_some() {
                trace!(zone = %self.zone.id, %entity, "Ghost left aura");
            }
            return;
        }
        self.ghosts.insert(
            entity,
            AuraEntityState {
                entity,
                source_zone,
                position,
                velocity,
                last_update_ms: now_ms,
            },
        );
    }

    pub fn ghost(&self, entity: EntityId) -> Option<&AuraEntityState> {
        self.ghosts.get(&entity)
    }

    pub fn ghosts(&self) -> impl Iterator<Item = &AuraEntityState> {
        self.ghosts.values()
    }

    /// Zone currently authoritative for a ghosted entity, if we hold a
    /// ghost for it.
    pub fn owner_zone(&self, entity: EntityId) -> Option<ZoneId> {
        self.ghosts.get(&entity).map(|state| state.source_zone)
    }

    /// Ghosts within `radius` (planar) of a viewer position. This is
    /// the visibility feed for the local simulation: entities owned by
    /// a neighbor show up in interest queries next to locally owned
    /// ones.
    pub fn entities_in_aura_for(&self, viewer: Vec3, radius: f64) -> Vec<&AuraEntityState> {
        self.ghosts
            .values()
            .filter(|state| state.position.distance_planar(viewer) <= radius)
            .collect()
    }

    /// Drops the ghost once the entity becomes locally owned (or is
    /// destroyed remotely).
    pub fn remove_ghost(&mut self, entity: EntityId) -> bool {
        self.ghosts.remove(&entity).is_some()
    }

    /// Evicts ghosts whose owner stopped syncing them.
    pub fn prune_stale(&mut self, now_ms: u64) {
        let before = self.ghosts.len();
        self.ghosts
            .retain(|_, state| now_ms.saturating_sub(state.last_update_ms) < GHOST_STALE_MS);
        let pruned = before - self.ghosts.len();
        if pruned > 0 {
            self.ghosts_pruned += pruned as u64;
            debug!(zone = %self.zone.id, pruned, "Pruned stale aura ghosts");
        }
    }

    /// Neighbors whose box contains the position, i.e. the zones an
    /// owned entity at that position must be synced into.
    pub fn zones_needing_sync(&self, partition: &WorldPartition, position: Vec3) -> Vec<ZoneId> {
        partition
            .find_zones_with_aura_overlap(position.x, position.z)
            .into_iter()
            .filter(|&id| id != self.zone.id)
            .collect()
    }

    /// Ownership-claim hysteresis: this zone may claim an entity at
    /// `position` only when its center is strictly nearest among every
    /// zone whose box contains the position, and the entity sits at
    /// least the transfer threshold inside this zone's box. Ties keep
    /// the current owner.
    pub fn should_take_ownership(&self, partition: &WorldPartition, position: Vec3) -> bool {
        if self.zone.interior_depth(position.x, position.z) < self.ownership_transfer_threshold {
            return false;
        }
        let own_dist = center_distance_sq(&self.zone, position);
        for other in partition.zones() {
            if other.id == self.zone.id || !other.bounds.contains(position.x, position.z) {
                continue;
            }
            if center_distance_sq(other, position) <= own_dist {
                return false;
            }
        }
        true
    }

    pub fn stats(&self) -> AuraStats {
        AuraStats {
            ghost_count: self.ghosts.len(),
            syncs_received: self.syncs_received,
            ghosts_pruned: self.ghosts_pruned,
        }
    }
}

fn center_distance_sq(zone: &ZoneDefinition, position: Vec3) -> f64 {
    let dx = position.x - zone.center_x;
    let dz = position.z - zone.center_z;
    dx * dx + dz * dz
}
