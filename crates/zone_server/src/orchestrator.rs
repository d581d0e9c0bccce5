//! Zone orchestration.
//!
//! The orchestrator holds the cluster-wide view: which zones exist,
//! which shards are alive, how loaded each one is, and which zone each
//! player currently belongs to. It places players by position with
//! capacity spillover into adjacent zones, decides when an entity's
//! position warrants an ownership migration, and mirrors session
//! placements into a best-effort TTL store so a crashed shard's
//! players can be routed after a restart.
//!
//! Mirror writes never fail the caller; a mirror outage degrades
//! restart recovery, not live play.

use crate::config::ShardConfig;
use crate::partition::WorldPartition;
use crate::persistence::SessionMirror;
use crate::error::ShardError;
use crate::types::{PlayerId, Vec3, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shard liveness as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ZoneState {
    /// Shard process announced but not yet serving
    Starting,
    /// Serving players
    Active,
    /// Refusing new players, existing ones being handed off
    Draining,
    /// Missed heartbeats or announced shutdown
    Offline,
}

/// One zone's live status.
#[derive(Debug, Clone)]
pub struct ZoneInstance {
    pub zone: ZoneId,
    pub state: ZoneState,
    pub player_count: u32,
    pub last_heartbeat_ms: u64,
}

impl ZoneInstance {
    fn accepts_players(&self, capacity: u32) -> bool {
        matches!(self.state, ZoneState::Active | ZoneState::Starting)
            && self.player_count < capacity
    }
}

/// Session placement mirrored for restart recovery.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionPlacement {
    pub player: PlayerId,
    pub zone: ZoneId,
    pub position: Vec3,
}

fn placement_key(player: PlayerId) -> String {
    format!("session:player:{player}")
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OrchestratorStats {
    pub assigned: u64,
    pub spillovers: u64,
    pub rejected: u64,
    pub zones_lost: u64,
}

/// Cluster-wide placement and liveness tracking.
pub struct ZoneOrchestrator {
    partition: WorldPartition,
    config: ShardConfig,
    mirror: Arc<dyn SessionMirror>,
    instances: HashMap<ZoneId, ZoneInstance>,
    placements: HashMap<PlayerId, ZoneId>,
    stats: OrchestratorStats,
}

impl ZoneOrchestrator {
    pub fn new(
        partition: WorldPartition,
        config: ShardConfig,
        mirror: Arc<dyn SessionMirror>,
    ) -> Self {
        let instances = partition
            .zones()
            .iter()
            .map(|zone| {
                (
                    zone.id,
                    ZoneInstance {
                        zone: zone.id,
                        state: ZoneState::Starting,
                        player_count: 0,
                        last_heartbeat_ms: 0,
                    },
                )
            })
            .collect();
        Self {
            partition,
            config,
            mirror,
            instances,
            placements: HashMap::new(),
            stats: OrchestratorStats::default(),
        }
    }

    pub fn partition(&self) -> &WorldPartition {
        &self.partition
    }

    pub fn instance(&self, zone: ZoneId) -> Option<&ZoneInstance> {
        self.instances.get(&zone)
    }

    pub fn zone_of(&self, player: PlayerId) -> Option<ZoneId> {
        self.placements.get(&player).copied()
    }

    pub fn stats(&self) -> OrchestratorStats {
        self.stats
    }

    /// Players across every zone, as of the latest heartbeats.
    pub fn total_players(&self) -> u32 {
        self.instances.values().map(|i| i.player_count).sum()
    }

    /// Zones currently serving players.
    pub fn online_zones(&self) -> usize {
        self.instances
            .values()
            .filter(|i| i.state == ZoneState::Active)
            .count()
    }

    /// Applies a shard status report (heartbeat).
    pub fn record_heartbeat(
        &mut self,
        zone: ZoneId,
        state: ZoneState,
        player_count: u32,
        now_ms: u64,
    ) {
        let Some(instance) = self.instances.get_mut(&zone) else {
            warn!(%zone, "Heartbeat from unknown zone ignored");
            return;
        };
        if instance.state != state {
            info!(%zone, from = ?instance.state, to = ?state, "Zone state changed");
        }
        instance.state = state;
        instance.player_count = player_count;
        instance.last_heartbeat_ms = now_ms;
    }

    /// Places a player by position. The zone whose core contains the
    /// position wins; positions in an overlap band (no core) go to the
    /// nearest-center candidate. A full zone spills over into the
    /// least-loaded adjacent zone with room.
    pub fn assign_player(
        &mut self,
        player: PlayerId,
        position: Vec3,
    ) -> Result<ZoneId, ShardError> {
        let preferred = match self.partition.find_zone_for_position(position.x, position.z) {
            Some(zone) => zone.id,
            None => self
                .nearest_overlap_candidate(position)
                .ok_or(ShardError::NoZoneForPosition {
                    x: position.x,
                    z: position.z,
                })?,
        };

        // Lazy start: a placement into an offline zone wakes its
        // shard; the player is admitted while it comes up and the
        // first heartbeat confirms the transition.
        if let Some(instance) = self.instances.get_mut(&preferred) {
            if instance.state == ZoneState::Offline {
                info!(zone = %preferred, "Starting zone shard on demand");
                instance.state = ZoneState::Starting;
            }
        }

        let capacity = self.config.max_players_per_zone;
        let chosen = if self
            .instances
            .get(&preferred)
            .is_some_and(|i| i.accepts_players(capacity))
        {
            preferred
        } else {
            let spill = self.spillover_target(preferred);
            match spill {
                Some(zone) => {
                    self.stats.spillovers += 1;
                    info!(%player, %preferred, spill = %zone, "Zone full, spilling player over");
                    zone
                }
                None => {
                    self.stats.rejected += 1;
                    return Err(ShardError::Capacity(preferred));
                }
            }
        };

        self.placements.insert(player, chosen);
        if let Some(instance) = self.instances.get_mut(&chosen) {
            instance.player_count += 1;
        }
        self.stats.assigned += 1;
        self.mirror_placement(player, chosen, position);
        Ok(chosen)
    }

    /// Moves a player's placement after a committed migration.
    pub fn reassign_player(&mut self, player: PlayerId, zone: ZoneId, position: Vec3) {
        let previous = self.placements.insert(player, zone);
        if let Some(previous) = previous {
            if let Some(instance) = self.instances.get_mut(&previous) {
                instance.player_count = instance.player_count.saturating_sub(1);
            }
        }
        if let Some(instance) = self.instances.get_mut(&zone) {
            instance.player_count += 1;
        }
        debug!(%player, ?previous, %zone, "Player placement moved");
        self.mirror_placement(player, zone, position);
    }

    /// Drops a player's placement on disconnect.
    pub fn release_player(&mut self, player: PlayerId) {
        if let Some(zone) = self.placements.remove(&player) {
            if let Some(instance) = self.instances.get_mut(&zone) {
                instance.player_count = instance.player_count.saturating_sub(1);
            }
        }
        if let Err(error) = self.mirror.delete(&placement_key(player)) {
            warn!(%player, %error, "Session mirror delete failed");
        }
    }

    /// Reads a player's last mirrored placement, for routing after a
    /// shard restart.
    pub fn recover_placement(&self, player: PlayerId) -> Option<SessionPlacement> {
        match self.mirror.get(&placement_key(player)) {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(error) => {
                warn!(%player, %error, "Session mirror read failed");
                None
            }
        }
    }

    /// Whether an entity owned by `current` has moved far enough into
    /// a neighbor to transfer ownership: the neighbor's center must be
    /// strictly nearest and the position at least the transfer
    /// threshold inside the neighbor's box. Returns the claiming zone.
    pub fn should_migrate(&self, current: ZoneId, position: Vec3) -> Option<ZoneId> {
        let threshold = self.config.ownership_transfer_threshold;
        let mut best: Option<(ZoneId, f64)> = None;
        for zone in self.partition.zones() {
            if !zone.bounds.contains(position.x, position.z) {
                continue;
            }
            let dx = position.x - zone.center_x;
            let dz = position.z - zone.center_z;
            let dist = dx * dx + dz * dz;
            if best.is_none_or(|(_, d)| dist < d) {
                best = Some((zone.id, dist));
            }
        }
        let (nearest, _) = best?;
        if nearest == current {
            return None;
        }
        let depth = self.partition.zone(nearest)?.interior_depth(position.x, position.z);
        (depth >= threshold).then_some(nearest)
    }

    /// Marks zones whose shard stopped heartbeating as offline.
    pub fn update(&mut self, now_ms: u64) {
        let timeout = self.config.heartbeat_timeout_ms;
        for instance in self.instances.values_mut() {
            if instance.state == ZoneState::Active
                && now_ms.saturating_sub(instance.last_heartbeat_ms) >= timeout
            {
                warn!(zone = %instance.zone, "Zone missed heartbeats, marking offline");
                instance.state = ZoneState::Offline;
                self.stats.zones_lost += 1;
            }
        }
    }

    fn nearest_overlap_candidate(&self, position: Vec3) -> Option<ZoneId> {
        self.partition
            .find_zones_with_aura_overlap(position.x, position.z)
            .into_iter()
            .min_by(|&a, &b| {
                let da = self.center_distance_sq(a, position);
                let db = self.center_distance_sq(b, position);
                da.total_cmp(&db)
            })
    }

    fn center_distance_sq(&self, zone: ZoneId, position: Vec3) -> f64 {
        match self.partition.zone(zone) {
            Some(def) => {
                (position.x - def.center_x).powi(2) + (position.z - def.center_z).powi(2)
            }
            None => f64::INFINITY,
        }
    }

    fn spillover_target(&self, preferred: ZoneId) -> Option<ZoneId> {
        let capacity = self.config.max_players_per_zone;
        let adjacent = &self.partition.zone(preferred)?.adjacent;
        adjacent
            .iter()
            .filter_map(|id| self.instances.get(id))
            .filter(|instance| instance.accepts_players(capacity))
            .min_by_key(|instance| instance.player_count)
            .map(|instance| instance.zone)
    }

    fn mirror_placement(&self, player: PlayerId, zone: ZoneId, position: Vec3) {
        let placement = SessionPlacement {
            player,
            zone,
            position,
        };
        let value = match serde_json::to_string(&placement) {
            Ok(value) => value,
            Err(error) => {
                warn!(%player, %error, "Session placement unencodable");
                return;
            }
        };
        if let Err(error) = self
            .mirror
            .set(&placement_key(player), &value, self.config.mirror_ttl_secs)
        {
            warn!(%player, %error, "Session mirror write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::ZoneBounds;
    use crate::persistence::InMemoryMirror;

    fn orchestrator() -> ZoneOrchestrator {
        let mut config = ShardConfig::default();
        config.max_players_per_zone = 2;
        let world = ZoneBounds {
            min_x: 0.0,
            max_x: 2000.0,
            min_z: 0.0,
            max_z: 1000.0,
            min_y: -100.0,
            max_y: 500.0,
        };
        let partition = WorldPartition::create_grid(2, 1, world, &config).unwrap();
        let mut orchestrator =
            ZoneOrchestrator::new(partition, config, Arc::new(InMemoryMirror::new()));
        orchestrator.record_heartbeat(ZoneId(1), ZoneState::Active, 0, 0);
        orchestrator.record_heartbeat(ZoneId(2), ZoneState::Active, 0, 0);
        orchestrator
    }

    #[test]
    fn players_are_placed_by_core_position() {
        let mut orch = orchestrator();
        let zone = orch
            .assign_player(PlayerId(1), Vec3::new(100.0, 0.0, 500.0))
            .unwrap();
        assert_eq!(zone, ZoneId(1));
        assert_eq!(orch.zone_of(PlayerId(1)), Some(ZoneId(1)));

        let zone = orch
            .assign_player(PlayerId(2), Vec3::new(1900.0, 0.0, 500.0))
            .unwrap();
        assert_eq!(zone, ZoneId(2));
    }

    #[test]
    fn seam_positions_fall_back_to_a_candidate_zone() {
        let mut orch = orchestrator();
        // x=1000 sits exactly on the core seam and belongs to neither
        // core; placement falls back to the overlap candidates instead
        // of rejecting.
        let zone = orch
            .assign_player(PlayerId(1), Vec3::new(1000.0, 0.0, 500.0))
            .unwrap();
        assert!(zone == ZoneId(1) || zone == ZoneId(2));
        assert_eq!(orch.zone_of(PlayerId(1)), Some(zone));
    }

    #[test]
    fn full_zone_spills_into_adjacent_zone() {
        let mut orch = orchestrator();
        let p = Vec3::new(100.0, 0.0, 500.0);
        orch.assign_player(PlayerId(1), p).unwrap();
        orch.assign_player(PlayerId(2), p).unwrap();

        let zone = orch.assign_player(PlayerId(3), p).unwrap();
        assert_eq!(zone, ZoneId(2));
        assert_eq!(orch.stats().spillovers, 1);
    }

    #[test]
    fn cluster_at_capacity_rejects() {
        let mut orch = orchestrator();
        let p = Vec3::new(100.0, 0.0, 500.0);
        for id in 1..=4 {
            orch.assign_player(PlayerId(id), p).unwrap();
        }
        let err = orch.assign_player(PlayerId(5), p).unwrap_err();
        assert!(matches!(err, ShardError::Capacity(ZoneId(1))));
        assert_eq!(orch.stats().rejected, 1);
    }

    #[test]
    fn placement_outside_the_world_is_rejected() {
        let mut orch = orchestrator();
        let err = orch
            .assign_player(PlayerId(1), Vec3::new(5000.0, 0.0, 500.0))
            .unwrap_err();
        assert!(matches!(err, ShardError::NoZoneForPosition { .. }));
    }

    #[test]
    fn migration_needs_depth_past_the_threshold() {
        let orch = orchestrator();
        // 10 units into zone 2's box with zone 1's center still
        // nearer: stay.
        assert_eq!(orch.should_migrate(ZoneId(1), Vec3::new(960.0, 0.0, 500.0)), None);
        // Past the midline and 75 units deep: go.
        assert_eq!(
            orch.should_migrate(ZoneId(1), Vec3::new(1025.0, 0.0, 500.0)),
            Some(ZoneId(2))
        );
        // Owner already correct: nothing to do.
        assert_eq!(orch.should_migrate(ZoneId(2), Vec3::new(1025.0, 0.0, 500.0)), None);
    }

    #[test]
    fn placements_survive_via_the_mirror() {
        let mut orch = orchestrator();
        let position = Vec3::new(100.0, 0.0, 500.0);
        orch.assign_player(PlayerId(1), position).unwrap();

        let placement = orch.recover_placement(PlayerId(1)).unwrap();
        assert_eq!(placement.zone, ZoneId(1));

        orch.release_player(PlayerId(1));
        assert!(orch.recover_placement(PlayerId(1)).is_none());
        assert_eq!(orch.instance(ZoneId(1)).unwrap().player_count, 0);
    }

    #[test]
    fn silent_zones_go_offline() {
        let mut orch = orchestrator();
        orch.record_heartbeat(ZoneId(1), ZoneState::Active, 3, 1_000);
        // Zone 2 keeps reporting; only zone 1 goes silent.
        orch.record_heartbeat(ZoneId(2), ZoneState::Active, 0, 20_000);
        orch.update(1_000 + 30_000);
        assert_eq!(orch.instance(ZoneId(1)).unwrap().state, ZoneState::Offline);
        assert_eq!(orch.instance(ZoneId(2)).unwrap().state, ZoneState::Active);
        assert_eq!(orch.stats().zones_lost, 1);
    }

    #[test]
    fn offline_zone_is_started_on_demand() {
        let mut orch = orchestrator();
        orch.record_heartbeat(ZoneId(1), ZoneState::Offline, 0, 0);

        let zone = orch
            .assign_player(PlayerId(1), Vec3::new(100.0, 0.0, 500.0))
            .unwrap();
        assert_eq!(zone, ZoneId(1));
        assert_eq!(orch.instance(ZoneId(1)).unwrap().state, ZoneState::Starting);
    }

    #[test]
    fn cluster_totals_follow_heartbeats() {
        let mut orch = orchestrator();
        assert_eq!(orch.online_zones(), 2);

        orch.record_heartbeat(ZoneId(1), ZoneState::Active, 3, 1_000);
        orch.record_heartbeat(ZoneId(2), ZoneState::Draining, 5, 1_000);
        assert_eq!(orch.total_players(), 8);
        assert_eq!(orch.online_zones(), 1);
    }
}
