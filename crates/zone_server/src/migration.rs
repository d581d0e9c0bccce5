//! Entity migration.
//!
//! Moves an entity's authoritative state from one shard to another as
//! an atomic handover: the source captures a snapshot, ships it, and
//! destroys its copy only after the target acknowledges the restore.
//! Every failure path (timeout, rejected restore) leaves exactly one
//! authoritative copy alive: the source's on outbound failure, none
//! duplicated on inbound failure.
//!
//! The state machine is driven entirely by `update` calls with an
//! explicit clock; nothing here reads wall time.

use crate::config::ShardConfig;
use crate::entity::{EntitySnapshot, EntityStore};
use crate::error::ShardError;
use crate::messenger::CrossZoneMessenger;
use crate::types::{EntityId, PlayerId, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Migration lifecycle. `Completed` and `Failed` are terminal; records
/// in a terminal state linger until the following tick so same-tick
/// observers (the handoff controller) can read the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationState {
    None,
    Preparing,
    Transferring,
    Syncing,
    Completing,
    Completed,
    Failed,
}

impl MigrationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, MigrationState::Completed | MigrationState::Failed)
    }
}

/// Which side of the handover this shard is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone)]
struct ActiveMigration {
    entity: EntityId,
    player_id: PlayerId,
    peer_zone: ZoneId,
    direction: Direction,
    state: MigrationState,
    started_ms: u64,
    /// Captured snapshot awaiting shipment; taken on the
    /// `Preparing` to `Transferring` step.
    snapshot: Option<Box<EntitySnapshot>>,
    /// Set when the record enters a terminal state; the record is
    /// removed on the first `update` with a strictly later clock.
    terminal_since_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationStats {
    pub started: u64,
    pub received: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
    pub duplicates_ignored: u64,
    pub total_duration_ms: u64,
    pub max_duration_ms: u64,
}

impl MigrationStats {
    /// Mean wall time of committed handovers.
    pub fn avg_duration_ms(&self) -> u64 {
        if self.completed == 0 {
            0
        } else {
            self.total_duration_ms / self.completed
        }
    }
}

/// Drives both sides of entity handovers for one shard.
pub struct EntityMigrationManager {
    zone_id: ZoneId,
    timeout_ms: u64,
    active: HashMap<EntityId, ActiveMigration>,
    stats: MigrationStats,
}

impl EntityMigrationManager {
    pub fn new(zone_id: ZoneId, config: &ShardConfig) -> Self {
        Self {
            zone_id,
            timeout_ms: config.migration_timeout_ms,
            active: HashMap::new(),
            stats: MigrationStats::default(),
        }
    }

    /// Current state for an entity, `None` variant when no record
    /// exists.
    pub fn migration_state(&self, entity: EntityId) -> MigrationState {
        self.active
            .get(&entity)
            .map(|m| m.state)
            .unwrap_or(MigrationState::None)
    }

    /// True while a non-terminal migration is in flight.
    pub fn is_migrating(&self, entity: EntityId) -> bool {
        self.active
            .get(&entity)
            .is_some_and(|m| !m.state.is_terminal())
    }

    pub fn active_count(&self) -> usize {
        self.active.values().filter(|m| !m.state.is_terminal()).count()
    }

    pub fn stats(&self) -> MigrationStats {
        self.stats
    }

    /// Starts an outbound migration: captures the entity's snapshot and
    /// enqueues it in `Preparing`. The next `update` step ships it; the
    /// local copy stays authoritative until the target acknowledges.
    pub fn begin_migration(
        &mut self,
        entity: EntityId,
        target_zone: ZoneId,
        store: &dyn EntityStore,
        now_ms: u64,
    ) -> Result<(), ShardError> {
        if self.is_migrating(entity) {
            return Err(ShardError::AlreadyMigrating(entity));
        }
        let mut snapshot = store
            .capture(entity)
            .ok_or(ShardError::UnknownEntity(entity))?;
        snapshot.source_zone = self.zone_id;
        snapshot.target_zone = target_zone;
        snapshot.timestamp_ms = now_ms as u32;

        self.active.insert(
            entity,
            ActiveMigration {
                entity,
                player_id: snapshot.player_id,
                peer_zone: target_zone,
                direction: Direction::Outbound,
                state: MigrationState::Preparing,
                started_ms: now_ms,
                snapshot: Some(Box::new(snapshot)),
                terminal_since_ms: None,
            },
        );
        self.stats.started += 1;
        info!(zone = %self.zone_id, %entity, target = %target_zone, "Migration started");
        Ok(())
    }

    /// Abandons an in-flight migration. Only valid before the
    /// completion phase: once the peer has committed, the handover
    /// must run to its terminal state.
    ///
    /// An outbound cancel leaves the source copy authoritative and
    /// lets the target's restore time out; an inbound cancel rolls the
    /// restore back immediately.
    pub fn cancel_migration(
        &mut self,
        entity: EntityId,
        store: &mut dyn EntityStore,
        now_ms: u64,
    ) -> Result<(), ShardError> {
        let Some(migration) = self.active.get_mut(&entity) else {
            return Err(ShardError::UnknownEntity(entity));
        };
        if matches!(
            migration.state,
            MigrationState::Completing | MigrationState::Completed | MigrationState::Failed
        ) {
            return Err(ShardError::MigrationNotCancellable(entity));
        }

        if migration.direction == Direction::Inbound {
            store.destroy(entity);
        }
        migration.state = MigrationState::Failed;
        migration.terminal_since_ms = Some(now_ms);
        self.stats.cancelled += 1;
        info!(zone = %self.zone_id, %entity, "Migration cancelled");
        Ok(())
    }

    /// Target side: restores the snapshot and acknowledges. Duplicate
    /// requests for an entity already restored (or in flight) re-ack
    /// without touching state.
    pub fn handle_migration_request(
        &mut self,
        snapshot: &EntitySnapshot,
        store: &mut dyn EntityStore,
        messenger: &mut CrossZoneMessenger,
        now_ms: u64,
    ) {
        let entity = snapshot.entity;
        if self.active.contains_key(&entity) || store.contains(entity) {
            self.stats.duplicates_ignored += 1;
            debug!(zone = %self.zone_id, %entity, "Duplicate migration request, re-acking");
            messenger.send_migration_state(
                snapshot.source_zone,
                entity,
                MigrationState::Syncing,
                now_ms,
            );
            return;
        }

        store.restore(snapshot);
        self.active.insert(
            entity,
            ActiveMigration {
                entity,
                player_id: snapshot.player_id,
                peer_zone: snapshot.source_zone,
                direction: Direction::Inbound,
                state: MigrationState::Syncing,
                started_ms: now_ms,
                snapshot: None,
                terminal_since_ms: None,
            },
        );
        messenger.send_migration_state(
            snapshot.source_zone,
            entity,
            MigrationState::Syncing,
            now_ms,
        );
        self.stats.received += 1;
        info!(zone = %self.zone_id, %entity, source = %snapshot.source_zone, "Migration snapshot restored");
    }

    /// Source side: a `Syncing` acknowledgment means the target holds a
    /// live copy. The record moves to `Syncing`; the next `update` step
    /// commits the handover.
    pub fn handle_migration_state(
        &mut self,
        peer_zone: ZoneId,
        entity: EntityId,
        state: MigrationState,
        now_ms: u64,
    ) {
        let Some(migration) = self.active.get_mut(&entity) else {
            return;
        };
        if migration.direction != Direction::Outbound
            || migration.peer_zone != peer_zone
            || migration.state.is_terminal()
        {
            return;
        }
        if state == MigrationState::Syncing {
            migration.state = MigrationState::Syncing;
            debug!(zone = %self.zone_id, %entity, target = %peer_zone, "Target acknowledged restore");
        } else if state == MigrationState::Failed {
            migration.state = MigrationState::Failed;
            migration.terminal_since_ms = Some(now_ms);
            self.stats.failed += 1;
            warn!(zone = %self.zone_id, %entity, target = %peer_zone, "Migration rejected by target");
        }
    }

    /// Target side: the source's completion broadcast finishes the
    /// inbound record.
    pub fn handle_migration_complete(&mut self, entity: EntityId, now_ms: u64) {
        if let Some(migration) = self.active.get_mut(&entity) {
            if migration.direction == Direction::Inbound && !migration.state.is_terminal() {
                migration.state = MigrationState::Completed;
                migration.terminal_since_ms = Some(now_ms);
                self.stats.completed += 1;
                let duration = now_ms.saturating_sub(migration.started_ms);
                self.stats.total_duration_ms += duration;
                self.stats.max_duration_ms = self.stats.max_duration_ms.max(duration);
                debug!(zone = %self.zone_id, %entity, "Inbound migration completed");
            }
        }
    }

    /// Per-tick stepper: ships pending snapshots, commits acknowledged
    /// handovers, fails timed-out migrations and garbage collects
    /// terminal records from earlier ticks. Returns the entities whose
    /// outbound handover committed during this call, so the caller can
    /// drive the dependent handoffs forward.
    ///
    /// An outbound timeout leaves the source entity untouched (it was
    /// never destroyed). An inbound timeout rolls the restore back so
    /// the entity cannot exist twice.
    pub fn update(
        &mut self,
        store: &mut dyn EntityStore,
        messenger: &mut CrossZoneMessenger,
        now_ms: u64,
    ) -> Vec<EntityId> {
        let mut committed = Vec::new();
        for migration in self.active.values_mut() {
            if migration.state.is_terminal() {
                continue;
            }
            if now_ms.saturating_sub(migration.started_ms) >= self.timeout_ms {
                warn!(
                    zone = %self.zone_id,
                    entity = %migration.entity,
                    peer = %migration.peer_zone,
                    state = ?migration.state,
                    "Migration timed out"
                );
                if migration.direction == Direction::Inbound {
                    store.destroy(migration.entity);
                }
                migration.state = MigrationState::Failed;
                migration.terminal_since_ms = Some(now_ms);
                self.stats.failed += 1;
                self.stats.timed_out += 1;
                continue;
            }
            if migration.direction != Direction::Outbound {
                continue;
            }
            match migration.state {
                MigrationState::Preparing => {
                    if let Some(snapshot) = migration.snapshot.take() {
                        messenger.send_migration_request(migration.peer_zone, &snapshot, now_ms);
                    }
                    migration.state = MigrationState::Transferring;
                    debug!(
                        zone = %self.zone_id,
                        entity = %migration.entity,
                        target = %migration.peer_zone,
                        "Migration snapshot shipped"
                    );
                }
                MigrationState::Syncing => {
                    // The target holds a live copy; retire ours and
                    // broadcast the commit.
                    migration.state = MigrationState::Completing;
                    store.destroy(migration.entity);
                    messenger.send_migration_complete(migration.entity, migration.player_id, now_ms);
                    migration.state = MigrationState::Completed;
                    migration.terminal_since_ms = Some(now_ms);
                    let duration = now_ms.saturating_sub(migration.started_ms);
                    self.stats.completed += 1;
                    self.stats.total_duration_ms += duration;
                    self.stats.max_duration_ms = self.stats.max_duration_ms.max(duration);
                    committed.push(migration.entity);
                    info!(
                        zone = %self.zone_id,
                        entity = %migration.entity,
                        target = %migration.peer_zone,
                        duration_ms = duration,
                        "Migration committed"
                    );
                }
                _ => {}
            }
        }
        self.active
            .retain(|_, m| match m.terminal_since_ms {
                Some(terminal_since) => terminal_since >= now_ms,
                None => true,
            });
        committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::WorldState;
    use crate::messenger::{CrossZoneMessenger, InProcessBus, MessageBus, ZoneEvent};
    use crate::types::{ConnectionId, Vec3};
    use std::sync::Arc;

    struct Fixture {
        source: EntityMigrationManager,
        target: EntityMigrationManager,
        source_store: WorldState,
        target_store: WorldState,
        source_bus: CrossZoneMessenger,
        target_bus: CrossZoneMessenger,
    }

    fn fixture() -> Fixture {
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let config = ShardConfig::default();
        Fixture {
            source: EntityMigrationManager::new(ZoneId(1), &config),
            target: EntityMigrationManager::new(ZoneId(2), &config),
            source_store: WorldState::new(),
            target_store: WorldState::new(),
            source_bus: CrossZoneMessenger::new(ZoneId(1), Arc::clone(&bus)),
            target_bus: CrossZoneMessenger::new(ZoneId(2), bus),
        }
    }

    fn pump(fx: &mut Fixture, now_ms: u64) {
        for event in fx.target_bus.poll() {
            match event {
                ZoneEvent::MigrationRequest { snapshot } => fx.target.handle_migration_request(
                    &snapshot,
                    &mut fx.target_store,
                    &mut fx.target_bus,
                    now_ms,
                ),
                ZoneEvent::MigrationComplete { entity, .. } => {
                    fx.target.handle_migration_complete(entity, now_ms)
                }
                _ => {}
            }
        }
        for event in fx.source_bus.poll() {
            if let ZoneEvent::MigrationState {
                source_zone,
                entity,
                state,
            } = event
            {
                fx.source.handle_migration_state(source_zone, entity, state, now_ms);
            }
        }
    }

    /// One source-side stepper call, mirroring the shard's tick.
    fn step_source(fx: &mut Fixture, now_ms: u64) -> Vec<EntityId> {
        fx.source
            .update(&mut fx.source_store, &mut fx.source_bus, now_ms)
    }

    #[test]
    fn successful_migration_moves_the_entity_exactly_once() {
        let mut fx = fixture();
        let entity = fx
            .source_store
            .spawn_player(PlayerId(9), ConnectionId(1), Vec3::new(990.0, 0.0, 500.0));

        fx.source
            .begin_migration(entity, ZoneId(2), &fx.source_store, 1000)
            .unwrap();
        assert_eq!(fx.source.migration_state(entity), MigrationState::Preparing);
        assert!(fx.source.is_migrating(entity));

        // Ship the snapshot, restore on the target, ack back.
        assert!(step_source(&mut fx, 1000).is_empty());
        assert_eq!(
            fx.source.migration_state(entity),
            MigrationState::Transferring
        );
        pump(&mut fx, 1016);
        assert_eq!(fx.source.migration_state(entity), MigrationState::Syncing);

        // The next stepper call commits and broadcasts the completion.
        let committed = step_source(&mut fx, 1033);
        assert_eq!(committed, vec![entity]);
        pump(&mut fx, 1033);

        assert!(!fx.source_store.contains(entity));
        assert!(fx.target_store.contains(entity));
        assert_eq!(fx.source.migration_state(entity), MigrationState::Completed);
        assert_eq!(fx.source.stats().completed, 1);
        // Started at 1000, committed at 1033.
        assert_eq!(fx.source.stats().max_duration_ms, 33);
        assert_eq!(fx.source.stats().avg_duration_ms(), 33);
    }

    #[test]
    fn double_begin_is_rejected() {
        let mut fx = fixture();
        let entity = fx.source_store.spawn_player(PlayerId(9), ConnectionId(1), Vec3::zero());
        fx.source
            .begin_migration(entity, ZoneId(2), &fx.source_store, 0)
            .unwrap();
        let err = fx
            .source
            .begin_migration(entity, ZoneId(2), &fx.source_store, 1)
            .unwrap_err();
        assert!(matches!(err, ShardError::AlreadyMigrating(e) if e == entity));
    }

    #[test]
    fn duplicate_request_does_not_duplicate_the_entity() {
        let mut fx = fixture();
        let entity = fx.source_store.spawn_player(PlayerId(9), ConnectionId(1), Vec3::zero());
        let snapshot = {
            let mut s = fx.source_store.capture(entity).unwrap();
            s.source_zone = ZoneId(1);
            s.target_zone = ZoneId(2);
            s
        };

        fx.target
            .handle_migration_request(&snapshot, &mut fx.target_store, &mut fx.target_bus, 100);
        fx.target
            .handle_migration_request(&snapshot, &mut fx.target_store, &mut fx.target_bus, 110);

        assert_eq!(fx.target.stats().received, 1);
        assert_eq!(fx.target.stats().duplicates_ignored, 1);
        assert!(fx.target_store.contains(entity));
        // Both requests were acked.
        let acks = fx
            .source_bus
            .poll()
            .into_iter()
            .filter(|e| matches!(e, ZoneEvent::MigrationState { .. }))
            .count();
        assert_eq!(acks, 2);
    }

    #[test]
    fn outbound_timeout_leaves_source_entity_intact() {
        let mut fx = fixture();
        let entity = fx.source_store.spawn_player(PlayerId(9), ConnectionId(1), Vec3::zero());
        fx.source
            .begin_migration(entity, ZoneId(2), &fx.source_store, 1000)
            .unwrap();
        step_source(&mut fx, 1000);

        // No ack ever arrives.
        step_source(&mut fx, 6000);
        assert_eq!(fx.source.migration_state(entity), MigrationState::Failed);
        assert!(fx.source_store.contains(entity));
        assert_eq!(fx.source.stats().timed_out, 1);

        // The terminal record survives the timeout tick and is swept
        // on the next one.
        step_source(&mut fx, 6016);
        assert_eq!(fx.source.migration_state(entity), MigrationState::None);
        assert!(!fx.source.is_migrating(entity));
    }

    #[test]
    fn inbound_timeout_rolls_back_the_restore() {
        let mut fx = fixture();
        let entity = fx.source_store.spawn_player(PlayerId(9), ConnectionId(1), Vec3::zero());
        let mut snapshot = fx.source_store.capture(entity).unwrap();
        snapshot.source_zone = ZoneId(1);
        snapshot.target_zone = ZoneId(2);

        fx.target
            .handle_migration_request(&snapshot, &mut fx.target_store, &mut fx.target_bus, 1000);
        assert!(fx.target_store.contains(entity));

        // The completion broadcast never arrives.
        fx.target.update(&mut fx.target_store, &mut fx.target_bus, 6000);
        assert!(!fx.target_store.contains(entity));
        assert_eq!(fx.target.migration_state(entity), MigrationState::Failed);
    }

    #[test]
    fn cancel_is_only_allowed_before_completion() {
        let mut fx = fixture();
        let entity = fx.source_store.spawn_player(PlayerId(9), ConnectionId(1), Vec3::zero());
        fx.source
            .begin_migration(entity, ZoneId(2), &fx.source_store, 1000)
            .unwrap();
        step_source(&mut fx, 1000);

        // Still transferring: the cancel lands and the source copy
        // stays authoritative.
        fx.source
            .cancel_migration(entity, &mut fx.source_store, 1016)
            .unwrap();
        assert!(fx.source_store.contains(entity));
        assert_eq!(fx.source.migration_state(entity), MigrationState::Failed);
        assert_eq!(fx.source.stats().cancelled, 1);

        // A completed handover can no longer be cancelled.
        let mut fx = fixture();
        let entity = fx.source_store.spawn_player(PlayerId(9), ConnectionId(1), Vec3::zero());
        fx.source
            .begin_migration(entity, ZoneId(2), &fx.source_store, 1000)
            .unwrap();
        step_source(&mut fx, 1000);
        pump(&mut fx, 1016);
        step_source(&mut fx, 1016);
        let err = fx
            .source
            .cancel_migration(entity, &mut fx.source_store, 1040)
            .unwrap_err();
        assert!(matches!(err, ShardError::MigrationNotCancellable(e) if e == entity));
    }

    #[test]
    fn inbound_cancel_rolls_back_the_restore() {
        let mut fx = fixture();
        let entity = fx.source_store.spawn_player(PlayerId(9), ConnectionId(1), Vec3::zero());
        let mut snapshot = fx.source_store.capture(entity).unwrap();
        snapshot.source_zone = ZoneId(1);
        snapshot.target_zone = ZoneId(2);

        fx.target
            .handle_migration_request(&snapshot, &mut fx.target_store, &mut fx.target_bus, 1000);
        assert!(fx.target_store.contains(entity));

        fx.target
            .cancel_migration(entity, &mut fx.target_store, 1016)
            .unwrap();
        assert!(!fx.target_store.contains(entity));
    }

    #[test]
    fn unknown_entity_cannot_migrate() {
        let mut fx = fixture();
        let err = fx
            .source
            .begin_migration(EntityId(404), ZoneId(2), &fx.source_store, 0)
            .unwrap_err();
        assert!(matches!(err, ShardError::UnknownEntity(e) if e == EntityId(404)));
    }
}
