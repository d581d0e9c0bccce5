//! The per-zone shard.
//!
//! `ZoneShard` owns one zone's authoritative world state and wires the
//! aura projection, migration manager, handoff controller and
//! messenger into a single-threaded tick. All cross-zone traffic is
//! drained at the top of the tick and dispatched to the owning
//! component; entity state syncs go out every third tick (20 Hz
//! against the 60 Hz simulation), and a liveness heartbeat goes out
//! once per second.
//!
//! The tick takes an explicit clock. Nothing in the shard reads wall
//! time, which keeps every state machine deterministic under test.

use crate::aura::AuraProjectionManager;
use crate::config::ShardConfig;
use crate::entity::{EntityStore, WorldState};
use crate::error::ShardError;
use crate::handoff::{ClientNotifier, HandoffAction, HandoffPhase, ZoneHandoffController};
use crate::messenger::{CrossZoneMessenger, MessageBus, ZoneEvent};
use crate::migration::EntityMigrationManager;
use crate::orchestrator::ZoneState;
use crate::partition::{WorldPartition, ZoneDefinition};
use crate::types::{ConnectionId, EntityId, PlayerId, Vec3, ZoneId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One zone's authoritative shard.
pub struct ZoneShard {
    definition: ZoneDefinition,
    partition: Arc<WorldPartition>,
    config: ShardConfig,
    state: ZoneState,
    store: WorldState,
    messenger: CrossZoneMessenger,
    aura: AuraProjectionManager,
    migrations: EntityMigrationManager,
    handoffs: ZoneHandoffController,
    players: HashMap<PlayerId, EntityId>,
    tick: u64,
    sync_interval: u64,
    heartbeat_interval: u64,
}

impl ZoneShard {
    pub fn new(
        definition: ZoneDefinition,
        partition: Arc<WorldPartition>,
        config: &ShardConfig,
        bus: Arc<dyn MessageBus>,
        notifier: Arc<dyn ClientNotifier>,
    ) -> Self {
        let zone_id = definition.id;
        info!(zone = %zone_id, name = %definition.name, port = definition.port, "Zone shard starting");
        Self {
            messenger: CrossZoneMessenger::new(zone_id, bus),
            aura: AuraProjectionManager::new(definition.clone(), config),
            migrations: EntityMigrationManager::new(zone_id, config),
            handoffs: ZoneHandoffController::new(definition.clone(), config, notifier),
            definition,
            partition,
            config: config.clone(),
            state: ZoneState::Active,
            store: WorldState::new(),
            players: HashMap::new(),
            tick: 0,
            sync_interval: config.sync_interval_ticks(),
            heartbeat_interval: config.tick_rate as u64,
        }
    }

    pub fn zone_id(&self) -> ZoneId {
        self.definition.id
    }

    pub fn state(&self) -> ZoneState {
        self.state
    }

    pub fn set_state(&mut self, state: ZoneState) {
        self.state = state;
    }

    pub fn player_count(&self) -> u32 {
        self.players.len() as u32
    }

    pub fn store(&self) -> &WorldState {
        &self.store
    }

    pub fn handoff_phase(&self, player: PlayerId) -> HandoffPhase {
        self.handoffs.phase(player)
    }

    /// Admits a freshly routed player. The position must lie inside
    /// this zone's box; the orchestrator is responsible for routing to
    /// the right shard.
    pub fn connect_player(
        &mut self,
        player: PlayerId,
        connection: ConnectionId,
        position: Vec3,
    ) -> Result<EntityId, ShardError> {
        if self.player_count() >= self.config.max_players_per_zone {
            return Err(ShardError::Capacity(self.definition.id));
        }
        if !self.definition.bounds.contains(position.x, position.z) {
            return Err(ShardError::NoZoneForPosition {
                x: position.x,
                z: position.z,
            });
        }
        let entity = self.store.spawn_player(player, connection, position);
        self.players.insert(player, entity);
        info!(zone = %self.definition.id, %player, %entity, "Player connected");
        Ok(entity)
    }

    /// Admits a player arriving through a handoff. The entity was
    /// already restored by the inbound migration; the token proves the
    /// client is the one the source shard sent.
    pub fn accept_reconnect(
        &mut self,
        player: PlayerId,
        connection: ConnectionId,
        token: &str,
        now_ms: u64,
    ) -> Result<EntityId, ShardError> {
        self.handoffs
            .accept_reconnect(player, token, &mut self.messenger, now_ms)?;
        let entity = self
            .store
            .find_player(player)
            .ok_or(ShardError::NoActiveHandoff(player))?;
        if let Some(record) = self.store.record_mut(entity) {
            record.connection = Some(connection);
        }
        self.players.insert(player, entity);
        info!(zone = %self.definition.id, %player, %entity, "Player arrived via handoff");
        Ok(entity)
    }

    pub fn disconnect_player(&mut self, player: PlayerId) {
        if let Some(entity) = self.players.remove(&player) {
            self.store.destroy(entity);
            info!(zone = %self.definition.id, %player, %entity, "Player disconnected");
        }
    }

    /// Applies a simulation transform update for a player's entity.
    pub fn set_player_transform(&mut self, player: PlayerId, position: Vec3, velocity: Vec3) {
        if let Some(&entity) = self.players.get(&player) {
            self.store.set_transform(entity, position, velocity);
        }
    }

    /// One simulation tick.
    pub fn tick(&mut self, now_ms: u64) {
        self.dispatch_events(now_ms);
        self.drive_handoffs(now_ms);
        // Committed handovers push their handoff into the connection
        // switch on the same tick.
        let committed = self
            .migrations
            .update(&mut self.store, &mut self.messenger, now_ms);
        for entity in committed {
            self.handoffs
                .on_migration_complete(entity, &self.partition, &mut self.messenger, now_ms);
        }
        self.handoffs.update(now_ms);
        self.aura.prune_stale(now_ms);

        if self.tick % self.sync_interval == 0 {
            self.sync_aura_entities(now_ms);
        }
        if self.tick % self.heartbeat_interval == 0 {
            self.messenger.send_shard_status(
                self.definition.id,
                self.state,
                self.player_count(),
                self.config.max_players_per_zone,
                now_ms,
            );
        }

        // Drop bookkeeping for players whose entity left and whose
        // handoff record has been swept.
        let store = &self.store;
        let migrations = &self.migrations;
        let handoffs = &self.handoffs;
        self.players.retain(|player, entity| {
            store.contains(*entity)
                || migrations.is_migrating(*entity)
                || handoffs.phase(*player) != HandoffPhase::None
        });

        self.tick += 1;
    }

    fn dispatch_events(&mut self, now_ms: u64) {
        for event in self.messenger.poll() {
            match event {
                ZoneEvent::EntitySync {
                    source_zone,
                    entity,
                    position,
                    velocity,
                } => {
                    self.aura
                        .record_remote_sync(entity, source_zone, position, velocity, now_ms);
                }
                ZoneEvent::MigrationRequest { snapshot } => {
                    self.migrations.handle_migration_request(
                        &snapshot,
                        &mut self.store,
                        &mut self.messenger,
                        now_ms,
                    );
                }
                ZoneEvent::MigrationState {
                    source_zone,
                    entity,
                    state,
                } => {
                    self.migrations
                        .handle_migration_state(source_zone, entity, state, now_ms);
                }
                ZoneEvent::MigrationComplete { entity, player_id, .. } => {
                    self.migrations.handle_migration_complete(entity, now_ms);
                    if self.store.contains(entity) {
                        // The entity is ours now; the ghost is stale.
                        self.aura.remove_ghost(entity);
                        if player_id.is_player() {
                            self.players.entry(player_id).or_insert(entity);
                        }
                    }
                }
                ZoneEvent::HandoffToken {
                    source_zone,
                    player_id,
                    token,
                    expires_at_ms,
                } => {
                    self.handoffs
                        .handle_handoff_token(source_zone, player_id, token, expires_at_ms);
                }
                ZoneEvent::HandoffResult {
                    player_id, success, ..
                } => {
                    self.handoffs.handle_handoff_result(player_id, success, now_ms);
                    if success {
                        self.players.remove(&player_id);
                    }
                }
                ZoneEvent::ShardStatus { zone, state, .. } => {
                    debug!(zone = %self.definition.id, peer = %zone, ?state, "Peer shard status");
                }
                ZoneEvent::Broadcast { source_zone, .. }
                | ZoneEvent::Chat { source_zone, .. } => {
                    debug!(zone = %self.definition.id, from = %source_zone, "Relay message received");
                }
            }
        }
    }

    fn drive_handoffs(&mut self, now_ms: u64) {
        // Once the entity has migrated out, the neighbor ghosts it back
        // into our aura; the handoff keeps tracking the player through
        // that mirror until the client switch finishes.
        let updates: Vec<(PlayerId, EntityId, Vec3, Vec3)> = self
            .players
            .iter()
            .filter_map(|(&player, &entity)| {
                if let Some(record) = self.store.record(entity) {
                    Some((player, entity, record.position, record.velocity))
                } else {
                    self.aura
                        .ghost(entity)
                        .map(|ghost| (player, entity, ghost.position, ghost.velocity))
                }
            })
            .collect();

        for (player, entity, position, velocity) in updates {
            let action = self.handoffs.update_player(
                player,
                entity,
                position,
                velocity,
                &self.partition,
                &self.migrations,
                &mut self.messenger,
                now_ms,
            );
            if let Some(HandoffAction::BeginMigration {
                entity,
                target_zone,
            }) = action
            {
                match self
                    .migrations
                    .begin_migration(entity, target_zone, &self.store, now_ms)
                {
                    Ok(()) => {}
                    Err(ShardError::AlreadyMigrating(_)) => {}
                    Err(error) => {
                        warn!(zone = %self.definition.id, %entity, %error, "Handoff migration failed to start");
                    }
                }
            }
        }
    }

    /// Pushes every locally owned entity that sits inside a neighbor's
    /// box into that neighbor's aura.
    fn sync_aura_entities(&mut self, now_ms: u64) {
        let outgoing: Vec<(EntityId, Vec3, Vec3, Vec<ZoneId>)> = self
            .store
            .iter()
            .filter_map(|(entity, record)| {
                let targets = self.aura.zones_needing_sync(&self.partition, record.position);
                if targets.is_empty() {
                    None
                } else {
                    Some((entity, record.position, record.velocity, targets))
                }
            })
            .collect();

        for (entity, position, velocity, targets) in outgoing {
            for target in targets {
                self.messenger
                    .send_entity_sync(target, entity, position, velocity, now_ms);
            }
        }
    }

    /// Abandons an in-flight entity migration on this shard. Fails once
    /// the handover has reached its completion phase.
    pub fn cancel_migration(&mut self, entity: EntityId, now_ms: u64) -> Result<(), ShardError> {
        self.migrations.cancel_migration(entity, &mut self.store, now_ms)
    }

    pub fn aura(&self) -> &AuraProjectionManager {
        &self.aura
    }

    pub fn migrations(&self) -> &EntityMigrationManager {
        &self.migrations
    }

    pub fn handoffs(&self) -> &ZoneHandoffController {
        &self.handoffs
    }

    pub fn messenger(&self) -> &CrossZoneMessenger {
        &self.messenger
    }
}
