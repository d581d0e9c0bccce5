//! Entity state capture and restoration across the shard boundary.
//!
//! Migration never shares live references between shards: the unit of
//! transfer is the value-typed [`EntitySnapshot`], captured on the
//! source, shipped through the messenger, and consumed exactly once by
//! the receiving shard to construct a fresh entity.
//!
//! The per-tick simulation itself is an external collaborator. This
//! module specifies it at the boundary as the [`EntityStore`] trait and
//! supplies [`WorldState`], a plain in-memory implementation used by
//! the server binary and the tests.

use crate::types::{ConnectionId, EntityId, PlayerId, Vec3, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Facing of an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub yaw: f32,
    pub pitch: f32,
}

/// Combat and health state carried through migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CombatState {
    pub health: i16,
    pub max_health: i16,
    pub team_id: u8,
    pub class_type: u8,
    pub last_attacker: Option<EntityId>,
    pub last_attack_time_ms: u32,
    pub is_dead: bool,
}

/// Network/session bookkeeping for a player entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub last_input_sequence: u32,
    pub last_input_time_ms: u32,
    pub rtt_ms: u32,
    pub packet_loss: f32,
    pub snapshot_sequence: u32,
}

/// The most recent client input, replayed on the target shard so the
/// player's movement does not hitch during the switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InputState {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub jump: bool,
    pub attack: bool,
    pub block: bool,
    pub sprint: bool,
    pub yaw: f32,
    pub pitch: f32,
    pub sequence: u32,
    pub timestamp_ms: u32,
}

/// Anti-cheat tracking state. Migrated so a zone switch cannot be used
/// to reset movement-validation history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AntiCheatState {
    pub last_valid_position: Vec3,
    pub last_validation_time_ms: u32,
    pub suspicious_movements: u32,
    pub max_recorded_speed: f32,
}

/// Full serializable state of one entity at a point in time: the unit
/// of transfer for migration.
///
/// Immutable once captured. The receiving shard consumes it exactly
/// once via [`EntityStore::restore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    // Identity
    pub entity: EntityId,
    /// `PlayerId::NONE` for NPCs
    pub player_id: PlayerId,
    pub connection: Option<ConnectionId>,

    // Transform
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Rotation,

    // Component state
    pub combat: CombatState,
    pub session: SessionState,
    pub last_input: InputState,
    pub anti_cheat: AntiCheatState,

    // Migration metadata, filled in by the migration manager
    pub source_zone: ZoneId,
    pub target_zone: ZoneId,
    pub timestamp_ms: u32,
    pub sequence: u32,
}

impl EntitySnapshot {
    /// Encodes the snapshot for the message payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes a snapshot from a message payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

/// Read/write access to the simulation's entity storage, as required
/// by the migration layer.
///
/// `capture` reads the full component bundle for one entity; `restore`
/// constructs a fresh entity from a snapshot on the receiving shard;
/// `destroy` removes the source-side entity after a migration commits.
pub trait EntityStore {
    /// Whether an entity with this id exists locally.
    fn contains(&self, entity: EntityId) -> bool;

    /// Captures the entity's full state, with migration metadata left
    /// zeroed for the caller to fill in. `None` if the entity does not
    /// exist.
    fn capture(&self, entity: EntityId) -> Option<EntitySnapshot>;

    /// Creates a local entity from a snapshot, preserving its id.
    /// Re-applying a snapshot for an entity already present is a no-op.
    fn restore(&mut self, snapshot: &EntitySnapshot) -> EntityId;

    /// Destroys a local entity. Returns false if it did not exist.
    fn destroy(&mut self, entity: EntityId) -> bool;
}

/// One entity's live record inside [`WorldState`].
#[derive(Debug, Clone, Default)]
pub struct EntityRecord {
    pub player_id: PlayerId,
    pub connection: Option<ConnectionId>,
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Rotation,
    pub combat: CombatState,
    pub session: SessionState,
    pub last_input: InputState,
    pub anti_cheat: AntiCheatState,
}

/// In-memory entity storage for one shard.
#[derive(Debug, Default)]
pub struct WorldState {
    entities: HashMap<EntityId, EntityRecord>,
    next_id: u64,
}

impl WorldState {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            next_id: 1,
        }
    }

    /// Spawns a player-controlled entity at the given position.
    pub fn spawn_player(
        &mut self,
        player_id: PlayerId,
        connection: ConnectionId,
        position: Vec3,
    ) -> EntityId {
        let id = self.allocate_id();
        self.entities.insert(
            id,
            EntityRecord {
                player_id,
                connection: Some(connection),
                position,
                combat: CombatState {
                    health: 100,
                    max_health: 100,
                    ..CombatState::default()
                },
                ..EntityRecord::default()
            },
        );
        id
    }

    /// Spawns an NPC entity at the given position.
    pub fn spawn_npc(&mut self, position: Vec3) -> EntityId {
        let id = self.allocate_id();
        self.entities.insert(
            id,
            EntityRecord {
                player_id: PlayerId::NONE,
                position,
                ..EntityRecord::default()
            },
        );
        id
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn record(&self, entity: EntityId) -> Option<&EntityRecord> {
        self.entities.get(&entity)
    }

    pub fn record_mut(&mut self, entity: EntityId) -> Option<&mut EntityRecord> {
        self.entities.get_mut(&entity)
    }

    /// Updates an entity's transform from the simulation tick.
    pub fn set_transform(&mut self, entity: EntityId, position: Vec3, velocity: Vec3) {
        if let Some(record) = self.entities.get_mut(&entity) {
            record.position = position;
            record.velocity = velocity;
        }
    }

    /// The entity controlled by the given player, if connected here.
    pub fn find_player(&self, player: PlayerId) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|(_, record)| record.player_id == player)
            .map(|(id, _)| *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &EntityRecord)> {
        self.entities.iter().map(|(id, record)| (*id, record))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl EntityStore for WorldState {
    fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    fn capture(&self, entity: EntityId) -> Option<EntitySnapshot> {
        let record = self.entities.get(&entity)?;
        Some(EntitySnapshot {
            entity,
            player_id: record.player_id,
            connection: record.connection,
            position: record.position,
            velocity: record.velocity,
            rotation: record.rotation,
            combat: record.combat,
            session: record.session,
            last_input: record.last_input,
            anti_cheat: record.anti_cheat,
            source_zone: ZoneId(0),
            target_zone: ZoneId(0),
            timestamp_ms: 0,
            sequence: 0,
        })
    }

    fn restore(&mut self, snapshot: &EntitySnapshot) -> EntityId {
        // Duplicate delivery of a migration request must not clobber a
        // live entity that is already receiving updates.
        if self.entities.contains_key(&snapshot.entity) {
            return snapshot.entity;
        }
        self.entities.insert(
            snapshot.entity,
            EntityRecord {
                player_id: snapshot.player_id,
                connection: snapshot.connection,
                position: snapshot.position,
                velocity: snapshot.velocity,
                rotation: snapshot.rotation,
                combat: snapshot.combat,
                session: snapshot.session,
                last_input: snapshot.last_input,
                anti_cheat: snapshot.anti_cheat,
            },
        );
        self.next_id = self.next_id.max(snapshot.entity.0 + 1);
        snapshot.entity
    }

    fn destroy(&mut self, entity: EntityId) -> bool {
        self.entities.remove(&entity).is_some()
    }
}
