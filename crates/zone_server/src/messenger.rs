//! Cross-zone messenger.
//!
//! Thin envelope/routing layer the other components use to talk to
//! peer shards. No business logic lives here: the messenger wraps
//! typed payloads into [`ZoneMessage`] envelopes, publishes them
//! fire-and-forget over an abstract pub/sub [`MessageBus`], and drains
//! its inbox once per tick into typed [`ZoneEvent`]s.
//!
//! Delivery is at-least-once and unordered across senders; receivers
//! must treat every event idempotently. Messages from this shard's own
//! zone and messages targeted at a different zone are filtered out on
//! receive. Malformed payloads are logged and dropped, never surfaced
//! as errors.

use crate::entity::EntitySnapshot;
use crate::migration::MigrationState;
use crate::orchestrator::ZoneState;
use crate::types::{EntityId, PlayerId, Vec3, ZoneId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Wire type tag of a cross-zone message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ZoneMessageType {
    /// Entity state update for the shared aura
    EntitySync = 1,
    /// Initiate entity migration (carries a full snapshot)
    MigrationRequest = 2,
    /// Migration state machine update / acknowledgment
    MigrationState = 3,
    /// Migration finished on the source side
    MigrationComplete = 4,
    /// Zone-wide broadcast
    Broadcast = 5,
    /// Cross-zone chat relay
    Chat = 6,
    /// Shard liveness and handoff control-plane updates
    ZoneStatus = 7,
}

/// Cross-zone message envelope. Immutable after construction and
/// copied freely; carries no ownership semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneMessage {
    pub message_type: ZoneMessageType,
    pub source_zone: ZoneId,
    /// `ZoneId::BROADCAST` (0) addresses every zone
    pub target_zone: ZoneId,
    pub timestamp: u32,
    /// Per-sender monotonic sequence number
    pub sequence: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntitySyncPayload {
    entity: EntityId,
    position: Vec3,
    velocity: Vec3,
}

#[derive(Debug, Serialize, Deserialize)]
struct MigrationStatePayload {
    entity: EntityId,
    state: MigrationState,
}

#[derive(Debug, Serialize, Deserialize)]
struct MigrationCompletePayload {
    entity: EntityId,
    player_id: PlayerId,
}

/// Control-plane payloads riding the `ZoneStatus` message type: shard
/// liveness plus the two handoff handshake legs (token announcement to
/// the target, result notification back to the source).
#[derive(Debug, Serialize, Deserialize)]
enum StatusPayload {
    Shard {
        zone: ZoneId,
        state: ZoneState,
        player_count: u32,
        capacity: u32,
    },
    HandoffToken {
        player_id: PlayerId,
        token: String,
        expires_at_ms: u64,
    },
    HandoffResult {
        player_id: PlayerId,
        success: bool,
    },
}

/// A decoded incoming message, ready for dispatch to the owning
/// component.
#[derive(Debug, Clone)]
pub enum ZoneEvent {
    EntitySync {
        source_zone: ZoneId,
        entity: EntityId,
        position: Vec3,
        velocity: Vec3,
    },
    MigrationRequest {
        snapshot: EntitySnapshot,
    },
    MigrationState {
        source_zone: ZoneId,
        entity: EntityId,
        state: MigrationState,
    },
    MigrationComplete {
        source_zone: ZoneId,
        entity: EntityId,
        player_id: PlayerId,
    },
    Broadcast {
        source_zone: ZoneId,
        data: Vec<u8>,
    },
    Chat {
        source_zone: ZoneId,
        data: Vec<u8>,
    },
    ShardStatus {
        zone: ZoneId,
        state: ZoneState,
        player_count: u32,
        capacity: u32,
    },
    HandoffToken {
        source_zone: ZoneId,
        player_id: PlayerId,
        token: String,
        expires_at_ms: u64,
    },
    HandoffResult {
        source_zone: ZoneId,
        player_id: PlayerId,
        success: bool,
    },
}

/// Pub/sub transport addressed by zone id plus one broadcast channel.
///
/// Implementations deliver at-least-once with no cross-sender ordering
/// guarantees. Publishing never blocks the tick thread.
pub trait MessageBus: Send + Sync {
    /// Publishes a message to its target zone, or to every subscriber
    /// when the target is `ZoneId::BROADCAST`.
    fn publish(&self, message: ZoneMessage);

    /// Opens this zone's inbox. Broadcast messages are delivered to
    /// every inbox.
    fn subscribe(&self, zone: ZoneId) -> mpsc::UnboundedReceiver<ZoneMessage>;
}

/// In-process bus: per-zone unbounded channels with broadcast fan-out.
///
/// Lets multiple shards run (and be tested) inside one process; the
/// concurrent subscriber table is the only structure shared across
/// shard threads.
#[derive(Default)]
pub struct InProcessBus {
    subscribers: dashmap::DashMap<u32, Vec<mpsc::UnboundedSender<ZoneMessage>>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageBus for InProcessBus {
    fn publish(&self, message: ZoneMessage) {
        if message.target_zone.is_broadcast() {
            for entry in self.subscribers.iter() {
                for sender in entry.value() {
                    let _ = sender.send(message.clone());
                }
            }
        } else if let Some(entry) = self.subscribers.get(&message.target_zone.0) {
            for sender in entry.value() {
                let _ = sender.send(message.clone());
            }
        }
        // No subscriber means the target shard is offline; the message
        // is dropped and the sender's state machine times out.
    }

    fn subscribe(&self, zone: ZoneId) -> mpsc::UnboundedReceiver<ZoneMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.entry(zone.0).or_default().push(sender);
        receiver
    }
}

/// Per-shard messenger endpoint.
pub struct CrossZoneMessenger {
    zone_id: ZoneId,
    bus: Arc<dyn MessageBus>,
    inbox: mpsc::UnboundedReceiver<ZoneMessage>,
    sequence: u32,
    messages_sent: u64,
    messages_received: u64,
}

impl CrossZoneMessenger {
    pub fn new(zone_id: ZoneId, bus: Arc<dyn MessageBus>) -> Self {
        let inbox = bus.subscribe(zone_id);
        debug!(zone = %zone_id, "Cross-zone messenger subscribed");
        Self {
            zone_id,
            bus,
            inbox,
            sequence: 0,
            messages_sent: 0,
            messages_received: 0,
        }
    }

    pub fn zone_id(&self) -> ZoneId {
        self.zone_id
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    pub fn current_sequence(&self) -> u32 {
        self.sequence
    }

    fn send(
        &mut self,
        message_type: ZoneMessageType,
        target_zone: ZoneId,
        payload: Vec<u8>,
        now_ms: u64,
    ) {
        self.sequence = self.sequence.wrapping_add(1);
        self.bus.publish(ZoneMessage {
            message_type,
            source_zone: self.zone_id,
            target_zone,
            timestamp: now_ms as u32,
            sequence: self.sequence,
            payload,
        });
        self.messages_sent += 1;
    }

    fn send_json<T: Serialize>(
        &mut self,
        message_type: ZoneMessageType,
        target_zone: ZoneId,
        payload: &T,
        now_ms: u64,
    ) {
        match serde_json::to_vec(payload) {
            Ok(bytes) => self.send(message_type, target_zone, bytes, now_ms),
            Err(error) => {
                warn!(zone = %self.zone_id, ?message_type, %error, "Dropping unencodable message");
            }
        }
    }

    /// Sends one entity's authoritative state into an adjacent zone's
    /// aura.
    pub fn send_entity_sync(
        &mut self,
        target_zone: ZoneId,
        entity: EntityId,
        position: Vec3,
        velocity: Vec3,
        now_ms: u64,
    ) {
        self.send_json(
            ZoneMessageType::EntitySync,
            target_zone,
            &EntitySyncPayload {
                entity,
                position,
                velocity,
            },
            now_ms,
        );
    }

    /// Ships a captured snapshot to the migration target.
    pub fn send_migration_request(
        &mut self,
        target_zone: ZoneId,
        snapshot: &EntitySnapshot,
        now_ms: u64,
    ) {
        self.send_json(ZoneMessageType::MigrationRequest, target_zone, snapshot, now_ms);
    }

    /// Sends a migration state update / acknowledgment to a peer.
    pub fn send_migration_state(
        &mut self,
        target_zone: ZoneId,
        entity: EntityId,
        state: MigrationState,
        now_ms: u64,
    ) {
        self.send_json(
            ZoneMessageType::MigrationState,
            target_zone,
            &MigrationStatePayload { entity, state },
            now_ms,
        );
    }

    /// Announces a committed migration to every zone.
    pub fn send_migration_complete(&mut self, entity: EntityId, player_id: PlayerId, now_ms: u64) {
        self.send_json(
            ZoneMessageType::MigrationComplete,
            ZoneId::BROADCAST,
            &MigrationCompletePayload { entity, player_id },
            now_ms,
        );
    }

    /// Broadcasts this shard's liveness state.
    pub fn send_shard_status(
        &mut self,
        zone: ZoneId,
        state: ZoneState,
        player_count: u32,
        capacity: u32,
        now_ms: u64,
    ) {
        self.send_json(
            ZoneMessageType::ZoneStatus,
            ZoneId::BROADCAST,
            &StatusPayload::Shard {
                zone,
                state,
                player_count,
                capacity,
            },
            now_ms,
        );
    }

    /// Announces a freshly minted handoff token to the target shard.
    pub fn send_handoff_token(
        &mut self,
        target_zone: ZoneId,
        player_id: PlayerId,
        token: String,
        expires_at_ms: u64,
        now_ms: u64,
    ) {
        self.send_json(
            ZoneMessageType::ZoneStatus,
            target_zone,
            &StatusPayload::HandoffToken {
                player_id,
                token,
                expires_at_ms,
            },
            now_ms,
        );
    }

    /// Reports a handoff outcome from the target back to the source.
    pub fn send_handoff_result(
        &mut self,
        target_zone: ZoneId,
        player_id: PlayerId,
        success: bool,
        now_ms: u64,
    ) {
        self.send_json(
            ZoneMessageType::ZoneStatus,
            target_zone,
            &StatusPayload::HandoffResult { player_id, success },
            now_ms,
        );
    }

    /// Broadcasts opaque data to all zones.
    pub fn broadcast(&mut self, data: Vec<u8>, now_ms: u64) {
        self.send(ZoneMessageType::Broadcast, ZoneId::BROADCAST, data, now_ms);
    }

    /// Drains the inbox without blocking, decoding every message that
    /// is addressed to this zone and did not originate from it.
    pub fn poll(&mut self) -> Vec<ZoneEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.inbox.try_recv() {
            if message.source_zone == self.zone_id {
                continue;
            }
            if !message.target_zone.is_broadcast() && message.target_zone != self.zone_id {
                continue;
            }
            self.messages_received += 1;
            if let Some(event) = self.decode(message) {
                events.push(event);
            }
        }
        events
    }

    fn decode(&self, message: ZoneMessage) -> Option<ZoneEvent> {
        let source_zone = message.source_zone;
        let result = match message.message_type {
            ZoneMessageType::EntitySync => {
                serde_json::from_slice::<EntitySyncPayload>(&message.payload).map(|p| {
                    ZoneEvent::EntitySync {
                        source_zone,
                        entity: p.entity,
                        position: p.position,
                        velocity: p.velocity,
                    }
                })
            }
            ZoneMessageType::MigrationRequest => {
                EntitySnapshot::from_bytes(&message.payload)
                    .map(|snapshot| ZoneEvent::MigrationRequest { snapshot })
            }
            ZoneMessageType::MigrationState => {
                serde_json::from_slice::<MigrationStatePayload>(&message.payload).map(|p| {
                    ZoneEvent::MigrationState {
                        source_zone,
                        entity: p.entity,
                        state: p.state,
                    }
                })
            }
            ZoneMessageType::MigrationComplete => {
                serde_json::from_slice::<MigrationCompletePayload>(&message.payload).map(|p| {
                    ZoneEvent::MigrationComplete {
                        source_zone,
                        entity: p.entity,
                        player_id: p.player_id,
                    }
                })
            }
            ZoneMessageType::Broadcast => Ok(ZoneEvent::Broadcast {
                source_zone,
                data: message.payload,
            }),
            ZoneMessageType::Chat => Ok(ZoneEvent::Chat {
                source_zone,
                data: message.payload,
            }),
            ZoneMessageType::ZoneStatus => {
                serde_json::from_slice::<StatusPayload>(&message.payload).map(|p| match p {
                    StatusPayload::Shard {
                        zone,
                        state,
                        player_count,
                        capacity,
                    } => ZoneEvent::ShardStatus {
                        zone,
                        state,
                        player_count,
                        capacity,
                    },
                    StatusPayload::HandoffToken {
                        player_id,
                        token,
                        expires_at_ms,
                    } => ZoneEvent::HandoffToken {
                        source_zone,
                        player_id,
                        token,
                        expires_at_ms,
                    },
                    StatusPayload::HandoffResult { player_id, success } => {
                        ZoneEvent::HandoffResult {
                            source_zone,
                            player_id,
                            success,
                        }
                    }
                })
            }
        };

        match result {
            Ok(event) => {
                trace!(zone = %self.zone_id, from = %source_zone, seq = message.sequence, "Decoded cross-zone message");
                Some(event)
            }
            Err(error) => {
                warn!(zone = %self.zone_id, from = %source_zone, %error, "Dropping malformed cross-zone payload");
                None
            }
        }
    }
}
