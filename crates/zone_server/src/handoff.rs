//! Player zone handoff.
//!
//! Orchestrates the client-visible side of a zone crossing. The
//! controller watches each player's distance to the seam between its
//! zone's core and the neighbor's, and walks the handoff through
//! phases at strictly decreasing distances: preparation at 75 units,
//! aura entry at 50, entity migration at 25. The connection switch
//! follows as soon as the entity's handover commits on the target, not
//! at a fixed distance. A handoff can be cancelled by walking away
//! only before the migration phase; once the entity starts moving, the
//! handoff runs to completion or failure.
//!
//! The switch itself is token-based: the source mints a single-use
//! token, announces it to the target shard, and instructs the client
//! to reconnect there. The target accepts exactly one reconnect per
//! token before it expires and reports the outcome back to the source.

use crate::config::{HandoffConfig, ShardConfig};
use crate::error::ShardError;
use crate::messenger::CrossZoneMessenger;
use crate::migration::{EntityMigrationManager, MigrationState};
use crate::partition::{WorldPartition, ZoneDefinition};
use crate::types::{EntityId, PlayerId, Vec3, ZoneId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Handoff lifecycle. Phases only ever advance; `Completed` and
/// `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HandoffPhase {
    None,
    Preparing,
    AuraOverlap,
    Migrating,
    Switching,
    Completed,
    Failed,
}

impl HandoffPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandoffPhase::Completed | HandoffPhase::Failed)
    }
}

/// What the shard loop must do as a result of a handoff phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffAction {
    /// The handoff entered the migration phase: move the entity to the
    /// target zone.
    BeginMigration {
        entity: EntityId,
        target_zone: ZoneId,
    },
}

/// Tells a client where to reconnect and with which credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectInstruction {
    pub zone: ZoneId,
    pub host: String,
    pub port: u16,
    pub token: String,
    pub expires_at_ms: u64,
}

/// Outbound client notifications at the transport boundary. The shard
/// owns the actual connections; the controller only decides when to
/// speak.
pub trait ClientNotifier: Send + Sync {
    fn reconnect(&self, player: PlayerId, instruction: ReconnectInstruction);
    fn handoff_cancelled(&self, player: PlayerId);
}

/// Notifier for shards with no client transport attached (tools,
/// tests).
#[derive(Debug, Default)]
pub struct NullNotifier;

impl ClientNotifier for NullNotifier {
    fn reconnect(&self, _player: PlayerId, _instruction: ReconnectInstruction) {}
    fn handoff_cancelled(&self, _player: PlayerId) {}
}

#[derive(Debug, Clone)]
struct ActiveHandoff {
    player: PlayerId,
    entity: EntityId,
    target_zone: Option<ZoneId>,
    phase: HandoffPhase,
    /// When the handoff entered `Preparing`; feeds the duration stats.
    started_ms: u64,
    /// Start of the current phase; reused as the termination instant
    /// once the phase is terminal, so terminal records linger exactly
    /// one tick.
    phase_started_ms: u64,
}

/// Token minted by a source shard, awaiting one reconnect on the
/// target.
#[derive(Debug, Clone)]
struct PendingToken {
    token: String,
    source_zone: ZoneId,
    expires_at_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HandoffStats {
    pub started: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub tokens_rejected: u64,
    pub total_duration_ms: u64,
    pub max_duration_ms: u64,
}

impl HandoffStats {
    /// Mean wall time from preparation start to completion.
    pub fn avg_duration_ms(&self) -> u64 {
        if self.completed == 0 {
            0
        } else {
            self.total_duration_ms / self.completed
        }
    }
}

/// Drives both sides of player handoffs for one shard.
pub struct ZoneHandoffController {
    zone: ZoneDefinition,
    config: HandoffConfig,
    token_ttl_ms: u64,
    notifier: Arc<dyn ClientNotifier>,
    active: HashMap<PlayerId, ActiveHandoff>,
    pending_tokens: HashMap<PlayerId, PendingToken>,
    stats: HandoffStats,
}

impl ZoneHandoffController {
    pub fn new(
        zone: ZoneDefinition,
        config: &ShardConfig,
        notifier: Arc<dyn ClientNotifier>,
    ) -> Self {
        Self {
            zone,
            config: config.handoff.clone(),
            token_ttl_ms: config.handoff_token_ttl_ms,
            notifier,
            active: HashMap::new(),
            pending_tokens: HashMap::new(),
            stats: HandoffStats::default(),
        }
    }

    pub fn phase(&self, player: PlayerId) -> HandoffPhase {
        self.active
            .get(&player)
            .map(|h| h.phase)
            .unwrap_or(HandoffPhase::None)
    }

    pub fn active_count(&self) -> usize {
        self.active.values().filter(|h| !h.phase.is_terminal()).count()
    }

    pub fn stats(&self) -> HandoffStats {
        self.stats
    }

    /// Distance from the position to the nearest *interior* core edge,
    /// i.e. a seam with a neighboring zone. Positive inside the core,
    /// negative once past the seam. World-boundary edges do not count;
    /// a zone with no neighbors never starts a handoff.
    fn seam_distance(&self, x: f64, z: f64) -> f64 {
        let core = &self.zone.core;
        let bounds = &self.zone.bounds;
        let mut distance = f64::INFINITY;
        if bounds.min_x < core.min_x {
            distance = distance.min(x - core.min_x);
        }
        if bounds.max_x > core.max_x {
            distance = distance.min(core.max_x - x);
        }
        if bounds.min_z < core.min_z {
            distance = distance.min(z - core.min_z);
        }
        if bounds.max_z > core.max_z {
            distance = distance.min(core.max_z - z);
        }
        distance
    }

    fn geometric_phase(&self, seam_distance: f64) -> HandoffPhase {
        if seam_distance <= self.config.handoff_distance {
            HandoffPhase::Switching
        } else if seam_distance <= self.config.migration_distance {
            HandoffPhase::Migrating
        } else if seam_distance <= self.config.aura_enter_distance {
            HandoffPhase::AuraOverlap
        } else if seam_distance <= self.config.preparation_distance {
            HandoffPhase::Preparing
        } else {
            HandoffPhase::None
        }
    }

    /// Advances one player's handoff from its current position. Phase
    /// transitions are monotonic: geometry can pull the handoff
    /// forward, never backward. Returns the action the shard loop must
    /// execute, if any.
    ///
    /// A handoff only *starts* for a player moving toward the seam.
    /// Without that gate, an entity freshly migrated in (sitting just
    /// past the target's own seam) would immediately hand back and
    /// ping-pong between the two shards.
    pub fn update_player(
        &mut self,
        player: PlayerId,
        entity: EntityId,
        position: Vec3,
        velocity: Vec3,
        partition: &WorldPartition,
        migration: &EntityMigrationManager,
        messenger: &mut CrossZoneMessenger,
        now_ms: u64,
    ) -> Option<HandoffAction> {
        let seam_distance = self.seam_distance(position.x, position.z);
        let desired = self.geometric_phase(seam_distance);

        if !self.active.contains_key(&player) {
            // Quarter-second lookahead along the velocity.
            let ahead = self.seam_distance(
                position.x + velocity.x * 0.25,
                position.z + velocity.z * 0.25,
            );
            if desired == HandoffPhase::None || ahead >= seam_distance {
                return None;
            }
            self.active.insert(
                player,
                ActiveHandoff {
                    player,
                    entity,
                    target_zone: None,
                    phase: HandoffPhase::Preparing,
                    started_ms: now_ms,
                    phase_started_ms: now_ms,
                },
            );
            self.stats.started += 1;
            info!(zone = %self.zone.id, %player, distance = seam_distance, "Handoff preparation started");
        }

        let mut handoff = match self.active.remove(&player) {
            Some(h) if !h.phase.is_terminal() => h,
            Some(h) => {
                self.active.insert(player, h);
                return None;
            }
            None => return None,
        };

        // Walking back out cancels the handoff, but only before the
        // entity has started moving.
        if handoff.phase <= HandoffPhase::AuraOverlap
            && seam_distance > self.config.preparation_distance
        {
            self.stats.cancelled += 1;
            self.notifier.handoff_cancelled(player);
            debug!(zone = %self.zone.id, %player, "Handoff cancelled, player moved away");
            return None;
        }

        let mut action = None;

        if handoff.phase == HandoffPhase::Preparing && desired >= HandoffPhase::AuraOverlap {
            // Aim where the player will be in two seconds; if the
            // extrapolated point has left every neighbor's box, fall
            // back to where they stand now.
            let ahead = Vec3::new(
                position.x + velocity.x * 2.0,
                position.y,
                position.z + velocity.z * 2.0,
            );
            let target = nearest_overlapping_zone(&self.zone, partition, ahead)
                .or_else(|| nearest_overlapping_zone(&self.zone, partition, position));
            if let Some(target) = target {
                handoff.target_zone = Some(target);
                handoff.phase = HandoffPhase::AuraOverlap;
                handoff.phase_started_ms = now_ms;
                debug!(zone = %self.zone.id, %player, %target, "Handoff entered aura overlap");
            }
        }

        if handoff.phase == HandoffPhase::AuraOverlap && desired >= HandoffPhase::Migrating {
            // target_zone was set on aura entry
            if let Some(target) = handoff.target_zone {
                handoff.phase = HandoffPhase::Migrating;
                handoff.phase_started_ms = now_ms;
                action = Some(HandoffAction::BeginMigration {
                    entity: handoff.entity,
                    target_zone: target,
                });
                info!(zone = %self.zone.id, %player, %target, "Handoff entered migration phase");
            }
        }

        if handoff.phase == HandoffPhase::Migrating {
            match migration.migration_state(handoff.entity) {
                // The entity now lives on the target; switch the client
                // regardless of how far from the seam it still is.
                MigrationState::Completed => {
                    self.enter_switching(&mut handoff, partition, messenger, now_ms);
                }
                MigrationState::Failed => {
                    handoff.phase = HandoffPhase::Failed;
                    handoff.phase_started_ms = now_ms;
                    self.stats.failed += 1;
                    self.notifier.handoff_cancelled(player);
                    warn!(zone = %self.zone.id, %player, "Handoff failed, entity migration did not complete");
                }
                _ => {}
            }
        }

        self.active.insert(player, handoff);
        action
    }

    /// Source side: the entity's handover committed. Moves the owning
    /// handoff straight into the connection switch; the client has no
    /// reason to stay on this shard once its entity lives on the
    /// target.
    pub fn on_migration_complete(
        &mut self,
        entity: EntityId,
        partition: &WorldPartition,
        messenger: &mut CrossZoneMessenger,
        now_ms: u64,
    ) {
        let Some(player) = self
            .active
            .iter()
            .find(|(_, h)| h.entity == entity && h.phase == HandoffPhase::Migrating)
            .map(|(player, _)| *player)
        else {
            return;
        };
        let Some(mut handoff) = self.active.remove(&player) else {
            return;
        };
        self.enter_switching(&mut handoff, partition, messenger, now_ms);
        self.active.insert(player, handoff);
    }

    fn enter_switching(
        &mut self,
        handoff: &mut ActiveHandoff,
        partition: &WorldPartition,
        messenger: &mut CrossZoneMessenger,
        now_ms: u64,
    ) {
        let Some(target) = handoff.target_zone else {
            return;
        };
        let Some(target_def) = partition.zone(target) else {
            warn!(zone = %self.zone.id, %target, "Handoff target zone unknown, failing");
            handoff.phase = HandoffPhase::Failed;
            handoff.phase_started_ms = now_ms;
            self.stats.failed += 1;
            return;
        };

        let token = Uuid::new_v4().simple().to_string();
        let expires_at_ms = now_ms + self.token_ttl_ms;
        messenger.send_handoff_token(target, handoff.player, token.clone(), expires_at_ms, now_ms);
        self.notifier.reconnect(
            handoff.player,
            ReconnectInstruction {
                zone: target,
                host: target_def.host.clone(),
                port: target_def.port,
                token,
                expires_at_ms,
            },
        );
        handoff.phase = HandoffPhase::Switching;
        handoff.phase_started_ms = now_ms;
        info!(zone = %self.zone.id, player = %handoff.player, %target, "Handoff switching, client told to reconnect");
    }

    /// Target side: stores a token announced by a source shard. A
    /// newer announcement for the same player replaces the old token.
    pub fn handle_handoff_token(
        &mut self,
        source_zone: ZoneId,
        player: PlayerId,
        token: String,
        expires_at_ms: u64,
    ) {
        debug!(zone = %self.zone.id, %player, %source_zone, "Holding handoff token");
        self.pending_tokens.insert(
            player,
            PendingToken {
                token,
                source_zone,
                expires_at_ms,
            },
        );
    }

    /// Target side: validates a reconnecting client's token. Each
    /// token admits exactly one presentation; expired or mismatched
    /// tokens are spent, rejected, and reported as a failure to the
    /// source so it can fail the handoff instead of waiting out the
    /// switch window.
    pub fn accept_reconnect(
        &mut self,
        player: PlayerId,
        token: &str,
        messenger: &mut CrossZoneMessenger,
        now_ms: u64,
    ) -> Result<(), ShardError> {
        let Some(pending) = self.pending_tokens.remove(&player) else {
            return Err(ShardError::NoActiveHandoff(player));
        };
        if now_ms >= pending.expires_at_ms {
            self.stats.tokens_rejected += 1;
            messenger.send_handoff_result(pending.source_zone, player, false, now_ms);
            warn!(zone = %self.zone.id, %player, "Rejected expired handoff token");
            return Err(ShardError::TokenRejected(player));
        }
        if pending.token != token {
            self.stats.tokens_rejected += 1;
            messenger.send_handoff_result(pending.source_zone, player, false, now_ms);
            warn!(zone = %self.zone.id, %player, "Rejected mismatched handoff token");
            return Err(ShardError::TokenRejected(player));
        }

        messenger.send_handoff_result(pending.source_zone, player, true, now_ms);
        info!(zone = %self.zone.id, %player, source = %pending.source_zone, "Player reconnected after handoff");
        Ok(())
    }

    /// Source side: the target reported the reconnect outcome.
    pub fn handle_handoff_result(&mut self, player: PlayerId, success: bool, now_ms: u64) {
        let Some(handoff) = self.active.get_mut(&player) else {
            return;
        };
        if handoff.phase != HandoffPhase::Switching {
            return;
        }
        if success {
            handoff.phase = HandoffPhase::Completed;
            self.stats.completed += 1;
            let duration = now_ms.saturating_sub(handoff.started_ms);
            self.stats.total_duration_ms += duration;
            self.stats.max_duration_ms = self.stats.max_duration_ms.max(duration);
            info!(zone = %self.zone.id, %player, duration_ms = duration, "Handoff completed");
        } else {
            handoff.phase = HandoffPhase::Failed;
            self.stats.failed += 1;
            self.notifier.handoff_cancelled(player);
            warn!(zone = %self.zone.id, %player, "Handoff failed on target side");
        }
        handoff.phase_started_ms = now_ms;
    }

    /// Per-tick maintenance: phase timeouts, terminal-record sweep and
    /// pending-token expiry.
    ///
    /// A timeout before the migration phase is a cancellation (the
    /// player simply loitered near the seam); from the migration phase
    /// on it is a failure. Either way the client is told the handoff
    /// is off and keeps playing on this shard.
    pub fn update(&mut self, now_ms: u64) {
        let mut cancelled = Vec::new();
        let mut failed = Vec::new();
        for handoff in self.active.values_mut() {
            if handoff.phase.is_terminal() {
                continue;
            }
            let limit = match handoff.phase {
                HandoffPhase::Preparing | HandoffPhase::AuraOverlap => {
                    self.config.preparation_timeout_ms
                }
                HandoffPhase::Migrating => self.config.migration_timeout_ms,
                HandoffPhase::Switching => self.config.switch_timeout_ms,
                _ => continue,
            };
            if now_ms.saturating_sub(handoff.phase_started_ms) >= limit {
                if handoff.phase <= HandoffPhase::AuraOverlap {
                    cancelled.push(handoff.player);
                } else {
                    warn!(
                        zone = %self.zone.id,
                        player = %handoff.player,
                        phase = ?handoff.phase,
                        "Handoff phase timed out"
                    );
                    handoff.phase = HandoffPhase::Failed;
                    handoff.phase_started_ms = now_ms;
                    failed.push(handoff.player);
                }
            }
        }
        for player in cancelled {
            self.active.remove(&player);
            self.stats.cancelled += 1;
            self.notifier.handoff_cancelled(player);
        }
        for player in failed {
            self.stats.failed += 1;
            self.notifier.handoff_cancelled(player);
        }
        self.active.retain(|_, h| {
            !h.phase.is_terminal() || h.phase_started_ms >= now_ms
        });
        self.pending_tokens.retain(|player, pending| {
            let live = pending.expires_at_ms > now_ms;
            if !live {
                debug!(zone = %self.zone.id, %player, "Handoff token expired unused");
            }
            live
        });
    }
}

/// The neighbor whose box contains the position and whose center is
/// nearest, i.e. the zone the player is heading into.
fn nearest_overlapping_zone(
    own: &ZoneDefinition,
    partition: &WorldPartition,
    position: Vec3,
) -> Option<ZoneId> {
    partition
        .zones()
        .iter()
        .filter(|zone| zone.id != own.id && zone.bounds.contains(position.x, position.z))
        .min_by(|a, b| {
            let da = (position.x - a.center_x).powi(2) + (position.z - a.center_z).powi(2);
            let db = (position.x - b.center_x).powi(2) + (position.z - b.center_z).powi(2);
            da.total_cmp(&db)
        })
        .map(|zone| zone.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityStore, WorldState};
    use crate::messenger::{InProcessBus, MessageBus, ZoneEvent};
    use crate::partition::ZoneBounds;
    use crate::types::ConnectionId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        reconnects: Mutex<Vec<(PlayerId, ReconnectInstruction)>>,
        cancellations: Mutex<Vec<PlayerId>>,
    }

    impl ClientNotifier for RecordingNotifier {
        fn reconnect(&self, player: PlayerId, instruction: ReconnectInstruction) {
            self.reconnects.lock().unwrap().push((player, instruction));
        }
        fn handoff_cancelled(&self, player: PlayerId) {
            self.cancellations.lock().unwrap().push(player);
        }
    }

    struct Fixture {
        partition: WorldPartition,
        notifier: Arc<RecordingNotifier>,
        source: ZoneHandoffController,
        target: ZoneHandoffController,
        source_migrations: EntityMigrationManager,
        target_migrations: EntityMigrationManager,
        source_store: WorldState,
        target_store: WorldState,
        source_bus: CrossZoneMessenger,
        target_bus: CrossZoneMessenger,
    }

    fn fixture() -> Fixture {
        let config = ShardConfig::default();
        let world = ZoneBounds {
            min_x: 0.0,
            max_x: 2000.0,
            min_z: 0.0,
            max_z: 1000.0,
            min_y: -100.0,
            max_y: 500.0,
        };
        let partition = WorldPartition::create_grid(2, 1, world, &config).unwrap();
        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let notifier = Arc::new(RecordingNotifier::default());
        Fixture {
            source: ZoneHandoffController::new(
                partition.zone(ZoneId(1)).unwrap().clone(),
                &config,
                notifier.clone(),
            ),
            target: ZoneHandoffController::new(
                partition.zone(ZoneId(2)).unwrap().clone(),
                &config,
                notifier.clone(),
            ),
            source_migrations: EntityMigrationManager::new(ZoneId(1), &config),
            target_migrations: EntityMigrationManager::new(ZoneId(2), &config),
            source_store: WorldState::new(),
            target_store: WorldState::new(),
            source_bus: CrossZoneMessenger::new(ZoneId(1), Arc::clone(&bus)),
            target_bus: CrossZoneMessenger::new(ZoneId(2), bus),
            partition,
            notifier,
        }
    }

    /// Runs one player-update step on the source controller at the
    /// given x, executing any migration action and pumping the bus.
    fn step(fx: &mut Fixture, player: PlayerId, entity: EntityId, x: f64, now_ms: u64) {
        let position = Vec3::new(x, 0.0, 500.0);
        // Moving toward the seam at x=1000.
        let velocity = Vec3::new(60.0, 0.0, 0.0);
        let action = fx.source.update_player(
            player,
            entity,
            position,
            velocity,
            &fx.partition,
            &fx.source_migrations,
            &mut fx.source_bus,
            now_ms,
        );
        if let Some(HandoffAction::BeginMigration {
            entity,
            target_zone,
        }) = action
        {
            fx.source_migrations
                .begin_migration(entity, target_zone, &fx.source_store, now_ms)
                .unwrap();
        }
        let committed =
            fx.source_migrations
                .update(&mut fx.source_store, &mut fx.source_bus, now_ms);
        for entity in committed {
            fx.source
                .on_migration_complete(entity, &fx.partition, &mut fx.source_bus, now_ms);
        }
        for event in fx.target_bus.poll() {
            match event {
                ZoneEvent::MigrationRequest { snapshot } => {
                    fx.target_migrations.handle_migration_request(
                        &snapshot,
                        &mut fx.target_store,
                        &mut fx.target_bus,
                        now_ms,
                    );
                }
                ZoneEvent::MigrationComplete { entity, .. } => {
                    fx.target_migrations.handle_migration_complete(entity, now_ms);
                }
                ZoneEvent::HandoffToken {
                    source_zone,
                    player_id,
                    token,
                    expires_at_ms,
                } => {
                    fx.target
                        .handle_handoff_token(source_zone, player_id, token, expires_at_ms);
                }
                _ => {}
            }
        }
        for event in fx.source_bus.poll() {
            match event {
                ZoneEvent::MigrationState {
                    source_zone,
                    entity,
                    state,
                } => {
                    fx.source_migrations
                        .handle_migration_state(source_zone, entity, state, now_ms);
                }
                ZoneEvent::HandoffResult {
                    player_id, success, ..
                } => {
                    fx.source.handle_handoff_result(player_id, success, now_ms);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn phases_advance_with_approach_and_never_regress() {
        let mut fx = fixture();
        let player = PlayerId(7);
        let entity =
            fx.source_store
                .spawn_player(player, ConnectionId(1), Vec3::new(900.0, 0.0, 500.0));

        // Core seam is at x=1000; thresholds are 75/50/25/10 units out.
        step(&mut fx, player, entity, 900.0, 0);
        assert_eq!(fx.source.phase(player), HandoffPhase::None);

        step(&mut fx, player, entity, 930.0, 16);
        assert_eq!(fx.source.phase(player), HandoffPhase::Preparing);

        step(&mut fx, player, entity, 955.0, 33);
        assert_eq!(fx.source.phase(player), HandoffPhase::AuraOverlap);

        step(&mut fx, player, entity, 980.0, 50);
        assert_eq!(fx.source.phase(player), HandoffPhase::Migrating);
        assert!(fx.source_migrations.is_migrating(entity) || !fx.source_store.contains(entity));

        // The acked handover commits on this step, which mints the
        // token and flips to switching.
        step(&mut fx, player, entity, 992.0, 66);
        assert_eq!(fx.source.phase(player), HandoffPhase::Switching);
        assert!(!fx.source_store.contains(entity));
        assert!(fx.target_store.contains(entity));

        let (notified, instruction) = fx.notifier.reconnects.lock().unwrap()[0].clone();
        assert_eq!(notified, player);
        assert_eq!(instruction.zone, ZoneId(2));
        assert_eq!(instruction.port, 7777 + 2);

        // Reconnect on the target completes the handoff on the source.
        let token = instruction.token.clone();
        fx.target
            .accept_reconnect(player, &token, &mut fx.target_bus, 100)
            .unwrap();
        step(&mut fx, player, entity, 992.0, 116);
        assert_eq!(fx.source.phase(player), HandoffPhase::Completed);
        assert_eq!(fx.source.stats().completed, 1);
        // Preparation started at t=16, completed at t=116.
        assert_eq!(fx.source.stats().max_duration_ms, 100);
        assert_eq!(fx.source.stats().avg_duration_ms(), 100);
    }

    #[test]
    fn walking_away_cancels_before_migration() {
        let mut fx = fixture();
        let player = PlayerId(7);
        let entity =
            fx.source_store
                .spawn_player(player, ConnectionId(1), Vec3::new(900.0, 0.0, 500.0));

        step(&mut fx, player, entity, 955.0, 0);
        assert_eq!(fx.source.phase(player), HandoffPhase::AuraOverlap);

        step(&mut fx, player, entity, 900.0, 16);
        assert_eq!(fx.source.phase(player), HandoffPhase::None);
        assert_eq!(fx.source.stats().cancelled, 1);
        assert_eq!(fx.notifier.cancellations.lock().unwrap().as_slice(), &[player]);
    }

    #[test]
    fn walking_away_does_not_cancel_after_migration_starts() {
        let mut fx = fixture();
        let player = PlayerId(7);
        let entity =
            fx.source_store
                .spawn_player(player, ConnectionId(1), Vec3::new(900.0, 0.0, 500.0));

        step(&mut fx, player, entity, 955.0, 0);
        step(&mut fx, player, entity, 980.0, 16);
        assert_eq!(fx.source.phase(player), HandoffPhase::Migrating);

        // Retreating no longer cancels: the entity is in flight, so
        // the handover commits and the switch goes out anyway.
        step(&mut fx, player, entity, 900.0, 33);
        assert_eq!(fx.source.phase(player), HandoffPhase::Switching);
        assert_eq!(fx.source.stats().cancelled, 0);
        assert!(!fx.source_store.contains(entity));
    }

    #[test]
    fn moving_away_from_the_seam_never_starts_a_handoff() {
        let mut fx = fixture();
        let player = PlayerId(7);
        let entity =
            fx.source_store
                .spawn_player(player, ConnectionId(1), Vec3::new(980.0, 0.0, 500.0));

        // Deep in the seam band but headed back toward the interior.
        let action = fx.source.update_player(
            player,
            entity,
            Vec3::new(980.0, 0.0, 500.0),
            Vec3::new(-60.0, 0.0, 0.0),
            &fx.partition,
            &fx.source_migrations,
            &mut fx.source_bus,
            0,
        );
        assert!(action.is_none());
        assert_eq!(fx.source.phase(player), HandoffPhase::None);
    }

    #[test]
    fn token_is_single_use() {
        let mut fx = fixture();
        let player = PlayerId(7);
        fx.target
            .handle_handoff_token(ZoneId(1), player, "abc".to_string(), 10_000);

        fx.target
            .accept_reconnect(player, "abc", &mut fx.target_bus, 100)
            .unwrap();
        let err = fx
            .target
            .accept_reconnect(player, "abc", &mut fx.target_bus, 101)
            .unwrap_err();
        assert!(matches!(err, ShardError::NoActiveHandoff(p) if p == player));
    }

    #[test]
    fn expired_or_mismatched_token_is_rejected() {
        let mut fx = fixture();
        let player = PlayerId(7);
        fx.target
            .handle_handoff_token(ZoneId(1), player, "abc".to_string(), 5_000);

        // A bad guess spends the token; the real one is gone too.
        let err = fx
            .target
            .accept_reconnect(player, "wrong", &mut fx.target_bus, 100)
            .unwrap_err();
        assert!(matches!(err, ShardError::TokenRejected(_)));
        let err = fx
            .target
            .accept_reconnect(player, "abc", &mut fx.target_bus, 200)
            .unwrap_err();
        assert!(matches!(err, ShardError::NoActiveHandoff(_)));

        fx.target
            .handle_handoff_token(ZoneId(1), player, "late".to_string(), 5_000);
        let err = fx
            .target
            .accept_reconnect(player, "late", &mut fx.target_bus, 6_000)
            .unwrap_err();
        assert!(matches!(err, ShardError::TokenRejected(_)));
        assert_eq!(fx.target.stats().tokens_rejected, 2);

        // Both rejections reported a failure back to the source zone.
        let failures = fx
            .source_bus
            .poll()
            .into_iter()
            .filter(|event| {
                matches!(
                    event,
                    ZoneEvent::HandoffResult { success: false, .. }
                )
            })
            .count();
        assert_eq!(failures, 2);
    }

    #[test]
    fn rejected_token_fails_the_source_handoff() {
        let mut fx = fixture();
        let player = PlayerId(7);
        let entity =
            fx.source_store
                .spawn_player(player, ConnectionId(1), Vec3::new(900.0, 0.0, 500.0));

        step(&mut fx, player, entity, 955.0, 0);
        step(&mut fx, player, entity, 980.0, 16);
        step(&mut fx, player, entity, 992.0, 33);
        assert_eq!(fx.source.phase(player), HandoffPhase::Switching);

        // An impostor presents a bad token on the target; the source
        // learns of the rejection instead of waiting out the switch
        // window.
        let err = fx
            .target
            .accept_reconnect(player, "bogus", &mut fx.target_bus, 50)
            .unwrap_err();
        assert!(matches!(err, ShardError::TokenRejected(_)));

        step(&mut fx, player, entity, 992.0, 66);
        assert_eq!(fx.source.phase(player), HandoffPhase::Failed);
        assert_eq!(fx.source.stats().failed, 1);
        assert!(fx
            .notifier
            .cancellations
            .lock()
            .unwrap()
            .contains(&player));
    }

    #[test]
    fn switch_timeout_fails_the_handoff() {
        let mut fx = fixture();
        let player = PlayerId(7);
        let entity =
            fx.source_store
                .spawn_player(player, ConnectionId(1), Vec3::new(900.0, 0.0, 500.0));

        step(&mut fx, player, entity, 955.0, 0);
        step(&mut fx, player, entity, 980.0, 16);
        step(&mut fx, player, entity, 992.0, 33);
        assert_eq!(fx.source.phase(player), HandoffPhase::Switching);

        // The client never reconnects; the switch window closes.
        fx.source.update(33 + 2_000);
        assert_eq!(fx.source.phase(player), HandoffPhase::Failed);
        assert_eq!(fx.source.stats().failed, 1);
        assert!(fx
            .notifier
            .cancellations
            .lock()
            .unwrap()
            .contains(&player));

        // Terminal record is swept on the following tick.
        fx.source.update(33 + 2_016);
        assert_eq!(fx.source.phase(player), HandoffPhase::None);
    }
}
