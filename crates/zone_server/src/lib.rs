//! # Zone Server - Authoritative Shard Handoff Layer
//!
//! Sharding infrastructure for a real-time multiplayer world split into
//! rectangular zones, each simulated by exactly one authoritative shard.
//! This crate owns everything that happens at zone boundaries: aura
//! projection, ownership migration, and the client-visible handoff.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **World Partition** - Static grid of zone cores plus a 50-unit aura
//!   margin on every interior edge
//! * **Zone Shard** - Single-threaded 60 Hz tick owning one zone's
//!   entities and driving all boundary machinery
//! * **Aura Projection** - Read-only ghost mirrors of neighbor-owned
//!   entities, refreshed at 20 Hz
//! * **Entity Migration** - Atomic snapshot handover between shards with
//!   timeout rollback on either side
//! * **Zone Handoff** - Distance-staged client handoff (75/50/25/10
//!   units from the seam) finishing with a single-use reconnect token
//! * **Orchestrator** - Cluster-wide placement, capacity spillover and
//!   shard liveness
//!
//! ### Boundary Flow
//!
//! 1. A player approaches the seam; the handoff controller starts
//!    preparing at 75 units out
//! 2. At 50 units the entity enters the neighbor's aura and is ghosted
//!    there every third tick
//! 3. At 25 units the entity itself migrates: snapshot out, restore on
//!    the target, destroy at the source only after the acknowledgment
//! 4. At 10 units the source mints a single-use token and the client
//!    reconnects to the target shard
//!
//! Every state machine takes an explicit millisecond clock, so the whole
//! crate is deterministic under test.
//!
//! ## Error Handling
//!
//! Structured failures live in [`ShardError`]. Configuration problems
//! are fatal at startup; capacity and placement problems are surfaced to
//! callers; malformed or duplicate cross-zone messages are absorbed and
//! logged, never raised across the tick boundary.

pub use config::{HandoffConfig, ShardConfig};
pub use error::ShardError;
pub use orchestrator::{ZoneOrchestrator, ZoneState};
pub use partition::{WorldPartition, ZoneBounds, ZoneDefinition};
pub use shard::ZoneShard;
pub use types::{ConnectionId, EntityId, PlayerId, Vec3, ZoneId};

// Public module declarations
pub mod aura;
pub mod config;
pub mod entity;
pub mod error;
pub mod handoff;
pub mod messenger;
pub mod migration;
pub mod orchestrator;
pub mod partition;
pub mod persistence;
pub mod shard;
pub mod types;
