//! Best-effort session mirror.
//!
//! Shard liveness and player-to-zone assignments are mirrored to an
//! external key-value store with a TTL so an operator (or a recovering
//! orchestrator) can reconstruct coarse state after a crash. Every
//! operation here is fire-and-forget: a mirror failure is logged by the
//! caller and never blocks migration or handoff.

use crate::error::ShardError;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Key-value mirror with per-entry TTL.
pub trait SessionMirror: Send + Sync {
    fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), ShardError>;
    fn get(&self, key: &str) -> Result<Option<String>, ShardError>;
    fn delete(&self, key: &str) -> Result<(), ShardError>;
}

/// In-process mirror backed by a concurrent map. Entries expire lazily
/// on read.
#[derive(Debug, Default)]
pub struct InMemoryMirror {
    entries: DashMap<String, (String, Option<Instant>)>,
}

impl InMemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionMirror for InMemoryMirror {
    fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), ShardError> {
        let expires_at = if ttl_secs > 0 {
            Some(Instant::now() + Duration::from_secs(ttl_secs))
        } else {
            None
        };
        self.entries
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, ShardError> {
        if let Some(entry) = self.entries.get(key) {
            let (value, expires_at) = entry.value();
            if let Some(deadline) = expires_at {
                if Instant::now() >= *deadline {
                    drop(entry);
                    self.entries.remove(key);
                    return Ok(None);
                }
            }
            return Ok(Some(value.clone()));
        }
        Ok(None)
    }

    fn delete(&self, key: &str) -> Result<(), ShardError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Mirror that drops everything. Used when no external store is
/// configured; recovery degrades but nothing else changes.
#[derive(Debug, Default)]
pub struct NullMirror;

impl SessionMirror for NullMirror {
    fn set(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<(), ShardError> {
        Ok(())
    }

    fn get(&self, _key: &str) -> Result<Option<String>, ShardError> {
        Ok(None)
    }

    fn delete(&self, _key: &str) -> Result<(), ShardError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete_round_trip() {
        let mirror = InMemoryMirror::new();
        mirror.set("zone:1:status", "online,12", 300).unwrap();
        assert_eq!(
            mirror.get("zone:1:status").unwrap().as_deref(),
            Some("online,12")
        );
        mirror.delete("zone:1:status").unwrap();
        assert_eq!(mirror.get("zone:1:status").unwrap(), None);
    }

    #[test]
    fn zero_ttl_never_expires() {
        let mirror = InMemoryMirror::new();
        mirror.set("player:7", "zone-2", 0).unwrap();
        assert!(mirror.get("player:7").unwrap().is_some());
    }

    #[test]
    fn null_mirror_swallows_everything() {
        let mirror = NullMirror;
        mirror.set("k", "v", 10).unwrap();
        assert_eq!(mirror.get("k").unwrap(), None);
    }
}
