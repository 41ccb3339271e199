//! # Persistence Module
//!
//! Saves and restores the mapping store of one session. A session is a
//! directory holding a single `mappings.toml`; several sessions can live
//! side by side so that different setups (studio, live, test rig) keep
//! independent mappings.
//!
//! ## Key Abstractions
//! - [`MappingSnapshot`]: everything that survives a restart, i.e. the
//!   mapping records and the active profile. Runtime edge flags are never
//!   part of it.
//! - [`MappingRepository`]: storage seam used by the engine task. Object safe,
//!   so the task can hold an `Arc<dyn MappingRepository>`.
//! - [`session_store::TomlSessionStore`]: the on-disk implementation.
//!
//! ## Error Handling Strategy
//! Uses `color_eyre` for file and format errors. Individual malformed
//! mapping records are skipped with a warning instead of failing the whole
//! load, so one broken entry never costs the user the rest of a session.

pub mod session_store;

use crate::mapping::store::DEFAULT_PROFILE;
use crate::mapping::types::Mapping;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

pub use session_store::TomlSessionStore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persisted state of a mapping engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingSnapshot {
    pub active_profile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mappings: Vec<Mapping>,
}

impl Default for MappingSnapshot {
    fn default() -> Self {
        Self {
            active_profile: DEFAULT_PROFILE.to_string(),
            saved_at: None,
            mappings: Vec::new(),
        }
    }
}

/// Storage backend for mapping snapshots.
pub trait MappingRepository: Send + Sync {
    /// Name reported in save/load notifications
    fn session(&self) -> &str;

    fn save<'a>(&'a self, snapshot: &'a MappingSnapshot) -> BoxFuture<'a, Result<()>>;

    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> BoxFuture<'_, Result<Option<MappingSnapshot>>>;
}

/// Keeps the last saved snapshot in memory. Used where nothing should touch
/// the disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    session: String,
    slot: Arc<Mutex<Option<MappingSnapshot>>>,
}

impl MemoryRepository {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            slot: Arc::default(),
        }
    }

    pub fn stored(&self) -> Option<MappingSnapshot> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl MappingRepository for MemoryRepository {
    fn session(&self) -> &str {
        &self.session
    }

    fn save<'a>(&'a self, snapshot: &'a MappingSnapshot) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            *self
                .slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot.clone());
            Ok(())
        })
    }

    fn load(&self) -> BoxFuture<'_, Result<Option<MappingSnapshot>>> {
        Box::pin(async move { Ok(self.stored()) })
    }
}
