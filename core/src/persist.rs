//! Mirror of the cache in local storage.
//!
//! Storage problems never reach callers: a broken or missing database means
//! an empty initial snapshot and skipped saves, each logged once per attempt.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;

use crate::db::Database;
use crate::models::PersistedState;
use crate::store::WeakStore;

/// Anything that can hold one persisted snapshot.
pub trait SnapshotStorage: Send {
    fn read(&self) -> Result<PersistedState>;
    /// Replace the stored snapshot. Either all of `state` lands or none of it.
    fn write(&self, state: &PersistedState) -> Result<()>;
}

impl SnapshotStorage for Database {
    fn read(&self) -> Result<PersistedState> {
        self.load_all()
    }

    fn write(&self, state: &PersistedState) -> Result<()> {
        self.save_state(state)
    }
}

pub struct Persistence<S = Database> {
    storage: Option<S>,
}

impl Persistence<Database> {
    /// Open the snapshot database, or run without persistence if that fails.
    pub fn open(path: &Path) -> Self {
        match Database::open(path) {
            Ok(db) => Self::new(db),
            Err(e) => {
                log::warn!("Local cache unavailable, continuing without it: {e:#}");
                Self::unavailable()
            }
        }
    }
}

impl<S: SnapshotStorage> Persistence<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage: Some(storage),
        }
    }

    #[must_use]
    pub fn unavailable() -> Self {
        Self { storage: None }
    }

    pub fn is_available(&self) -> bool {
        self.storage.is_some()
    }

    /// The last saved snapshot; empty when there is none or it cannot be read.
    pub fn load_all(&self) -> PersistedState {
        let Some(storage) = &self.storage else {
            return PersistedState::default();
        };
        match storage.read() {
            Ok(state) => state,
            Err(e) => {
                log::warn!("Failed to load local cache: {e:#}");
                PersistedState::default()
            }
        }
    }

    /// Write `state`. Returns whether it was stored.
    pub fn save_state(&self, state: &PersistedState) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };
        match storage.write(state) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to save local cache: {e:#}");
                false
            }
        }
    }
}

/// Save the cache whenever it changes, at most once per `throttle`.
///
/// Runs until the store is dropped.
pub async fn flush_on_change<S: SnapshotStorage>(
    store: WeakStore,
    mut changes: watch::Receiver<u64>,
    persistence: Arc<Mutex<Persistence<S>>>,
    throttle: Duration,
) {
    while changes.changed().await.is_ok() {
        tokio::time::sleep(throttle).await;
        let revision = *changes.borrow_and_update();
        let Some(store) = store.upgrade() else {
            break;
        };
        let state = store.persisted_state();
        drop(store);

        let saved = persistence
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .save_state(&state);
        if saved {
            log::debug!("Flushed cache at revision {revision}");
        }
    }
}
