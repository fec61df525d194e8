// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Persistence extension
//!
//! Installs the journal and snapshot store actors under `/system` and
//! registers them as a system helper, where eventsourced actors find them
//! when they start.
//!

use crate::{
    error::Error,
    journal::{AsyncWriteJournal, JournalActor},
    memory::{InMemoryJournal, InMemorySnapshotStore},
    settings::PersistenceSettings,
    snapshot::{SnapshotStore, SnapshotStoreActor},
};

use actor::{ActorRef, Props, SystemRef};

use tracing::debug;

/// Name of the system helper.
pub const PERSISTENCE_HELPER: &str = "persistence";

/// Plugins and settings shared by the eventsourced actors of a system.
#[derive(Clone, Debug)]
pub struct Persistence {
    journal: ActorRef,
    snapshot_store: ActorRef,
    settings: PersistenceSettings,
}

impl Persistence {
    /// Installs the in-memory plugins with default settings.
    pub async fn install(system: &SystemRef) -> Result<Self, Error> {
        Self::install_with(
            system,
            PersistenceSettings::default(),
            InMemoryJournal::new,
            InMemorySnapshotStore::new,
        )
        .await
    }

    /// Installs the plugins built by `journal` and `snapshot_store`. The
    /// factories run again when a plugin actor restarts.
    pub async fn install_with<J, S, FJ, FS>(
        system: &SystemRef,
        settings: PersistenceSettings,
        journal: FJ,
        snapshot_store: FS,
    ) -> Result<Self, Error>
    where
        J: AsyncWriteJournal,
        S: SnapshotStore,
        FJ: Fn() -> J + Send + Sync + 'static,
        FS: Fn() -> S + Send + Sync + 'static,
    {
        let journal = system.system_actor_of(
            Props::new(move || JournalActor::new(journal())),
            &settings.journal_name,
        )?;
        let snapshot_store = system.system_actor_of(
            Props::new(move || SnapshotStoreActor::new(snapshot_store())),
            &settings.snapshot_store_name,
        )?;
        let persistence = Self {
            journal,
            snapshot_store,
            settings,
        };
        system
            .add_helper(PERSISTENCE_HELPER, persistence.clone())
            .await;
        debug!(
            "Persistence installed: {} and {}.",
            persistence.journal.path(),
            persistence.snapshot_store.path()
        );
        Ok(persistence)
    }

    /// The extension installed in `system`.
    pub async fn get(system: &SystemRef) -> Result<Self, Error> {
        system
            .get_helper::<Persistence>(PERSISTENCE_HELPER)
            .await
            .ok_or(Error::NotInstalled)
    }

    pub fn journal(&self) -> &ActorRef {
        &self.journal
    }

    pub fn snapshot_store(&self) -> &ActorRef {
        &self.snapshot_store
    }

    pub fn settings(&self) -> &PersistenceSettings {
        &self.settings
    }
}
