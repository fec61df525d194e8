// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Hive Persistence
//!
//! Event sourcing for actors of the `actor` crate. A persistent actor
//! stores the events describing its state changes in a journal and
//! rebuilds its state by replaying them when it starts, optionally
//! starting from a snapshot.
//!
//! ## Plugins
//!
//! Journals implement [`AsyncWriteJournal`] and snapshot stores implement
//! [`SnapshotStore`]. Each plugin runs inside its own actor under
//! `/system`, installed once per system with [`Persistence::install_with`].
//! [`Persistence::install`] uses the in-memory plugins.
//!
//! ## Getting Started
//!
//! ```ignore
//! let (system, runner) = ActorSystem::create(settings, token)?;
//! tokio::spawn(async move { runner.run().await });
//! Persistence::install(&system).await?;
//!
//! let account = system.actor_of(Eventsourced::props(|| Account::default()), "account")?;
//! account.tell(Deposit(10), None);
//! ```
//!
//! ## Guarantees
//!
//! - Events of one actor get consecutive sequence numbers starting at 1.
//! - Persist handlers run in persist order, after the event is stored.
//! - Commands are not processed while recovery runs or while events
//!   persisted with `persist` wait for confirmation.
//! - [`AtLeastOnceDelivery`] resends messages until they are confirmed.
//!

mod at_least_once;
mod error;
mod eventsourced;
mod extension;
mod journal;
mod memory;
mod persistent;
mod settings;
mod snapshot;

pub use at_least_once::{
    AtLeastOnceDelivery, AtLeastOnceDeliverySnapshot, RedeliveryTick,
    UnconfirmedDelivery, UnconfirmedDeliverySnapshot, UnconfirmedWarning,
};
pub use error::Error;
pub use eventsourced::{Eventsourced, PersistentActor, PersistentContext};
pub use extension::{Persistence, PERSISTENCE_HELPER};
pub use journal::{
    AsyncWriteJournal, DeleteMessagesFailure, DeleteMessagesSuccess,
    DeleteMessagesTo, JournalActor, LoopMessageSuccess, RecoverySuccess,
    ReplayMessages, ReplayMessagesFailure, ReplayedMessage,
    WriteMessageFailure, WriteMessageRejected, WriteMessageSuccess,
    WriteMessages, WriteMessagesFailed, WriteMessagesSuccessful,
};
pub use memory::{InMemoryJournal, InMemorySnapshotStore, WritePredicate};
pub use persistent::{
    from_bytes, now_millis, to_bytes, AtomicWrite, JournalWrite,
    PersistentRepr, Recovery, RecoveryCompleted, SelectedSnapshot,
    SnapshotMetadata, SnapshotOffer, SnapshotSelectionCriteria,
};
pub use settings::{AtLeastOnceDeliverySettings, PersistenceSettings};
pub use snapshot::{
    DeleteSnapshot, DeleteSnapshotFailure, DeleteSnapshotSuccess,
    DeleteSnapshots, DeleteSnapshotsFailure, DeleteSnapshotsSuccess,
    LoadSnapshot, LoadSnapshotFailed, LoadSnapshotResult, SaveSnapshot,
    SaveSnapshotFailure, SaveSnapshotSuccess, SnapshotStore,
    SnapshotStoreActor,
};
