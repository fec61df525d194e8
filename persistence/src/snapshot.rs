// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Snapshot store
//!
//! Request and reply messages of the snapshot protocol, the
//! [`SnapshotStore`] trait implemented by storage plugins and the
//! [`SnapshotStoreActor`] answering the requests. Replies go to the sender
//! of the request.
//!

use crate::{
    error::Error,
    persistent::{SelectedSnapshot, SnapshotMetadata, SnapshotSelectionCriteria},
};

use actor::{Actor, ActorContext, AnyMessage, Error as ActorError, Message};

use async_trait::async_trait;
use tracing::{debug, error};

//
// Requests
//

#[derive(Clone, Debug)]
pub struct LoadSnapshot {
    pub persistence_id: String,
    pub criteria: SnapshotSelectionCriteria,
    pub to_sequence_nr: i64,
}

impl Message for LoadSnapshot {}

#[derive(Clone, Debug)]
pub struct SaveSnapshot {
    pub metadata: SnapshotMetadata,
    pub snapshot: AnyMessage,
}

impl Message for SaveSnapshot {}

#[derive(Clone, Debug)]
pub struct DeleteSnapshot {
    pub metadata: SnapshotMetadata,
}

impl Message for DeleteSnapshot {}

#[derive(Clone, Debug)]
pub struct DeleteSnapshots {
    pub persistence_id: String,
    pub criteria: SnapshotSelectionCriteria,
}

impl Message for DeleteSnapshots {}

//
// Replies
//

/// Answer to [`LoadSnapshot`]. `to_sequence_nr` is echoed from the
/// request.
#[derive(Clone, Debug)]
pub struct LoadSnapshotResult {
    pub snapshot: Option<SelectedSnapshot>,
    pub to_sequence_nr: i64,
}

impl Message for LoadSnapshotResult {}

#[derive(Clone, Debug)]
pub struct LoadSnapshotFailed {
    pub cause: Error,
}

impl Message for LoadSnapshotFailed {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveSnapshotSuccess {
    pub metadata: SnapshotMetadata,
}

impl Message for SaveSnapshotSuccess {}

#[derive(Clone, Debug)]
pub struct SaveSnapshotFailure {
    pub metadata: SnapshotMetadata,
    pub cause: Error,
}

impl Message for SaveSnapshotFailure {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteSnapshotSuccess {
    pub metadata: SnapshotMetadata,
}

impl Message for DeleteSnapshotSuccess {}

#[derive(Clone, Debug)]
pub struct DeleteSnapshotFailure {
    pub metadata: SnapshotMetadata,
    pub cause: Error,
}

impl Message for DeleteSnapshotFailure {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteSnapshotsSuccess {
    pub criteria: SnapshotSelectionCriteria,
}

impl Message for DeleteSnapshotsSuccess {}

#[derive(Clone, Debug)]
pub struct DeleteSnapshotsFailure {
    pub criteria: SnapshotSelectionCriteria,
    pub cause: Error,
}

impl Message for DeleteSnapshotsFailure {}

/// Storage side of a snapshot store.
#[async_trait]
pub trait SnapshotStore: Send + 'static {
    /// Youngest snapshot of `persistence_id` matching `criteria`.
    async fn load(
        &mut self,
        persistence_id: &str,
        criteria: &SnapshotSelectionCriteria,
    ) -> Result<Option<SelectedSnapshot>, Error>;

    async fn save(
        &mut self,
        metadata: &SnapshotMetadata,
        snapshot: &AnyMessage,
    ) -> Result<(), Error>;

    async fn delete(&mut self, metadata: &SnapshotMetadata) -> Result<(), Error>;

    async fn delete_all(
        &mut self,
        persistence_id: &str,
        criteria: &SnapshotSelectionCriteria,
    ) -> Result<(), Error>;
}

/// Actor running the snapshot protocol on top of a plugin.
pub struct SnapshotStoreActor<S: SnapshotStore> {
    store: S,
}

impl<S: SnapshotStore> SnapshotStoreActor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: SnapshotStore> Actor for SnapshotStoreActor<S> {
    async fn receive(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        if let Some(request) = message.downcast_ref::<LoadSnapshot>() {
            let criteria = request.criteria.limit(request.to_sequence_nr);
            match self.store.load(&request.persistence_id, &criteria).await {
                Ok(snapshot) => {
                    debug!(
                        "Snapshot of {} loaded: {}.",
                        request.persistence_id,
                        snapshot.is_some()
                    );
                    ctx.reply(LoadSnapshotResult {
                        snapshot,
                        to_sequence_nr: request.to_sequence_nr,
                    })
                }
                Err(cause) => {
                    error!(
                        "Can't load snapshot of {}: {}",
                        request.persistence_id, cause
                    );
                    ctx.reply(LoadSnapshotFailed { cause })
                }
            }
        } else if let Some(request) = message.downcast_ref::<SaveSnapshot>() {
            let metadata = request.metadata.clone();
            match self.store.save(&metadata, &request.snapshot).await {
                Ok(()) => ctx.reply(SaveSnapshotSuccess { metadata }),
                Err(cause) => ctx.reply(SaveSnapshotFailure { metadata, cause }),
            }
        } else if let Some(request) = message.downcast_ref::<DeleteSnapshot>() {
            let metadata = request.metadata.clone();
            match self.store.delete(&metadata).await {
                Ok(()) => ctx.reply(DeleteSnapshotSuccess { metadata }),
                Err(cause) => ctx.reply(DeleteSnapshotFailure { metadata, cause }),
            }
        } else if let Some(request) = message.downcast_ref::<DeleteSnapshots>() {
            let criteria = request.criteria.clone();
            match self
                .store
                .delete_all(&request.persistence_id, &criteria)
                .await
            {
                Ok(()) => ctx.reply(DeleteSnapshotsSuccess { criteria }),
                Err(cause) => ctx.reply(DeleteSnapshotsFailure { criteria, cause }),
            }
        } else {
            return ctx.unhandled(message);
        }
        Ok(())
    }
}
