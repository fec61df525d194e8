// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! In-memory journal and snapshot store.
//!
//! Both keep their data for the lifetime of the plugin actor, which lives
//! as long as the actor system. The journal can be told to reject or fail
//! writes, to exercise the error paths of eventsourced actors.
//!

use crate::{
    error::Error,
    journal::AsyncWriteJournal,
    persistent::{
        AtomicWrite, PersistentRepr, SelectedSnapshot, SnapshotMetadata,
        SnapshotSelectionCriteria,
    },
};

use actor::AnyMessage;

use async_trait::async_trait;

use std::{collections::HashMap, sync::Arc};

/// Decides whether an event is refused. `Some(reason)` refuses it.
pub type WritePredicate =
    Arc<dyn Fn(&PersistentRepr) -> Option<String> + Send + Sync>;

/// Journal keeping events in a map per persistence id.
#[derive(Default)]
pub struct InMemoryJournal {
    events: HashMap<String, Vec<PersistentRepr>>,
    highest: HashMap<String, i64>,
    rejection: Option<WritePredicate>,
    failure: Option<WritePredicate>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses the atomic writes containing an event matched by
    /// `predicate`, as a serializer refusing a payload would.
    pub fn with_rejection<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PersistentRepr) -> Option<String> + Send + Sync + 'static,
    {
        self.rejection = Some(Arc::new(predicate));
        self
    }

    /// Fails the whole request when one of its events is matched by
    /// `predicate`, as a broken storage would.
    pub fn with_failure<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PersistentRepr) -> Option<String> + Send + Sync + 'static,
    {
        self.failure = Some(Arc::new(predicate));
        self
    }

    fn check(predicate: &Option<WritePredicate>, write: &AtomicWrite) -> Option<String> {
        predicate
            .as_ref()
            .and_then(|predicate| write.payload.iter().find_map(|repr| predicate(repr)))
    }
}

#[async_trait]
impl AsyncWriteJournal for InMemoryJournal {
    async fn write_messages(
        &mut self,
        writes: &[AtomicWrite],
    ) -> Result<Vec<Result<(), Error>>, Error> {
        if let Some(reason) = writes
            .iter()
            .find_map(|write| Self::check(&self.failure, write))
        {
            return Err(Error::Journal(reason));
        }
        let mut results = Vec::with_capacity(writes.len());
        for write in writes {
            if let Some(reason) = Self::check(&self.rejection, write) {
                results.push(Err(Error::Rejected(reason)));
                continue;
            }
            let Some(persistence_id) = write.persistence_id() else {
                results.push(Ok(()));
                continue;
            };
            let highest = self.highest.entry(persistence_id.to_owned()).or_insert(0);
            *highest = (*highest).max(write.highest_sequence_nr());
            self.events
                .entry(persistence_id.to_owned())
                .or_default()
                .extend(write.payload.iter().cloned());
            results.push(Ok(()));
        }
        Ok(results)
    }

    async fn replay_messages(
        &mut self,
        persistence_id: &str,
        from_sequence_nr: i64,
        to_sequence_nr: i64,
        max: i64,
    ) -> Result<Vec<PersistentRepr>, Error> {
        let max = usize::try_from(max).unwrap_or(usize::MAX);
        Ok(self
            .events
            .get(persistence_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|repr| {
                        repr.sequence_nr >= from_sequence_nr
                            && repr.sequence_nr <= to_sequence_nr
                    })
                    .take(max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read_highest_sequence_nr(
        &mut self,
        persistence_id: &str,
        _from_sequence_nr: i64,
    ) -> Result<i64, Error> {
        Ok(self.highest.get(persistence_id).copied().unwrap_or(0))
    }

    async fn delete_messages_to(
        &mut self,
        persistence_id: &str,
        to_sequence_nr: i64,
    ) -> Result<(), Error> {
        if let Some(events) = self.events.get_mut(persistence_id) {
            events.retain(|repr| repr.sequence_nr > to_sequence_nr);
        }
        Ok(())
    }
}

/// Snapshot store keeping snapshots in a map per persistence id.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: HashMap<String, Vec<SelectedSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl crate::snapshot::SnapshotStore for InMemorySnapshotStore {
    async fn load(
        &mut self,
        persistence_id: &str,
        criteria: &SnapshotSelectionCriteria,
    ) -> Result<Option<SelectedSnapshot>, Error> {
        Ok(self.snapshots.get(persistence_id).and_then(|snapshots| {
            snapshots
                .iter()
                .filter(|selected| criteria.matches(&selected.metadata))
                .max_by_key(|selected| {
                    (selected.metadata.sequence_nr, selected.metadata.timestamp)
                })
                .cloned()
        }))
    }

    async fn save(
        &mut self,
        metadata: &SnapshotMetadata,
        snapshot: &AnyMessage,
    ) -> Result<(), Error> {
        let snapshots = self
            .snapshots
            .entry(metadata.persistence_id.clone())
            .or_default();
        // A snapshot at the same sequence number replaces the old one.
        snapshots.retain(|selected| selected.metadata.sequence_nr != metadata.sequence_nr);
        snapshots.push(SelectedSnapshot {
            metadata: metadata.clone(),
            snapshot: snapshot.clone(),
        });
        Ok(())
    }

    async fn delete(&mut self, metadata: &SnapshotMetadata) -> Result<(), Error> {
        if let Some(snapshots) = self.snapshots.get_mut(&metadata.persistence_id) {
            snapshots.retain(|selected| {
                selected.metadata.sequence_nr != metadata.sequence_nr
            });
        }
        Ok(())
    }

    async fn delete_all(
        &mut self,
        persistence_id: &str,
        criteria: &SnapshotSelectionCriteria,
    ) -> Result<(), Error> {
        if let Some(snapshots) = self.snapshots.get_mut(persistence_id) {
            snapshots.retain(|selected| !criteria.matches(&selected.metadata));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::snapshot::SnapshotStore;

    fn repr(sequence_nr: i64, payload: &str) -> PersistentRepr {
        PersistentRepr::new(
            AnyMessage::new(payload.to_owned()),
            sequence_nr,
            "p",
            "w",
            None,
        )
    }

    #[tokio::test]
    async fn test_journal_write_replay_delete() {
        let mut journal = InMemoryJournal::new();
        let writes = vec![
            AtomicWrite::new(vec![repr(1, "a"), repr(2, "b")]),
            AtomicWrite::new(vec![repr(3, "c")]),
        ];
        let results = journal.write_messages(&writes).await.unwrap();
        assert!(results.iter().all(Result::is_ok));

        let replayed = journal.replay_messages("p", 2, 3, 10).await.unwrap();
        let sequence: Vec<i64> = replayed.iter().map(|r| r.sequence_nr).collect();
        assert_eq!(sequence, vec![2, 3]);
        assert_eq!(journal.replay_messages("p", 1, 3, 1).await.unwrap().len(), 1);

        journal.delete_messages_to("p", 2).await.unwrap();
        assert_eq!(journal.replay_messages("p", 1, 3, 10).await.unwrap().len(), 1);
        assert_eq!(journal.read_highest_sequence_nr("p", 0).await.unwrap(), 3);
        assert_eq!(journal.read_highest_sequence_nr("q", 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_journal_rejection_and_failure() {
        let mut journal = InMemoryJournal::new().with_rejection(|repr| {
            (repr.payload.downcast_ref::<String>().map(String::as_str) == Some("bad"))
                .then(|| "not serializable".to_owned())
        });
        let writes = vec![
            AtomicWrite::new(vec![repr(1, "bad")]),
            AtomicWrite::new(vec![repr(2, "good")]),
        ];
        let results = journal.write_messages(&writes).await.unwrap();
        assert!(matches!(results[0], Err(Error::Rejected(_))));
        assert!(results[1].is_ok());
        assert_eq!(journal.read_highest_sequence_nr("p", 0).await.unwrap(), 2);

        let mut journal = InMemoryJournal::new()
            .with_failure(|_| Some("disk full".to_owned()));
        let result = journal.write_messages(&writes).await;
        assert_eq!(result, Err(Error::Journal("disk full".to_owned())));
    }

    #[tokio::test]
    async fn test_snapshot_store_selection() {
        let mut store = InMemorySnapshotStore::new();
        for sequence_nr in [2, 5, 9] {
            store
                .save(
                    &SnapshotMetadata::new("p", sequence_nr),
                    &AnyMessage::new(sequence_nr),
                )
                .await
                .unwrap();
        }
        let latest = store
            .load("p", &SnapshotSelectionCriteria::latest())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.metadata.sequence_nr, 9);

        let bounded = SnapshotSelectionCriteria::latest().with_max_sequence_nr(6);
        let selected = store.load("p", &bounded).await.unwrap().unwrap();
        assert_eq!(selected.snapshot.downcast::<i64>(), Some(5));

        store.delete_all("p", &bounded).await.unwrap();
        store.delete(&SnapshotMetadata::new("p", 9)).await.unwrap();
        assert!(store
            .load("p", &SnapshotSelectionCriteria::latest())
            .await
            .unwrap()
            .is_none());
    }
}
