// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Persistent representations
//!
//! Value types exchanged between eventsourced actors and their plugins:
//! journal entries, snapshot metadata and selection criteria, and the
//! recovery configuration.
//!

use crate::error::Error;

use actor::{ActorRef, AnyMessage, Message};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::error;

use std::time::{SystemTime, UNIX_EPOCH};

/// One event as stored in the journal.
#[derive(Clone, Debug)]
pub struct PersistentRepr {
    pub payload: AnyMessage,
    pub sequence_nr: i64,
    pub persistence_id: String,
    /// Type name of the payload.
    pub manifest: String,
    /// Identifies the incarnation that wrote the event.
    pub writer_uuid: String,
    pub deleted: bool,
    /// Sender of the command that persisted the event.
    pub sender: Option<ActorRef>,
}

impl PersistentRepr {
    pub fn new(
        payload: AnyMessage,
        sequence_nr: i64,
        persistence_id: &str,
        writer_uuid: &str,
        sender: Option<ActorRef>,
    ) -> Self {
        Self {
            manifest: payload.type_name().to_owned(),
            payload,
            sequence_nr,
            persistence_id: persistence_id.to_owned(),
            writer_uuid: writer_uuid.to_owned(),
            deleted: false,
            sender,
        }
    }
}

/// Events written together: all of them are stored or none is.
#[derive(Clone, Debug)]
pub struct AtomicWrite {
    pub payload: Vec<PersistentRepr>,
}

impl AtomicWrite {
    pub fn new(payload: Vec<PersistentRepr>) -> Self {
        Self { payload }
    }

    pub fn persistence_id(&self) -> Option<&str> {
        self.payload.first().map(|repr| repr.persistence_id.as_str())
    }

    pub fn lowest_sequence_nr(&self) -> i64 {
        self.payload.first().map(|repr| repr.sequence_nr).unwrap_or(0)
    }

    pub fn highest_sequence_nr(&self) -> i64 {
        self.payload.last().map(|repr| repr.sequence_nr).unwrap_or(0)
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Entry of a write request: events to store, or a message the journal
/// only sends back (used to run handlers in order with writes).
#[derive(Clone, Debug)]
pub enum JournalWrite {
    Atomic(AtomicWrite),
    Loop {
        payload: AnyMessage,
        sender: Option<ActorRef>,
    },
}

/// Identity of a stored snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub persistence_id: String,
    pub sequence_nr: i64,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
}

impl SnapshotMetadata {
    /// Metadata stamped with the current time.
    pub fn new(persistence_id: &str, sequence_nr: i64) -> Self {
        Self {
            persistence_id: persistence_id.to_owned(),
            sequence_nr,
            timestamp: now_millis(),
        }
    }
}

/// Snapshot found by a load request.
#[derive(Clone, Debug)]
pub struct SelectedSnapshot {
    pub metadata: SnapshotMetadata,
    pub snapshot: AnyMessage,
}

/// Offered to `receive_recover` when recovery starts from a snapshot.
#[derive(Clone, Debug)]
pub struct SnapshotOffer {
    pub metadata: SnapshotMetadata,
    pub snapshot: AnyMessage,
}

impl Message for SnapshotOffer {}

/// Delivered to `receive_recover` once replay is over, before any command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoveryCompleted;

impl Message for RecoveryCompleted {}

/// Bounds used to select snapshots. All bounds are inclusive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSelectionCriteria {
    pub max_sequence_nr: i64,
    pub max_timestamp: u64,
    pub min_sequence_nr: i64,
    pub min_timestamp: u64,
}

impl SnapshotSelectionCriteria {
    /// Selects the most recent snapshot.
    pub fn latest() -> Self {
        Self {
            max_sequence_nr: i64::MAX,
            max_timestamp: u64::MAX,
            min_sequence_nr: 0,
            min_timestamp: 0,
        }
    }

    /// Selects nothing.
    pub fn none() -> Self {
        Self {
            max_sequence_nr: 0,
            max_timestamp: 0,
            min_sequence_nr: 0,
            min_timestamp: 0,
        }
    }

    pub fn with_max_sequence_nr(mut self, max_sequence_nr: i64) -> Self {
        self.max_sequence_nr = max_sequence_nr;
        self
    }

    pub fn matches(&self, metadata: &SnapshotMetadata) -> bool {
        metadata.sequence_nr <= self.max_sequence_nr
            && metadata.timestamp <= self.max_timestamp
            && metadata.sequence_nr >= self.min_sequence_nr
            && metadata.timestamp >= self.min_timestamp
    }

    /// Criteria limited to snapshots taken at or before `to_sequence_nr`.
    pub(crate) fn limit(&self, to_sequence_nr: i64) -> Self {
        if to_sequence_nr < self.max_sequence_nr {
            self.clone().with_max_sequence_nr(to_sequence_nr)
        } else {
            self.clone()
        }
    }
}

impl Default for SnapshotSelectionCriteria {
    fn default() -> Self {
        Self::latest()
    }
}

/// How an eventsourced actor recovers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recovery {
    /// Snapshot to start from.
    pub from_snapshot: SnapshotSelectionCriteria,
    /// Last event replayed.
    pub to_sequence_nr: i64,
    /// Most events replayed.
    pub replay_max: i64,
}

impl Recovery {
    /// Skips snapshot and replay. The sequence number still continues
    /// after the highest stored one.
    pub fn none() -> Self {
        Self {
            from_snapshot: SnapshotSelectionCriteria::none(),
            to_sequence_nr: 0,
            replay_max: 0,
        }
    }
}

impl Default for Recovery {
    fn default() -> Self {
        Self {
            from_snapshot: SnapshotSelectionCriteria::latest(),
            to_sequence_nr: i64::MAX,
            replay_max: i64::MAX,
        }
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Binary encoding of the persisted shapes.
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    bincode::serialize(value).map_err(|e| {
        error!("Can't serialize value: {}", e);
        Error::Journal(format!("Can't serialize value: {}", e))
    })
}

pub fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    bincode::deserialize(bytes).map_err(|e| {
        error!("Can't deserialize value: {}", e);
        Error::Journal(format!("Can't deserialize value: {}", e))
    })
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_criteria_bounds() {
        let metadata = SnapshotMetadata {
            persistence_id: "p".to_owned(),
            sequence_nr: 5,
            timestamp: 10,
        };
        assert!(SnapshotSelectionCriteria::latest().matches(&metadata));
        assert!(!SnapshotSelectionCriteria::none().matches(&metadata));
        assert!(!SnapshotSelectionCriteria::latest().limit(4).matches(&metadata));
        assert!(SnapshotSelectionCriteria::latest().limit(5).matches(&metadata));
    }

    #[test]
    fn test_metadata_bytes() {
        let metadata = SnapshotMetadata::new("order-1", 7);
        let bytes = to_bytes(&metadata).unwrap();
        let decoded: SnapshotMetadata = from_bytes(&bytes).unwrap();
        assert_eq!(decoded, metadata);
        assert!(from_bytes::<SnapshotMetadata>(&[1, 2]).is_err());
    }

    #[test]
    fn test_atomic_write_bounds() {
        let write = AtomicWrite::new(vec![
            PersistentRepr::new(AnyMessage::new(1u64), 3, "p", "w", None),
            PersistentRepr::new(AnyMessage::new(2u64), 4, "p", "w", None),
        ]);
        assert_eq!(write.persistence_id(), Some("p"));
        assert_eq!(write.lowest_sequence_nr(), 3);
        assert_eq!(write.highest_sequence_nr(), 4);
        assert_eq!(write.payload[0].manifest, "u64");
    }
}
