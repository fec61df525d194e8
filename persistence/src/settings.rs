// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Settings
//!
//! Options of the persistence extension and of the at-least-once delivery
//! helper.
//!

use serde::{Deserialize, Serialize};

use std::time::Duration;

/// Options of the persistence extension.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Longest wait for the snapshot, and for each replayed event, before
    /// recovery fails.
    pub recovery_event_timeout: Duration,
    /// Commands held back while recovering or persisting. `None` means
    /// unbounded.
    pub internal_stash_capacity: Option<usize>,
    /// Name of the journal actor under `/system`.
    pub journal_name: String,
    /// Name of the snapshot store actor under `/system`.
    pub snapshot_store_name: String,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            recovery_event_timeout: Duration::from_secs(30),
            internal_stash_capacity: None,
            journal_name: "journal".to_owned(),
            snapshot_store_name: "snapshot-store".to_owned(),
        }
    }
}

/// Options of [`AtLeastOnceDelivery`](crate::AtLeastOnceDelivery).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtLeastOnceDeliverySettings {
    /// Age after which an unconfirmed message is sent again.
    pub redeliver_interval: Duration,
    /// Most messages sent again in one sweep.
    pub redelivery_burst_limit: usize,
    /// Attempts after which a delivery is reported as unconfirmed.
    pub warn_after_number_of_unconfirmed_attempts: u32,
    /// Most deliveries that may wait for confirmation.
    pub max_unconfirmed_messages: usize,
}

impl Default for AtLeastOnceDeliverySettings {
    fn default() -> Self {
        Self {
            redeliver_interval: Duration::from_secs(5),
            redelivery_burst_limit: 10_000,
            warn_after_number_of_unconfirmed_attempts: 5,
            max_unconfirmed_messages: 100_000,
        }
    }
}
