// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Settings
//!
//! Runtime options of an actor system. Loading them from a file is left to
//! the embedding application; the struct only needs serde.
//!

use crate::MailboxType;

use serde::{Deserialize, Serialize};

use std::time::Duration;

/// Options of an actor system.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorSystemSettings {
    /// Name of the system, part of every actor address.
    pub name: String,
    /// Mailbox used when the props do not name one.
    pub default_mailbox: MailboxType,
    /// Stash capacity used when the props do not name one.
    pub default_stash_capacity: Option<usize>,
    /// Events buffered per broadcast reader of the event stream.
    pub event_stream_capacity: usize,
    /// Timeout used by helpers that ask without an explicit one.
    pub ask_timeout: Duration,
}

impl Default for ActorSystemSettings {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            default_mailbox: MailboxType::Unbounded,
            default_stash_capacity: None,
            event_stream_capacity: 1024,
            ask_timeout: Duration::from_secs(5),
        }
    }
}

impl ActorSystemSettings {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }
}
