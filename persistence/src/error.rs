// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Persistence errors
//!
//! Errors raised by journals, snapshot stores and the delivery helper.
//! They travel inside protocol replies, so they are cloneable and
//! serializable like the actor errors.
//!

use actor::Error as ActorError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the persistence layer.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// A journal could not write or read events.
    #[error("Journal error: {0}")]
    Journal(String),
    /// A snapshot store could not load, save or delete.
    #[error("Snapshot store error: {0}")]
    SnapshotStore(String),
    /// The journal refused an event before storing it.
    #[error("Event rejected: {0}")]
    Rejected(String),
    /// Recovery did not make progress in time.
    #[error("Recovery timed out: {0}")]
    RecoveryTimeout(String),
    /// Too many deliveries wait for confirmation.
    #[error("Too many unconfirmed messages, maximum allowed is {0}")]
    MaxUnconfirmedMessagesExceeded(usize),
    /// `Persistence::install` was not called on the system.
    #[error("Persistence is not installed in the actor system.")]
    NotInstalled,
    /// Error of the actor runtime.
    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),
}

impl From<Error> for ActorError {
    fn from(error: Error) -> Self {
        match error {
            Error::Actor(error) => error,
            Error::MaxUnconfirmedMessagesExceeded(_) => {
                ActorError::Capacity(error.to_string())
            }
            error => ActorError::Store(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_conversion_to_actor_error() {
        let error: ActorError = Error::MaxUnconfirmedMessagesExceeded(3).into();
        assert!(matches!(error, ActorError::Capacity(_)));

        let error: ActorError = Error::Journal("disk".to_owned()).into();
        assert_eq!(error, ActorError::Store("Journal error: disk".to_owned()));

        let error: ActorError = Error::Actor(ActorError::SystemTerminated).into();
        assert_eq!(error, ActorError::SystemTerminated);
    }
}
