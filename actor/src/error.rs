// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!
//! Every failure that crosses the dispatch boundary of an actor is an
//! [`Error`]. When a receive step returns one, the cell consults
//! [`Error::policy`] to decide whether the failure is resolved through the
//! supervision protocol or stops the actor outright.
//!

use crate::ActorPath;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the actor system.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An error occurred while sending a message to an actor.
    #[error("An error occurred while sending a message to actor: {0}.")]
    Send(String),
    /// A child with the same name already exists (or is being created).
    #[error("Actor {0} exist.")]
    Exists(ActorPath),
    /// The requested actor name is not a valid path element.
    #[error("Invalid actor name '{0}'.")]
    InvalidName(String),
    /// An error occurred while creating an actor.
    #[error("An error occurred while creating an actor: {0}.")]
    Create(String),
    /// The actor failed while running its start hook.
    #[error("Actor {path} failed to initialize: {reason}")]
    ActorInitialization {
        /// Path of the failed actor.
        path: ActorPath,
        /// Failure reason.
        reason: String,
    },
    /// The actor received a `Kill` message.
    #[error("Kill requested for actor {0}.")]
    ActorKilled(ActorPath),
    /// An actor did not handle the `Terminated` of a watched actor.
    #[error("Monitored actor {0} terminated.")]
    DeathPact(ActorPath),
    /// The actor code panicked.
    #[error("Actor panicked: {0}")]
    Panicked(String),
    /// An ask did not get a reply in time.
    #[error("Ask timed out on {0} after {1} ms.")]
    AskTimeout(ActorPath, u64),
    /// A stash reached its capacity.
    #[error("Stash of {0} is full (capacity {1}).")]
    StashOverflow(ActorPath, usize),
    /// A bounded capacity (other than a stash) was exceeded.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),
    /// No live actor matched a lookup.
    #[error("Actor {0} not found.")]
    NotFound(String),
    /// An actor path could not be parsed.
    #[error("Invalid actor path '{0}'.")]
    InvalidPath(String),
    /// The message did not have the expected type.
    #[error("Unexpected message type {0}.")]
    UnexpectedMessage(String),
    /// An error occurred while stopping an actor.
    #[error("An error occurred while stopping an actor.")]
    Stop,
    /// An error occurred while starting the actor system.
    #[error("An error occurred while starting: {0}")]
    Start(String),
    /// The actor system is terminated.
    #[error("Actor system is terminated.")]
    SystemTerminated,
    /// The actor could not reconstruct its state.
    #[error("Recovery of {persistence_id} failed: {reason}")]
    Recovery {
        /// Persistence id of the failed actor.
        persistence_id: String,
        /// Failure reason.
        reason: String,
    },
    /// A journal write failed.
    #[error("Persist of {persistence_id} failed at {sequence_nr}: {reason}")]
    Persist {
        /// Persistence id of the failed actor.
        persistence_id: String,
        /// Sequence number of the failed event.
        sequence_nr: i64,
        /// Failure reason.
        reason: String,
    },
    /// Store error.
    #[error("Store error: {0}")]
    Store(String),
    /// Error that does not compromise the operation of the system.
    #[error("Error: {0}")]
    Functional(String),
}

/// What the dispatcher does with an error returned by a receive step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Suspend the actor and report the failure to its parent.
    Supervise,
    /// Stop the actor without consulting the supervisor.
    Stop,
}

impl Error {
    /// Policy table mapping an error kind to a lifecycle action.
    pub fn policy(&self) -> FailurePolicy {
        match self {
            Error::Recovery { .. } | Error::Persist { .. } => {
                FailurePolicy::Stop
            }
            _ => FailurePolicy::Supervise,
        }
    }

    /// Returns `true` for failures raised by an explicit `Kill`.
    pub fn is_kill(&self) -> bool {
        matches!(self, Error::ActorKilled(_))
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_policy_table() {
        let path = ActorPath::from("/user/a");
        assert_eq!(
            Error::Functional("boom".to_owned()).policy(),
            FailurePolicy::Supervise
        );
        assert_eq!(
            Error::ActorKilled(path.clone()).policy(),
            FailurePolicy::Supervise
        );
        assert_eq!(
            Error::Recovery {
                persistence_id: "p".to_owned(),
                reason: "x".to_owned()
            }
            .policy(),
            FailurePolicy::Stop
        );
        assert!(Error::ActorKilled(path).is_kill());
    }
}
