// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # System messages
//!
//! Messages on the priority channel of a mailbox. They drive supervision,
//! lifecycle and death watch, are never dropped by a bounded mailbox and are
//! always processed before pending user messages.
//!

use crate::{ActorRef, Error};

use std::fmt::{self, Debug, Formatter};

/// Callback run inside the execution context of the receiving actor.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Priority messages exchanged between cells.
pub enum SystemMessage {
    /// Run the start hook of a freshly created cell.
    Create,
    /// Run a deferred completion inside the actor's context.
    CompleteFuture(CompletionCallback),
    /// A child failed while processing a message.
    Failed {
        child: ActorRef,
        cause: Error,
        uid: u64,
    },
    /// A watched actor (or a child) has stopped.
    DeathWatchNotification {
        actor: ActorRef,
        existence_confirmed: bool,
        address_terminated: bool,
    },
    /// `watcher` starts monitoring `watchee`.
    Watch { watchee: ActorRef, watcher: ActorRef },
    /// `watcher` stops monitoring `watchee`.
    Unwatch { watchee: ActorRef, watcher: ActorRef },
    /// Restart the actor instance after a failure.
    Recreate { cause: Error },
    /// Stop processing user messages.
    Suspend,
    /// Resume processing user messages.
    Resume { cause: Option<Error> },
    /// Stop the actor and its subtree.
    Terminate,
    /// A child registers with its parent once started.
    Supervise { child: ActorRef },
}

impl SystemMessage {
    /// Name of the variant, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SystemMessage::Create => "Create",
            SystemMessage::CompleteFuture(_) => "CompleteFuture",
            SystemMessage::Failed { .. } => "Failed",
            SystemMessage::DeathWatchNotification { .. } => {
                "DeathWatchNotification"
            }
            SystemMessage::Watch { .. } => "Watch",
            SystemMessage::Unwatch { .. } => "Unwatch",
            SystemMessage::Recreate { .. } => "Recreate",
            SystemMessage::Suspend => "Suspend",
            SystemMessage::Resume { .. } => "Resume",
            SystemMessage::Terminate => "Terminate",
            SystemMessage::Supervise { .. } => "Supervise",
        }
    }
}

impl Debug for SystemMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SystemMessage::Failed { child, cause, .. } => {
                write!(f, "Failed({:?}, {})", child, cause)
            }
            SystemMessage::DeathWatchNotification { actor, .. } => {
                write!(f, "DeathWatchNotification({:?})", actor)
            }
            SystemMessage::Watch { watchee, watcher } => {
                write!(f, "Watch({:?} <- {:?})", watchee, watcher)
            }
            SystemMessage::Unwatch { watchee, watcher } => {
                write!(f, "Unwatch({:?} <- {:?})", watchee, watcher)
            }
            SystemMessage::Recreate { cause } => {
                write!(f, "Recreate({})", cause)
            }
            SystemMessage::Supervise { child } => {
                write!(f, "Supervise({:?})", child)
            }
            other => write!(f, "{}", other.kind()),
        }
    }
}
