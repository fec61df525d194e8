// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Messages
//!
//! User messages travel type-erased as [`AnyMessage`] inside an
//! [`Envelope`]. This module also defines the messages every actor
//! understands without user code (`PoisonPill`, `Kill`, `Identify`,
//! `Terminated`) and the events published on the event stream.
//!

use crate::{ActorRef, Error};

use std::{
    any::{Any, TypeId},
    fmt::{self, Debug, Formatter},
    sync::Arc,
};

/// Marker trait for every type that can be sent to an actor.
pub trait Message: Any + Send + Sync + 'static {}

macro_rules! impl_message {
    ($($t:ty),*) => {
        $(impl Message for $t {})*
    };
}

impl_message!(
    (),
    bool,
    i32,
    i64,
    u32,
    u64,
    usize,
    f64,
    String,
    &'static str
);

impl<T: Message> Message for Vec<T> {}

impl<T: Message> Message for Option<T> {}

/// Type-erased message payload. Cloning is cheap: the payload is shared.
#[derive(Clone)]
pub struct AnyMessage {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl AnyMessage {
    pub fn new<M: Message>(message: M) -> Self {
        Self {
            inner: Arc::new(message),
            type_name: std::any::type_name::<M>(),
        }
    }

    pub fn is<M: Message>(&self) -> bool {
        self.inner.is::<M>()
    }

    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.inner.downcast_ref::<M>()
    }

    /// Owned copy of the payload when it has type `M`.
    pub fn downcast<M: Message + Clone>(&self) -> Option<M> {
        self.downcast_ref::<M>().cloned()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn payload_type_id(&self) -> TypeId {
        Any::type_id(&*self.inner)
    }
}

impl Debug for AnyMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AnyMessage({})", self.type_name)
    }
}

/// A message plus the reference of its sender.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub message: AnyMessage,
    pub sender: Option<ActorRef>,
}

impl Envelope {
    pub fn new(message: AnyMessage, sender: Option<ActorRef>) -> Self {
        Self { message, sender }
    }
}

/// Stops the receiving actor once it is processed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoisonPill;

impl Message for PoisonPill {}

/// Makes the receiving actor fail with [`Error::ActorKilled`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Kill;

impl Message for Kill {}

/// Asks an actor to reply with its [`ActorIdentity`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identify(pub u64);

impl Message for Identify {}

/// Reply to [`Identify`]; `subject` is `None` when there is no live actor.
#[derive(Clone, Debug)]
pub struct ActorIdentity {
    pub message_id: u64,
    pub subject: Option<ActorRef>,
}

impl Message for ActorIdentity {}

/// Delivered to watchers when a watched actor has stopped.
#[derive(Clone, Debug)]
pub struct Terminated {
    pub actor: ActorRef,
    /// `false` when the watched actor never existed.
    pub existence_confirmed: bool,
    pub address_terminated: bool,
}

impl Message for Terminated {}

/// Event published when a message could not be delivered.
#[derive(Clone, Debug)]
pub struct DeadLetter {
    pub message: AnyMessage,
    pub sender: Option<ActorRef>,
    pub recipient: ActorRef,
}

impl Message for DeadLetter {}

/// Event published when an actor did not handle a message.
#[derive(Clone, Debug)]
pub struct UnhandledMessage {
    pub message: AnyMessage,
    pub sender: Option<ActorRef>,
    pub recipient: ActorRef,
}

impl Message for UnhandledMessage {}

/// Generic reply wrapper understood by the ask pattern.
#[derive(Clone, Debug)]
pub enum Status {
    Success(AnyMessage),
    Failure(Error),
}

impl Message for Status {}
