// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Core library for the Hive framework.
//! Re-exports the actor runtime and the event-sourced persistence layer
//! built on it, so applications depend on a single crate.

pub use actor::{
    Actor, ActorContext, ActorIdentity, ActorPath, ActorRef, ActorSelection,
    ActorSystem, ActorSystemSettings, Address, AnyMessage, Behavior,
    Cancelable, Directive, Envelope, Error as ActorError, EventStream, Fsm,
    FsmBuilder, Identify, Kill, MailboxType, Message, PoisonPill, Props,
    Scheduler, Sink, Subscriber, SupervisorStrategy, SystemEvent, SystemRef,
    SystemRunner, Terminated,
};

pub use persistence::{
    AsyncWriteJournal, AtLeastOnceDelivery, AtLeastOnceDeliverySettings,
    Error as PersistenceError, Eventsourced, InMemoryJournal,
    InMemorySnapshotStore, Persistence, PersistenceSettings, PersistentActor,
    PersistentContext, Recovery, RecoveryCompleted, SnapshotOffer,
    SnapshotSelectionCriteria, SnapshotStore,
};
