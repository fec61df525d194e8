// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Hive Actor System
//!
//! An actor runtime for building concurrent and fault-tolerant systems on
//! top of tokio. Actors are isolated units of state that communicate only
//! through asynchronous messages; every actor processes one message at a
//! time and lives inside a supervision tree that decides what happens when
//! it fails.
//!
//! ## Overview
//!
//! In response to a message, an actor can:
//! - Update its private state
//! - Create child actors, which it supervises
//! - Send messages to other actors (including itself)
//! - Replace the behavior used for the next message
//! - Stash messages it is not ready to handle yet
//!
//! ## Core Architecture
//!
//! ### Identity
//!
//! Every actor has an [`ActorPath`] such as `hive://orders/user/cart/item`
//! plus a uid that changes with every incarnation at that path. Actors are
//! only reached through an [`ActorRef`]; a ref whose actor has stopped
//! routes messages to dead letters.
//!
//! ### Actor cell
//!
//! Each actor is driven by a cell running in its own tokio task. The cell
//! owns the mailbox, which has a system queue that is always drained before
//! the user queue, the behavior stack, the stash and the lifecycle:
//!
//! ```text
//! Starting -> Running -> Suspended -> Restarting -> Running
//!                     \-> Terminating -> Terminated
//! ```
//!
//! ### Supervision
//!
//! A failing actor is suspended and reported to its parent. The parent's
//! [`SupervisorStrategy`] maps the error to a [`Directive`]: `Resume`,
//! `Restart`, `Stop` or `Escalate`. One-for-one strategies apply the
//! directive to the failing child only, all-for-one strategies to every
//! sibling. A retry ceiling turns the failure past `max_retries` within the
//! window into `Stop`.
//!
//! ### Death watch
//!
//! Any actor may watch any other; when the watched actor stops the watcher
//! receives [`Terminated`]. Watching an actor that is already gone yields
//! `Terminated` at once.
//!
//! ## Getting Started
//!
//! ```ignore
//! use actor::{
//!     Actor, ActorContext, ActorSystem, ActorSystemSettings, AnyMessage,
//!     Error, Props,
//! };
//! use async_trait::async_trait;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Counter {
//!     value: u64,
//! }
//!
//! #[async_trait]
//! impl Actor for Counter {
//!     async fn receive(
//!         &mut self,
//!         message: &AnyMessage,
//!         ctx: &mut ActorContext<Self>,
//!     ) -> Result<(), Error> {
//!         match message.downcast_ref::<u64>() {
//!             Some(delta) => {
//!                 self.value += delta;
//!                 ctx.reply(self.value);
//!                 Ok(())
//!             }
//!             None => ctx.unhandled(message),
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let (system, mut runner) = ActorSystem::create(
//!         ActorSystemSettings::named("example"),
//!         CancellationToken::new(),
//!     )?;
//!     tokio::spawn(async move { runner.run().await });
//!
//!     let counter = system.actor_of(Props::new(|| Counter { value: 0 }), "counter")?;
//!     let value: u64 = counter.ask(5u64, Duration::from_secs(1)).await?;
//!     assert_eq!(value, 5);
//!
//!     system.terminate();
//!     system.when_terminated().await;
//!     Ok(())
//! }
//! ```
//!
//! ## API Organization
//!
//! - **Actors**: [`Actor`], [`ActorContext`], [`Props`], [`Behavior`], [`Stash`]
//! - **References**: [`ActorRef`], [`ActorPath`], [`Address`], [`ActorSelection`]
//! - **Messages**: [`Message`], [`AnyMessage`], [`Envelope`] and the built-in
//!   messages ([`PoisonPill`], [`Kill`], [`Identify`], [`Terminated`])
//! - **Fault tolerance**: [`SupervisorStrategy`], [`Directive`], [`Error`]
//! - **State machines**: [`Fsm`], [`FsmBuilder`], [`State`]
//! - **System**: [`ActorSystem`], [`SystemRef`], [`SystemRunner`],
//!   [`EventStream`], [`Scheduler`], [`Sink`]
//!

mod actor;
mod actor_ref;
mod ask;
mod behavior;
mod cell;
mod error;
mod event_stream;
mod fsm;
mod mailbox;
mod message;
mod path;
mod props;
mod scheduler;
mod selection;
mod settings;
mod sink;
mod stash;
mod supervision;
mod system;
mod system_message;

//
// Core actor types
//

/// The trait every actor implements, with its lifecycle hooks.
pub use actor::Actor;

/// Context handed to the actor for every message: identity, children,
/// death watch, behaviors, stash and scheduling.
pub use actor::ActorContext;

/// Location-transparent handle used to send messages to an actor.
pub use actor_ref::ActorRef;

pub use behavior::{Behavior, BehaviorStack};

pub use props::Props;

pub use stash::Stash;

//
// Messages
//

pub use message::{
    ActorIdentity, AnyMessage, DeadLetter, Envelope, Identify, Kill, Message,
    PoisonPill, Status, Terminated, UnhandledMessage,
};

pub use system_message::SystemMessage;

pub use mailbox::{EnqueueError, MailboxType};

//
// Addressing
//

/// Hierarchical actor identity.
pub use path::{ActorPath, Address};

pub use selection::{ActorSelection, SelectionPathElement};

//
// Fault tolerance
//

/// Error type of the runtime and of actor callbacks.
pub use error::{Error, FailurePolicy};

pub use supervision::{
    ChildRestartStats, Decider, Directive, StrategyKind, SupervisorStrategy,
};

//
// State machines
//

pub use fsm::{
    CurrentState, Event, Fsm, FsmBuilder, Reason, State, StateData, StateName,
    StateTimeout, StopEvent, SubscribeTransitionCallBack, Transition,
    UnsubscribeTransitionCallBack,
};

//
// System
//

/// Entry point that creates an actor system.
pub use system::{ActorSystem, SystemEvent, SystemRef, SystemRunner};

pub use settings::ActorSystemSettings;

pub use event_stream::EventStream;

pub use scheduler::{Cancelable, Scheduler, TokioScheduler};

/// Pipelines that feed event stream events to a subscriber.
pub use sink::{Sink, Subscriber};
