// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor
//!
//! The `actor` module provides the [`Actor`] trait and the [`ActorContext`]
//! handed to every callback. The `Actor` trait is the main trait that
//! actors must implement; the context exposes identity, children, death
//! watch, behaviors, the stash and the scheduler of the running cell.
//!

use crate::{
    ActorPath, ActorRef, AnyMessage, Envelope, Error, Message, Props,
    behavior::{Behavior, BehaviorStack},
    cell::{CellShared, spawn_actor},
    message::{Terminated, UnhandledMessage},
    scheduler::Cancelable,
    selection::ActorSelection,
    stash::Stash,
    supervision::SupervisorStrategy,
    system::SystemRef,
    system_message::SystemMessage,
};

use async_trait::async_trait;
use tracing::debug;

use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};

/// Actor execution context.
///
/// The context is owned by the cell running the actor and is only touched
/// from that cell's task, so none of its state needs synchronization. It is
/// kept across restarts: the path, uid and mailbox never change, while the
/// behavior stack is cleared every time a new instance is built.
///
/// # Example
///
/// ```ignore
/// #[async_trait]
/// impl Actor for Greeter {
///     async fn receive(
///         &mut self,
///         message: &AnyMessage,
///         ctx: &mut ActorContext<Self>,
///     ) -> Result<(), Error> {
///         if let Some(name) = message.downcast_ref::<String>() {
///             ctx.reply(format!("Hello {}", name));
///             return Ok(());
///         }
///         ctx.unhandled(message)
///     }
/// }
/// ```
pub struct ActorContext<A: Actor> {
    myself: ActorRef,
    shared: Arc<CellShared>,
    system: SystemRef,
    current: Option<Envelope>,
    pub(crate) behaviors: BehaviorStack<A>,
    pub(crate) stash: Stash,
    unstashed: Vec<Envelope>,
    pub(crate) terminated_queue: HashSet<ActorRef>,
}

impl<A: Actor> ActorContext<A> {
    pub(crate) fn new(
        myself: ActorRef,
        shared: Arc<CellShared>,
        system: SystemRef,
        stash_capacity: Option<usize>,
    ) -> Self {
        Self {
            myself,
            shared,
            system,
            current: None,
            behaviors: BehaviorStack::new(),
            stash: Stash::new(stash_capacity),
            unstashed: Vec::new(),
            terminated_queue: HashSet::new(),
        }
    }

    /// Reference of the running actor.
    pub fn myself(&self) -> &ActorRef {
        &self.myself
    }

    /// Path of the running actor, uid included.
    pub fn path(&self) -> &ActorPath {
        self.myself.path()
    }

    /// Supervisor of the running actor. Only the root guardian has none.
    pub fn parent(&self) -> Option<&ActorRef> {
        self.shared.parent.as_ref()
    }

    pub fn system(&self) -> &SystemRef {
        &self.system
    }

    /// Sender of the message being processed.
    pub fn sender(&self) -> Option<&ActorRef> {
        self.current.as_ref().and_then(|envelope| envelope.sender.as_ref())
    }

    /// The message being processed.
    pub fn current_message(&self) -> Option<&AnyMessage> {
        self.current.as_ref().map(|envelope| &envelope.message)
    }

    /// Envelope being processed, sender included.
    pub fn current_envelope(&self) -> Option<&Envelope> {
        self.current.as_ref()
    }

    pub(crate) fn set_current(&mut self, envelope: Option<Envelope>) {
        self.current = envelope;
    }

    /// Sends `message` back to the sender of the current message. Without a
    /// sender the reply goes to dead letters.
    pub fn reply<M: Message>(&self, message: M) {
        match self.sender() {
            Some(sender) => sender.tell(message, Some(&self.myself)),
            None => self
                .system
                .dead_letters()
                .tell(message, Some(&self.myself)),
        }
    }

    /// Forwards the current message to `target`, keeping the original
    /// sender.
    pub fn forward(&self, target: &ActorRef) {
        if let Some(envelope) = &self.current {
            target.tell_any(envelope.message.clone(), envelope.sender.as_ref());
        }
    }

    /// Creates a child actor named `name`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidName`] for a malformed name, [`Error::Exists`] when
    /// the name is taken (or reserved by a concurrent creation) and
    /// [`Error::Create`] when the factory of `props` fails.
    pub fn actor_of<C: Actor>(
        &self,
        props: Props<C>,
        name: &str,
    ) -> Result<ActorRef, Error> {
        ActorPath::validate_name(name)?;
        spawn_actor(&self.system, Some((&self.myself, &self.shared)), name, props)
    }

    /// Live child by name.
    pub fn child(&self, name: &str) -> Option<ActorRef> {
        self.shared.child(name)
    }

    /// Every child that has not finished stopping yet.
    pub fn children(&self) -> Vec<ActorRef> {
        self.shared.children_refs()
    }

    /// Stops `actor`. Stopping a child marks it so the cell can wait for it
    /// before restarting or stopping itself.
    pub fn stop(&self, actor: &ActorRef) {
        self.shared.mark_stopping(actor);
        actor.send_system(SystemMessage::Terminate);
    }

    /// Stops the running actor once the current message is done.
    pub fn stop_self(&self) {
        self.myself.send_system(SystemMessage::Terminate);
    }

    pub(crate) fn stop_all_children(&self) {
        for child in self.shared.children_refs() {
            self.stop(&child);
        }
    }

    /// Monitors `actor`; a [`Terminated`] message arrives once it stops.
    /// Watching an actor that is already gone yields `Terminated` at once.
    pub fn watch(&mut self, actor: &ActorRef) -> ActorRef {
        if *actor != self.myself && self.shared.watching.insert(actor.clone())
        {
            actor.send_system(SystemMessage::Watch {
                watchee: actor.clone(),
                watcher: self.myself.clone(),
            });
        }
        actor.clone()
    }

    /// Stops monitoring `actor`. A pending `Terminated` for it is dropped.
    pub fn unwatch(&mut self, actor: &ActorRef) -> ActorRef {
        if self.shared.watching.remove(actor).is_some() {
            actor.send_system(SystemMessage::Unwatch {
                watchee: actor.clone(),
                watcher: self.myself.clone(),
            });
        }
        self.terminated_queue.remove(actor);
        actor.clone()
    }

    pub fn is_watching(&self, actor: &ActorRef) -> bool {
        self.shared.watching.contains(actor)
    }

    /// Replaces the current behavior.
    pub fn become_<B: Behavior<A>>(&mut self, behavior: B) {
        self.behaviors.become_(Arc::new(behavior), true);
    }

    /// Pushes a behavior, keeping the current one below it.
    pub fn become_stacked<B: Behavior<A>>(&mut self, behavior: B) {
        self.behaviors.become_(Arc::new(behavior), false);
    }

    /// Returns to the previous behavior.
    pub fn unbecome(&mut self) {
        self.behaviors.unbecome();
    }

    pub fn behavior_depth(&self) -> usize {
        self.behaviors.len()
    }

    /// Sets the current message aside.
    ///
    /// # Errors
    ///
    /// [`Error::StashOverflow`] when the stash is full.
    pub fn stash(&mut self) -> Result<(), Error> {
        match self.current.clone() {
            Some(envelope) => self.stash.push(envelope, self.myself.path()),
            None => Ok(()),
        }
    }

    /// Returns the oldest stashed message to the front of the mailbox.
    pub fn unstash(&mut self) {
        if let Some(envelope) = self.stash.pop_front() {
            self.unstashed.push(envelope);
        }
    }

    /// Returns every stashed message to the front of the mailbox, oldest
    /// first.
    pub fn unstash_all(&mut self) {
        let envelopes = self.stash.drain_all();
        self.unstashed.extend(envelopes);
    }

    /// Returns envelopes kept outside the stash (for instance by a layer
    /// built on top of the actor) to the front of the mailbox, in order.
    pub fn prepend_to_mailbox<I>(&mut self, envelopes: I)
    where
        I: IntoIterator<Item = Envelope>,
    {
        self.unstashed.extend(envelopes);
    }

    pub fn stash_len(&self) -> usize {
        self.stash.len()
    }

    pub(crate) fn take_unstashed(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.unstashed)
    }

    /// Selection relative to this actor, or absolute when `path` starts
    /// with `/` or carries an address.
    pub fn actor_selection(&self, path: &str) -> ActorSelection {
        if path.starts_with('/') || path.contains("://") {
            self.system.actor_selection(path)
        } else {
            ActorSelection::new(self.myself.clone(), path)
        }
    }

    /// Sends `message` to `target` after `delay`, with this actor as
    /// sender.
    pub fn schedule_once<M: Message>(
        &self,
        delay: Duration,
        target: &ActorRef,
        message: M,
    ) -> Cancelable {
        self.system.scheduler().schedule_tell_once(
            delay,
            target.clone(),
            AnyMessage::new(message),
            Some(self.myself.clone()),
        )
    }

    /// Sends `message` to `target` every `interval`.
    pub fn schedule_repeatedly<M: Message>(
        &self,
        initial_delay: Duration,
        interval: Duration,
        target: &ActorRef,
        message: M,
    ) -> Cancelable {
        self.system.scheduler().schedule_tell_repeatedly(
            initial_delay,
            interval,
            target.clone(),
            AnyMessage::new(message),
            Some(self.myself.clone()),
        )
    }

    /// Publishes an event on the event stream of the system.
    pub fn publish<E: Message>(&self, event: E) {
        self.system.event_stream().publish(event);
    }

    /// Default handling of a message nobody matched.
    ///
    /// A `Terminated` of a watched actor that is not handled is a death pact
    /// and fails the actor; anything else is published as
    /// [`UnhandledMessage`].
    pub fn unhandled(&self, message: &AnyMessage) -> Result<(), Error> {
        if let Some(terminated) = message.downcast_ref::<Terminated>() {
            return Err(Error::DeathPact(terminated.actor.path().clone()));
        }
        debug!("Unhandled message {:?} in {}.", message, self.path());
        self.system.event_stream().publish(UnhandledMessage {
            message: message.clone(),
            sender: self.sender().cloned(),
            recipient: self.myself.clone(),
        });
        Ok(())
    }

    /// Runs `future` outside the actor and delivers its output to the actor
    /// as a regular message.
    pub fn pipe_to_self<F, M>(&self, future: F)
    where
        F: Future<Output = M> + Send + 'static,
        M: Message,
    {
        let myself = self.myself.clone();
        tokio::spawn(async move {
            let output = future.await;
            let target = myself.clone();
            myself.send_system(SystemMessage::CompleteFuture(Box::new(
                move || target.tell(output, None),
            )));
        });
    }
}

/// The `Actor` trait is the main trait that actors must implement.
///
/// Messages arrive type erased; an actor downcasts the payloads it knows and
/// hands the rest to [`ActorContext::unhandled`]. Any error returned from a
/// callback (or any panic) suspends the actor and is reported to its parent,
/// which answers with a [`Directive`](crate::Directive).
///
/// # Lifecycle
///
/// `pre_start` runs once the cell starts. After a failure the supervisor
/// may restart the actor: `pre_restart` runs on the failed instance, a new
/// instance is built from the props and `post_restart` runs on it. When the
/// actor stops, children are stopped first and `post_stop` runs last.
/// Errors returned by `pre_restart`, `post_restart` and `post_stop` are
/// logged and ignored.
///
/// ```ignore
/// struct Counter {
///     value: u64,
/// }
///
/// #[async_trait]
/// impl Actor for Counter {
///     async fn receive(
///         &mut self,
///         message: &AnyMessage,
///         ctx: &mut ActorContext<Self>,
///     ) -> Result<(), Error> {
///         if let Some(delta) = message.downcast_ref::<u64>() {
///             self.value += delta;
///             ctx.reply(self.value);
///             Ok(())
///         } else {
///             ctx.unhandled(message)
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Actor: Send + Sized + 'static {
    /// Handles one message with the top-level behavior.
    async fn receive(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error>;

    /// Called when the actor starts. A failure here is reported as
    /// [`Error::ActorInitialization`].
    async fn pre_start(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Called on the failed instance before it is replaced. The default
    /// stops all children and then runs `post_stop`.
    async fn pre_restart(
        &mut self,
        _cause: &Error,
        _message: Option<&AnyMessage>,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        ctx.stop_all_children();
        self.post_stop(ctx).await
    }

    /// Called on the fresh instance after a restart. The default runs
    /// `pre_start`.
    async fn post_restart(
        &mut self,
        _cause: &Error,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        self.pre_start(ctx).await
    }

    /// Called once the actor and all its children have stopped.
    async fn post_stop(
        &mut self,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Strategy applied to failing children.
    fn supervisor_strategy(&self) -> SupervisorStrategy {
        SupervisorStrategy::default()
    }
}
