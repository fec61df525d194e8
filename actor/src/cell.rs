// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor cell
//!
//! The cell is the runtime engine of one actor. It owns the actor instance,
//! the context and the receiving side of the mailbox, and runs in its own
//! tokio task, so the actor is never entered concurrently.
//!
//! Lifecycle: `Starting -> Running -> {Suspended} -> Restarting -> Running`,
//! or `Terminating -> Terminated`. System messages are handled before any
//! user message; user messages are only taken while the cell is running.
//!
//! The state shared with other tasks ([`CellShared`]) is limited to the
//! child map and the watcher sets, all lock-free concurrent collections.
//!

use crate::{
    Actor, ActorContext, ActorPath, ActorRef, AnyMessage, Envelope, Error,
    FailurePolicy, Props,
    actor_ref::LocalActorRef,
    mailbox::{MailboxItem, MailboxReceiver, mailbox},
    message::{ActorIdentity, DeadLetter, Identify, Kill, PoisonPill, Terminated},
    props::panic_message,
    selection::{self, ActorSelectionMessage},
    supervision::{ChildRestartStats, Directive, StrategyKind},
    system::SystemRef,
    system_message::SystemMessage,
};

use dashmap::{DashMap, DashSet, mapref::entry::Entry};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use std::{
    collections::HashMap,
    future::Future,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{fence, AtomicBool, Ordering},
    },
};

/// Entry of the child map.
#[derive(Clone, Debug)]
pub(crate) enum ChildSlot {
    /// Name taken by a creation in flight.
    Reserved,
    /// Running child.
    Live(ActorRef),
    /// Child asked to stop, not yet terminated.
    Stopping(ActorRef),
}

impl ChildSlot {
    fn actor(&self) -> Option<&ActorRef> {
        match self {
            ChildSlot::Reserved => None,
            ChildSlot::Live(actor) | ChildSlot::Stopping(actor) => Some(actor),
        }
    }
}

/// Cell state reachable from other tasks.
pub(crate) struct CellShared {
    pub(crate) parent: Option<ActorRef>,
    pub(crate) children: DashMap<String, ChildSlot>,
    /// Non-cell children such as `/temp`, only used for lookups.
    pub(crate) virtual_children: DashMap<String, ActorRef>,
    /// Actors watching this one.
    pub(crate) watchers: DashSet<ActorRef>,
    /// Actors watched by this one.
    pub(crate) watching: DashSet<ActorRef>,
    terminating: AtomicBool,
    stopped: CancellationToken,
}

impl CellShared {
    pub(crate) fn new(parent: Option<ActorRef>) -> Self {
        Self {
            parent,
            children: DashMap::new(),
            virtual_children: DashMap::new(),
            watchers: DashSet::new(),
            watching: DashSet::new(),
            terminating: AtomicBool::new(false),
            stopped: CancellationToken::new(),
        }
    }

    /// Takes `name` for a new child. Fails when the name is live, stopping
    /// or reserved by a concurrent creation.
    pub(crate) fn reserve(&self, name: &str, path: &ActorPath) -> Result<(), Error> {
        if self.terminating.load(Ordering::Acquire) {
            return Err(Error::Create(format!(
                "parent of {} is terminating",
                path
            )));
        }
        match self.children.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(Error::Exists(path.clone())),
            Entry::Vacant(entry) => {
                entry.insert(ChildSlot::Reserved);
                Ok(())
            }
        }
    }

    /// Replaces the reservation with the running child. Returns `false`
    /// when the parent started terminating meanwhile; the child is then
    /// recorded as stopping and must be told to stop by the caller.
    pub(crate) fn commit(&self, name: &str, child: ActorRef) -> bool {
        self.children
            .insert(name.to_owned(), ChildSlot::Live(child.clone()));
        fence(Ordering::SeqCst);
        if self.terminating.load(Ordering::SeqCst) {
            self.mark_stopping(&child);
            false
        } else {
            true
        }
    }

    /// Frees a reservation after a failed creation.
    pub(crate) fn release(&self, name: &str) {
        self.children
            .remove_if(name, |_, slot| matches!(slot, ChildSlot::Reserved));
    }

    /// Child (running or stopping) or virtual child named by `element`,
    /// which may carry a `#uid` suffix.
    pub(crate) fn lookup_child(&self, element: &str) -> Option<ActorRef> {
        let (name, uid) = ActorPath::split_name_and_uid(element);
        let found = self
            .children
            .get(name)
            .and_then(|slot| slot.actor().cloned())
            .or_else(|| {
                self.virtual_children
                    .get(name)
                    .map(|entry| entry.value().clone())
            })?;
        if uid != 0 && found.path().uid() != uid {
            None
        } else {
            Some(found)
        }
    }

    /// Every name that can be matched by a selection pattern.
    pub(crate) fn lookup_names(&self) -> Vec<(String, ActorRef)> {
        let mut names: Vec<(String, ActorRef)> = self
            .children
            .iter()
            .filter_map(|entry| {
                entry
                    .value()
                    .actor()
                    .map(|actor| (entry.key().clone(), actor.clone()))
            })
            .collect();
        names.extend(
            self.virtual_children
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone())),
        );
        names
    }

    /// Running child by name.
    pub(crate) fn child(&self, name: &str) -> Option<ActorRef> {
        match self.children.get(name)?.value() {
            ChildSlot::Live(actor) => Some(actor.clone()),
            _ => None,
        }
    }

    pub(crate) fn children_refs(&self) -> Vec<ActorRef> {
        self.children
            .iter()
            .filter_map(|entry| entry.value().actor().cloned())
            .collect()
    }

    fn live_children(&self) -> Vec<ActorRef> {
        self.children
            .iter()
            .filter_map(|entry| match entry.value() {
                ChildSlot::Live(actor) => Some(actor.clone()),
                _ => None,
            })
            .collect()
    }

    /// Marks a running child as stopping. Returns `false` when `child` is
    /// not a running child of this cell.
    pub(crate) fn mark_stopping(&self, child: &ActorRef) -> bool {
        let Some(mut slot) = self.children.get_mut(child.path().name()) else {
            return false;
        };
        let actor = match slot.value() {
            ChildSlot::Live(actor) if actor == child => actor.clone(),
            _ => return false,
        };
        *slot = ChildSlot::Stopping(actor);
        true
    }

    /// Removes `child` from the map. Returns `false` when it was not a
    /// child (or an older incarnation of a reused name).
    pub(crate) fn remove_child(&self, child: &ActorRef) -> bool {
        self.children
            .remove_if(child.path().name(), |_, slot| {
                slot.actor().is_some_and(|actor| actor == child)
            })
            .is_some()
    }

    fn has_children(&self) -> bool {
        self.children
            .iter()
            .any(|entry| entry.value().actor().is_some())
    }

    fn has_stopping_children(&self) -> bool {
        self.children
            .iter()
            .any(|entry| matches!(entry.value(), ChildSlot::Stopping(_)))
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Resolves once the cell has fully terminated.
    pub(crate) async fn stopped(&self) {
        self.stopped.cancelled().await;
    }
}

/// Creates a cell under `parent` (or the root cell when `parent` is
/// `None`) and spawns its task.
pub(crate) fn spawn_actor<A: Actor>(
    system: &SystemRef,
    parent: Option<(&ActorRef, &Arc<CellShared>)>,
    name: &str,
    props: Props<A>,
) -> Result<ActorRef, Error> {
    let path = match parent {
        Some((parent, _)) => parent.path() / name,
        None => system.root_path(),
    };
    if let Some((_, parent_shared)) = parent {
        parent_shared.reserve(name, &path)?;
    }
    let instance = match props.produce() {
        Ok(instance) => instance,
        Err(error) => {
            if let Some((_, parent_shared)) = parent {
                parent_shared.release(name);
            }
            error!("Actor {} could not be created: {}", path, error);
            return Err(error);
        }
    };

    let mailbox_type = if props.mailbox() == &Default::default() {
        system.settings().default_mailbox.clone()
    } else {
        props.mailbox().clone()
    };
    let (sender, receiver) = mailbox(&mailbox_type);
    let shared = Arc::new(CellShared::new(
        parent.map(|(parent, _)| parent.clone()),
    ));
    let path = path.with_uid(system.new_uid());
    let myself = ActorRef::from_backend(Arc::new(LocalActorRef::new(
        path,
        sender,
        shared.clone(),
        system.event_stream().clone(),
        system.downgrade(),
    )));
    let orphaned = match parent {
        Some((_, parent_shared)) => !parent_shared.commit(name, myself.clone()),
        None => false,
    };

    let stash_capacity = props
        .stash_capacity()
        .or(system.settings().default_stash_capacity);
    let ctx =
        ActorContext::new(myself.clone(), shared.clone(), system.clone(), stash_capacity);
    let cell = ActorCell {
        actor: Some(instance),
        props,
        ctx,
        shared,
        mailbox: receiver,
        suspended: false,
        failed: false,
        terminating: false,
        finished: false,
        failed_message: None,
        pending_restart: None,
        child_stats: HashMap::new(),
    };
    myself.send_system(SystemMessage::Create);
    if orphaned {
        debug!("Parent of {} is terminating, stopping it.", myself.path());
        myself.send_system(SystemMessage::Terminate);
    }
    tokio::spawn(cell.run());
    debug!("Actor {:?} created.", myself);
    Ok(myself)
}

/// Awaits a callback, turning a panic into [`Error::Panicked`].
async fn guarded<F>(future: F) -> Result<(), Error>
where
    F: Future<Output = Result<(), Error>>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(Error::Panicked(panic_message(panic.as_ref()))))
}

pub(crate) struct ActorCell<A: Actor> {
    actor: Option<A>,
    props: Props<A>,
    ctx: ActorContext<A>,
    shared: Arc<CellShared>,
    mailbox: MailboxReceiver,
    suspended: bool,
    failed: bool,
    terminating: bool,
    finished: bool,
    failed_message: Option<AnyMessage>,
    pending_restart: Option<Error>,
    child_stats: HashMap<String, ChildRestartStats>,
}

impl<A: Actor> ActorCell<A> {
    fn myself(&self) -> ActorRef {
        self.ctx.myself().clone()
    }

    fn accepts_user(&self) -> bool {
        !self.suspended && !self.terminating
    }

    async fn run(mut self) {
        while !self.finished {
            let Some(item) = self.mailbox.next(self.accepts_user()).await else {
                break;
            };
            match item {
                MailboxItem::System(message) => self.system_invoke(message).await,
                MailboxItem::User(envelope) => self.invoke(envelope).await,
            }
            let unstashed = self.ctx.take_unstashed();
            if !unstashed.is_empty() {
                self.mailbox.prepend(unstashed);
            }
        }
        debug!("Actor {} task finished.", self.ctx.path());
    }

    async fn system_invoke(&mut self, message: SystemMessage) {
        match message {
            SystemMessage::Create => self.create().await,
            SystemMessage::CompleteFuture(callback) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(callback)) {
                    error!(
                        "Completion callback in {} panicked: {}",
                        self.ctx.path(),
                        panic_message(panic.as_ref())
                    );
                }
            }
            SystemMessage::Failed { child, cause, uid } => {
                self.handle_failed(child, cause, uid).await;
            }
            SystemMessage::DeathWatchNotification {
                actor,
                existence_confirmed,
                address_terminated,
            } => {
                self.watched_actor_terminated(
                    actor,
                    existence_confirmed,
                    address_terminated,
                )
                .await;
            }
            SystemMessage::Watch { watchee, watcher } => {
                let myself = self.myself();
                if watchee == myself && watcher != myself {
                    self.shared.watchers.insert(watcher);
                } else {
                    warn!("{} ignores watch of {:?} by {:?}.", myself, watchee, watcher);
                }
            }
            SystemMessage::Unwatch { watchee, watcher } => {
                if watchee == self.myself() {
                    self.shared.watchers.remove(&watcher);
                }
            }
            SystemMessage::Recreate { cause } => self.recreate(cause).await,
            SystemMessage::Suspend => {
                self.suspended = true;
                for child in self.shared.children_refs() {
                    child.send_system(SystemMessage::Suspend);
                }
            }
            SystemMessage::Resume { cause } => {
                if self.terminating {
                    return;
                }
                if let Some(cause) = cause {
                    debug!("Actor {} resumed after: {}", self.ctx.path(), cause);
                }
                self.suspended = false;
                self.failed = false;
                self.failed_message = None;
                for child in self.shared.children_refs() {
                    child.send_system(SystemMessage::Resume { cause: None });
                }
            }
            SystemMessage::Terminate => self.terminate().await,
            SystemMessage::Supervise { child } => {
                let name = child.path().name().to_owned();
                if self.shared.lookup_child(&name).is_none()
                    && !child.is_terminated()
                {
                    self.shared.commit(&name, child.clone());
                }
                debug!("Actor {} supervises {:?}.", self.ctx.path(), child);
            }
        }
    }

    async fn create(&mut self) {
        let Some(actor) = self.actor.as_mut() else {
            return;
        };
        debug!("Starting actor {}.", self.ctx.path());
        match guarded(actor.pre_start(&mut self.ctx)).await {
            Ok(()) => {
                debug!("Actor {} started.", self.ctx.path());
                if let Some(parent) = self.shared.parent.clone() {
                    parent.send_system(SystemMessage::Supervise {
                        child: self.myself(),
                    });
                }
            }
            Err(error) => {
                let cause = Error::ActorInitialization {
                    path: self.ctx.path().clone(),
                    reason: error.to_string(),
                };
                self.handle_invoke_failure(cause, None).await;
            }
        }
    }

    async fn invoke(&mut self, envelope: Envelope) {
        self.ctx.set_current(Some(envelope.clone()));
        let result = self.auto_receive(&envelope).await;
        self.ctx.set_current(None);
        if let Err(cause) = result {
            self.handle_invoke_failure(cause, Some(envelope.message)).await;
        }
    }

    /// Messages every actor understands, then the user behavior.
    async fn auto_receive(&mut self, envelope: &Envelope) -> Result<(), Error> {
        let message = &envelope.message;
        if let Some(terminated) = message.downcast_ref::<Terminated>() {
            if self.ctx.terminated_queue.remove(&terminated.actor) {
                return self.dispatch(message).await;
            }
            debug!("Dropping stale {:?} in {}.", terminated, self.ctx.path());
            return Ok(());
        }
        if message.is::<Kill>() {
            return Err(Error::ActorKilled(self.ctx.path().clone()));
        }
        if message.is::<PoisonPill>() {
            self.ctx.stop_self();
            return Ok(());
        }
        if let Some(selection) = message.downcast_ref::<ActorSelectionMessage>() {
            selection::deliver(
                &self.myself(),
                &self.shared,
                selection,
                envelope.sender.clone(),
            );
            return Ok(());
        }
        if let Some(Identify(message_id)) = message.downcast_ref::<Identify>() {
            if let Some(sender) = &envelope.sender {
                sender.tell(
                    ActorIdentity {
                        message_id: *message_id,
                        subject: Some(self.myself()),
                    },
                    Some(self.ctx.myself()),
                );
            }
            return Ok(());
        }
        self.dispatch(message).await
    }

    /// Runs the top behavior, or `Actor::receive` when the stack is empty.
    async fn dispatch(&mut self, message: &AnyMessage) -> Result<(), Error> {
        let Some(actor) = self.actor.as_mut() else {
            return Ok(());
        };
        let ctx = &mut self.ctx;
        match ctx.behaviors.current() {
            Some(behavior) => guarded(behavior.receive(actor, message, ctx)).await,
            None => guarded(actor.receive(message, ctx)).await,
        }
    }

    /// Suspends the actor and hands the failure to the supervisor.
    async fn handle_invoke_failure(
        &mut self,
        cause: Error,
        message: Option<AnyMessage>,
    ) {
        if self.terminating {
            debug!("Ignoring failure of terminating {}: {}", self.ctx.path(), cause);
            return;
        }
        if cause.policy() == FailurePolicy::Stop {
            error!("Actor {} stopped: {}", self.ctx.path(), cause);
            self.terminate().await;
            return;
        }
        if self.failed {
            debug!("Actor {} already failed: {}", self.ctx.path(), cause);
            return;
        }
        self.failed = true;
        self.suspended = true;
        self.failed_message = message;
        for child in self.shared.children_refs() {
            child.send_system(SystemMessage::Suspend);
        }
        match self.shared.parent.clone() {
            Some(parent) => {
                debug!("Actor {} failed: {}", self.ctx.path(), cause);
                parent.send_system(SystemMessage::Failed {
                    child: self.myself(),
                    uid: self.ctx.path().uid(),
                    cause,
                });
            }
            None => {
                error!(
                    "Root actor {} failed, stopping it: {}",
                    self.ctx.path(),
                    cause
                );
                self.terminate().await;
            }
        }
    }

    async fn handle_failed(&mut self, child: ActorRef, cause: Error, uid: u64) {
        if self.terminating {
            return;
        }
        let name = child.path().name().to_owned();
        match self.shared.lookup_child(&name) {
            Some(current) if current.path().uid() == uid => {}
            _ => {
                debug!("Dropping failure of former child {:?}.", child);
                return;
            }
        }
        let strategy = match self.props.supervisor_strategy() {
            Some(strategy) => strategy.clone(),
            None => match &self.actor {
                Some(actor) => actor.supervisor_strategy(),
                None => Default::default(),
            },
        };
        let stats = self.child_stats.entry(name).or_default();
        let directive = strategy.handle(&child, &cause, stats);
        let targets = match strategy.kind() {
            StrategyKind::OneForOne => vec![child.clone()],
            StrategyKind::AllForOne => self.shared.live_children(),
        };
        match directive {
            Directive::Resume => {
                child.send_system(SystemMessage::Resume { cause: Some(cause) });
            }
            Directive::Restart => {
                for target in targets {
                    if target != child {
                        target.send_system(SystemMessage::Suspend);
                    }
                    target.send_system(SystemMessage::Recreate {
                        cause: cause.clone(),
                    });
                }
            }
            Directive::Stop => {
                if !targets.contains(&child) {
                    self.ctx.stop(&child);
                }
                for target in targets {
                    self.ctx.stop(&target);
                }
            }
            Directive::Escalate => {
                debug!("Actor {} escalates failure of {:?}.", self.ctx.path(), child);
                let message = self.failed_message.clone();
                self.handle_invoke_failure(cause, message).await;
            }
        }
    }

    async fn watched_actor_terminated(
        &mut self,
        actor: ActorRef,
        existence_confirmed: bool,
        address_terminated: bool,
    ) {
        if self.shared.watching.remove(&actor).is_some() && !self.terminating {
            self.ctx.terminated_queue.insert(actor.clone());
            self.ctx.myself().tell(
                Terminated {
                    actor: actor.clone(),
                    existence_confirmed,
                    address_terminated,
                },
                Some(&actor),
            );
        }
        if self.shared.remove_child(&actor) {
            self.child_stats.remove(actor.path().name());
            debug!("Child {:?} of {} terminated.", actor, self.ctx.path());
            if self.terminating {
                if !self.shared.has_children() {
                    self.finish_terminate().await;
                }
            } else if !self.shared.has_stopping_children() {
                if let Some(cause) = self.pending_restart.take() {
                    self.finish_recreate(cause).await;
                }
            }
        }
    }

    /// Restart, first half: the failed instance says goodbye.
    async fn recreate(&mut self, cause: Error) {
        if self.terminating {
            return;
        }
        if let Some(actor) = self.actor.as_mut() {
            let message = self.failed_message.clone();
            if let Err(error) =
                guarded(actor.pre_restart(&cause, message.as_ref(), &mut self.ctx))
                    .await
            {
                error!("pre_restart of {} failed: {}", self.ctx.path(), error);
            }
        }
        let mut returned = self.ctx.take_unstashed();
        returned.extend(self.ctx.stash.drain_all());
        if !returned.is_empty() {
            self.mailbox.prepend(returned);
        }
        self.suspended = true;
        if self.shared.has_stopping_children() {
            self.pending_restart = Some(cause);
        } else {
            self.finish_recreate(cause).await;
        }
    }

    /// Restart, second half: a fresh instance on the same cell.
    async fn finish_recreate(&mut self, cause: Error) {
        self.pending_restart = None;
        self.actor = None;
        self.ctx.behaviors.clear();
        self.failed = false;
        self.failed_message = None;
        let mut actor = match self.props.produce() {
            Ok(actor) => actor,
            Err(error) => {
                let cause = Error::ActorInitialization {
                    path: self.ctx.path().clone(),
                    reason: error.to_string(),
                };
                self.handle_invoke_failure(cause, None).await;
                return;
            }
        };
        if let Err(error) = guarded(actor.post_restart(&cause, &mut self.ctx)).await {
            error!("post_restart of {} failed: {}", self.ctx.path(), error);
        }
        self.actor = Some(actor);
        self.suspended = false;
        for child in self.shared.live_children() {
            child.send_system(SystemMessage::Recreate {
                cause: cause.clone(),
            });
        }
        debug!("Actor {} restarted.", self.ctx.path());
    }

    /// Termination, first half: stop watching and stop the children.
    async fn terminate(&mut self) {
        if self.terminating {
            return;
        }
        self.terminating = true;
        self.suspended = true;
        self.shared.terminating.store(true, Ordering::SeqCst);
        // Pairs with the fence in `CellShared::commit`: either the creator
        // sees the flag or the children scan below sees the new child.
        fence(Ordering::SeqCst);
        debug!("Stopping actor {}.", self.ctx.path());

        let myself = self.myself();
        let watching: Vec<ActorRef> =
            self.shared.watching.iter().map(|entry| entry.key().clone()).collect();
        self.shared.watching.clear();
        for watchee in watching {
            watchee.send_system(SystemMessage::Unwatch {
                watchee: watchee.clone(),
                watcher: myself.clone(),
            });
        }
        self.ctx.terminated_queue.clear();
        self.ctx.system().event_stream().unsubscribe_all(&myself);

        self.ctx.stop_all_children();
        if !self.shared.has_children() {
            self.finish_terminate().await;
        }
    }

    /// Termination, second half: every child is gone.
    async fn finish_terminate(&mut self) {
        if let Some(mut actor) = self.actor.take() {
            if let Err(error) = guarded(actor.post_stop(&mut self.ctx)).await {
                error!("post_stop of {} failed: {}", self.ctx.path(), error);
            }
        }
        let myself = self.myself();
        let parent = self.shared.parent.clone();
        if let Some(parent) = &parent {
            parent.send_system(SystemMessage::DeathWatchNotification {
                actor: myself.clone(),
                existence_confirmed: true,
                address_terminated: false,
            });
        }
        let watchers: Vec<ActorRef> =
            self.shared.watchers.iter().map(|entry| entry.key().clone()).collect();
        self.shared.watchers.clear();
        for watcher in watchers {
            if Some(&watcher) != parent.as_ref() {
                watcher.send_system(SystemMessage::DeathWatchNotification {
                    actor: myself.clone(),
                    existence_confirmed: true,
                    address_terminated: false,
                });
            }
        }

        let (system_messages, mut envelopes) = self.mailbox.close();
        envelopes.extend(self.ctx.stash.drain_all());
        let dead_letters = self.ctx.system().dead_letters().clone();
        for envelope in envelopes {
            dead_letters.tell(
                DeadLetter {
                    message: envelope.message,
                    sender: envelope.sender,
                    recipient: myself.clone(),
                },
                None,
            );
        }
        for message in system_messages {
            // The mailbox is closed: watches are answered at once.
            myself.send_system(message);
        }
        self.finished = true;
        self.shared.stopped.cancel();
        debug!("Actor {} stopped.", self.ctx.path());
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_commit_after_terminate_marks_stopping() {
        let shared = CellShared::new(None);
        let child = ActorRef::nobody();
        let name = child.path().name().to_owned();

        shared.reserve(&name, child.path()).unwrap();
        assert!(!shared.has_children());
        shared.terminating.store(true, Ordering::SeqCst);
        assert!(!shared.commit(&name, child.clone()));
        assert!(shared.has_stopping_children());
        assert!(shared.child(&name).is_none());
    }

    #[test]
    fn test_reserve_refused_while_terminating() {
        let shared = CellShared::new(None);
        let child = ActorRef::nobody();
        shared.terminating.store(true, Ordering::SeqCst);
        assert!(matches!(
            shared.reserve("late", child.path()),
            Err(Error::Create(_))
        ));
    }
}
