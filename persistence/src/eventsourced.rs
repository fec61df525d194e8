// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Eventsourced actors
//!
//! A [`PersistentActor`] rebuilds its state from the events it persisted
//! before. [`Eventsourced`] is the actor adapter that runs it through four
//! phases:
//!
//! 1. `RecoveryStarted`: loads the youngest matching snapshot and offers it
//!    to `receive_recover`.
//! 2. `Recovering`: replays the events stored after the snapshot, then
//!    delivers [`RecoveryCompleted`].
//! 3. `ProcessingCommands`: hands commands to `receive_command`. Events
//!    persisted by one command are written in one request once the command
//!    handler returns.
//! 4. `PersistingEvents`: waits until the journal confirmed every event
//!    persisted with `persist`, running the handlers in order.
//!
//! Commands arriving during recovery or while events are being persisted
//! are kept in an internal stash and processed afterwards, in arrival
//! order, so the events of two commands are never interleaved.
//!
//! A recovery failure and a journal write failure stop the actor. A
//! rejected write only calls `on_persist_rejected`.
//!

use crate::{
    error::Error,
    extension::Persistence,
    journal::{
        DeleteMessagesTo, LoopMessageSuccess, RecoverySuccess, ReplayMessages,
        ReplayMessagesFailure, ReplayedMessage, WriteMessageFailure,
        WriteMessageRejected, WriteMessageSuccess, WriteMessages,
        WriteMessagesFailed, WriteMessagesSuccessful,
    },
    persistent::{
        AtomicWrite, JournalWrite, PersistentRepr, Recovery, RecoveryCompleted,
        SnapshotMetadata, SnapshotOffer, SnapshotSelectionCriteria,
    },
    settings::PersistenceSettings,
    snapshot::{
        DeleteSnapshot, DeleteSnapshots, LoadSnapshot, LoadSnapshotFailed,
        LoadSnapshotResult, SaveSnapshot,
    },
};

use actor::{
    Actor, ActorContext, ActorRef, AnyMessage, Cancelable, Envelope,
    Error as ActorError, Message, Props, SupervisorStrategy,
};

use async_trait::async_trait;
use tracing::{debug, error, warn};
use uuid::Uuid;

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Actor whose state is rebuilt from persisted events.
///
/// ```ignore
/// struct Account {
///     balance: i64,
/// }
///
/// #[async_trait]
/// impl PersistentActor for Account {
///     fn persistence_id(&self) -> String {
///         "account-1".to_owned()
///     }
///
///     async fn receive_recover(
///         &mut self,
///         message: &AnyMessage,
///         _ctx: &mut PersistentContext<'_, Self>,
///     ) -> Result<(), ActorError> {
///         if let Some(amount) = message.downcast_ref::<i64>() {
///             self.balance += amount;
///         }
///         Ok(())
///     }
///
///     async fn receive_command(
///         &mut self,
///         message: &AnyMessage,
///         ctx: &mut PersistentContext<'_, Self>,
///     ) -> Result<(), ActorError> {
///         if let Some(amount) = message.downcast_ref::<i64>() {
///             ctx.persist(*amount, |account, amount, ctx| {
///                 account.balance += amount;
///                 ctx.reply(account.balance);
///                 Ok(())
///             });
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait PersistentActor: Send + Sized + 'static {
    /// Identifies the event stream of this actor in the journal.
    fn persistence_id(&self) -> String;

    /// How to recover. Defaults to the latest snapshot and every event.
    fn recovery(&self) -> Recovery {
        Recovery::default()
    }

    /// Handles a [`SnapshotOffer`], a replayed event or
    /// [`RecoveryCompleted`]. An error fails the recovery.
    async fn receive_recover(
        &mut self,
        message: &AnyMessage,
        ctx: &mut PersistentContext<'_, Self>,
    ) -> Result<(), ActorError>;

    /// Handles a command once recovery is over.
    async fn receive_command(
        &mut self,
        message: &AnyMessage,
        ctx: &mut PersistentContext<'_, Self>,
    ) -> Result<(), ActorError>;

    /// Called before recovery starts.
    async fn pre_start(
        &mut self,
        _ctx: &mut PersistentContext<'_, Self>,
    ) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called on the failed instance before it is replaced. The default
    /// stops all children and then runs `post_stop`.
    async fn pre_restart(
        &mut self,
        _cause: &ActorError,
        _message: Option<&AnyMessage>,
        ctx: &mut PersistentContext<'_, Self>,
    ) -> Result<(), ActorError> {
        let context = ctx.actor_context();
        for child in context.children() {
            context.stop(&child);
        }
        self.post_stop(ctx).await
    }

    async fn post_stop(
        &mut self,
        _ctx: &mut PersistentContext<'_, Self>,
    ) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called when recovery failed, right before the actor stops. `event`
    /// is the replayed message whose handling failed, if any.
    async fn on_recovery_failure(
        &mut self,
        cause: &Error,
        event: Option<&AnyMessage>,
        ctx: &mut PersistentContext<'_, Self>,
    ) {
        error!(
            "Recovery of {} failed ({:?}): {}",
            ctx.persistence_id(),
            event,
            cause
        );
    }

    /// Called when the journal failed to write `event`, right before the
    /// actor stops.
    async fn on_persist_failure(
        &mut self,
        cause: &Error,
        event: &AnyMessage,
        sequence_nr: i64,
        ctx: &mut PersistentContext<'_, Self>,
    ) {
        error!(
            "Failed to persist event {:?} with sequence number {} of {}: {}",
            event,
            sequence_nr,
            ctx.persistence_id(),
            cause
        );
    }

    /// Called when the journal refused `event`. The actor keeps running.
    async fn on_persist_rejected(
        &mut self,
        cause: &Error,
        event: &AnyMessage,
        sequence_nr: i64,
        ctx: &mut PersistentContext<'_, Self>,
    ) {
        warn!(
            "Rejected to persist event {:?} with sequence number {} of {}: {}",
            event,
            sequence_nr,
            ctx.persistence_id(),
            cause
        );
    }

    /// Strategy applied to failing children.
    fn supervisor_strategy(&self) -> SupervisorStrategy {
        SupervisorStrategy::default()
    }
}

type Handler<P> = Box<
    dyn FnOnce(&mut P, &AnyMessage, &mut PersistentContext<'_, P>) -> Result<(), ActorError>
        + Send,
>;

/// Handler waiting for the journal to confirm its event.
struct PendingInvocation<P: PersistentActor> {
    event: AnyMessage,
    handler: Handler<P>,
    /// Set by `persist`; such invocations hold new commands back.
    stashing: bool,
    sender: Option<ActorRef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    RecoveryStarted { replay_max: i64 },
    Recovering,
    ProcessingCommands,
    PersistingEvents,
}

#[derive(Clone, Copy, Debug)]
struct RecoveryTick {
    snapshot: bool,
    generation: u64,
}

impl Message for RecoveryTick {}

/// Bookkeeping of an eventsourced actor, untouched by user code.
pub(crate) struct EventsourcedState<P: PersistentActor> {
    persistence_id: String,
    myself: ActorRef,
    journal: ActorRef,
    snapshot_store: ActorRef,
    settings: PersistenceSettings,
    instance_id: u64,
    writer_uuid: String,
    phase: Phase,
    last_sequence_nr: i64,
    sequence_nr: i64,
    snapshot_sequence_nr: i64,
    internal_stash: VecDeque<Envelope>,
    event_batch: Vec<JournalWrite>,
    journal_batch: Vec<JournalWrite>,
    write_in_progress: bool,
    pending: VecDeque<PendingInvocation<P>>,
    pending_stashing: usize,
    recovery_timer: Option<Cancelable>,
    timer_generation: u64,
    event_seen: bool,
}

impl<P: PersistentActor> EventsourcedState<P> {
    fn new() -> Self {
        Self {
            persistence_id: String::new(),
            myself: ActorRef::nobody(),
            journal: ActorRef::nobody(),
            snapshot_store: ActorRef::nobody(),
            settings: PersistenceSettings::default(),
            instance_id: NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed),
            writer_uuid: Uuid::new_v4().to_string(),
            phase: Phase::RecoveryStarted { replay_max: 0 },
            last_sequence_nr: 0,
            sequence_nr: 0,
            snapshot_sequence_nr: 0,
            internal_stash: VecDeque::new(),
            event_batch: Vec::new(),
            journal_batch: Vec::new(),
            write_in_progress: false,
            pending: VecDeque::new(),
            pending_stashing: 0,
            recovery_timer: None,
            timer_generation: 0,
            event_seen: false,
        }
    }

    fn next_sequence_nr(&mut self) -> i64 {
        self.sequence_nr += 1;
        self.sequence_nr
    }

    fn set_last_sequence_nr(&mut self, sequence_nr: i64) {
        self.last_sequence_nr = sequence_nr;
        self.sequence_nr = sequence_nr;
    }

    fn recovery_running(&self) -> bool {
        matches!(
            self.phase,
            Phase::RecoveryStarted { .. } | Phase::Recovering
        )
    }

    fn cancel_recovery_timer(&mut self) {
        if let Some(timer) = self.recovery_timer.take() {
            timer.cancel();
        }
    }

    /// Moves the events of the last handler to the journal batch and sends
    /// it unless a previous write is still in flight.
    fn flush_batch(&mut self) {
        self.journal_batch.append(&mut self.event_batch);
        if !self.write_in_progress {
            self.flush_journal_batch();
        }
    }

    fn flush_journal_batch(&mut self) {
        if self.journal_batch.is_empty() {
            return;
        }
        let messages = std::mem::take(&mut self.journal_batch);
        debug!(
            "{} sends {} entries to the journal.",
            self.persistence_id,
            messages.len()
        );
        self.journal.tell(
            WriteMessages {
                messages,
                persistent_actor: self.myself.clone(),
                actor_instance_id: self.instance_id,
            },
            Some(&self.myself),
        );
        self.write_in_progress = true;
    }

    fn stash_internally(
        &mut self,
        ctx: &ActorContext<Eventsourced<P>>,
    ) -> Result<(), ActorError> {
        let Some(envelope) = ctx.current_envelope().cloned() else {
            return Ok(());
        };
        if let Some(capacity) = self.settings.internal_stash_capacity {
            if self.internal_stash.len() >= capacity {
                error!(
                    "Internal stash of {} is full, dropping {:?}.",
                    self.persistence_id, envelope.message
                );
                return Err(ActorError::StashOverflow(ctx.path().clone(), capacity));
            }
        }
        self.internal_stash.push_back(envelope);
        Ok(())
    }

    /// Returns the oldest held command, or all of them, to the mailbox.
    fn unstash_internally(
        &mut self,
        all: bool,
        ctx: &mut ActorContext<Eventsourced<P>>,
    ) {
        if all {
            ctx.prepend_to_mailbox(self.internal_stash.drain(..));
        } else if let Some(envelope) = self.internal_stash.pop_front() {
            ctx.prepend_to_mailbox(Some(envelope));
        }
    }
}

/// View of an eventsourced actor handed to user callbacks.
pub struct PersistentContext<'a, P: PersistentActor> {
    ctx: &'a mut ActorContext<Eventsourced<P>>,
    state: &'a mut EventsourcedState<P>,
    sender: Option<ActorRef>,
}

impl<'a, P: PersistentActor> PersistentContext<'a, P> {
    fn new(
        ctx: &'a mut ActorContext<Eventsourced<P>>,
        state: &'a mut EventsourcedState<P>,
        sender: Option<ActorRef>,
    ) -> Self {
        Self { ctx, state, sender }
    }

    /// Context of the underlying actor, for children, watch and timers.
    pub fn actor_context(&mut self) -> &mut ActorContext<Eventsourced<P>> {
        self.ctx
    }

    pub fn myself(&self) -> &ActorRef {
        self.ctx.myself()
    }

    /// Sender of the command being handled. Inside a persist handler this
    /// is the sender of the command that persisted the event.
    pub fn sender(&self) -> Option<&ActorRef> {
        self.sender.as_ref()
    }

    /// Replies to [`PersistentContext::sender`].
    pub fn reply<M: Message>(&self, message: M) {
        match &self.sender {
            Some(sender) => sender.tell(message, Some(self.ctx.myself())),
            None => self
                .ctx
                .system()
                .dead_letters()
                .tell(message, Some(self.ctx.myself())),
        }
    }

    pub fn persistence_id(&self) -> &str {
        &self.state.persistence_id
    }

    /// Sequence number of the last event persisted or replayed.
    pub fn last_sequence_nr(&self) -> i64 {
        self.state.last_sequence_nr
    }

    /// Sequence number of the snapshot recovery started from, `0` when
    /// there was none.
    pub fn snapshot_sequence_nr(&self) -> i64 {
        self.state.snapshot_sequence_nr
    }

    pub fn recovery_running(&self) -> bool {
        self.state.recovery_running()
    }

    pub fn recovery_finished(&self) -> bool {
        !self.state.recovery_running()
    }

    fn add_invocation(
        &mut self,
        event: AnyMessage,
        handler: Handler<P>,
        stashing: bool,
    ) -> PersistentRepr {
        let sequence_nr = self.state.next_sequence_nr();
        let repr = PersistentRepr::new(
            event.clone(),
            sequence_nr,
            &self.state.persistence_id,
            &self.state.writer_uuid,
            self.sender.clone(),
        );
        if stashing {
            self.state.pending_stashing += 1;
        }
        self.state.pending.push_back(PendingInvocation {
            event,
            handler,
            stashing,
            sender: self.sender.clone(),
        });
        repr
    }

    fn persist_with<E, F>(&mut self, event: E, handler: F, stashing: bool)
    where
        E: Message,
        F: FnOnce(&mut P, &E, &mut PersistentContext<'_, P>) -> Result<(), ActorError>
            + Send
            + 'static,
    {
        let repr = self.add_invocation(AnyMessage::new(event), typed(handler), stashing);
        self.state
            .event_batch
            .push(JournalWrite::Atomic(AtomicWrite::new(vec![repr])));
    }

    fn persist_all_with<E, F>(&mut self, events: Vec<E>, handler: F, stashing: bool)
    where
        E: Message,
        F: Fn(&mut P, &E, &mut PersistentContext<'_, P>) -> Result<(), ActorError>
            + Send
            + Sync
            + 'static,
    {
        if events.is_empty() {
            return;
        }
        let handler = std::sync::Arc::new(handler);
        let reprs = events
            .into_iter()
            .map(|event| {
                let handler = handler.clone();
                self.add_invocation(
                    AnyMessage::new(event),
                    typed(move |actor: &mut P, event: &E, ctx: &mut PersistentContext<'_, P>| {
                        handler(actor, event, ctx)
                    }),
                    stashing,
                )
            })
            .collect();
        self.state
            .event_batch
            .push(JournalWrite::Atomic(AtomicWrite::new(reprs)));
    }

    /// Persists `event` and runs `handler` once it is stored. New commands
    /// wait until every pending handler ran.
    pub fn persist<E, F>(&mut self, event: E, handler: F)
    where
        E: Message,
        F: FnOnce(&mut P, &E, &mut PersistentContext<'_, P>) -> Result<(), ActorError>
            + Send
            + 'static,
    {
        self.persist_with(event, handler, true);
    }

    /// Persists `events` atomically, running `handler` for each of them.
    pub fn persist_all<E, F>(&mut self, events: Vec<E>, handler: F)
    where
        E: Message,
        F: Fn(&mut P, &E, &mut PersistentContext<'_, P>) -> Result<(), ActorError>
            + Send
            + Sync
            + 'static,
    {
        self.persist_all_with(events, handler, true);
    }

    /// Like [`PersistentContext::persist`] but new commands keep being
    /// processed while the event is written.
    pub fn persist_async<E, F>(&mut self, event: E, handler: F)
    where
        E: Message,
        F: FnOnce(&mut P, &E, &mut PersistentContext<'_, P>) -> Result<(), ActorError>
            + Send
            + 'static,
    {
        self.persist_with(event, handler, false);
    }

    pub fn persist_all_async<E, F>(&mut self, events: Vec<E>, handler: F)
    where
        E: Message,
        F: Fn(&mut P, &E, &mut PersistentContext<'_, P>) -> Result<(), ActorError>
            + Send
            + Sync
            + 'static,
    {
        self.persist_all_with(events, handler, false);
    }

    /// Runs `handler` after the handlers of every event persisted before,
    /// without storing `event`.
    pub fn defer_async<E, F>(&mut self, event: E, handler: F)
    where
        E: Message,
        F: FnOnce(&mut P, &E, &mut PersistentContext<'_, P>) -> Result<(), ActorError>
            + Send
            + 'static,
    {
        let payload = AnyMessage::new(event);
        self.state.pending.push_back(PendingInvocation {
            event: payload.clone(),
            handler: typed(handler),
            stashing: false,
            sender: self.sender.clone(),
        });
        self.state.event_batch.push(JournalWrite::Loop {
            payload,
            sender: self.sender.clone(),
        });
    }

    /// Saves `snapshot` as the state at [`PersistentContext::last_sequence_nr`].
    /// The store answers with `SaveSnapshotSuccess` or `SaveSnapshotFailure`.
    pub fn save_snapshot<M: Message>(&self, snapshot: M) {
        let metadata = SnapshotMetadata::new(
            &self.state.persistence_id,
            self.state.last_sequence_nr,
        );
        self.state.snapshot_store.tell(
            SaveSnapshot {
                metadata,
                snapshot: AnyMessage::new(snapshot),
            },
            Some(self.ctx.myself()),
        );
    }

    pub fn delete_snapshot(&self, sequence_nr: i64) {
        self.state.snapshot_store.tell(
            DeleteSnapshot {
                metadata: SnapshotMetadata {
                    persistence_id: self.state.persistence_id.clone(),
                    sequence_nr,
                    timestamp: 0,
                },
            },
            Some(self.ctx.myself()),
        );
    }

    pub fn delete_snapshots(&self, criteria: SnapshotSelectionCriteria) {
        self.state.snapshot_store.tell(
            DeleteSnapshots {
                persistence_id: self.state.persistence_id.clone(),
                criteria,
            },
            Some(self.ctx.myself()),
        );
    }

    /// Deletes the events up to `to_sequence_nr`. The journal answers with
    /// `DeleteMessagesSuccess` or `DeleteMessagesFailure`.
    pub fn delete_messages(&self, to_sequence_nr: i64) {
        self.state.journal.tell(
            DeleteMessagesTo {
                persistence_id: self.state.persistence_id.clone(),
                to_sequence_nr,
                persistent_actor: self.ctx.myself().clone(),
            },
            Some(self.ctx.myself()),
        );
    }
}

fn typed<P, E, F>(handler: F) -> Handler<P>
where
    P: PersistentActor,
    E: Message,
    F: FnOnce(&mut P, &E, &mut PersistentContext<'_, P>) -> Result<(), ActorError>
        + Send
        + 'static,
{
    let handler: Handler<P> =
        Box::new(move |actor, event, ctx| match event.downcast_ref::<E>() {
            Some(event) => handler(actor, event, ctx),
            None => Ok(()),
        });
    handler
}

/// Actor adapter running a [`PersistentActor`].
pub struct Eventsourced<P: PersistentActor> {
    actor: P,
    state: EventsourcedState<P>,
}

impl<P: PersistentActor> Eventsourced<P> {
    pub fn new(actor: P) -> Self {
        Self {
            actor,
            state: EventsourcedState::new(),
        }
    }

    /// Props building a fresh persistent actor for every incarnation.
    pub fn props<F>(factory: F) -> Props<Self>
    where
        F: Fn() -> P + Send + Sync + 'static,
    {
        Props::new(move || Eventsourced::new(factory()))
    }

    fn schedule_recovery_tick(
        &mut self,
        snapshot: bool,
        ctx: &ActorContext<Self>,
    ) {
        self.state.cancel_recovery_timer();
        self.state.timer_generation += 1;
        let tick = RecoveryTick {
            snapshot,
            generation: self.state.timer_generation,
        };
        let timeout = self.state.settings.recovery_event_timeout;
        self.state.recovery_timer = Some(if snapshot {
            ctx.schedule_once(timeout, ctx.myself(), tick)
        } else {
            ctx.schedule_repeatedly(timeout, timeout, ctx.myself(), tick)
        });
    }

    fn start_recovery(&mut self, recovery: Recovery, ctx: &ActorContext<Self>) {
        debug!("Recovery of {} started.", self.state.persistence_id);
        self.state.phase = Phase::RecoveryStarted {
            replay_max: recovery.replay_max,
        };
        self.state.snapshot_store.tell(
            LoadSnapshot {
                persistence_id: self.state.persistence_id.clone(),
                criteria: recovery.from_snapshot,
                to_sequence_nr: recovery.to_sequence_nr,
            },
            Some(ctx.myself()),
        );
        self.schedule_recovery_tick(true, ctx);
    }

    async fn call_recover(
        &mut self,
        message: &AnyMessage,
        sender: Option<ActorRef>,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        let Eventsourced { actor, state } = self;
        let mut pctx = PersistentContext::new(ctx, state, sender);
        actor.receive_recover(message, &mut pctx).await
    }

    async fn fail_recovery(
        &mut self,
        cause: Error,
        event: Option<AnyMessage>,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        self.state.cancel_recovery_timer();
        {
            let Eventsourced { actor, state } = self;
            let mut pctx = PersistentContext::new(ctx, state, None);
            actor
                .on_recovery_failure(&cause, event.as_ref(), &mut pctx)
                .await;
        }
        Err(ActorError::Recovery {
            persistence_id: self.state.persistence_id.clone(),
            reason: cause.to_string(),
        })
    }

    async fn recovery_started(
        &mut self,
        replay_max: i64,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        if let Some(tick) = message.downcast_ref::<RecoveryTick>() {
            if tick.snapshot && tick.generation == self.state.timer_generation {
                let cause = Error::RecoveryTimeout(format!(
                    "snapshot of {} not loaded within {:?}",
                    self.state.persistence_id,
                    self.state.settings.recovery_event_timeout
                ));
                return self.fail_recovery(cause, None, ctx).await;
            }
            return Ok(());
        }
        if let Some(result) = message.downcast_ref::<LoadSnapshotResult>() {
            self.state.cancel_recovery_timer();
            if let Some(selected) = &result.snapshot {
                let sequence_nr = selected.metadata.sequence_nr;
                self.state.set_last_sequence_nr(sequence_nr);
                self.state.snapshot_sequence_nr = sequence_nr;
                let offer = AnyMessage::new(SnapshotOffer {
                    metadata: selected.metadata.clone(),
                    snapshot: selected.snapshot.clone(),
                });
                if let Err(error) = self.call_recover(&offer, None, ctx).await {
                    return self.fail_recovery(error.into(), Some(offer), ctx).await;
                }
            }
            self.state.phase = Phase::Recovering;
            self.state.event_seen = false;
            self.state.journal.tell(
                ReplayMessages {
                    from_sequence_nr: self.state.last_sequence_nr + 1,
                    to_sequence_nr: result.to_sequence_nr,
                    max: replay_max,
                    persistence_id: self.state.persistence_id.clone(),
                    persistent_actor: ctx.myself().clone(),
                },
                Some(ctx.myself()),
            );
            self.schedule_recovery_tick(false, ctx);
            return Ok(());
        }
        if let Some(failed) = message.downcast_ref::<LoadSnapshotFailed>() {
            return self.fail_recovery(failed.cause.clone(), None, ctx).await;
        }
        self.state.stash_internally(ctx)
    }

    async fn recovering(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        if let Some(replayed) = message.downcast_ref::<ReplayedMessage>() {
            let persistent = &replayed.persistent;
            self.state.event_seen = true;
            self.state.set_last_sequence_nr(persistent.sequence_nr);
            if let Err(error) = self
                .call_recover(&persistent.payload, persistent.sender.clone(), ctx)
                .await
            {
                let event = Some(persistent.payload.clone());
                return self.fail_recovery(error.into(), event, ctx).await;
            }
            return Ok(());
        }
        if let Some(success) = message.downcast_ref::<RecoverySuccess>() {
            self.state.cancel_recovery_timer();
            let highest = success.highest_sequence_nr.max(self.state.last_sequence_nr);
            self.state.set_last_sequence_nr(highest);
            self.state.phase = Phase::ProcessingCommands;
            debug!(
                "Recovery of {} completed at {}.",
                self.state.persistence_id, highest
            );
            let completed = AnyMessage::new(RecoveryCompleted);
            if let Err(error) = self.call_recover(&completed, None, ctx).await {
                return self.fail_recovery(error.into(), Some(completed), ctx).await;
            }
            self.state.flush_batch();
            if self.state.pending_stashing > 0 {
                self.state.phase = Phase::PersistingEvents;
            } else {
                self.state.unstash_internally(true, ctx);
            }
            return Ok(());
        }
        if let Some(failure) = message.downcast_ref::<ReplayMessagesFailure>() {
            return self.fail_recovery(failure.cause.clone(), None, ctx).await;
        }
        if let Some(tick) = message.downcast_ref::<RecoveryTick>() {
            if !tick.snapshot && tick.generation == self.state.timer_generation {
                if !self.state.event_seen {
                    let cause = Error::RecoveryTimeout(format!(
                        "no event replayed for {} within {:?}",
                        self.state.persistence_id,
                        self.state.settings.recovery_event_timeout
                    ));
                    return self.fail_recovery(cause, None, ctx).await;
                }
                self.state.event_seen = false;
            }
            return Ok(());
        }
        self.state.stash_internally(ctx)
    }

    async fn processing_commands(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        if let Some(result) = self.journal_reply(message, ctx).await {
            return result;
        }
        let sender = ctx.sender().cloned();
        let result = {
            let Eventsourced { actor, state } = self;
            let mut pctx = PersistentContext::new(ctx, state, sender);
            actor.receive_command(message, &mut pctx).await
        };
        self.state.flush_batch();
        if self.state.pending_stashing > 0 {
            self.state.phase = Phase::PersistingEvents;
        } else {
            self.state.unstash_internally(result.is_err(), ctx);
        }
        result
    }

    async fn persisting_events(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        if let Some(result) = self.journal_reply(message, ctx).await {
            return result;
        }
        self.state.stash_internally(ctx)
    }

    fn run_handler(
        &mut self,
        invocation: PendingInvocation<P>,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        let Eventsourced { actor, state } = self;
        let mut pctx = PersistentContext::new(ctx, state, invocation.sender);
        (invocation.handler)(actor, &invocation.event, &mut pctx)
    }

    /// Bookkeeping after the handler of an acknowledged entry ran.
    fn write_completed(&mut self, stashing: bool, ctx: &mut ActorContext<Self>) {
        if stashing {
            self.state.pending_stashing = self.state.pending_stashing.saturating_sub(1);
        }
        self.state.flush_batch();
        if self.state.pending_stashing == 0 {
            if self.state.phase == Phase::PersistingEvents {
                self.state.phase = Phase::ProcessingCommands;
                self.state.unstash_internally(false, ctx);
            }
        } else if self.state.phase == Phase::ProcessingCommands {
            self.state.phase = Phase::PersistingEvents;
        }
    }

    fn is_stale(&self, actor_instance_id: u64) -> bool {
        if actor_instance_id != self.state.instance_id {
            debug!(
                "{} ignores a journal reply of a previous incarnation.",
                self.state.persistence_id
            );
            true
        } else {
            false
        }
    }

    /// Handles the journal protocol. `None` when `message` is a command.
    async fn journal_reply(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Option<Result<(), ActorError>> {
        if let Some(success) = message.downcast_ref::<WriteMessageSuccess>() {
            if self.is_stale(success.actor_instance_id) {
                return Some(Ok(()));
            }
            self.state.last_sequence_nr = success.persistent.sequence_nr;
            let Some(invocation) = self.state.pending.pop_front() else {
                warn!("{} got an unexpected journal reply.", self.state.persistence_id);
                return Some(Ok(()));
            };
            let stashing = invocation.stashing;
            let result = self.run_handler(invocation, ctx);
            self.write_completed(stashing, ctx);
            return Some(result);
        }
        if let Some(loop_message) = message.downcast_ref::<LoopMessageSuccess>() {
            if self.is_stale(loop_message.actor_instance_id) {
                return Some(Ok(()));
            }
            let Some(invocation) = self.state.pending.pop_front() else {
                warn!("{} got an unexpected journal reply.", self.state.persistence_id);
                return Some(Ok(()));
            };
            let stashing = invocation.stashing;
            let result = self.run_handler(invocation, ctx);
            self.write_completed(stashing, ctx);
            return Some(result);
        }
        if let Some(rejected) = message.downcast_ref::<WriteMessageRejected>() {
            if self.is_stale(rejected.actor_instance_id) {
                return Some(Ok(()));
            }
            let persistent = &rejected.persistent;
            self.state.last_sequence_nr = persistent.sequence_nr;
            let stashing = self
                .state
                .pending
                .pop_front()
                .map(|invocation| invocation.stashing)
                .unwrap_or(false);
            {
                let Eventsourced { actor, state } = &mut *self;
                let mut pctx = PersistentContext::new(ctx, state, None);
                actor
                    .on_persist_rejected(
                        &rejected.cause,
                        &persistent.payload,
                        persistent.sequence_nr,
                        &mut pctx,
                    )
                    .await;
            }
            self.write_completed(stashing, ctx);
            return Some(Ok(()));
        }
        if let Some(failure) = message.downcast_ref::<WriteMessageFailure>() {
            if self.is_stale(failure.actor_instance_id) {
                return Some(Ok(()));
            }
            let persistent = &failure.persistent;
            self.state.pending.pop_front();
            {
                let Eventsourced { actor, state } = &mut *self;
                let mut pctx = PersistentContext::new(ctx, state, None);
                actor
                    .on_persist_failure(
                        &failure.cause,
                        &persistent.payload,
                        persistent.sequence_nr,
                        &mut pctx,
                    )
                    .await;
            }
            return Some(Err(ActorError::Persist {
                persistence_id: self.state.persistence_id.clone(),
                sequence_nr: persistent.sequence_nr,
                reason: failure.cause.to_string(),
            }));
        }
        let batch_instance = message
            .downcast_ref::<WriteMessagesSuccessful>()
            .map(|success| success.actor_instance_id)
            .or_else(|| {
                message
                    .downcast_ref::<WriteMessagesFailed>()
                    .map(|failed| failed.actor_instance_id)
            });
        if let Some(actor_instance_id) = batch_instance {
            if self.is_stale(actor_instance_id) {
                return Some(Ok(()));
            }
            self.state.write_in_progress = false;
            self.state.flush_journal_batch();
            return Some(Ok(()));
        }
        if message.is::<RecoveryTick>() {
            return Some(Ok(()));
        }
        None
    }
}

#[async_trait]
impl<P: PersistentActor> Actor for Eventsourced<P> {
    async fn receive(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        match self.state.phase {
            Phase::RecoveryStarted { replay_max } => {
                self.recovery_started(replay_max, message, ctx).await
            }
            Phase::Recovering => self.recovering(message, ctx).await,
            Phase::ProcessingCommands => self.processing_commands(message, ctx).await,
            Phase::PersistingEvents => self.persisting_events(message, ctx).await,
        }
    }

    async fn pre_start(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), ActorError> {
        let persistence = Persistence::get(ctx.system()).await?;
        self.state.persistence_id = self.actor.persistence_id();
        self.state.myself = ctx.myself().clone();
        self.state.journal = persistence.journal().clone();
        self.state.snapshot_store = persistence.snapshot_store().clone();
        self.state.settings = persistence.settings().clone();
        {
            let Eventsourced { actor, state } = &mut *self;
            let mut pctx = PersistentContext::new(ctx, state, None);
            actor.pre_start(&mut pctx).await?;
        }
        let recovery = self.actor.recovery();
        self.start_recovery(recovery, ctx);
        Ok(())
    }

    async fn pre_restart(
        &mut self,
        cause: &ActorError,
        message: Option<&AnyMessage>,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        self.state.cancel_recovery_timer();
        ctx.prepend_to_mailbox(self.state.internal_stash.drain(..));
        let Eventsourced { actor, state } = self;
        let mut pctx = PersistentContext::new(ctx, state, None);
        actor.pre_restart(cause, message, &mut pctx).await
    }

    async fn post_stop(&mut self, ctx: &mut ActorContext<Self>) -> Result<(), ActorError> {
        self.state.cancel_recovery_timer();
        let Eventsourced { actor, state } = self;
        let mut pctx = PersistentContext::new(ctx, state, None);
        actor.post_stop(&mut pctx).await
    }

    fn supervisor_strategy(&self) -> SupervisorStrategy {
        self.actor.supervisor_strategy()
    }
}
