// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Journal
//!
//! Request and reply messages of the journal protocol, the
//! [`AsyncWriteJournal`] trait implemented by storage plugins and the
//! [`JournalActor`] that speaks the protocol on top of a plugin.
//!
//! A write request produces one `WriteMessagesSuccessful` (or
//! `WriteMessagesFailed`) followed by one reply per event, in request
//! order. A replay request produces the replayed events followed by one
//! `RecoverySuccess` or `ReplayMessagesFailure`.
//!

use crate::{
    error::Error,
    persistent::{AtomicWrite, JournalWrite, PersistentRepr},
};

use actor::{
    Actor, ActorContext, ActorRef, AnyMessage, Error as ActorError, Message,
};

use async_trait::async_trait;
use tracing::{debug, error, warn};

//
// Requests
//

/// Stores the events of `messages` and answers `persistent_actor`.
#[derive(Clone, Debug)]
pub struct WriteMessages {
    pub messages: Vec<JournalWrite>,
    pub persistent_actor: ActorRef,
    /// Incarnation of the writer, echoed in every reply.
    pub actor_instance_id: u64,
}

impl Message for WriteMessages {}

/// Replays the events of `persistence_id` in the inclusive sequence range.
#[derive(Clone, Debug)]
pub struct ReplayMessages {
    pub from_sequence_nr: i64,
    pub to_sequence_nr: i64,
    pub max: i64,
    pub persistence_id: String,
    pub persistent_actor: ActorRef,
}

impl Message for ReplayMessages {}

/// Deletes the events of `persistence_id` up to `to_sequence_nr`.
#[derive(Clone, Debug)]
pub struct DeleteMessagesTo {
    pub persistence_id: String,
    pub to_sequence_nr: i64,
    pub persistent_actor: ActorRef,
}

impl Message for DeleteMessagesTo {}

//
// Replies
//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteMessagesSuccessful {
    pub actor_instance_id: u64,
}

impl Message for WriteMessagesSuccessful {}

/// The whole batch failed; one `WriteMessageFailure` per event follows.
#[derive(Clone, Debug)]
pub struct WriteMessagesFailed {
    pub cause: Error,
    pub actor_instance_id: u64,
}

impl Message for WriteMessagesFailed {}

#[derive(Clone, Debug)]
pub struct WriteMessageSuccess {
    pub persistent: PersistentRepr,
    pub actor_instance_id: u64,
}

impl Message for WriteMessageSuccess {}

/// The event was refused before being stored. The writer keeps running.
#[derive(Clone, Debug)]
pub struct WriteMessageRejected {
    pub persistent: PersistentRepr,
    pub cause: Error,
    pub actor_instance_id: u64,
}

impl Message for WriteMessageRejected {}

/// The event may or may not be stored. The writer stops.
#[derive(Clone, Debug)]
pub struct WriteMessageFailure {
    pub persistent: PersistentRepr,
    pub cause: Error,
    pub actor_instance_id: u64,
}

impl Message for WriteMessageFailure {}

/// A loop entry of a write request came back.
#[derive(Clone, Debug)]
pub struct LoopMessageSuccess {
    pub message: AnyMessage,
    pub actor_instance_id: u64,
}

impl Message for LoopMessageSuccess {}

#[derive(Clone, Debug)]
pub struct ReplayedMessage {
    pub persistent: PersistentRepr,
}

impl Message for ReplayedMessage {}

/// End of a successful replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecoverySuccess {
    pub highest_sequence_nr: i64,
}

impl Message for RecoverySuccess {}

#[derive(Clone, Debug)]
pub struct ReplayMessagesFailure {
    pub cause: Error,
}

impl Message for ReplayMessagesFailure {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeleteMessagesSuccess {
    pub to_sequence_nr: i64,
}

impl Message for DeleteMessagesSuccess {}

#[derive(Clone, Debug)]
pub struct DeleteMessagesFailure {
    pub cause: Error,
    pub to_sequence_nr: i64,
}

impl Message for DeleteMessagesFailure {}

/// Storage side of a journal.
#[async_trait]
pub trait AsyncWriteJournal: Send + 'static {
    /// Stores the writes. The outer error fails the whole request; an
    /// inner error rejects that write only.
    async fn write_messages(
        &mut self,
        writes: &[AtomicWrite],
    ) -> Result<Vec<Result<(), Error>>, Error>;

    /// Events of `persistence_id` in the inclusive range, at most `max`.
    async fn replay_messages(
        &mut self,
        persistence_id: &str,
        from_sequence_nr: i64,
        to_sequence_nr: i64,
        max: i64,
    ) -> Result<Vec<PersistentRepr>, Error>;

    /// Highest sequence number ever stored for `persistence_id`, deleted
    /// events included.
    async fn read_highest_sequence_nr(
        &mut self,
        persistence_id: &str,
        from_sequence_nr: i64,
    ) -> Result<i64, Error>;

    async fn delete_messages_to(
        &mut self,
        persistence_id: &str,
        to_sequence_nr: i64,
    ) -> Result<(), Error>;
}

/// Actor running the journal protocol on top of a plugin.
pub struct JournalActor<J: AsyncWriteJournal> {
    journal: J,
}

impl<J: AsyncWriteJournal> JournalActor<J> {
    pub fn new(journal: J) -> Self {
        Self { journal }
    }

    async fn write(&mut self, request: &WriteMessages, ctx: &ActorContext<Self>) {
        let myself = ctx.myself();
        let target = &request.persistent_actor;
        let instance = request.actor_instance_id;
        let atomic: Vec<AtomicWrite> = request
            .messages
            .iter()
            .filter_map(|write| match write {
                JournalWrite::Atomic(atomic) => Some(atomic.clone()),
                JournalWrite::Loop { .. } => None,
            })
            .collect();

        let results = match self.journal.write_messages(&atomic).await {
            Ok(results) if results.len() == atomic.len() => Ok(results),
            Ok(results) => Err(Error::Journal(format!(
                "{} results for {} writes",
                results.len(),
                atomic.len()
            ))),
            Err(cause) => Err(cause),
        };
        match &results {
            Ok(_) => target.tell(
                WriteMessagesSuccessful {
                    actor_instance_id: instance,
                },
                Some(myself),
            ),
            Err(cause) => {
                error!("Journal write failed: {}", cause);
                target.tell(
                    WriteMessagesFailed {
                        cause: cause.clone(),
                        actor_instance_id: instance,
                    },
                    Some(myself),
                )
            }
        }

        let outcomes: Vec<Option<Error>> = match &results {
            Ok(results) => {
                results.iter().map(|result| result.clone().err()).collect()
            }
            Err(_) => Vec::new(),
        };
        let mut outcomes = outcomes.into_iter();
        for write in &request.messages {
            match write {
                JournalWrite::Loop { payload, sender } => target.tell(
                    LoopMessageSuccess {
                        message: payload.clone(),
                        actor_instance_id: instance,
                    },
                    sender.as_ref(),
                ),
                JournalWrite::Atomic(atomic) => {
                    let rejection = outcomes.next().flatten();
                    for persistent in &atomic.payload {
                        match (&results, &rejection) {
                            (Err(cause), _) => target.tell(
                                WriteMessageFailure {
                                    persistent: persistent.clone(),
                                    cause: cause.clone(),
                                    actor_instance_id: instance,
                                },
                                Some(myself),
                            ),
                            (Ok(_), Some(cause)) => {
                                warn!(
                                    "Event {} of {} rejected: {}",
                                    persistent.sequence_nr,
                                    persistent.persistence_id,
                                    cause
                                );
                                target.tell(
                                    WriteMessageRejected {
                                        persistent: persistent.clone(),
                                        cause: cause.clone(),
                                        actor_instance_id: instance,
                                    },
                                    Some(myself),
                                )
                            }
                            (Ok(_), None) => target.tell(
                                WriteMessageSuccess {
                                    persistent: persistent.clone(),
                                    actor_instance_id: instance,
                                },
                                Some(myself),
                            ),
                        }
                    }
                }
            }
        }
    }

    async fn replay(
        &mut self,
        request: &ReplayMessages,
        ctx: &ActorContext<Self>,
    ) -> Result<(), Error> {
        let myself = ctx.myself();
        let from = request.from_sequence_nr.max(1);
        let highest = self
            .journal
            .read_highest_sequence_nr(&request.persistence_id, from - 1)
            .await?;
        let to = request.to_sequence_nr.min(highest);
        if request.max > 0 && from <= to {
            let events = self
                .journal
                .replay_messages(&request.persistence_id, from, to, request.max)
                .await?;
            for persistent in events.into_iter().filter(|event| !event.deleted) {
                request
                    .persistent_actor
                    .tell(ReplayedMessage { persistent }, Some(myself));
            }
        }
        request.persistent_actor.tell(
            RecoverySuccess {
                highest_sequence_nr: highest,
            },
            Some(myself),
        );
        Ok(())
    }
}

#[async_trait]
impl<J: AsyncWriteJournal> Actor for JournalActor<J> {
    async fn receive(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        if let Some(request) = message.downcast_ref::<WriteMessages>() {
            debug!(
                "Writing {} entries for {}.",
                request.messages.len(),
                request.persistent_actor.path()
            );
            self.write(request, ctx).await;
        } else if let Some(request) = message.downcast_ref::<ReplayMessages>() {
            debug!("Replaying events of {}.", request.persistence_id);
            if let Err(cause) = self.replay(request, ctx).await {
                error!("Replay of {} failed: {}", request.persistence_id, cause);
                request
                    .persistent_actor
                    .tell(ReplayMessagesFailure { cause }, Some(ctx.myself()));
            }
        } else if let Some(request) = message.downcast_ref::<DeleteMessagesTo>() {
            let to_sequence_nr = request.to_sequence_nr;
            match self
                .journal
                .delete_messages_to(&request.persistence_id, to_sequence_nr)
                .await
            {
                Ok(()) => request.persistent_actor.tell(
                    DeleteMessagesSuccess { to_sequence_nr },
                    Some(ctx.myself()),
                ),
                Err(cause) => request.persistent_actor.tell(
                    DeleteMessagesFailure {
                        cause,
                        to_sequence_nr,
                    },
                    Some(ctx.myself()),
                ),
            }
        } else {
            return ctx.unhandled(message);
        }
        Ok(())
    }
}
