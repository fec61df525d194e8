// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Mailbox
//!
//! A mailbox holds two queues: the system queue (always unbounded, never
//! drops) and the user queue (unbounded or bounded). Any number of
//! [`MailboxSender`] clones feed a single [`MailboxReceiver`] owned by the
//! cell task, which drains system messages before every user message.
//!

use crate::{Envelope, SystemMessage};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

use tracing::debug;

use std::collections::VecDeque;

/// Kind of user queue created for an actor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MailboxType {
    /// User queue without capacity limit.
    #[default]
    Unbounded,
    /// User queue holding at most `capacity` envelopes. Overflowing
    /// envelopes go to dead letters.
    Bounded { capacity: usize },
}

/// Why a user envelope was not enqueued.
#[derive(Debug)]
pub enum EnqueueError {
    /// The bounded queue is full.
    Full(Envelope),
    /// The actor has stopped.
    Closed(Envelope),
}

impl EnqueueError {
    pub fn into_envelope(self) -> Envelope {
        match self {
            EnqueueError::Full(envelope) | EnqueueError::Closed(envelope) => {
                envelope
            }
        }
    }
}

#[derive(Clone)]
enum UserSender {
    Unbounded(mpsc::UnboundedSender<Envelope>),
    Bounded(mpsc::Sender<Envelope>),
}

enum UserReceiver {
    Unbounded(mpsc::UnboundedReceiver<Envelope>),
    Bounded(mpsc::Receiver<Envelope>),
}

impl UserReceiver {
    async fn recv(&mut self) -> Option<Envelope> {
        match self {
            UserReceiver::Unbounded(receiver) => receiver.recv().await,
            UserReceiver::Bounded(receiver) => receiver.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<Envelope> {
        match self {
            UserReceiver::Unbounded(receiver) => receiver.try_recv().ok(),
            UserReceiver::Bounded(receiver) => receiver.try_recv().ok(),
        }
    }

    fn close(&mut self) {
        match self {
            UserReceiver::Unbounded(receiver) => receiver.close(),
            UserReceiver::Bounded(receiver) => receiver.close(),
        }
    }
}

/// Producer side of a mailbox.
#[derive(Clone)]
pub struct MailboxSender {
    system: mpsc::UnboundedSender<SystemMessage>,
    user: UserSender,
}

impl MailboxSender {
    /// Enqueues a system message. The message is handed back when the
    /// actor has already stopped.
    pub(crate) fn enqueue_system(
        &self,
        message: SystemMessage,
    ) -> Result<(), SystemMessage> {
        self.system.send(message).map_err(|error| error.0)
    }

    /// Enqueues a user envelope.
    pub(crate) fn enqueue_user(
        &self,
        envelope: Envelope,
    ) -> Result<(), EnqueueError> {
        match &self.user {
            UserSender::Unbounded(sender) => sender
                .send(envelope)
                .map_err(|error| EnqueueError::Closed(error.0)),
            UserSender::Bounded(sender) => {
                sender.try_send(envelope).map_err(|error| match error {
                    TrySendError::Full(envelope) => {
                        EnqueueError::Full(envelope)
                    }
                    TrySendError::Closed(envelope) => {
                        EnqueueError::Closed(envelope)
                    }
                })
            }
        }
    }

    /// True once the receiving cell has stopped.
    pub fn is_closed(&self) -> bool {
        self.system.is_closed()
    }
}

/// Item handed to the cell by [`MailboxReceiver::next`].
pub(crate) enum MailboxItem {
    System(SystemMessage),
    User(Envelope),
}

/// Consumer side of a mailbox, owned by the cell task.
pub struct MailboxReceiver {
    system: mpsc::UnboundedReceiver<SystemMessage>,
    user: UserReceiver,
    prepended: VecDeque<Envelope>,
}

impl MailboxReceiver {
    /// Waits for the next item. System messages always win; user messages
    /// are only taken when `accept_user` is set.
    pub(crate) async fn next(&mut self, accept_user: bool) -> Option<MailboxItem> {
        if let Ok(message) = self.system.try_recv() {
            return Some(MailboxItem::System(message));
        }
        if accept_user {
            if let Some(envelope) = self.prepended.pop_front() {
                return Some(MailboxItem::User(envelope));
            }
        }
        tokio::select! {
            biased;
            message = self.system.recv() => message.map(MailboxItem::System),
            envelope = self.user.recv(), if accept_user => {
                envelope.map(MailboxItem::User)
            }
        }
    }

    /// Puts envelopes back in front of the queue, keeping their order.
    pub(crate) fn prepend(&mut self, envelopes: Vec<Envelope>) {
        for envelope in envelopes.into_iter().rev() {
            self.prepended.push_front(envelope);
        }
    }

    /// Closes both queues and returns whatever was still pending.
    pub(crate) fn close(&mut self) -> (Vec<SystemMessage>, Vec<Envelope>) {
        debug!("Closing mailbox.");
        self.system.close();
        self.user.close();
        let mut system = Vec::new();
        while let Ok(message) = self.system.try_recv() {
            system.push(message);
        }
        let mut user: Vec<Envelope> = self.prepended.drain(..).collect();
        while let Some(envelope) = self.user.try_recv() {
            user.push(envelope);
        }
        (system, user)
    }
}

/// Mailbox factory.
pub fn mailbox(kind: &MailboxType) -> (MailboxSender, MailboxReceiver) {
    let (system_sender, system_receiver) = mpsc::unbounded_channel();
    let (user_sender, user_receiver) = match kind {
        MailboxType::Unbounded => {
            let (sender, receiver) = mpsc::unbounded_channel();
            (UserSender::Unbounded(sender), UserReceiver::Unbounded(receiver))
        }
        MailboxType::Bounded { capacity } => {
            let (sender, receiver) = mpsc::channel((*capacity).max(1));
            (UserSender::Bounded(sender), UserReceiver::Bounded(receiver))
        }
    };
    (
        MailboxSender {
            system: system_sender,
            user: user_sender,
        },
        MailboxReceiver {
            system: system_receiver,
            user: user_receiver,
            prepended: VecDeque::new(),
        },
    )
}
