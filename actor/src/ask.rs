// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Ask pattern
//!
//! An ask registers a one-shot [`PromiseActorRef`] under `/temp`, sends the
//! request with the promise as sender and waits for the first reply. The
//! promise completes exactly once; later replies are dropped.
//!

use crate::{
    ActorRef, AnyMessage, Envelope, Error,
    actor_ref::{RefBackend, VirtualPathContainer},
    path::ActorPath,
    system::SystemRef,
    system_message::SystemMessage,
};

use tokio::sync::oneshot;
use tracing::debug;

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

const INITIATED: u8 = 0;
const COMPLETED: u8 = 1;

/// One-shot reference completed by the first message it receives.
pub(crate) struct PromiseActorRef {
    path: ActorPath,
    name: String,
    state: AtomicU8,
    reply: Mutex<Option<oneshot::Sender<Envelope>>>,
    container: Arc<VirtualPathContainer>,
}

impl PromiseActorRef {
    fn new(
        path: ActorPath,
        name: String,
        reply: oneshot::Sender<Envelope>,
        container: Arc<VirtualPathContainer>,
    ) -> Self {
        Self {
            path,
            name,
            state: AtomicU8::new(INITIATED),
            reply: Mutex::new(Some(reply)),
            container,
        }
    }

    /// Moves the promise to its final state. Only the first caller wins.
    fn complete(&self) -> Option<oneshot::Sender<Envelope>> {
        if self
            .state
            .compare_exchange(
                INITIATED,
                COMPLETED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return None;
        }
        self.container.remove_child(&self.name);
        self.reply.lock().ok().and_then(|mut reply| reply.take())
    }
}

impl RefBackend for PromiseActorRef {
    fn path(&self) -> &ActorPath {
        &self.path
    }

    fn tell(&self, _this: &ActorRef, envelope: Envelope) {
        match self.complete() {
            Some(reply) => {
                if reply.send(envelope).is_err() {
                    debug!("Ask on {} was abandoned.", self.path);
                }
            }
            None => {
                debug!(
                    "Ignoring late reply {:?} to {}.",
                    envelope.message, self.path
                );
            }
        }
    }

    fn send_system(&self, _this: &ActorRef, message: SystemMessage) {
        debug!("Promise {} ignores {:?}.", self.path, message);
    }

    fn is_terminated(&self) -> bool {
        self.state.load(Ordering::Acquire) == COMPLETED
    }
}

/// Sends `message` to `target` and waits up to `timeout` for the reply.
pub(crate) async fn ask(
    system: &SystemRef,
    target: &ActorRef,
    message: AnyMessage,
    timeout: Duration,
) -> Result<AnyMessage, Error> {
    let container = system.temp_container();
    let name = system.temp_name();
    let path = (container.path() / name.as_str()).with_uid(system.new_uid());

    let (sender, receiver) = oneshot::channel();
    let promise = Arc::new(PromiseActorRef::new(
        path,
        name.clone(),
        sender,
        container.clone(),
    ));
    let promise_ref = ActorRef::from_backend(promise.clone());
    container.add_child(&name, promise_ref.clone());

    target.tell_any(message, Some(&promise_ref));

    match tokio::time::timeout(timeout, receiver).await {
        Ok(Ok(envelope)) => Ok(envelope.message),
        Ok(Err(_)) => Err(Error::Send(format!(
            "ask on {} lost its reply channel",
            target.path()
        ))),
        Err(_) => {
            promise.complete();
            debug!("Ask on {} timed out.", target.path());
            Err(Error::AskTimeout(
                target.path().clone(),
                timeout.as_millis() as u64,
            ))
        }
    }
}
