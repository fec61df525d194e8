// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Scheduler
//!
//! Delayed and periodic `tell`. Every scheduled job returns a
//! [`Cancelable`]; cancelling is idempotent and best effort, a message
//! already sent stays sent.
//!

use crate::{ActorRef, AnyMessage};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use std::time::Duration;

/// Handle of a scheduled job.
#[derive(Clone, Debug, Default)]
pub struct Cancelable {
    token: CancellationToken,
}

impl Cancelable {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Time based delivery of messages.
pub trait Scheduler: Send + Sync + 'static {
    /// Sends `message` to `target` once, after `delay`.
    fn schedule_tell_once(
        &self,
        delay: Duration,
        target: ActorRef,
        message: AnyMessage,
        sender: Option<ActorRef>,
    ) -> Cancelable;

    /// Sends `message` to `target` after `initial_delay` and then every
    /// `interval` until cancelled.
    fn schedule_tell_repeatedly(
        &self,
        initial_delay: Duration,
        interval: Duration,
        target: ActorRef,
        message: AnyMessage,
        sender: Option<ActorRef>,
    ) -> Cancelable;
}

/// Scheduler spawning one tokio task per job.
#[derive(Clone, Debug, Default)]
pub struct TokioScheduler {
    shutdown: CancellationToken,
}

impl TokioScheduler {
    /// Jobs also stop when `shutdown` is cancelled.
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_tell_once(
        &self,
        delay: Duration,
        target: ActorRef,
        message: AnyMessage,
        sender: Option<ActorRef>,
    ) -> Cancelable {
        let cancelable = Cancelable::new();
        let token = cancelable.token().clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Scheduled message to {} cancelled.", target.path());
                }
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    target.tell_any(message, sender.as_ref());
                }
            }
        });
        cancelable
    }

    fn schedule_tell_repeatedly(
        &self,
        initial_delay: Duration,
        interval: Duration,
        target: ActorRef,
        message: AnyMessage,
        sender: Option<ActorRef>,
    ) -> Cancelable {
        let cancelable = Cancelable::new();
        let token = cancelable.token().clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut delay = initial_delay;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {
                        if target.is_terminated() {
                            break;
                        }
                        target.tell_any(message.clone(), sender.as_ref());
                    }
                }
                delay = interval;
            }
            debug!("Periodic job for {} finished.", target.path());
        });
        cancelable
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let cancelable = Cancelable::new();
        assert!(!cancelable.is_cancelled());
        cancelable.cancel();
        cancelable.cancel();
        assert!(cancelable.is_cancelled());
        assert!(cancelable.clone().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_job_never_fires() {
        let scheduler = TokioScheduler::default();
        let cancelable = scheduler.schedule_tell_once(
            Duration::from_millis(50),
            ActorRef::nobody(),
            AnyMessage::new(1u64),
            None,
        );
        cancelable.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cancelable.is_cancelled());
    }
}
