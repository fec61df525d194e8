// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Event sink and subscriber pattern implementation.
//!
//! A sink reads the broadcast side of the event stream in its own task and
//! hands every event of type `E` to a subscriber. Events of other types are
//! skipped.

use crate::{AnyMessage, Message};

use async_trait::async_trait;
use tokio::sync::broadcast::{Receiver as EventReceiver, error::RecvError};

use tracing::{debug, warn};

/// A sink that receives events from the event stream and notifies a
/// subscriber.
///
/// # Type Parameters
///
/// * `E` - The event type that this sink will process.
///
pub struct Sink<E: Message + Clone> {
    /// The subscriber that will be notified of events.
    subscriber: Box<dyn Subscriber<E>>,
    /// The broadcast receiver of the event stream.
    event_receiver: EventReceiver<AnyMessage>,
}

impl<E: Message + Clone> Sink<E> {
    /// Creates a new Sink with the given event receiver and subscriber.
    ///
    /// # Arguments
    ///
    /// * `event_receiver` - Receiver obtained from `EventStream::receiver`.
    /// * `subscriber` - Implementation of the Subscriber trait that will process events.
    ///
    pub fn new(
        event_receiver: EventReceiver<AnyMessage>,
        subscriber: impl Subscriber<E>,
    ) -> Self {
        Sink {
            subscriber: Box::new(subscriber),
            event_receiver,
        }
    }

    /// Runs until the event stream is closed. Lagged events are skipped.
    pub async fn run(&mut self) {
        loop {
            match self.event_receiver.recv().await {
                Ok(event) => {
                    if let Some(event) = event.downcast::<E>() {
                        debug!("Received event. Notify to the subscriber.");
                        self.subscriber.notify(event).await;
                    }
                }
                Err(error) => match error {
                    RecvError::Closed => break,
                    RecvError::Lagged(skipped) => {
                        warn!("Sink lagged behind, {} events skipped.", skipped);
                        continue;
                    }
                },
            }
        }
    }
}

/// Subscriber trait for processing events.
#[async_trait]
pub trait Subscriber<E: Message>: Send + Sync + 'static {
    /// Called for every event of type `E`.
    async fn notify(&self, event: E);
}
