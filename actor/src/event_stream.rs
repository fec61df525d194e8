// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Event stream
//!
//! System wide publish/subscribe bus. Actors subscribe to a concrete event
//! type; [`Sink`](crate::Sink)s read every event from a broadcast channel.
//! Publishing never fails: a broken subscriber can not affect the publisher.
//!

use crate::{ActorRef, AnyMessage, Message, message::DeadLetter};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use std::{any::TypeId, collections::HashSet, sync::Arc};

struct Inner {
    subscribers: DashMap<TypeId, HashSet<ActorRef>>,
    broadcast: broadcast::Sender<AnyMessage>,
}

/// Handle to the event bus of a system.
#[derive(Clone)]
pub struct EventStream {
    inner: Arc<Inner>,
}

impl EventStream {
    /// Bus whose broadcast side buffers `capacity` events per reader.
    pub fn new(capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                subscribers: DashMap::new(),
                broadcast,
            }),
        }
    }

    /// Subscribes `subscriber` to events of type `E`. Returns `false` when
    /// it was already subscribed.
    pub fn subscribe<E: Message>(&self, subscriber: &ActorRef) -> bool {
        self.inner
            .subscribers
            .entry(TypeId::of::<E>())
            .or_default()
            .insert(subscriber.clone())
    }

    pub fn unsubscribe<E: Message>(&self, subscriber: &ActorRef) -> bool {
        self.inner
            .subscribers
            .get_mut(&TypeId::of::<E>())
            .map(|mut set| set.remove(subscriber))
            .unwrap_or(false)
    }

    /// Removes `subscriber` from every event type.
    pub fn unsubscribe_all(&self, subscriber: &ActorRef) {
        for mut set in self.inner.subscribers.iter_mut() {
            set.remove(subscriber);
        }
    }

    pub fn publish<E: Message>(&self, event: E) {
        self.publish_any(AnyMessage::new(event));
    }

    /// Fan-out to the subscribers of the payload type and to the broadcast
    /// readers.
    pub fn publish_any(&self, event: AnyMessage) {
        let subscribers: Vec<ActorRef> = self
            .inner
            .subscribers
            .get(&event.payload_type_id())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for subscriber in subscribers {
            subscriber.tell_any(event.clone(), None);
        }
        // No readers is fine.
        let _ = self.inner.broadcast.send(event);
    }

    pub(crate) fn publish_dead_letter(&self, dead_letter: DeadLetter) {
        if dead_letter.message.is::<DeadLetter>() {
            debug!("Dropping nested dead letter to {:?}.", dead_letter.recipient);
            return;
        }
        debug!(
            "Dead letter {:?} from {:?} to {:?}.",
            dead_letter.message, dead_letter.sender, dead_letter.recipient
        );
        self.publish(dead_letter);
    }

    /// New reader of every published event.
    pub fn receiver(&self) -> broadcast::Receiver<AnyMessage> {
        self.inner.broadcast.subscribe()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_readers() {
        let stream = EventStream::new(8);
        let mut receiver = stream.receiver();
        stream.publish("hello".to_owned());
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.downcast_ref::<String>().unwrap(), "hello");
    }

    #[test]
    fn test_subscriptions() {
        let stream = EventStream::new(8);
        let nobody = ActorRef::nobody();
        assert!(stream.subscribe::<String>(&nobody));
        assert!(!stream.subscribe::<String>(&nobody));
        assert!(stream.unsubscribe::<String>(&nobody));
        assert!(!stream.unsubscribe::<u64>(&nobody));
        stream.subscribe::<u64>(&nobody);
        stream.unsubscribe_all(&nobody);
        assert!(!stream.unsubscribe::<u64>(&nobody));
        // Without readers publishing is a no-op.
        stream.publish(1u64);
    }
}
