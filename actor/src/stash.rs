// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Stash
//!
//! Envelopes set aside by an actor to be handled later. Unstashed envelopes
//! go back in front of the mailbox, keeping their original order.
//!

use crate::{ActorPath, Envelope, Error};

use std::collections::VecDeque;

/// Bounded or unbounded FIFO of deferred envelopes.
#[derive(Debug, Default)]
pub struct Stash {
    queue: VecDeque<Envelope>,
    capacity: Option<usize>,
}

impl Stash {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
        }
    }

    /// Appends an envelope, failing when the stash is full.
    pub fn push(&mut self, envelope: Envelope, owner: &ActorPath) -> Result<(), Error> {
        if let Some(capacity) = self.capacity {
            if self.queue.len() >= capacity {
                return Err(Error::StashOverflow(owner.clone(), capacity));
            }
        }
        self.queue.push_back(envelope);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<Envelope> {
        self.queue.pop_front()
    }

    /// Takes every envelope, oldest first.
    pub fn drain_all(&mut self) -> Vec<Envelope> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::AnyMessage;

    #[test]
    fn test_stash_capacity() {
        let owner = ActorPath::from("/user/stasher");
        let mut stash = Stash::new(Some(2));
        for i in 0..2u64 {
            stash
                .push(Envelope::new(AnyMessage::new(i), None), &owner)
                .unwrap();
        }
        let error = stash
            .push(Envelope::new(AnyMessage::new(3u64), None), &owner)
            .unwrap_err();
        assert_eq!(error, Error::StashOverflow(owner, 2));

        let drained = stash.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message.downcast_ref::<u64>(), Some(&0));
        assert!(stash.is_empty());
    }
}
