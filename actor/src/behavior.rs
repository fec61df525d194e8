// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Behaviors
//!
//! An actor may replace its receive function at runtime. Behaviors are kept
//! on a stack; the top one handles the next message and an empty stack
//! falls back to [`Actor::receive`](crate::Actor::receive).
//!

use crate::{Actor, ActorContext, AnyMessage, Error};

use async_trait::async_trait;

use std::sync::Arc;

/// A receive function that can be pushed on the behavior stack.
#[async_trait]
pub trait Behavior<A: Actor>: Send + Sync + 'static {
    async fn receive(
        &self,
        actor: &mut A,
        message: &AnyMessage,
        ctx: &mut ActorContext<A>,
    ) -> Result<(), Error>;
}

#[async_trait]
impl<A, F> Behavior<A> for F
where
    A: Actor,
    F: Fn(&mut A, &AnyMessage, &mut ActorContext<A>) -> Result<(), Error>
        + Send
        + Sync
        + 'static,
{
    async fn receive(
        &self,
        actor: &mut A,
        message: &AnyMessage,
        ctx: &mut ActorContext<A>,
    ) -> Result<(), Error> {
        self(actor, message, ctx)
    }
}

/// Stack of behaviors owned by a cell.
pub struct BehaviorStack<A: Actor> {
    stack: Vec<Arc<dyn Behavior<A>>>,
}

impl<A: Actor> BehaviorStack<A> {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    /// Installs `behavior`. With `discard_old` the current top is replaced,
    /// otherwise the new behavior is pushed on top of it.
    pub fn become_(&mut self, behavior: Arc<dyn Behavior<A>>, discard_old: bool) {
        if discard_old {
            self.stack.pop();
        }
        self.stack.push(behavior);
    }

    /// Drops the top behavior. Returns `false` when the stack was empty.
    pub fn unbecome(&mut self) -> bool {
        self.stack.pop().is_some()
    }

    pub fn current(&self) -> Option<Arc<dyn Behavior<A>>> {
        self.stack.last().cloned()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

impl<A: Actor> Default for BehaviorStack<A> {
    fn default() -> Self {
        Self::new()
    }
}
