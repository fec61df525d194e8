// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Props
//!
//! Recipe used to build, and rebuild on restart, an actor instance.
//!

use crate::{Actor, Error, MailboxType, SupervisorStrategy};

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

/// Factory and deployment options of an actor.
pub struct Props<A: Actor> {
    factory: Arc<dyn Fn() -> A + Send + Sync>,
    mailbox: MailboxType,
    supervisor_strategy: Option<SupervisorStrategy>,
    stash_capacity: Option<usize>,
}

impl<A: Actor> Props<A> {
    /// Props calling `factory` for every incarnation.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            mailbox: MailboxType::default(),
            supervisor_strategy: None,
            stash_capacity: None,
        }
    }

    pub fn with_mailbox(mut self, mailbox: MailboxType) -> Self {
        self.mailbox = mailbox;
        self
    }

    /// Overrides the strategy returned by the actor itself.
    pub fn with_supervisor_strategy(mut self, strategy: SupervisorStrategy) -> Self {
        self.supervisor_strategy = Some(strategy);
        self
    }

    pub fn with_stash_capacity(mut self, capacity: usize) -> Self {
        self.stash_capacity = Some(capacity);
        self
    }

    pub fn mailbox(&self) -> &MailboxType {
        &self.mailbox
    }

    pub fn supervisor_strategy(&self) -> Option<&SupervisorStrategy> {
        self.supervisor_strategy.as_ref()
    }

    pub fn stash_capacity(&self) -> Option<usize> {
        self.stash_capacity
    }

    /// Builds a new instance. A panicking factory becomes an error.
    pub(crate) fn produce(&self) -> Result<A, Error> {
        catch_unwind(AssertUnwindSafe(|| (self.factory)()))
            .map_err(|panic| Error::Create(panic_message(panic.as_ref())))
    }
}

impl<A: Actor> Clone for Props<A> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            mailbox: self.mailbox.clone(),
            supervisor_strategy: self.supervisor_strategy.clone(),
            stash_capacity: self.stash_capacity,
        }
    }
}

impl<A: Actor + Default> Default for Props<A> {
    fn default() -> Self {
        Props::new(A::default)
    }
}

/// Best effort rendering of a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
