// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Supervision
//!
//! A parent answers every `Failed` report of a child with a [`Directive`].
//! The decision combines a per-child sliding window of failures with a
//! decider function.
//!

use crate::{ActorRef, Error};

use tracing::{error, warn};

use std::{
    collections::VecDeque,
    fmt::{self, Debug, Formatter},
    sync::Arc,
    time::{Duration, Instant},
};

/// Decision taken by a supervisor for a failed child.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Directive {
    /// Keep the current instance and its state.
    Resume,
    /// Replace the instance, keeping identity and mailbox.
    Restart,
    /// Stop the child.
    Stop,
    /// Fail the supervisor itself with the same cause.
    Escalate,
}

/// Maps a failure cause to a directive.
pub type Decider = Arc<dyn Fn(&Error) -> Directive + Send + Sync>;

/// Which children a directive applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    /// Only the failing child.
    OneForOne,
    /// Every child of the supervisor.
    AllForOne,
}

/// Failure handling policy of a supervisor.
#[derive(Clone)]
pub struct SupervisorStrategy {
    kind: StrategyKind,
    max_retries: Option<u32>,
    window: Option<Duration>,
    decider: Decider,
}

impl SupervisorStrategy {
    /// Strategy applying directives to the failing child only.
    ///
    /// `max_retries: None` never forces a stop; `window: None` counts every
    /// failure since the child was created.
    pub fn one_for_one<F>(
        max_retries: Option<u32>,
        window: Option<Duration>,
        decider: F,
    ) -> Self
    where
        F: Fn(&Error) -> Directive + Send + Sync + 'static,
    {
        Self {
            kind: StrategyKind::OneForOne,
            max_retries,
            window,
            decider: Arc::new(decider),
        }
    }

    /// Strategy applying directives to all the children of the supervisor.
    pub fn all_for_one<F>(
        max_retries: Option<u32>,
        window: Option<Duration>,
        decider: F,
    ) -> Self
    where
        F: Fn(&Error) -> Directive + Send + Sync + 'static,
    {
        Self {
            kind: StrategyKind::AllForOne,
            max_retries,
            window,
            decider: Arc::new(decider),
        }
    }

    /// Stops every failing child.
    pub fn stopping() -> Self {
        Self::one_for_one(None, None, |_| Directive::Stop)
    }

    /// Stop on initialization, kill and death-pact failures, restart on
    /// anything else.
    pub fn default_decider(cause: &Error) -> Directive {
        match cause {
            Error::ActorInitialization { .. }
            | Error::ActorKilled(_)
            | Error::DeathPact(_) => Directive::Stop,
            _ => Directive::Restart,
        }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    /// Directive chosen by the decider alone. A killed actor can not be
    /// resumed, so `Resume` becomes `Restart` for kill failures.
    pub fn decide(&self, cause: &Error) -> Directive {
        match (self.decider)(cause) {
            Directive::Resume if cause.is_kill() => Directive::Restart,
            directive => directive,
        }
    }

    /// Records the failure and returns the directive to enforce. Going over
    /// the retry ceiling inside the window always yields `Stop`.
    pub fn handle(
        &self,
        child: &ActorRef,
        cause: &Error,
        stats: &mut ChildRestartStats,
    ) -> Directive {
        let failures = stats.record(Instant::now(), self.max_retries, self.window);
        let directive = match self.max_retries {
            Some(max_retries) if failures > max_retries as usize => {
                Directive::Stop
            }
            _ => self.decide(cause),
        };
        match directive {
            Directive::Resume => {
                warn!("Resuming child {:?} after failure: {}", child, cause);
            }
            Directive::Restart => {
                error!("Restarting child {:?} after failure: {}", child, cause);
            }
            Directive::Stop => {
                error!("Stopping child {:?} after failure: {}", child, cause);
            }
            Directive::Escalate => {}
        }
        directive
    }
}

impl Default for SupervisorStrategy {
    fn default() -> Self {
        Self::one_for_one(None, None, Self::default_decider)
    }
}

impl Debug for SupervisorStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorStrategy")
            .field("kind", &self.kind)
            .field("max_retries", &self.max_retries)
            .field("window", &self.window)
            .finish()
    }
}

/// Failure timestamps of one child.
#[derive(Debug, Default)]
pub struct ChildRestartStats {
    failures: VecDeque<Instant>,
}

impl ChildRestartStats {
    /// Appends a failure at `now`, prunes the ones outside `window` and
    /// returns how many remain. Nothing is kept without a retry ceiling, and
    /// never more than `max_retries + 1` entries.
    pub fn record(
        &mut self,
        now: Instant,
        max_retries: Option<u32>,
        window: Option<Duration>,
    ) -> usize {
        let Some(max_retries) = max_retries else {
            self.failures.clear();
            return 0;
        };
        self.failures.push_back(now);
        if let Some(window) = window {
            while let Some(first) = self.failures.front() {
                if now.duration_since(*first) > window {
                    self.failures.pop_front();
                } else {
                    break;
                }
            }
        }
        while self.failures.len() > max_retries as usize + 1 {
            self.failures.pop_front();
        }
        self.failures.len()
    }

    pub fn failures(&self) -> usize {
        self.failures.len()
    }
}
