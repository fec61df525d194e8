// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # At-least-once delivery
//!
//! [`AtLeastOnceDelivery`] is owned by a persistent actor. It resends every
//! delivered message until the actor confirms it, and its state can be
//! rebuilt during recovery by calling `deliver` and `confirm_delivery`
//! from the event handlers. While recovery runs nothing is sent; the
//! deliveries left unconfirmed are sent as soon as recovery completes.
//!

use crate::{
    error::Error,
    eventsourced::{PersistentActor, PersistentContext},
    settings::AtLeastOnceDeliverySettings,
};

use actor::{ActorRef, AnyMessage, Cancelable, Message, SystemRef};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use std::{collections::BTreeMap, time::Instant};

/// Self-addressed tick triggering redelivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedeliveryTick;

impl Message for RedeliveryTick {}

#[derive(Clone, Debug)]
pub struct UnconfirmedDelivery<M> {
    pub delivery_id: i64,
    pub destination: ActorRef,
    pub message: M,
}

/// Sent to the actor itself, once per delivery, when a delivery reached
/// `warn_after_number_of_unconfirmed_attempts`.
#[derive(Clone, Debug)]
pub struct UnconfirmedWarning<M> {
    pub unconfirmed: Vec<UnconfirmedDelivery<M>>,
}

impl<M: Message> Message for UnconfirmedWarning<M> {}

/// Serializable entry of an [`AtLeastOnceDeliverySnapshot`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnconfirmedDeliverySnapshot<M> {
    pub delivery_id: i64,
    pub destination_path: String,
    pub message: M,
}

/// State of an [`AtLeastOnceDelivery`], to be stored in a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AtLeastOnceDeliverySnapshot<M> {
    pub current_delivery_id: i64,
    pub unconfirmed_deliveries: Vec<UnconfirmedDeliverySnapshot<M>>,
}

impl<M: Message> Message for AtLeastOnceDeliverySnapshot<M> {}

struct Delivery<M> {
    destination: ActorRef,
    message: M,
    /// `None` until the first send, which makes the delivery overdue.
    sent_at: Option<Instant>,
    attempt: u32,
}

pub struct AtLeastOnceDelivery<M: Message + Clone> {
    settings: AtLeastOnceDeliverySettings,
    delivery_sequence_nr: i64,
    unconfirmed: BTreeMap<i64, Delivery<M>>,
    redelivery: Option<Cancelable>,
}

// The cell survives a restart, so the repeating job would outlive the
// instance that scheduled it.
impl<M: Message + Clone> Drop for AtLeastOnceDelivery<M> {
    fn drop(&mut self) {
        if let Some(redelivery) = self.redelivery.take() {
            redelivery.cancel();
        }
    }
}

impl<M: Message + Clone> Default for AtLeastOnceDelivery<M> {
    fn default() -> Self {
        Self::new(AtLeastOnceDeliverySettings::default())
    }
}

impl<M: Message + Clone> AtLeastOnceDelivery<M> {
    pub fn new(settings: AtLeastOnceDeliverySettings) -> Self {
        Self {
            settings,
            delivery_sequence_nr: 0,
            unconfirmed: BTreeMap::new(),
            redelivery: None,
        }
    }

    pub fn settings(&self) -> &AtLeastOnceDeliverySettings {
        &self.settings
    }

    /// Sends the message built from the next delivery id to `destination`
    /// and keeps resending it until it is confirmed.
    pub fn deliver<P, F>(
        &mut self,
        destination: &ActorRef,
        message: F,
        ctx: &mut PersistentContext<'_, P>,
    ) -> Result<i64, Error>
    where
        P: PersistentActor,
        F: FnOnce(i64) -> M,
    {
        let max = self.settings.max_unconfirmed_messages;
        if self.unconfirmed.len() >= max {
            return Err(Error::MaxUnconfirmedMessagesExceeded(max));
        }
        self.start_redelivery(ctx);
        self.delivery_sequence_nr += 1;
        let delivery_id = self.delivery_sequence_nr;
        let mut delivery = Delivery {
            destination: destination.clone(),
            message: message(delivery_id),
            sent_at: None,
            attempt: 0,
        };
        if !ctx.recovery_running() {
            Self::send(&mut delivery, ctx.myself());
        }
        self.unconfirmed.insert(delivery_id, delivery);
        Ok(delivery_id)
    }

    /// Stops resending `delivery_id`. `false` if it was not pending.
    pub fn confirm_delivery(&mut self, delivery_id: i64) -> bool {
        let confirmed = self.unconfirmed.remove(&delivery_id).is_some();
        if self.unconfirmed.is_empty() {
            if let Some(redelivery) = self.redelivery.take() {
                redelivery.cancel();
            }
        }
        confirmed
    }

    pub fn number_of_unconfirmed(&self) -> usize {
        self.unconfirmed.len()
    }

    /// Handles a [`RedeliveryTick`]. `false` leaves `message` to the
    /// caller.
    pub fn handle_tick<P: PersistentActor>(
        &mut self,
        message: &AnyMessage,
        ctx: &mut PersistentContext<'_, P>,
    ) -> bool {
        if message.is::<RedeliveryTick>() {
            self.redeliver_overdue(ctx);
            true
        } else {
            false
        }
    }

    /// Sends the deliveries held back while recovery ran. Call it on
    /// `RecoveryCompleted`.
    pub fn on_recovery_completed<P: PersistentActor>(
        &mut self,
        ctx: &mut PersistentContext<'_, P>,
    ) {
        self.redeliver_overdue(ctx);
    }

    pub fn get_delivery_snapshot(&self) -> AtLeastOnceDeliverySnapshot<M> {
        AtLeastOnceDeliverySnapshot {
            current_delivery_id: self.delivery_sequence_nr,
            unconfirmed_deliveries: self
                .unconfirmed
                .iter()
                .map(|(delivery_id, delivery)| UnconfirmedDeliverySnapshot {
                    delivery_id: *delivery_id,
                    destination_path: delivery.destination.path().to_string(),
                    message: delivery.message.clone(),
                })
                .collect(),
        }
    }

    /// Replaces the state with `snapshot`. Destinations are resolved by
    /// path, so a restarted destination gets the redeliveries. Every
    /// restored delivery is overdue.
    pub fn set_delivery_snapshot(
        &mut self,
        snapshot: AtLeastOnceDeliverySnapshot<M>,
        system: &SystemRef,
    ) {
        self.delivery_sequence_nr = snapshot.current_delivery_id;
        self.unconfirmed = snapshot
            .unconfirmed_deliveries
            .into_iter()
            .map(|entry| {
                (
                    entry.delivery_id,
                    Delivery {
                        destination: system.lookup(&entry.destination_path),
                        message: entry.message,
                        sent_at: None,
                        attempt: 0,
                    },
                )
            })
            .collect();
    }

    fn start_redelivery<P: PersistentActor>(&mut self, ctx: &mut PersistentContext<'_, P>) {
        if self.redelivery.is_some() {
            return;
        }
        let interval = self.settings.redeliver_interval / 2;
        let myself = ctx.myself().clone();
        self.redelivery = Some(ctx.actor_context().schedule_repeatedly(
            interval,
            interval,
            &myself,
            RedeliveryTick,
        ));
    }

    fn send(delivery: &mut Delivery<M>, myself: &ActorRef) {
        delivery
            .destination
            .tell(delivery.message.clone(), Some(myself));
        delivery.sent_at = Some(Instant::now());
        delivery.attempt += 1;
    }

    fn redeliver_overdue<P: PersistentActor>(&mut self, ctx: &mut PersistentContext<'_, P>) {
        if ctx.recovery_running() || self.unconfirmed.is_empty() {
            return;
        }
        self.start_redelivery(ctx);
        let interval = self.settings.redeliver_interval;
        let warn_after = self.settings.warn_after_number_of_unconfirmed_attempts;
        let myself = ctx.myself().clone();
        let mut warnings = Vec::new();
        let mut resent = 0;
        for (delivery_id, delivery) in self
            .unconfirmed
            .iter_mut()
            .filter(|(_, delivery)| {
                delivery
                    .sent_at
                    .map_or(true, |sent_at| sent_at.elapsed() >= interval)
            })
            .take(self.settings.redelivery_burst_limit)
        {
            Self::send(delivery, &myself);
            resent += 1;
            if delivery.attempt == warn_after {
                warnings.push(UnconfirmedDelivery {
                    delivery_id: *delivery_id,
                    destination: delivery.destination.clone(),
                    message: delivery.message.clone(),
                });
            }
        }
        if resent > 0 {
            debug!("{} redelivered {} messages.", ctx.persistence_id(), resent);
        }
        if !warnings.is_empty() {
            warn!(
                "{} has {} deliveries without confirmation.",
                ctx.persistence_id(),
                warnings.len()
            );
            myself.tell(
                UnconfirmedWarning {
                    unconfirmed: warnings,
                },
                Some(&myself),
            );
        }
    }
}
