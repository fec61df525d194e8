// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Integration tests for at-least-once delivery

use actor::{
    Actor, ActorContext, ActorRef, ActorSystem, ActorSystemSettings,
    AnyMessage, Error as ActorError, Message, Props, SystemRef,
};
use persistence::{
    AtLeastOnceDelivery, AtLeastOnceDeliverySettings, Error, Eventsourced,
    Persistence, PersistentActor, PersistentContext, RecoveryCompleted,
    RedeliveryTick, UnconfirmedWarning,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

const TIMEOUT: Duration = Duration::from_secs(3);

fn create_system(name: &str) -> SystemRef {
    let (system, mut runner) = ActorSystem::create(
        ActorSystemSettings::named(name),
        CancellationToken::new(),
    )
    .unwrap();
    tokio::spawn(async move { runner.run().await });
    system
}

fn settings(max_unconfirmed_messages: usize) -> AtLeastOnceDeliverySettings {
    AtLeastOnceDeliverySettings {
        redeliver_interval: Duration::from_millis(100),
        warn_after_number_of_unconfirmed_attempts: 2,
        max_unconfirmed_messages,
        ..Default::default()
    }
}

/// Message delivered to the destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_id: i64,
    pub payload: String,
}

impl Message for Delivery {}

#[derive(Debug, Clone)]
pub struct Confirm(pub i64);

impl Message for Confirm {}

#[derive(Debug, Clone)]
pub enum SenderCommand {
    Send(String),
    Unconfirmed,
    Fail,
}

impl Message for SenderCommand {}

#[derive(Debug, Clone, PartialEq)]
pub enum SenderEvent {
    Sent(String),
    Confirmed(i64),
}

impl Message for SenderEvent {}

pub struct Sender {
    destination: ActorRef,
    delivery: AtLeastOnceDelivery<Delivery>,
    log: mpsc::UnboundedSender<String>,
    ticks: Arc<AtomicUsize>,
}

impl Sender {
    fn apply(&mut self, event: &SenderEvent, ctx: &mut PersistentContext<'_, Self>) {
        match event {
            SenderEvent::Sent(payload) => {
                let payload = payload.clone();
                let result = self.delivery.deliver(
                    &self.destination,
                    |delivery_id| Delivery {
                        delivery_id,
                        payload,
                    },
                    ctx,
                );
                if let Err(error) = result {
                    let _ = self.log.send(error.to_string());
                }
            }
            SenderEvent::Confirmed(delivery_id) => {
                self.delivery.confirm_delivery(*delivery_id);
            }
        }
    }
}

#[async_trait]
impl PersistentActor for Sender {
    fn persistence_id(&self) -> String {
        "sender".to_owned()
    }

    async fn receive_recover(
        &mut self,
        message: &AnyMessage,
        ctx: &mut PersistentContext<'_, Self>,
    ) -> Result<(), ActorError> {
        if let Some(event) = message.downcast_ref::<SenderEvent>() {
            self.apply(event, ctx);
        } else if message.is::<RecoveryCompleted>() {
            self.delivery.on_recovery_completed(ctx);
        }
        Ok(())
    }

    async fn receive_command(
        &mut self,
        message: &AnyMessage,
        ctx: &mut PersistentContext<'_, Self>,
    ) -> Result<(), ActorError> {
        if message.is::<RedeliveryTick>() {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
        if self.delivery.handle_tick(message, ctx) {
            return Ok(());
        }
        if let Some(command) = message.downcast_ref::<SenderCommand>() {
            match command {
                SenderCommand::Send(payload) => {
                    ctx.persist(SenderEvent::Sent(payload.clone()), |sender, event, ctx| {
                        sender.apply(event, ctx);
                        Ok(())
                    });
                }
                SenderCommand::Unconfirmed => {
                    ctx.reply(self.delivery.number_of_unconfirmed());
                }
                SenderCommand::Fail => {
                    return Err(ActorError::Functional("sender failed".to_owned()));
                }
            }
        } else if let Some(Confirm(delivery_id)) = message.downcast_ref::<Confirm>() {
            ctx.persist(SenderEvent::Confirmed(*delivery_id), |sender, event, ctx| {
                sender.apply(event, ctx);
                Ok(())
            });
        } else if let Some(warning) = message.downcast_ref::<UnconfirmedWarning<Delivery>>() {
            for unconfirmed in &warning.unconfirmed {
                let _ = self
                    .log
                    .send(format!("unconfirmed:{}", unconfirmed.delivery_id));
            }
        } else {
            return ctx.actor_context().unhandled(message);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Drops the first copy of every delivery, confirms the next one.
    DropFirst,
    /// Never confirms.
    Never,
}

/// Reports every copy it receives and confirms per its mode.
pub struct Destination {
    mode: Mode,
    seen: Vec<i64>,
    received: mpsc::UnboundedSender<Delivery>,
}

#[async_trait]
impl Actor for Destination {
    async fn receive(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), ActorError> {
        let Some(delivery) = message.downcast::<Delivery>() else {
            return ctx.unhandled(message);
        };
        let _ = self.received.send(delivery.clone());
        let first_copy = !self.seen.contains(&delivery.delivery_id);
        self.seen.push(delivery.delivery_id);
        if self.mode == Mode::DropFirst && !first_copy {
            ctx.reply(Confirm(delivery.delivery_id));
        }
        Ok(())
    }
}

struct Fixture {
    system: SystemRef,
    destination: ActorRef,
    received: mpsc::UnboundedReceiver<Delivery>,
}

async fn fixture(name: &str, mode: Mode) -> Fixture {
    let system = create_system(name);
    Persistence::install(&system).await.unwrap();
    let (sender, received) = mpsc::unbounded_channel();
    let destination = system
        .actor_of(
            Props::new(move || Destination {
                mode,
                seen: Vec::new(),
                received: sender.clone(),
            }),
            "destination",
        )
        .unwrap();
    Fixture {
        system,
        destination,
        received,
    }
}

fn spawn_sender(
    fixture: &Fixture,
    name: &str,
    max_unconfirmed_messages: usize,
) -> (ActorRef, mpsc::UnboundedReceiver<String>, Arc<AtomicUsize>) {
    let (log, receiver) = mpsc::unbounded_channel();
    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    let destination = fixture.destination.clone();
    let sender = fixture
        .system
        .actor_of(
            Eventsourced::props(move || Sender {
                destination: destination.clone(),
                delivery: AtLeastOnceDelivery::new(settings(max_unconfirmed_messages)),
                log: log.clone(),
                ticks: counter.clone(),
            }),
            name,
        )
        .unwrap();
    (sender, receiver, ticks)
}

async fn next<T>(receiver: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(TIMEOUT, receiver.recv())
        .await
        .unwrap()
        .unwrap()
}

async fn wait_unconfirmed(sender: &ActorRef, expected: usize) -> bool {
    for _ in 0..100 {
        let unconfirmed: usize = sender
            .ask(SenderCommand::Unconfirmed, TIMEOUT)
            .await
            .unwrap();
        if unconfirmed == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_redelivery_until_confirmed() {
    let mut fixture = fixture("redelivery", Mode::DropFirst).await;
    let (sender, _log, _) = spawn_sender(&fixture, "sender", 100);

    sender.tell(SenderCommand::Send("hello".to_owned()), None);
    let first = next(&mut fixture.received).await;
    assert_eq!(
        first,
        Delivery {
            delivery_id: 1,
            payload: "hello".to_owned()
        }
    );
    // The first copy is dropped; the redelivered one is confirmed.
    let second = next(&mut fixture.received).await;
    assert_eq!(second, first);
    assert!(wait_unconfirmed(&sender, 0).await);
}

#[tokio::test]
async fn test_warning_and_capacity() {
    let mut fixture = fixture("warning", Mode::Never).await;
    let (sender, mut log, _) = spawn_sender(&fixture, "sender", 1);

    sender.tell(SenderCommand::Send("first".to_owned()), None);
    sender.tell(SenderCommand::Send("second".to_owned()), None);
    assert_eq!(
        next(&mut log).await,
        Error::MaxUnconfirmedMessagesExceeded(1).to_string()
    );
    assert_eq!(next(&mut log).await, "unconfirmed:1");
    let copies: Vec<Delivery> = vec![
        next(&mut fixture.received).await,
        next(&mut fixture.received).await,
    ];
    assert!(copies.iter().all(|copy| copy.payload == "first"));
    assert!(wait_unconfirmed(&sender, 1).await);
}

#[tokio::test]
async fn test_unconfirmed_deliveries_survive_restart() {
    let mut fixture = fixture("recovery", Mode::Never).await;
    let (sender, _log, _) = spawn_sender(&fixture, "first", 100);

    sender.tell(SenderCommand::Send("kept".to_owned()), None);
    let delivered = next(&mut fixture.received).await;
    fixture.system.stop(&sender);
    tokio::time::timeout(TIMEOUT, fixture.system.stopped(&sender))
        .await
        .unwrap();
    while fixture.received.try_recv().is_ok() {}

    // Replay rebuilds the pending delivery without sending it twice, then
    // it goes out once recovery completed.
    let (sender, _log, _) = spawn_sender(&fixture, "second", 100);
    let redelivered = next(&mut fixture.received).await;
    assert_eq!(redelivered, delivered);
    assert!(wait_unconfirmed(&sender, 1).await);
}

#[tokio::test]
async fn test_restart_cancels_redelivery() {
    let mut fixture = fixture("restart", Mode::DropFirst).await;
    let (sender, _log, ticks) = spawn_sender(&fixture, "sender", 100);

    sender.tell(SenderCommand::Send("once".to_owned()), None);
    next(&mut fixture.received).await;
    sender.tell(SenderCommand::Fail, None);

    // The restarted instance replays the delivery and sends it again; the
    // destination confirms that second copy.
    next(&mut fixture.received).await;
    assert!(wait_unconfirmed(&sender, 0).await);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let _: usize = sender
        .ask(SenderCommand::Unconfirmed, TIMEOUT)
        .await
        .unwrap();
    let before = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(400)).await;
    let _: usize = sender
        .ask(SenderCommand::Unconfirmed, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(ticks.load(Ordering::SeqCst), before);
}
