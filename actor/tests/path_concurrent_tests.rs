// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Naming, lookup and selection under concurrency.

use actor::{
    Actor, ActorContext, ActorIdentity, ActorSystem, ActorSystemSettings,
    AnyMessage, Error, Identify, Message, Props, SystemRef,
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(2);

fn create_system(name: &str) -> SystemRef {
    let (system, mut runner) = ActorSystem::create(
        ActorSystemSettings::named(name),
        CancellationToken::new(),
    )
    .unwrap();
    tokio::spawn(async move { runner.run().await });
    system
}

#[derive(Debug, Clone)]
pub struct WhoAreYou;

impl Message for WhoAreYou {}

#[derive(Debug, Clone)]
pub struct Count;

impl Message for Count {}

/// Answers with its own name and counts the other messages.
pub struct Named {
    received: u64,
}

#[async_trait]
impl Actor for Named {
    async fn receive(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        if message.is::<WhoAreYou>() {
            ctx.reply(ctx.path().name().to_owned());
        } else if message.is::<Count>() {
            ctx.reply(self.received);
        } else {
            self.received += 1;
        }
        Ok(())
    }
}

pub struct Parent {
    children: Vec<&'static str>,
}

#[async_trait]
impl Actor for Parent {
    async fn pre_start(
        &mut self,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        for name in &self.children {
            ctx.actor_of(Props::new(|| Named { received: 0 }), name)?;
        }
        Ok(())
    }

    async fn receive(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        ctx.unhandled(message)
    }
}

/// Forwards the names it receives to the test.
pub struct Probe {
    sender: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Actor for Probe {
    async fn receive(
        &mut self,
        message: &AnyMessage,
        _ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        if let Some(name) = message.downcast::<String>() {
            let _ = self.sender.send(name);
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_concurrent_creation_with_same_name() {
    let system = create_system("same-name");
    let mut handles = Vec::new();
    for _ in 0..16 {
        let system = system.clone();
        handles.push(tokio::spawn(async move {
            system.actor_of(Props::new(|| Named { received: 0 }), "unique")
        }));
    }
    let mut created = 0;
    let mut exists = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(Error::Exists(path)) => {
                assert_eq!(path.to_string(), "hive://same-name/user/unique");
                exists += 1;
            }
            Err(error) => panic!("Unexpected error: {}", error),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(exists, 15);
}

#[tokio::test]
async fn test_concurrent_creation_with_distinct_names() {
    let system = create_system("distinct");
    let mut handles = Vec::new();
    for index in 0..32 {
        let system = system.clone();
        handles.push(tokio::spawn(async move {
            system.actor_of(
                Props::new(|| Named { received: 0 }),
                &format!("actor-{}", index),
            )
        }));
    }
    let mut uids = Vec::new();
    for handle in handles {
        let actor = handle.await.unwrap().unwrap();
        uids.push(actor.path().uid());
    }
    uids.sort_unstable();
    uids.dedup();
    assert_eq!(uids.len(), 32);

    for index in 0..32 {
        let actor = system.lookup(&format!("/user/actor-{}", index));
        let name: String = actor.ask(WhoAreYou, TIMEOUT).await.unwrap();
        assert_eq!(name, format!("actor-{}", index));
    }
}

#[tokio::test]
async fn test_invalid_names() {
    let system = create_system("names");
    for name in ["", "a/b", "$temp", "with space", "#hash"] {
        let result = system.actor_of(Props::new(|| Named { received: 0 }), name);
        assert_eq!(result, Err(Error::InvalidName(name.to_owned())));
    }
}

#[tokio::test]
async fn test_concurrent_senders() {
    let system = create_system("senders");
    let actor = system
        .actor_of(Props::new(|| Named { received: 0 }), "counter")
        .unwrap();
    let mut handles = Vec::new();
    for _ in 0..10 {
        let actor = actor.clone();
        handles.push(tokio::spawn(async move {
            for value in 0..100u64 {
                actor.tell(value, None);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    let received: u64 = actor.ask(Count, TIMEOUT).await.unwrap();
    assert_eq!(received, 1000);
}

#[tokio::test]
async fn test_selection_with_wildcards() {
    let system = create_system("selection");
    system
        .actor_of(
            Props::new(|| Parent {
                children: vec!["a1", "a2", "b1"],
            }),
            "parent",
        )
        .unwrap();
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let probe = system
        .actor_of(
            Props::new(move || Probe {
                sender: sender.clone(),
            }),
            "probe",
        )
        .unwrap();

    // Children are created in pre_start; wait until the last one answers.
    let b1 = system
        .actor_selection("/user/parent/b1")
        .resolve_one(TIMEOUT)
        .await
        .unwrap();
    assert_eq!(b1.path().name(), "b1");

    system
        .actor_selection("/user/parent/a*")
        .tell(WhoAreYou, Some(&probe));
    let mut names = Vec::new();
    for _ in 0..2 {
        let name = tokio::time::timeout(TIMEOUT, receiver.recv())
            .await
            .unwrap()
            .unwrap();
        names.push(name);
    }
    names.sort();
    assert_eq!(names, vec!["a1".to_owned(), "a2".to_owned()]);

    let missing = system
        .actor_selection("/user/parent/zz")
        .resolve_one(Duration::from_millis(200))
        .await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn test_identify_missing_actor() {
    let system = create_system("identify");
    let missing = system.lookup("/user/nobody-here");
    assert!(missing.is_terminated());
    let identity: ActorIdentity = missing.ask(Identify(7), TIMEOUT).await.unwrap();
    assert_eq!(identity.message_id, 7);
    assert!(identity.subject.is_none());

    let actor = system
        .actor_of(Props::new(|| Named { received: 0 }), "here")
        .unwrap();
    let identity: ActorIdentity = actor.ask(Identify(8), TIMEOUT).await.unwrap();
    assert_eq!(identity.subject, Some(actor.clone()));

    // A stale uid does not resolve to the live incarnation.
    let stale = system.resolve(&actor.path().with_uid(actor.path().uid() + 1000));
    assert!(stale.is_terminated());
}

#[tokio::test]
async fn test_creation_racing_termination_leaves_no_orphans() {
    let system = create_system("racing");
    let mut handles = Vec::new();
    for index in 0..64 {
        let system = system.clone();
        handles.push(tokio::spawn(async move {
            if index == 32 {
                system.terminate();
            }
            system
                .actor_of(
                    Props::new(|| Named { received: 0 }),
                    &format!("late-{}", index),
                )
                .ok()
        }));
    }
    let mut created = Vec::new();
    for handle in handles {
        if let Some(actor) = handle.await.unwrap() {
            created.push(actor);
        }
    }
    tokio::time::timeout(TIMEOUT, system.when_terminated())
        .await
        .unwrap();
    for actor in created {
        tokio::time::timeout(TIMEOUT, system.stopped(&actor))
            .await
            .unwrap();
        assert!(actor.is_terminated());
    }
}
