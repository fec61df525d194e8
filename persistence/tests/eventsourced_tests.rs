// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Integration tests for eventsourced actors

use actor::{
    ActorRef, ActorSystem, ActorSystemSettings, AnyMessage, Error as ActorError,
    Message, SystemRef,
};
use persistence::{
    DeleteMessagesSuccess, Error, Eventsourced, InMemoryJournal,
    InMemorySnapshotStore, Persistence, PersistenceSettings, PersistentActor,
    PersistentContext, Recovery, RecoveryCompleted, SaveSnapshotSuccess,
    SnapshotOffer, WriteMessagesFailed, WriteMessagesSuccessful,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use std::time::Duration;

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

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    Created,
    Renamed(String),
    Tagged(String),
}

impl Message for DocumentEvent {}

#[derive(Debug, Clone)]
pub enum DocumentCommand {
    Create,
    Rename(String),
    Tag(Vec<String>),
    TagAsync(Vec<String>),
    Snapshot,
    DeleteUpTo(i64),
    Get,
}

impl Message for DocumentCommand {}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    name: Option<String>,
    tags: Vec<String>,
}

impl Message for DocumentSnapshot {}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentState {
    name: Option<String>,
    tags: Vec<String>,
    replayed: usize,
    recovered: bool,
    last_sequence_nr: i64,
    snapshot_sequence_nr: i64,
}

impl Message for DocumentState {}

pub struct Document {
    id: String,
    name: Option<String>,
    tags: Vec<String>,
    replayed: usize,
    recovered: bool,
    recovery: Recovery,
    log: mpsc::UnboundedSender<String>,
}

impl Document {
    fn new(id: &str, log: mpsc::UnboundedSender<String>) -> Self {
        Self {
            id: id.to_owned(),
            name: None,
            tags: Vec::new(),
            replayed: 0,
            recovered: false,
            recovery: Recovery::default(),
            log,
        }
    }

    fn apply(&mut self, event: &DocumentEvent) {
        match event {
            DocumentEvent::Created => self.name = Some("untitled".to_owned()),
            DocumentEvent::Renamed(name) => self.name = Some(name.clone()),
            DocumentEvent::Tagged(tag) => self.tags.push(tag.clone()),
        }
    }

    fn log(&self, entry: String) {
        let _ = self.log.send(entry);
    }
}

#[async_trait]
impl PersistentActor for Document {
    fn persistence_id(&self) -> String {
        self.id.clone()
    }

    fn recovery(&self) -> Recovery {
        self.recovery.clone()
    }

    async fn receive_recover(
        &mut self,
        message: &AnyMessage,
        _ctx: &mut PersistentContext<'_, Self>,
    ) -> Result<(), ActorError> {
        if let Some(offer) = message.downcast_ref::<SnapshotOffer>() {
            if let Some(snapshot) = offer.snapshot.downcast::<DocumentSnapshot>() {
                self.name = snapshot.name;
                self.tags = snapshot.tags;
            }
            self.log(format!("offer:{}", offer.metadata.sequence_nr));
        } else if let Some(event) = message.downcast_ref::<DocumentEvent>() {
            self.replayed += 1;
            self.apply(event);
        } else if message.is::<RecoveryCompleted>() {
            self.recovered = true;
            self.log("recovered".to_owned());
        }
        Ok(())
    }

    async fn receive_command(
        &mut self,
        message: &AnyMessage,
        ctx: &mut PersistentContext<'_, Self>,
    ) -> Result<(), ActorError> {
        if let Some(command) = message.downcast_ref::<DocumentCommand>() {
            match command {
                DocumentCommand::Create => {
                    ctx.persist(DocumentEvent::Created, |document, event, ctx| {
                        document.apply(event);
                        ctx.reply(ctx.last_sequence_nr());
                        Ok(())
                    });
                }
                DocumentCommand::Rename(name) => {
                    ctx.persist(
                        DocumentEvent::Renamed(name.clone()),
                        |document, event, ctx| {
                            document.apply(event);
                            ctx.reply(ctx.last_sequence_nr());
                            Ok(())
                        },
                    );
                }
                DocumentCommand::Tag(tags) => {
                    let events: Vec<DocumentEvent> =
                        tags.iter().cloned().map(DocumentEvent::Tagged).collect();
                    ctx.persist_all(events, |document, event, _ctx| {
                        document.apply(event);
                        Ok(())
                    });
                    ctx.defer_async((), |document, _, ctx| {
                        ctx.reply(document.tags.clone());
                        Ok(())
                    });
                }
                DocumentCommand::TagAsync(tags) => {
                    let events: Vec<DocumentEvent> =
                        tags.iter().cloned().map(DocumentEvent::Tagged).collect();
                    ctx.persist_all_async(events, |document, event, _ctx| {
                        document.apply(event);
                        if let DocumentEvent::Tagged(tag) = event {
                            document.log(format!("tagged:{}", tag));
                        }
                        Ok(())
                    });
                    ctx.defer_async((), |document, _, ctx| {
                        document.log("deferred".to_owned());
                        ctx.reply(document.tags.clone());
                        Ok(())
                    });
                }
                DocumentCommand::Snapshot => {
                    ctx.save_snapshot(DocumentSnapshot {
                        name: self.name.clone(),
                        tags: self.tags.clone(),
                    });
                }
                DocumentCommand::DeleteUpTo(to_sequence_nr) => {
                    ctx.delete_messages(*to_sequence_nr);
                }
                DocumentCommand::Get => {
                    self.log("command".to_owned());
                    ctx.reply(DocumentState {
                        name: self.name.clone(),
                        tags: self.tags.clone(),
                        replayed: self.replayed,
                        recovered: self.recovered,
                        last_sequence_nr: ctx.last_sequence_nr(),
                        snapshot_sequence_nr: ctx.snapshot_sequence_nr(),
                    });
                }
            }
            Ok(())
        } else if let Some(success) = message.downcast_ref::<SaveSnapshotSuccess>() {
            self.log(format!("snapshot:{}", success.metadata.sequence_nr));
            Ok(())
        } else if let Some(success) = message.downcast_ref::<DeleteMessagesSuccess>() {
            self.log(format!("deleted:{}", success.to_sequence_nr));
            Ok(())
        } else {
            ctx.actor_context().unhandled(message)
        }
    }

    async fn on_persist_rejected(
        &mut self,
        _cause: &Error,
        _event: &AnyMessage,
        sequence_nr: i64,
        _ctx: &mut PersistentContext<'_, Self>,
    ) {
        self.log(format!("rejected:{}", sequence_nr));
    }

    async fn on_persist_failure(
        &mut self,
        _cause: &Error,
        _event: &AnyMessage,
        sequence_nr: i64,
        _ctx: &mut PersistentContext<'_, Self>,
    ) {
        self.log(format!("failed:{}", sequence_nr));
    }
}

fn spawn_document(
    system: &SystemRef,
    name: &str,
    id: &'static str,
    recovery: Recovery,
) -> (ActorRef, mpsc::UnboundedReceiver<String>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let document = system
        .actor_of(
            Eventsourced::props(move || {
                let mut document = Document::new(id, sender.clone());
                document.recovery = recovery.clone();
                document
            }),
            name,
        )
        .unwrap();
    (document, receiver)
}

async fn expect_log(receiver: &mut mpsc::UnboundedReceiver<String>, expected: &str) {
    loop {
        let entry = tokio::time::timeout(TIMEOUT, receiver.recv())
            .await
            .unwrap()
            .unwrap();
        if entry == expected {
            return;
        }
    }
}

async fn stop(system: &SystemRef, actor: &ActorRef) {
    system.stop(actor);
    tokio::time::timeout(TIMEOUT, system.stopped(actor))
        .await
        .unwrap();
}

#[tokio::test]
#[traced_test]
async fn test_recovery_replays_events() {
    let system = create_system("recovery");
    Persistence::install(&system).await.unwrap();

    let (document, _log) = spawn_document(&system, "first", "doc-1", Recovery::default());
    let sequence_nr: i64 = document.ask(DocumentCommand::Create, TIMEOUT).await.unwrap();
    assert_eq!(sequence_nr, 1);
    let sequence_nr: i64 = document
        .ask(DocumentCommand::Rename("foo".to_owned()), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(sequence_nr, 2);
    stop(&system, &document).await;

    let (document, mut log) =
        spawn_document(&system, "second", "doc-1", Recovery::default());
    // Sent while recovery is still running.
    let state: DocumentState = document.ask(DocumentCommand::Get, TIMEOUT).await.unwrap();
    assert_eq!(state.name, Some("foo".to_owned()));
    assert_eq!(state.last_sequence_nr, 2);
    assert_eq!(state.replayed, 2);
    assert!(state.recovered);
    assert_eq!(log.recv().await.unwrap(), "recovered");
    assert_eq!(log.recv().await.unwrap(), "command");

    // A third incarnation reaches the same state.
    stop(&system, &document).await;
    let (document, _log) = spawn_document(&system, "third", "doc-1", Recovery::default());
    let again: DocumentState = document.ask(DocumentCommand::Get, TIMEOUT).await.unwrap();
    assert_eq!(again, state);
    assert!(logs_contain("Recovery of doc-1 completed at 2."));
}

#[tokio::test]
async fn test_commands_wait_for_persist_handlers() {
    let system = create_system("stashing");
    Persistence::install(&system).await.unwrap();
    let (document, _log) = spawn_document(&system, "doc", "doc-2", Recovery::default());

    let tags = vec!["a".to_owned(), "b".to_owned(), "c".to_owned()];
    document.tell(DocumentCommand::Tag(tags.clone()), None);
    let state: DocumentState = document.ask(DocumentCommand::Get, TIMEOUT).await.unwrap();
    assert_eq!(state.tags, tags);
    assert_eq!(state.last_sequence_nr, 3);

    let replied: Vec<String> = document
        .ask(DocumentCommand::Tag(vec!["d".to_owned()]), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(replied.len(), 4);
    assert_eq!(replied.last(), Some(&"d".to_owned()));
}

#[tokio::test]
async fn test_persist_async_runs_handlers_in_order() {
    let system = create_system("async");
    Persistence::install(&system).await.unwrap();
    let (document, mut log) = spawn_document(&system, "doc", "doc-3", Recovery::default());
    expect_log(&mut log, "recovered").await;

    let tags: Vec<String> = document
        .ask(
            DocumentCommand::TagAsync(vec!["x".to_owned(), "y".to_owned()]),
            TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(tags, vec!["x".to_owned(), "y".to_owned()]);
    assert_eq!(log.recv().await.unwrap(), "tagged:x");
    assert_eq!(log.recv().await.unwrap(), "tagged:y");
    assert_eq!(log.recv().await.unwrap(), "deferred");
}

#[tokio::test]
async fn test_snapshot_recovery() {
    let system = create_system("snapshot");
    Persistence::install(&system).await.unwrap();
    let (document, mut log) = spawn_document(&system, "first", "doc-4", Recovery::default());

    for name in ["a", "b"] {
        let _: i64 = document
            .ask(DocumentCommand::Rename(name.to_owned()), TIMEOUT)
            .await
            .unwrap();
    }
    document.tell(DocumentCommand::Snapshot, None);
    expect_log(&mut log, "snapshot:2").await;
    let _: i64 = document
        .ask(DocumentCommand::Rename("c".to_owned()), TIMEOUT)
        .await
        .unwrap();
    stop(&system, &document).await;

    let (document, mut log) = spawn_document(&system, "second", "doc-4", Recovery::default());
    let state: DocumentState = document.ask(DocumentCommand::Get, TIMEOUT).await.unwrap();
    assert_eq!(state.name, Some("c".to_owned()));
    assert_eq!(state.replayed, 1);
    assert_eq!(state.last_sequence_nr, 3);
    assert_eq!(state.snapshot_sequence_nr, 2);
    assert_eq!(log.recv().await.unwrap(), "offer:2");
}

#[tokio::test]
async fn test_deleted_events_are_not_replayed() {
    let system = create_system("delete");
    Persistence::install(&system).await.unwrap();
    let (document, mut log) = spawn_document(&system, "first", "doc-5", Recovery::default());

    let _: i64 = document.ask(DocumentCommand::Create, TIMEOUT).await.unwrap();
    for name in ["a", "b"] {
        let _: i64 = document
            .ask(DocumentCommand::Rename(name.to_owned()), TIMEOUT)
            .await
            .unwrap();
    }
    document.tell(DocumentCommand::DeleteUpTo(2), None);
    expect_log(&mut log, "deleted:2").await;
    stop(&system, &document).await;

    let (document, _log) = spawn_document(&system, "second", "doc-5", Recovery::default());
    let state: DocumentState = document.ask(DocumentCommand::Get, TIMEOUT).await.unwrap();
    assert_eq!(state.replayed, 1);
    assert_eq!(state.name, Some("b".to_owned()));
    // The highest sequence number survives the deletion.
    assert_eq!(state.last_sequence_nr, 3);
    let sequence_nr: i64 = document.ask(DocumentCommand::Create, TIMEOUT).await.unwrap();
    assert_eq!(sequence_nr, 4);
}

#[tokio::test]
async fn test_recovery_none_skips_replay() {
    let system = create_system("no-recovery");
    Persistence::install(&system).await.unwrap();
    let (document, _log) = spawn_document(&system, "first", "doc-6", Recovery::default());
    let _: i64 = document.ask(DocumentCommand::Create, TIMEOUT).await.unwrap();
    let _: i64 = document
        .ask(DocumentCommand::Rename("kept".to_owned()), TIMEOUT)
        .await
        .unwrap();
    stop(&system, &document).await;

    let (document, _log) = spawn_document(&system, "second", "doc-6", Recovery::none());
    let state: DocumentState = document.ask(DocumentCommand::Get, TIMEOUT).await.unwrap();
    assert_eq!(state.name, None);
    assert_eq!(state.replayed, 0);
    assert!(state.recovered);
    assert_eq!(state.last_sequence_nr, 2);
}

#[tokio::test]
async fn test_rejected_event_keeps_actor_running() {
    let system = create_system("rejection");
    Persistence::install_with(
        &system,
        PersistenceSettings::default(),
        || {
            InMemoryJournal::new().with_rejection(|repr| {
                (repr.payload.downcast_ref::<DocumentEvent>()
                    == Some(&DocumentEvent::Renamed("bad".to_owned())))
                .then(|| "payload refused".to_owned())
            })
        },
        InMemorySnapshotStore::new,
    )
    .await
    .unwrap();
    let (document, mut log) = spawn_document(&system, "doc", "doc-7", Recovery::default());

    document.tell(DocumentCommand::Rename("bad".to_owned()), None);
    expect_log(&mut log, "rejected:1").await;
    let sequence_nr: i64 = document
        .ask(DocumentCommand::Rename("good".to_owned()), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(sequence_nr, 2);
    let state: DocumentState = document.ask(DocumentCommand::Get, TIMEOUT).await.unwrap();
    assert_eq!(state.name, Some("good".to_owned()));
}

#[tokio::test]
#[traced_test]
async fn test_write_failure_stops_actor() {
    let system = create_system("failure");
    Persistence::install_with(
        &system,
        PersistenceSettings::default(),
        || {
            InMemoryJournal::new().with_failure(|repr| {
                (repr.payload.downcast_ref::<DocumentEvent>()
                    == Some(&DocumentEvent::Renamed("boom".to_owned())))
                .then(|| "disk full".to_owned())
            })
        },
        InMemorySnapshotStore::new,
    )
    .await
    .unwrap();
    let (document, mut log) = spawn_document(&system, "doc", "doc-8", Recovery::default());

    let sequence_nr: i64 = document.ask(DocumentCommand::Create, TIMEOUT).await.unwrap();
    assert_eq!(sequence_nr, 1);
    document.tell(DocumentCommand::Rename("boom".to_owned()), None);
    expect_log(&mut log, "failed:2").await;
    tokio::time::timeout(TIMEOUT, system.stopped(&document))
        .await
        .unwrap();
    assert!(logs_contain("Journal write failed: Journal error: disk full"));
}

#[tokio::test]
async fn test_missing_extension_fails_start() {
    let system = create_system("not-installed");
    let (document, _log) = spawn_document(&system, "doc", "doc-9", Recovery::default());
    // The user guardian stops actors failing in their start hook.
    tokio::time::timeout(TIMEOUT, system.stopped(&document))
        .await
        .unwrap();
    assert!(matches!(
        Persistence::get(&system).await,
        Err(Error::NotInstalled)
    ));
}

#[tokio::test]
#[traced_test]
async fn test_batch_replies_of_other_incarnations_are_ignored() {
    let system = create_system("stale-batch");
    Persistence::install(&system).await.unwrap();
    let (document, _log) =
        spawn_document(&system, "doc", "doc-stale", Recovery::default());

    // Arrives during recovery and is handled after it.
    document.tell(
        WriteMessagesSuccessful {
            actor_instance_id: u64::MAX,
        },
        None,
    );
    let sequence_nr: i64 = document.ask(DocumentCommand::Create, TIMEOUT).await.unwrap();
    assert_eq!(sequence_nr, 1);

    document.tell(
        WriteMessagesFailed {
            cause: Error::Journal("old".to_owned()),
            actor_instance_id: u64::MAX,
        },
        None,
    );
    let sequence_nr: i64 = document
        .ask(DocumentCommand::Rename("bar".to_owned()), TIMEOUT)
        .await
        .unwrap();
    assert_eq!(sequence_nr, 2);
    let state: DocumentState = document.ask(DocumentCommand::Get, TIMEOUT).await.unwrap();
    assert_eq!(state.name, Some("bar".to_owned()));
    assert!(logs_contain(
        "doc-stale ignores a journal reply of a previous incarnation."
    ));
}
