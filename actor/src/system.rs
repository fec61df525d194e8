// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor system
//!
//! The `system` module provides the `ActorSystem` type. The `ActorSystem`
//! builds the guardian hierarchy (`/`, `/user`, `/system`) plus the virtual
//! `/temp` and `/deadLetters` entries, and hands back a [`SystemRef`] used
//! to create, find and stop actors.
//!

use crate::{
    Actor, ActorContext, ActorPath, ActorRef, AnyMessage, Error, EventStream,
    Message, Props, SupervisorStrategy,
    actor_ref::{DeadLetterActorRef, EmptyLocalActorRef, VirtualPathContainer},
    cell::spawn_actor,
    path::Address,
    scheduler::{Scheduler, TokioScheduler},
    selection::ActorSelection,
    settings::ActorSystemSettings,
    sink::Sink,
    system_message::SystemMessage,
};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use tracing::debug;

use std::{
    any::Any,
    collections::HashMap,
    str::FromStr,
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// Actor system.
///
pub struct ActorSystem {}

/// Default implementation for `ActorSystem`.
impl ActorSystem {
    /// Create a new actor system. Must be called inside a tokio runtime.
    ///
    /// The system terminates when `terminate` is called on the returned
    /// reference or when `token` is cancelled.
    ///
    /// # Returns
    ///
    /// Returns a tuple with the system reference and the system runner.
    pub fn create(
        settings: ActorSystemSettings,
        token: CancellationToken,
    ) -> Result<(SystemRef, SystemRunner), Error> {
        let (event_sender, event_receiver) = mpsc::channel(100);
        let system = SystemRef::new(settings, event_sender)?;

        let watcher = system.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => watcher.terminate(),
                _ = watcher.when_terminated() => {}
            }
        });

        Ok((system, SystemRunner::new(event_receiver)))
    }
}

/// System event.
///
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// Stop the actor system.
    StopSystem,
}

/// Actor backing the three guardians.
struct Guardian;

#[async_trait]
impl Actor for Guardian {
    async fn receive(
        &mut self,
        message: &AnyMessage,
        ctx: &mut ActorContext<Self>,
    ) -> Result<(), Error> {
        ctx.unhandled(message)
    }
}

struct Guardians {
    root: ActorRef,
    user: ActorRef,
    system: ActorRef,
}

pub(crate) struct SystemInner {
    settings: ActorSystemSettings,
    address: Address,
    event_stream: EventStream,
    scheduler: Arc<dyn Scheduler>,
    dead_letters: ActorRef,
    temp: Arc<VirtualPathContainer>,
    temp_ref: ActorRef,
    guardians: OnceLock<Guardians>,
    /// The helpers for this actor system.
    helpers: RwLock<HashMap<String, Box<dyn Any + Send + Sync + 'static>>>,
    temp_names: AtomicU64,
    terminating: AtomicBool,
    terminated: CancellationToken,
    event_sender: mpsc::Sender<SystemEvent>,
}

/// System reference.
///
#[derive(Clone)]
pub struct SystemRef {
    inner: Arc<SystemInner>,
}

/// Non-owning handle kept by actor references.
#[derive(Clone, Default)]
pub(crate) struct WeakSystemRef {
    inner: Weak<SystemInner>,
}

impl WeakSystemRef {
    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn upgrade(&self) -> Option<SystemRef> {
        self.inner.upgrade().map(|inner| SystemRef { inner })
    }
}

impl SystemRef {
    fn new(
        settings: ActorSystemSettings,
        event_sender: mpsc::Sender<SystemEvent>,
    ) -> Result<Self, Error> {
        let address = Address::local(&settings.name);
        let root_path = ActorPath::root_of(address.clone());
        let event_stream = EventStream::new(settings.event_stream_capacity);
        let terminated = CancellationToken::new();
        let scheduler: Arc<dyn Scheduler> =
            Arc::new(TokioScheduler::new(terminated.clone()));

        let inner = Arc::new_cyclic(|weak: &Weak<SystemInner>| {
            let weak = WeakSystemRef {
                inner: weak.clone(),
            };
            let dead_letters =
                ActorRef::from_backend(Arc::new(DeadLetterActorRef::new(
                    &root_path / "deadLetters",
                    event_stream.clone(),
                    weak.clone(),
                )));
            let temp = Arc::new(VirtualPathContainer::new(
                &root_path / "temp",
                event_stream.clone(),
                weak,
            ));
            let temp_ref = ActorRef::from_backend(temp.clone());
            SystemInner {
                settings,
                address,
                event_stream,
                scheduler,
                dead_letters,
                temp,
                temp_ref,
                guardians: OnceLock::new(),
                helpers: RwLock::new(HashMap::new()),
                temp_names: AtomicU64::new(0),
                terminating: AtomicBool::new(false),
                terminated,
                event_sender,
            }
        });
        let system = SystemRef { inner };

        let root = spawn_actor(
            &system,
            None,
            "",
            Props::new(|| Guardian)
                .with_supervisor_strategy(SupervisorStrategy::stopping()),
        )?;
        let root_shared = root
            .local()
            .map(|local| local.shared().clone())
            .ok_or_else(|| {
                Error::Start("root guardian is not local".to_owned())
            })?;
        root_shared
            .virtual_children
            .insert("deadLetters".to_owned(), system.inner.dead_letters.clone());
        root_shared
            .virtual_children
            .insert("temp".to_owned(), system.inner.temp_ref.clone());

        let user = spawn_actor(
            &system,
            Some((&root, &root_shared)),
            "user",
            Props::new(|| Guardian),
        )?;
        let system_guardian = spawn_actor(
            &system,
            Some((&root, &root_shared)),
            "system",
            Props::new(|| Guardian),
        )?;
        system
            .inner
            .guardians
            .set(Guardians {
                root,
                user,
                system: system_guardian,
            })
            .map_err(|_| Error::Start("guardians already set".to_owned()))?;
        debug!("Actor system {} created.", system.inner.address);
        Ok(system)
    }

    pub fn name(&self) -> &str {
        &self.inner.settings.name
    }

    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    pub fn settings(&self) -> &ActorSystemSettings {
        &self.inner.settings
    }

    pub fn root_path(&self) -> ActorPath {
        ActorPath::root_of(self.inner.address.clone())
    }

    pub fn event_stream(&self) -> &EventStream {
        &self.inner.event_stream
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    pub fn dead_letters(&self) -> &ActorRef {
        &self.inner.dead_letters
    }

    fn guardian(&self, pick: fn(&Guardians) -> &ActorRef) -> ActorRef {
        self.inner
            .guardians
            .get()
            .map(|guardians| pick(guardians).clone())
            .unwrap_or_else(ActorRef::nobody)
    }

    pub fn root_guardian(&self) -> ActorRef {
        self.guardian(|guardians| &guardians.root)
    }

    /// Parent of every actor created with [`SystemRef::actor_of`].
    pub fn user_guardian(&self) -> ActorRef {
        self.guardian(|guardians| &guardians.user)
    }

    /// Parent of every actor created with [`SystemRef::system_actor_of`].
    pub fn system_guardian(&self) -> ActorRef {
        self.guardian(|guardians| &guardians.system)
    }

    /// Creates a top-level actor under `/user`.
    pub fn actor_of<A: Actor>(
        &self,
        props: Props<A>,
        name: &str,
    ) -> Result<ActorRef, Error> {
        self.spawn_under(&self.user_guardian(), props, name)
    }

    /// Creates an actor under `/system`, used by extensions such as the
    /// persistence plugins.
    pub fn system_actor_of<A: Actor>(
        &self,
        props: Props<A>,
        name: &str,
    ) -> Result<ActorRef, Error> {
        self.spawn_under(&self.system_guardian(), props, name)
    }

    fn spawn_under<A: Actor>(
        &self,
        guardian: &ActorRef,
        props: Props<A>,
        name: &str,
    ) -> Result<ActorRef, Error> {
        if self.is_terminating() {
            return Err(Error::SystemTerminated);
        }
        ActorPath::validate_name(name)?;
        let shared = guardian
            .local()
            .map(|local| local.shared().clone())
            .ok_or(Error::SystemTerminated)?;
        spawn_actor(self, Some((guardian, &shared)), name, props)
    }

    /// Stops `actor` and its subtree. Stopping an actor that is already
    /// gone is a no-op.
    pub fn stop(&self, actor: &ActorRef) {
        if let Some(parent) = actor
            .local()
            .and_then(|local| local.shared().parent.clone())
        {
            if let Some(parent) = parent.local() {
                parent.shared().mark_stopping(actor);
            }
        }
        actor.send_system(SystemMessage::Terminate);
    }

    /// Resolves once `actor` has fully stopped. Returns at once for refs
    /// without a cell.
    pub async fn stopped(&self, actor: &ActorRef) {
        let shared = actor.local().map(|local| local.shared().clone());
        if let Some(shared) = shared {
            shared.stopped().await;
        }
    }

    /// Looks up the actor at `path`. Unknown paths (or a uid naming another
    /// incarnation) yield an empty reference that answers watches and
    /// identifies at once.
    pub fn resolve(&self, path: &ActorPath) -> ActorRef {
        if path.address() != self.address() {
            return self.empty_ref(path);
        }
        let names: Vec<&str> =
            path.elements().iter().map(String::as_str).collect();
        let found = self.root_guardian().get_child(&names);
        if found.is_nobody()
            || (path.uid() != 0 && found.path().uid() != path.uid())
        {
            self.empty_ref(path)
        } else {
            found
        }
    }

    /// Like [`SystemRef::resolve`] for a string. Address-less strings such
    /// as `/user/worker#12` are taken relative to this system.
    pub fn lookup(&self, path: &str) -> ActorRef {
        if path.contains("://") {
            return match ActorPath::from_str(path) {
                Ok(path) => self.resolve(&path),
                Err(_) => ActorRef::nobody(),
            };
        }
        let (without_uid, uid) = ActorPath::split_name_and_uid(path);
        let elements =
            without_uid.split('/').filter(|element| !element.is_empty());
        let path = ActorPath::from_elements(self.address().clone(), elements)
            .with_uid(uid);
        self.resolve(&path)
    }

    fn empty_ref(&self, path: &ActorPath) -> ActorRef {
        ActorRef::from_backend(Arc::new(EmptyLocalActorRef::new(
            path.clone(),
            self.inner.event_stream.clone(),
            self.downgrade(),
        )))
    }

    /// Selection anchored at the root guardian.
    pub fn actor_selection(&self, path: &str) -> ActorSelection {
        let Some(scheme_end) = path.find("://") else {
            return ActorSelection::new(self.root_guardian(), path);
        };
        let authority_start = scheme_end + 3;
        let rest_start = path[authority_start..]
            .find('/')
            .map(|index| index + authority_start)
            .unwrap_or(path.len());
        match Address::from_str(&path[..rest_start]) {
            Ok(address) if address == self.inner.address => {
                ActorSelection::new(self.root_guardian(), &path[rest_start..])
            }
            _ => ActorSelection::new(
                self.empty_ref(&ActorPath::from(path)),
                "",
            ),
        }
    }

    /// Starts the shutdown: `/user` first, then the rest of the tree.
    /// Calling it again is a no-op.
    pub fn terminate(&self) {
        if self.inner.terminating.swap(true, Ordering::AcqRel) {
            return;
        }
        let system = self.clone();
        tokio::spawn(async move {
            debug!("Stopping actor system...");
            let user = system.user_guardian();
            user.send_system(SystemMessage::Terminate);
            system.stopped(&user).await;
            let root = system.root_guardian();
            root.send_system(SystemMessage::Terminate);
            system.stopped(&root).await;
            system.inner.terminated.cancel();
            let _ = system.inner.event_sender.send(SystemEvent::StopSystem).await;
        });
    }

    /// Resolves once every actor of the system has stopped.
    pub async fn when_terminated(&self) {
        self.inner.terminated.cancelled().await;
    }

    pub fn is_terminating(&self) -> bool {
        self.inner.terminating.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.is_cancelled()
    }

    /// Add a helper to the actor system.
    pub async fn add_helper<H>(&self, name: &str, helper: H)
    where
        H: Any + Send + Sync + Clone + 'static,
    {
        let mut helpers = self.inner.helpers.write().await;
        helpers.insert(name.to_owned(), Box::new(helper));
    }

    /// Get a helper from the actor system.
    /// If the helper does not exist, a None is returned.
    pub async fn get_helper<H>(&self, name: &str) -> Option<H>
    where
        H: Any + Send + Sync + Clone + 'static,
    {
        let helpers = self.inner.helpers.read().await;
        helpers
            .get(name)
            .and_then(|any| any.downcast_ref::<H>())
            .cloned()
    }

    /// Run a sink. The sink will be run in a separate task.
    ///
    pub fn run_sink<E>(&self, mut sink: Sink<E>)
    where
        E: Message + Clone,
    {
        tokio::spawn(async move {
            sink.run().await;
        });
    }

    pub(crate) fn downgrade(&self) -> WeakSystemRef {
        WeakSystemRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn temp_container(&self) -> &Arc<VirtualPathContainer> {
        &self.inner.temp
    }

    /// Fresh name for a temporary actor.
    pub(crate) fn temp_name(&self) -> String {
        let id = self.inner.temp_names.fetch_add(1, Ordering::Relaxed);
        format!("${}", id)
    }

    /// Fresh incarnation uid, never `0`.
    pub(crate) fn new_uid(&self) -> u64 {
        NEXT_UID.fetch_add(1, Ordering::Relaxed)
    }
}

/// System runner.
pub struct SystemRunner {
    /// The event receiver.
    event_receiver: mpsc::Receiver<SystemEvent>,
}

impl SystemRunner {
    /// Create a new system runner.
    pub(crate) fn new(event_receiver: mpsc::Receiver<SystemEvent>) -> Self {
        Self { event_receiver }
    }

    /// Run the actor system until it is terminated.
    pub async fn run(&mut self) {
        debug!("Running actor system...");
        if let Some(SystemEvent::StopSystem) = self.event_receiver.recv().await {
            debug!("Actor system stopped.");
        }
    }
}
