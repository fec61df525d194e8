// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor references
//!
//! An [`ActorRef`] is a cheap, freely clonable handle exposing `tell`. It
//! never owns actor state. Behind it sits one of the reference kinds:
//!
//! - a local reference backed by a live cell,
//! - the dead-letter sink,
//! - an empty reference for paths without an actor,
//! - a virtual path container (`/temp`) for synthetic children,
//! - a one-shot promise reference used by the ask pattern,
//! - the global `Nobody` sentinel.
//!

use crate::{
    ActorPath, AnyMessage, Envelope, Error, Message, Status,
    cell::CellShared,
    event_stream::EventStream,
    mailbox::MailboxSender,
    message::{ActorIdentity, DeadLetter, Identify},
    path::Address,
    system::{SystemRef, WeakSystemRef},
    system_message::SystemMessage,
};

use dashmap::DashMap;
use tracing::debug;

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    sync::{Arc, OnceLock},
    time::Duration,
};

/// Seam implemented by every reference kind.
pub(crate) trait RefBackend: Send + Sync + 'static {
    /// Path of the referenced actor, uid included.
    fn path(&self) -> &ActorPath;

    /// Fire-and-forget delivery of a user envelope.
    fn tell(&self, this: &ActorRef, envelope: Envelope);

    /// Delivery on the priority channel.
    fn send_system(&self, this: &ActorRef, message: SystemMessage);

    /// Resolves the remaining (non-empty) path elements below this ref.
    fn child(&self, _names: &[&str]) -> Option<ActorRef> {
        None
    }

    fn is_terminated(&self) -> bool {
        false
    }

    fn system(&self) -> Option<SystemRef> {
        None
    }

    fn local(&self) -> Option<&LocalActorRef> {
        None
    }
}

/// Handle used to send messages to an actor.
#[derive(Clone)]
pub struct ActorRef {
    inner: Arc<dyn RefBackend>,
}

impl ActorRef {
    pub(crate) fn from_backend(inner: Arc<dyn RefBackend>) -> Self {
        Self { inner }
    }

    /// The sentinel returned by failed lookups. Messages sent to it vanish.
    pub fn nobody() -> ActorRef {
        static NOBODY: OnceLock<ActorRef> = OnceLock::new();
        NOBODY
            .get_or_init(|| {
                let path = ActorPath::root_of(Address::local("all-systems"))
                    / "Nobody";
                ActorRef::from_backend(Arc::new(NobodyRef { path }))
            })
            .clone()
    }

    pub fn path(&self) -> &ActorPath {
        self.inner.path()
    }

    /// Sends a message. Never blocks, never fails: undeliverable messages
    /// end up in dead letters.
    pub fn tell<M: Message>(&self, message: M, sender: Option<&ActorRef>) {
        self.tell_any(AnyMessage::new(message), sender);
    }

    /// Sends an already type-erased message.
    pub fn tell_any(&self, message: AnyMessage, sender: Option<&ActorRef>) {
        self.inner.tell(self, Envelope::new(message, sender.cloned()));
    }

    pub(crate) fn send_system(&self, message: SystemMessage) {
        self.inner.send_system(self, message);
    }

    /// Resolves a descendant by its remaining path elements. Unmatched
    /// lookups yield [`ActorRef::nobody`].
    pub fn get_child(&self, names: &[&str]) -> ActorRef {
        let names: Vec<&str> =
            names.iter().copied().filter(|n| !n.is_empty()).collect();
        if names.is_empty() {
            return self.clone();
        }
        self.inner.child(&names).unwrap_or_else(ActorRef::nobody)
    }

    /// True when the ref points to a stopped actor (best effort).
    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    pub fn is_nobody(&self) -> bool {
        *self == ActorRef::nobody()
    }

    /// Sends `message` and waits for the first reply.
    pub async fn ask_any<M: Message>(
        &self,
        message: M,
        timeout: Duration,
    ) -> Result<AnyMessage, Error> {
        let system = self.inner.system().ok_or(Error::SystemTerminated)?;
        let reply = crate::ask::ask(
            &system,
            self,
            AnyMessage::new(message),
            timeout,
        )
        .await?;
        match reply.downcast_ref::<Status>() {
            Some(Status::Success(inner)) => Ok(inner.clone()),
            Some(Status::Failure(error)) => Err(error.clone()),
            None => Ok(reply),
        }
    }

    /// Sends `message` and waits for a reply of type `R`.
    pub async fn ask<M, R>(&self, message: M, timeout: Duration) -> Result<R, Error>
    where
        M: Message,
        R: Message + Clone,
    {
        let reply = self.ask_any(message, timeout).await?;
        reply
            .downcast::<R>()
            .ok_or_else(|| Error::UnexpectedMessage(reply.type_name().to_owned()))
    }

    pub(crate) fn local(&self) -> Option<&LocalActorRef> {
        self.inner.local()
    }

    pub(crate) fn system(&self) -> Option<SystemRef> {
        self.inner.system()
    }

    #[cfg(test)]
    pub(crate) fn ptr_eq(&self, other: &ActorRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// Refs compare by path and incarnation uid.
impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        self.path().uid() == other.path().uid() && self.path() == other.path()
    }
}

impl Eq for ActorRef {}

impl Hash for ActorRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path().hash(state);
        self.path().uid().hash(state);
    }
}

impl Debug for ActorRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Actor[{}]", self.path().to_string_with_uid())
    }
}

impl Display for ActorRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

/// Reference backed by a cell.
pub(crate) struct LocalActorRef {
    path: ActorPath,
    mailbox: MailboxSender,
    shared: Arc<CellShared>,
    stream: EventStream,
    system: WeakSystemRef,
}

impl LocalActorRef {
    pub(crate) fn new(
        path: ActorPath,
        mailbox: MailboxSender,
        shared: Arc<CellShared>,
        stream: EventStream,
        system: WeakSystemRef,
    ) -> Self {
        Self {
            path,
            mailbox,
            shared,
            stream,
            system,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<CellShared> {
        &self.shared
    }
}

impl RefBackend for LocalActorRef {
    fn path(&self) -> &ActorPath {
        &self.path
    }

    fn tell(&self, this: &ActorRef, envelope: Envelope) {
        if let Err(error) = self.mailbox.enqueue_user(envelope) {
            let envelope = error.into_envelope();
            self.stream.publish_dead_letter(DeadLetter {
                message: envelope.message,
                sender: envelope.sender,
                recipient: this.clone(),
            });
        }
    }

    fn send_system(&self, this: &ActorRef, message: SystemMessage) {
        if let Err(message) = self.mailbox.enqueue_system(message) {
            dead_system_message(this, message, true);
        }
    }

    fn child(&self, names: &[&str]) -> Option<ActorRef> {
        let (first, rest) = names.split_first()?;
        let next = if *first == ".." {
            self.shared.parent.clone()?
        } else {
            self.shared.lookup_child(first)?
        };
        Some(next.get_child(rest))
    }

    fn is_terminated(&self) -> bool {
        self.shared.is_terminated() || self.mailbox.is_closed()
    }

    fn system(&self) -> Option<SystemRef> {
        self.system.upgrade()
    }

    fn local(&self) -> Option<&LocalActorRef> {
        Some(self)
    }
}

/// Handles a system message addressed to an actor that does not exist (any
/// more). A `Watch` is answered with an immediate death notification.
fn dead_system_message(
    this: &ActorRef,
    message: SystemMessage,
    existence_confirmed: bool,
) {
    match message {
        SystemMessage::Watch { watchee, watcher } => {
            if watchee == *this && watcher != *this {
                watcher.send_system(SystemMessage::DeathWatchNotification {
                    actor: watchee,
                    existence_confirmed,
                    address_terminated: false,
                });
            }
        }
        other => {
            debug!("Dropping {:?} sent to {:?}.", other, this);
        }
    }
}

/// Sink publishing everything it receives as [`DeadLetter`].
pub(crate) struct DeadLetterActorRef {
    path: ActorPath,
    stream: EventStream,
    system: WeakSystemRef,
}

impl DeadLetterActorRef {
    pub(crate) fn new(
        path: ActorPath,
        stream: EventStream,
        system: WeakSystemRef,
    ) -> Self {
        Self {
            path,
            stream,
            system,
        }
    }
}

impl RefBackend for DeadLetterActorRef {
    fn path(&self) -> &ActorPath {
        &self.path
    }

    fn tell(&self, this: &ActorRef, envelope: Envelope) {
        let dead_letter = match envelope.message.downcast::<DeadLetter>() {
            Some(dead_letter) => dead_letter,
            None => DeadLetter {
                message: envelope.message,
                sender: envelope.sender,
                recipient: this.clone(),
            },
        };
        self.stream.publish_dead_letter(dead_letter);
    }

    fn send_system(&self, this: &ActorRef, message: SystemMessage) {
        dead_system_message(this, message, false);
    }

    fn is_terminated(&self) -> bool {
        true
    }

    fn system(&self) -> Option<SystemRef> {
        self.system.upgrade()
    }
}

/// Reference to a path where no actor lives.
pub(crate) struct EmptyLocalActorRef {
    path: ActorPath,
    stream: EventStream,
    system: WeakSystemRef,
}

impl EmptyLocalActorRef {
    pub(crate) fn new(
        path: ActorPath,
        stream: EventStream,
        system: WeakSystemRef,
    ) -> Self {
        Self {
            path,
            stream,
            system,
        }
    }
}

impl RefBackend for EmptyLocalActorRef {
    fn path(&self) -> &ActorPath {
        &self.path
    }

    fn tell(&self, this: &ActorRef, envelope: Envelope) {
        if let Some(Identify(message_id)) =
            envelope.message.downcast_ref::<Identify>()
        {
            if let Some(sender) = &envelope.sender {
                sender.tell(
                    ActorIdentity {
                        message_id: *message_id,
                        subject: None,
                    },
                    Some(this),
                );
            }
            return;
        }
        self.stream.publish_dead_letter(DeadLetter {
            message: envelope.message,
            sender: envelope.sender,
            recipient: this.clone(),
        });
    }

    fn send_system(&self, this: &ActorRef, message: SystemMessage) {
        dead_system_message(this, message, false);
    }

    fn is_terminated(&self) -> bool {
        true
    }

    fn system(&self) -> Option<SystemRef> {
        self.system.upgrade()
    }
}

struct NobodyRef {
    path: ActorPath,
}

impl RefBackend for NobodyRef {
    fn path(&self) -> &ActorPath {
        &self.path
    }

    fn tell(&self, _this: &ActorRef, envelope: Envelope) {
        debug!("Message {:?} sent to Nobody.", envelope.message);
    }

    fn send_system(&self, this: &ActorRef, message: SystemMessage) {
        dead_system_message(this, message, false);
    }

    fn is_terminated(&self) -> bool {
        true
    }
}

/// Non-cell reference owning synthetic children such as ask refs.
pub(crate) struct VirtualPathContainer {
    path: ActorPath,
    children: DashMap<String, ActorRef>,
    stream: EventStream,
    system: WeakSystemRef,
}

impl VirtualPathContainer {
    pub(crate) fn new(
        path: ActorPath,
        stream: EventStream,
        system: WeakSystemRef,
    ) -> Self {
        Self {
            path,
            children: DashMap::new(),
            stream,
            system,
        }
    }

    pub(crate) fn path(&self) -> &ActorPath {
        &self.path
    }

    pub(crate) fn add_child(&self, name: &str, child: ActorRef) {
        if self.children.insert(name.to_owned(), child).is_some() {
            debug!("Replaced virtual child {} of {}.", name, self.path);
        }
    }

    pub(crate) fn remove_child(&self, name: &str) {
        self.children.remove(name);
    }

    pub(crate) fn get_named(&self, name: &str) -> Option<ActorRef> {
        self.children.get(name).map(|entry| entry.value().clone())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }
}

impl RefBackend for VirtualPathContainer {
    fn path(&self) -> &ActorPath {
        &self.path
    }

    fn tell(&self, this: &ActorRef, envelope: Envelope) {
        self.stream.publish_dead_letter(DeadLetter {
            message: envelope.message,
            sender: envelope.sender,
            recipient: this.clone(),
        });
    }

    fn send_system(&self, this: &ActorRef, message: SystemMessage) {
        dead_system_message(this, message, false);
    }

    fn child(&self, names: &[&str]) -> Option<ActorRef> {
        let (first, rest) = names.split_first()?;
        let (name, uid) = ActorPath::split_name_and_uid(first);
        let child = self.get_named(name)?;
        if uid != 0 && child.path().uid() != uid {
            return None;
        }
        Some(child.get_child(rest))
    }

    fn system(&self) -> Option<SystemRef> {
        self.system.upgrade()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_nobody_is_singleton() {
        let a = ActorRef::nobody();
        let b = ActorRef::nobody();
        assert!(a.ptr_eq(&b));
        assert!(a.is_nobody());
        assert!(a.is_terminated());
        assert!(a.get_child(&["x"]).is_nobody());
        // Sending to nobody is a no-op.
        a.tell("lost".to_owned(), None);
    }

    #[test]
    fn test_container_lookup() {
        let stream = EventStream::new(16);
        let root = ActorPath::root_of(Address::local("sys"));
        let container = Arc::new(VirtualPathContainer::new(
            root.clone() / "temp",
            stream.clone(),
            WeakSystemRef::empty(),
        ));
        let container_ref = ActorRef::from_backend(container.clone());

        let child = ActorRef::from_backend(Arc::new(EmptyLocalActorRef::new(
            (root.clone() / "temp" / "a").with_uid(5),
            stream,
            WeakSystemRef::empty(),
        )));
        container.add_child("a", child.clone());
        assert_eq!(container.len(), 1);

        assert_eq!(container_ref.get_child(&["a"]), child);
        assert_eq!(container_ref.get_child(&["a#5"]), child);
        assert!(container_ref.get_child(&["a#6"]).is_nobody());
        assert!(container_ref.get_child(&["b"]).is_nobody());
        assert_eq!(container_ref.get_child(&[]), container_ref);

        container.remove_child("a");
        assert!(container_ref.get_child(&["a"]).is_nobody());
    }

    #[test]
    fn test_ref_equality_includes_uid() {
        let stream = EventStream::new(16);
        let path = ActorPath::from("/user/a");
        let first = ActorRef::from_backend(Arc::new(EmptyLocalActorRef::new(
            path.with_uid(1),
            stream.clone(),
            WeakSystemRef::empty(),
        )));
        let second = ActorRef::from_backend(Arc::new(EmptyLocalActorRef::new(
            path.with_uid(2),
            stream,
            WeakSystemRef::empty(),
        )));
        assert_eq!(first.path(), second.path());
        assert_ne!(first, second);
    }
}
