// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor selection
//!
//! A selection is an anchor plus a relative path that may contain `..`,
//! child names and `*`/`?` wildcards. Messages sent through it travel
//! wrapped in an [`ActorSelectionMessage`], which every cell resolves one
//! element at a time against its live children.
//!

use crate::{
    ActorRef, AnyMessage, Error, Message,
    cell::CellShared,
    message::{ActorIdentity, DeadLetter, Identify},
};

use tracing::debug;

use std::time::Duration;

/// One element of a selection path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectionPathElement {
    /// `..`
    Parent,
    /// An exact child name.
    ChildName(String),
    /// A glob over child names using `*` and `?`.
    Pattern(String),
}

impl SelectionPathElement {
    fn parse(element: &str) -> Self {
        if element == ".." {
            SelectionPathElement::Parent
        } else if element.contains(['*', '?']) {
            SelectionPathElement::Pattern(element.to_owned())
        } else {
            SelectionPathElement::ChildName(element.to_owned())
        }
    }
}

/// Envelope used to route a message through a selection path.
#[derive(Clone, Debug)]
pub struct ActorSelectionMessage {
    pub(crate) message: AnyMessage,
    pub(crate) elements: Vec<SelectionPathElement>,
    pub(crate) wildcard_fan_out: bool,
}

impl Message for ActorSelectionMessage {}

impl ActorSelectionMessage {
    fn rest(&self, wildcard_fan_out: bool) -> Self {
        Self {
            message: self.message.clone(),
            elements: self.elements[1..].to_vec(),
            wildcard_fan_out: self.wildcard_fan_out || wildcard_fan_out,
        }
    }
}

/// Logical view of the actors matching a path.
#[derive(Clone, Debug)]
pub struct ActorSelection {
    anchor: ActorRef,
    elements: Vec<SelectionPathElement>,
}

impl ActorSelection {
    pub(crate) fn new(anchor: ActorRef, path: &str) -> Self {
        let elements = path
            .split('/')
            .filter(|element| !element.is_empty())
            .map(SelectionPathElement::parse)
            .collect();
        Self { anchor, elements }
    }

    pub fn anchor(&self) -> &ActorRef {
        &self.anchor
    }

    pub fn elements(&self) -> &[SelectionPathElement] {
        &self.elements
    }

    /// Sends a message to every actor matching the selection.
    pub fn tell<M: Message>(&self, message: M, sender: Option<&ActorRef>) {
        self.tell_any(AnyMessage::new(message), sender);
    }

    pub fn tell_any(&self, message: AnyMessage, sender: Option<&ActorRef>) {
        self.anchor.tell(self.wrap(message), sender);
    }

    fn wrap(&self, message: AnyMessage) -> ActorSelectionMessage {
        ActorSelectionMessage {
            message,
            elements: self.elements.clone(),
            wildcard_fan_out: false,
        }
    }

    /// Resolves the selection to a single live actor.
    pub async fn resolve_one(&self, timeout: Duration) -> Result<ActorRef, Error> {
        let system = self.anchor.system().ok_or(Error::SystemTerminated)?;
        let request = AnyMessage::new(self.wrap(AnyMessage::new(Identify(0))));
        let reply =
            crate::ask::ask(&system, &self.anchor, request, timeout).await?;
        match reply.downcast_ref::<ActorIdentity>() {
            Some(ActorIdentity {
                subject: Some(subject),
                ..
            }) => Ok(subject.clone()),
            _ => Err(Error::NotFound(self.to_string())),
        }
    }
}

impl std::fmt::Display for ActorSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rest: Vec<&str> = self
            .elements
            .iter()
            .map(|element| match element {
                SelectionPathElement::Parent => "..",
                SelectionPathElement::ChildName(name) => name.as_str(),
                SelectionPathElement::Pattern(pattern) => pattern.as_str(),
            })
            .collect();
        write!(f, "ActorSelection[{}/{}]", self.anchor.path(), rest.join("/"))
    }
}

/// Resolves the first element of `selection` against the cell owning
/// `current` and forwards the remainder.
pub(crate) fn deliver(
    current: &ActorRef,
    shared: &CellShared,
    selection: &ActorSelectionMessage,
    sender: Option<ActorRef>,
) {
    let Some(first) = selection.elements.first() else {
        current.tell_any(selection.message.clone(), sender.as_ref());
        return;
    };
    match first {
        SelectionPathElement::Parent => match &shared.parent {
            Some(parent) => forward(parent, selection.rest(false), sender),
            None => empty(current, selection, sender),
        },
        SelectionPathElement::ChildName(name) => {
            match shared.lookup_child(name) {
                Some(child) => forward(&child, selection.rest(false), sender),
                None if selection.wildcard_fan_out => {}
                None => empty(current, selection, sender),
            }
        }
        SelectionPathElement::Pattern(pattern) => {
            let matches: Vec<ActorRef> = shared
                .lookup_names()
                .into_iter()
                .filter(|(name, _)| matches_pattern(pattern, name))
                .map(|(_, child)| child)
                .collect();
            if matches.is_empty() {
                if !selection.wildcard_fan_out {
                    empty(current, selection, sender);
                }
                return;
            }
            for child in matches {
                forward(&child, selection.rest(true), sender.clone());
            }
        }
    }
}

fn forward(
    next: &ActorRef,
    selection: ActorSelectionMessage,
    sender: Option<ActorRef>,
) {
    if next.local().is_some() {
        next.tell(selection, sender.as_ref());
        return;
    }
    // Refs without a cell resolve the remaining plain names at once.
    let mut names = Vec::with_capacity(selection.elements.len());
    for element in &selection.elements {
        match element {
            SelectionPathElement::ChildName(name) => names.push(name.as_str()),
            _ => {
                debug!("Selection below {} needs a cell.", next.path());
                return empty(next, &selection, sender);
            }
        }
    }
    let target = next.get_child(&names);
    if target.is_nobody() {
        empty(next, &selection, sender);
    } else {
        target.tell_any(selection.message, sender.as_ref());
    }
}

/// Nothing matched: `Identify` gets an empty identity, anything else goes
/// to dead letters.
fn empty(
    current: &ActorRef,
    selection: &ActorSelectionMessage,
    sender: Option<ActorRef>,
) {
    if let Some(Identify(message_id)) =
        selection.message.downcast_ref::<Identify>()
    {
        if let Some(sender) = sender {
            sender.tell(
                ActorIdentity {
                    message_id: *message_id,
                    subject: None,
                },
                Some(current),
            );
        }
        return;
    }
    if let Some(system) = current.system() {
        system.dead_letters().tell(
            DeadLetter {
                message: AnyMessage::new(selection.clone()),
                sender,
                recipient: current.clone(),
            },
            None,
        );
    }
}

/// Glob match supporting `*` (any run) and `?` (any single character).
pub(crate) fn matches_pattern(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    let (mut p, mut n) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((star_p, star_n)) = star {
            p = star_p + 1;
            n = star_n + 1;
            star = Some((star_p, star_n + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_parse_elements() {
        let selection =
            ActorSelection::new(ActorRef::nobody(), "/user/../a*/b?/c");
        assert_eq!(
            selection.elements(),
            &[
                SelectionPathElement::ChildName("user".to_owned()),
                SelectionPathElement::Parent,
                SelectionPathElement::Pattern("a*".to_owned()),
                SelectionPathElement::Pattern("b?".to_owned()),
                SelectionPathElement::ChildName("c".to_owned()),
            ]
        );
    }

    #[test]
    fn test_matches_pattern() {
        assert!(matches_pattern("*", "anything"));
        assert!(matches_pattern("w*", "worker-1"));
        assert!(matches_pattern("worker-?", "worker-1"));
        assert!(!matches_pattern("worker-?", "worker-10"));
        assert!(matches_pattern("*-1*", "worker-10"));
        assert!(!matches_pattern("a*b", "acbd"));
        assert!(matches_pattern("a*b", "acbdb"));
    }
}
