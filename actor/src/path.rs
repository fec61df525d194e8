// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor path
//!
//! The `path` module provides the [`Address`] and [`ActorPath`] types. An
//! `ActorPath` names an actor in the hierarchy: the root address of its actor
//! system, the ordered path elements from the root guardian down to the actor,
//! and the uid of the incarnation it was created for.
//!
//! The canonical rendering is `protocol://system@host:port/a/b/c#uid`; the
//! `#uid` suffix is only produced by [`ActorPath::to_string_with_uid`].
//!

use crate::Error;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::cmp::Ordering;
use std::fmt::{self, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Default protocol of local actor systems.
pub const DEFAULT_PROTOCOL: &str = "hive";

/// Uid of a path that does not name a concrete incarnation.
pub const UNDEFINED_UID: u64 = 0;

/// Root address of an actor system.
#[derive(Clone)]
pub struct Address {
    protocol: String,
    system: String,
    host: Option<String>,
    port: Option<u16>,
}

impl Address {
    /// Address of a local actor system.
    pub fn local(system: &str) -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_owned(),
            system: system.to_owned(),
            host: None,
            port: None,
        }
    }

    /// Address with every component given.
    pub fn new(
        protocol: &str,
        system: &str,
        host: Option<&str>,
        port: Option<u16>,
    ) -> Self {
        Self {
            protocol: protocol.to_owned(),
            system: system.to_owned(),
            host: host.map(str::to_owned),
            port,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// True when the address has no host part.
    pub fn has_local_scope(&self) -> bool {
        self.host.is_none()
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::local("default")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.system)?;
        if let Some(host) = &self.host {
            write!(f, "@{}", host)?;
            if let Some(port) = self.port {
                write!(f, ":{}", port)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

// Addresses compare by their rendered form.
impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (protocol, authority) = s
            .split_once("://")
            .ok_or_else(|| Error::InvalidPath(s.to_owned()))?;
        if protocol.is_empty() || authority.is_empty() {
            return Err(Error::InvalidPath(s.to_owned()));
        }
        let (system, host, port) = match authority.split_once('@') {
            None => (authority, None, None),
            Some((system, host_port)) => match host_port.rsplit_once(':') {
                Some((host, port)) => {
                    let port = port
                        .parse::<u16>()
                        .map_err(|_| Error::InvalidPath(s.to_owned()))?;
                    (system, Some(host), Some(port))
                }
                None => (system, Some(host_port), None),
            },
        };
        if system.is_empty() || host.is_some_and(str::is_empty) {
            return Err(Error::InvalidPath(s.to_owned()));
        }
        Ok(Address::new(protocol, system, host, port))
    }
}

/// Path of an actor in the hierarchy.
///
/// Two paths are equal when their address and elements match; the uid only
/// distinguishes incarnations and takes no part in equality, hashing or
/// ordering.
#[derive(Clone)]
pub struct ActorPath {
    address: Address,
    elements: Vec<String>,
    uid: u64,
}

impl ActorPath {
    /// The root path (no elements) of the given address.
    pub fn root_of(address: Address) -> Self {
        Self {
            address,
            elements: Vec::new(),
            uid: UNDEFINED_UID,
        }
    }

    /// Path built from an address and a list of elements.
    pub fn from_elements<I, S>(address: Address, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            address,
            elements: elements.into_iter().map(Into::into).collect(),
            uid: UNDEFINED_UID,
        }
    }

    /// Root address of this path.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Ordered path elements.
    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    /// Incarnation uid, `0` when undefined.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Copy of this path naming the given incarnation.
    pub fn with_uid(&self, uid: u64) -> Self {
        Self {
            address: self.address.clone(),
            elements: self.elements.clone(),
            uid,
        }
    }

    /// Root path of the same address.
    pub fn root(&self) -> Self {
        ActorPath::root_of(self.address.clone())
    }

    /// Path without the last element. The parent of the root is the root.
    pub fn parent(&self) -> Self {
        let mut elements = self.elements.clone();
        elements.pop();
        Self {
            address: self.address.clone(),
            elements,
            uid: UNDEFINED_UID,
        }
    }

    /// Last element (the actor name), empty for the root.
    pub fn name(&self) -> &str {
        self.elements.last().map(String::as_str).unwrap_or("")
    }

    /// Number of elements.
    pub fn level(&self) -> usize {
        self.elements.len()
    }

    pub fn is_root(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn is_top_level(&self) -> bool {
        self.elements.len() == 1
    }

    pub fn is_ancestor_of(&self, other: &ActorPath) -> bool {
        self.address == other.address
            && self.elements.len() < other.elements.len()
            && other.elements.starts_with(&self.elements)
    }

    pub fn is_descendant_of(&self, other: &ActorPath) -> bool {
        other.is_ancestor_of(self)
    }

    pub fn is_parent_of(&self, other: &ActorPath) -> bool {
        !other.is_root() && *self == other.parent()
    }

    pub fn is_child_of(&self, other: &ActorPath) -> bool {
        other.is_parent_of(self)
    }

    /// Elements joined by `/`, starting with `/`.
    pub fn to_string_without_address(&self) -> String {
        format!("/{}", self.elements.join("/"))
    }

    /// Canonical rendering including the `#uid` suffix when defined.
    pub fn to_string_with_uid(&self) -> String {
        if self.uid == UNDEFINED_UID {
            self.to_string()
        } else {
            format!("{}#{}", self, self.uid)
        }
    }

    /// Splits a path element of the form `name#uid`.
    pub fn split_name_and_uid(element: &str) -> (&str, u64) {
        match element.rsplit_once('#') {
            Some((name, uid)) => match uid.parse::<u64>() {
                Ok(uid) => (name, uid),
                Err(_) => (element, UNDEFINED_UID),
            },
            None => (element, UNDEFINED_UID),
        }
    }

    /// Checks that a user supplied actor name is a valid path element.
    pub fn validate_name(name: &str) -> Result<(), Error> {
        let valid = !name.is_empty()
            && !name.starts_with('$')
            && name.chars().all(|c| {
                c.is_ascii_alphanumeric() || "-_.*$+:@&=,!~';".contains(c)
            });
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidName(name.to_owned()))
        }
    }
}

fn split_elements(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|x| !x.trim().is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl FromStr for ActorPath {
    type Err = Error;

    /// Parses the canonical form. The `#uid` suffix is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (without_uid, uid) = match s.rsplit_once('#') {
            Some((rest, uid)) => {
                let uid = uid
                    .parse::<u64>()
                    .map_err(|_| Error::InvalidPath(s.to_owned()))?;
                (rest, uid)
            }
            None => (s, UNDEFINED_UID),
        };
        let (scheme, rest) = without_uid
            .split_once("://")
            .ok_or_else(|| Error::InvalidPath(s.to_owned()))?;
        let (authority, path) = match rest.find('/') {
            Some(index) => (&rest[..index], &rest[index..]),
            None => (rest, ""),
        };
        let address = Address::from_str(&format!("{}://{}", scheme, authority))
            .map_err(|_| Error::InvalidPath(s.to_owned()))?;
        Ok(Self {
            address,
            elements: split_elements(path),
            uid,
        })
    }
}

/// Lenient conversion used for local, address-less paths such as
/// `/user/worker`. Strings carrying a scheme are parsed canonically.
impl From<&str> for ActorPath {
    fn from(str: &str) -> Self {
        if str.contains("://") {
            if let Ok(path) = ActorPath::from_str(str) {
                return path;
            }
        }
        ActorPath::from_elements(Address::default(), split_elements(str))
    }
}

impl From<String> for ActorPath {
    fn from(string: String) -> Self {
        ActorPath::from(string.as_str())
    }
}

impl From<&String> for ActorPath {
    fn from(string: &String) -> Self {
        ActorPath::from(string.as_str())
    }
}

impl std::ops::Div<&str> for ActorPath {
    type Output = ActorPath;

    fn div(self, rhs: &str) -> Self::Output {
        let mut elements = self.elements;
        elements.append(&mut split_elements(rhs));
        ActorPath {
            address: self.address,
            elements,
            uid: UNDEFINED_UID,
        }
    }
}

impl std::ops::Div<&str> for &ActorPath {
    type Output = ActorPath;

    fn div(self, rhs: &str) -> Self::Output {
        self.clone() / rhs
    }
}

impl PartialEq for ActorPath {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements && self.address == other.address
    }
}

impl Eq for ActorPath {}

impl Hash for ActorPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.elements.hash(state);
    }
}

impl PartialOrd for ActorPath {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ActorPath {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address
            .cmp(&other.address)
            .then_with(|| self.elements.cmp(&other.elements))
    }
}

impl fmt::Display for ActorPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.elements.join("/"))
    }
}

impl fmt::Debug for ActorPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_with_uid())
    }
}

impl Serialize for ActorPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_with_uid())
    }
}

impl<'de> Deserialize<'de> for ActorPath {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let string = String::deserialize(deserializer)?;
        ActorPath::from_str(&string).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    fn address() -> Address {
        Address::local("sys")
    }

    #[test]
    fn parse_empty_string() {
        let path = ActorPath::from("");
        assert!(path.is_root());
        assert_eq!(path.elements(), &Vec::<String>::new()[..]);
    }

    #[test]
    fn parse_three_deep() {
        let path = ActorPath::from("/acme/building/room");
        assert_eq!(path.elements(), &["acme", "building", "room"]);
        assert_eq!(path.level(), 3);
        assert_eq!(path.name(), "room");
    }

    #[test]
    fn test_child_append_and_parent() {
        let root = ActorPath::root_of(address());
        let child = root.clone() / "user" / "worker";
        assert_eq!(child.to_string(), "hive://sys/user/worker");
        assert_eq!(child.parent().to_string(), "hive://sys/user");
        assert_eq!(root.parent(), root);
        assert!(child.parent().is_parent_of(&child));
        assert!(child.is_child_of(&child.parent()));
        assert!(root.is_ancestor_of(&child));
        assert!(child.is_descendant_of(&root));
        assert!(!child.is_ancestor_of(&child));
    }

    #[test]
    fn test_canonical_round_trip() {
        let address = Address::new("hive", "sys", Some("127.0.0.1"), Some(2552));
        let path = ActorPath::from_elements(address, ["user", "a", "b"])
            .with_uid(42);
        assert_eq!(path.to_string(), "hive://sys@127.0.0.1:2552/user/a/b");
        assert_eq!(
            path.to_string_with_uid(),
            "hive://sys@127.0.0.1:2552/user/a/b#42"
        );

        let parsed = ActorPath::from_str(&path.to_string()).unwrap();
        assert_eq!(parsed, path);
        assert_eq!(parsed.uid(), UNDEFINED_UID);

        let parsed = ActorPath::from_str(&path.to_string_with_uid()).unwrap();
        assert_eq!(parsed, path);
        assert_eq!(parsed.uid(), 42);
        assert_eq!(parsed.address().host(), Some("127.0.0.1"));
        assert_eq!(parsed.address().port(), Some(2552));
    }

    #[test]
    fn test_equality_ignores_uid() {
        let path = ActorPath::from_elements(address(), ["user", "a"]);
        assert_eq!(path.with_uid(1), path.with_uid(2));
        let other = ActorPath::from_elements(Address::local("other"), ["user", "a"]);
        assert_ne!(path, other);
    }

    #[test]
    fn test_invalid_paths() {
        assert!(ActorPath::from_str("no-scheme/user").is_err());
        assert!(ActorPath::from_str("hive:///user").is_err());
        assert!(ActorPath::from_str("hive://sys/user#abc").is_err());
        assert!(ActorPath::from_str("hive://sys@host:port/user").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(ActorPath::validate_name("worker-1").is_ok());
        assert!(ActorPath::validate_name("").is_err());
        assert!(ActorPath::validate_name("$temp").is_err());
        assert!(ActorPath::validate_name("a/b").is_err());
        assert!(ActorPath::validate_name("a#1").is_err());
    }

    #[test]
    fn test_split_name_and_uid() {
        assert_eq!(ActorPath::split_name_and_uid("child#12"), ("child", 12));
        assert_eq!(ActorPath::split_name_and_uid("child"), ("child", 0));
    }

    #[test]
    fn test_serde_keeps_uid() {
        let path = ActorPath::from_elements(address(), ["user", "a"]).with_uid(7);
        let bytes = bincode::serialize(&path).unwrap();
        let back: ActorPath = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, path);
        assert_eq!(back.uid(), 7);
    }
}
