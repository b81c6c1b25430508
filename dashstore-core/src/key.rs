// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Hierarchical record keys
//!
//! A key is a path of `(kind, id)` elements that encodes containment:
//!
//! ```text
//! Test:"camera_hal"                                   (root, entity group)
//! Test:"camera_hal"/TestRun:1700000000000000          (run, id = start µs)
//! Test:"camera_hal"/TestRun:1700000000000000/DeviceInfo:1
//! ```
//!
//! Keys order lexicographically by path, so a parent sorts before all of its
//! descendants and all descendants sort before the parent's next sibling.
//! Numeric run ids are timestamps, which makes key order chronological.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Record kind (the type tag of a record in the store).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Kind {
    Test,
    TestRun,
    DeviceInfo,
    ProfilingPointRun,
    Coverage,
    TestCaseRun,
    Branch,
    BuildTarget,
    ProfilingPointSummary,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Test => "Test",
            Kind::TestRun => "TestRun",
            Kind::DeviceInfo => "DeviceInfo",
            Kind::ProfilingPointRun => "ProfilingPointRun",
            Kind::Coverage => "Coverage",
            Kind::TestCaseRun => "TestCaseRun",
            Kind::Branch => "Branch",
            Kind::BuildTarget => "BuildTarget",
            Kind::ProfilingPointSummary => "ProfilingPointSummary",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one path element. Integer ids sort before names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyId {
    Int(i64),
    Name(String),
}

impl KeyId {
    /// Smallest id strictly greater than this one.
    fn successor(&self) -> KeyId {
        match self {
            KeyId::Int(i) if *i < i64::MAX => KeyId::Int(i + 1),
            // Every name sorts after every integer, the empty name first.
            KeyId::Int(_) => KeyId::Name(String::new()),
            KeyId::Name(name) => {
                let mut next = name.clone();
                next.push('\0');
                KeyId::Name(next)
            }
        }
    }
}

impl From<i64> for KeyId {
    fn from(id: i64) -> Self {
        KeyId::Int(id)
    }
}

impl From<&str> for KeyId {
    fn from(name: &str) -> Self {
        KeyId::Name(name.to_string())
    }
}

impl From<String> for KeyId {
    fn from(name: String) -> Self {
        KeyId::Name(name)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyId::Int(i) => write!(f, "{}", i),
            KeyId::Name(name) => write!(f, "{:?}", name),
        }
    }
}

/// One `(kind, id)` step of a key path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathElement {
    pub kind: Kind,
    pub id: KeyId,
}

/// Record key: a non-empty ancestor path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<PathElement>", into = "Vec<PathElement>")]
pub struct Key {
    path: Vec<PathElement>,
}

impl Key {
    /// Create a root key (an entity group of its own).
    pub fn root(kind: Kind, id: impl Into<KeyId>) -> Self {
        Self {
            path: vec![PathElement {
                kind,
                id: id.into(),
            }],
        }
    }

    /// Create a child key under this key.
    pub fn child(&self, kind: Kind, id: impl Into<KeyId>) -> Self {
        let mut path = Vec::with_capacity(self.path.len() + 1);
        path.extend_from_slice(&self.path);
        path.push(PathElement {
            kind,
            id: id.into(),
        });
        Self { path }
    }

    /// Parent key, `None` for roots.
    pub fn parent(&self) -> Option<Key> {
        if self.path.len() <= 1 {
            return None;
        }
        Some(Self {
            path: self.path[..self.path.len() - 1].to_vec(),
        })
    }

    /// The ancestor (or self) with exactly `depth` path elements.
    pub fn prefix(&self, depth: usize) -> Option<Key> {
        if depth == 0 || depth > self.path.len() {
            return None;
        }
        Some(Self {
            path: self.path[..depth].to_vec(),
        })
    }

    /// Root ancestor (the entity group this key belongs to).
    pub fn group(&self) -> Key {
        Self {
            path: vec![self.path[0].clone()],
        }
    }

    pub fn kind(&self) -> Kind {
        self.last().kind
    }

    pub fn id(&self) -> &KeyId {
        &self.last().id
    }

    /// Integer id of the last path element, if it has one.
    pub fn int_id(&self) -> Option<i64> {
        match self.id() {
            KeyId::Int(i) => Some(*i),
            KeyId::Name(_) => None,
        }
    }

    pub fn path(&self) -> &[PathElement] {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Strict ancestry: a key is not its own ancestor.
    pub fn is_ancestor_of(&self, other: &Key) -> bool {
        other.path.len() > self.path.len() && other.path.starts_with(&self.path)
    }

    /// Smallest key greater than this key and every one of its descendants.
    ///
    /// Used as an exclusive upper bound when scanning a key's subtree.
    pub fn successor_sibling(&self) -> Key {
        let mut path = self.path.clone();
        let last = path.len() - 1;
        path[last].id = path[last].id.successor();
        Self { path }
    }

    fn last(&self) -> &PathElement {
        // Construction guarantees a non-empty path.
        &self.path[self.path.len() - 1]
    }
}

impl TryFrom<Vec<PathElement>> for Key {
    type Error = String;

    fn try_from(path: Vec<PathElement>) -> Result<Self, Self::Error> {
        if path.is_empty() {
            return Err("key path must not be empty".to_string());
        }
        Ok(Self { path })
    }
}

impl From<Key> for Vec<PathElement> {
    fn from(key: Key) -> Self {
        key.path
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.path.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}:{}", element.kind, element.id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_key(test: &str, start: i64) -> Key {
        Key::root(Kind::Test, test).child(Kind::TestRun, start)
    }

    #[test]
    fn test_subtree_ordering() {
        let run = run_key("T", 100);
        let device = run.child(Kind::DeviceInfo, 1);
        let next_run = run_key("T", 101);

        assert!(run < device);
        assert!(device < next_run);
        assert!(run.is_ancestor_of(&device));
        assert!(!run.is_ancestor_of(&run));
        assert_eq!(device.parent(), Some(run.clone()));
        assert_eq!(device.group(), Key::root(Kind::Test, "T"));
        assert_eq!(device.prefix(2), Some(run.clone()));
        assert_eq!(device.prefix(3), Some(device.clone()));
        assert_eq!(device.prefix(4), None);
    }

    #[test]
    fn test_successor_sibling_bounds_subtree() {
        let run = run_key("T", 100);
        let succ = run.successor_sibling();
        let deep = run
            .child(Kind::ProfilingPointRun, "latency")
            .child(Kind::DeviceInfo, i64::MAX);

        assert!(deep < succ);
        assert!(run < succ);
        assert_eq!(succ, run_key("T", 101));

        let max_run = run_key("T", i64::MAX);
        assert!(max_run.child(Kind::DeviceInfo, 7) < max_run.successor_sibling());

        let named = Key::root(Kind::Branch, "main");
        assert!(named.child(Kind::Test, "x") < named.successor_sibling());
        assert!(named.successor_sibling() < Key::root(Kind::Branch, "main1"));
    }

    #[test]
    fn test_display() {
        let key = run_key("camera", 42).child(Kind::DeviceInfo, 1);
        assert_eq!(key.to_string(), "Test:\"camera\"/TestRun:42/DeviceInfo:1");
    }

    #[test]
    fn test_empty_path_rejected_on_deserialize() {
        let parsed: Result<Key, _> = serde_json::from_str("[]");
        assert!(parsed.is_err());

        let key = run_key("T", 5);
        let json = serde_json::to_string(&key).unwrap();
        let back: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    proptest::proptest! {
        #[test]
        fn prop_descendants_sort_inside_subtree(
            parent_id in proptest::prelude::any::<i64>(),
            child_id in proptest::prelude::any::<i64>(),
            name in "[a-z]{0,8}",
        ) {
            let parent = run_key("T", parent_id);
            let child = parent.child(Kind::ProfilingPointRun, name.as_str()).child(Kind::DeviceInfo, child_id);
            proptest::prop_assert!(parent < child);
            proptest::prop_assert!(child < parent.successor_sibling());
        }
    }
}
