//! Nested property tree
//!
//! The configuration store is a tree of string-keyed nodes whose leaves are
//! either text values or string lists. Paths address nodes by dot-separated
//! segments (`dataservices.east.members`). Interior nodes are created on
//! demand when setting; descending through a leaf is a type error, never a
//! silent overwrite.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DroverError, DroverResult, StoreError};

/// A value in the configuration tree
///
/// Serializes untagged so JSON documents read naturally: text as strings,
/// lists as arrays, subtrees as objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Scalar text leaf
    Text(String),
    /// Ordered list leaf
    List(Vec<String>),
    /// Interior node
    Tree(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Empty interior node
    pub fn tree() -> Self {
        PropertyValue::Tree(BTreeMap::new())
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, PropertyValue::Tree(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            PropertyValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&BTreeMap<String, PropertyValue>> {
        match self {
            PropertyValue::Tree(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_tree_mut(&mut self) -> Option<&mut BTreeMap<String, PropertyValue>> {
        match self {
            PropertyValue::Tree(map) => Some(map),
            _ => None,
        }
    }

    /// Resolve `path` to a node, if present
    pub fn get(&self, path: &PropertyPath) -> Option<&PropertyValue> {
        let mut node = self;
        for segment in path.segments() {
            node = node.as_tree()?.get(segment)?;
        }
        Some(node)
    }

    /// Set the node at `path`, creating interior nodes as needed
    ///
    /// Fails if an existing leaf sits on the way down.
    pub fn set(&mut self, path: &PropertyPath, value: PropertyValue) -> DroverResult<()> {
        let segments = path.segments();
        let mut node = self;
        for (i, segment) in segments.iter().enumerate() {
            let map = node.as_tree_mut().ok_or_else(|| StoreError::TypeMismatch {
                path: path.prefix(i).to_string(),
            })?;
            if i == segments.len() - 1 {
                map.insert(segment.clone(), value);
                return Ok(());
            }
            node = map
                .entry(segment.clone())
                .or_insert_with(PropertyValue::tree);
        }
        // Empty path: replace the whole tree
        *node = value;
        Ok(())
    }

    /// Remove the node at `path`, returning it if it was present
    pub fn remove(&mut self, path: &PropertyPath) -> Option<PropertyValue> {
        let segments = path.segments();
        let (last, front) = segments.split_last()?;
        let mut node = self;
        for segment in front {
            node = node.as_tree_mut()?.get_mut(segment)?;
        }
        node.as_tree_mut()?.remove(last)
    }

    /// Append items to the list at `path`, skipping duplicates
    ///
    /// A missing node becomes a fresh list. An existing text leaf is a type
    /// error.
    pub fn append(&mut self, path: &PropertyPath, items: &[String]) -> DroverResult<()> {
        match self.get(path) {
            None => {
                self.set(path, PropertyValue::List(Vec::new()))?;
            }
            Some(PropertyValue::List(_)) => {}
            Some(_) => {
                return Err(StoreError::NotAList {
                    path: path.to_string(),
                }
                .into());
            }
        }
        let mut node = self;
        for segment in path.segments() {
            node = node
                .as_tree_mut()
                .and_then(|m| m.get_mut(segment))
                .ok_or_else(|| StoreError::NotAList {
                    path: path.to_string(),
                })?;
        }
        if let PropertyValue::List(existing) = node {
            for item in items {
                if !existing.contains(item) {
                    existing.push(item.clone());
                }
            }
        }
        Ok(())
    }

    /// Merge `other` into self: subtrees merge recursively, leaves replace
    pub fn merge_from(&mut self, other: &PropertyValue) {
        match (self, other) {
            (PropertyValue::Tree(dst), PropertyValue::Tree(src)) => {
                for (key, value) in src {
                    match dst.get_mut(key) {
                        Some(existing) if existing.is_tree() && value.is_tree() => {
                            existing.merge_from(value);
                        }
                        _ => {
                            dst.insert(key.clone(), value.clone());
                        }
                    }
                }
            }
            (dst, src) => *dst = src.clone(),
        }
    }

    /// All leaf nodes under this tree as (dotted path, value) pairs
    ///
    /// Order follows the tree's own key order, so output is deterministic.
    pub fn leaves(&self) -> Vec<(PropertyPath, &PropertyValue)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves<'a>(
        &'a self,
        prefix: &mut Vec<String>,
        out: &mut Vec<(PropertyPath, &'a PropertyValue)>,
    ) {
        match self {
            PropertyValue::Tree(map) => {
                for (key, value) in map {
                    prefix.push(key.clone());
                    value.collect_leaves(prefix, out);
                    prefix.pop();
                }
            }
            leaf => out.push((PropertyPath::from_segments(prefix.clone()), leaf)),
        }
    }
}

impl Default for PropertyValue {
    /// Empty interior node, matching `ConfigStore::new`
    fn default() -> Self {
        PropertyValue::tree()
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(items: Vec<String>) -> Self {
        PropertyValue::List(items)
    }
}

/// Dot-separated path into the property tree
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyPath(Vec<String>);

impl PropertyPath {
    /// Parse a dotted path; empty paths and empty segments are rejected
    pub fn parse(raw: &str) -> DroverResult<Self> {
        if raw.is_empty() {
            return Err(DroverError::configuration(raw, "empty property path"));
        }
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(DroverError::configuration(
                raw,
                "property path has an empty segment",
            ));
        }
        Ok(PropertyPath(segments))
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        PropertyPath(segments)
    }

    /// Build a path from string-ish parts
    pub fn of<S: AsRef<str>>(parts: &[S]) -> Self {
        PropertyPath(parts.iter().map(|p| p.as_ref().to_string()).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Path of the first `len` segments
    pub fn prefix(&self, len: usize) -> PropertyPath {
        PropertyPath(self.0[..len].to_vec())
    }

    /// New path with one more segment
    pub fn child(&self, segment: &str) -> PropertyPath {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        PropertyPath(segments)
    }

    /// Last segment, the leaf key
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl FromStr for PropertyPath {
    type Err = DroverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PropertyPath::parse(s)
    }
}
