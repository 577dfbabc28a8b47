//! Hierarchical configuration store
//!
//! All cluster state lives in one tree with five fixed top-level groups.
//! Each group holds named members plus a reserved `defaults` member whose
//! keys apply to every sibling. Two layers back the tree: `explicit` holds
//! operator-provided values and is the only layer that persists; `system`
//! holds computed defaults and derived service members, rebuilt every run.

pub mod persist;
pub mod tree;

use std::collections::BTreeSet;
use std::path::Path;

use crate::error::{DroverError, DroverResult};

pub use persist::{fingerprint, BACKUP_KEEP};
pub use tree::{PropertyPath, PropertyValue};

/// Top-level group: cluster dataservice definitions
pub const DATASERVICES: &str = "dataservices";
/// Top-level group: physical hosts
pub const HOSTS: &str = "hosts";
/// Top-level group: per-host management agents
pub const MANAGERS: &str = "managers";
/// Top-level group: per-host connection routers
pub const CONNECTORS: &str = "connectors";
/// Top-level group: per-host replication services
pub const REPL_SERVICES: &str = "repl_services";
/// Reserved member whose keys apply to all members of its group
pub const DEFAULTS: &str = "defaults";

pub const TOP_GROUPS: [&str; 5] = [DATASERVICES, HOSTS, MANAGERS, CONNECTORS, REPL_SERVICES];

/// Turn a hostname into a member alias
///
/// Dots would collide with the path separator, so `db1.example.com` becomes
/// `db1_example_com`.
pub fn host_alias(hostname: &str) -> String {
    hostname.replace('.', "_")
}

/// The layered configuration store
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    explicit: PropertyValue,
    system: PropertyValue,
}

impl ConfigStore {
    pub fn new() -> ConfigStore {
        ConfigStore {
            explicit: PropertyValue::tree(),
            system: PropertyValue::tree(),
        }
    }

    /// Store whose explicit layer is the given tree
    pub fn from_explicit(explicit: PropertyValue) -> ConfigStore {
        ConfigStore {
            explicit,
            system: PropertyValue::tree(),
        }
    }

    /// Load the explicit layer from a flat file; the system layer starts empty
    pub fn load(path: &Path) -> DroverResult<ConfigStore> {
        Ok(ConfigStore {
            explicit: persist::load_tree(path)?,
            system: PropertyValue::tree(),
        })
    }

    /// Persist the explicit layer only, rotating backups
    ///
    /// Computed state in the system layer never reaches disk.
    pub fn save(&self, path: &Path, keep: usize) -> DroverResult<()> {
        persist::save_tree(&self.explicit, path, keep)
    }

    pub fn explicit(&self) -> &PropertyValue {
        &self.explicit
    }

    pub fn system(&self) -> &PropertyValue {
        &self.system
    }

    /// Read a node, explicit layer first
    pub fn get(&self, path: &PropertyPath) -> Option<&PropertyValue> {
        self.explicit.get(path).or_else(|| self.system.get(path))
    }

    pub fn get_text(&self, path: &PropertyPath) -> Option<&str> {
        self.get(path).and_then(PropertyValue::as_text)
    }

    /// Read a text node, falling back to `default` when absent
    pub fn get_or(&self, path: &PropertyPath, default: &str) -> String {
        self.get_text(path).unwrap_or(default).to_string()
    }

    pub fn get_system(&self, path: &PropertyPath) -> Option<&PropertyValue> {
        self.system.get(path)
    }

    /// Write into the explicit layer
    pub fn set(&mut self, path: &PropertyPath, value: PropertyValue) -> DroverResult<()> {
        self.explicit.set(path, value)
    }

    /// Write into the system layer
    pub fn set_system(&mut self, path: &PropertyPath, value: PropertyValue) -> DroverResult<()> {
        self.system.set(path, value)
    }

    pub fn remove(&mut self, path: &PropertyPath) -> Option<PropertyValue> {
        self.explicit.remove(path)
    }

    /// Append items to an explicit list, skipping duplicates
    pub fn append(&mut self, path: &PropertyPath, items: &[String]) -> DroverResult<()> {
        self.explicit.append(path, items)
    }

    /// Merge a whole subtree of explicit values at `path`
    ///
    /// Existing sibling keys survive; keys present in `subtree` win.
    pub fn override_subtree(
        &mut self,
        path: &PropertyPath,
        subtree: &PropertyValue,
    ) -> DroverResult<()> {
        let mut merged = match self.explicit.get(path) {
            Some(existing) => existing.clone(),
            None => PropertyValue::tree(),
        };
        merged.merge_from(subtree);
        self.explicit.set(path, merged)
    }

    /// Drop all computed state
    pub fn clear_system(&mut self) {
        self.system = PropertyValue::tree();
    }

    /// Effective value for a member key, walking the fallback chain:
    /// explicit member, explicit group defaults, system member, system
    /// group defaults.
    pub fn effective(&self, group: &str, member: &str, key: &str) -> Option<&PropertyValue> {
        let member_path = PropertyPath::of(&[group, member, key]);
        let defaults_path = PropertyPath::of(&[group, DEFAULTS, key]);
        self.explicit
            .get(&member_path)
            .or_else(|| self.explicit.get(&defaults_path))
            .or_else(|| self.system.get(&member_path))
            .or_else(|| self.system.get(&defaults_path))
    }

    pub fn effective_text(&self, group: &str, member: &str, key: &str) -> Option<&str> {
        self.effective(group, member, key)
            .and_then(PropertyValue::as_text)
    }

    pub fn effective_or(&self, group: &str, member: &str, key: &str, default: &str) -> String {
        self.effective_text(group, member, key)
            .unwrap_or(default)
            .to_string()
    }

    pub fn effective_list(&self, group: &str, member: &str, key: &str) -> Vec<String> {
        self.effective(group, member, key)
            .and_then(PropertyValue::as_list)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Member aliases of a group, across both layers, `defaults` excluded
    pub fn members(&self, group: &str) -> Vec<String> {
        let mut names = BTreeSet::new();
        let group_path = PropertyPath::of(&[group]);
        for layer in [&self.explicit, &self.system] {
            if let Some(tree) = layer.get(&group_path).and_then(PropertyValue::as_tree) {
                names.extend(tree.keys().cloned());
            }
        }
        names.remove(DEFAULTS);
        names.into_iter().collect()
    }

    /// Explicit and system layers merged into one tree, explicit winning
    pub fn merged(&self) -> PropertyValue {
        let mut merged = self.system.clone();
        merged.merge_from(&self.explicit);
        merged
    }

    /// Flat rendering of the explicit layer, as it would be saved
    pub fn to_flat_string(&self) -> String {
        persist::to_flat_string(&self.explicit)
    }

    /// Content fingerprint of the explicit layer
    pub fn fingerprint(&self) -> String {
        persist::fingerprint(&self.explicit)
    }

    /// Merge a parsed TOML document into the explicit layer
    ///
    /// Tables become subtrees, scalars become text, string arrays become
    /// lists. Mixed-type arrays are rejected.
    pub fn merge_toml(&mut self, value: &toml::Value) -> DroverResult<()> {
        let subtree = toml_to_property(value, &PropertyPath::of::<&str>(&[]))?;
        self.explicit.merge_from(&subtree);
        Ok(())
    }
}

fn toml_to_property(value: &toml::Value, at: &PropertyPath) -> DroverResult<PropertyValue> {
    match value {
        toml::Value::String(s) => Ok(PropertyValue::Text(s.clone())),
        toml::Value::Integer(i) => Ok(PropertyValue::Text(i.to_string())),
        toml::Value::Float(f) => Ok(PropertyValue::Text(f.to_string())),
        toml::Value::Boolean(b) => Ok(PropertyValue::Text(b.to_string())),
        toml::Value::Datetime(d) => Ok(PropertyValue::Text(d.to_string())),
        toml::Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    toml::Value::String(s) => list.push(s.clone()),
                    other => {
                        return Err(DroverError::configuration(
                            at.to_string(),
                            format!("list items must be strings, got {}", other.type_str()),
                        ));
                    }
                }
            }
            Ok(PropertyValue::List(list))
        }
        toml::Value::Table(table) => {
            let mut tree = PropertyValue::tree();
            for (key, item) in table {
                let child = at.child(key);
                let converted = toml_to_property(item, &child)?;
                tree.set(&PropertyPath::of(&[key.as_str()]), converted)?;
            }
            Ok(tree)
        }
    }
}
