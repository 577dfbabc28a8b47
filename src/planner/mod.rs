//! Deployment planning
//!
//! The planner turns the full configuration store into per-host
//! configurations: immutable, filtered snapshots carrying exactly what one
//! host needs to validate and deploy itself. Snapshots are built in
//! parallel, one worker per host, so a slow or unreachable host cannot
//! stall the others; a worker that fails is reported and its host omitted.

pub mod steps;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::error::{DroverError, DroverResult};
use crate::store::{
    persist, ConfigStore, PropertyPath, PropertyValue, CONNECTORS, DATASERVICES, DEFAULTS, HOSTS,
    MANAGERS, REPL_SERVICES,
};
use crate::topology;

pub use steps::{
    resolve_step_groups, DeploymentStep, StepGroup, FINAL_GROUP_ID, FINAL_STEP_WEIGHT,
    FIRST_GROUP_ID,
};

/// Facts learned by probing a host before planning
#[derive(Debug, Clone, Default)]
pub struct HostFacts {
    pub user: Option<String>,
    pub home_directory: Option<String>,
    pub temp_directory: Option<String>,
    pub tool_version: Option<String>,
}

/// Source of per-host facts; the executor provides a transport-backed one
pub trait HostFactsProbe: Sync {
    /// `None` when the host cannot be probed; planning continues without
    fn facts(&self, host: &str, address: &str) -> Option<HostFacts>;
}

/// Probe that learns nothing
pub struct NullProbe;

impl HostFactsProbe for NullProbe {
    fn facts(&self, _host: &str, _address: &str) -> Option<HostFacts> {
        None
    }
}

/// Immutable configuration slice for one host
///
/// Carries the merged values of every group member the host owns plus the
/// dataservice and host entries it needs to resolve its own topology. The
/// fingerprint commits to the property tree; validate-commit re-hashes the
/// staged copy against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerHostConfiguration {
    pub host: String,
    pub address: String,
    pub user: String,
    pub home_directory: String,
    pub temp_directory: String,
    /// Dataservices this host is a member of
    pub dataservices: Vec<String>,
    pub fingerprint: String,
    pub properties: PropertyValue,
}

impl PerHostConfiguration {
    pub fn get(&self, path: &PropertyPath) -> Option<&PropertyValue> {
        self.properties.get(path)
    }

    /// Member value with group-defaults fallback
    pub fn effective(&self, group: &str, member: &str, key: &str) -> Option<&PropertyValue> {
        self.properties
            .get(&PropertyPath::of(&[group, member, key]))
            .or_else(|| {
                self.properties
                    .get(&PropertyPath::of(&[group, DEFAULTS, key]))
            })
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

    /// Service members of a group that run on this host
    pub fn service_members(&self, group: &str) -> Vec<String> {
        let Some(tree) = self
            .properties
            .get(&PropertyPath::of(&[group]))
            .and_then(PropertyValue::as_tree)
        else {
            return Vec::new();
        };
        tree.keys()
            .filter(|member| *member != DEFAULTS)
            .filter(|member| {
                self.effective_text(group, member, "host") == Some(self.host.as_str())
            })
            .cloned()
            .collect()
    }

    /// View the snapshot as a store, e.g. for topology resolution
    pub fn to_store(&self) -> ConfigStore {
        ConfigStore::from_explicit(self.properties.clone())
    }

    /// Flat rendering of the snapshot, as staged on the host
    pub fn flat_string(&self) -> String {
        persist::to_flat_string(&self.properties)
    }
}

/// Build the snapshot for one host from an already-probed store
pub fn build_host_configuration(
    store: &ConfigStore,
    host: &str,
) -> DroverResult<PerHostConfiguration> {
    let address = required(store, host, "address")?;
    let user = required(store, host, "user")?;
    let home_directory = required(store, host, "home-directory")?;
    let temp_directory = required(store, host, "temp-directory")?;

    let dataservices = topology::dataservices_of_host(store, host);
    if dataservices.is_empty() {
        return Err(DroverError::configuration(
            PropertyPath::of(&[HOSTS, host]).to_string(),
            "host is not a member of any dataservice",
        ));
    }

    let related = related_dataservices(store, &dataservices);
    let properties = filter_properties(store, host, &related);
    let fingerprint = persist::fingerprint(&properties);

    Ok(PerHostConfiguration {
        host: host.to_string(),
        address,
        user,
        home_directory,
        temp_directory,
        dataservices,
        fingerprint,
        properties,
    })
}

fn required(store: &ConfigStore, host: &str, key: &str) -> DroverResult<String> {
    store
        .effective_text(HOSTS, host, key)
        .map(str::to_string)
        .ok_or_else(|| {
            DroverError::configuration(
                PropertyPath::of(&[HOSTS, host, key]).to_string(),
                "no value configured",
            )
        })
}

/// Transitive closure of dataservices the host's own services depend on:
/// relay sources, plus composites aggregating anything in the set.
fn related_dataservices(store: &ConfigStore, own: &[String]) -> BTreeSet<String> {
    let mut related: BTreeSet<String> = own.iter().cloned().collect();
    loop {
        let mut grew = false;
        for ds in related.clone() {
            if let Some(source) = store.effective_text(DATASERVICES, &ds, "relay-source") {
                grew |= related.insert(source.to_string());
            }
        }
        for ds in store.members(DATASERVICES) {
            let children = store.effective_list(DATASERVICES, &ds, "composite-dataservices");
            if children.iter().any(|c| related.contains(c)) {
                grew |= related.insert(ds);
            }
        }
        if !grew {
            break;
        }
    }
    related
}

fn filter_properties(
    store: &ConfigStore,
    host: &str,
    related: &BTreeSet<String>,
) -> PropertyValue {
    let merged = store.merged();
    let mut out = PropertyValue::tree();

    // Hosts referenced by any related dataservice, for master endpoints
    let mut referenced_hosts: BTreeSet<String> = BTreeSet::new();
    referenced_hosts.insert(host.to_string());
    for ds in related {
        referenced_hosts.extend(store.effective_list(DATASERVICES, ds, "members"));
        referenced_hosts.extend(store.effective_list(DATASERVICES, ds, "connectors"));
    }

    copy_members(&merged, &mut out, HOSTS, referenced_hosts.iter());
    copy_members(&merged, &mut out, DATASERVICES, related.iter());
    for group in [MANAGERS, CONNECTORS, REPL_SERVICES] {
        let on_host = topology::service_members_on_host(store, group, host);
        copy_members(&merged, &mut out, group, on_host.iter());
    }
    out
}

fn copy_members<'a>(
    merged: &PropertyValue,
    out: &mut PropertyValue,
    group: &str,
    members: impl Iterator<Item = &'a String>,
) {
    for member in members.map(String::as_str).chain([DEFAULTS]) {
        let path = PropertyPath::of(&[group, member]);
        if let Some(subtree) = merged.get(&path) {
            // Group shape was validated on the way in
            let _ = out.set(&path, subtree.clone());
        }
    }
}

/// Build snapshots for the given hosts in parallel
///
/// Returns the successful snapshots keyed by host, plus a (host, reason)
/// list for the workers that failed. Probing runs inside each worker so a
/// hung probe delays only its own host.
pub fn build_per_host_configurations(
    store: &ConfigStore,
    hosts: &[String],
    probe: &dyn HostFactsProbe,
) -> (BTreeMap<String, PerHostConfiguration>, Vec<(String, String)>) {
    let mut configs = BTreeMap::new();
    let mut failures = Vec::new();

    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        for host in hosts {
            let tx = tx.clone();
            scope.spawn(move || {
                let result = plan_worker(store, probe, host);
                let _ = tx.send((host.clone(), result));
            });
        }
        drop(tx);

        while let Ok((host, result)) = rx.recv() {
            match result {
                Ok(config) => {
                    configs.insert(host, config);
                }
                Err(reason) => failures.push((host, reason)),
            }
        }
    });

    failures.sort();
    (configs, failures)
}

fn plan_worker(
    store: &ConfigStore,
    probe: &dyn HostFactsProbe,
    host: &str,
) -> Result<PerHostConfiguration, String> {
    let mut local = store.clone();
    let address = local
        .effective_text(HOSTS, host, "address")
        .map(str::to_string)
        .ok_or("no address configured")?;

    if let Some(facts) = probe.facts(host, &address) {
        let probed = [
            ("user", facts.user),
            ("home-directory", facts.home_directory),
            ("temp-directory", facts.temp_directory),
        ];
        for (key, value) in probed {
            if let Some(value) = value {
                local
                    .set_system(&PropertyPath::of(&[HOSTS, host, key]), value.into())
                    .map_err(|e| e.to_string())?;
            }
        }
    }

    build_host_configuration(&local, host).map_err(|e| e.to_string())
}
