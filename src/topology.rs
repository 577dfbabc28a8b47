//! Cluster topology resolution
//!
//! A dataservice is either physical (it owns hosts and replication flows)
//! or composite (it aggregates other dataservices and never owns replication
//! directly). This module resolves the store into per-dataservice topology:
//! member roles, master endpoints, relay chains, and which service layers
//! each dataservice uses. It also derives the per-host service members
//! (replicators, managers, connectors) into the store's system layer.

use crate::error::{DroverError, DroverResult};
use crate::store::{
    ConfigStore, PropertyPath, PropertyValue, CONNECTORS, DATASERVICES, HOSTS, MANAGERS,
    REPL_SERVICES,
};

/// Default replication history log port
pub const DEFAULT_THL_PORT: &str = "2112";
/// Default manager listen port
pub const DEFAULT_MGR_PORT: &str = "7800";
/// Default connector listen port
pub const DEFAULT_CONN_PORT: &str = "9999";

/// Role a host plays within one dataservice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
    Relay,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Slave => write!(f, "slave"),
            Role::Relay => write!(f, "relay"),
        }
    }
}

/// Resolved topology of one dataservice
#[derive(Debug, Clone)]
pub struct Topology {
    pub dataservice: String,
    pub composite: bool,
    /// Child dataservices of a composite
    pub children: Vec<String>,
    /// Host aliases of a physical dataservice
    pub members: Vec<String>,
    pub masters: Vec<String>,
    /// Upstream dataservice this one replicates from, if any
    pub relay_source: Option<String>,
    pub connectors: Vec<String>,
    pub managed: bool,
    pub thl_port: String,
    /// (address, thl port) pairs of this dataservice's masters
    master_endpoints: Vec<(String, String)>,
    /// Endpoints of the relay source's masters, when relaying
    relay_endpoints: Vec<(String, String)>,
}

impl Topology {
    /// Resolve one dataservice from the store, enforcing shape invariants
    pub fn build(store: &ConfigStore, dataservice: &str) -> DroverResult<Topology> {
        let ds_path = PropertyPath::of(&[DATASERVICES, dataservice]);
        if store.get(&ds_path).is_none() {
            return Err(DroverError::configuration(
                ds_path.to_string(),
                "dataservice is not configured",
            ));
        }

        let kind = store.effective_or(DATASERVICES, dataservice, "topology", "master-slave");
        let composite = kind == "composite";
        let children = store.effective_list(DATASERVICES, dataservice, "composite-dataservices");
        let members = store.effective_list(DATASERVICES, dataservice, "members");
        let masters = split_csv(store.effective_text(DATASERVICES, dataservice, "master"));
        let relay_source = store
            .effective_text(DATASERVICES, dataservice, "relay-source")
            .map(str::to_string);
        let connectors = store.effective_list(DATASERVICES, dataservice, "connectors");
        let managed =
            store.effective_or(DATASERVICES, dataservice, "managed", "true") == "true";
        let thl_port =
            store.effective_or(DATASERVICES, dataservice, "thl-port", DEFAULT_THL_PORT);

        if composite {
            if !members.is_empty() {
                return Err(DroverError::configuration(
                    ds_path.child("members").to_string(),
                    "composite dataservice cannot list physical members",
                ));
            }
            if children.is_empty() {
                return Err(DroverError::configuration(
                    ds_path.child("composite-dataservices").to_string(),
                    "composite dataservice has no member dataservices",
                ));
            }
            for child in &children {
                let child_path = PropertyPath::of(&[DATASERVICES, child]);
                if store.get(&child_path).is_none() {
                    return Err(DroverError::configuration(
                        child_path.to_string(),
                        format!("composite member of '{dataservice}' is not configured"),
                    ));
                }
                let child_kind = store.effective_or(DATASERVICES, child, "topology", "master-slave");
                if child_kind == "composite" {
                    return Err(DroverError::configuration(
                        child_path.to_string(),
                        "composite dataservices cannot nest",
                    ));
                }
            }
            // A composite may not own replication services directly
            for member in store.members(REPL_SERVICES) {
                if store.effective_text(REPL_SERVICES, &member, "dataservice")
                    == Some(dataservice)
                {
                    return Err(DroverError::configuration(
                        PropertyPath::of(&[REPL_SERVICES, &member]).to_string(),
                        format!("composite dataservice '{dataservice}' cannot own a replication service"),
                    ));
                }
            }
        } else {
            if members.is_empty() {
                return Err(DroverError::configuration(
                    ds_path.child("members").to_string(),
                    "dataservice has no members",
                ));
            }
            for host in &members {
                if store.get(&PropertyPath::of(&[HOSTS, host])).is_none() {
                    return Err(DroverError::configuration(
                        PropertyPath::of(&[HOSTS, host]).to_string(),
                        format!("member of '{dataservice}' is not a configured host"),
                    ));
                }
            }
            if masters.is_empty() {
                return Err(DroverError::configuration(
                    ds_path.child("master").to_string(),
                    "dataservice has no master",
                ));
            }
            for master in &masters {
                if !members.contains(master) {
                    return Err(DroverError::configuration(
                        ds_path.child("master").to_string(),
                        format!("master '{master}' is not a member of '{dataservice}'"),
                    ));
                }
            }
            if let Some(source) = &relay_source {
                if source == dataservice {
                    return Err(DroverError::configuration(
                        ds_path.child("relay-source").to_string(),
                        "dataservice cannot relay from itself",
                    ));
                }
                if store
                    .get(&PropertyPath::of(&[DATASERVICES, source]))
                    .is_none()
                {
                    return Err(DroverError::configuration(
                        ds_path.child("relay-source").to_string(),
                        format!("relay source '{source}' is not configured"),
                    ));
                }
            }
        }

        let master_endpoints = endpoints(store, &masters, &thl_port)?;
        let relay_endpoints = match &relay_source {
            Some(source) => {
                let upstream_masters =
                    split_csv(store.effective_text(DATASERVICES, source, "master"));
                let upstream_port =
                    store.effective_or(DATASERVICES, source, "thl-port", DEFAULT_THL_PORT);
                endpoints(store, &upstream_masters, &upstream_port)?
            }
            None => Vec::new(),
        };

        Ok(Topology {
            dataservice: dataservice.to_string(),
            composite,
            children,
            members,
            masters,
            relay_source,
            connectors,
            managed,
            thl_port,
            master_endpoints,
            relay_endpoints,
        })
    }

    /// Role of a host within this dataservice; `None` if it is not a member
    pub fn role(&self, host: &str) -> Option<Role> {
        if self.composite || !self.members.contains(&host.to_string()) {
            return None;
        }
        if self.masters.iter().any(|m| m == host) {
            if self.relay_source.is_some() {
                Some(Role::Relay)
            } else {
                Some(Role::Master)
            }
        } else {
            Some(Role::Slave)
        }
    }

    /// URI list a host pulls its replication log from
    ///
    /// Masters of a non-relaying dataservice pull from nobody. A relay pulls
    /// from the upstream dataservice's masters; everyone else pulls from the
    /// local masters.
    pub fn master_thl_uri(&self, host: &str) -> Option<String> {
        let endpoints = match self.role(host)? {
            Role::Master => return None,
            Role::Relay => &self.relay_endpoints,
            Role::Slave => &self.master_endpoints,
        };
        if endpoints.is_empty() {
            return None;
        }
        Some(
            endpoints
                .iter()
                .map(|(addr, port)| format!("thl://{addr}:{port}/"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    pub fn use_replicator(&self) -> bool {
        !self.composite && !self.members.is_empty()
    }

    pub fn use_management(&self) -> bool {
        !self.composite && self.managed
    }

    pub fn use_connector(&self) -> bool {
        !self.connectors.is_empty()
    }
}

fn split_csv(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn endpoints(
    store: &ConfigStore,
    hosts: &[String],
    port: &str,
) -> DroverResult<Vec<(String, String)>> {
    let mut out = Vec::with_capacity(hosts.len());
    for host in hosts {
        let address = store
            .effective_text(HOSTS, host, "address")
            .ok_or_else(|| {
                DroverError::configuration(
                    PropertyPath::of(&[HOSTS, host, "address"]).to_string(),
                    "no address configured",
                )
            })?;
        out.push((address.to_string(), port.to_string()));
    }
    Ok(out)
}

/// Dataservices that list `host` as a member, in store order
pub fn dataservices_of_host(store: &ConfigStore, host: &str) -> Vec<String> {
    store
        .members(DATASERVICES)
        .into_iter()
        .filter(|ds| {
            store
                .effective_list(DATASERVICES, ds, "members")
                .contains(&host.to_string())
        })
        .collect()
}

/// Materialize per-host service members into the system layer
///
/// For every physical dataservice this creates a replication service member
/// per host, a manager member per host when the dataservice is managed, and
/// a connector member per listed connector host. Keys are `<ds>_<host>`.
/// Derived members carry back-references to their host and dataservice and
/// are rebuilt every run; they never persist.
pub fn derive_service_members(store: &mut ConfigStore) -> DroverResult<()> {
    let dataservices = store.members(DATASERVICES);
    for ds in dataservices {
        let kind = store.effective_or(DATASERVICES, &ds, "topology", "master-slave");
        if kind == "composite" {
            continue;
        }
        let members = store.effective_list(DATASERVICES, &ds, "members");
        let managed = store.effective_or(DATASERVICES, &ds, "managed", "true") == "true";
        let connectors = store.effective_list(DATASERVICES, &ds, "connectors");

        for host in &members {
            let key = format!("{ds}_{host}");
            write_back_refs(store, REPL_SERVICES, &key, host, &ds)?;
            if managed {
                write_back_refs(store, MANAGERS, &key, host, &ds)?;
            }
        }
        for host in &connectors {
            let key = format!("{ds}_{host}");
            write_back_refs(store, CONNECTORS, &key, host, &ds)?;
        }
    }
    Ok(())
}

fn write_back_refs(
    store: &mut ConfigStore,
    group: &str,
    key: &str,
    host: &str,
    dataservice: &str,
) -> DroverResult<()> {
    store.set_system(
        &PropertyPath::of(&[group, key, "host"]),
        PropertyValue::Text(host.to_string()),
    )?;
    store.set_system(
        &PropertyPath::of(&[group, key, "dataservice"]),
        PropertyValue::Text(dataservice.to_string()),
    )?;
    Ok(())
}

/// Service members of a group that run on `host`
pub fn service_members_on_host(store: &ConfigStore, group: &str, host: &str) -> Vec<String> {
    store
        .members(group)
        .into_iter()
        .filter(|m| store.effective_text(group, m, "host") == Some(host))
        .collect()
}
