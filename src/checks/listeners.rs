//! Held listeners backing the firewall reachability check
//!
//! Before peers probe each other, the coordinator opens every service port
//! on every healthy host and keeps them open for the duration of the probe.
//! A connect that fails then is a network or firewall problem, not a race
//! with service startup.

use std::collections::BTreeSet;

use crate::planner::PerHostConfiguration;
use crate::remote::{HostTransport, ListenerHandle};
use crate::store::{CONNECTORS, DATASERVICES, MANAGERS, REPL_SERVICES};
use crate::topology::{DEFAULT_CONN_PORT, DEFAULT_MGR_PORT, DEFAULT_THL_PORT};

/// Ports the host's own services will listen on, sorted and deduplicated
pub fn service_ports(config: &PerHostConfiguration) -> Result<Vec<u16>, String> {
    let mut ports = BTreeSet::new();

    for service in config.service_members(REPL_SERVICES) {
        let Some(ds) = config.effective_text(REPL_SERVICES, &service, "dataservice") else {
            continue;
        };
        let ds = ds.to_string();
        let raw = config.effective_or(DATASERVICES, &ds, "thl-port", DEFAULT_THL_PORT);
        ports.insert(parse_port(&raw, &service)?);
    }
    for service in config.service_members(MANAGERS) {
        let raw = config.effective_or(MANAGERS, &service, "mgr-listen-port", DEFAULT_MGR_PORT);
        ports.insert(parse_port(&raw, &service)?);
    }
    for service in config.service_members(CONNECTORS) {
        let raw = config.effective_or(CONNECTORS, &service, "conn-listen-port", DEFAULT_CONN_PORT);
        ports.insert(parse_port(&raw, &service)?);
    }

    Ok(ports.into_iter().collect())
}

fn parse_port(raw: &str, service: &str) -> Result<u16, String> {
    raw.parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| format!("service {service} has invalid port '{raw}'"))
}

/// Listeners held open across a set of hosts
pub struct ListenerSet {
    held: Vec<Box<dyn ListenerHandle>>,
}

impl ListenerSet {
    /// Open each host's service ports through its transport
    ///
    /// Hosts whose listener cannot be opened are returned as failures; the
    /// rest stay held until `close`.
    pub fn open<'a>(
        hosts: impl IntoIterator<Item = (&'a dyn HostTransport, &'a PerHostConfiguration)>,
    ) -> (ListenerSet, Vec<(String, String)>) {
        let mut held = Vec::new();
        let mut failures = Vec::new();
        for (transport, config) in hosts {
            match service_ports(config) {
                Ok(ports) if ports.is_empty() => {}
                Ok(ports) => match transport.open_listener(&ports) {
                    Ok(handle) => held.push(handle),
                    Err(e) => failures.push((config.host.clone(), e.to_string())),
                },
                Err(message) => failures.push((config.host.clone(), message)),
            }
        }
        (ListenerSet { held }, failures)
    }

    pub fn count(&self) -> usize {
        self.held.len()
    }

    /// Release every held port
    pub fn close(self) {
        for handle in self.held {
            handle.close();
        }
    }
}
