//! Host fitness checks for the prevalidate and validate passes
//!
//! Everything here runs on the target host itself via a RunChecks request,
//! so checks may touch the local filesystem and network freely. Findings go
//! into the report; nothing here returns an error, because one broken check
//! must not hide the others.

use std::collections::BTreeSet;
use std::fs;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};

use crate::report::Report;
use crate::store::{CONNECTORS, HOSTS, MANAGERS};
use crate::topology::{Topology, DEFAULT_CONN_PORT, DEFAULT_MGR_PORT};

use super::listeners::service_ports;
use super::CheckContext;

pub(crate) fn write_access(ctx: &CheckContext, report: &mut Report) {
    let home = Path::new(&ctx.config.home_directory);
    let probe_dir = nearest_existing(home);
    match probe_writable(&probe_dir) {
        Ok(()) => report.add_info(
            "write-access",
            format!("{} is writable by {}", probe_dir.display(), ctx.config.user),
        ),
        Err(e) => report.add_error(
            "write-access",
            format!("cannot write under {}: {e}", probe_dir.display()),
        ),
    }
}

pub(crate) fn temp_directory(ctx: &CheckContext, report: &mut Report) {
    let temp = Path::new(&ctx.config.temp_directory);
    let result = fs::create_dir_all(temp).and_then(|_| probe_writable(temp));
    match result {
        Ok(()) => report.add_info(
            "temp-directory",
            format!("{} is usable for staging", temp.display()),
        ),
        Err(e) => report.add_error(
            "temp-directory",
            format!("temp directory {} is unusable: {e}", temp.display()),
        ),
    }
}

pub(crate) fn hostname_resolves(ctx: &CheckContext, report: &mut Report) {
    // Member aliases flatten dots to underscores; undo that for lookup
    let hostname = ctx.config.host.replace('_', ".");
    let resolved = (hostname.as_str(), 0u16)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next());
    match resolved {
        Some(addr) if addr.ip().to_string() == ctx.config.address => {
            report.add_info(
                "hostname-resolves",
                format!("'{hostname}' resolves to the configured address"),
            );
        }
        Some(addr) => {
            report.add_warning(
                "hostname-resolves",
                format!(
                    "'{hostname}' resolves to {} but the configured address is {}",
                    addr.ip(),
                    ctx.config.address
                ),
            );
        }
        None => {
            report.add_error(
                "hostname-resolves",
                format!("hostname '{hostname}' does not resolve"),
            );
        }
    }
}

pub(crate) fn port_availability(ctx: &CheckContext, report: &mut Report) {
    let ports = match service_ports(ctx.config) {
        Ok(ports) => ports,
        Err(message) => {
            report.add_error("port-availability", message);
            return;
        }
    };
    if ports.is_empty() {
        report.add_info("port-availability", "no service ports configured on this host");
        return;
    }

    // With a live release its services legitimately hold their ports
    let upgrading = ctx.paths().current_marker().exists();
    let mut free = Vec::new();
    for port in ports {
        match TcpListener::bind(("0.0.0.0", port)) {
            Ok(_) => free.push(port.to_string()),
            Err(e) if upgrading => report.add_warning(
                "port-availability",
                format!("port {port} is in use ({e}); expected during an upgrade"),
            ),
            Err(e) => report.add_error(
                "port-availability",
                format!("port {port} is not bindable: {e}"),
            ),
        }
    }
    if !free.is_empty() {
        report.add_info(
            "port-availability",
            format!("ports free: {}", free.join(", ")),
        );
    }
}

pub(crate) fn existing_installation(ctx: &CheckContext, report: &mut Report) {
    let marker = ctx.paths().current_marker();
    match fs::read_to_string(&marker) {
        Ok(content) => {
            let active = content.trim().to_string();
            report.add_info(
                "existing-installation",
                format!("active release {active} found; deploying alongside it"),
            );
            if !ctx.config.service_members(CONNECTORS).is_empty() {
                report.set_property("connector-restart-needed", "true");
            }
        }
        Err(_) => {
            report.add_info("existing-installation", "no active release; fresh installation");
        }
    }
}

pub(crate) fn firewall_peer_reachability(ctx: &CheckContext, report: &mut Report) {
    let store = ctx.config.to_store();
    let mut endpoints: BTreeSet<(String, String, String)> = BTreeSet::new();

    for dataservice in &ctx.config.dataservices {
        let topo = match Topology::build(&store, dataservice) {
            Ok(topo) => topo,
            Err(e) => {
                report.add_error("firewall-peer-reachability", e.to_string());
                continue;
            }
        };
        for peer in topo.members.iter().filter(|m| **m != ctx.config.host) {
            let Some(address) = ctx.config.effective_text(HOSTS, peer, "address") else {
                continue;
            };
            endpoints.insert((peer.clone(), address.to_string(), topo.thl_port.clone()));
            if topo.managed {
                let member = format!("{dataservice}_{peer}");
                let port =
                    ctx.config
                        .effective_or(MANAGERS, &member, "mgr-listen-port", DEFAULT_MGR_PORT);
                endpoints.insert((peer.clone(), address.to_string(), port));
            }
        }
        for peer in topo.connectors.iter().filter(|m| **m != ctx.config.host) {
            let Some(address) = ctx.config.effective_text(HOSTS, peer, "address") else {
                continue;
            };
            let member = format!("{dataservice}_{peer}");
            let port =
                ctx.config
                    .effective_or(CONNECTORS, &member, "conn-listen-port", DEFAULT_CONN_PORT);
            endpoints.insert((peer.clone(), address.to_string(), port));
        }
    }

    if endpoints.is_empty() {
        report.add_info("firewall-peer-reachability", "no peer endpoints to probe");
        return;
    }

    let mut reached = 0usize;
    for (peer, address, port) in &endpoints {
        let target = format!("{address}:{port}");
        let sockaddr = target.to_socket_addrs().ok().and_then(|mut a| a.next());
        let outcome = match sockaddr {
            Some(addr) => TcpStream::connect_timeout(&addr, ctx.connect_timeout)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            None => Err("address does not resolve".to_string()),
        };
        match outcome {
            Ok(()) => reached += 1,
            Err(e) => report.add_error(
                "firewall-peer-reachability",
                format!("cannot reach {peer} at {target}: {e}"),
            ),
        }
    }
    if reached == endpoints.len() {
        report.add_info(
            "firewall-peer-reachability",
            format!("all {reached} peer endpoints reachable"),
        );
    }
}

fn nearest_existing(path: &Path) -> PathBuf {
    let mut current = path;
    while !current.exists() {
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current.to_path_buf()
}

fn probe_writable(dir: &Path) -> std::io::Result<()> {
    let file = tempfile::Builder::new()
        .prefix(".drover-probe-")
        .tempfile_in(dir)?;
    file.close()
}
