//! Dynamic default probes
//!
//! Some defaults come from the environment: the invoking user, the local
//! hostname, a DNS lookup of a member's address. A probe can hang (a stuck
//! resolver most commonly), so each one runs on its own thread and is given
//! a bounded wait; on timeout the thread is abandoned and the caller falls
//! back to the prompt's static class default.

use std::net::ToSocketAddrs;
use std::process::Command;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// What a probe measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// OS account running this process
    LocalUser,
    /// Local machine's hostname
    LocalHostname,
    /// System temp directory
    LocalTempDir,
    /// DNS resolution of a member alias
    ResolveAddress,
}

/// Run one probe with a timeout; `None` on timeout or probe failure
pub fn run_probe(kind: ProbeKind, member: Option<&str>, timeout: Duration) -> Option<String> {
    let member = member.map(str::to_string);
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // Receiver may be gone after a timeout; the send result is moot then
        let _ = tx.send(execute(kind, member.as_deref()));
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => None,
    }
}

fn execute(kind: ProbeKind, member: Option<&str>) -> Option<String> {
    match kind {
        ProbeKind::LocalUser => local_user(),
        ProbeKind::LocalHostname => local_hostname(),
        ProbeKind::LocalTempDir => Some(std::env::temp_dir().to_string_lossy().into_owned()),
        ProbeKind::ResolveAddress => member.and_then(resolve_address),
    }
}

pub fn local_user() -> Option<String> {
    std::env::var("USER")
        .ok()
        .or_else(|| std::env::var("USERNAME").ok())
        .filter(|u| !u.is_empty())
        .or_else(|| command_line(Command::new("id").arg("-un")))
}

pub fn local_hostname() -> Option<String> {
    command_line(&mut Command::new("hostname"))
}

/// Resolve a member alias to an IP address
///
/// Aliases flatten dots to underscores, so `db1_example_com` is retried as
/// `db1.example.com` when the literal spelling does not resolve.
fn resolve_address(member: &str) -> Option<String> {
    lookup(member).or_else(|| {
        if member.contains('_') {
            lookup(&member.replace('_', "."))
        } else {
            None
        }
    })
}

fn lookup(name: &str) -> Option<String> {
    (name, 0u16)
        .to_socket_addrs()
        .ok()?
        .next()
        .map(|addr| addr.ip().to_string())
}

fn command_line(command: &mut Command) -> Option<String> {
    let output = command.output().ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}
