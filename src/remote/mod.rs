//! Remote command execution
//!
//! Drover never installs an agent. The coordinator reaches a host by running
//! the tool itself there over SSH (`drover exec --command-class=<Name>`),
//! piping one JSON request in and reading one JSON envelope back. The
//! `HostTransport` trait hides whether that exchange crosses SSH or is
//! dispatched in-process when the target host is the coordinator itself.

pub mod dispatch;
pub mod protocol;

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::process::{Child, ChildStdin, Command, Stdio};

use crate::config::ToolConfig;
use crate::error::RemoteError;

pub use protocol::{
    decode_response, CommandRequest, Outcome, RemoteFault, ResponseEnvelope, PROTOCOL_VERSION,
};

/// One side of a command exchange with a single host
pub trait HostTransport: Send + Sync {
    /// Alias of the host this transport reaches
    fn host(&self) -> &str;

    /// Send one request and wait for its envelope
    fn invoke(&self, request: &CommandRequest) -> Result<ResponseEnvelope, RemoteError>;

    /// Bind ports on the host and hold them until the handle is closed
    fn open_listener(&self, ports: &[u16]) -> Result<Box<dyn ListenerHandle>, RemoteError>;
}

/// A held listener; dropping without `close` leaves teardown to the OS
pub trait ListenerHandle: Send + std::fmt::Debug {
    fn close(self: Box<Self>);
}

/// Transport that shells out to ssh
pub struct SshTransport {
    host: String,
    destination: String,
    program: String,
    args: Vec<String>,
    connect_timeout_secs: u64,
    remote_program: String,
}

impl SshTransport {
    pub fn new(config: &ToolConfig, host: &str, address: &str, user: &str) -> SshTransport {
        SshTransport {
            host: host.to_string(),
            destination: format!("{user}@{address}"),
            program: config.ssh.program.clone(),
            args: config.ssh.args.clone(),
            connect_timeout_secs: config.ssh.connect_timeout_secs,
            remote_program: config.ssh.remote_program.clone(),
        }
    }

    fn command(&self, class: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
            .arg(&self.destination)
            .arg(format!(
                "{} exec --command-class={}",
                shell_quote(&self.remote_program),
                class
            ));
        cmd
    }

    fn transport_err(&self, message: impl Into<String>) -> RemoteError {
        RemoteError::Transport {
            host: self.host.clone(),
            message: message.into(),
        }
    }
}

impl HostTransport for SshTransport {
    fn host(&self) -> &str {
        &self.host
    }

    fn invoke(&self, request: &CommandRequest) -> Result<ResponseEnvelope, RemoteError> {
        let payload = request
            .encode()
            .map_err(|e| self.transport_err(e.to_string()))?;

        let mut child = self
            .command(request.class_name())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.transport_err(format!("failed to spawn {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.as_bytes())
                .and_then(|_| stdin.write_all(b"\n"))
                .map_err(|e| self.transport_err(format!("failed to send request: {e}")))?;
            // Dropping stdin closes it so the remote side sees EOF
        }

        let output = child
            .wait_with_output()
            .map_err(|e| self.transport_err(e.to_string()))?;

        if !output.status.success() {
            return Err(RemoteError::CommandFailed {
                host: self.host.clone(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        protocol::decode_response(&self.host, &output.stdout)
    }

    fn open_listener(&self, ports: &[u16]) -> Result<Box<dyn ListenerHandle>, RemoteError> {
        let request = CommandRequest::Listen {
            ports: ports.to_vec(),
        };
        let payload = request
            .encode()
            .map_err(|e| self.transport_err(e.to_string()))?;

        let mut child = self
            .command(request.class_name())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.transport_err(format!("failed to spawn {}: {e}", self.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.transport_err("listener stdin was not piped"))?;
        // Stdin stays open; the stop word travels over it later
        stdin
            .write_all(payload.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush())
            .map_err(|e| self.transport_err(format!("failed to send request: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.transport_err("listener stdout was not piped"))?;
        let mut ready = String::new();
        BufReader::new(stdout)
            .read_line(&mut ready)
            .map_err(|e| self.transport_err(format!("failed to read ready line: {e}")))?;

        let envelope = protocol::decode_response(&self.host, ready.as_bytes())?;
        match envelope.outcome {
            Outcome::Ok { .. } => Ok(Box::new(SshListener {
                child,
                stdin,
            })),
            Outcome::Failed { error } => {
                let _ = child.kill();
                let _ = child.wait();
                Err(self.transport_err(error.to_string()))
            }
        }
    }
}

#[derive(Debug)]
struct SshListener {
    child: Child,
    stdin: ChildStdin,
}

impl ListenerHandle for SshListener {
    fn close(mut self: Box<Self>) {
        // Best effort; a vanished child already released its ports
        let _ = self.stdin.write_all(b"stop\n");
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }
}

/// Transport for the host the coordinator itself runs on
///
/// Requests take the exact same shapes as over SSH but are handled by the
/// same dispatch function the `exec` subcommand uses, without a process hop.
pub struct LocalTransport {
    host: String,
}

impl LocalTransport {
    pub fn new(host: &str) -> LocalTransport {
        LocalTransport {
            host: host.to_string(),
        }
    }
}

impl HostTransport for LocalTransport {
    fn host(&self) -> &str {
        &self.host
    }

    fn invoke(&self, request: &CommandRequest) -> Result<ResponseEnvelope, RemoteError> {
        if matches!(request, CommandRequest::Listen { .. }) {
            return Err(RemoteError::Transport {
                host: self.host.clone(),
                message: "listen requests go through open_listener".to_string(),
            });
        }
        Ok(dispatch::handle_request(&self.host, request))
    }

    fn open_listener(&self, ports: &[u16]) -> Result<Box<dyn ListenerHandle>, RemoteError> {
        let mut bound = Vec::with_capacity(ports.len());
        for port in ports {
            let listener =
                TcpListener::bind(("0.0.0.0", *port)).map_err(|e| RemoteError::Transport {
                    host: self.host.clone(),
                    message: format!("cannot bind port {port}: {e}"),
                })?;
            bound.push(listener);
        }
        Ok(Box::new(LocalListener { bound }))
    }
}

#[derive(Debug)]
struct LocalListener {
    bound: Vec<TcpListener>,
}

impl ListenerHandle for LocalListener {
    fn close(self: Box<Self>) {
        drop(self.bound);
    }
}

/// Quote a string for the remote shell
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
