//! Request handling on the receiving side
//!
//! The `exec` subcommand and the in-process local transport both funnel
//! requests through `handle_request`, so a host behaves identically whether
//! it was reached over SSH or is the coordinator itself. Every outcome is
//! wrapped in an envelope; a request must never leak a raw error to stdout.

use std::fs;
use std::io::{BufRead, Write};
use std::net::TcpListener;
use std::path::Path;

use crate::checks::{self, CheckContext, Pass, SkipList};
use crate::config::ToolConfig;
use crate::modules::{self, StepContext};
use crate::planner::PerHostConfiguration;
use crate::prompts::probes;
use crate::report::Report;

use super::protocol::{CommandRequest, RemoteFault, ResponseEnvelope};

pub fn handle_request(host: &str, request: &CommandRequest) -> ResponseEnvelope {
    match handle(host, request) {
        Ok(report) => ResponseEnvelope::ok(host, report),
        Err(fault) => ResponseEnvelope::failed(host, fault),
    }
}

fn handle(host: &str, request: &CommandRequest) -> Result<Report, RemoteFault> {
    match request {
        CommandRequest::Ping => Ok(ping(host)),
        CommandRequest::Prepare {
            staging_root,
            config,
        } => prepare(host, staging_root, config),
        CommandRequest::RunChecks {
            pass,
            staging_root,
            config,
            skip,
        } => run_checks(*pass, staging_root, config, skip),
        CommandRequest::RunStep {
            module,
            step,
            staging_root,
            config,
        } => run_step(module, step, staging_root, config),
        CommandRequest::Cleanup {
            staging_root,
            sweep,
        } => cleanup(host, staging_root, *sweep),
        CommandRequest::Listen { .. } => Err(RemoteFault::Unsupported {
            message: "listen requests are handled by the exec command loop".to_string(),
        }),
    }
}

/// Facts about this host, for planning and the ssh-access check
fn ping(host: &str) -> Report {
    let mut report = Report::new(host);
    report.add_info("ping", "alive");
    if let Some(user) = probes::local_user() {
        report.set_property("user", user);
    }
    if let Ok(home) = std::env::var("HOME") {
        report.set_property("home-directory", home);
    }
    report.set_property(
        "temp-directory",
        std::env::temp_dir().to_string_lossy().to_string(),
    );
    report.set_property("tool-version", env!("CARGO_PKG_VERSION"));
    report
}

fn prepare(
    host: &str,
    staging_root: &str,
    config: &PerHostConfiguration,
) -> Result<Report, RemoteFault> {
    let root = Path::new(staging_root);
    fs::create_dir_all(root).map_err(|e| execution("prepare", e))?;
    let ctx = StepContext::new(config, root);
    fs::write(ctx.staged_properties(), config.flat_string())
        .map_err(|e| execution("prepare", e))?;
    fs::write(
        ctx.staged_fingerprint(),
        format!("{}\n", config.fingerprint),
    )
    .map_err(|e| execution("prepare", e))?;

    let mut report = Report::new(host);
    report.add_info(
        "prepare",
        format!("configuration staged under {}", root.display()),
    );
    Ok(report)
}

fn run_checks(
    pass: Pass,
    staging_root: &str,
    config: &PerHostConfiguration,
    skip: &SkipList,
) -> Result<Report, RemoteFault> {
    let tool = ToolConfig::load_or_default(Path::new("."));
    let ctx = CheckContext {
        config,
        staging_root: Path::new(staging_root),
        connect_timeout: tool.connect_timeout(),
    };
    Ok(checks::run_pass(pass, &ctx, skip))
}

fn run_step(
    module_name: &str,
    step: &str,
    staging_root: &str,
    config: &PerHostConfiguration,
) -> Result<Report, RemoteFault> {
    let modules = modules::builtin_modules();
    let module = modules::find_module(&modules, module_name).ok_or_else(|| {
        RemoteFault::Unsupported {
            message: format!("unknown module '{module_name}'"),
        }
    })?;
    let ctx = StepContext::new(config, Path::new(staging_root));
    let mut report = Report::new(config.host.clone());
    module.run(step, &ctx, &mut report).map_err(|e| {
        RemoteFault::Execution {
            step: step.to_string(),
            message: e.to_string(),
        }
    })?;
    Ok(report)
}

fn cleanup(host: &str, staging_root: &str, sweep: bool) -> Result<Report, RemoteFault> {
    let root = Path::new(staging_root);
    // Only ever delete directories this tool created
    let is_staging = root
        .file_name()
        .map(|n| n.to_string_lossy().starts_with("drover-staging"))
        .unwrap_or(false);
    if !is_staging {
        return Err(RemoteFault::Configuration {
            message: format!(
                "refusing to remove {}: not a staging directory",
                root.display()
            ),
        });
    }

    let mut report = Report::new(host);
    let mut removed = 0;
    if root.exists() {
        fs::remove_dir_all(root).map_err(|e| execution("cleanup", e))?;
        removed += 1;
    }
    if sweep {
        removed += sweep_stale_siblings(root).map_err(|e| execution("cleanup", e))?;
    }
    if removed > 0 {
        report.add_info("cleanup", format!("{removed} staging areas removed"));
    } else {
        report.add_info("cleanup", "no staging areas present");
    }
    Ok(report)
}

/// Remove other `drover-staging-*` directories next to the given root
fn sweep_stale_siblings(root: &Path) -> std::io::Result<usize> {
    let Some(parent) = root.parent() else {
        return Ok(0);
    };
    let mut removed = 0;
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with("drover-staging") {
            continue;
        }
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Serve one Listen request: bind, report readiness, hold until stopped
///
/// Factored over generic reader/writer so the stop-word handshake is
/// testable without a subprocess.
pub fn run_listen<R: BufRead, W: Write>(
    host: &str,
    ports: &[u16],
    input: R,
    mut output: W,
) -> std::io::Result<()> {
    let mut bound = Vec::with_capacity(ports.len());
    for port in ports {
        match TcpListener::bind(("0.0.0.0", *port)) {
            Ok(listener) => bound.push(listener),
            Err(e) => {
                let fault = RemoteFault::Execution {
                    step: "listen".to_string(),
                    message: format!("cannot bind port {port}: {e}"),
                };
                write_envelope(&mut output, &ResponseEnvelope::failed(host, fault))?;
                return Ok(());
            }
        }
    }

    let mut report = Report::new(host);
    report.add_info("listen", format!("holding {} ports open", bound.len()));
    write_envelope(&mut output, &ResponseEnvelope::ok(host, report))?;
    output.flush()?;

    for line in input.lines() {
        if line?.trim() == "stop" {
            break;
        }
    }
    drop(bound);
    Ok(())
}

fn write_envelope<W: Write>(output: &mut W, envelope: &ResponseEnvelope) -> std::io::Result<()> {
    let encoded = envelope.encode().map_err(std::io::Error::other)?;
    writeln!(output, "{encoded}")
}

fn execution(step: &str, e: impl std::fmt::Display) -> RemoteFault {
    RemoteFault::Execution {
        step: step.to_string(),
        message: e.to_string(),
    }
}
