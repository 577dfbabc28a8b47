//! Checks that run from the coordinator, not on a target host
//!
//! Both ride on a single Ping exchange: reaching the host at all is the
//! ssh-access check, and the version the host reports back is the
//! tool-version check. The ping report's facts are merged into the result
//! so the phase report carries what the host told us about itself.

use crate::remote::{CommandRequest, HostTransport, Outcome};
use crate::report::Report;

use super::SkipList;

/// Names resolvable through skip-lists, alongside the host check names
pub const COORDINATOR_CHECK_NAMES: [&str; 2] = ["ssh-access", "tool-version"];

pub fn run_coordinator_checks(transport: &dyn HostTransport, skip: &SkipList) -> Report {
    let mut report = Report::new(transport.host());
    let check_ssh = skip.allows("ssh-access");
    let check_version = skip.allows("tool-version");
    if !check_ssh && !check_version {
        return report;
    }

    match transport.invoke(&CommandRequest::Ping) {
        Ok(envelope) => match envelope.outcome {
            Outcome::Ok { report: remote } => {
                if check_ssh {
                    report.add_info(
                        "ssh-access",
                        format!(
                            "host answered as user {}",
                            remote.property("user").unwrap_or("unknown")
                        ),
                    );
                }
                if check_version {
                    match remote.property("tool-version") {
                        Some(version) if version == env!("CARGO_PKG_VERSION") => {
                            report.add_info(
                                "tool-version",
                                format!("remote tool matches version {version}"),
                            );
                        }
                        Some(version) => {
                            report.add_warning(
                                "tool-version",
                                format!(
                                    "remote tool is {version}, coordinator runs {}",
                                    env!("CARGO_PKG_VERSION")
                                ),
                            );
                        }
                        None => {
                            report.add_warning(
                                "tool-version",
                                "remote tool did not report its version",
                            );
                        }
                    }
                }
                report.merge(remote);
            }
            Outcome::Failed { error } => {
                record_unreachable(&mut report, check_ssh, error.to_string());
            }
        },
        Err(e) => {
            record_unreachable(&mut report, check_ssh, e.to_string());
        }
    }
    report.suppress_warnings(&skip.skip_warnings);
    report
}

fn record_unreachable(report: &mut Report, check_ssh: bool, message: String) {
    if check_ssh {
        report.add_fatal("ssh-access", message);
    } else {
        report.add_warning("tool-version", message);
    }
}
