//! Fleet execution
//!
//! Phases fan out across hosts on scoped threads. Step groups form
//! barriers: no host enters a group until every host has left the previous
//! one. A host that reports a fatal entry is dropped from the remaining
//! groups while the others continue.

pub mod host;

use std::collections::BTreeSet;
use std::sync::mpsc;
use std::thread;

use crate::error::RemoteError;
use crate::planner::{DeploymentStep, StepGroup, FINAL_STEP_WEIGHT};
use crate::remote::{Outcome, ResponseEnvelope};
use crate::report::{PhaseReport, Report};

pub use host::{transport_for, HostRunner, LocalIdentity, PingFactsProbe};

/// Called before each step on each host, for progress output
pub type StepObserver<'a> = &'a (dyn Fn(&DeploymentStep, &str) + Sync);

/// Fold a transport result into a per-host report
pub fn envelope_to_report(
    host: &str,
    source: &str,
    result: Result<ResponseEnvelope, RemoteError>,
) -> Report {
    match result {
        Ok(envelope) => match envelope.outcome {
            Outcome::Ok { report } => report,
            Outcome::Failed { error } => {
                let mut report = Report::new(host);
                report.add_fatal(source, error.to_string());
                report
            }
        },
        Err(e) => {
            let mut report = Report::new(host);
            report.add_fatal(source, e.to_string());
            report
        }
    }
}

/// Apply `work` to every host concurrently and collect the reports
pub fn run_per_host<F>(runners: &[&HostRunner], phase: &str, work: F) -> PhaseReport
where
    F: Fn(&HostRunner) -> Report + Sync,
{
    let mut out = PhaseReport::new(phase);
    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        for runner in runners {
            let tx = tx.clone();
            let work = &work;
            scope.spawn(move || {
                let _ = tx.send(work(runner));
            });
        }
        drop(tx);
        while let Ok(report) = rx.recv() {
            out.insert(report);
        }
    });
    out
}

/// Run resolved step groups across the fleet
pub fn run_phase(
    runners: &[&HostRunner],
    phase: &str,
    groups: &[StepGroup],
    serial_override: bool,
    observer: StepObserver,
) -> PhaseReport {
    let mut out = PhaseReport::new(phase);
    let mut failed: BTreeSet<String> = BTreeSet::new();
    for group in groups {
        let targets: Vec<&HostRunner> = runners
            .iter()
            .filter(|r| !failed.contains(&r.host))
            .copied()
            .collect();
        if targets.is_empty() {
            break;
        }
        let reports = if group.allows_parallel() && !serial_override && targets.len() > 1 {
            run_group_parallel(&targets, group, observer)
        } else {
            run_group_serial(&targets, group, observer)
        };
        for report in reports {
            if report.is_fatal() {
                failed.insert(report.host.clone());
            }
            out.insert(report);
        }
    }
    out
}

fn run_group_parallel(
    targets: &[&HostRunner],
    group: &StepGroup,
    observer: StepObserver,
) -> Vec<Report> {
    let mut reports = Vec::new();
    let (tx, rx) = mpsc::channel();
    thread::scope(|scope| {
        for runner in targets {
            let tx = tx.clone();
            scope.spawn(move || {
                for step in &group.steps {
                    observer(step, &runner.host);
                    let report = step_report(runner, step);
                    let fatal = report.is_fatal();
                    if tx.send(report).is_err() || fatal {
                        break;
                    }
                }
            });
        }
        drop(tx);
        while let Ok(report) = rx.recv() {
            reports.push(report);
        }
    });
    reports
}

fn run_group_serial(
    targets: &[&HostRunner],
    group: &StepGroup,
    observer: StepObserver,
) -> Vec<Report> {
    let mut reports = Vec::new();
    for (position, runner) in targets.iter().enumerate() {
        for step in &group.steps {
            // A final-weight step summarizes the fleet and runs on one host only
            if step.weight == FINAL_STEP_WEIGHT && position > 0 {
                continue;
            }
            observer(step, &runner.host);
            let report = step_report(runner, step);
            let fatal = report.is_fatal();
            reports.push(report);
            if fatal {
                break;
            }
        }
    }
    reports
}

fn step_report(runner: &HostRunner, step: &DeploymentStep) -> Report {
    envelope_to_report(
        &runner.host,
        &step.name,
        runner.invoke(&runner.step_request(step)),
    )
}
