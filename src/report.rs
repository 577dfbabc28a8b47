//! Validation and deployment reports
//!
//! Every unit of per-host work appends entries to a `Report`. Reports travel
//! back from remote hosts inside the result envelope, so everything here is
//! serde-serializable. A phase aggregates one report per host; the run
//! aggregates phases.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Severity of a report entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "✓"),
            Severity::Warning => write!(f, "⚠"),
            Severity::Error => write!(f, "✗"),
        }
    }
}

/// One finding from a check or deployment step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Name of the check or step that produced this entry
    pub source: String,
    pub severity: Severity,
    pub message: String,
    /// Errors from fatal checks halt the run; others only fail the entry
    #[serde(default)]
    pub fatal: bool,
}

/// Findings and output properties for one host in one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub host: String,
    pub entries: Vec<ReportEntry>,
    /// Named values produced for later phases (e.g. restart hints)
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Report {
    pub fn new(host: impl Into<String>) -> Self {
        Report {
            host: host.into(),
            entries: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn add_info(&mut self, source: &str, message: impl Into<String>) {
        self.entries.push(ReportEntry {
            source: source.to_string(),
            severity: Severity::Info,
            message: message.into(),
            fatal: false,
        });
    }

    pub fn add_warning(&mut self, source: &str, message: impl Into<String>) {
        self.entries.push(ReportEntry {
            source: source.to_string(),
            severity: Severity::Warning,
            message: message.into(),
            fatal: false,
        });
    }

    pub fn add_error(&mut self, source: &str, message: impl Into<String>) {
        self.entries.push(ReportEntry {
            source: source.to_string(),
            severity: Severity::Error,
            message: message.into(),
            fatal: false,
        });
    }

    /// An error that must halt the run once the phase completes
    pub fn add_fatal(&mut self, source: &str, message: impl Into<String>) {
        self.entries.push(ReportEntry {
            source: source.to_string(),
            severity: Severity::Error,
            message: message.into(),
            fatal: true,
        });
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn infos(&self) -> usize {
        self.count(Severity::Info)
    }

    pub fn warnings(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn errors(&self) -> usize {
        self.count(Severity::Error)
    }

    fn count(&self, severity: Severity) -> usize {
        self.entries
            .iter()
            .filter(|e| e.severity == severity)
            .count()
    }

    pub fn is_fatal(&self) -> bool {
        self.entries.iter().any(|e| e.fatal)
    }

    pub fn is_success(&self) -> bool {
        self.errors() == 0
    }

    /// Fold another report for the same host into this one
    pub fn merge(&mut self, other: Report) {
        self.entries.extend(other.entries);
        self.properties.extend(other.properties);
    }

    /// Drop warning entries produced by the named sources
    pub fn suppress_warnings(&mut self, sources: &[String]) {
        self.entries.retain(|e| {
            e.severity != Severity::Warning || !sources.contains(&e.source)
        });
    }
}

/// All host reports for one phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseReport {
    pub phase: String,
    /// Keyed by host alias; iteration order is stable
    pub hosts: BTreeMap<String, Report>,
}

impl PhaseReport {
    pub fn new(phase: impl Into<String>) -> Self {
        PhaseReport {
            phase: phase.into(),
            hosts: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, report: Report) {
        match self.hosts.get_mut(&report.host) {
            Some(existing) => existing.merge(report),
            None => {
                self.hosts.insert(report.host.clone(), report);
            }
        }
    }

    pub fn has_fatal(&self) -> bool {
        self.hosts.values().any(Report::is_fatal)
    }

    pub fn errors(&self) -> usize {
        self.hosts.values().map(Report::errors).sum()
    }

    pub fn warnings(&self) -> usize {
        self.hosts.values().map(Report::warnings).sum()
    }

    /// Hosts whose report carries no fatal entry
    pub fn healthy_hosts(&self) -> Vec<String> {
        self.hosts
            .values()
            .filter(|r| !r.is_fatal())
            .map(|r| r.host.clone())
            .collect()
    }
}

/// Aggregate of every phase executed in a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub phases: Vec<PhaseReport>,
}

impl RunReport {
    pub fn new() -> Self {
        RunReport { phases: Vec::new() }
    }

    pub fn push(&mut self, phase: PhaseReport) {
        self.phases.push(phase);
    }

    pub fn has_fatal(&self) -> bool {
        self.phases.iter().any(PhaseReport::has_fatal)
    }

    pub fn errors(&self) -> usize {
        self.phases.iter().map(PhaseReport::errors).sum()
    }

    pub fn warnings(&self) -> usize {
        self.phases.iter().map(PhaseReport::warnings).sum()
    }

    pub fn is_success(&self) -> bool {
        !self.has_fatal()
    }
}
