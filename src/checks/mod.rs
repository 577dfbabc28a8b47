//! Validation engine
//!
//! Checks are static table entries: a name, the pass they belong to,
//! whether a failure is fatal, and a function that appends findings to the
//! host's report. The same table drives all three passes so skip-lists and
//! CLI overrides resolve against one namespace. Coordinator-side checks
//! (those needing a transport rather than a host filesystem) live in their
//! own registry in `coordinator`.

pub mod commit;
pub mod coordinator;
pub mod listeners;
pub mod target;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ValidationConfig;
use crate::modules::StepContext;
use crate::planner::PerHostConfiguration;
use crate::report::{Report, Severity};

pub use listeners::{service_ports, ListenerSet};

/// The three validation passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pass {
    /// Before any change: is the host fit to deploy to at all
    Prevalidate,
    /// After staging, before deploy: will this configuration work here
    Validate,
    /// After deploy, before commit: is the staged release sound
    ValidateCommit,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pass::Prevalidate => write!(f, "prevalidate"),
            Pass::Validate => write!(f, "validate"),
            Pass::ValidateCommit => write!(f, "validate-commit"),
        }
    }
}

/// Which checks run, resolved from config and CLI flags
///
/// `enable` wins over `skip`; `only` (used internally to sequence
/// sub-passes) wins over everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipList {
    #[serde(default)]
    pub skip: Vec<String>,
    #[serde(default)]
    pub skip_warnings: Vec<String>,
    #[serde(default)]
    pub enable: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only: Option<Vec<String>>,
}

impl SkipList {
    pub fn from_config(validation: &ValidationConfig) -> SkipList {
        SkipList {
            skip: validation.skip_checks.clone(),
            skip_warnings: validation.skip_warnings.clone(),
            enable: validation.enable_checks.clone(),
            only: None,
        }
    }

    /// Fold in CLI flags on top of the configured lists
    pub fn with_cli(mut self, skip: &[String], enable: &[String]) -> SkipList {
        self.skip.extend(skip.iter().cloned());
        self.enable.extend(enable.iter().cloned());
        self
    }

    /// Restrict to exactly the named checks
    pub fn restricted_to(mut self, names: &[&str]) -> SkipList {
        self.only = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Exclude the named checks regardless of `enable`
    pub fn without(mut self, names: &[&str]) -> SkipList {
        let excluded: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        self.enable.retain(|n| !excluded.contains(n));
        self.skip.extend(excluded);
        self
    }

    pub fn allows(&self, name: &str) -> bool {
        if let Some(only) = &self.only {
            return only.iter().any(|n| n == name);
        }
        if self.enable.iter().any(|n| n == name) {
            return true;
        }
        !self.skip.iter().any(|n| n == name)
    }
}

/// Everything a host-side check can look at
pub struct CheckContext<'a> {
    pub config: &'a PerHostConfiguration,
    pub staging_root: &'a Path,
    /// Bound on a single peer connect attempt
    pub connect_timeout: Duration,
}

impl CheckContext<'_> {
    /// Release path helpers shared with the deployment modules
    pub fn paths(&self) -> StepContext<'_> {
        StepContext::new(self.config, self.staging_root)
    }
}

type CheckFn = fn(&CheckContext, &mut Report);

/// One validation check definition
pub struct Check {
    pub name: &'static str,
    pub pass: Pass,
    /// Errors from this check halt the run once the pass completes
    pub fatal: bool,
    pub run: CheckFn,
}

/// Checks executed on the target host by a RunChecks request
pub fn host_checks() -> &'static [Check] {
    const CHECKS: &[Check] = &[
        Check {
            name: "write-access",
            pass: Pass::Prevalidate,
            fatal: true,
            run: target::write_access,
        },
        Check {
            name: "temp-directory",
            pass: Pass::Prevalidate,
            fatal: true,
            run: target::temp_directory,
        },
        Check {
            name: "hostname-resolves",
            pass: Pass::Prevalidate,
            fatal: false,
            run: target::hostname_resolves,
        },
        Check {
            name: "port-availability",
            pass: Pass::Validate,
            fatal: true,
            run: target::port_availability,
        },
        Check {
            name: "existing-installation",
            pass: Pass::Validate,
            fatal: false,
            run: target::existing_installation,
        },
        Check {
            name: "firewall-peer-reachability",
            pass: Pass::Validate,
            fatal: false,
            run: target::firewall_peer_reachability,
        },
        Check {
            name: "staged-configuration-fingerprint",
            pass: Pass::ValidateCommit,
            fatal: true,
            run: commit::staged_configuration_fingerprint,
        },
        Check {
            name: "release-layout",
            pass: Pass::ValidateCommit,
            fatal: true,
            run: commit::release_layout,
        },
        Check {
            name: "service-manifests",
            pass: Pass::ValidateCommit,
            fatal: true,
            run: commit::service_manifests,
        },
    ];
    CHECKS
}

/// Run every allowed check of one pass, upgrading fatal failures
pub fn run_pass(pass: Pass, ctx: &CheckContext, skip: &SkipList) -> Report {
    let mut report = Report::new(ctx.config.host.clone());
    for check in host_checks() {
        if check.pass != pass || !skip.allows(check.name) {
            continue;
        }
        let before = report.entries.len();
        (check.run)(ctx, &mut report);
        if check.fatal {
            for entry in &mut report.entries[before..] {
                if entry.severity == Severity::Error {
                    entry.fatal = true;
                }
            }
        }
    }
    report.suppress_warnings(&skip.skip_warnings);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PropertyValue;
    use tempfile::tempdir;

    fn test_config(home: &Path, temp: &Path) -> PerHostConfiguration {
        PerHostConfiguration {
            host: "db1".to_string(),
            address: "127.0.0.1".to_string(),
            user: "dbadmin".to_string(),
            home_directory: home.to_string_lossy().to_string(),
            temp_directory: temp.to_string_lossy().to_string(),
            dataservices: vec!["east".to_string()],
            fingerprint: "sha256:abc123".to_string(),
            properties: PropertyValue::tree(),
        }
    }

    #[test]
    fn test_skip_list_resolution_order() {
        let skip = SkipList {
            skip: vec!["write-access".to_string(), "temp-directory".to_string()],
            enable: vec!["write-access".to_string()],
            ..SkipList::default()
        };
        // enable wins over skip
        assert!(skip.allows("write-access"));
        assert!(!skip.allows("temp-directory"));
        assert!(skip.allows("hostname-resolves"));
    }

    #[test]
    fn test_skip_list_only_overrides_everything() {
        let skip = SkipList {
            skip: vec!["firewall-peer-reachability".to_string()],
            ..SkipList::default()
        }
        .restricted_to(&["firewall-peer-reachability"]);
        assert!(skip.allows("firewall-peer-reachability"));
        assert!(!skip.allows("write-access"));
    }

    #[test]
    fn test_without_beats_earlier_enable() {
        let skip = SkipList::default()
            .with_cli(&[], &["firewall-peer-reachability".to_string()])
            .without(&["firewall-peer-reachability"]);
        assert!(!skip.allows("firewall-peer-reachability"));
    }

    #[test]
    fn test_run_pass_filters_by_pass_and_skip() {
        let home = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let config = test_config(home.path(), temp.path());
        let ctx = CheckContext {
            config: &config,
            staging_root: temp.path(),
            connect_timeout: Duration::from_millis(100),
        };

        let skip = SkipList::default().with_cli(&["hostname-resolves".to_string()], &[]);
        let report = run_pass(Pass::Prevalidate, &ctx, &skip);

        let sources: Vec<&str> = report.entries.iter().map(|e| e.source.as_str()).collect();
        assert!(sources.contains(&"write-access"));
        assert!(sources.contains(&"temp-directory"));
        assert!(!sources.contains(&"hostname-resolves"));
        assert!(!sources.contains(&"port-availability"));
    }

    #[test]
    fn test_fatal_checks_mark_their_errors() {
        let home = tempdir().unwrap();
        let temp = tempdir().unwrap();
        let mut config = test_config(home.path(), temp.path());
        // Point the temp directory somewhere that cannot exist
        config.temp_directory = "/proc/no-such-dir/nested".to_string();
        let ctx = CheckContext {
            config: &config,
            staging_root: temp.path(),
            connect_timeout: Duration::from_millis(100),
        };

        let report = run_pass(Pass::Prevalidate, &ctx, &SkipList::default());
        assert!(report.is_fatal());
        let entry = report
            .entries
            .iter()
            .find(|e| e.source == "temp-directory")
            .unwrap();
        assert!(entry.fatal);
    }

    #[test]
    fn test_pass_serde_names() {
        assert_eq!(
            serde_json::to_string(&Pass::ValidateCommit).unwrap(),
            "\"validate-commit\""
        );
        assert_eq!(Pass::ValidateCommit.to_string(), "validate-commit");
    }

    #[test]
    fn test_check_names_are_unique() {
        let mut names: Vec<&str> = host_checks().iter().map(|c| c.name).collect();
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
