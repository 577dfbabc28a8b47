//! Deployment modules
//!
//! A module owns a named set of deployment and commit steps and knows how to
//! execute each one on a host. Modules only declare scheduling metadata
//! (group id, weight, parallelism); ordering and barriers are the
//! scheduler's business. All built-in modules are registered in
//! `builtin_modules`.

mod essentials;
mod reporting;
mod services;

use std::path::{Path, PathBuf};

use crate::error::{DroverError, DroverResult};
use crate::planner::{DeploymentStep, PerHostConfiguration};
use crate::report::Report;

pub use essentials::EssentialsModule;
pub use reporting::ReportingModule;
pub use services::{ServiceManifest, ServicesModule};

/// File holding the flattened host configuration, staged and installed
pub const PROPERTIES_FILE: &str = "cluster.properties";
/// File holding the configuration fingerprint next to the properties
pub const FINGERPRINT_FILE: &str = "fingerprint";
/// Marker file naming the active release
pub const CURRENT_MARKER: &str = "current";

/// Everything a step needs to act on one host
pub struct StepContext<'a> {
    pub config: &'a PerHostConfiguration,
    pub staging_root: &'a Path,
}

impl StepContext<'_> {
    pub fn new<'a>(config: &'a PerHostConfiguration, staging_root: &'a Path) -> StepContext<'a> {
        StepContext {
            config,
            staging_root,
        }
    }

    /// Release name derived from the configuration fingerprint
    pub fn release_name(&self) -> String {
        let digest = self
            .config
            .fingerprint
            .strip_prefix("sha256:")
            .unwrap_or(&self.config.fingerprint);
        let short = &digest[..digest.len().min(12)];
        format!("drover-{short}")
    }

    pub fn releases_dir(&self) -> PathBuf {
        Path::new(&self.config.home_directory).join("releases")
    }

    pub fn release_dir(&self) -> PathBuf {
        self.releases_dir().join(self.release_name())
    }

    pub fn conf_dir(&self) -> PathBuf {
        self.release_dir().join("conf")
    }

    /// Per-service manifest directory inside the release
    pub fn services_dir(&self) -> PathBuf {
        self.conf_dir().join("services")
    }

    pub fn current_marker(&self) -> PathBuf {
        self.releases_dir().join(CURRENT_MARKER)
    }

    pub fn staged_properties(&self) -> PathBuf {
        self.staging_root.join(PROPERTIES_FILE)
    }

    pub fn staged_fingerprint(&self) -> PathBuf {
        self.staging_root.join(FINGERPRINT_FILE)
    }

    pub fn installed_properties(&self) -> PathBuf {
        self.conf_dir().join(PROPERTIES_FILE)
    }

    pub fn installed_fingerprint(&self) -> PathBuf {
        self.conf_dir().join(FINGERPRINT_FILE)
    }
}

/// A named set of deployment and commit steps
pub trait StepModule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Steps this module contributes to the deploy phase
    fn deploy_steps(&self) -> Vec<DeploymentStep>;

    /// Steps this module contributes to the commit phase
    fn commit_steps(&self) -> Vec<DeploymentStep>;

    /// Execute one step on the current host, recording findings
    fn run(&self, step: &str, ctx: &StepContext, report: &mut Report) -> DroverResult<()>;
}

/// All modules shipped with the tool
pub fn builtin_modules() -> Vec<Box<dyn StepModule>> {
    vec![
        Box::new(EssentialsModule),
        Box::new(ServicesModule),
        Box::new(ReportingModule),
    ]
}

pub fn find_module<'a>(
    modules: &'a [Box<dyn StepModule>],
    name: &str,
) -> Option<&'a dyn StepModule> {
    modules
        .iter()
        .find(|m| m.name() == name)
        .map(Box::as_ref)
}

/// Deploy steps of every module, unordered
pub fn all_deploy_steps(modules: &[Box<dyn StepModule>]) -> Vec<DeploymentStep> {
    modules.iter().flat_map(|m| m.deploy_steps()).collect()
}

/// Commit steps of every module, unordered
pub fn all_commit_steps(modules: &[Box<dyn StepModule>]) -> Vec<DeploymentStep> {
    modules.iter().flat_map(|m| m.commit_steps()).collect()
}

pub(crate) fn unknown_step(module: &str, step: &str) -> DroverError {
    DroverError::configuration(step, format!("module '{module}' has no such step"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::resolve_step_groups;

    #[test]
    fn test_builtin_step_names_are_unique_per_phase() {
        let modules = builtin_modules();
        assert!(resolve_step_groups(all_deploy_steps(&modules)).is_ok());
        assert!(resolve_step_groups(all_commit_steps(&modules)).is_ok());
    }

    #[test]
    fn test_release_layout_steps_come_first() {
        let modules = builtin_modules();
        let groups = resolve_step_groups(all_deploy_steps(&modules)).unwrap();
        let first = &groups[0].steps[0];
        assert_eq!(first.name, "create_release_layout");
        let last_group = groups.last().unwrap();
        let last = last_group.steps.last().unwrap();
        assert_eq!(last.name, "report_deployment");
        assert!(!last.parallel);
    }

    #[test]
    fn test_find_module_by_name() {
        let modules = builtin_modules();
        assert!(find_module(&modules, "essentials").is_some());
        assert!(find_module(&modules, "services").is_some());
        assert!(find_module(&modules, "nope").is_none());
    }

    #[test]
    fn test_release_name_is_fingerprint_prefix() {
        let config = crate::planner::PerHostConfiguration {
            host: "db1".to_string(),
            address: "10.0.0.1".to_string(),
            user: "dbadmin".to_string(),
            home_directory: "/opt/drover".to_string(),
            temp_directory: "/tmp".to_string(),
            dataservices: vec!["east".to_string()],
            fingerprint: "sha256:deadbeefcafe0123".to_string(),
            properties: crate::store::PropertyValue::tree(),
        };
        let ctx = StepContext::new(&config, Path::new("/tmp/staging"));
        assert_eq!(ctx.release_name(), "drover-deadbeefcafe");
        assert_eq!(
            ctx.release_dir(),
            PathBuf::from("/opt/drover/releases/drover-deadbeefcafe")
        );
        assert_eq!(
            ctx.staged_properties(),
            PathBuf::from("/tmp/staging/cluster.properties")
        );
    }
}
