//! Release layout and activation
//!
//! The essentials module owns the release directory structure under the
//! host's home directory. Deploy builds an inactive release next to the
//! current one; commit flips the `current` marker to it, so the switch is a
//! single atomic rename no matter how many files the release holds.

use std::fs;
use std::io::Write;

use crate::error::{DroverError, DroverResult};
use crate::planner::{DeploymentStep, FIRST_GROUP_ID};
use crate::report::Report;

use super::{unknown_step, StepContext, StepModule};

pub struct EssentialsModule;

impl StepModule for EssentialsModule {
    fn name(&self) -> &'static str {
        "essentials"
    }

    fn deploy_steps(&self) -> Vec<DeploymentStep> {
        vec![
            DeploymentStep::new("create_release_layout", self.name(), FIRST_GROUP_ID, 5),
            DeploymentStep::new("stage_host_configuration", self.name(), FIRST_GROUP_ID, 10),
        ]
    }

    fn commit_steps(&self) -> Vec<DeploymentStep> {
        vec![
            // Marker flips must not interleave across hosts
            DeploymentStep::new("activate_release", self.name(), 0, 0).serial(),
            DeploymentStep::new("record_commit_marker", self.name(), 0, 50),
        ]
    }

    fn run(&self, step: &str, ctx: &StepContext, report: &mut Report) -> DroverResult<()> {
        match step {
            "create_release_layout" => self.create_release_layout(ctx, report),
            "stage_host_configuration" => self.stage_host_configuration(ctx, report),
            "activate_release" => self.activate_release(ctx, report),
            "record_commit_marker" => self.record_commit_marker(ctx, report),
            other => Err(unknown_step(self.name(), other)),
        }
    }
}

impl EssentialsModule {
    fn create_release_layout(&self, ctx: &StepContext, report: &mut Report) -> DroverResult<()> {
        fs::create_dir_all(ctx.services_dir())?;
        report.add_info(
            "create_release_layout",
            format!(
                "release {} laid out under {}",
                ctx.release_name(),
                ctx.releases_dir().display()
            ),
        );
        Ok(())
    }

    fn stage_host_configuration(&self, ctx: &StepContext, report: &mut Report) -> DroverResult<()> {
        let source = ctx.staged_properties();
        let flat = fs::read_to_string(&source).map_err(|e| {
            DroverError::configuration(
                source.display().to_string(),
                format!("staged configuration unreadable, was prepare run: {e}"),
            )
        })?;

        fs::write(ctx.installed_properties(), &flat)?;
        fs::write(
            ctx.installed_fingerprint(),
            format!("{}\n", ctx.config.fingerprint),
        )?;
        report.add_info(
            "stage_host_configuration",
            format!(
                "{} properties installed into {}",
                flat.lines().filter(|l| !l.starts_with('#')).count(),
                ctx.conf_dir().display()
            ),
        );
        Ok(())
    }

    fn activate_release(&self, ctx: &StepContext, report: &mut Report) -> DroverResult<()> {
        let release = ctx.release_name();
        if !ctx.release_dir().is_dir() {
            return Err(DroverError::configuration(
                release.as_str(),
                "release has not been deployed on this host",
            ));
        }

        let marker = ctx.current_marker();
        let previous = fs::read_to_string(&marker)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let mut staged = tempfile::NamedTempFile::new_in(ctx.releases_dir())?;
        staged.write_all(release.as_bytes())?;
        staged.write_all(b"\n")?;
        staged
            .persist(&marker)
            .map_err(|e| DroverError::Io(e.error))?;

        match previous {
            Some(ref old) if old != &release => {
                report.set_property("previous-release", old);
                report.add_info(
                    "activate_release",
                    format!("active release switched from {old} to {release}"),
                );
            }
            Some(_) => {
                report.add_info("activate_release", format!("release {release} re-activated"));
            }
            None => {
                report.add_info("activate_release", format!("active release is {release}"));
            }
        }
        Ok(())
    }

    fn record_commit_marker(&self, ctx: &StepContext, report: &mut Report) -> DroverResult<()> {
        let history = ctx.releases_dir().join("history.log");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&history)?;
        writeln!(
            file,
            "{} committed {} on {}",
            chrono::Utc::now().to_rfc3339(),
            ctx.release_name(),
            ctx.config.host
        )?;
        report.add_info(
            "record_commit_marker",
            format!("commit recorded in {}", history.display()),
        );
        Ok(())
    }
}
