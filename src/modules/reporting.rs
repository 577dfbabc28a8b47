//! Closing summary steps
//!
//! Each barriered phase ends with one summary step carrying the reserved
//! final weight. The scheduler runs it exactly once, after every per-host
//! step has finished, so its report entry describes the whole fleet rather
//! than one host.

use std::fs;

use crate::error::DroverResult;
use crate::planner::{DeploymentStep, FINAL_GROUP_ID, FINAL_STEP_WEIGHT};
use crate::report::Report;

use super::{unknown_step, StepContext, StepModule};

pub struct ReportingModule;

impl StepModule for ReportingModule {
    fn name(&self) -> &'static str {
        "reporting"
    }

    fn deploy_steps(&self) -> Vec<DeploymentStep> {
        vec![DeploymentStep::new(
            "report_deployment",
            self.name(),
            FINAL_GROUP_ID,
            FINAL_STEP_WEIGHT,
        )]
    }

    fn commit_steps(&self) -> Vec<DeploymentStep> {
        vec![DeploymentStep::new(
            "report_commit",
            self.name(),
            FINAL_GROUP_ID,
            FINAL_STEP_WEIGHT,
        )]
    }

    fn run(&self, step: &str, ctx: &StepContext, report: &mut Report) -> DroverResult<()> {
        match step {
            "report_deployment" => self.report_deployment(ctx, report),
            "report_commit" => self.report_commit(ctx, report),
            other => Err(unknown_step(self.name(), other)),
        }
    }
}

impl ReportingModule {
    fn report_deployment(&self, ctx: &StepContext, report: &mut Report) -> DroverResult<()> {
        let services = match fs::read_dir(ctx.services_dir()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        };
        report.add_info(
            "report_deployment",
            format!(
                "release {} deployed with {} service manifests, fingerprint {}",
                ctx.release_name(),
                services,
                ctx.config.fingerprint
            ),
        );
        report.set_property("release", ctx.release_name());
        Ok(())
    }

    fn report_commit(&self, ctx: &StepContext, report: &mut Report) -> DroverResult<()> {
        let marker = fs::read_to_string(ctx.current_marker())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        report.add_info(
            "report_commit",
            format!("release {marker} is now active"),
        );
        report.set_property("release", marker);
        Ok(())
    }
}
