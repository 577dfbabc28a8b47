//! Service manifest rendering and enablement
//!
//! For every replicator, manager, and connector a host runs, deploy renders
//! one JSON manifest into the release. Manifests are the hand-off point to
//! service supervision: they carry the resolved role and, for non-masters,
//! the upstream log URI, so a service can start without re-deriving the
//! topology. Deploy writes them disabled; commit flips them on.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::{DroverError, DroverResult};
use crate::planner::DeploymentStep;
use crate::report::Report;
use crate::store::{CONNECTORS, MANAGERS, REPL_SERVICES};
use crate::topology::{Topology, DEFAULT_CONN_PORT, DEFAULT_MGR_PORT};

use super::{unknown_step, StepContext, StepModule};

/// One rendered service description inside a release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceManifest {
    pub service: String,
    /// replicator, manager, or connector
    pub kind: String,
    pub dataservice: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<String>,
    /// Where a slave or relay pulls its log from; masters have none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_thl_uri: Option<String>,
    pub enabled: bool,
}

pub struct ServicesModule;

impl StepModule for ServicesModule {
    fn name(&self) -> &'static str {
        "services"
    }

    fn deploy_steps(&self) -> Vec<DeploymentStep> {
        vec![DeploymentStep::new(
            "render_service_manifests",
            self.name(),
            0,
            10,
        )]
    }

    fn commit_steps(&self) -> Vec<DeploymentStep> {
        vec![DeploymentStep::new("enable_services", self.name(), 0, 10)]
    }

    fn run(&self, step: &str, ctx: &StepContext, report: &mut Report) -> DroverResult<()> {
        match step {
            "render_service_manifests" => self.render_service_manifests(ctx, report),
            "enable_services" => self.enable_services(ctx, report),
            other => Err(unknown_step(self.name(), other)),
        }
    }
}

impl ServicesModule {
    fn render_service_manifests(&self, ctx: &StepContext, report: &mut Report) -> DroverResult<()> {
        let store = ctx.config.to_store();
        let dir = ctx.services_dir();
        fs::create_dir_all(&dir)?;

        let mut rendered = 0usize;
        for dataservice in &ctx.config.dataservices {
            let topo = Topology::build(&store, dataservice)?;
            for manifest in build_manifests(ctx, &topo)? {
                // Replicator and manager members share names; qualify by kind
                let path = dir.join(format!("{}-{}.json", manifest.kind, manifest.service));
                let json = serde_json::to_string_pretty(&manifest).map_err(|e| {
                    DroverError::configuration(manifest.service.as_str(), e.to_string())
                })?;
                fs::write(path, json)?;
                rendered += 1;
            }
        }

        report.add_info(
            "render_service_manifests",
            format!("{rendered} service manifests rendered into {}", dir.display()),
        );
        Ok(())
    }

    fn enable_services(&self, ctx: &StepContext, report: &mut Report) -> DroverResult<()> {
        let dir = ctx.services_dir();
        let mut enabled = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = fs::read_to_string(&path)?;
            let mut manifest: ServiceManifest = serde_json::from_str(&raw).map_err(|e| {
                DroverError::configuration(path.display().to_string(), e.to_string())
            })?;
            if !manifest.enabled {
                manifest.enabled = true;
                let json = serde_json::to_string_pretty(&manifest).map_err(|e| {
                    DroverError::configuration(manifest.service.as_str(), e.to_string())
                })?;
                fs::write(&path, json)?;
            }
            enabled.push(manifest.service);
        }
        enabled.sort();

        if enabled.is_empty() {
            report.add_warning("enable_services", "no service manifests found in release");
        } else {
            report.add_info(
                "enable_services",
                format!("services enabled: {}", enabled.join(", ")),
            );
        }
        Ok(())
    }
}

fn build_manifests(ctx: &StepContext, topo: &Topology) -> DroverResult<Vec<ServiceManifest>> {
    let config = ctx.config;
    let host = config.host.as_str();
    let mut manifests = Vec::new();

    for service in config.service_members(REPL_SERVICES) {
        if config.effective_text(REPL_SERVICES, &service, "dataservice")
            != Some(topo.dataservice.as_str())
        {
            continue;
        }
        let role = topo.role(host).ok_or_else(|| {
            DroverError::configuration(
                service.as_str(),
                format!("host '{host}' has no role in dataservice '{}'", topo.dataservice),
            )
        })?;
        manifests.push(ServiceManifest {
            service: service.clone(),
            kind: "replicator".to_string(),
            dataservice: topo.dataservice.clone(),
            host: host.to_string(),
            role: Some(role.to_string()),
            listen_port: Some(topo.thl_port.clone()),
            master_thl_uri: topo.master_thl_uri(host),
            enabled: false,
        });
    }

    for service in config.service_members(MANAGERS) {
        if config.effective_text(MANAGERS, &service, "dataservice")
            != Some(topo.dataservice.as_str())
        {
            continue;
        }
        manifests.push(ServiceManifest {
            service: service.clone(),
            kind: "manager".to_string(),
            dataservice: topo.dataservice.clone(),
            host: host.to_string(),
            role: None,
            listen_port: Some(config.effective_or(
                MANAGERS,
                &service,
                "mgr-listen-port",
                DEFAULT_MGR_PORT,
            )),
            master_thl_uri: None,
            enabled: false,
        });
    }

    for service in config.service_members(CONNECTORS) {
        if config.effective_text(CONNECTORS, &service, "dataservice")
            != Some(topo.dataservice.as_str())
        {
            continue;
        }
        manifests.push(ServiceManifest {
            service: service.clone(),
            kind: "connector".to_string(),
            dataservice: topo.dataservice.clone(),
            host: host.to_string(),
            role: None,
            listen_port: Some(config.effective_or(
                CONNECTORS,
                &service,
                "conn-listen-port",
                DEFAULT_CONN_PORT,
            )),
            master_thl_uri: None,
            enabled: false,
        });
    }

    Ok(manifests)
}
