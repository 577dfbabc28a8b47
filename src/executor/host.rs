//! Per-host transport selection
//!
//! A host whose address points back at this machine, running as the same
//! OS user, is dispatched in-process instead of through SSH. The identity
//! test is computed once per run; everything else routes through the same
//! request shapes either way.

use std::collections::BTreeSet;
use std::net::IpAddr;

use crate::config::ToolConfig;
use crate::error::RemoteError;
use crate::planner::{DeploymentStep, HostFacts, HostFactsProbe, PerHostConfiguration};
use crate::prompts::probes;
use crate::remote::{
    CommandRequest, HostTransport, LocalTransport, Outcome, ResponseEnvelope, SshTransport,
};
use crate::store::{ConfigStore, HOSTS};

/// What this coordinator knows about its own machine
pub struct LocalIdentity {
    names: BTreeSet<String>,
    user: Option<String>,
}

impl LocalIdentity {
    pub fn detect() -> LocalIdentity {
        let mut names = BTreeSet::new();
        names.insert("localhost".to_string());
        if let Some(hostname) = probes::local_hostname() {
            names.insert(hostname);
        }
        LocalIdentity {
            names,
            user: probes::local_user(),
        }
    }

    /// True when the address and user describe this process itself
    pub fn is_local(&self, address: &str, user: &str) -> bool {
        if self.user.as_deref() != Some(user) {
            return false;
        }
        match address.parse::<IpAddr>() {
            Ok(ip) => ip.is_loopback(),
            Err(_) => self.names.contains(address),
        }
    }
}

pub fn transport_for(
    tool: &ToolConfig,
    identity: &LocalIdentity,
    host: &str,
    address: &str,
    user: &str,
) -> Box<dyn HostTransport> {
    if identity.is_local(address, user) {
        Box::new(LocalTransport::new(host))
    } else {
        Box::new(SshTransport::new(tool, host, address, user))
    }
}

/// One host's transport plus the request context reused across phases
pub struct HostRunner {
    pub host: String,
    pub config: PerHostConfiguration,
    pub staging_root: String,
    transport: Box<dyn HostTransport>,
}

impl HostRunner {
    pub fn new(
        tool: &ToolConfig,
        identity: &LocalIdentity,
        config: PerHostConfiguration,
        run_id: &str,
    ) -> HostRunner {
        let staging_root = format!("{}/drover-staging-{run_id}", config.temp_directory);
        let transport = transport_for(
            tool,
            identity,
            &config.host,
            &config.address,
            &config.user,
        );
        HostRunner {
            host: config.host.clone(),
            config,
            staging_root,
            transport,
        }
    }

    pub fn transport(&self) -> &dyn HostTransport {
        self.transport.as_ref()
    }

    pub fn invoke(&self, request: &CommandRequest) -> Result<ResponseEnvelope, RemoteError> {
        self.transport.invoke(request)
    }

    pub fn prepare_request(&self) -> CommandRequest {
        CommandRequest::Prepare {
            staging_root: self.staging_root.clone(),
            config: self.config.clone(),
        }
    }

    pub fn checks_request(
        &self,
        pass: crate::checks::Pass,
        skip: &crate::checks::SkipList,
    ) -> CommandRequest {
        CommandRequest::RunChecks {
            pass,
            staging_root: self.staging_root.clone(),
            config: self.config.clone(),
            skip: skip.clone(),
        }
    }

    pub fn step_request(&self, step: &DeploymentStep) -> CommandRequest {
        CommandRequest::RunStep {
            module: step.module.clone(),
            step: step.name.clone(),
            staging_root: self.staging_root.clone(),
            config: self.config.clone(),
        }
    }

    pub fn cleanup_request(&self, sweep: bool) -> CommandRequest {
        CommandRequest::Cleanup {
            staging_root: self.staging_root.clone(),
            sweep,
        }
    }
}

/// Planner facts probe that pings each host over its would-be transport
pub struct PingFactsProbe<'a> {
    pub tool: &'a ToolConfig,
    pub store: &'a ConfigStore,
    pub identity: &'a LocalIdentity,
}

impl HostFactsProbe for PingFactsProbe<'_> {
    fn facts(&self, host: &str, address: &str) -> Option<HostFacts> {
        // Probing needs a user before the user fact exists; fall back to
        // whoever is running the coordinator
        let user = self
            .store
            .effective_text(HOSTS, host, "user")
            .map(str::to_string)
            .or_else(probes::local_user)?;
        let transport = transport_for(self.tool, self.identity, host, address, &user);
        match transport.invoke(&CommandRequest::Ping) {
            Ok(envelope) => match envelope.outcome {
                Outcome::Ok { report } => Some(HostFacts {
                    user: report.property("user").map(str::to_string),
                    home_directory: report.property("home-directory").map(str::to_string),
                    temp_directory: report.property("temp-directory").map(str::to_string),
                    tool_version: report.property("tool-version").map(str::to_string),
                }),
                Outcome::Failed { .. } => None,
            },
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PropertyValue;

    fn current_user() -> String {
        probes::local_user().expect("test environment has a user")
    }

    #[test]
    fn test_loopback_same_user_is_local() {
        let identity = LocalIdentity::detect();
        assert!(identity.is_local("127.0.0.1", &current_user()));
        assert!(identity.is_local("127.0.0.2", &current_user()));
        assert!(identity.is_local("localhost", &current_user()));
    }

    #[test]
    fn test_other_user_or_address_is_remote() {
        let identity = LocalIdentity::detect();
        assert!(!identity.is_local("127.0.0.1", "definitely-not-this-user"));
        assert!(!identity.is_local("10.0.0.1", &current_user()));
        assert!(!identity.is_local("db1.example.com", &current_user()));
    }

    #[test]
    fn test_runner_staging_root_is_per_run() {
        let tool = ToolConfig::default();
        let identity = LocalIdentity::detect();
        let config = PerHostConfiguration {
            host: "db1".to_string(),
            address: "127.0.0.1".to_string(),
            user: current_user(),
            home_directory: "/opt/drover".to_string(),
            temp_directory: "/tmp".to_string(),
            dataservices: vec!["east".to_string()],
            fingerprint: "sha256:abc".to_string(),
            properties: PropertyValue::tree(),
        };
        let runner = HostRunner::new(&tool, &identity, config, "20260825-1");
        assert_eq!(runner.staging_root, "/tmp/drover-staging-20260825-1");
        assert_eq!(runner.host, "db1");
    }

    #[test]
    fn test_ping_probe_collects_facts_locally() {
        let tool = ToolConfig::default();
        let identity = LocalIdentity::detect();
        let mut store = ConfigStore::new();
        store
            .set(
                &crate::store::PropertyPath::parse("hosts.db1.address").unwrap(),
                "127.0.0.1".into(),
            )
            .unwrap();

        let probe = PingFactsProbe {
            tool: &tool,
            store: &store,
            identity: &identity,
        };
        let facts = probe.facts("db1", "127.0.0.1").expect("local ping succeeds");
        assert_eq!(facts.tool_version.as_deref(), Some(env!("CARGO_PKG_VERSION")));
        assert!(facts.temp_directory.is_some());
    }
}
