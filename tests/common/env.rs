//! Test environment builder for isolated cluster runs.
//!
//! `TestEnv` stands up a loopback "cluster": every host in the fixture is an
//! alias of 127.0.0.1 with its own home and temp directory inside one
//! tempdir. The fixture user is injected as `USER`, so every host resolves
//! to the local transport and a full deploy runs hermetically in-process.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

/// User written into the fixture and into the child environment, so host
/// selection never depends on who runs the tests
pub const TEST_USER: &str = "drover";

/// Skip flags for checks that touch DNS or fight over loopback ports when
/// several fixture hosts share one machine
pub const QUIET_CHECKS: &[&str] = &[
    "--skip-validation-check",
    "hostname-resolves",
    "--skip-validation-check",
    "port-availability",
    "--skip-validation-check",
    "firewall-peer-reachability",
];

/// Result of one drover invocation
#[derive(Debug)]
pub struct TestResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl TestResult {
    /// Combine stdout and stderr for assertions and failure messages
    pub fn combined_output(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Isolated cluster fixture with one directory tree per host
pub struct TestEnv {
    pub root: TempDir,
    hosts: Vec<String>,
}

impl TestEnv {
    pub fn builder() -> TestEnvBuilder {
        TestEnvBuilder::new()
    }

    /// The cluster configuration file every invocation points at
    pub fn config_path(&self) -> PathBuf {
        self.root.path().join("drover.cfg")
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn host_home(&self, host: &str) -> PathBuf {
        self.root.path().join(host).join("home")
    }

    pub fn host_temp(&self, host: &str) -> PathBuf {
        self.root.path().join(host).join("tmp")
    }

    /// Name of the active release, straight from the `current` marker
    pub fn current_release(&self, host: &str) -> Option<String> {
        let marker = self.host_home(host).join("releases").join("current");
        fs::read_to_string(marker).ok().map(|s| s.trim().to_string())
    }

    /// Commit history of the host, empty when nothing was ever committed
    pub fn history(&self, host: &str) -> String {
        let log = self.host_home(host).join("releases").join("history.log");
        fs::read_to_string(log).unwrap_or_default()
    }

    /// Names of staging directories left in the host's temp directory
    pub fn staging_dirs(&self, host: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.host_temp(host)) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with("drover-staging"))
            .collect()
    }

    /// Run drover against this fixture
    pub fn run(&self, args: &[&str]) -> TestResult {
        let output = self
            .command(args)
            .output()
            .expect("failed to execute drover");
        Self::output_to_result(output)
    }

    /// Run drover with the given text piped to stdin
    pub fn run_with_stdin(&self, args: &[&str], input: &str) -> TestResult {
        let mut child = self
            .command(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to spawn drover");
        child
            .stdin
            .take()
            .expect("stdin is piped")
            .write_all(input.as_bytes())
            .expect("failed to write stdin");
        let output = child.wait_with_output().expect("failed to wait for drover");
        Self::output_to_result(output)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_drover"));
        cmd.current_dir(self.root.path())
            .arg("--config")
            .arg(self.config_path())
            .args(args)
            .env("HOME", self.root.path())
            .env("USER", TEST_USER)
            .env_remove("USERNAME")
            .env("DROVER_NO_COLOR", "1");
        cmd
    }

    fn output_to_result(output: Output) -> TestResult {
        TestResult {
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// Builder for a cluster fixture with fluent overrides
pub struct TestEnvBuilder {
    hosts: Vec<String>,
    dataservice: String,
    master: String,
    managed: bool,
    connectors: Vec<String>,
    properties: Vec<(String, String)>,
}

impl TestEnvBuilder {
    pub fn new() -> Self {
        Self {
            hosts: vec!["db1".to_string(), "db2".to_string()],
            dataservice: "east".to_string(),
            master: "db1".to_string(),
            managed: false,
            connectors: Vec::new(),
            properties: Vec::new(),
        }
    }

    /// Replace the default db1/db2 pair
    pub fn hosts(mut self, hosts: &[&str]) -> Self {
        self.hosts = hosts.iter().map(|h| h.to_string()).collect();
        self
    }

    pub fn master(mut self, host: &str) -> Self {
        self.master = host.to_string();
        self
    }

    /// Run managers alongside the replicators
    pub fn managed(mut self) -> Self {
        self.managed = true;
        self
    }

    pub fn connectors(mut self, hosts: &[&str]) -> Self {
        self.connectors = hosts.iter().map(|h| h.to_string()).collect();
        self
    }

    /// Set one extra text property in the fixture
    pub fn property(mut self, key: &str, value: &str) -> Self {
        self.properties.push((key.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> TestEnv {
        let root = TempDir::new().expect("failed to create fixture root");

        let mut lines = Vec::new();
        lines.push(format!("hosts.defaults.user = {}", json(TEST_USER)));
        for host in &self.hosts {
            let home = root.path().join(host).join("home");
            let temp = root.path().join(host).join("tmp");
            fs::create_dir_all(&home).expect("failed to create host home");
            fs::create_dir_all(&temp).expect("failed to create host temp");
            lines.push(format!("hosts.{host}.address = {}", json("127.0.0.1")));
            lines.push(format!(
                "hosts.{host}.home-directory = {}",
                json(&home.to_string_lossy())
            ));
            lines.push(format!(
                "hosts.{host}.temp-directory = {}",
                json(&temp.to_string_lossy())
            ));
        }
        let ds = &self.dataservice;
        lines.push(format!(
            "dataservices.{ds}.members = {}",
            serde_json::to_string(&self.hosts).expect("member list encodes")
        ));
        lines.push(format!("dataservices.{ds}.master = {}", json(&self.master)));
        lines.push(format!(
            "dataservices.{ds}.managed = {}",
            json(if self.managed { "true" } else { "false" })
        ));
        if !self.connectors.is_empty() {
            lines.push(format!(
                "dataservices.{ds}.connectors = {}",
                serde_json::to_string(&self.connectors).expect("connector list encodes")
            ));
        }
        for (key, value) in &self.properties {
            lines.push(format!("{key} = {}", json(value)));
        }

        let config = lines.join("\n") + "\n";
        fs::write(root.path().join("drover.cfg"), config).expect("failed to write drover.cfg");

        TestEnv {
            root,
            hosts: self.hosts,
        }
    }
}

impl Default for TestEnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn json(s: &str) -> String {
    serde_json::to_string(s).expect("strings always encode")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_writes_a_parseable_fixture() {
        let env = TestEnv::builder().build();
        let cfg = fs::read_to_string(env.config_path()).unwrap();
        assert!(cfg.contains(r#"dataservices.east.members = ["db1","db2"]"#));
        assert!(cfg.contains(&format!(r#"hosts.defaults.user = "{TEST_USER}""#)));
        assert!(env.host_home("db1").exists());
        assert!(env.host_temp("db2").exists());
    }

    #[test]
    fn test_fresh_fixture_has_no_release() {
        let env = TestEnv::builder().build();
        assert_eq!(env.current_release("db1"), None);
        assert!(env.staging_dirs("db1").is_empty());
        assert!(env.history("db1").is_empty());
    }
}
