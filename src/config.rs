//! Tool configuration for Drover
//!
//! This is the tool's own settings file, not the cluster configuration
//! store. Hierarchy:
//! 1. CLI flags (highest priority)
//! 2. Environment variables (DROVER_*)
//! 3. Local config (./drover.toml)
//! 4. User config (~/.config/drover/config.toml)
//! 5. Built-in defaults (lowest priority)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DroverError, DroverResult};

/// SSH transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_program")]
    pub program: String,

    /// Extra arguments inserted before the destination
    #[serde(default = "default_ssh_args")]
    pub args: Vec<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Name or path of this tool on remote hosts
    #[serde(default = "default_remote_program")]
    pub remote_program: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: default_ssh_program(),
            args: default_ssh_args(),
            connect_timeout_secs: default_connect_timeout(),
            remote_program: default_remote_program(),
        }
    }
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_ssh_args() -> Vec<String> {
    vec!["-o".to_string(), "BatchMode=yes".to_string()]
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_remote_program() -> String {
    "drover".to_string()
}

/// Run behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Upper bound on a single dynamic default probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Force host-serial execution even for parallel-safe step groups
    #[serde(default)]
    pub serial: bool,

    /// Numbered backups kept when saving the cluster configuration
    #[serde(default = "default_backups")]
    pub backups: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: default_probe_timeout(),
            serial: false,
            backups: default_backups(),
        }
    }
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_backups() -> usize {
    crate::store::BACKUP_KEEP
}

/// Validation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationConfig {
    /// Check names skipped outright
    #[serde(default)]
    pub skip_checks: Vec<String>,

    /// Check names whose warnings are suppressed from reports
    #[serde(default)]
    pub skip_warnings: Vec<String>,

    /// Check names re-enabled even if disabled by default or skipped above
    #[serde(default)]
    pub enable_checks: Vec<String>,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub verbosity: Verbosity,
}

/// Verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Debug,
}

/// Main tool configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolConfig {
    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Non-fatal configuration warning surfaced to CLI users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub file: PathBuf,
    pub line: Option<usize>,
    pub suggestion: Option<String>,
}

impl ToolConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> DroverResult<Self> {
        let (config, _warnings) = Self::load_with_warnings(path)?;
        Ok(config)
    }

    /// Load configuration and collect non-fatal warnings (e.g. unknown keys).
    pub fn load_with_warnings(path: &Path) -> DroverResult<(Self, Vec<ConfigWarning>)> {
        let content = fs::read_to_string(path)?;

        let mut unknown_paths: Vec<String> = Vec::new();
        let deserializer = toml::de::Deserializer::new(&content);

        let config: Self = serde_ignored::deserialize(deserializer, |path| {
            unknown_paths.push(path.to_string());
        })
        .map_err(|e| DroverError::Configuration {
            key: path.display().to_string(),
            message: e.to_string(),
        })?;

        let warnings = unknown_paths
            .into_iter()
            .map(|path_str| {
                let key = path_str
                    .split('.')
                    .last()
                    .unwrap_or(path_str.as_str())
                    .to_string();
                ConfigWarning {
                    key: key.clone(),
                    file: path.to_path_buf(),
                    line: find_line_number(&content, &key),
                    suggestion: suggest_key(&key),
                }
            })
            .collect();

        Ok((config, warnings))
    }

    /// Load from local config, user config, or defaults
    pub fn load_or_default(cwd: &Path) -> Self {
        let local_config = cwd.join("drover.toml");
        if local_config.exists() {
            if let Ok(config) = Self::load(&local_config) {
                return config.with_env_overrides();
            }
        }

        if let Some(user_config_dir) = dirs_config_dir() {
            let user_config = user_config_dir.join("drover/config.toml");
            if user_config.exists() {
                if let Ok(config) = Self::load(&user_config) {
                    return config.with_env_overrides();
                }
            }
        }

        Self::default().with_env_overrides()
    }

    /// Apply environment variable overrides (DROVER_* prefix)
    pub fn with_env_overrides(mut self) -> Self {
        // DROVER_SSH_PROGRAM
        if let Ok(program) = std::env::var("DROVER_SSH_PROGRAM") {
            if !program.is_empty() {
                self.ssh.program = program;
            }
        }

        // DROVER_REMOTE_PROGRAM
        if let Ok(program) = std::env::var("DROVER_REMOTE_PROGRAM") {
            if !program.is_empty() {
                self.ssh.remote_program = program;
            }
        }

        // DROVER_CONNECT_TIMEOUT (seconds)
        if let Ok(val) = std::env::var("DROVER_CONNECT_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.ssh.connect_timeout_secs = secs;
            }
        }

        // DROVER_PROBE_TIMEOUT (seconds)
        if let Ok(val) = std::env::var("DROVER_PROBE_TIMEOUT") {
            if let Ok(secs) = val.parse() {
                self.run.probe_timeout_secs = secs;
            }
        }

        // DROVER_SERIAL
        if let Ok(val) = std::env::var("DROVER_SERIAL") {
            self.run.serial = val.to_lowercase() != "false" && val != "0";
        }

        // DROVER_VERBOSITY
        if let Ok(verbosity) = std::env::var("DROVER_VERBOSITY") {
            self.output.verbosity = match verbosity.to_lowercase().as_str() {
                "quiet" => Verbosity::Quiet,
                "verbose" => Verbosity::Verbose,
                "debug" => Verbosity::Debug,
                _ => Verbosity::Normal,
            };
        }

        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.run.probe_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh.connect_timeout_secs)
    }
}

/// Get XDG config directory
fn dirs_config_dir() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

fn find_line_number(content: &str, needle: &str) -> Option<usize> {
    for (i, line) in content.lines().enumerate() {
        if line.contains(needle) {
            return Some(i + 1);
        }
    }
    None
}

fn suggest_key(unknown: &str) -> Option<String> {
    const CANDIDATES: &[&str] = &[
        "ssh",
        "program",
        "args",
        "connect_timeout_secs",
        "remote_program",
        "run",
        "probe_timeout_secs",
        "serial",
        "backups",
        "validation",
        "skip_checks",
        "skip_warnings",
        "enable_checks",
        "output",
        "verbosity",
    ];

    let mut best: Option<(&str, usize)> = None;
    for candidate in CANDIDATES {
        let dist = levenshtein(unknown, candidate);
        best = match best {
            None => Some((candidate, dist)),
            Some((_, best_dist)) if dist < best_dist => Some((candidate, dist)),
            Some(current) => Some(current),
        };
    }

    match best {
        Some((candidate, dist)) if dist <= 2 => Some(candidate.to_string()),
        _ => None,
    }
}

pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
    if a == b {
        return 0;
    }

    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    let mut prev: Vec<usize> = (0..=b_bytes.len()).collect();
    let mut curr = vec![0usize; b_bytes.len() + 1];

    for (i, &ac) in a_bytes.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &bc) in b_bytes.iter().enumerate() {
            let cost = if ac == bc { 0 } else { 1 };
            curr[j + 1] = std::cmp::min(
                std::cmp::min(prev[j + 1] + 1, curr[j] + 1),
                prev[j] + cost,
            );
        }
        prev.clone_from_slice(&curr);
    }

    prev[b_bytes.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = ToolConfig::default();

        assert_eq!(config.ssh.program, "ssh");
        assert_eq!(config.ssh.remote_program, "drover");
        assert_eq!(config.ssh.connect_timeout_secs, 10);
        assert_eq!(config.run.probe_timeout_secs, 10);
        assert_eq!(config.run.backups, 5);
        assert!(!config.run.serial);
    }

    #[test]
    fn test_config_parse_toml() {
        let toml = r#"
[ssh]
program = "ssh"
args = ["-o", "BatchMode=yes"]
connect_timeout_secs = 5

[run]
probe_timeout_secs = 3
serial = true

[validation]
skip_checks = ["write-access"]
skip_warnings = ["tool-version"]

[output]
verbosity = "verbose"
"#;

        let config: ToolConfig = toml::from_str(toml).unwrap();

        assert_eq!(config.ssh.connect_timeout_secs, 5);
        assert_eq!(config.run.probe_timeout_secs, 3);
        assert!(config.run.serial);
        assert_eq!(config.validation.skip_checks, vec!["write-access"]);
        assert_eq!(config.output.verbosity, Verbosity::Verbose);
    }

    #[test]
    fn test_verbosity_serde() {
        let v: Verbosity = serde_json::from_str("\"quiet\"").unwrap();
        assert_eq!(v, Verbosity::Quiet);

        let v: Verbosity = serde_json::from_str("\"verbose\"").unwrap();
        assert_eq!(v, Verbosity::Verbose);
    }

    #[test]
    fn test_env_override_probe_timeout() {
        // SAFETY: Single-threaded test, no concurrent access to env vars
        unsafe { std::env::set_var("DROVER_PROBE_TIMEOUT", "2") };
        let config = ToolConfig::default().with_env_overrides();
        assert_eq!(config.run.probe_timeout_secs, 2);
        unsafe { std::env::remove_var("DROVER_PROBE_TIMEOUT") };
    }

    #[test]
    fn test_env_override_serial() {
        // SAFETY: Single-threaded test, no concurrent access to env vars
        unsafe { std::env::set_var("DROVER_SERIAL", "true") };
        let config = ToolConfig::default().with_env_overrides();
        assert!(config.run.serial);
        unsafe { std::env::remove_var("DROVER_SERIAL") };
    }

    #[test]
    fn test_env_override_verbosity() {
        // SAFETY: Single-threaded test, no concurrent access to env vars
        unsafe { std::env::set_var("DROVER_VERBOSITY", "debug") };
        let config = ToolConfig::default().with_env_overrides();
        assert_eq!(config.output.verbosity, Verbosity::Debug);
        unsafe { std::env::remove_var("DROVER_VERBOSITY") };
    }

    #[test]
    fn test_config_load_with_warnings_reports_unknown_key_with_suggestion() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("drover.toml");

        fs::write(&path, "[run]\nseriall = true\n").unwrap();

        let (_config, warnings) = ToolConfig::load_with_warnings(&path).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].key, "seriall");
        assert_eq!(warnings[0].line, Some(2));
        assert_eq!(warnings[0].suggestion, Some("serial".to_string()));
    }
}
