//! Terminal and NDJSON output
//!
//! Human output is styled with crossterm when stdout is a terminal and
//! `DROVER_NO_COLOR` is unset. `--json` switches to one NDJSON event per
//! line; `--log <file>` appends the same events to a file in either mode.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use crossterm::style::Stylize;
use is_terminal::IsTerminal;
use serde::Serialize;

use crate::report::{PhaseReport, Report, RunReport, Severity};

/// One run event, for NDJSON output and log files
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        command: String,
        hosts: Vec<String>,
    },
    PhaseStarted {
        phase: String,
    },
    StepStarted {
        phase: String,
        step: String,
        host: String,
    },
    HostReport {
        phase: String,
        host: String,
        errors: usize,
        warnings: usize,
        fatal: bool,
    },
    PhaseFinished {
        phase: String,
        errors: usize,
        warnings: usize,
        fatal: bool,
    },
    Aborted {
        message: String,
    },
    RunFinished {
        success: bool,
    },
}

impl RunEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Where run progress goes; shared across worker threads
pub struct OutputSink {
    json: bool,
    verbosity: u8,
    color: bool,
    log: Option<Mutex<File>>,
}

impl OutputSink {
    pub fn new(json: bool, verbosity: u8, log_path: Option<&Path>) -> io::Result<OutputSink> {
        let log = match log_path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Mutex::new(file))
            }
            None => None,
        };
        Ok(OutputSink {
            json,
            verbosity,
            color: io::stdout().is_terminal() && std::env::var_os("DROVER_NO_COLOR").is_none(),
            log,
        })
    }

    /// Quiet sink for tests and internal callers
    pub fn silent() -> OutputSink {
        OutputSink {
            json: false,
            verbosity: 0,
            color: false,
            log: None,
        }
    }

    fn emit(&self, event: &RunEvent) {
        let line = event.to_json();
        if self.json {
            println!("{line}");
        }
        if let Some(log) = &self.log {
            if let Ok(mut file) = log.lock() {
                let _ = writeln!(file, "{line}");
            }
        }
    }

    pub fn run_started(&self, command: &str, hosts: &[String]) {
        self.emit(&RunEvent::RunStarted {
            command: command.to_string(),
            hosts: hosts.to_vec(),
        });
        if self.json {
            return;
        }
        let title = format!("🐑 drover {command}: {}", hosts.join(", "));
        if self.color {
            println!("{}", title.as_str().bold());
        } else {
            println!("{title}");
        }
    }

    pub fn phase_started(&self, phase: &str) {
        self.emit(&RunEvent::PhaseStarted {
            phase: phase.to_string(),
        });
        if !self.json {
            println!();
            println!("▶ {phase}");
        }
    }

    pub fn step_started(&self, phase: &str, step: &str, host: &str) {
        if self.json || self.log.is_some() {
            self.emit(&RunEvent::StepStarted {
                phase: phase.to_string(),
                step: step.to_string(),
                host: host.to_string(),
            });
        }
        if !self.json && self.verbosity > 0 {
            println!("  ↳ {step} on {host}");
        }
    }

    pub fn phase_finished(&self, report: &PhaseReport) {
        if self.json || self.log.is_some() {
            for host in report.hosts.values() {
                self.emit(&RunEvent::HostReport {
                    phase: report.phase.clone(),
                    host: host.host.clone(),
                    errors: host.errors(),
                    warnings: host.warnings(),
                    fatal: host.is_fatal(),
                });
            }
        }
        self.emit(&RunEvent::PhaseFinished {
            phase: report.phase.clone(),
            errors: report.errors(),
            warnings: report.warnings(),
            fatal: report.has_fatal(),
        });
        if self.json {
            return;
        }
        for host in report.hosts.values() {
            self.host_lines(host);
        }
    }

    fn host_lines(&self, report: &Report) {
        let severity = if report.errors() > 0 {
            Severity::Error
        } else if report.warnings() > 0 {
            Severity::Warning
        } else {
            Severity::Info
        };
        println!("  {} {}", self.icon(severity), report.host);
        for entry in &report.entries {
            if entry.severity == Severity::Info && self.verbosity == 0 {
                continue;
            }
            let mark = self.icon(entry.severity);
            if entry.fatal {
                println!("      {mark} {}: {} (fatal)", entry.source, entry.message);
            } else {
                println!("      {mark} {}: {}", entry.source, entry.message);
            }
        }
    }

    pub fn aborted(&self, message: &str) {
        self.emit(&RunEvent::Aborted {
            message: message.to_string(),
        });
        if !self.json {
            eprintln!("{} {message}", self.icon(Severity::Error));
        }
    }

    pub fn run_finished(&self, run: &RunReport, success: bool) {
        self.emit(&RunEvent::RunFinished { success });
        if self.json {
            return;
        }
        println!();
        println!("Summary: {} errors, {} warnings", run.errors(), run.warnings());
        if success {
            println!("{} Run complete", self.icon(Severity::Info));
        } else {
            println!("{} Run failed", self.icon(Severity::Error));
        }
    }

    pub fn warn(&self, message: &str) {
        if !self.json {
            eprintln!("{} {message}", self.icon(Severity::Warning));
        }
    }

    pub fn note(&self, message: &str) {
        if !self.json {
            println!("{} {message}", self.icon(Severity::Info));
        }
    }

    fn icon(&self, severity: Severity) -> String {
        let raw = severity.to_string();
        if !self.color {
            return raw;
        }
        let styled = match severity {
            Severity::Info => raw.green(),
            Severity::Warning => raw.yellow(),
            Severity::Error => raw.red(),
        };
        styled.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_events_serialize_as_ndjson() {
        let event = RunEvent::PhaseStarted {
            phase: "deploy".to_string(),
        };
        assert_eq!(event.to_json(), r#"{"event":"phase_started","phase":"deploy"}"#);

        let event = RunEvent::RunFinished { success: true };
        assert_eq!(event.to_json(), r#"{"event":"run_finished","success":true}"#);
    }

    #[test]
    fn test_step_events_carry_host_and_phase() {
        let event = RunEvent::StepStarted {
            phase: "deploy".to_string(),
            step: "create_release_layout".to_string(),
            host: "db1".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value["event"], "step_started");
        assert_eq!(value["host"], "db1");
    }

    #[test]
    fn test_log_file_collects_events() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("run.ndjson");
        let sink = OutputSink::new(false, 0, Some(&log_path)).unwrap();

        sink.phase_started("validate");
        let mut phase = PhaseReport::new("validate");
        phase.insert(Report::new("db1"));
        sink.phase_finished(&phase);

        let written = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("phase_started"));
        assert!(lines[1].contains("host_report"));
        assert!(lines[2].contains("phase_finished"));
    }

    #[test]
    fn test_silent_sink_writes_nothing() {
        let sink = OutputSink::silent();
        // Exercising the paths must not panic without a log file
        sink.step_started("deploy", "x", "db1");
        sink.warn("no-op");
    }
}
