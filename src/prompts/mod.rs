//! Interactive configuration prompts
//!
//! Every configuration key the tool understands is declared as a `Prompt`
//! bound to a store group. Prompts drive three things: the interactive
//! question loop, default resolution for non-interactive runs, and the
//! known-key universe used to flag typos in explicit configuration.

pub mod pipeline;
pub mod probes;
pub mod registry;
pub mod validators;

use std::io;

use dialoguer::Input;
use is_terminal::IsTerminal;

use crate::error::{DroverError, DroverResult};
use probes::ProbeKind;
use validators::Validator;

pub use pipeline::{ConfigIssue, PromptPipeline};

/// Behavior flags for one prompt
#[derive(Debug, Clone, Copy)]
pub struct PromptPolicy {
    /// Asked during interactive runs
    pub enabled: bool,
    /// May be auto-filled from its default without asking
    pub defaultable: bool,
    /// May be set through `--property` on the command line
    pub command_line_visible: bool,
    /// Expands to one binding per group member instead of the group defaults
    pub per_member: bool,
}

impl Default for PromptPolicy {
    fn default() -> Self {
        PromptPolicy {
            enabled: true,
            defaultable: true,
            command_line_visible: true,
            per_member: false,
        }
    }
}

/// How a prompt's raw input maps into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    /// Comma-separated input stored as a list
    List,
}

/// Where a prompt's default comes from when the store has no value
#[derive(Debug, Clone)]
pub enum DefaultSource {
    None,
    /// Fixed class default
    Static(String),
    /// Dynamic probe, bounded by the run's probe timeout
    Probe {
        kind: ProbeKind,
        fallback: Option<String>,
    },
}

/// One configurable key, bound to a store group
#[derive(Debug, Clone)]
pub struct Prompt {
    pub name: String,
    pub text: String,
    pub group: &'static str,
    /// Leaf key within the group member
    pub key: String,
    pub weight: i32,
    pub validator: Validator,
    pub kind: ValueKind,
    pub default: DefaultSource,
    pub policy: PromptPolicy,
    /// Missing values are tolerated; topology resolution decides later
    pub optional: bool,
}

impl Prompt {
    /// Prompt asked once per group member
    pub fn member(name: &str, text: &str, group: &'static str, key: &str) -> Prompt {
        Prompt {
            name: name.to_string(),
            text: text.to_string(),
            group,
            key: key.to_string(),
            weight: 0,
            validator: Validator::NonEmpty,
            kind: ValueKind::Text,
            default: DefaultSource::None,
            policy: PromptPolicy {
                per_member: true,
                ..PromptPolicy::default()
            },
            optional: false,
        }
    }

    /// Prompt bound to the group's `defaults` member
    pub fn group_default(name: &str, text: &str, group: &'static str, key: &str) -> Prompt {
        Prompt {
            name: name.to_string(),
            text: text.to_string(),
            group,
            key: key.to_string(),
            weight: 0,
            validator: Validator::NonEmpty,
            kind: ValueKind::Text,
            default: DefaultSource::None,
            policy: PromptPolicy::default(),
            optional: false,
        }
    }

    pub fn weight(mut self, weight: i32) -> Prompt {
        self.weight = weight;
        self
    }

    pub fn validator(mut self, validator: Validator) -> Prompt {
        self.validator = validator;
        self
    }

    pub fn list(mut self) -> Prompt {
        self.kind = ValueKind::List;
        self
    }

    pub fn static_default(mut self, value: &str) -> Prompt {
        self.default = DefaultSource::Static(value.to_string());
        self
    }

    pub fn probe(mut self, kind: ProbeKind, fallback: Option<&str>) -> Prompt {
        self.default = DefaultSource::Probe {
            kind,
            fallback: fallback.map(str::to_string),
        };
        self
    }

    pub fn optional(mut self) -> Prompt {
        self.optional = true;
        self
    }

    /// Not asked interactively; still part of the known-key universe
    pub fn disabled(mut self) -> Prompt {
        self.policy.enabled = false;
        self
    }

    /// Rejected when targeted by `--property`
    pub fn hidden(mut self) -> Prompt {
        self.policy.command_line_visible = false;
        self
    }

    pub fn not_defaultable(mut self) -> Prompt {
        self.policy.defaultable = false;
        self
    }

    /// Registration-time sanity check
    pub fn validate_definition(&self) -> DroverResult<()> {
        if self.name.trim().is_empty() {
            return Err(DroverError::configuration(
                format!("{}.{}", self.group, self.key),
                "prompt has no name",
            ));
        }
        if self.text.trim().is_empty() {
            return Err(DroverError::configuration(
                self.name.as_str(),
                "prompt has no question text",
            ));
        }
        if self.key.trim().is_empty() || self.key.contains('.') {
            return Err(DroverError::configuration(
                self.name.as_str(),
                "prompt key must be a single path segment",
            ));
        }
        Ok(())
    }
}

/// Terminal seam for the interactive loop
///
/// The real implementation reads stdin; tests script answers.
pub trait Console {
    /// Ask one question; returns the trimmed input line
    fn ask(&mut self, text: &str, default: Option<&str>) -> io::Result<String>;
    fn say(&mut self, line: &str);
    fn warn(&mut self, line: &str);
}

/// Console backed by the controlling terminal
#[derive(Default)]
pub struct StdinConsole;

impl Console for StdinConsole {
    fn ask(&mut self, text: &str, default: Option<&str>) -> io::Result<String> {
        if !io::stdin().is_terminal() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "interactive prompts require a terminal; use --no-prompts",
            ));
        }
        let mut input = Input::<String>::new().with_prompt(text).allow_empty(true);
        if let Some(d) = default {
            input = input.default(d.to_string());
        }
        let answer = input.interact_text().map_err(io::Error::other)?;
        Ok(answer.trim().to_string())
    }

    fn say(&mut self, line: &str) {
        println!("{line}");
    }

    fn warn(&mut self, line: &str) {
        eprintln!("{line}");
    }
}

/// Scripted console for tests: pops queued answers, records output
#[cfg(test)]
pub struct ScriptedConsole {
    pub answers: std::collections::VecDeque<String>,
    pub said: Vec<String>,
    pub warned: Vec<String>,
}

#[cfg(test)]
impl ScriptedConsole {
    pub fn with_answers(answers: &[&str]) -> ScriptedConsole {
        ScriptedConsole {
            answers: answers.iter().map(|s| s.to_string()).collect(),
            said: Vec::new(),
            warned: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Console for ScriptedConsole {
    fn ask(&mut self, _text: &str, _default: Option<&str>) -> io::Result<String> {
        self.answers.pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "script ran out of answers")
        })
    }

    fn say(&mut self, line: &str) {
        self.said.push(line.to_string());
    }

    fn warn(&mut self, line: &str) {
        self.warned.push(line.to_string());
    }
}
