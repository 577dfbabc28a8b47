//! Prompt pipeline
//!
//! Expands registered prompts against the store's current membership, runs
//! the interactive question loop, fills defaults for non-interactive runs,
//! and validates every known key. Three control words steer the interactive
//! loop: `back` re-enters the previous question, `defaults` accepts defaults
//! for the rest of the run, `save` persists what was entered and exits.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::levenshtein;
use crate::error::{DroverResult, FatalAbort};
use crate::prompts::{Console, DefaultSource, Prompt, ValueKind};
use crate::store::{ConfigStore, PropertyPath, PropertyValue, DEFAULTS, TOP_GROUPS};

/// Control word: go back to the previous prompt
const WORD_BACK: &str = "back";
/// Control word: accept defaults for all remaining prompts
const WORD_DEFAULTS: &str = "defaults";
/// Control word: save entered values and exit
const WORD_SAVE: &str = "save";

/// A problem found while validating configured values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// How a `--property` path relates to the known-key universe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyClass {
    Visible,
    /// Known but managed by the tool; not settable from the command line
    Hidden,
    Unknown { suggestion: Option<String> },
}

/// One prompt expanded against a concrete store path
struct Binding<'a> {
    prompt: &'a Prompt,
    member: String,
    path: PropertyPath,
}

impl Binding<'_> {
    fn display_text(&self) -> String {
        if self.prompt.policy.per_member {
            format!("[{}] {}", self.member, self.prompt.text)
        } else {
            self.prompt.text.clone()
        }
    }

    fn parse_value(&self, raw: &str) -> PropertyValue {
        match self.prompt.kind {
            ValueKind::Text => PropertyValue::Text(raw.to_string()),
            ValueKind::List => PropertyValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        }
    }
}

fn value_string(value: &PropertyValue) -> Option<String> {
    match value {
        PropertyValue::Text(s) => Some(s.clone()),
        PropertyValue::List(items) => Some(items.join(",")),
        PropertyValue::Tree(_) => None,
    }
}

/// The prompt pipeline
pub struct PromptPipeline {
    prompts: Vec<Prompt>,
    global_defaults: BTreeMap<String, String>,
    probe_timeout: Duration,
}

impl PromptPipeline {
    pub fn new(probe_timeout: Duration) -> PromptPipeline {
        PromptPipeline {
            prompts: Vec::new(),
            global_defaults: BTreeMap::new(),
            probe_timeout,
        }
    }

    /// Pipeline loaded with every builtin prompt and global default
    pub fn builtin(probe_timeout: Duration) -> PromptPipeline {
        let mut pipeline = PromptPipeline::new(probe_timeout);
        for prompt in crate::prompts::registry::builtin_prompts() {
            // Builtin definitions are covered by registry tests
            let _ = pipeline.register(prompt);
        }
        for (key, value) in crate::prompts::registry::builtin_global_defaults() {
            pipeline.register_default(key, value);
        }
        pipeline
    }

    /// Register a prompt; definitions are validated here, not at use time
    pub fn register(&mut self, prompt: Prompt) -> DroverResult<()> {
        prompt.validate_definition()?;
        if self.prompts.iter().any(|p| p.name == prompt.name) {
            return Err(crate::error::DroverError::configuration(
                prompt.name.as_str(),
                "a prompt with this name is already registered",
            ));
        }
        self.prompts.push(prompt);
        Ok(())
    }

    /// Register a global default consulted before prompt-level defaults
    pub fn register_default(&mut self, key: &str, value: &str) {
        self.global_defaults
            .insert(key.to_string(), value.to_string());
    }

    /// Expand prompts into concrete bindings, ordered by weight
    ///
    /// Membership is read from the store as it stands; hosts and
    /// dataservices named on the command line must be applied first.
    fn bindings<'a>(&'a self, store: &ConfigStore) -> Vec<Binding<'a>> {
        let mut sorted: Vec<&Prompt> = self.prompts.iter().collect();
        sorted.sort_by_key(|p| p.weight);

        let mut bindings = Vec::new();
        for prompt in sorted {
            if prompt.policy.per_member {
                for member in store.members(prompt.group) {
                    let path = PropertyPath::of(&[prompt.group, &member, &prompt.key]);
                    bindings.push(Binding {
                        prompt,
                        member,
                        path,
                    });
                }
            } else {
                bindings.push(Binding {
                    prompt,
                    member: DEFAULTS.to_string(),
                    path: PropertyPath::of(&[prompt.group, DEFAULTS, &prompt.key]),
                });
            }
        }
        bindings
    }

    /// Default for one binding: configured value, then stored computed value,
    /// then registered global default, then the prompt's own default source.
    fn resolve_default(&self, binding: &Binding<'_>, store: &ConfigStore) -> Option<String> {
        if let Some(value) =
            store.effective(binding.prompt.group, &binding.member, &binding.prompt.key)
        {
            return value_string(value);
        }
        if let Some(value) = self.global_defaults.get(&binding.prompt.key) {
            return Some(value.clone());
        }
        match &binding.prompt.default {
            DefaultSource::None => None,
            DefaultSource::Static(value) => Some(value.clone()),
            DefaultSource::Probe { kind, fallback } => {
                let member = binding
                    .prompt
                    .policy
                    .per_member
                    .then_some(binding.member.as_str());
                crate::prompts::probes::run_probe(*kind, member, self.probe_timeout)
                    .or_else(|| fallback.clone())
            }
        }
    }

    /// Resolve defaults for every unset key into the system layer
    ///
    /// Explicit values are left alone. Invalid defaults are written anyway;
    /// `validate` reports them so nothing fails silently halfway through.
    pub fn fill_defaults(&self, store: &mut ConfigStore) -> DroverResult<()> {
        for binding in self.bindings(store) {
            if store
                .effective(binding.prompt.group, &binding.member, &binding.prompt.key)
                .is_some()
            {
                continue;
            }
            if let Some(default) = self.resolve_default(&binding, store) {
                store.set_system(&binding.path, binding.parse_value(&default))?;
            }
        }
        Ok(())
    }

    /// Run the interactive question loop
    ///
    /// Accepted answers land in the explicit layer. Returns a `SaveAndExit`
    /// abort when the user chooses `save`; the caller persists and exits.
    pub fn run_interactive(
        &self,
        store: &mut ConfigStore,
        console: &mut dyn Console,
    ) -> DroverResult<()> {
        let bindings: Vec<Binding<'_>> = self
            .bindings(store)
            .into_iter()
            .filter(|b| b.prompt.policy.enabled)
            .collect();

        let mut index = 0;
        let mut accept_defaults = false;
        while index < bindings.len() {
            let binding = &bindings[index];
            let default = self.resolve_default(binding, store);

            if accept_defaults && binding.prompt.policy.defaultable {
                if let Some(value) = &default {
                    if binding.prompt.validator.validate(value).is_ok() {
                        store.set(&binding.path, binding.parse_value(value))?;
                        index += 1;
                        continue;
                    }
                    console.warn(&format!(
                        "Default for {} is not usable; please answer",
                        binding.path
                    ));
                } else if binding.prompt.optional {
                    index += 1;
                    continue;
                }
                // No usable default: fall through and ask
            }

            let answer = console.ask(&binding.display_text(), default.as_deref())?;
            match answer.as_str() {
                WORD_BACK => {
                    if index == 0 {
                        console.warn("Already at the first prompt");
                    } else {
                        index -= 1;
                    }
                }
                WORD_DEFAULTS => {
                    accept_defaults = true;
                }
                WORD_SAVE => {
                    return Err(FatalAbort::SaveAndExit.into());
                }
                raw => {
                    let value = if raw.is_empty() {
                        default.clone().unwrap_or_default()
                    } else {
                        raw.to_string()
                    };
                    if value.is_empty() && binding.prompt.optional {
                        index += 1;
                        continue;
                    }
                    match binding.prompt.validator.validate(&value) {
                        Ok(()) => {
                            store.set(&binding.path, binding.parse_value(&value))?;
                            index += 1;
                        }
                        Err(message) => {
                            console.warn(&message);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate every binding's effective value; collects all problems
    pub fn validate(&self, store: &ConfigStore) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        for binding in self.bindings(store) {
            let value =
                store.effective(binding.prompt.group, &binding.member, &binding.prompt.key);
            match value.and_then(value_string) {
                None => {
                    if !binding.prompt.optional {
                        issues.push(ConfigIssue {
                            path: binding.path.to_string(),
                            message: "no value configured".to_string(),
                        });
                    }
                }
                Some(text) => {
                    if let Err(message) = binding.prompt.validator.validate(&text) {
                        issues.push(ConfigIssue {
                            path: binding.path.to_string(),
                            message,
                        });
                    }
                }
            }
        }
        issues
    }

    /// Explicit keys outside the known-key universe, with typo suggestions
    pub fn unknown_keys(&self, store: &ConfigStore) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        for (path, _) in store.explicit().leaves() {
            let segments = path.segments();
            if segments.len() != 3 {
                issues.push(ConfigIssue {
                    path: path.to_string(),
                    message: "expected group.member.key".to_string(),
                });
                continue;
            }
            let group = segments[0].as_str();
            let key = segments[2].as_str();
            if !TOP_GROUPS.contains(&group) {
                issues.push(ConfigIssue {
                    path: path.to_string(),
                    message: match closest(group, TOP_GROUPS.iter().copied()) {
                        Some(s) => format!("unknown group '{group}' (did you mean '{s}'?)"),
                        None => format!("unknown group '{group}'"),
                    },
                });
                continue;
            }
            if !self
                .prompts
                .iter()
                .any(|p| p.group == group && p.key == key)
            {
                let candidates = self
                    .prompts
                    .iter()
                    .filter(|p| p.group == group)
                    .map(|p| p.key.as_str());
                issues.push(ConfigIssue {
                    path: path.to_string(),
                    message: match closest(key, candidates) {
                        Some(s) => format!("unknown key '{key}' (did you mean '{s}'?)"),
                        None => format!("unknown key '{key}'"),
                    },
                });
            }
        }
        issues
    }

    /// Parse a raw command-line value by the matching prompt's kind
    ///
    /// List-valued keys split on commas; everything else stays text.
    pub fn property_value(&self, path: &PropertyPath, raw: &str) -> PropertyValue {
        let segments = path.segments();
        let is_list = segments.len() == 3
            && self.prompts.iter().any(|p| {
                p.group == segments[0] && p.key == segments[2] && p.kind == ValueKind::List
            });
        if is_list {
            PropertyValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        } else {
            PropertyValue::Text(raw.to_string())
        }
    }

    /// Whether a `--property` path is settable, managed, or unknown
    pub fn classify_property(&self, path: &PropertyPath) -> PropertyClass {
        let segments = path.segments();
        if segments.len() != 3 || !TOP_GROUPS.contains(&segments[0].as_str()) {
            return PropertyClass::Unknown { suggestion: None };
        }
        let group = segments[0].as_str();
        let key = segments[2].as_str();
        match self
            .prompts
            .iter()
            .find(|p| p.group == group && p.key == key)
        {
            Some(prompt) if prompt.policy.command_line_visible => PropertyClass::Visible,
            Some(_) => PropertyClass::Hidden,
            None => PropertyClass::Unknown {
                suggestion: closest(
                    key,
                    self.prompts
                        .iter()
                        .filter(|p| p.group == group)
                        .map(|p| p.key.as_str()),
                ),
            },
        }
    }
}

fn closest<'a>(unknown: &str, candidates: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for candidate in candidates {
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
