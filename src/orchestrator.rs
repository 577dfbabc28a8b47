//! Run orchestration
//!
//! One `run` drives a whole invocation: complete the configuration through
//! the prompt pipeline, snapshot and plan the target hosts, then walk the
//! entry point's phases over every host transport. Failure policy lives
//! here and nowhere else: which findings halt the run, which merely drop
//! one host, and what `--force` may override.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::checks::coordinator::run_coordinator_checks;
use crate::checks::{ListenerSet, Pass, SkipList};
use crate::config::ToolConfig;
use crate::error::{DroverError, DroverResult, FatalAbort};
use crate::executor::{self, HostRunner, LocalIdentity, PingFactsProbe};
use crate::modules::{all_commit_steps, all_deploy_steps, builtin_modules};
use crate::planner::{build_per_host_configurations, resolve_step_groups, NullProbe, StepGroup};
use crate::prompts::pipeline::PropertyClass;
use crate::prompts::{Console, PromptPipeline};
use crate::report::{PhaseReport, Report, RunReport};
use crate::store::{host_alias, persist, ConfigStore, PropertyPath, DATASERVICES};
use crate::topology::{self, Topology};
use crate::ui::OutputSink;

/// Check that can only pass while every peer holds its service ports open
const FIREWALL_CHECK: &str = "firewall-peer-reachability";

/// Which command a run was started as
///
/// Each entry point replays the phases leading up to it, so `validate`
/// prevalidates and prepares first, and a bare `commit` re-runs the
/// commit-side validation pass before touching anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    Prevalidate,
    Prepare,
    Validate,
    Deploy,
    ValidateCommit,
    Commit,
    Cleanup,
}

impl EntryPoint {
    pub fn command_name(&self) -> &'static str {
        match self {
            EntryPoint::Prevalidate => "prevalidate",
            EntryPoint::Prepare => "prepare",
            EntryPoint::Validate => "validate",
            EntryPoint::Deploy => "deploy",
            EntryPoint::ValidateCommit => "validate-commit",
            EntryPoint::Commit => "commit",
            EntryPoint::Cleanup => "cleanup",
        }
    }

    /// Entry points that refuse to start from a broken configuration
    fn validates_configuration(&self) -> bool {
        matches!(
            self,
            EntryPoint::Prevalidate
                | EntryPoint::Prepare
                | EntryPoint::Validate
                | EntryPoint::Deploy
        )
    }
}

/// Everything the command line can vary about a run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Restrict the run to these hosts; empty means every planned host
    pub hosts: Vec<String>,
    /// Restrict the run to one dataservice, expanding composites
    pub dataservice: Option<String>,
    /// Carry on where a fatal validation finding would normally stop
    pub force: bool,
    /// Ask interactive questions before a deploy
    pub interactive: bool,
    /// Run the validation passes at all
    pub validation: bool,
    /// Run the deployment phases at all
    pub deployment: bool,
    pub skip_checks: Vec<String>,
    pub enable_checks: Vec<String>,
    /// `key=value` overrides applied to the store before anything else
    pub properties: Vec<(String, String)>,
    /// TOML file merged into the explicit layer before the run
    pub seed: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            hosts: Vec::new(),
            dataservice: None,
            force: false,
            interactive: true,
            validation: true,
            deployment: true,
            skip_checks: Vec::new(),
            enable_checks: Vec::new(),
            properties: Vec::new(),
            seed: None,
        }
    }
}

/// State shared by every stage of one run
pub struct RunContext {
    pub tool: ToolConfig,
    pub store: ConfigStore,
    pub store_path: PathBuf,
    pub options: RunOptions,
    pub sink: OutputSink,
    interrupted: Arc<AtomicBool>,
}

impl RunContext {
    pub fn new(
        tool: ToolConfig,
        store: ConfigStore,
        store_path: PathBuf,
        options: RunOptions,
        sink: OutputSink,
    ) -> RunContext {
        RunContext {
            tool,
            store,
            store_path,
            options,
            sink,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag a signal handler sets to stop the run at the next phase boundary
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }
}

/// Outcome of a run that got as far as a report
#[derive(Debug)]
pub struct RunSummary {
    pub report: RunReport,
    pub success: bool,
}

/// Drive one full run from the given entry point
///
/// Fatal findings in the validation phases halt the run unless `--force`
/// is set; a host that fails prepare, deploy, or commit is dropped from
/// the phases after it either way. `FatalAbort` conditions unwind
/// immediately, and once a deploy was attempted the staging areas are
/// cleaned up even on that path.
pub fn run(
    ctx: &mut RunContext,
    entry: EntryPoint,
    console: &mut dyn Console,
) -> DroverResult<RunSummary> {
    match drive(ctx, entry, console) {
        Ok(summary) => Ok(summary),
        Err(e) => {
            ctx.sink.aborted(&e.to_string());
            Err(e)
        }
    }
}

fn drive(
    ctx: &mut RunContext,
    entry: EntryPoint,
    console: &mut dyn Console,
) -> DroverResult<RunSummary> {
    let pipeline = PromptPipeline::builtin(ctx.tool.probe_timeout());

    if let Err(e) = configure(ctx, entry, &pipeline, console) {
        if let DroverError::Abort(FatalAbort::SaveAndExit) = e {
            ctx.store.save(&ctx.store_path, ctx.tool.run.backups)?;
            ctx.sink
                .note(&format!("configuration saved to {}", ctx.store_path.display()));
            return Ok(RunSummary {
                report: RunReport::new(),
                success: true,
            });
        }
        return Err(e);
    }

    let plan = plan(ctx)?;
    ctx.sink.run_started(entry.command_name(), &plan.hosts);

    let report = execute(ctx, entry, &plan)?;
    let success = report.is_success() || ctx.options.force;
    ctx.sink.run_finished(&report, success);
    Ok(RunSummary { report, success })
}

/// Render the effective configuration without running anything
///
/// Without host or dataservice filters this is the merged store in flat
/// form, derived members and defaults included. With filters it renders
/// each selected host's deployment snapshot under a `# host` header.
pub fn dump(ctx: &mut RunContext) -> DroverResult<String> {
    let pipeline = PromptPipeline::builtin(ctx.tool.probe_timeout());
    apply_inputs(ctx, &pipeline)?;
    topology::derive_service_members(&mut ctx.store)?;
    pipeline.fill_defaults(&mut ctx.store)?;

    if ctx.options.hosts.is_empty() && ctx.options.dataservice.is_none() {
        return Ok(persist::to_flat_string(&ctx.store.merged()));
    }

    let hosts = select_hosts(&ctx.store, &ctx.options)?;
    let (configs, failures) = build_per_host_configurations(&ctx.store, &hosts, &NullProbe);
    if let Some((host, message)) = failures.into_iter().next() {
        return Err(DroverError::configuration(host, message));
    }

    let mut out = String::new();
    for (host, config) in configs {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("# {host}\n"));
        out.push_str(&config.flat_string());
    }
    Ok(out)
}

/// Apply --seed and --property inputs to the store; true if it changed
fn apply_inputs(ctx: &mut RunContext, pipeline: &PromptPipeline) -> DroverResult<bool> {
    let mut dirty = false;

    if let Some(path) = &ctx.options.seed {
        let text = std::fs::read_to_string(path)?;
        let value: toml::Value = text.parse().map_err(|e: toml::de::Error| {
            DroverError::configuration(path.display().to_string(), e.to_string())
        })?;
        ctx.store.merge_toml(&value)?;
        dirty = true;
    }

    for (key, raw) in &ctx.options.properties {
        let path = PropertyPath::parse(key)?;
        match pipeline.classify_property(&path) {
            PropertyClass::Visible => {
                let value = pipeline.property_value(&path, raw);
                ctx.store.set(&path, value)?;
                dirty = true;
            }
            PropertyClass::Hidden => {
                return Err(DroverError::configuration(
                    key.as_str(),
                    "this key is managed by drover and cannot be set directly",
                ));
            }
            PropertyClass::Unknown { suggestion } => {
                let message = match suggestion {
                    Some(s) => format!("unknown property (did you mean '{s}'?)"),
                    None => "unknown property".to_string(),
                };
                return Err(DroverError::configuration(key.as_str(), message));
            }
        }
    }

    Ok(dirty)
}

/// Bring the store to a runnable state and persist what the user changed
///
/// Ordering matters: command-line inputs land first so the interactive
/// loop and derivation see them, service members are derived before
/// defaults fill in, and validation judges the final picture.
fn configure(
    ctx: &mut RunContext,
    entry: EntryPoint,
    pipeline: &PromptPipeline,
    console: &mut dyn Console,
) -> DroverResult<()> {
    let mut dirty = apply_inputs(ctx, pipeline)?;

    if entry == EntryPoint::Deploy && ctx.options.interactive {
        pipeline.run_interactive(&mut ctx.store, console)?;
        dirty = true;
    }

    topology::derive_service_members(&mut ctx.store)?;
    pipeline.fill_defaults(&mut ctx.store)?;

    if entry.validates_configuration() {
        let mut issues = pipeline.unknown_keys(&ctx.store);
        issues.extend(pipeline.validate(&ctx.store));
        if !issues.is_empty() {
            for issue in &issues {
                ctx.sink.warn(&issue.to_string());
            }
            if !ctx.options.force {
                return Err(DroverError::configuration(
                    ctx.store_path.display().to_string(),
                    format!(
                        "{} configuration problems found; fix them or rerun with --force",
                        issues.len()
                    ),
                ));
            }
        }
    }

    if dirty {
        ctx.store.save(&ctx.store_path, ctx.tool.run.backups)?;
    }
    Ok(())
}

/// Hosts the run targets, in alias form
///
/// A dataservice filter narrows to that dataservice's members and
/// connectors, expanding a composite into its children. A host filter
/// then narrows further; naming a host outside the plan is an error.
fn select_hosts(store: &ConfigStore, options: &RunOptions) -> DroverResult<Vec<String>> {
    let dataservices = match &options.dataservice {
        Some(name) => {
            let topo = Topology::build(store, name)?;
            if topo.composite {
                topo.children
            } else {
                vec![name.clone()]
            }
        }
        None => store.members(DATASERVICES),
    };

    let mut planned = BTreeSet::new();
    for ds in &dataservices {
        let members = store.effective_list(DATASERVICES, ds, "members");
        let connectors = store.effective_list(DATASERVICES, ds, "connectors");
        for host in members.into_iter().chain(connectors) {
            planned.insert(host_alias(&host));
        }
    }
    if planned.is_empty() {
        return Err(DroverError::configuration(
            DATASERVICES,
            "no dataservice members are configured; nothing to run against",
        ));
    }

    if options.hosts.is_empty() {
        return Ok(planned.into_iter().collect());
    }

    let mut selected = Vec::new();
    for raw in &options.hosts {
        let alias = host_alias(raw);
        if !planned.contains(&alias) {
            return Err(DroverError::configuration(
                raw.as_str(),
                "host is not a member of any targeted dataservice",
            ));
        }
        if !selected.contains(&alias) {
            selected.push(alias);
        }
    }
    Ok(selected)
}

/// Planned work for a run: per-host runners plus the resolved step groups
struct RunPlan {
    hosts: Vec<String>,
    runners: Vec<HostRunner>,
    /// Hosts whose snapshot could not be built, with the reason
    failures: Vec<(String, String)>,
    deploy_groups: Vec<StepGroup>,
    commit_groups: Vec<StepGroup>,
}

fn plan(ctx: &RunContext) -> DroverResult<RunPlan> {
    let hosts = select_hosts(&ctx.store, &ctx.options)?;
    let identity = LocalIdentity::detect();
    let probe = PingFactsProbe {
        tool: &ctx.tool,
        store: &ctx.store,
        identity: &identity,
    };
    let (configs, failures) = build_per_host_configurations(&ctx.store, &hosts, &probe);

    let run_id = new_run_id();
    let runners: Vec<HostRunner> = configs
        .into_values()
        .map(|config| HostRunner::new(&ctx.tool, &identity, config, &run_id))
        .collect();

    let modules = builtin_modules();
    Ok(RunPlan {
        hosts,
        runners,
        failures,
        deploy_groups: resolve_step_groups(all_deploy_steps(&modules))?,
        commit_groups: resolve_step_groups(all_commit_steps(&modules))?,
    })
}

/// Staging areas from different runs must not collide on a shared host
fn new_run_id() -> String {
    format!(
        "{}-{}",
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        std::process::id()
    )
}

/// One phase of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Prevalidate,
    Prepare,
    Validate,
    Deploy,
    ValidateCommit,
    Commit,
    Cleanup { sweep: bool },
}

impl Stage {
    fn name(self) -> &'static str {
        match self {
            Stage::Prevalidate => "prevalidate",
            Stage::Prepare => "prepare",
            Stage::Validate => "validate",
            Stage::Deploy => "deploy",
            Stage::ValidateCommit => "validate-commit",
            Stage::Commit => "commit",
            Stage::Cleanup { .. } => "cleanup",
        }
    }
}

fn stages_for(entry: EntryPoint, options: &RunOptions) -> Vec<Stage> {
    let mut stages = match entry {
        EntryPoint::Prevalidate => vec![Stage::Prevalidate],
        EntryPoint::Prepare => vec![Stage::Prevalidate, Stage::Prepare],
        EntryPoint::Validate => vec![Stage::Prevalidate, Stage::Prepare, Stage::Validate],
        EntryPoint::Deploy => {
            if options.deployment {
                vec![
                    Stage::Prevalidate,
                    Stage::Prepare,
                    Stage::Validate,
                    Stage::Deploy,
                    Stage::ValidateCommit,
                    Stage::Commit,
                    Stage::Cleanup { sweep: false },
                ]
            } else {
                // --no-deployment turns a deploy into a dry validate run
                vec![Stage::Prevalidate, Stage::Prepare, Stage::Validate]
            }
        }
        EntryPoint::ValidateCommit => vec![Stage::ValidateCommit],
        EntryPoint::Commit => vec![Stage::ValidateCommit, Stage::Commit],
        EntryPoint::Cleanup => vec![Stage::Cleanup { sweep: true }],
    };
    if !options.validation {
        stages.retain(|s| {
            !matches!(s, Stage::Prevalidate | Stage::Validate | Stage::ValidateCommit)
        });
    }
    stages
}

fn execute(ctx: &RunContext, entry: EntryPoint, plan: &RunPlan) -> DroverResult<RunReport> {
    let mut report = RunReport::new();
    let force = ctx.options.force;

    if !plan.failures.is_empty() {
        ctx.sink.phase_started("plan");
        let mut phase = PhaseReport::new("plan");
        for (host, message) in &plan.failures {
            let mut host_report = Report::new(host.clone());
            host_report.add_fatal("plan", message.clone());
            phase.insert(host_report);
        }
        ctx.sink.phase_finished(&phase);
        report.push(phase);
        if !force || plan.runners.is_empty() {
            return Ok(report);
        }
    }

    let skip = SkipList::from_config(&ctx.tool.validation)
        .with_cli(&ctx.options.skip_checks, &ctx.options.enable_checks);
    let mut healthy: BTreeSet<String> = plan.runners.iter().map(|r| r.host.clone()).collect();
    let mut deploy_attempted = false;
    let mut cleaned = false;
    let mut skip_commit = false;

    for stage in stages_for(entry, &ctx.options) {
        if ctx.interrupted() {
            if deploy_attempted && !cleaned {
                emergency_cleanup(ctx, &plan.runners, &mut report);
            }
            return Err(FatalAbort::Interrupted.into());
        }
        if skip_commit && stage == Stage::Commit {
            continue;
        }
        let targets: Vec<&HostRunner> = plan
            .runners
            .iter()
            .filter(|r| healthy.contains(&r.host))
            .collect();
        // Cleanup covers every runner, healthy or not
        if targets.is_empty() && !matches!(stage, Stage::Cleanup { .. }) {
            continue;
        }

        ctx.sink.phase_started(stage.name());
        let phase = match stage {
            Stage::Prevalidate => prevalidate_phase(&targets, &skip),
            Stage::Prepare => prepare_phase(&targets),
            Stage::Validate => validate_phase(&targets, &skip),
            Stage::Deploy => {
                deploy_attempted = true;
                steps_phase(ctx, &targets, "deploy", &plan.deploy_groups)
            }
            Stage::ValidateCommit => {
                checks_phase(&targets, "validate-commit", Pass::ValidateCommit, &skip)
            }
            Stage::Commit => steps_phase(ctx, &targets, "commit", &plan.commit_groups),
            Stage::Cleanup { sweep } => {
                cleaned = true;
                cleanup_phase(&plan.runners, sweep)
            }
        };
        ctx.sink.phase_finished(&phase);
        let fatal = phase.has_fatal();

        match stage {
            // Validation findings are judgments; --force may overrule them
            Stage::Prevalidate | Stage::Validate => {
                report.push(phase);
                if fatal && !force {
                    break;
                }
            }
            Stage::ValidateCommit => {
                report.push(phase);
                if fatal && !force {
                    skip_commit = true;
                }
            }
            // Execution failures are facts; the host is out either way
            Stage::Prepare | Stage::Deploy | Stage::Commit => {
                healthy = phase.healthy_hosts().into_iter().collect();
                let halt = stage == Stage::Prepare && fatal && !force;
                report.push(phase);
                if halt {
                    break;
                }
            }
            Stage::Cleanup { .. } => report.push(phase),
        }
    }

    Ok(report)
}

fn emergency_cleanup(ctx: &RunContext, runners: &[HostRunner], report: &mut RunReport) {
    ctx.sink.phase_started("cleanup");
    let phase = cleanup_phase(runners, false);
    ctx.sink.phase_finished(&phase);
    report.push(phase);
}

/// Coordinator-side checks first; the remote pass only runs if they hold
fn prevalidate_phase(targets: &[&HostRunner], skip: &SkipList) -> PhaseReport {
    executor::run_per_host(targets, "prevalidate", |runner| {
        let mut report = run_coordinator_checks(runner.transport(), skip);
        if report.is_fatal() {
            return report;
        }
        let request = runner.checks_request(Pass::Prevalidate, skip);
        report.merge(executor::envelope_to_report(
            &runner.host,
            "prevalidate",
            runner.invoke(&request),
        ));
        report
    })
}

fn prepare_phase(targets: &[&HostRunner]) -> PhaseReport {
    executor::run_per_host(targets, "prepare", |runner| {
        executor::envelope_to_report(
            &runner.host,
            "prepare",
            runner.invoke(&runner.prepare_request()),
        )
    })
}

/// The validate pass, with peer reachability split out
///
/// Nothing is listening on the service ports before a first deploy, so a
/// plain connect probe would report every firewall as broken. The pass
/// therefore runs twice: everything except the reachability check, then
/// that check alone while the coordinator holds all fleet ports open.
fn validate_phase(targets: &[&HostRunner], skip: &SkipList) -> PhaseReport {
    if !skip.allows(FIREWALL_CHECK) {
        return checks_phase(targets, "validate", Pass::Validate, skip);
    }

    let local_only = skip.clone().without(&[FIREWALL_CHECK]);
    let mut phase = checks_phase(targets, "validate", Pass::Validate, &local_only);

    let (listeners, failures) =
        ListenerSet::open(targets.iter().map(|r| (r.transport(), &r.config)));
    for (host, message) in failures {
        let mut report = Report::new(host);
        report.add_warning(FIREWALL_CHECK, message);
        phase.insert(report);
    }
    if listeners.count() > 0 {
        let reachability = skip.clone().restricted_to(&[FIREWALL_CHECK]);
        let second = checks_phase(targets, "validate", Pass::Validate, &reachability);
        for report in second.hosts.into_values() {
            phase.insert(report);
        }
    }
    listeners.close();
    phase
}

fn checks_phase(
    targets: &[&HostRunner],
    phase: &str,
    pass: Pass,
    skip: &SkipList,
) -> PhaseReport {
    executor::run_per_host(targets, phase, |runner| {
        let request = runner.checks_request(pass, skip);
        executor::envelope_to_report(&runner.host, phase, runner.invoke(&request))
    })
}

fn steps_phase(
    ctx: &RunContext,
    targets: &[&HostRunner],
    phase: &str,
    groups: &[StepGroup],
) -> PhaseReport {
    executor::run_phase(targets, phase, groups, ctx.tool.run.serial, &|step, host| {
        ctx.sink.step_started(phase, &step.name, host)
    })
}

fn cleanup_phase(runners: &[HostRunner], sweep: bool) -> PhaseReport {
    let everyone: Vec<&HostRunner> = runners.iter().collect();
    executor::run_per_host(&everyone, "cleanup", |runner| {
        executor::envelope_to_report(
            &runner.host,
            "cleanup",
            runner.invoke(&runner.cleanup_request(sweep)),
        )
    })
}
