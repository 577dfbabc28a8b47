//! Drover command line
//!
//! Every entry point is one subcommand over the same run machinery: the
//! difference between `drover validate` and `drover deploy` is where the
//! orchestrator stops, not how it starts. The hidden `exec` subcommand is
//! the remote side of the SSH protocol and is never typed by a person.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};

use drover::config::{ConfigWarning, ToolConfig};
use drover::orchestrator::{self, EntryPoint, RunContext, RunOptions};
use drover::prompts::{probes, StdinConsole};
use drover::remote::dispatch;
use drover::remote::{CommandRequest, RemoteFault, ResponseEnvelope};
use drover::store::ConfigStore;
use drover::ui::OutputSink;

/// Drover - configuration deployment for replicated database clusters
#[derive(Parser, Debug)]
#[command(name = "drover")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit NDJSON events instead of human-readable output
    #[arg(long, default_value = "false")]
    json: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Cluster configuration file
    #[arg(short, long, default_value = "drover.cfg")]
    config: PathBuf,

    /// Append run events to this NDJSON log file
    #[arg(long)]
    log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Selection and behaviour flags shared by every run entry point
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Restrict the run to these hosts (comma separated, repeatable)
    #[arg(long, value_delimiter = ',')]
    hosts: Vec<String>,

    /// Restrict the run to one dataservice
    #[arg(long = "dataservice-name")]
    dataservice_name: Option<String>,

    /// Carry on past fatal validation findings
    #[arg(short, long)]
    force: bool,

    /// Never ask questions; fail where input would be needed
    #[arg(long)]
    no_prompts: bool,

    /// Skip the validation phases entirely
    #[arg(long)]
    no_validation: bool,

    /// Stop after validation without deploying
    #[arg(long)]
    no_deployment: bool,

    /// Do not run the named validation check (repeatable)
    #[arg(long = "skip-validation-check", value_name = "CHECK")]
    skip_validation_check: Vec<String>,

    /// Run the named check even where configuration skips it (repeatable)
    #[arg(long = "enable-validation-check", value_name = "CHECK")]
    enable_validation_check: Vec<String>,

    /// Set a property before the run starts (repeatable)
    #[arg(short = 'p', long = "property", value_name = "KEY=VALUE")]
    property: Vec<String>,

    /// Merge a TOML file of answers into the configuration first
    #[arg(long, value_name = "FILE")]
    seed: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full cycle: validate, deploy, and commit the cluster
    Deploy {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Check the coordinator and target hosts before anything is staged
    Prevalidate {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Stage each host's configuration in its staging area
    Prepare {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Run the validation checks against staged configuration
    Validate {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Verify deployed artifacts are complete and consistent
    ValidateCommit {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Activate the most recently deployed release
    Commit {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Remove staging areas left behind on the hosts
    Cleanup {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Print the effective configuration after derivation and defaults
    Dump {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Serve one remote command request from stdin (used over SSH)
    #[command(hide = true)]
    Exec {
        /// Expected class of the incoming request
        #[arg(long = "command-class", value_name = "CLASS")]
        command_class: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy { run } => {
            cmd_run(EntryPoint::Deploy, run, cli.config, cli.json, cli.verbose, cli.log)
        }
        Commands::Prevalidate { run } => {
            cmd_run(EntryPoint::Prevalidate, run, cli.config, cli.json, cli.verbose, cli.log)
        }
        Commands::Prepare { run } => {
            cmd_run(EntryPoint::Prepare, run, cli.config, cli.json, cli.verbose, cli.log)
        }
        Commands::Validate { run } => {
            cmd_run(EntryPoint::Validate, run, cli.config, cli.json, cli.verbose, cli.log)
        }
        Commands::ValidateCommit { run } => {
            cmd_run(EntryPoint::ValidateCommit, run, cli.config, cli.json, cli.verbose, cli.log)
        }
        Commands::Commit { run } => {
            cmd_run(EntryPoint::Commit, run, cli.config, cli.json, cli.verbose, cli.log)
        }
        Commands::Cleanup { run } => {
            cmd_run(EntryPoint::Cleanup, run, cli.config, cli.json, cli.verbose, cli.log)
        }
        Commands::Dump { run } => cmd_dump(run, cli.config),
        Commands::Exec { command_class } => cmd_exec(&command_class),
    }
}

fn cmd_run(
    entry: EntryPoint,
    args: RunArgs,
    store_path: PathBuf,
    json: bool,
    verbose: u8,
    log: Option<PathBuf>,
) -> Result<()> {
    let output = OutputSink::new(json, verbose, log.as_deref())?;
    let tool = load_tool_config(&output)?;
    let store = ConfigStore::load(&store_path)?;
    let options = run_options(args)?;
    let mut ctx = RunContext::new(tool, store, store_path, options, output);

    let interrupted = ctx.interrupt_flag();
    ctrlc::set_handler(move || {
        interrupted.store(true, Ordering::SeqCst);
    })?;

    let mut console = StdinConsole;
    match orchestrator::run(&mut ctx, entry, &mut console) {
        Ok(summary) => {
            if !summary.success {
                std::process::exit(1);
            }
            Ok(())
        }
        // The sink has already reported the failure
        Err(_) => std::process::exit(1),
    }
}

fn cmd_dump(args: RunArgs, store_path: PathBuf) -> Result<()> {
    let output = OutputSink::silent();
    let tool = load_tool_config(&output)?;
    let store = ConfigStore::load(&store_path)?;
    let options = run_options(args)?;
    let mut ctx = RunContext::new(tool, store, store_path, options, output);

    let rendered = orchestrator::dump(&mut ctx)?;
    print!("{rendered}");
    if !rendered.ends_with('\n') {
        println!();
    }
    Ok(())
}

/// Remote side of one SSH exchange: read a request, write an envelope
///
/// Failures the protocol can express never exit nonzero; the transport
/// treats a nonzero exit as the SSH layer itself breaking.
fn cmd_exec(command_class: &str) -> Result<()> {
    let host = probes::local_hostname().unwrap_or_else(|| "localhost".to_string());

    let stdin = io::stdin();
    let mut line = String::new();
    stdin.lock().read_line(&mut line)?;

    let request: CommandRequest = match serde_json::from_str(line.trim()) {
        Ok(request) => request,
        Err(e) => {
            return reply(&ResponseEnvelope::failed(
                host.as_str(),
                RemoteFault::Unsupported {
                    message: format!("malformed request: {e}"),
                },
            ));
        }
    };

    if request.class_name() != command_class {
        return reply(&ResponseEnvelope::failed(
            host.as_str(),
            RemoteFault::Unsupported {
                message: format!(
                    "request class '{}' does not match --command-class={command_class}",
                    request.class_name()
                ),
            },
        ));
    }

    if let CommandRequest::Listen { ports } = &request {
        // Holds the process open until the coordinator sends the stop word
        dispatch::run_listen(&host, ports, stdin.lock(), io::stdout().lock())?;
        return Ok(());
    }

    reply(&dispatch::handle_request(&host, &request))
}

fn reply(envelope: &ResponseEnvelope) -> Result<()> {
    println!("{}", envelope.encode()?);
    Ok(())
}

/// Tool settings from ./drover.toml if present, else the XDG fallbacks
fn load_tool_config(output: &OutputSink) -> Result<ToolConfig> {
    let cwd = std::env::current_dir()?;
    let local = cwd.join("drover.toml");
    if !local.is_file() {
        return Ok(ToolConfig::load_or_default(&cwd));
    }

    let (tool, warnings) = ToolConfig::load_with_warnings(&local)?;
    for warning in &warnings {
        output.warn(&describe_warning(warning));
    }
    Ok(tool.with_env_overrides())
}

fn describe_warning(warning: &ConfigWarning) -> String {
    let location = match warning.line {
        Some(line) => format!("{}:{line}", warning.file.display()),
        None => warning.file.display().to_string(),
    };
    match &warning.suggestion {
        Some(other) => format!(
            "unknown setting '{}' in {location} (did you mean '{other}'?)",
            warning.key
        ),
        None => format!("unknown setting '{}' in {location}", warning.key),
    }
}

fn run_options(args: RunArgs) -> Result<RunOptions> {
    let mut properties = Vec::with_capacity(args.property.len());
    for raw in &args.property {
        let Some((key, value)) = raw.split_once('=') else {
            bail!("--property '{raw}' is not of the form KEY=VALUE");
        };
        properties.push((key.trim().to_string(), value.trim().to_string()));
    }

    Ok(RunOptions {
        hosts: args.hosts,
        dataservice: args.dataservice_name,
        force: args.force,
        interactive: !args.no_prompts,
        validation: !args.no_validation,
        deployment: !args.no_deployment,
        skip_checks: args.skip_validation_check,
        enable_checks: args.enable_validation_check,
        properties,
        seed: args.seed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_deploy() {
        let cli = Cli::try_parse_from(["drover", "deploy"]).unwrap();
        assert!(matches!(cli.command, Commands::Deploy { .. }));
    }

    #[test]
    fn test_cli_parse_deploy_with_args() {
        let cli = Cli::try_parse_from([
            "drover",
            "--json",
            "deploy",
            "--hosts",
            "db1,db2",
            "--force",
            "--no-prompts",
            "--property",
            "dataservices.east.master=db1",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Deploy { run } => {
                assert_eq!(run.hosts, vec!["db1", "db2"]);
                assert!(run.force);
                assert!(run.no_prompts);
                assert_eq!(run.property, vec!["dataservices.east.master=db1"]);
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_validate_commit() {
        let cli =
            Cli::try_parse_from(["drover", "validate-commit", "--dataservice-name", "east"])
                .unwrap();
        match cli.command {
            Commands::ValidateCommit { run } => {
                assert_eq!(run.dataservice_name.as_deref(), Some("east"));
            }
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn test_cli_parse_exec_class() {
        let cli = Cli::try_parse_from(["drover", "exec", "--command-class=Ping"]).unwrap();
        match cli.command {
            Commands::Exec { command_class } => assert_eq!(command_class, "Ping"),
            other => panic!("parsed as {other:?}"),
        }
    }

    #[test]
    fn test_cli_default_config_path() {
        let cli = Cli::try_parse_from(["drover", "dump"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("drover.cfg"));
    }

    #[test]
    fn test_run_options_parses_properties() {
        let args = RunArgs {
            property: vec![
                "hosts.db1.address=10.0.0.1".to_string(),
                "a=b=c".to_string(),
            ],
            ..RunArgs::default()
        };
        let options = run_options(args).unwrap();
        assert_eq!(
            options.properties,
            vec![
                ("hosts.db1.address".to_string(), "10.0.0.1".to_string()),
                ("a".to_string(), "b=c".to_string()),
            ]
        );
        assert!(options.interactive);
        assert!(options.validation);
        assert!(options.deployment);
    }

    #[test]
    fn test_run_options_rejects_malformed_property() {
        let args = RunArgs {
            property: vec!["no-equals-sign".to_string()],
            ..RunArgs::default()
        };
        let err = run_options(args).unwrap_err();
        assert!(err.to_string().contains("KEY=VALUE"));
    }

    #[test]
    fn test_describe_warning_includes_suggestion() {
        let warning = ConfigWarning {
            key: "ssh.programm".to_string(),
            file: PathBuf::from("drover.toml"),
            line: Some(4),
            suggestion: Some("ssh.program".to_string()),
        };
        let text = describe_warning(&warning);
        assert!(text.contains("drover.toml:4"));
        assert!(text.contains("did you mean 'ssh.program'"));
    }
}
