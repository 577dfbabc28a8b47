//! Help output covers the public surface and nothing else.

mod common;

use common::env::TestEnv;

#[test]
fn test_help_lists_every_run_subcommand() {
    let env = TestEnv::builder().build();
    let result = env.run(&["--help"]);
    assert!(result.success, "{}", result.combined_output());

    for subcommand in [
        "deploy",
        "prevalidate",
        "prepare",
        "validate",
        "validate-commit",
        "commit",
        "cleanup",
        "dump",
    ] {
        assert!(
            result.stdout.contains(subcommand),
            "missing '{subcommand}' in:\n{}",
            result.stdout
        );
    }
}

#[test]
fn test_help_hides_the_exec_subcommand() {
    // exec is the remote half of the wire protocol, not a user command
    let env = TestEnv::builder().build();
    let result = env.run(&["--help"]);
    assert!(result.success);
    assert!(
        !result
            .stdout
            .lines()
            .any(|line| line.trim_start().starts_with("exec")),
        "exec leaked into help:\n{}",
        result.stdout
    );
}

#[test]
fn test_deploy_help_shows_selection_and_override_flags() {
    let env = TestEnv::builder().build();
    let result = env.run(&["deploy", "--help"]);
    assert!(result.success, "{}", result.combined_output());

    for flag in [
        "--hosts",
        "--dataservice-name",
        "--force",
        "--no-prompts",
        "--skip-validation-check",
        "--property",
    ] {
        assert!(
            result.stdout.contains(flag),
            "missing '{flag}' in:\n{}",
            result.stdout
        );
    }
}

#[test]
fn test_unknown_subcommand_is_rejected() {
    let env = TestEnv::builder().build();
    let result = env.run(&["stampede"]);
    assert!(!result.success);
}
