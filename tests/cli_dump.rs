//! The dump command renders the resolved model without touching hosts.

mod common;

use common::env::TestEnv;

#[test]
fn test_dump_prints_the_merged_model() {
    let env = TestEnv::builder().build();
    let result = env.run(&["dump"]);
    assert!(result.success, "{}", result.combined_output());

    let stdout = &result.stdout;
    assert!(stdout.contains(r#"dataservices.east.members = ["db1","db2"]"#));
    // membership derivation runs for dump too
    assert!(stdout.contains(r#"repl_services.east_db1.host = "db1""#));
    assert!(stdout.contains(r#"repl_services.east_db2.dataservice = "east""#));

    let position = |prefix: &str| {
        stdout
            .lines()
            .position(|l| l.starts_with(prefix))
            .unwrap_or_else(|| panic!("no line starts with '{prefix}'"))
    };
    assert!(position("dataservices.") < position("hosts."));
    assert!(position("hosts.") < position("repl_services."));
}

#[test]
fn test_dump_sections_per_host_when_filtered() {
    let env = TestEnv::builder().build();
    let result = env.run(&["dump", "--hosts", "db1"]);
    assert!(result.success, "{}", result.combined_output());
    assert!(result.stdout.starts_with("# db1\n"), "{}", result.stdout);
    assert!(!result.stdout.contains("# db2"));
    assert!(result.stdout.contains("127.0.0.1"));
}

#[test]
fn test_dump_rejects_an_unknown_host() {
    let env = TestEnv::builder().build();
    let result = env.run(&["dump", "--hosts", "db9"]);
    assert!(!result.success);
}

#[test]
fn test_dump_applies_property_overrides() {
    let env = TestEnv::builder().build();
    let result = env.run(&["dump", "-p", "hosts.defaults.user=admin"]);
    assert!(result.success, "{}", result.combined_output());
    assert!(result.stdout.contains(r#"hosts.defaults.user = "admin""#));
}

#[test]
fn test_dump_rejects_a_malformed_property() {
    let env = TestEnv::builder().build();
    let result = env.run(&["dump", "-p", "no-equals"]);
    assert!(!result.success);
    assert!(result.stderr.contains("KEY=VALUE"), "{}", result.stderr);
}
