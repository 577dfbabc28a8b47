//! Full lifecycle runs against a loopback cluster.
//!
//! Every fixture host is this machine, so these tests exercise the real
//! coordinator, wire dispatch, and deployment modules end to end.

mod common;

use std::fs;

use common::env::{TestEnv, QUIET_CHECKS};
use serde_json::Value;

fn run_args(entry: &'static str) -> Vec<&'static str> {
    let mut args = vec![entry, "--no-prompts"];
    args.extend_from_slice(QUIET_CHECKS);
    args
}

#[test]
fn test_deploy_activates_a_release_on_every_host() {
    let env = TestEnv::builder().build();
    let result = env.run(&run_args("deploy"));
    assert!(result.success, "deploy failed:\n{}", result.combined_output());

    for host in ["db1", "db2"] {
        let release = env
            .current_release(host)
            .unwrap_or_else(|| panic!("no current marker on {host}"));
        assert!(
            release.starts_with("drover-"),
            "unexpected release name '{release}'"
        );

        let conf = env
            .host_home(host)
            .join("releases")
            .join(&release)
            .join("conf");
        assert!(conf.join("cluster.properties").exists());
        let fingerprint = fs::read_to_string(conf.join("fingerprint")).unwrap();
        assert!(fingerprint.trim().starts_with("sha256:"));
        assert!(env.history(host).contains("committed"));
    }
}

#[test]
fn test_deploy_renders_replicator_manifests() {
    let env = TestEnv::builder().build();
    let result = env.run(&run_args("deploy"));
    assert!(result.success, "{}", result.combined_output());

    let manifest = |host: &str| -> Value {
        let release = env.current_release(host).expect("release committed");
        let path = env
            .host_home(host)
            .join("releases")
            .join(release)
            .join("conf")
            .join("services")
            .join(format!("replicator-east_{host}.json"));
        let raw = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("{}: {e}", path.display()));
        serde_json::from_str(&raw).expect("manifest is JSON")
    };

    let master = manifest("db1");
    assert_eq!(master["kind"], "replicator");
    assert_eq!(master["dataservice"], "east");
    assert_eq!(master["role"], "master");
    assert_eq!(master["enabled"], true);
    assert!(master.get("master_thl_uri").is_none());

    let slave = manifest("db2");
    assert_eq!(slave["role"], "slave");
    assert_eq!(slave["master_thl_uri"], "thl://127.0.0.1:2112/");
    assert_eq!(slave["listen_port"], "2112");
}

#[test]
fn test_deploy_leaves_no_staging_behind() {
    let env = TestEnv::builder().build();
    let result = env.run(&run_args("deploy"));
    assert!(result.success, "{}", result.combined_output());

    for host in ["db1", "db2"] {
        assert_eq!(
            env.staging_dirs(host),
            Vec::<String>::new(),
            "staging survived on {host}"
        );
    }
}

#[test]
fn test_deploy_twice_reuses_the_release_name() {
    let env = TestEnv::builder().build();
    let first = env.run(&run_args("deploy"));
    assert!(first.success, "{}", first.combined_output());
    let release = env.current_release("db1").unwrap();

    // Same configuration hashes to the same release; the second run
    // re-stages and re-activates it in place
    let second = env.run(&run_args("deploy"));
    assert!(second.success, "{}", second.combined_output());
    assert_eq!(env.current_release("db1").unwrap(), release);
    assert_eq!(env.history("db1").matches("committed").count(), 2);
}

#[test]
fn test_validate_run_leaves_staging_for_inspection() {
    let env = TestEnv::builder().build();
    let result = env.run(&run_args("validate"));
    assert!(result.success, "{}", result.combined_output());
    assert_eq!(env.current_release("db1"), None);
    // validate stops before cleanup so the staged tree stays inspectable
    assert!(!env.staging_dirs("db1").is_empty());

    let cleanup = env.run(&["cleanup"]);
    assert!(cleanup.success, "{}", cleanup.combined_output());
    assert!(env.staging_dirs("db1").is_empty());
    assert!(env.staging_dirs("db2").is_empty());
}

#[test]
fn test_no_deployment_turns_deploy_into_a_dry_run() {
    let env = TestEnv::builder().build();
    let mut args = run_args("deploy");
    args.push("--no-deployment");
    let result = env.run(&args);
    assert!(result.success, "{}", result.combined_output());
    assert_eq!(env.current_release("db1"), None);
    assert_eq!(env.current_release("db2"), None);
}

#[test]
fn test_commit_before_deploy_fails() {
    let env = TestEnv::builder().build();
    let result = env.run(&run_args("commit"));
    assert!(!result.success, "commit of nothing must fail");
    assert_eq!(env.current_release("db1"), None);
}
