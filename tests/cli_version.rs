//! Version reporting.

mod common;

use common::env::TestEnv;

#[test]
fn test_version_matches_the_package() {
    let env = TestEnv::builder().build();
    let result = env.run(&["--version"]);
    assert!(result.success, "{}", result.combined_output());
    assert!(
        result.stdout.contains(env!("CARGO_PKG_VERSION")),
        "unexpected version output: {}",
        result.stdout
    );
}

#[test]
fn test_version_names_the_tool() {
    let env = TestEnv::builder().build();
    let result = env.run(&["--version"]);
    assert!(result.stdout.contains("drover"));
}
