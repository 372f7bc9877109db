//! Exit behaviour of the `podtrain` binary when a launch cannot start.
//!
//! Every case fails before any provider call, so no network is needed.

use std::{
    path::Path,
    process::{Command, Output},
};

use tempfile::tempdir;

fn train(dir: &Path, config: &str, key: Option<&str>) -> Output {
    let path = dir.join("launch.toml");
    std::fs::write(&path, config).unwrap();

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_podtrain"));
    cmd.arg("train")
        .arg(&path)
        .env_remove("RUNPOD_DEBUG")
        .env_remove("PODTRAIN_CLI_KEY");
    if let Some(key) = key {
        cmd.env("PODTRAIN_CLI_KEY", key);
    }
    cmd.output().unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_missing_provider_block_is_reported_readably() {
    let dir = tempdir().unwrap();
    let output = train(dir.path(), "base_model = \"llama\"\n", Some("key"));

    assert!(!output.status.success());
    let stderr = stderr(&output);
    assert!(
        stderr.contains("Error: no [runpod] block found in config file"),
        "{stderr}"
    );
    assert!(!stderr.contains("MissingProviderBlock"), "{stderr}");
}

#[test]
fn test_missing_credential_is_reported_readably() {
    let dir = tempdir().unwrap();
    let output = train(
        dir.path(),
        "[runpod]\napi_key_env = \"PODTRAIN_CLI_KEY\"\n",
        None,
    );

    assert!(!output.status.success());
    let stderr = stderr(&output);
    assert!(
        stderr.contains("Error: no PODTRAIN_CLI_KEY environment variable found"),
        "{stderr}"
    );
}

#[test]
fn test_invalid_ceiling_names_the_failure() {
    let dir = tempdir().unwrap();
    let output = train(
        dir.path(),
        "[runpod]\napi_key_env = \"PODTRAIN_CLI_KEY\"\nmax_bid_per_gpu = 0.0\n\
         api_url = \"http://127.0.0.1:9/graphql\"\n",
        Some("key"),
    );

    assert!(!output.status.success());
    let stderr = stderr(&output);
    assert!(
        stderr.contains("Error: bidding failed: invalid bid ceiling 0: must be a positive price"),
        "{stderr}"
    );
    assert!(!stderr.contains("InvalidBidCeiling"), "{stderr}");
}
