//! Command-line surface of the ensemble binary

use std::process::Command;

fn ensemble() -> Command {
    Command::new(env!("CARGO_BIN_EXE_ensemble"))
}

#[test]
fn test_help_command() {
    let output = ensemble()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Ask several LLMs at once"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("models"));
    assert!(stdout.contains("validate"));
    assert!(stdout.contains("--config"));
}

#[test]
fn test_run_help_lists_options() {
    let output = ensemble()
        .args(["run", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in ["--prompt", "--model", "--manual", "--summarizer", "--strategy", "--top-n", "--json"] {
        assert!(stdout.contains(flag), "missing {flag}");
    }
}

#[test]
fn test_version_command() {
    let output = ensemble()
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ensemble"));
    assert!(stdout.contains("0.1.0"));
}

#[test]
fn test_mock_run_prints_json_snapshot() {
    let dir = std::env::temp_dir().join(format!("ensemble-cli-{}", std::process::id()));
    let config = dir.join("config.toml");

    let output = ensemble()
        .args([
            "--config",
            config.to_str().unwrap(),
            "run",
            "--mode",
            "mock",
            "-p",
            "Why is the sky blue?",
            "-m",
            "openai:gpt-4o",
            "-m",
            "anthropic",
            "--json",
        ])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let snapshot: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(snapshot["responses"].as_array().unwrap().len(), 2);
    assert_eq!(snapshot["consensus_status"]["state"], "success");

    let _ = std::fs::remove_dir_all(dir);
}
