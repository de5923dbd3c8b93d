use std::env;
use std::fs;
use std::process::Command;

use serde_json::Value;

fn swarmwalk() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_swarmwalk"));
    cmd.env("RUST_LOG", "off");
    cmd
}

#[test]
fn writes_report_for_seeded_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dir.path().join("report.json");
    let status = swarmwalk()
        .args(["--count", "3", "--seed", "7", "--obstacles", "4", "--output"])
        .arg(&output)
        .status()
        .expect("failed to run swarmwalk binary");
    assert!(status.success(), "swarmwalk run failed");

    let report: Value =
        serde_json::from_str(&fs::read_to_string(&output).expect("report")).expect("json");
    let agents = report["agents"].as_array().expect("agents array");
    assert_eq!(agents.len(), 4);
    assert_eq!(report["obstacles"], 4);
    assert_eq!(report["unresolved_edges"], 0);
    for agent in agents {
        assert!(agent["keys"].as_u64().expect("keys") > 0);
        assert!(agent["track"].is_object());
    }
}

#[test]
fn config_file_is_honoured() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("swarm.json");
    fs::write(
        &config,
        r#"{ "count": 2, "rng_seed": 5, "animate_template": false, "walk": { "total_frames": 120 } }"#,
    )
    .expect("write config");

    let output = swarmwalk()
        .arg("--config")
        .arg(&config)
        .args(["--obstacles", "0"])
        .output()
        .expect("failed to run swarmwalk binary");
    assert!(output.status.success(), "swarmwalk run failed");

    let report: Value = serde_json::from_slice(&output.stdout).expect("json on stdout");
    let agents = report["agents"].as_array().expect("agents array");
    assert_eq!(agents.len(), 2);
    assert!(agents.iter().all(|agent| agent["template"] == false));
    // frames 1, 21, ..., 101: six keys on each of six channels
    assert!(agents.iter().all(|agent| agent["keys"] == 36));
}

#[test]
fn unreadable_config_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let status = swarmwalk()
        .arg("--config")
        .arg(dir.path().join("missing.json"))
        .status()
        .expect("failed to run swarmwalk binary");
    assert!(!status.success());
}
