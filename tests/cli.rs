mod backend_stub;

use backend_stub::{BackendStub, StubRequest, StubResponse};
use predicates::prelude::*;

fn tubeflow(state: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("tubeflow");
    cmd.env_remove("TUBEFLOW_BACKEND_URL")
        .env("TUBEFLOW_STATE_DIR", state.path());
    cmd
}

fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
}

#[test]
fn results_on_fresh_state_reports_nothing_generated() -> anyhow::Result<()> {
    let state = tempfile::TempDir::new()?;
    tubeflow(&state)
        .args(["results"])
        .assert()
        .success()
        .stdout("nothing generated yet\n");
    tubeflow(&state)
        .args(["results", "titles"])
        .assert()
        .success()
        .stdout("nothing generated yet for titles\n");
    Ok(())
}

#[test]
fn empty_channel_is_rejected_before_contacting_backend() -> anyhow::Result<()> {
    let state = tempfile::TempDir::new()?;
    let backend = format!("http://127.0.0.1:{}", unused_port());
    tubeflow(&state)
        .args(["run", "--channel", "  ", "--backend-url", &backend])
        .assert()
        .failure()
        .stderr(predicate::str::contains("channel URL or id is required"));
    Ok(())
}

#[test]
fn control_against_unreachable_backend_fails_with_guidance() -> anyhow::Result<()> {
    let state = tempfile::TempDir::new()?;
    let backend = format!("http://127.0.0.1:{}", unused_port());
    tubeflow(&state)
        .args(["control", "pause", "--backend-url", &backend])
        .assert()
        .failure()
        .stderr(predicate::str::contains("check that the backend is running"))
        .stderr(predicate::str::contains("network error"));
    Ok(())
}

#[test]
fn control_prints_acknowledgement() -> anyhow::Result<()> {
    let stub = BackendStub::spawn(|req: &StubRequest| match req.path.as_str() {
        "/api/workflow/resume" => StubResponse::ok(serde_json::json!({"success": true})),
        _ => StubResponse::raw(404, "not found"),
    });
    let state = tempfile::TempDir::new()?;
    tubeflow(&state)
        .args(["control", "resume", "--backend-url", &stub.base_url])
        .assert()
        .success()
        .stdout("resume acknowledged\n");
    assert_eq!(stub.paths(), vec!["/api/workflow/resume"]);
    Ok(())
}

#[test]
fn keys_are_stored_locally_and_shown_masked() -> anyhow::Result<()> {
    let state = tempfile::TempDir::new()?;
    tubeflow(&state)
        .args(["keys", "set", "rapidapi=rk-0123456789", "gemini=short"])
        .assert()
        .success()
        .stdout("stored 2 api key(s)\n");
    tubeflow(&state)
        .args(["keys", "show"])
        .assert()
        .success()
        .stdout("gemini: *****\nrapidapi: rk-0…6789\n");

    let stored: serde_json::Value =
        serde_json::from_slice(&std::fs::read(state.path().join("api_keys.json"))?)?;
    assert_eq!(stored["rapidapi"], "rk-0123456789");
    Ok(())
}

#[test]
fn titles_stage_without_extraction_warns_instead_of_failing() -> anyhow::Result<()> {
    let stub = BackendStub::spawn(|_: &StubRequest| {
        StubResponse::ok(serde_json::json!({"success": true, "logs": []}))
    });
    let state = tempfile::TempDir::new()?;
    tubeflow(&state)
        .args([
            "stage",
            "titles",
            "--channel",
            "@nightstories",
            "--backend-url",
            &stub.base_url,
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("run extraction first"));
    assert!(
        !stub
            .paths()
            .iter()
            .any(|p| p.starts_with("/api/automations/generate-titles"))
    );
    Ok(())
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() -> anyhow::Result<()> {
    let state = tempfile::TempDir::new()?;
    tubeflow(&state)
        .env("RUST_LOG", "debug")
        .args(["results"])
        .assert()
        .success()
        .stderr(predicate::str::contains("parsed cli"));
    Ok(())
}
