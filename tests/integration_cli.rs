/// CLI integration tests for severity-predict.
///
/// These tests invoke the compiled binary end-to-end against the model
/// cards in tests/fixtures/. They verify the full flow:
/// source → form → align → predict → present.
mod common;

use std::io::Write;
use std::process::{Command, Output, Stdio};

use common::{Route, fixture, serve};

fn bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_severity-predict"));
    cmd.env_remove("MLFLOW_TRACKING_URI")
        .env_remove("SEVERITY_MODEL_URL")
        .env_remove("RUST_LOG");
    cmd
}

fn run_with_stdin(mut cmd: Command, stdin: &[u8]) -> Output {
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn severity-predict binary");
    child
        .stdin
        .take()
        .expect("stdin piped")
        .write_all(stdin)
        .expect("write stdin");
    child.wait_with_output().expect("wait for binary")
}

#[test]
fn predict_basic_form_prints_label_and_score() {
    let output = bin()
        .args(["predict", "--form", "basic", "--model"])
        .arg(fixture("basic_pipeline.json"))
        .output()
        .expect("failed to spawn severity-predict binary");

    assert!(output.status.success(), "predict command failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Prediction: High"), "got: {stdout}");
    assert!(stdout.contains("Confidence score: 66.82%"), "got: {stdout}");
}

#[test]
fn predict_json_output_with_field_flags() {
    let output = bin()
        .args([
            "predict",
            "--form",
            "regional",
            "--field",
            "genetic-risk=0.9",
            "--field",
            "Smoking=90",
            "--field",
            "Survival_Years=1",
            "--field",
            "Cancer_Stage=Stage IV",
            "--format",
            "json",
            "--model",
        ])
        .arg(fixture("regional_logreg.json"))
        .output()
        .expect("failed to spawn severity-predict binary");

    assert!(output.status.success(), "predict command failed");
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is one JSON object");
    assert_eq!(value["label"], "High");
    assert!(value["score"].as_f64().unwrap() > 0.9);
    assert!(value["model"].as_str().unwrap().starts_with("file:"));
}

#[test]
fn predict_answers_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let answers = tmp.path().join("patient.json");
    std::fs::write(&answers, r#"{"Cancer_Stage": "Stage III", "Cancer_Type": "Colon"}"#).unwrap();

    let output = bin()
        .args(["predict", "--form", "clinical", "--answers"])
        .arg(&answers)
        .arg("--model")
        .arg(fixture("clinical_tree.json"))
        .output()
        .expect("failed to spawn severity-predict binary");

    assert!(output.status.success(), "predict command failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Prediction: High"), "got: {stdout}");
    assert!(stdout.contains("Confidence score: 75.00%"), "got: {stdout}");
}

#[test]
fn invalid_field_is_reported_and_exits_nonzero() {
    let output = bin()
        .args(["predict", "--form", "basic", "--field", "Age=140", "--model"])
        .arg(fixture("basic_pipeline.json"))
        .output()
        .expect("failed to spawn severity-predict binary");

    assert!(!output.status.success(), "expected non-zero exit");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Error: "), "got: {stdout}");
    assert!(stdout.contains("Age"), "got: {stdout}");
}

#[test]
fn missing_source_exits_nonzero() {
    let output = bin()
        .args(["predict", "--form", "basic"])
        .output()
        .expect("failed to spawn severity-predict binary");
    assert!(!output.status.success(), "expected non-zero exit when no source provided");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Error: no model source provided"), "got: {stdout}");
}

#[test]
fn load_failure_is_rendered_as_json() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let output = bin()
        .args(["predict", "--form", "basic", "--format", "json", "--model"])
        .arg(tmp.path().join("nope.json"))
        .output()
        .expect("failed to spawn severity-predict binary");

    assert_eq!(output.status.code(), Some(1));
    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is one JSON object");
    assert!(
        value["error"]
            .as_str()
            .unwrap()
            .contains("failed to read model file"),
        "got: {value}"
    );
}

#[test]
fn bad_answers_file_is_rendered() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let answers = tmp.path().join("answers.json");
    std::fs::write(&answers, "[1, 2]").unwrap();
    let output = bin()
        .args(["predict", "--form", "basic", "--answers"])
        .arg(&answers)
        .arg("--model")
        .arg(fixture("basic_pipeline.json"))
        .output()
        .expect("failed to spawn severity-predict binary");

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Error: "), "got: {stdout}");
    assert!(stdout.contains("must hold a JSON object"), "got: {stdout}");
}

#[test]
fn upload_reads_model_from_stdin() {
    let card = std::fs::read(fixture("basic_pipeline.json")).unwrap();
    let mut cmd = bin();
    cmd.args(["predict", "--form", "basic", "--upload"]);
    let output = run_with_stdin(cmd, &card);

    assert!(output.status.success(), "upload predict failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Prediction: High"), "got: {stdout}");
}

#[test]
fn session_keeps_going_after_a_failed_submission() {
    let mut cmd = bin();
    cmd.args(["session", "--form", "basic", "--model"])
        .arg(fixture("basic_pipeline.json"));
    // first form: valid; second form: age out of range
    let output = run_with_stdin(cmd, b"80\nFemale\nLung\nYes\n200\n\n\n\n");

    assert!(output.status.success(), "session should end cleanly at EOF");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert!(lines.iter().any(|l| l.starts_with("Prediction: High")), "got: {stdout}");
    assert!(lines.iter().any(|l| l.starts_with("Error: ")), "got: {stdout}");
}

#[test]
fn inspect_lists_expected_columns() {
    let output = bin()
        .args(["inspect", "--model"])
        .arg(fixture("regional_logreg.json"))
        .output()
        .expect("failed to spawn severity-predict binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Kind:     logistic_regression"));
    assert!(stdout.contains("Columns:  5"));
    assert!(stdout.contains("  Cancer_Stage_Stage IV"));
}

#[test]
fn schema_prints_every_field() {
    let output = bin()
        .args(["schema", "--form", "clinical"])
        .output()
        .expect("failed to spawn severity-predict binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for field in ["Genetic_Risk", "Treatment_Cost_USD", "Cancer_Stage", "Cancer_Type"] {
        assert!(stdout.contains(field), "missing {field} in: {stdout}");
    }
}

const EXPERIMENTS: &str = r#"{"experiments": [
    {"experiment_id": "0", "name": "Default"},
    {"experiment_id": "7", "name": "severity"}
]}"#;

#[test]
fn experiments_lists_ids_and_names() {
    let server = serve(vec![Route::new(
        "POST",
        "/api/2.0/mlflow/experiments/search",
        200,
        EXPERIMENTS,
    )]);
    let output = bin()
        .args(["experiments", "--mlflow-uri", &server.url])
        .output()
        .expect("failed to spawn severity-predict binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2, "got: {stdout}");
    assert!(lines[0].starts_with('0') && lines[0].ends_with("Default"));
    assert!(lines[1].starts_with('7') && lines[1].ends_with("severity"));
}

#[test]
fn runs_lists_most_recent_first() {
    let runs = r#"{"runs": [
        {"info": {"run_id": "run-old", "start_time": 1000, "status": "FINISHED"}},
        {"info": {"run_id": "run-new", "start_time": 2000, "status": "RUNNING", "run_name": "nightly"}}
    ]}"#;
    let server = serve(vec![
        Route::new("POST", "/api/2.0/mlflow/experiments/search", 200, EXPERIMENTS),
        Route::new("POST", "/api/2.0/mlflow/runs/search", 200, runs),
    ]);
    let output = bin()
        .args(["runs", "--experiment", "severity", "--mlflow-uri", &server.url])
        .output()
        .expect("failed to spawn severity-predict binary");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2, "got: {stdout}");
    assert!(lines[0].starts_with("run-new"), "got: {stdout}");
    assert!(lines[0].contains("RUNNING") && lines[0].ends_with("nightly"));
    assert!(lines[1].starts_with("run-old"), "got: {stdout}");
    assert!(
        server
            .requests()
            .iter()
            .any(|r| r.target.ends_with("/runs/search") && r.body.contains("\"7\""))
    );
}

#[test]
fn runs_for_unknown_experiment_fails() {
    let server = serve(vec![Route::new(
        "POST",
        "/api/2.0/mlflow/experiments/search",
        200,
        EXPERIMENTS,
    )]);
    let output = bin()
        .args(["runs", "--experiment", "survival", "--mlflow-uri", &server.url])
        .output()
        .expect("failed to spawn severity-predict binary");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("experiment `survival` not found"), "got: {stderr}");
}
