use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_timetabled");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn timetabled");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value["error"]["code"].as_str().expect("error code")
}

#[test]
fn router_reports_health_and_guards_workspaceless_calls() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(resp["result"]["workspacePath"], json!(null));

    let resp = request(&mut stdin, &mut reader, "2", "nonsense.method", json!({}));
    assert_eq!(error_code(&resp), "not_implemented");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.importPreview",
        json!({ "classesPath": "/nope.xlsx", "teachersPath": "/nope.xlsx" }),
    );
    assert_eq!(error_code(&resp), "no_workspace");

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.importApply",
        json!({ "lessons": [] }),
    );
    assert_eq!(error_code(&resp), "no_workspace");

    // Listing endpoints degrade to empty collections instead of erroring.
    let resp = request(&mut stdin, &mut reader, "5", "classes.list", json!({}));
    assert_eq!(resp["result"]["classes"], json!([]));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn apply_rejects_malformed_mapping_payloads() {
    let workspace = std::env::temp_dir().join(format!(
        "timetabled-smoke-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&workspace).expect("create temp dir");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(true));

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.importApply",
        json!({
            "lessons": [],
            "classMappings": { "5А": 17 },
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "schedule.importApply",
        json!({
            "lessons": [],
            "roomMappings": { "201": { "action": "rename" } },
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.importApply",
        json!({ "lessons": "not-a-list" }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    drop(stdin);
    let _ = child.wait();
}
