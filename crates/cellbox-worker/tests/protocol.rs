//! End-to-end tests for the worker's stdin/stdout protocol.

#![allow(deprecated)] // Command::cargo_bin

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

fn events(stdin: &str) -> Vec<Value> {
    let output = Command::cargo_bin("cellbox-worker")
        .expect("Failed to find cellbox-worker binary")
        .write_stdin(stdin)
        .output()
        .expect("Failed to execute worker");
    assert!(
        output.status.success(),
        "worker should exit cleanly. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("stdout line is not JSON"))
        .collect()
}

fn of_type<'a>(events: &'a [Value], kind: &str) -> Vec<&'a Value> {
    events.iter().filter(|event| event["type"] == kind).collect()
}

#[test]
fn test_init_then_run() {
    let stdin = concat!(
        r#"{"type":"init"}"#,
        "\n",
        r#"{"type":"run","unit_id":"c1","code":"print('hi')\n1 + 1"}"#,
        "\n",
    );
    let events = events(stdin);
    assert_eq!(events[0]["type"], "ready");

    let outputs = of_type(&events, "output");
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0]["unit_id"], "c1");
    assert_eq!(outputs[0]["text"], "hi\n");

    let results = of_type(&events, "result");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["unit_id"], "c1");
    assert_eq!(results[0]["outcome"]["value"], "2");
}

#[test]
fn test_run_before_init_fails() {
    let events = events(concat!(r#"{"type":"run","unit_id":"a","code":"1"}"#, "\n"));
    let results = of_type(&events, "result");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["outcome"]["ename"], "RuntimeError");
}

#[test]
fn test_analysis_requests() {
    let stdin = concat!(
        r#"{"type":"init"}"#,
        "\n",
        r#"{"type":"analyze","unit_id":"a","code":"y = x + 1"}"#,
        "\n",
        r#"{"type":"lint","unit_id":"a","code":"def f(:","extract_defs":false}"#,
        "\n",
        r#"{"type":"shutdown"}"#,
        "\n",
    );
    let events = events(stdin);

    let analyzed = of_type(&events, "analyze_result");
    assert_eq!(analyzed.len(), 1);
    assert_eq!(analyzed[0]["definitions"], serde_json::json!(["y"]));
    assert_eq!(analyzed[0]["references"], serde_json::json!(["x"]));

    let linted = of_type(&events, "lint_result");
    assert_eq!(linted.len(), 1);
    assert_eq!(linted[0]["diagnostics"][0]["code"], "E999");
}

#[test]
fn test_malformed_line_is_skipped() {
    Command::cargo_bin("cellbox-worker")
        .expect("Failed to find cellbox-worker binary")
        .write_stdin("not json\n{\"type\":\"init\"}\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"type":"ready"}"#))
        .stderr(predicate::str::contains("malformed"));
}

#[test]
fn test_startup_failure_reported_once() {
    let output = Command::cargo_bin("cellbox-worker")
        .expect("Failed to find cellbox-worker binary")
        .env("CELLBOX_STARTUP", "raise ValueError('bad startup')")
        .write_stdin("{\"type\":\"init\"}\n{\"type\":\"init\"}\n")
        .output()
        .expect("Failed to execute worker");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.matches("fatal_error").count(), 1, "stdout: {stdout}");
    assert!(!stdout.contains(r#""type":"ready""#));
}

#[test]
fn test_runaway_recursion_fails_the_unit() {
    let stdin = concat!(
        r#"{"type":"init"}"#,
        "\n",
        r#"{"type":"run","unit_id":"deep","code":"def f(n):\n    return f(n + 1)\nf(0)"}"#,
        "\n",
        r#"{"type":"run","unit_id":"after","code":"2 * 3"}"#,
        "\n",
    );
    let events = events(stdin);
    let results = of_type(&events, "result");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["unit_id"], "deep");
    assert_eq!(results[0]["outcome"]["ename"], "RecursionError");
    assert_eq!(results[1]["outcome"]["value"], "6");
}
