//! Unit tests for the echo plugin.

use std::io::Cursor;

use rstest::rstest;
use serde_json::{Value, json};
use warden_gateway::protocol::{HostMessage, IsolateMessage, PluginStatus, RequestPolicy};

use super::*;

fn invoke_line(payload: Value) -> String {
    let request = PluginRequest::new("run-1", "req-1", payload, RequestPolicy::new(1000));
    let mut line = serde_json::to_string(&HostMessage::Invoke { request }).expect("encode");
    line.push('\n');
    line
}

#[rstest]
#[case::text(json!({"text": "hi"}))]
#[case::nested(json!({"a": [1, 2, {"b": null}]}))]
#[case::scalar(json!(42))]
fn payload_comes_back_unchanged(#[case] payload: Value) {
    let mut reader = Cursor::new(invoke_line(payload.clone()));
    let mut output = Vec::new();

    run(&mut reader, &mut output).expect("serve");

    let text = String::from_utf8(output).expect("utf8");
    assert_eq!(text.matches('\n').count(), 1);
    let IsolateMessage::Result { response } = serde_json::from_str(text.trim()).expect("decode");
    assert_eq!(response.status(), PluginStatus::Ok);
    assert_eq!(response.result(), &payload);
}

#[test]
fn null_payload_is_a_handler_error() {
    let mut reader = Cursor::new(invoke_line(Value::Null));
    let mut output = Vec::new();

    let error = run(&mut reader, &mut output).expect_err("null payload");
    assert!(matches!(error, WorkerError::Handler { .. }));
    assert!(output.is_empty());
}

#[test]
fn empty_stdin_is_reported() {
    let mut reader = Cursor::new(String::new());
    let mut output = Vec::new();

    let error = run(&mut reader, &mut output).expect_err("no request");
    assert!(matches!(error, WorkerError::NoRequest));
}

#[test]
fn garbage_input_is_malformed() {
    let mut reader = Cursor::new("{\"type\":\"result\"}\n");
    let mut output = Vec::new();

    let error = run(&mut reader, &mut output).expect_err("wrong message");
    assert!(matches!(error, WorkerError::Malformed { .. }));
}
