use std::io::Write;
use std::process::{Command, Stdio};

use serde_json::{Value, json};

fn run_worker(script: &str) -> Vec<Value> {
    let mut child = Command::new(env!("CARGO_BIN_EXE_stdio_worker"))
        .args(["--language", "python", "--log-level", "off"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(script.as_bytes())
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn answers_each_request_in_order() {
    let script = concat!(
        "not json\n",
        "\n",
        "{\"type\":\"input_response\",\"input\":\"ignored\"}\n",
        "{\"type\":\"execute\",\"code\":\"print(int(input()) * 2)\",\"input\":\"21\\n\"}\n",
    );
    let replies = run_worker(script);
    assert_eq!(
        replies,
        vec![
            json!({"status": "error", "output": "", "error": "Invalid JSON format"}),
            json!({"status": "success", "output": "42\n", "error": null}),
        ]
    );
}

#[test]
fn python_faults_carry_the_exception() {
    let replies = run_worker("{\"code\":\"1/0\"}\n");
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0]["status"], "error");
    assert_eq!(replies[0]["output"], "");
    let error = replies[0]["error"].as_str().unwrap();
    assert!(error.starts_with("ZeroDivisionError: "), "{error}");
}
