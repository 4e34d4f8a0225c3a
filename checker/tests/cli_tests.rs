// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.
//
// Runs the taint-oracle binary on the sample programs in tests/run-pass and tests/run-fail
// and checks its exit status and report.

use std::path::PathBuf;
use std::process::{Command, Output};
use std::str::FromStr;

use serde_json::Value;

fn test_directory(name: &str) -> PathBuf {
    let mut path = PathBuf::from_str("tests").unwrap().join(name);
    if !path.exists() {
        path = PathBuf::from_str("checker/tests").unwrap().join(name);
    }
    path
}

fn taint_oracle() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_taint-oracle"));
    command.env_remove("TAINT_ORACLE_FLAGS");
    command
}

fn run(command: &mut Command) -> (i32, String) {
    let Output { status, stdout, .. } = command.output().expect("failed to run taint-oracle");
    (
        status.code().expect("taint-oracle was killed"),
        String::from_utf8(stdout).unwrap(),
    )
}

#[test]
fn exit_status_follows_the_verdicts() {
    let (code, out) = run(taint_oracle().arg("--replay").arg(test_directory("run-pass")));
    assert_eq!(code, 0, "{out}");
    assert!(out.ends_with("ok: 2 passed, 0 failed, 0 errored, 0 discrepancies\n"), "{out}");

    let (code, out) = run(taint_oracle().arg("--replay").arg(test_directory("run-fail")));
    assert_eq!(code, 1, "{out}");
    assert!(out.ends_with("FAILED: 0 passed, 3 failed, 3 errored, 6 discrepancies\n"), "{out}");

    let (code, _) = run(taint_oracle().args(["--replay", "no/such/sample/dir"]));
    assert_eq!(code, 2);
    let (code, _) = run(taint_oracle().arg(test_directory("run-pass")));
    assert_eq!(code, 2);
}

#[test]
fn quiet_leaves_out_passing_files() {
    let (code, out) = run(taint_oracle()
        .args(["--replay", "--quiet"])
        .arg(test_directory("run-pass")));
    assert_eq!(code, 0);
    assert_eq!(out, "ok: 2 passed, 0 failed, 0 errored, 0 discrepancies\n");
}

#[test]
fn flags_from_the_environment_come_first() {
    let (code, out) = run(taint_oracle()
        .env("TAINT_ORACLE_FLAGS", "--replay --format json")
        .arg(test_directory("run-pass")));
    assert_eq!(code, 0, "{out}");
    let report: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(report["summary"]["passed"], 2);

    let (code, out) = run(taint_oracle()
        .env("TAINT_ORACLE_FLAGS", "--format json")
        .args(["--format", "text", "--replay"])
        .arg(test_directory("run-pass")));
    assert_eq!(code, 0);
    assert!(out.starts_with("PASS "), "{out}");
}

#[test]
fn json_report_lists_accepted_false_positives_with_their_ticket() {
    let (code, out) = run(taint_oracle()
        .args(["--replay", "--format", "json"])
        .arg(test_directory("run-pass").join("field_flow.swift")));
    assert_eq!(code, 0, "{out}");
    let report: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(report["grammar_version"], 1);
    let file = &report["files"][0];
    assert_eq!(file["status"], "pass");
    assert!(file["path"].as_str().unwrap().ends_with("field_flow.swift"));

    let group = file["groups"]
        .as_array()
        .unwrap()
        .iter()
        .find(|g| g["line"] == 31)
        .expect("no group for line 31");
    assert_eq!(group["key"]["kind"], "taint");
    assert_eq!(group["key"]["role"], "sink");
    let (expectation, status) = (&group["expectations"][0][0], &group["expectations"][0][1]);
    assert_eq!(expectation["false_positive"], true);
    assert_eq!(expectation["ticket"], "SWAN-43");
    assert_eq!(status["status"], "accepted-false-positive");
    assert_eq!(group["findings"][0][1], "accepted-false-positive");
}

#[test]
fn json_report_names_discrepancies_and_errors() {
    let (code, out) = run(taint_oracle()
        .args(["--replay", "--format", "json"])
        .arg(test_directory("run-fail")));
    assert_eq!(code, 1);
    let report: Value = serde_json::from_str(&out).unwrap();
    let file = |name: &str| {
        report["files"]
            .as_array()
            .unwrap()
            .iter()
            .find(|f| f["path"].as_str().unwrap().ends_with(name))
            .unwrap_or_else(|| panic!("no entry for {name}"))
            .clone()
    };

    let short_count = file("short_count.swift");
    assert_eq!(short_count["status"], "fail");
    let mismatch = &short_count["discrepancies"][0];
    assert_eq!(mismatch["discrepancy"], "count-mismatch");
    assert_eq!(mismatch["expected"], 4);
    assert_eq!(mismatch["actual"], 3);

    let unterminated = file("unterminated.swift");
    assert_eq!(unterminated["status"], "error");
    assert_eq!(unterminated["error"], "parse-error");
    assert_eq!(report["summary"]["errored"], 3);
}
