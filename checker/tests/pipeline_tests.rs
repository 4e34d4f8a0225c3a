// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.
//
// Exercises the stages of the pipeline one at a time: extraction, interpretation,
// normalization, the analyzer adapters and option parsing.

use std::path::Path;
use std::time::Duration;

use taint_oracle::analyzer::{
    stderr_excerpt, AnalysisRequest, Analyzer, CommandAnalyzer, ReplayAnalyzer,
};
use taint_oracle::directives::{self, Sentinel};
use taint_oracle::errors::{AnalyzerFailure, HarnessError};
use taint_oracle::expectations::{self, Expectation, TaintRole};
use taint_oracle::findings::{self, FindingKind};
use taint_oracle::options::{Options, ReportFormat};
use taint_oracle::suite;

fn interpret(source: &str) -> Result<expectations::ExpectationSet, HarnessError> {
    expectations::interpret(&directives::extract(source)?)
}

fn parse_error_line(source: &str) -> usize {
    match interpret(source) {
        Err(HarnessError::Parse { line, .. }) => line,
        other => panic!("expected a parse error, got {other:?}"),
    }
}

#[test]
fn contiguous_tokens_are_split_on_the_comment_marker() {
    let extracted = directives::extract(
        "let x = 1\ntaintIt(in1: source(), out1: p); //!testing!source//!testing!source!fp // SWAN-43\n",
    )
    .unwrap();
    assert_eq!(extracted.lines.len(), 1);
    let line = &extracted.lines[0];
    assert_eq!(line.number, 2);
    assert_eq!(line.trailing.as_deref(), Some("// SWAN-43"));
    let texts: Vec<_> = line.directives.iter().map(|d| d.text.as_str()).collect();
    assert_eq!(texts, vec!["//!testing!source", "//!testing!source!fp"]);
    assert_eq!(line.directives[1].fields, vec!["testing", "source", "fp"]);
    assert_eq!(line.directives[1].sentinel, Sentinel::Testing);
}

#[test]
fn ordinary_comments_carry_no_directives() {
    let extracted = directives::extract("// a comment\nlet y = 2 // trailing\n/// docs\n").unwrap();
    assert!(extracted.lines.is_empty());
}

#[test]
fn analyzer_flags_are_collected() {
    let extracted =
        directives::extract("// ANALYZER_FLAGS --entry main --label \"two words\"\nf()\n").unwrap();
    assert_eq!(
        extracted.analyzer_flags,
        vec!["--entry", "main", "--label", "two words"]
    );
}

#[test]
fn occurrences_and_tickets_are_recorded() {
    let set = interpret("p(); //!testing!sink//!testing!sink!fp//!testing!source // WALA-7\n").unwrap();
    let taints: Vec<_> = set
        .on_line(1)
        .iter()
        .map(|e| match e {
            Expectation::Taint(t) => (t.role, t.false_positive, t.occurrence_index, t.ticket.clone()),
            Expectation::Counter(..) => panic!("not a taint expectation"),
        })
        .collect();
    assert_eq!(
        taints,
        vec![
            (TaintRole::Sink, false, 0, None),
            (TaintRole::Sink, true, 1, Some("WALA-7".to_string())),
            (TaintRole::Source, false, 0, None),
        ]
    );
}

#[test]
fn counter_labels_split_into_event_and_count() {
    let set = interpret("db.read(q); //?DBHelperCounter?READ12\n").unwrap();
    match &set.on_line(1)[0] {
        Expectation::Counter(c) => {
            assert_eq!(c.automaton, "DBHelperCounter");
            assert_eq!(c.event_label, "READ12");
            assert_eq!(c.event_kind, "READ");
            assert_eq!(c.expected_count, 12);
        }
        other => panic!("not a counter expectation: {other:?}"),
    }
}

#[test]
fn malformed_directives_are_parse_errors() {
    assert_eq!(parse_error_line("\nsink(x); //!testing\n"), 2);
    assert_eq!(parse_error_line("sink(x); //!testing!drain\n"), 1);
    assert_eq!(parse_error_line("sink(x); //!checking!sink\n"), 1);
    assert_eq!(parse_error_line("sink(x); //!testing!sink!maybe\n"), 1);
    assert_eq!(parse_error_line("sink(x); //!testing!sink!fp!fp\n"), 1);
    assert_eq!(parse_error_line("sink(x); //!testing!!sink\n"), 1);
    assert_eq!(parse_error_line("a\nb\nread(); //?Counter?READ\n"), 3);
    assert_eq!(parse_error_line("read(); //?Counter?4\n"), 1);
    assert_eq!(parse_error_line("read(); //?Counter\n"), 1);
    assert_eq!(parse_error_line("read(); //?Counter?READ1?extra\n"), 1);
    assert_eq!(parse_error_line("read(); //?Counter?READ99999999999999999999999\n"), 1);
    assert_eq!(
        parse_error_line("sink(x); //!testing!sink // SWAN-1 //!testing!sink\n"),
        1
    );
    assert_eq!(parse_error_line("sink(x); //!testing!sink !fp\n"), 1);
    assert_eq!(parse_error_line("read(); //?Counter?READ1 ?2\n"), 1);
}

#[test]
fn directives_in_doc_comments_are_found() {
    let extracted = directives::extract("x(); ///!testing!sink\n").unwrap();
    assert_eq!(extracted.lines.len(), 1);
    assert_eq!(extracted.lines[0].directives[0].text, "//!testing!sink");
    assert_eq!(parse_error_line("x(); ///!testing\n"), 1);
}

#[test]
fn parse_errors_quote_the_offending_token() {
    let message = interpret("f()\nsink(x); //!testing!drain\n")
        .unwrap_err()
        .to_string();
    assert!(message.contains("line 2"), "{message}");
    assert!(message.contains("//!testing!drain"), "{message}");
}

#[test]
fn one_automaton_with_two_event_kinds_is_a_schema_error() {
    match interpret("open(); //?FileCounter?OPEN1\nread(); //?FileCounter?READ1\n") {
        Err(HarnessError::Schema { line, .. }) => assert_eq!(line, 2),
        other => panic!("expected a schema error, got {other:?}"),
    }
    match interpret("read(); //?FileCounter?READ1//?FileCounter?READ2\n") {
        Err(e) => assert_eq!(e.kind(), "schema-error"),
        Ok(..) => panic!("two counters for one automaton on one line"),
    }
    assert!(interpret("open(); //?A?OPEN1//?B?READ1\nopen(); //?A?OPEN2\n").is_ok());
}

#[test]
fn findings_come_back_in_line_order() {
    let found = findings::normalize(
        r#"{"findings": [
            {"line": 9, "kind": "sink", "trace": ["a", "b"]},
            {"line": 3, "kind": "typestate", "automaton": "FileCounter", "count": 2},
            {"line": 9, "kind": "source"}
        ]}"#,
    )
    .unwrap();
    let lines: Vec<usize> = found.iter().map(|f| f.line).collect();
    assert_eq!(lines, vec![3, 9, 9]);
    assert_eq!(
        found[0].kind,
        FindingKind::Counter {
            automaton: "FileCounter".to_string(),
            count: 2
        }
    );
    assert_eq!(found[1].kind, FindingKind::Taint { role: TaintRole::Sink });
    assert!(found[1].payload.contains_key("trace"));
    assert_eq!(found[2].kind, FindingKind::Taint { role: TaintRole::Source });
}

#[test]
fn unrecognizable_output_is_an_adapter_error() {
    for output in [
        "not json at all",
        r#"{"results": []}"#,
        "42",
        r#"[{"line": 0, "kind": "sink"}]"#,
        r#"[{"line": 4, "kind": "leak"}]"#,
        r#"[{"line": 4, "kind": "counter", "automaton": "A"}]"#,
        r#"[{"line": 4, "kind": "sink", "count": 1}]"#,
        r#"[{"kind": "sink"}]"#,
    ] {
        match findings::normalize(output) {
            Err(e) => assert_eq!(e.kind(), "adapter-error", "{output}"),
            Ok(f) => panic!("{output} normalized to {f:?}"),
        }
    }
}

#[test]
fn empty_output_means_no_findings() {
    assert!(findings::normalize("[]").unwrap().is_empty());
    assert!(findings::normalize(r#"{"findings": []}"#).unwrap().is_empty());
}

#[test]
fn the_analyzer_sees_the_path_and_flags_of_the_sample_program() {
    let source = "// ANALYZER_FLAGS --entry main\nsink(x); //!testing!sink\n";
    let analyzer = |request: &AnalysisRequest<'_>| -> Result<String, AnalyzerFailure> {
        assert_eq!(request.path, Path::new("sample.swift"));
        assert_eq!(request.extra_args, ["--entry", "main"]);
        Ok(r#"[{"line": 2, "kind": "sink"}]"#.to_string())
    };
    let verdict = suite::verify_source(source, Path::new("sample.swift"), &analyzer).unwrap();
    assert!(verdict.passed());
}

#[test]
fn directive_errors_are_found_before_the_analyzer_runs() {
    let analyzer = |_: &AnalysisRequest<'_>| -> Result<String, AnalyzerFailure> {
        panic!("the analyzer must not run")
    };
    let result = suite::verify_source("sink(x); //!testing\n", Path::new("x.swift"), &analyzer);
    assert_eq!(result.unwrap_err().kind(), "parse-error");
}

#[test]
fn missing_recordings_are_analyzer_failures() {
    let analyzer = ReplayAnalyzer::default();
    assert!(analyzer
        .recording_for(Path::new("dir/a.swift"))
        .ends_with("a.swift.findings.json"));
    let result = suite::verify_source(
        "sink(x); //!testing!sink\n",
        Path::new("does/not/exist.swift"),
        &analyzer,
    );
    assert_eq!(result.unwrap_err().kind(), "analyzer-failure");
}

#[test]
fn one_broken_file_does_not_stop_the_suite() {
    let dir = tempfile::tempdir().unwrap();
    let write = |name: &str, text: &str| std::fs::write(dir.path().join(name), text).unwrap();
    write("a.swift", "sink(x); //!testing!sink\n");
    write("a.swift.findings.json", r#"[{"line": 1, "kind": "sink"}]"#);
    write("b.swift", "sink(x); //!testing!sink\n");
    write("c.swift", "sink(x); //!testing!sink\n");
    write("c.swift.findings.json", "[]");
    write("notes.txt", "//!testing");

    let paths = suite::discover(&[dir.path().to_path_buf()], &["swift".to_string()]).unwrap();
    let names: Vec<_> = paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.swift", "b.swift", "c.swift"]);

    let verdicts = suite::run_suite(&paths, &ReplayAnalyzer::default());
    assert!(verdicts[0].passed());
    assert!(matches!(verdicts[1].outcome, suite::FileOutcome::Failed(..)));
    assert!(!verdicts[2].passed());
    let summary = suite::SuiteSummary::of(&verdicts);
    assert_eq!((summary.passed, summary.failed, summary.errored), (1, 1, 1));
    assert_eq!(summary.discrepancies, 2);
}

#[test]
fn discovering_a_missing_path_is_an_error() {
    let result = suite::discover(&["no/such/dir".into()], &["swift".to_string()]);
    assert_eq!(result.unwrap_err().kind(), "io-error");
}

#[test]
fn file_placeholder_is_replaced_and_flags_precede_the_path() {
    let request = AnalysisRequest {
        path: Path::new("t/a.swift"),
        extra_args: &["-v".to_string()],
    };
    let appended = CommandAnalyzer::new("swan".to_string(), vec!["--json".to_string()]);
    assert_eq!(appended.command_line(&request), vec!["--json", "-v", "t/a.swift"]);
    let placed = CommandAnalyzer::new(
        "swan".to_string(),
        vec!["--input={file}".to_string(), "--json".to_string()],
    );
    assert_eq!(
        placed.command_line(&request),
        vec!["-v", "--input=t/a.swift", "--json"]
    );
}

#[cfg(unix)]
mod subprocess {
    use super::*;

    fn shell(script: &str) -> CommandAnalyzer {
        CommandAnalyzer::new(
            "sh".to_string(),
            vec!["-c".to_string(), script.to_string(), "analyzer".to_string()],
        )
    }

    fn run(analyzer: &CommandAnalyzer) -> Result<String, AnalyzerFailure> {
        analyzer.analyze(&AnalysisRequest {
            path: Path::new("sample.swift"),
            extra_args: &[],
        })
    }

    #[test]
    fn standard_output_is_the_result() {
        let output = run(&shell(r#"echo "[{\"line\": 1, \"kind\": \"sink\", \"file\": \"$1\"}]""#))
            .unwrap();
        assert!(output.contains("sample.swift"), "{output}");
        assert_eq!(findings::normalize(&output).unwrap().len(), 1);
    }

    #[test]
    fn a_failing_analyzer_reports_its_status_and_stderr() {
        match run(&shell("echo broken >&2; exit 3")) {
            Err(AnalyzerFailure::Exited {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("expected an exit failure, got {other:?}"),
        }
    }

    #[test]
    fn a_slow_analyzer_is_stopped() {
        let analyzer = shell("sleep 5").with_timeout(Duration::from_millis(100));
        match run(&analyzer) {
            Err(AnalyzerFailure::TimedOut { elapsed }) => {
                assert!(elapsed < Duration::from_secs(5), "{elapsed:?}")
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[test]
    fn a_timed_out_file_is_an_errored_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.swift");
        std::fs::write(&path, "sink(x); //!testing!sink\n").unwrap();
        let analyzer = shell("sleep 5").with_timeout(Duration::from_millis(100));
        let verdicts = suite::run_suite(&[path], &analyzer);
        match &verdicts[0].outcome {
            suite::FileOutcome::Failed(e) => assert_eq!(e.kind(), "analyzer-timeout"),
            suite::FileOutcome::Checked(v) => panic!("expected a timeout, got {v:?}"),
        }
        let summary = suite::SuiteSummary::of(&verdicts);
        assert_eq!((summary.passed, summary.failed, summary.errored), (0, 0, 1));
        assert!(!summary.passed());
    }

    #[test]
    fn unreadable_stderr_does_not_hide_the_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stderr");
        std::fs::write(&path, "analyzer crashed\n").unwrap();
        let mut readable = std::fs::File::open(&path).unwrap();
        assert_eq!(stderr_excerpt(&mut readable), "analyzer crashed\n");
        let mut write_only = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        assert_eq!(stderr_excerpt(&mut write_only), "");
    }

    #[test]
    fn a_missing_program_cannot_be_started() {
        let analyzer = CommandAnalyzer::new("no-such-analyzer-on-path".to_string(), vec![]);
        assert!(matches!(run(&analyzer), Err(AnalyzerFailure::Spawn { .. })));
    }
}

#[test]
fn options_split_at_the_analyzer_command() {
    let mut options = Options::default();
    options
        .parse_from_str("tests/run-pass --format json -j 2 -- swan --json {file}")
        .unwrap();
    assert_eq!(options.paths.len(), 1);
    assert_eq!(options.format, ReportFormat::Json);
    assert_eq!(options.jobs, Some(2));
    assert_eq!(options.analyzer_command, vec!["swan", "--json", "{file}"]);
    assert_eq!(options.extensions, vec!["swift"]);
    assert_eq!(options.analyzer_timeout, Duration::from_secs(40));
    assert!(!options.replay);
}

#[test]
fn replay_options() {
    let mut options = Options::default();
    options
        .parse_from_str("a.swift b --replay --timeout 5 -e sw -e swift --quiet")
        .unwrap();
    assert!(options.replay);
    assert!(options.failures_only);
    assert_eq!(options.extensions, vec!["sw", "swift"]);
    assert_eq!(options.analyzer_timeout, Duration::from_secs(5));
    assert_eq!(options.findings_suffix, ".findings.json");
}

#[test]
fn replay_and_an_analyzer_command_exclude_each_other() {
    assert!(Options::default().parse_from_str("a.swift --replay -- swan").is_err());
    assert!(Options::default().parse_from_str("a.swift").is_err());
    assert!(Options::default().parse_from_str("--replay").is_err());
}

#[test]
fn later_options_override_earlier_ones() {
    let mut options = Options::default();
    options
        .parse_from_str("a.swift --format json --replay --format text --timeout 9 --timeout 3")
        .unwrap();
    assert_eq!(options.format, ReportFormat::Text);
    assert_eq!(options.analyzer_timeout, Duration::from_secs(3));
}
