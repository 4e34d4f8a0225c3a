// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

// Reports are meant to be diffed between runs, so nothing in them depends on timing,
// thread scheduling or hash ordering. Files come in path order and within a file, groups
// come in line order, taint before counters.

use crate::directives::GRAMMAR_VERSION;
use crate::oracle::{Discrepancy, GroupKey, GroupResult, Verdict};
use crate::suite::{FileOutcome, FileVerdict, SuiteSummary};

use serde::Serialize;
use std::fmt::Write;

/// Renders the verdicts of a run followed by a summary line.
/// With `failures_only`, passing files are left out.
pub fn render_text(verdicts: &[FileVerdict], failures_only: bool) -> String {
    let mut out = String::new();
    for verdict in verdicts {
        if failures_only && verdict.passed() {
            continue;
        }
        out.push_str(&render_file(verdict));
    }
    out.push_str(&render_summary(&SuiteSummary::of(verdicts)));
    out
}

pub fn render_file(verdict: &FileVerdict) -> String {
    let path = verdict.path.display();
    match &verdict.outcome {
        FileOutcome::Failed(e) => format!("ERROR {path}: {e}\n"),
        FileOutcome::Checked(v) => {
            let mut out = format!(
                "{} {path} ({} expected, {} reported)\n",
                if v.passed() { "PASS" } else { "FAIL" },
                v.expectation_count(),
                v.finding_count()
            );
            out.push_str(&render_verdict(v));
            out
        }
    }
}

/// One indented line per discrepancy and per accepted false positive.
pub fn render_verdict(verdict: &Verdict) -> String {
    let mut out = String::new();
    for group in &verdict.groups {
        for discrepancy in group.discrepancies() {
            let _ = writeln!(out, "  {}", describe(&discrepancy));
        }
        for fp in group.accepted_false_positives() {
            let _ = write!(out, "  line {}: accepted false positive {}", fp.line, fp.role);
            if let Some(ticket) = &fp.ticket {
                let _ = write!(out, " [{ticket}]");
            }
            out.push('\n');
        }
    }
    out
}

pub fn render_summary(summary: &SuiteSummary) -> String {
    format!(
        "{}: {} passed, {} failed, {} errored, {} discrepancies\n",
        if summary.passed() { "ok" } else { "FAILED" },
        summary.passed,
        summary.failed,
        summary.errored,
        summary.discrepancies
    )
}

pub fn describe(discrepancy: &Discrepancy) -> String {
    match discrepancy {
        Discrepancy::Missing {
            line,
            key,
            expected,
            reported,
            count,
        } => format!(
            "line {line}: missing {} (expected {expected}, reported {reported}, {count} missing)",
            subject(key)
        ),
        Discrepancy::Unexpected {
            line,
            key,
            declared,
            reported,
            count,
        } => format!(
            "line {line}: unexpected {} (declared {declared}, reported {reported}, {count} unexpected)",
            subject(key)
        ),
        Discrepancy::CountMismatch {
            line,
            automaton,
            event_label,
            expected,
            actual,
        } => format!(
            "line {line}: count mismatch for {automaton} {event_label} (expected {expected}, actual {actual})"
        ),
    }
}

fn subject(key: &GroupKey) -> String {
    match key {
        GroupKey::Taint { role } => role.to_string(),
        GroupKey::Counter { automaton } => format!("count for {automaton}"),
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    grammar_version: u32,
    files: Vec<JsonFile<'a>>,
    summary: SuiteSummary,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum JsonFile<'a> {
    Pass {
        path: String,
        groups: &'a [GroupResult],
    },
    Fail {
        path: String,
        discrepancies: Vec<Discrepancy>,
        groups: &'a [GroupResult],
    },
    Error {
        path: String,
        error: &'static str,
        message: String,
    },
}

/// The same content as render_text, as a JSON document.
pub fn render_json(verdicts: &[FileVerdict]) -> serde_json::Result<String> {
    let files = verdicts
        .iter()
        .map(|verdict| {
            let path = verdict.path.display().to_string();
            match &verdict.outcome {
                FileOutcome::Checked(v) if v.passed() => JsonFile::Pass {
                    path,
                    groups: &v.groups,
                },
                FileOutcome::Checked(v) => JsonFile::Fail {
                    path,
                    discrepancies: v.discrepancies(),
                    groups: &v.groups,
                },
                FileOutcome::Failed(e) => JsonFile::Error {
                    path,
                    error: e.kind(),
                    message: e.to_string(),
                },
            }
        })
        .collect();
    let mut json = serde_json::to_string_pretty(&JsonReport {
        grammar_version: GRAMMAR_VERSION,
        files,
        summary: SuiteSummary::of(verdicts),
    })?;
    json.push('\n');
    Ok(json)
}
