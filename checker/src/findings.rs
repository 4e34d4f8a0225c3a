// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

// The analyzer reports findings as JSON, either as a bare array or as an object with a
// "findings" array:
//
//     {"findings": [
//         {"line": 26, "kind": "source", "path": ["source()", "taintIt"]},
//         {"line": 88, "kind": "counter", "automaton": "DBHelperCounter", "count": 4}
//     ]}
//
// Fields other than line, kind, automaton and count are carried along as an opaque payload.

use crate::errors::{HarnessError, Result};
use crate::expectations::TaintRole;

use log_derive::logfn_inputs;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Longest piece of analyzer output quoted in an adapter error.
const MAX_FRAGMENT_LEN: usize = 120;

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FindingKind {
    Taint { role: TaintRole },
    Counter { automaton: String, count: u64 },
}

/// Something the analyzer reported at a line.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Finding {
    pub line: usize,
    #[serde(flatten)]
    pub kind: FindingKind,
    /// Whatever else the analyzer said about the finding, e.g. a provenance chain.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,
}

impl Finding {
    pub fn taint(line: usize, role: TaintRole) -> Finding {
        Finding {
            line,
            kind: FindingKind::Taint { role },
            payload: Map::new(),
        }
    }

    pub fn counter(line: usize, automaton: &str, count: u64) -> Finding {
        Finding {
            line,
            kind: FindingKind::Counter {
                automaton: automaton.to_string(),
                count,
            },
            payload: Map::new(),
        }
    }
}

#[derive(Deserialize)]
struct RawFinding {
    line: u64,
    kind: String,
    #[serde(default)]
    automaton: Option<String>,
    #[serde(default)]
    count: Option<u64>,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

/// Maps raw analyzer output onto findings. The result is ordered by line; findings on the
/// same line keep the order in which the analyzer reported them.
#[logfn_inputs(TRACE)]
pub fn normalize(output: &str) -> Result<Vec<Finding>> {
    let value: Value = serde_json::from_str(output).map_err(|e| {
        HarnessError::adapter(format!("analyzer output is not JSON: {e}"), fragment(output))
    })?;
    let records = match value {
        Value::Array(records) => records,
        Value::Object(mut map) => match map.remove("findings") {
            Some(Value::Array(records)) => records,
            _ => {
                return Err(HarnessError::adapter(
                    "expected an object with a `findings` array",
                    fragment(output),
                ))
            }
        },
        _ => {
            return Err(HarnessError::adapter(
                "expected an array of findings",
                fragment(output),
            ))
        }
    };
    let mut findings = records
        .into_iter()
        .map(normalize_record)
        .collect::<Result<Vec<_>>>()?;
    findings.sort_by_key(|f| f.line);
    debug!("normalized {} findings", findings.len());
    Ok(findings)
}

fn normalize_record(record: Value) -> Result<Finding> {
    let text = record.to_string();
    let raw: RawFinding = serde_json::from_value(record)
        .map_err(|e| HarnessError::adapter(format!("malformed finding: {e}"), fragment(&text)))?;
    if raw.line == 0 {
        return Err(HarnessError::adapter(
            "line numbers start at 1",
            fragment(&text),
        ));
    }
    let line = usize::try_from(raw.line)
        .map_err(|_| HarnessError::adapter("line number out of range", fragment(&text)))?;
    let kind = match raw.kind.as_str() {
        "counter" | "typestate" => match (raw.automaton, raw.count) {
            (Some(automaton), Some(count)) => FindingKind::Counter { automaton, count },
            _ => {
                return Err(HarnessError::adapter(
                    "counter findings need an `automaton` and a `count`",
                    fragment(&text),
                ))
            }
        },
        kind => {
            let role = TaintRole::from_str(kind).map_err(|_| {
                HarnessError::adapter(format!("unknown finding kind `{kind}`"), fragment(&text))
            })?;
            if raw.automaton.is_some() || raw.count.is_some() {
                return Err(HarnessError::adapter(
                    "taint findings do not carry an automaton or a count",
                    fragment(&text),
                ));
            }
            FindingKind::Taint { role }
        }
    };
    Ok(Finding {
        line,
        kind,
        payload: raw.payload,
    })
}

fn fragment(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(MAX_FRAGMENT_LEN) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
