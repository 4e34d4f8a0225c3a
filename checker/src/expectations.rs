// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::directives::{ExtractedSource, RawDirective, Sentinel, SourceLine};
use crate::errors::{HarnessError, Result};

use lazy_static::lazy_static;
use log_derive::logfn_inputs;
use mirai_annotations::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// The first field of every taint directive.
pub const TESTING_NAMESPACE: &str = "testing";

/// Modifier that turns a taint directive into an accepted false positive.
pub const FALSE_POSITIVE_MODIFIER: &str = "fp";

lazy_static! {
    static ref TICKET: Regex = Regex::new(r"\b[A-Z][A-Z0-9]*-[0-9]+\b").expect("valid regex");
}

/// The two ends of a taint flow.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaintRole {
    Source,
    Sink,
}

impl FromStr for TaintRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "source" => Ok(TaintRole::Source),
            "sink" => Ok(TaintRole::Sink),
            _ => Err(format!("unknown taint role `{s}`")),
        }
    }
}

impl fmt::Display for TaintRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaintRole::Source => f.write_str("source"),
            TaintRole::Sink => f.write_str("sink"),
        }
    }
}

/// An expected taint source or sink at a line.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TaintExpectation {
    pub line: usize,
    pub role: TaintRole,
    /// If true the analyzer may, but need not, report this finding.
    pub false_positive: bool,
    /// Position among the directives of the same role on this line, counting from zero.
    pub occurrence_index: usize,
    /// A bug tracker reference found in the trailing comment of a false positive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
}

/// An expected exact count of tracked events reaching a line.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CounterExpectation {
    pub line: usize,
    pub automaton: String,
    /// The label as written, e.g. "READ4".
    pub event_label: String,
    /// The non-digit prefix of the label, e.g. "READ".
    pub event_kind: String,
    pub expected_count: u64,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Expectation {
    Taint(TaintExpectation),
    Counter(CounterExpectation),
}

impl Expectation {
    pub fn line(&self) -> usize {
        match self {
            Expectation::Taint(t) => t.line,
            Expectation::Counter(c) => c.line,
        }
    }
}

/// The expectations of one sample program, grouped by line.
/// Within a line, expectations keep the left to right order of their directives.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExpectationSet {
    by_line: BTreeMap<usize, Vec<Expectation>>,
}

impl ExpectationSet {
    pub fn on_line(&self, line: usize) -> &[Expectation] {
        self.by_line.get(&line).map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Expectation> {
        self.by_line.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_line.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_line.is_empty()
    }
}

/// Turns raw directive tokens into typed expectations, checking that the directive set is
/// internally consistent.
#[logfn_inputs(TRACE)]
pub fn interpret(source: &ExtractedSource) -> Result<ExpectationSet> {
    let mut set = ExpectationSet::default();
    // automaton -> the first counter directive seen for it
    let mut first_counters: HashMap<String, CounterExpectation> = HashMap::new();
    for line in &source.lines {
        let ticket = ticket_of(line);
        let mut occurrences: HashMap<TaintRole, usize> = HashMap::new();
        let mut expectations = Vec::with_capacity(line.directives.len());
        for directive in &line.directives {
            checked_assume!(directive.line == line.number);
            let expectation = match directive.sentinel {
                Sentinel::Testing => {
                    let mut taint = interpret_taint(directive)?;
                    let next = occurrences.entry(taint.role).or_insert(0);
                    taint.occurrence_index = *next;
                    *next += 1;
                    if taint.false_positive {
                        taint.ticket = ticket.clone();
                    }
                    Expectation::Taint(taint)
                }
                Sentinel::Counter => {
                    let counter = interpret_counter(directive)?;
                    check_counter_schema(&expectations, &first_counters, &counter)?;
                    first_counters
                        .entry(counter.automaton.clone())
                        .or_insert_with(|| counter.clone());
                    Expectation::Counter(counter)
                }
            };
            expectations.push(expectation);
        }
        set.by_line.insert(line.number, expectations);
    }
    info!("interpreted {} expectations", set.len());
    Ok(set)
}

fn interpret_taint(directive: &RawDirective) -> Result<TaintExpectation> {
    let fields = &directive.fields;
    if fields[0] != TESTING_NAMESPACE {
        return Err(HarnessError::parse(
            directive.line,
            &directive.text,
            format!("unknown directive namespace `{}`", fields[0]),
        ));
    }
    let role = match fields.get(1) {
        Some(role) => TaintRole::from_str(role)
            .map_err(|msg| HarnessError::parse(directive.line, &directive.text, msg))?,
        None => {
            return Err(HarnessError::parse(
                directive.line,
                &directive.text,
                "taint directive has no role",
            ))
        }
    };
    let mut false_positive = false;
    for modifier in &fields[2..] {
        match modifier.as_str() {
            FALSE_POSITIVE_MODIFIER if !false_positive => false_positive = true,
            FALSE_POSITIVE_MODIFIER => {
                return Err(HarnessError::parse(
                    directive.line,
                    &directive.text,
                    "repeated modifier `fp`",
                ))
            }
            _ => {
                return Err(HarnessError::parse(
                    directive.line,
                    &directive.text,
                    format!("unknown modifier `{modifier}`"),
                ))
            }
        }
    }
    Ok(TaintExpectation {
        line: directive.line,
        role,
        false_positive,
        occurrence_index: 0,
        ticket: None,
    })
}

fn interpret_counter(directive: &RawDirective) -> Result<CounterExpectation> {
    let Some((automaton, label)) = counter_fields(directive) else {
        return Err(HarnessError::parse(
            directive.line,
            &directive.text,
            "counter directive must have exactly an automaton and an event label",
        ));
    };
    if !is_identifier(automaton) {
        return Err(HarnessError::parse(
            directive.line,
            &directive.text,
            format!("`{automaton}` is not a valid automaton name"),
        ));
    }
    let kind_len = label.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let (event_kind, digits) = label.split_at(kind_len);
    if digits.is_empty() {
        return Err(HarnessError::parse(
            directive.line,
            &directive.text,
            format!("event label `{label}` does not end in a count"),
        ));
    }
    if !is_identifier(event_kind) {
        return Err(HarnessError::parse(
            directive.line,
            &directive.text,
            format!("event label `{label}` does not start with an event name"),
        ));
    }
    let expected_count = digits.parse::<u64>().map_err(|e| {
        HarnessError::parse(
            directive.line,
            &directive.text,
            format!("bad count `{digits}`: {e}"),
        )
    })?;
    Ok(CounterExpectation {
        line: directive.line,
        automaton: automaton.to_string(),
        event_label: label.to_string(),
        event_kind: event_kind.to_string(),
        expected_count,
    })
}

/// A line has at most one expected count per automaton, and an automaton counts the same
/// kind of event everywhere in a sample program.
fn check_counter_schema(
    same_line: &[Expectation],
    first_counters: &HashMap<String, CounterExpectation>,
    counter: &CounterExpectation,
) -> Result<()> {
    let duplicate = same_line.iter().any(|e| match e {
        Expectation::Counter(c) => c.automaton == counter.automaton,
        Expectation::Taint(..) => false,
    });
    if duplicate {
        return Err(HarnessError::Schema {
            line: counter.line,
            message: format!(
                "automaton `{}` has more than one expected count on this line",
                counter.automaton
            ),
        });
    }
    if let Some(first) = first_counters.get(&counter.automaton) {
        if first.event_kind != counter.event_kind {
            return Err(HarnessError::Schema {
                line: counter.line,
                message: format!(
                    "automaton `{}` counts `{}` events at line {} (label `{}`) but `{}` events here (label `{}`)",
                    counter.automaton,
                    first.event_kind,
                    first.line,
                    first.event_label,
                    counter.event_kind,
                    counter.event_label
                ),
            });
        }
    }
    Ok(())
}

fn counter_fields(directive: &RawDirective) -> Option<(&str, &str)> {
    match (directive.sentinel, directive.fields.as_slice()) {
        (Sentinel::Counter, [automaton, label]) => Some((automaton.as_str(), label.as_str())),
        _ => None,
    }
}

fn ticket_of(line: &SourceLine) -> Option<String> {
    let trailing = line.trailing.as_deref()?;
    TICKET.find(trailing).map(|m| m.as_str().to_string())
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    }
}
