// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::expectations::{
    CounterExpectation, Expectation, ExpectationSet, TaintExpectation, TaintRole,
};
use crate::findings::{Finding, FindingKind};

use log_derive::{logfn, logfn_inputs};
use mirai_annotations::*;
use serde::Serialize;
use std::cmp::min;
use std::collections::BTreeMap;

/// Expectations and findings are only ever compared within a group: the same line and the
/// same taint role or counter automaton. The ordering of keys is the order of reports,
/// taint before counters, sources before sinks, automata by name.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum GroupKey {
    Taint { role: TaintRole },
    Counter { automaton: String },
}

impl GroupKey {
    fn of_expectation(expectation: &Expectation) -> GroupKey {
        match expectation {
            Expectation::Taint(t) => GroupKey::Taint { role: t.role },
            Expectation::Counter(c) => GroupKey::Counter {
                automaton: c.automaton.clone(),
            },
        }
    }

    fn of_finding(finding: &Finding) -> GroupKey {
        match &finding.kind {
            FindingKind::Taint { role } => GroupKey::Taint { role: *role },
            FindingKind::Counter { automaton, .. } => GroupKey::Counter {
                automaton: automaton.clone(),
            },
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupKey::Taint { role } => write!(f, "{role}"),
            GroupKey::Counter { automaton } => write!(f, "counter {automaton}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ExpectationStatus {
    Matched,
    /// A false positive expectation that the analyzer did report.
    AcceptedFalsePositive,
    /// A false positive expectation that the analyzer did not report. This is fine.
    ToleratedAbsent,
    Missing,
    CountMismatch { actual: u64 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingStatus {
    Matched,
    AcceptedFalsePositive,
    Unexpected,
    CountMismatch,
}

/// One way in which the analyzer's output deviates from the directives.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "discrepancy", rename_all = "kebab-case")]
pub enum Discrepancy {
    /// `count` required findings were not reported.
    Missing {
        line: usize,
        key: GroupKey,
        expected: usize,
        reported: usize,
        count: usize,
    },
    /// `count` findings were reported beyond what the directives declare, including the
    /// declared false positives.
    Unexpected {
        line: usize,
        key: GroupKey,
        declared: usize,
        reported: usize,
        count: usize,
    },
    CountMismatch {
        line: usize,
        automaton: String,
        event_label: String,
        expected: u64,
        actual: u64,
    },
}

/// The outcome of matching one group.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupResult {
    pub line: usize,
    pub key: GroupKey,
    pub expectations: Vec<(Expectation, ExpectationStatus)>,
    pub findings: Vec<(Finding, FindingStatus)>,
}

impl GroupResult {
    pub fn passed(&self) -> bool {
        self.expectations.iter().all(|(_, s)| {
            !matches!(
                s,
                ExpectationStatus::Missing | ExpectationStatus::CountMismatch { .. }
            )
        }) && self
            .findings
            .iter()
            .all(|(_, s)| *s != FindingStatus::Unexpected)
    }

    fn count_expectations(&self, status: ExpectationStatus) -> usize {
        self.expectations.iter().filter(|(_, s)| *s == status).count()
    }

    fn count_findings(&self, status: FindingStatus) -> usize {
        self.findings.iter().filter(|(_, s)| *s == status).count()
    }

    /// The discrepancies of this group. A passing group has none.
    pub fn discrepancies(&self) -> Vec<Discrepancy> {
        let mut discrepancies = Vec::new();
        let missing = self.count_expectations(ExpectationStatus::Missing);
        if missing > 0 {
            discrepancies.push(Discrepancy::Missing {
                line: self.line,
                key: self.key.clone(),
                expected: missing + self.count_expectations(ExpectationStatus::Matched),
                reported: self.findings.len(),
                count: missing,
            });
        }
        for (expectation, status) in &self.expectations {
            if let (Expectation::Counter(c), ExpectationStatus::CountMismatch { actual }) =
                (expectation, status)
            {
                discrepancies.push(Discrepancy::CountMismatch {
                    line: self.line,
                    automaton: c.automaton.clone(),
                    event_label: c.event_label.clone(),
                    expected: c.expected_count,
                    actual: *actual,
                });
            }
        }
        let unexpected = self.count_findings(FindingStatus::Unexpected);
        if unexpected > 0 {
            discrepancies.push(Discrepancy::Unexpected {
                line: self.line,
                key: self.key.clone(),
                declared: self.expectations.len(),
                reported: self.findings.len(),
                count: unexpected,
            });
        }
        discrepancies
    }

    /// False positive expectations that absorbed a finding.
    pub fn accepted_false_positives(&self) -> impl Iterator<Item = &TaintExpectation> {
        self.expectations.iter().filter_map(|(e, s)| match (e, s) {
            (Expectation::Taint(t), ExpectationStatus::AcceptedFalsePositive) => Some(t),
            _ => None,
        })
    }
}

/// The complete result of matching one sample program.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Verdict {
    /// Ordered by line, then by group key.
    pub groups: Vec<GroupResult>,
}

impl Verdict {
    pub fn passed(&self) -> bool {
        self.groups.iter().all(GroupResult::passed)
    }

    pub fn discrepancies(&self) -> Vec<Discrepancy> {
        self.groups.iter().flat_map(GroupResult::discrepancies).collect()
    }

    pub fn expectation_count(&self) -> usize {
        self.groups.iter().map(|g| g.expectations.len()).sum()
    }

    pub fn finding_count(&self) -> usize {
        self.groups.iter().map(|g| g.findings.len()).sum()
    }

    pub fn accepted_false_positives(&self) -> impl Iterator<Item = &TaintExpectation> {
        self.groups.iter().flat_map(GroupResult::accepted_false_positives)
    }
}

/// Matches the findings of the analyzer against the expectations of a sample program.
/// Every line and every group is evaluated, whatever happens in earlier groups.
#[logfn_inputs(TRACE)]
pub fn match_findings(expectations: &ExpectationSet, findings: &[Finding]) -> Verdict {
    let mut groups: BTreeMap<(usize, GroupKey), (Vec<Expectation>, Vec<Finding>)> =
        BTreeMap::new();
    for expectation in expectations.iter() {
        let key = GroupKey::of_expectation(expectation);
        groups
            .entry((expectation.line(), key))
            .or_default()
            .0
            .push(expectation.clone());
    }
    for finding in findings {
        let key = GroupKey::of_finding(finding);
        groups
            .entry((finding.line, key))
            .or_default()
            .1
            .push(finding.clone());
    }
    let groups: Vec<GroupResult> = groups
        .into_iter()
        .map(|((line, key), (expectations, findings))| match key {
            GroupKey::Taint { .. } => match_taint(line, key, expectations, findings),
            GroupKey::Counter { .. } => match_counter(line, key, expectations, findings),
        })
        .collect();
    let verdict = Verdict { groups };
    debug!(
        "matched {} expectations against {} findings, passed: {}",
        verdict.expectation_count(),
        verdict.finding_count(),
        verdict.passed()
    );
    verdict
}

/// Every required expectation needs a finding of its own. Findings beyond the required ones
/// are first explained by the declared false positives and only then counted as unexpected.
#[logfn(TRACE)]
fn match_taint(
    line: usize,
    key: GroupKey,
    expectations: Vec<Expectation>,
    findings: Vec<Finding>,
) -> GroupResult {
    let is_false_positive = |e: &Expectation| matches!(e, Expectation::Taint(t) if t.false_positive);
    let required = expectations.iter().filter(|e| !is_false_positive(e)).count();
    let tolerated = expectations.len() - required;
    let matched = min(findings.len(), required);
    let accepted = min(findings.len() - matched, tolerated);
    verify!(matched + accepted <= findings.len());

    let (mut required_seen, mut tolerated_seen) = (0, 0);
    let expectations = expectations
        .into_iter()
        .map(|e| {
            let status = if is_false_positive(&e) {
                tolerated_seen += 1;
                if tolerated_seen <= accepted {
                    ExpectationStatus::AcceptedFalsePositive
                } else {
                    ExpectationStatus::ToleratedAbsent
                }
            } else {
                required_seen += 1;
                if required_seen <= matched {
                    ExpectationStatus::Matched
                } else {
                    ExpectationStatus::Missing
                }
            };
            (e, status)
        })
        .collect();
    let findings = findings
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            let status = if i < matched {
                FindingStatus::Matched
            } else if i < matched + accepted {
                FindingStatus::AcceptedFalsePositive
            } else {
                FindingStatus::Unexpected
            };
            (f, status)
        })
        .collect();
    GroupResult {
        line,
        key,
        expectations,
        findings,
    }
}

/// Each counter expectation takes a finding that reports exactly its count if there is one,
/// and otherwise the first remaining finding, which then is a count mismatch.
#[logfn(TRACE)]
fn match_counter(
    line: usize,
    key: GroupKey,
    expectations: Vec<Expectation>,
    findings: Vec<Finding>,
) -> GroupResult {
    let mut statuses: Vec<Option<FindingStatus>> = vec![None; findings.len()];
    let expectations = expectations
        .into_iter()
        .map(|e| {
            let status = match &e {
                Expectation::Counter(c) => claim_count(c, &findings, &mut statuses),
                Expectation::Taint(..) => assume_unreachable!("taint expectation in a counter group"),
            };
            (e, status)
        })
        .collect();
    let findings = findings
        .into_iter()
        .zip(statuses)
        .map(|(f, s)| (f, s.unwrap_or(FindingStatus::Unexpected)))
        .collect();
    GroupResult {
        line,
        key,
        expectations,
        findings,
    }
}

fn claim_count(
    expectation: &CounterExpectation,
    findings: &[Finding],
    statuses: &mut [Option<FindingStatus>],
) -> ExpectationStatus {
    let reported_count = |i: usize| match findings[i].kind {
        FindingKind::Counter { count, .. } => count,
        FindingKind::Taint { .. } => assume_unreachable!("taint finding in a counter group"),
    };
    let exact = (0..findings.len())
        .find(|&i| statuses[i].is_none() && reported_count(i) == expectation.expected_count);
    if let Some(i) = exact {
        statuses[i] = Some(FindingStatus::Matched);
        return ExpectationStatus::Matched;
    }
    match (0..findings.len()).find(|&i| statuses[i].is_none()) {
        Some(i) => {
            statuses[i] = Some(FindingStatus::CountMismatch);
            ExpectationStatus::CountMismatch {
                actual: reported_count(i),
            }
        }
        None => ExpectationStatus::Missing,
    }
}
