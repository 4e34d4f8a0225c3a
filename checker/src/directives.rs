// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

// Directive comments look like
//
//     taintIt(in1: source(), out1: p); //!testing!source//!testing!source!fp // SWAN-43
//     db.read(readStatementString: "SQL_QUERY"); //?DBHelperCounter?READ4
//
// A token is "//" followed by a sentinel character and a body that is split into fields by
// that same sentinel. Tokens are written back to back, so they are found by looking for the
// next "//", never by splitting on whitespace.

use crate::errors::{HarnessError, Result};

use lazy_static::lazy_static;
use log_derive::{logfn, logfn_inputs};
use mirai_annotations::*;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// The version of the directive grammar understood by this extractor.
pub const GRAMMAR_VERSION: u32 = 1;

const COMMENT: &str = "//";

lazy_static! {
    static ref ANALYZER_FLAGS: Regex =
        Regex::new(r"^\s*//\s*ANALYZER_FLAGS\s(?P<flags>.*)$").expect("valid regex");
}

/// The character that follows "//" and separates the fields of a directive.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sentinel {
    /// `!`, introduces a taint (testing) directive.
    Testing,
    /// `?`, introduces a typestate counter directive.
    Counter,
}

impl Sentinel {
    pub fn from_char(c: char) -> Option<Sentinel> {
        match c {
            '!' => Some(Sentinel::Testing),
            '?' => Some(Sentinel::Counter),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Sentinel::Testing => '!',
            Sentinel::Counter => '?',
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// One directive token exactly as it appears in the source.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawDirective {
    pub line: usize,
    pub sentinel: Sentinel,
    /// The token text, including the leading "//" and sentinel.
    pub text: String,
    /// The body of the token split on the sentinel. Never empty, and no field is empty.
    pub fields: Vec<String>,
}

/// A line of source text that carries at least one directive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceLine {
    /// 1-based.
    pub number: usize,
    pub text: String,
    pub directives: Vec<RawDirective>,
    /// Whatever follows the directive run, for instance "// SWAN-43".
    pub trailing: Option<String>,
}

/// Everything the extractor learns from a sample program.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ExtractedSource {
    pub lines: Vec<SourceLine>,
    /// Extra analyzer arguments requested by "// ANALYZER_FLAGS" lines.
    pub analyzer_flags: Vec<String>,
}

impl ExtractedSource {
    pub fn directive_count(&self) -> usize {
        self.lines.iter().map(|l| l.directives.len()).sum()
    }
}

/// Reads the file at the given path and extracts its directives.
#[logfn_inputs(TRACE)]
pub fn extract_file(path: &Path) -> Result<ExtractedSource> {
    let text = std::fs::read_to_string(path).map_err(|source| HarnessError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    extract(&text)
}

/// Scans source text for directive comments. Lines without directives are skipped.
/// The first malformed directive aborts the scan.
pub fn extract(source: &str) -> Result<ExtractedSource> {
    let mut extracted = ExtractedSource::default();
    for (i, text) in source.lines().enumerate() {
        let number = i + 1;
        if let Some(captures) = ANALYZER_FLAGS.captures(text) {
            let flags = shellwords::split(&captures["flags"])
                .map_err(|e| HarnessError::parse(number, text, format!("{e:?}")))?;
            extracted.analyzer_flags.extend(flags);
            continue;
        }
        if let Some(line) = scan_line(number, text)? {
            extracted.lines.push(line);
        }
    }
    debug!(
        "extracted {} directives from {} lines",
        extracted.directive_count(),
        extracted.lines.len()
    );
    Ok(extracted)
}

/// Returns the line with its directive run tokenized, or None if it has no directives.
#[logfn(TRACE)]
fn scan_line(number: usize, text: &str) -> Result<Option<SourceLine>> {
    precondition!(number > 0);
    let Some(mut pos) = directive_start(text) else {
        return Ok(None);
    };
    let mut directives = Vec::new();
    while let Some(sentinel) = sentinel_at(text, pos) {
        let body_start = pos + COMMENT.len() + 1;
        let body_end = body_start + body_len(&text[body_start..]);
        let token = &text[pos..body_end];
        directives.push(tokenize(number, sentinel, token, &text[body_start..body_end])?);
        pos = body_end;
        // Tokens are usually contiguous, but a run may also be spread out with blanks.
        let next = text.len() - text[pos..].trim_start().len();
        if sentinel_at(text, next).is_some() {
            pos = next;
        }
    }
    verify!(!directives.is_empty());
    let trailing = text[pos..].trim();
    if trailing.starts_with(|c: char| Sentinel::from_char(c).is_some()) {
        return Err(HarnessError::parse(
            number,
            text,
            format!("`{trailing}` is separated from the directive it belongs to"),
        ));
    }
    if directive_start(trailing).is_some() {
        return Err(HarnessError::parse(
            number,
            text,
            "directive found after the end of the directive run",
        ));
    }
    Ok(Some(SourceLine {
        number,
        text: text.to_string(),
        directives,
        trailing: if trailing.is_empty() {
            None
        } else {
            Some(trailing.to_string())
        },
    }))
}

/// The byte offset of the first "//" that is immediately followed by a sentinel.
/// Every offset is tried, so the "//!" inside "///!" is found too.
fn directive_start(text: &str) -> Option<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .find(|i| sentinel_at(text, *i).is_some())
}

fn sentinel_at(text: &str, pos: usize) -> Option<Sentinel> {
    let rest = text.get(pos..)?;
    if !rest.starts_with(COMMENT) {
        return None;
    }
    rest[COMMENT.len()..].chars().next().and_then(Sentinel::from_char)
}

/// A body runs until whitespace, the start of another comment, or the end of the line.
fn body_len(rest: &str) -> usize {
    rest.char_indices()
        .find(|(i, c)| c.is_whitespace() || rest[*i..].starts_with(COMMENT))
        .map_or(rest.len(), |(i, _)| i)
}

fn tokenize(line: usize, sentinel: Sentinel, token: &str, body: &str) -> Result<RawDirective> {
    if !body.contains(sentinel.as_char()) {
        return Err(HarnessError::parse(
            line,
            token,
            format!("unterminated directive, expected a second `{sentinel}`"),
        ));
    }
    let fields: Vec<String> = body.split(sentinel.as_char()).map(String::from).collect();
    if fields.iter().any(|f| f.is_empty()) {
        return Err(HarnessError::parse(line, token, "directive has an empty field"));
    }
    Ok(RawDirective {
        line,
        sentinel,
        text: token.to_string(),
        fields,
    })
}
