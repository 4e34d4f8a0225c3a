// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Conditions that end the verification of a single sample program.
/// None of these abort a suite: the runner records them against the file and moves on.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// A directive comment that does not follow the directive grammar.
    #[error("parse error at line {line}: {message} in `{text}`")]
    Parse {
        line: usize,
        text: String,
        message: String,
    },

    /// Directives that are individually well formed but contradict each other.
    #[error("schema error at line {line}: {message}")]
    Schema { line: usize, message: String },

    /// Analyzer output that does not have a shape the harness understands.
    #[error("adapter error: {message} (in `{fragment}`)")]
    Adapter { message: String, fragment: String },

    #[error("analyzer failure: {0}")]
    Analyzer(#[from] AnalyzerFailure),

    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl HarnessError {
    pub fn parse(line: usize, text: &str, message: impl Into<String>) -> HarnessError {
        HarnessError::Parse {
            line,
            text: text.trim().to_string(),
            message: message.into(),
        }
    }

    pub fn adapter(message: impl Into<String>, fragment: impl ToString) -> HarnessError {
        HarnessError::Adapter {
            message: message.into(),
            fragment: fragment.to_string(),
        }
    }

    /// A short stable tag used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Parse { .. } => "parse-error",
            HarnessError::Schema { .. } => "schema-error",
            HarnessError::Adapter { .. } => "adapter-error",
            HarnessError::Analyzer(AnalyzerFailure::TimedOut { .. }) => "analyzer-timeout",
            HarnessError::Analyzer(..) => "analyzer-failure",
            HarnessError::Io { .. } => "io-error",
        }
    }
}

/// The external analyzer did not produce output for a sample program.
#[derive(Error, Debug)]
pub enum AnalyzerFailure {
    #[error("could not start `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{program}` exited with {}: {stderr}", exit_code.map_or_else(|| "a signal".to_string(), |c| format!("status {c}")))]
    Exited {
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("timed out after {}s", elapsed.as_secs_f64())]
    TimedOut { elapsed: Duration },

    #[error("could not read recorded findings {}: {source}", path.display())]
    Replay {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("lost contact with the analyzer process: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
