// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::analyzer::{AnalysisRequest, Analyzer};
use crate::directives::{self, ExtractedSource};
use crate::errors::{HarnessError, Result};
use crate::expectations;
use crate::findings;
use crate::oracle::{self, Verdict};

use itertools::Itertools;
use log_derive::logfn_inputs;
use rayon::prelude::*;
use serde::Serialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// How the verification of one sample program ended.
#[derive(Debug)]
pub enum FileOutcome {
    Checked(Verdict),
    /// The run for this file was aborted. Counts as a failure.
    Failed(HarnessError),
}

#[derive(Debug)]
pub struct FileVerdict {
    pub path: PathBuf,
    pub outcome: FileOutcome,
}

impl FileVerdict {
    pub fn passed(&self) -> bool {
        matches!(&self.outcome, FileOutcome::Checked(verdict) if verdict.passed())
    }

    /// An aborted run counts as a single discrepancy.
    pub fn discrepancy_count(&self) -> usize {
        match &self.outcome {
            FileOutcome::Checked(verdict) => verdict.discrepancies().len(),
            FileOutcome::Failed(..) => 1,
        }
    }
}

/// Totals over all the sample programs of a run.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SuiteSummary {
    pub files: usize,
    pub passed: usize,
    /// Files whose findings did not match their directives.
    pub failed: usize,
    /// Files whose run was aborted by an error.
    pub errored: usize,
    pub discrepancies: usize,
}

impl SuiteSummary {
    pub fn of(verdicts: &[FileVerdict]) -> SuiteSummary {
        verdicts
            .iter()
            .fold(SuiteSummary::default(), |mut summary, verdict| {
                summary.files += 1;
                match &verdict.outcome {
                    FileOutcome::Checked(..) if verdict.passed() => summary.passed += 1,
                    FileOutcome::Checked(..) => summary.failed += 1,
                    FileOutcome::Failed(..) => summary.errored += 1,
                }
                summary.discrepancies += verdict.discrepancy_count();
                summary
            })
    }

    pub fn passed(&self) -> bool {
        self.passed == self.files
    }
}

/// Runs the whole pipeline for one sample program: extraction, interpretation, analysis,
/// normalization and matching. Directives are fully read before the analyzer is consulted.
pub fn verify_file(path: &Path, analyzer: &dyn Analyzer) -> Result<Verdict> {
    debug!("verifying {}", path.display());
    verify_extracted(directives::extract_file(path)?, path, analyzer)
}

/// Like verify_file, but for source text that is already in memory.
pub fn verify_source(source: &str, path: &Path, analyzer: &dyn Analyzer) -> Result<Verdict> {
    verify_extracted(directives::extract(source)?, path, analyzer)
}

fn verify_extracted(
    source: ExtractedSource,
    path: &Path,
    analyzer: &dyn Analyzer,
) -> Result<Verdict> {
    let expected = expectations::interpret(&source)?;
    let output = analyzer.analyze(&AnalysisRequest {
        path,
        extra_args: &source.analyzer_flags,
    })?;
    let actual = findings::normalize(&output)?;
    Ok(oracle::match_findings(&expected, &actual))
}

/// Verifies each file independently and in parallel. A file that fails to verify does not
/// stop the others. Verdicts come back in path order.
pub fn run_suite(paths: &[PathBuf], analyzer: &dyn Analyzer) -> Vec<FileVerdict> {
    let mut verdicts: Vec<FileVerdict> = paths
        .par_iter()
        .map(|path| {
            let outcome = match verify_file(path, analyzer) {
                Ok(verdict) => FileOutcome::Checked(verdict),
                Err(e) => {
                    warn!("{}: {}", path.display(), e);
                    FileOutcome::Failed(e)
                }
            };
            FileVerdict {
                path: path.clone(),
                outcome,
            }
        })
        .collect();
    verdicts.sort_by(|a, b| a.path.cmp(&b.path));
    info!(
        "verified {} files, {} passed",
        verdicts.len(),
        verdicts.iter().filter(|v| v.passed()).count()
    );
    verdicts
}

/// Expands the given paths into the sample programs to verify: files are taken as they are,
/// directories are searched recursively for files with one of the given extensions.
/// The result is sorted and free of duplicates.
#[logfn_inputs(TRACE)]
pub fn discover(paths: &[PathBuf], extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for path in paths {
        if path.is_file() {
            found.push(path.clone());
            continue;
        }
        if !path.exists() {
            return Err(HarnessError::Io {
                path: path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
            });
        }
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.map_err(|e| HarnessError::Io {
                path: e.path().map_or_else(|| path.clone(), Path::to_path_buf),
                source: e.into(),
            })?;
            if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
                found.push(entry.into_path());
            }
        }
    }
    Ok(found.into_iter().sorted().dedup().collect())
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| extensions.iter().any(|e| e.trim_start_matches('.') == ext))
}
