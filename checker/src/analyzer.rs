// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::errors::AnalyzerFailure;
use crate::k_limits;

use log_derive::logfn_inputs;
use std::ffi::OsString;
use std::fmt::{Debug, Formatter};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Placeholder in analyzer arguments that is replaced with the path of the sample program.
pub const FILE_PLACEHOLDER: &str = "{file}";

/// What the harness asks of the analyzer for one sample program.
#[derive(Clone, Copy, Debug)]
pub struct AnalysisRequest<'a> {
    pub path: &'a Path,
    /// Arguments requested by the sample program itself via "// ANALYZER_FLAGS".
    pub extra_args: &'a [String],
}

/// The external analyzer. Implementations return its raw output, which the finding
/// normalizer turns into findings.
pub trait Analyzer: Sync {
    fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<String, AnalyzerFailure>;
}

impl<F> Analyzer for F
where
    F: Fn(&AnalysisRequest<'_>) -> Result<String, AnalyzerFailure> + Sync,
{
    fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<String, AnalyzerFailure> {
        self(request)
    }
}

/// Runs the analyzer as a child process and takes its standard output as the findings.
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandAnalyzer {
    pub fn new(program: String, args: Vec<String>) -> CommandAnalyzer {
        CommandAnalyzer {
            program,
            args,
            timeout: Duration::from_secs(k_limits::ANALYZER_TIMEOUT_SECS_DEFAULT),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> CommandAnalyzer {
        self.timeout = timeout;
        self
    }

    /// The arguments for one invocation. Per-file arguments go just before the file path.
    pub fn command_line(&self, request: &AnalysisRequest<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(self.args.len() + 1);
        let mut placed = false;
        for arg in &self.args {
            if arg.contains(FILE_PLACEHOLDER) {
                if !placed {
                    args.extend(request.extra_args.iter().map(OsString::from));
                    placed = true;
                }
                let path = request.path.to_string_lossy();
                args.push(arg.replace(FILE_PLACEHOLDER, &path).into());
            } else {
                args.push(arg.into());
            }
        }
        if !placed {
            args.extend(request.extra_args.iter().map(OsString::from));
            args.push(request.path.as_os_str().to_owned());
        }
        args
    }

    fn spawn(&self, args: &[OsString], stdout: &File, stderr: &File) -> Result<Child, AnalyzerFailure> {
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::from(stderr.try_clone()?))
            .spawn()
            .map_err(|source| AnalyzerFailure::Spawn {
                program: self.program.clone(),
                source,
            })
    }

    /// Polls the child until it exits, killing it once the timeout has passed.
    fn wait(&self, child: &mut Child) -> Result<ExitStatus, AnalyzerFailure> {
        let started_at = Instant::now();
        let poll_interval = Duration::from_millis(k_limits::POLL_INTERVAL_MILLIS);
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if started_at.elapsed() >= self.timeout {
                warn!("killing `{}` after {:?}", self.program, started_at.elapsed());
                // The child may have exited in the meantime, in which case kill fails harmlessly.
                let _ = child.kill();
                child.wait()?;
                return Err(AnalyzerFailure::TimedOut {
                    elapsed: started_at.elapsed(),
                });
            }
            thread::sleep(poll_interval);
        }
    }
}

impl Debug for CommandAnalyzer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}

impl Analyzer for CommandAnalyzer {
    #[logfn_inputs(TRACE)]
    fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<String, AnalyzerFailure> {
        let args = self.command_line(request);
        debug!("running {} {:?}", self.program, args);
        // Files rather than pipes, so a chatty analyzer cannot block on a full pipe while
        // we are polling it.
        let mut stdout = tempfile::tempfile()?;
        let mut stderr = tempfile::tempfile()?;
        let mut child = self.spawn(&args, &stdout, &stderr)?;
        let status = self.wait(&mut child)?;
        if !status.success() {
            return Err(AnalyzerFailure::Exited {
                program: self.program.clone(),
                exit_code: status.code(),
                stderr: stderr_excerpt(&mut stderr),
            });
        }
        read_back(&mut stdout, usize::MAX)
    }
}

/// Reads the findings an earlier analyzer run recorded next to each sample program.
#[derive(Debug)]
pub struct ReplayAnalyzer {
    suffix: String,
}

impl ReplayAnalyzer {
    pub fn new(suffix: &str) -> ReplayAnalyzer {
        ReplayAnalyzer {
            suffix: suffix.to_string(),
        }
    }

    pub fn recording_for(&self, path: &Path) -> PathBuf {
        let mut recording = path.as_os_str().to_owned();
        recording.push(&self.suffix);
        PathBuf::from(recording)
    }
}

impl Default for ReplayAnalyzer {
    fn default() -> Self {
        Self::new(k_limits::FINDINGS_SUFFIX_DEFAULT)
    }
}

impl Analyzer for ReplayAnalyzer {
    #[logfn_inputs(TRACE)]
    fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<String, AnalyzerFailure> {
        let path = self.recording_for(request.path);
        std::fs::read_to_string(&path).map_err(|source| AnalyzerFailure::Replay { path, source })
    }
}

/// The start of what the analyzer wrote to stderr. Reading it is best effort: the exit
/// status is reported either way.
pub fn stderr_excerpt(file: &mut File) -> String {
    read_back(file, k_limits::MAX_STDERR_BYTES).unwrap_or_else(|e| {
        warn!("could not read back the analyzer's stderr: {e}");
        String::new()
    })
}

fn read_back(file: &mut File, limit: usize) -> Result<String, AnalyzerFailure> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.by_ref().take(limit as u64).read_to_end(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
