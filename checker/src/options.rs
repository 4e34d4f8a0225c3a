// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use crate::k_limits;

use clap::error::ErrorKind;
use clap::{value_parser, Arg, ArgAction, Command, Error};
use itertools::Itertools;
use mirai_annotations::*;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable with options that are applied before those on the command line.
pub const FLAGS_VARIABLE: &str = "TAINT_ORACLE_FLAGS";

/// Creates the clap::Command metadata for argument parsing.
fn make_options_parser() -> Command {
    // We could keep this around in a static, but we really do not expect
    // to construct this more than once per regular program run.
    Command::new("taint-oracle")
    .no_binary_name(true)
    // Options from the environment come first, later occurrences win.
    .args_override_self(true)
    .version(env!("CARGO_PKG_VERSION"))
    .about("Checks analyzer findings against the directives embedded in sample programs.")
    .after_help("The analyzer command follows `--`. An argument containing {file} receives the path of the sample program, otherwise the path is appended.")
    .arg(Arg::new("paths")
        .value_name("PATH")
        .num_args(1..)
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Sample programs, or directories to search for them."))
    .arg(Arg::new("replay")
        .long("replay")
        .action(ArgAction::SetTrue)
        .help("Use recorded findings instead of running an analyzer.")
        .long_help("The findings for each sample program are read from a file next to it, named like the program plus the findings suffix."))
    .arg(Arg::new("findings_suffix")
        .long("findings-suffix")
        .default_value(k_limits::FINDINGS_SUFFIX_DEFAULT)
        .help("Suffix of recorded findings files."))
    .arg(Arg::new("extension")
        .long("extension")
        .short('e')
        .action(ArgAction::Append)
        .help("File extension of sample programs found in directories. May be repeated.")
        .long_help("The default is swift."))
    .arg(Arg::new("format")
        .long("format")
        .value_parser(["text", "json"])
        .default_value("text")
        .help("Report format."))
    .arg(Arg::new("timeout")
        .long("timeout")
        .value_parser(value_parser!(u64))
        .help("The maximum number of seconds an analyzer run may take.")
        .long_help("The default is 40 seconds. A run that takes longer fails its sample program."))
    .arg(Arg::new("jobs")
        .long("jobs")
        .short('j')
        .value_parser(value_parser!(usize))
        .help("Number of sample programs verified in parallel."))
    .arg(Arg::new("quiet")
        .long("quiet")
        .short('q')
        .action(ArgAction::SetTrue)
        .help("Only report sample programs that do not pass."))
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Represents options passed to taint-oracle.
#[derive(Debug)]
pub struct Options {
    pub paths: Vec<PathBuf>,
    pub replay: bool,
    pub findings_suffix: String,
    pub extensions: Vec<String>,
    pub format: ReportFormat,
    pub analyzer_timeout: Duration,
    /// None means one job per core.
    pub jobs: Option<usize>,
    pub failures_only: bool,
    /// The analyzer program followed by its arguments.
    pub analyzer_command: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            paths: Vec::new(),
            replay: false,
            findings_suffix: k_limits::FINDINGS_SUFFIX_DEFAULT.to_string(),
            extensions: vec!["swift".to_string()],
            format: ReportFormat::Text,
            analyzer_timeout: Duration::from_secs(k_limits::ANALYZER_TIMEOUT_SECS_DEFAULT),
            jobs: None,
            failures_only: false,
            analyzer_command: Vec::new(),
        }
    }
}

/// Splits the contents of FLAGS_VARIABLE, if set, using unix shell quoting rules.
pub fn flags_from_env() -> Result<Vec<String>, String> {
    match std::env::var(FLAGS_VARIABLE) {
        Ok(flags) => shellwords::split(&flags)
            .map_err(|e| format!("Cannot parse {FLAGS_VARIABLE}: {e:?}")),
        Err(_) => Ok(Vec::new()),
    }
}

impl Options {
    /// Parse options from an argument string. The argument string will be split using unix
    /// shell escaping rules.
    pub fn parse_from_str(&mut self, s: &str) -> Result<(), Error> {
        let args = shellwords::split(s).map_err(|e| {
            make_options_parser().error(
                ErrorKind::InvalidValue,
                format!("Cannot parse argument string: {e:?}"),
            )
        })?;
        self.parse(&args)
    }

    /// Parses options from a list of strings. Any content beyond the leftmost `--` token
    /// is the analyzer command line.
    pub fn parse(&mut self, args: &[String]) -> Result<(), Error> {
        let mut own_args_end = args.len();
        if let Some((p, _)) = args.iter().find_position(|s| s.as_str() == "--") {
            own_args_end = p;
            self.analyzer_command = args[p + 1..].to_vec();
        }
        let matches = make_options_parser().try_get_matches_from(&args[0..own_args_end])?;

        self.paths = matches
            .get_many::<PathBuf>("paths")
            .map(|paths| paths.cloned().collect())
            .unwrap_or_default();
        self.replay = matches.get_flag("replay");
        if let Some(suffix) = matches.get_one::<String>("findings_suffix") {
            self.findings_suffix = suffix.clone();
        }
        if let Some(extensions) = matches.get_many::<String>("extension") {
            self.extensions = extensions.cloned().collect();
        }
        if let Some(format) = matches.get_one::<String>("format") {
            self.format = match format.as_str() {
                "text" => ReportFormat::Text,
                "json" => ReportFormat::Json,
                _ => assume_unreachable!(),
            };
        }
        if let Some(seconds) = matches.get_one::<u64>("timeout") {
            self.analyzer_timeout = Duration::from_secs(*seconds);
        }
        self.jobs = matches.get_one::<usize>("jobs").copied();
        self.failures_only = matches.get_flag("quiet");

        if self.replay && !self.analyzer_command.is_empty() {
            return Err(make_options_parser().error(
                ErrorKind::ArgumentConflict,
                "--replay cannot be combined with an analyzer command",
            ));
        }
        if !self.replay && self.analyzer_command.is_empty() {
            return Err(make_options_parser().error(
                ErrorKind::MissingRequiredArgument,
                "either --replay or an analyzer command after `--` is required",
            ));
        }
        Ok(())
    }
}
