// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

use std::env;

use taint_oracle::analyzer::{Analyzer, CommandAnalyzer, ReplayAnalyzer};
use taint_oracle::options::{self, Options, ReportFormat};
use taint_oracle::report;
use taint_oracle::suite::{self, SuiteSummary};

/// Exit status when some sample program did not pass.
const EXIT_FAILURE: i32 = 1;
/// Exit status when the harness could not run at all.
const EXIT_USAGE: i32 = 2;

fn main() {
    // Initialize loggers.
    if env::var("TAINT_ORACLE_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("TAINT_ORACLE_LOG")
            .write_style("TAINT_ORACLE_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    // Options from the environment come first, so that the command line can override them.
    let mut command_line_arguments = match options::flags_from_env() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(EXIT_USAGE);
        }
    };
    command_line_arguments.extend(env::args().skip(1));

    let mut options = Options::default();
    if let Err(e) = options.parse(&command_line_arguments) {
        e.exit();
    }
    std::process::exit(run(&options));
}

fn run(options: &Options) -> i32 {
    let paths = match suite::discover(&options.paths, &options.extensions) {
        Ok(paths) if paths.is_empty() => {
            eprintln!("no sample programs found");
            return EXIT_USAGE;
        }
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("{e}");
            return EXIT_USAGE;
        }
    };

    let analyzer: Box<dyn Analyzer> = match options.analyzer_command.split_first() {
        Some((program, args)) if !options.replay => Box::new(
            CommandAnalyzer::new(program.clone(), args.to_vec())
                .with_timeout(options.analyzer_timeout),
        ),
        _ => Box::new(ReplayAnalyzer::new(&options.findings_suffix)),
    };

    let pool = match rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.unwrap_or(0))
        .build()
    {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("could not start worker threads: {e}");
            return EXIT_USAGE;
        }
    };
    let verdicts = pool.install(|| suite::run_suite(&paths, analyzer.as_ref()));

    match options.format {
        ReportFormat::Text => print!("{}", report::render_text(&verdicts, options.failures_only)),
        ReportFormat::Json => match report::render_json(&verdicts) {
            Ok(json) => print!("{json}"),
            Err(e) => {
                eprintln!("could not render the report: {e}");
                return EXIT_USAGE;
            }
        },
    }
    if SuiteSummary::of(&verdicts).passed() {
        0
    } else {
        EXIT_FAILURE
    }
}
