// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.

// Somewhat arbitrary constants used to bound how long and how hard the harness waits on
// the analyzer.

/// The number of seconds an analyzer invocation may take before its verdict is a failure.
pub const ANALYZER_TIMEOUT_SECS_DEFAULT: u64 = 40;

/// How often a running analyzer process is checked for completion.
pub const POLL_INTERVAL_MILLIS: u64 = 10;

/// Bytes of analyzer stderr kept for the report when the analyzer fails.
pub const MAX_STDERR_BYTES: usize = 2_000;

/// Appended to a sample program's path to find its recorded findings.
pub const FINDINGS_SUFFIX_DEFAULT: &str = ".findings.json";
