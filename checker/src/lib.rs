// Copyright (c) Facebook, Inc. and its affiliates.
//
// This source code is licensed under the MIT license found in the
// LICENSE file in the root directory of this source tree.
//
// Sample programs used to exercise a taint and typestate analyzer carry their expected
// results in trailing comments. This crate reads those comments, obtains the findings the
// analyzer actually produces and reconciles the two into a verdict per sample program.

#[macro_use]
extern crate log;

pub mod analyzer;
pub mod directives;
pub mod errors;
pub mod expectations;
pub mod findings;
pub mod k_limits;
pub mod options;
pub mod oracle;
pub mod report;
pub mod suite;
