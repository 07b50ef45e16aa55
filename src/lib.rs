// File: lib.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::new_without_default)]

pub mod cli;
pub mod desync_cli;
pub mod error;
pub mod mutator;
pub mod oracle;
pub mod poc;
pub mod rawrequest;
pub mod registry;
pub mod report;
pub mod scan;
pub mod service;
pub mod settings;
pub mod skip_cache;
pub mod technique;
pub mod technique_engine;
pub mod transport;
