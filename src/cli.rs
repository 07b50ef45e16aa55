// File: cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long = "log-level", default_value = "warn", global = true)]
    pub log_level: String,

    #[arg(
        short = 'v',
        long = "verbose",
        help = "Enable verbose output",
        global = true
    )]
    pub verbose: bool,

    #[arg(long = "no-color", help = "Disable colored output", global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Probe targets for request smuggling desync
    Scan(ScanArgs),
    /// List registered permutations and whether they are enabled
    Techniques(TechniquesArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    #[arg(short = 'i', long = "input", help = "File with one target URL per line")]
    pub input_file: Option<PathBuf>,

    #[arg(long = "target")]
    pub target_url: Option<String>,

    #[arg(
        short = 'r',
        long = "request",
        help = "Raw HTTP request used as the probe template"
    )]
    pub request_file: Option<PathBuf>,

    #[arg(short = 'o', long = "output", default_value = "smuggle_results")]
    pub output_dir: PathBuf,

    #[arg(long = "format", default_value = "jsonl", value_parser = ["jsonl", "json", "txt"])]
    pub output_format: String,

    #[arg(short = 'c', long = "concurrency", default_value_t = 4)]
    pub concurrency: usize,

    #[arg(long = "rate-limit", default_value_t = 20, help = "Requests per second")]
    pub rate_limit: u32,

    #[arg(long = "connect-timeout", default_value_t = 3000)]
    pub connect_timeout: u64,

    #[arg(long = "read-timeout", default_value_t = 8000)]
    pub read_timeout: u64,

    #[arg(long = "max-targets", default_value_t = 1000)]
    pub max_targets: usize,

    #[arg(
        long = "techniques",
        value_delimiter = ',',
        help = "Only run these permutations (e.g. vanilla,prefix1:9)"
    )]
    pub techniques: Vec<String>,

    #[arg(long = "disable", value_delimiter = ',', help = "Permutations to skip")]
    pub disable: Vec<String>,

    #[arg(long = "settings", help = "JSON file of flag overrides")]
    pub settings_file: Option<PathBuf>,

    #[arg(long = "keep-get", help = "Do not convert GET templates to POST")]
    pub keep_get: bool,

    #[arg(long = "swap-dash", help = "Send Transfer_Encoding instead of Transfer-Encoding")]
    pub swap_dash: bool,

    #[arg(long = "risky", help = "Use connection-poisoning malformed terminators")]
    pub risky: bool,

    #[arg(long = "pad-everything", help = "Prepend filler chunks to every body")]
    pub pad_everything: bool,

    #[arg(long = "skip-vulnerable-hosts")]
    pub skip_vulnerable_hosts: bool,

    #[arg(long = "skip-obsolete-permutations")]
    pub skip_obsolete_permutations: bool,

    #[arg(long = "skip-straight-to-poc", help = "Doubles the noise check")]
    pub skip_straight_to_poc: bool,

    #[arg(long = "gzip-victim", help = "Victim requests declare Transfer-Encoding: gzip")]
    pub gzip_victim: bool,

    #[arg(
        long = "live-log",
        help = "Append findings to <output>/findings_live.jsonl as they are found"
    )]
    pub live_log: bool,

    #[arg(long = "no-keepalive-check", help = "Probe targets even if they close connections")]
    pub no_keepalive_check: bool,

    #[arg(long = "i-have-authorization")]
    pub skip_authorization_check: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TechniquesArgs {
    #[arg(long = "settings", help = "JSON file of flag overrides")]
    pub settings_file: Option<PathBuf>,
}
