// File: main.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use smuggleprobe::cli::{Cli, Commands};
use smuggleprobe::desync_cli::{list_techniques, run_scan};
use std::str::FromStr;

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::from_str(&cli.log_level).unwrap_or(LevelFilter::Warn)
    };

    if let Err(e) = SimpleLogger::new()
        .with_level(LevelFilter::Warn)
        .with_module_level("smuggleprobe", level)
        .with_colors(!cli.no_color)
        .init()
    {
        eprintln!("Failed to initialise logger: {}", e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }
    init_logging(&cli);

    match cli.command {
        Commands::Scan(args) => run_scan(args).await,
        Commands::Techniques(args) => list_techniques(args),
    }
}
