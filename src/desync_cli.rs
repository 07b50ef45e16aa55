// File: desync_cli.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::cli::{ScanArgs, TechniquesArgs};
use crate::rawrequest::RawRequest;
use crate::registry::PermutationRegistry;
use crate::report::{
    display_summary, generate_text_report, Finding, JsonlSink, LogSink, MemorySink, MultiSink,
};
use crate::scan::{ChunkedPocScan, ScanContext, ScanDriver, ScanSummary};
use crate::service::ServiceEndpoint;
use crate::settings::{
    FlagStore, Settings, CONVERT_GET_TO_POST, PAD_EVERYTHING, RISKY_MODE,
    SKIP_OBSOLETE_PERMUTATIONS, SKIP_STRAIGHT_TO_POC, SKIP_VULNERABLE_HOSTS,
    SWAP_DASH_WITH_UNDERSCORE,
};
use crate::technique::TechniqueId;
use crate::technique_engine::{HeaderObfuscationEngine, TechniqueEngine};
use crate::transport::{RawTransport, Transport, TransportConfig};
use anyhow::{bail, Context, Result};
use colored::*;
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

pub fn build_settings(args: &ScanArgs) -> Result<Arc<Settings>> {
    let settings = Arc::new(Settings::new());
    if let Some(path) = &args.settings_file {
        let count = settings.load_overrides(path)?;
        info!("Loaded {} setting override(s) from {}", count, path.display());
    }

    let switches = [
        (args.keep_get, CONVERT_GET_TO_POST, false),
        (args.swap_dash, SWAP_DASH_WITH_UNDERSCORE, true),
        (args.risky, RISKY_MODE, true),
        (args.pad_everything, PAD_EVERYTHING, true),
        (args.skip_vulnerable_hosts, SKIP_VULNERABLE_HOSTS, true),
        (args.skip_obsolete_permutations, SKIP_OBSOLETE_PERMUTATIONS, true),
        (args.skip_straight_to_poc, SKIP_STRAIGHT_TO_POC, true),
    ];
    for (given, flag, value) in switches {
        if given {
            settings.set_flag(flag, value);
        }
    }
    Ok(settings)
}

pub fn parse_technique_list(raw: &[String]) -> Result<Vec<TechniqueId>> {
    raw.iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse::<TechniqueId>().map_err(anyhow::Error::msg))
        .collect()
}

pub fn apply_technique_filters(registry: &PermutationRegistry, args: &ScanArgs) -> Result<()> {
    let allowed = parse_technique_list(&args.techniques)?;
    if !allowed.is_empty() {
        registry.restrict_to(&allowed);
    }
    for id in parse_technique_list(&args.disable)? {
        registry.set_enabled(&id, false);
    }
    if registry.enabled().is_empty() {
        bail!("every permutation is disabled");
    }
    Ok(())
}

fn normalize_target(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        Some(trimmed.to_string())
    } else {
        Some(format!("http://{}", trimmed))
    }
}

fn load_targets(args: &ScanArgs) -> Result<Vec<String>> {
    let mut targets = Vec::new();

    if let Some(target) = &args.target_url {
        targets.extend(normalize_target(target));
    }

    if let Some(input_file) = &args.input_file {
        let file = File::open(input_file)
            .with_context(|| format!("opening {}", input_file.display()))?;
        for line in BufReader::new(file).lines() {
            targets.extend(normalize_target(&line?));
        }
    } else if args.target_url.is_none() {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            targets.extend(normalize_target(&line?));
        }
    }

    if targets.len() > args.max_targets {
        targets.truncate(args.max_targets);
        println!("Limited to {} targets", args.max_targets);
    }

    Ok(targets)
}

/// Request template for `target`: the `--request` file with its Host header
/// pointed at the target, or a plain GET for the URL's path.
pub fn request_for_target(
    template: Option<&RawRequest>,
    target: &str,
    service: &ServiceEndpoint,
) -> Result<RawRequest> {
    match template {
        Some(template) => Ok(template.set_header("Host", &service.host_header())),
        None => {
            let url = Url::parse(target)?;
            let mut path = url.path().to_string();
            if let Some(query) = url.query() {
                path.push('?');
                path.push_str(query);
            }
            Ok(RawRequest::get(&service.host_header(), &path))
        }
    }
}

fn confirm_authorization() -> Result<bool> {
    println!("{}", "=".repeat(80).bright_red());
    println!("{}", "HTTP Request Smuggling Probe".bright_red().bold());
    println!("{}", "=".repeat(80).bright_red());
    println!();
    println!(
        "{}",
        "This tool sends deliberately malformed requests that can:".bright_yellow()
    );
    println!("   - Desynchronise front-end and back-end connections");
    println!("   - Interfere with other users' traffic on shared connections");
    println!("   - Trigger security alerts and incident response");
    println!();
    println!(
        "{}",
        "Do you have explicit written authorization to test all target systems? (yes/NO):"
            .bright_yellow()
    );
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("yes"))
}

pub async fn run_scan(args: ScanArgs) -> Result<()> {
    if !args.skip_authorization_check && !confirm_authorization()? {
        println!("{}", "Authorization not confirmed. Exiting.".red());
        println!("   Use --i-have-authorization only if you have proper authorization.");
        return Ok(());
    }

    let targets = load_targets(&args)?;
    if targets.is_empty() {
        eprintln!(
            "{}",
            "No targets specified. Use --target, -i or pipe URLs on stdin".red()
        );
        return Ok(());
    }
    println!("Loaded {} target(s)", targets.len());

    let template = match &args.request_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading request template {}", path.display()))?;
            Some(RawRequest::from_text(&raw))
        }
        None => None,
    };

    std::fs::create_dir_all(&args.output_dir)?;

    let settings = build_settings(&args)?;
    let engine: Arc<dyn TechniqueEngine> = Arc::new(HeaderObfuscationEngine::new());
    let transport: Arc<dyn Transport> = Arc::new(RawTransport::new(TransportConfig {
        connect_timeout: Duration::from_millis(args.connect_timeout),
        read_timeout: Duration::from_millis(args.read_timeout),
        requests_per_second: NonZeroU32::new(args.rate_limit).unwrap_or(NonZeroU32::MIN),
        ..TransportConfig::default()
    }));
    let memory = Arc::new(MemorySink::new());
    let mut sink = MultiSink::new()
        .with(Box::new(LogSink))
        .with(Box::new(Arc::clone(&memory)));
    if args.live_log {
        let path = args.output_dir.join("findings_live.jsonl");
        let live = JsonlSink::create(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        sink = sink.with(Box::new(live));
    }

    let ctx = Arc::new(ScanContext::new(
        settings,
        engine,
        transport,
        Arc::new(sink),
    ));
    apply_technique_filters(&ctx.registry, &args)?;
    println!(
        "{} of {} permutations enabled",
        ctx.registry.enabled().len(),
        ctx.registry.len()
    );

    let driver = Arc::new(ScanDriver::new(ctx));
    let strategy = Arc::new(ChunkedPocScan::new(args.gzip_victim));

    let pb = ProgressBar::new(targets.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>7}/{len:7} {msg}",
            )?
            .progress_chars("##-"),
    );

    let semaphore = Arc::new(Semaphore::new(args.concurrency.max(1)));
    let mut tasks = FuturesUnordered::new();

    for target in targets {
        let driver = Arc::clone(&driver);
        let strategy = Arc::clone(&strategy);
        let semaphore = Arc::clone(&semaphore);
        let pb = pb.clone();
        let template = template.clone();
        let keepalive_check = !args.no_keepalive_check;

        tasks.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.ok();
            pb.set_message(format!("Scanning {}", target));
            let summary = scan_one(
                &driver,
                strategy.as_ref(),
                &target,
                template.as_ref(),
                keepalive_check,
            )
            .await;
            pb.inc(1);
            summary
        }));
    }

    let mut summaries = Vec::new();
    while let Some(task) = tasks.next().await {
        match task {
            Ok(Some(summary)) => summaries.push(summary),
            Ok(None) => {}
            Err(e) => warn!("Task failed: {}", e),
        }
    }
    pb.finish_with_message("Scan completed");

    let attempted: usize = summaries.iter().map(|s| s.attempted.len()).sum();
    info!("{} probe(s) across {} target(s)", attempted, summaries.len());

    let findings = memory.findings();
    display_summary(&findings);
    let path = save_results(&findings, &args.output_dir, &args.output_format)?;
    println!("\nResults saved to: {}", path);
    Ok(())
}

async fn scan_one(
    driver: &ScanDriver,
    strategy: &ChunkedPocScan,
    target: &str,
    template: Option<&RawRequest>,
    keepalive_check: bool,
) -> Option<ScanSummary> {
    let service = match ServiceEndpoint::from_url(target) {
        Ok(service) => service,
        Err(e) => {
            warn!("Skipping {}: {}", target, e);
            return None;
        }
    };
    let request = match request_for_target(template, target, &service) {
        Ok(request) => request,
        Err(e) => {
            warn!("Skipping {}: {}", target, e);
            return None;
        }
    };

    if keepalive_check && driver.left_alive(&request, &service).await.is_none() {
        warn!(
            "Skipping {}: connection is not kept alive, pipelined probes cannot work",
            target
        );
        return None;
    }

    match driver.scan(&request, &service, strategy).await {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!("Scan of {} aborted: {}", target, e);
            None
        }
    }
}

pub fn save_results(findings: &[Finding], output_dir: &Path, format: &str) -> Result<String> {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let filename = output_dir
        .join(format!("smuggle_results_{}.{}", timestamp, format))
        .display()
        .to_string();
    let mut file = File::create(&filename)?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(findings)?;
            file.write_all(json.as_bytes())?;
        }
        "txt" => {
            file.write_all(generate_text_report(findings).as_bytes())?;
        }
        _ => {
            for finding in findings {
                writeln!(file, "{}", serde_json::to_string(finding)?)?;
            }
        }
    }
    Ok(filename)
}

pub fn list_techniques(args: TechniquesArgs) -> Result<()> {
    let settings = Arc::new(Settings::new());
    if let Some(path) = &args.settings_file {
        settings.load_overrides(path)?;
    }
    let engine = HeaderObfuscationEngine::new();
    let registry = PermutationRegistry::with_defaults(settings, &engine.special_chars());
    for id in registry.ids() {
        let state = if registry.is_enabled(id) {
            "enabled".green()
        } else {
            "disabled".red()
        };
        println!("{:<20} {}", id.to_string(), state);
    }
    Ok(())
}
