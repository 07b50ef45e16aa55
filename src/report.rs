// File: report.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::service::ServiceEndpoint;
use crate::technique::Configuration;
use crate::transport::HttpResponse;
use chrono::{DateTime, Utc};
use colored::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    pub technique: String,
    pub configuration: Configuration,
    pub service: ServiceEndpoint,
    pub confirmed: bool,
    pub noisy: bool,
    pub baseline_status: u16,
    pub cleanup: HttpResponse,
    pub miner: HttpResponse,
    pub victim: HttpResponse,
    pub timestamp: DateTime<Utc>,
}

/// Destination for findings. Called from concurrently running scan units.
pub trait FindingSink: Send + Sync {
    fn report(&self, finding: &Finding);
}

impl<T: FindingSink + ?Sized> FindingSink for std::sync::Arc<T> {
    fn report(&self, finding: &Finding) {
        (**self).report(finding);
    }
}

/// Logs each finding at `info`.
#[derive(Debug, Default)]
pub struct LogSink;

impl FindingSink for LogSink {
    fn report(&self, finding: &Finding) {
        info!(
            "{} on {} (baseline={} cleanup={} miner={} victim={})",
            finding.title,
            finding.service,
            finding.baseline_status,
            finding.cleanup.status,
            finding.miner.status,
            finding.victim.status
        );
    }
}

/// Keeps findings in memory; the CLI drains it for the summary and result files.
#[derive(Debug, Default)]
pub struct MemorySink {
    findings: Mutex<Vec<Finding>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn findings(&self) -> Vec<Finding> {
        self.findings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.findings.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FindingSink for MemorySink {
    fn report(&self, finding: &Finding) {
        self.findings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(finding.clone());
    }
}

/// Appends one JSON object per finding as it arrives.
pub struct JsonlSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            writer: Mutex::new(BufWriter::new(File::create(path)?)),
        })
    }
}

impl FindingSink for JsonlSink {
    fn report(&self, finding: &Finding) {
        let line = match serde_json::to_string(finding) {
            Ok(line) => line,
            Err(e) => {
                warn!("Could not serialize finding '{}': {}", finding.title, e);
                return;
            }
        };
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!("Could not write finding '{}': {}", finding.title, e);
        }
    }
}

/// Fans a finding out to several sinks.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn FindingSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Box<dyn FindingSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl FindingSink for MultiSink {
    fn report(&self, finding: &Finding) {
        for sink in &self.sinks {
            sink.report(finding);
        }
    }
}

pub fn generate_text_report(findings: &[Finding]) -> String {
    let mut report = String::new();
    report.push_str("HTTP Request Smuggling Probe Report\n");
    report.push_str("===================================\n\n");

    if findings.is_empty() {
        report.push_str("No desync behaviour observed.\n");
        return report;
    }

    for finding in findings {
        report.push_str(&format!("{}\n", finding.title));
        report.push_str(&format!("  Target:        {}\n", finding.service));
        report.push_str(&format!("  Configuration: {}\n", finding.configuration.keys()));
        report.push_str(&format!(
            "  Statuses:      baseline={} cleanup={} miner={} victim={}\n",
            finding.baseline_status,
            finding.cleanup.status,
            finding.miner.status,
            finding.victim.status
        ));
        report.push_str(&format!("  Found at:      {}\n\n", finding.timestamp.to_rfc3339()));
    }
    report
}

pub fn display_summary(findings: &[Finding]) {
    println!("\nScan Summary");
    println!("================");

    if findings.is_empty() {
        println!("No desync behaviour observed");
        return;
    }

    let confirmed = findings.iter().filter(|f| f.confirmed).count();
    println!(
        "  {} confirmed, {} possible",
        confirmed.to_string().red().bold(),
        (findings.len() - confirmed).to_string().yellow()
    );

    for finding in findings {
        let title = if finding.confirmed {
            finding.title.red()
        } else {
            finding.title.yellow()
        };
        println!("  {} on {}", title, finding.service.to_string().cyan());
        if finding.noisy {
            println!("    {}", "target responses vary on their own; verify manually".dimmed());
        }
    }
}
