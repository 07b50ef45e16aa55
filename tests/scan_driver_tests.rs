// File: scan_driver_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

mod common;

use async_trait::async_trait;
use common::{example_service, sample_get, sample_post, ScriptedTransport};
use pretty_assertions::assert_eq;
use smuggleprobe::error::{ProbeError, ProbeResult};
use smuggleprobe::oracle::{Classification, ProbeOutcome};
use smuggleprobe::poc::build_poc;
use smuggleprobe::rawrequest::RawRequest;
use smuggleprobe::registry::PermutationRegistry;
use smuggleprobe::report::MemorySink;
use smuggleprobe::scan::{ChunkedPocScan, ConfiguredScan, ScanContext, ScanDriver, WorkingSet};
use smuggleprobe::service::{Protocol, ServiceEndpoint};
use smuggleprobe::settings::{
    FlagStore, Settings, SKIP_OBSOLETE_PERMUTATIONS, SKIP_VULNERABLE_HOSTS,
};
use smuggleprobe::technique::{Configuration, Technique, TechniqueId};
use smuggleprobe::technique_engine::HeaderObfuscationEngine;
use std::sync::{Arc, Mutex};

/// Confirms on a fixed set of techniques and records every configuration it sees.
struct RecordingScan {
    confirm: Vec<TechniqueId>,
    fail_on: Option<TechniqueId>,
    seen: Mutex<Vec<Configuration>>,
}

impl RecordingScan {
    fn confirming(confirm: &[TechniqueId]) -> Self {
        Self {
            confirm: confirm.to_vec(),
            fail_on: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen_ids(&self) -> Vec<TechniqueId> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .flat_map(|c| c.iter().copied().collect::<Vec<_>>())
            .collect()
    }
}

#[async_trait]
impl ConfiguredScan for RecordingScan {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn run(
        &self,
        _ctx: &ScanContext,
        _request: &RawRequest,
        _service: &ServiceEndpoint,
        config: &Configuration,
    ) -> ProbeResult<ProbeOutcome> {
        self.seen.lock().unwrap().push(config.clone());
        if let Some(fail) = self.fail_on {
            if config.contains(&fail) {
                return Err(ProbeError::PocConstruction(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "buffer exhausted",
                )));
            }
        }
        let mut outcome = ProbeOutcome::no_signal();
        if self.confirm.iter().any(|id| config.contains(id)) {
            outcome.classification = Classification::Confirmed;
        }
        Ok(outcome)
    }
}

fn ids() -> Vec<TechniqueId> {
    vec![
        Technique::Vanilla.into(),
        Technique::DualChunk.into(),
        Technique::LazyGrep.into(),
        TechniqueId::with_param(Technique::Prefix1, 0x09),
    ]
}

fn driver_with(settings: Arc<Settings>, transport: Arc<ScriptedTransport>) -> ScanDriver {
    let mut registry = PermutationRegistry::new(settings.clone());
    for id in ids() {
        registry.register(id);
    }
    let ctx = ScanContext::with_registry(
        settings,
        Arc::new(HeaderObfuscationEngine::new()),
        transport,
        Arc::new(MemorySink::new()),
        Arc::new(registry),
    );
    ScanDriver::new(Arc::new(ctx))
}

fn driver(settings: Arc<Settings>) -> ScanDriver {
    driver_with(settings, Arc::new(ScriptedTransport::new(200)))
}

#[tokio::test]
async fn test_runs_every_registered_technique_in_order() {
    let driver = driver(Arc::new(Settings::new()));
    let scan = RecordingScan::confirming(&[]);

    let summary = driver
        .scan(&sample_post(), &example_service(), &scan)
        .await
        .unwrap();

    assert_eq!(scan.seen_ids(), ids());
    assert_eq!(summary.attempted, ids());
    assert!(summary.confirmed.is_empty());
    assert!(!summary.abandoned);
    for config in scan.seen.lock().unwrap().iter() {
        assert_eq!(config.len(), 1);
    }
}

#[tokio::test]
async fn test_disabled_toggle_is_never_run() {
    let driver = driver(Arc::new(Settings::new()));
    let dualchunk: TechniqueId = Technique::DualChunk.into();
    driver.context().registry.set_enabled(&dualchunk, false);
    let scan = RecordingScan::confirming(&[]);

    let summary = driver
        .scan(&sample_post(), &example_service(), &scan)
        .await
        .unwrap();

    assert!(!scan.seen_ids().contains(&dualchunk));
    assert_eq!(summary.attempted.len(), ids().len() - 1);
}

#[tokio::test]
async fn test_confirmed_techniques_are_memoized_per_endpoint() {
    let driver = driver(Arc::new(Settings::new()));
    let lazygrep: TechniqueId = Technique::LazyGrep.into();
    let scan = RecordingScan::confirming(&[lazygrep]);

    let summary = driver
        .scan(&sample_post(), &example_service(), &scan)
        .await
        .unwrap();

    assert_eq!(summary.confirmed, vec![lazygrep]);
    // without a skip policy the memo does not narrow anything
    assert_eq!(driver.working_set(&example_service()), WorkingSet::Full(ids()));
}

#[tokio::test]
async fn test_skip_obsolete_stops_and_restricts_later_scans() {
    let settings = Arc::new(Settings::new());
    settings.set_flag(SKIP_OBSOLETE_PERMUTATIONS, true);
    let driver = driver(settings);
    let dualchunk: TechniqueId = Technique::DualChunk.into();

    let first = RecordingScan::confirming(&[dualchunk]);
    let summary = driver
        .scan(&sample_post(), &example_service(), &first)
        .await
        .unwrap();
    assert_eq!(summary.attempted, vec![Technique::Vanilla.into(), dualchunk]);

    assert_eq!(
        driver.working_set(&example_service()),
        WorkingSet::Restricted(vec![dualchunk])
    );

    let second = RecordingScan::confirming(&[]);
    driver
        .scan(&sample_post(), &example_service(), &second)
        .await
        .unwrap();
    assert_eq!(second.seen_ids(), vec![dualchunk]);

    // a different port is a different endpoint
    let other = ServiceEndpoint::new(Protocol::Https, "example.com", 443);
    assert_eq!(driver.working_set(&other), WorkingSet::Full(ids()));
}

#[tokio::test]
async fn test_vanilla_confirmation_narrows_other_requests_to_same_target() {
    let settings = Arc::new(Settings::new());
    settings.set_flag(SKIP_OBSOLETE_PERMUTATIONS, true);
    let driver = driver(settings);
    let vanilla: TechniqueId = Technique::Vanilla.into();

    driver
        .scan(&sample_post(), &example_service(), &RecordingScan::confirming(&[vanilla]))
        .await
        .unwrap();

    let later = RecordingScan::confirming(&[]);
    let summary = driver
        .scan(&sample_get("/search?q=1"), &example_service(), &later)
        .await
        .unwrap();

    assert_eq!(later.seen_ids(), vec![vanilla]);
    assert_eq!(summary.attempted, vec![vanilla]);
}

#[tokio::test]
async fn test_skip_vulnerable_hosts_abandons() {
    let settings = Arc::new(Settings::new());
    settings.set_flag(SKIP_VULNERABLE_HOSTS, true);
    let driver = driver(settings);
    let vanilla: TechniqueId = Technique::Vanilla.into();

    driver
        .scan(&sample_post(), &example_service(), &RecordingScan::confirming(&[vanilla]))
        .await
        .unwrap();

    let later = RecordingScan::confirming(&[]);
    let summary = driver
        .scan(&sample_post(), &example_service(), &later)
        .await
        .unwrap();

    assert!(summary.abandoned);
    assert!(summary.attempted.is_empty());
    assert!(later.seen_ids().is_empty());
}

#[tokio::test]
async fn test_fatal_error_propagates() {
    let driver = driver(Arc::new(Settings::new()));
    let lazygrep: TechniqueId = Technique::LazyGrep.into();
    let scan = RecordingScan {
        confirm: Vec::new(),
        fail_on: Some(lazygrep),
        seen: Mutex::new(Vec::new()),
    };

    let result = driver.scan(&sample_post(), &example_service(), &scan).await;

    assert!(matches!(result, Err(ProbeError::PocConstruction(_))));
    assert_eq!(scan.seen_ids().last(), Some(&lazygrep));
}

#[tokio::test]
async fn test_chunked_poc_scan_pipelines_poc_then_victims() {
    let transport = Arc::new(ScriptedTransport::new(200));
    let settings = Arc::new(Settings::new());
    let vanilla: TechniqueId = Technique::Vanilla.into();
    let driver = driver_with(settings, transport.clone());
    driver.context().registry.restrict_to(&[vanilla]);

    let summary = driver
        .scan(&sample_post(), &example_service(), &ChunkedPocScan::new(false))
        .await
        .unwrap();
    assert_eq!(summary.attempted, vec![vanilla]);

    let victim = sample_post().set_header("Connection", "keep-alive");
    let expected = build_poc(
        &driver.context().mutator,
        &victim,
        &example_service(),
        &Configuration::single(vanilla),
    )
    .unwrap();

    let batches = transport.pipelined.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0], expected.bytes);
    assert_eq!(batches[0][1], victim.as_bytes().to_vec());
    assert_eq!(batches[0][2], victim.as_bytes().to_vec());
}

#[tokio::test]
async fn test_gzip_victim_declares_gzip_encoding() {
    let transport = Arc::new(ScriptedTransport::new(200));
    let settings = Arc::new(Settings::new());
    let driver = driver_with(settings, transport.clone());
    driver
        .context()
        .registry
        .restrict_to(&[Technique::Vanilla.into()]);

    let strategy = ChunkedPocScan::new(true);
    assert_eq!(strategy.name(), "chunked-poc-gzip");
    driver
        .scan(&sample_post(), &example_service(), &strategy)
        .await
        .unwrap();

    let batches = transport.pipelined.lock().unwrap();
    let victim = RawRequest::new(batches[0][1].clone());
    assert_eq!(victim.header("Transfer-Encoding").as_deref(), Some("gzip"));
    assert_ne!(victim.body(), b"user=me");
}

#[tokio::test]
async fn test_left_alive_requires_keepalive_header() {
    let driver = driver(Arc::new(Settings::new()));
    let response = driver.left_alive(&sample_post(), &example_service()).await;
    // scripted responses carry no Connection header
    assert!(response.is_none());
}
