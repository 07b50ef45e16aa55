// File: oracle_tests.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

mod common;

use common::{example_service, sample_post, ScriptedTransport};
use pretty_assertions::assert_eq;
use smuggleprobe::oracle::{Classification, Oracle, NOISE_CHECKS, NOISE_CHECKS_FAST};
use smuggleprobe::report::MemorySink;
use smuggleprobe::settings::{FlagStore, Settings, SKIP_STRAIGHT_TO_POC};
use smuggleprobe::skip_cache::SkipCache;
use smuggleprobe::technique::{Configuration, Technique};
use std::sync::Arc;

struct Harness {
    transport: Arc<ScriptedTransport>,
    sink: Arc<MemorySink>,
    skip_cache: Arc<SkipCache>,
    settings: Arc<Settings>,
    oracle: Oracle,
}

fn harness(transport: ScriptedTransport) -> Harness {
    let transport = Arc::new(transport);
    let sink = Arc::new(MemorySink::new());
    let skip_cache = Arc::new(SkipCache::new());
    let settings = Arc::new(Settings::new());
    let oracle = Oracle::new(
        transport.clone(),
        settings.clone(),
        sink.clone(),
        skip_cache.clone(),
    );
    Harness {
        transport,
        sink,
        skip_cache,
        settings,
        oracle,
    }
}

fn vanilla() -> Configuration {
    Configuration::single(Technique::Vanilla.into())
}

#[tokio::test]
async fn test_confirmed_when_miner_matches_victim() {
    let h = harness(ScriptedTransport::new(200).queue_pipeline(&[404, 404, 200]));

    let outcome = h
        .oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;

    assert_eq!(outcome.classification, Classification::Confirmed);
    assert!(!outcome.noisy);
    assert_eq!(
        outcome.title.as_deref(),
        Some("HTTP Request Smuggling Confirmed: probe -vanilla")
    );

    let findings = h.sink.findings();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].miner.status, 404);
    assert_eq!(findings[0].victim.status, 404);
    assert_eq!(findings[0].cleanup.status, 200);
    assert!(findings[0].confirmed);
    assert!(h.skip_cache.host_confirmed("example.com"));

    // baseline + three clean cleanups; attack batch then the noise batch
    assert_eq!(h.transport.send_count(), 4);
    assert_eq!(h.transport.pipeline_sizes(), vec![3, NOISE_CHECKS]);
    let batch = &h.transport.pipelined.lock().unwrap()[0];
    assert_eq!(batch[0], b"SETUP".to_vec());
    assert_eq!(batch[1], sample_post().into_bytes());
    assert_eq!(batch[2], sample_post().into_bytes());
}

#[tokio::test]
async fn test_cleanup_stops_at_first_divergence() {
    // baseline 200, first cleanup 404 -> one extra drain request, then stop
    let h = harness(
        ScriptedTransport::new(200)
            .queue_send(200)
            .queue_send(404)
            .queue_pipeline(&[404, 200, 200]),
    );

    let outcome = h
        .oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;

    assert_eq!(outcome.classification, Classification::Confirmed);
    let statuses = outcome.statuses.unwrap();
    assert_eq!((statuses.cleanup, statuses.miner, statuses.victim), (404, 404, 200));
    assert_eq!(h.transport.send_count(), 3);
}

#[tokio::test]
async fn test_noisy_target_gets_marker() {
    let h = harness(
        ScriptedTransport::new(200)
            .queue_pipeline(&[404, 404, 200])
            .queue_pipeline(&[200, 200, 200, 503, 200, 200, 200]),
    );

    let outcome = h
        .oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;

    assert!(outcome.noisy);
    assert_eq!(
        outcome.title.as_deref(),
        Some("HTTP Request Smuggling Confirmed (dodgy): probe -vanilla")
    );
    assert!(h.sink.findings()[0].noisy);
}

#[tokio::test]
async fn test_fast_track_doubles_noise_check() {
    let h = harness(ScriptedTransport::new(200).queue_pipeline(&[404, 404, 200]));
    h.settings.set_flag(SKIP_STRAIGHT_TO_POC, true);

    h.oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;

    assert_eq!(h.transport.pipeline_sizes(), vec![3, NOISE_CHECKS_FAST]);
}

#[tokio::test]
async fn test_short_noise_batch_counts_as_divergent() {
    let h = harness(
        ScriptedTransport::new(200)
            .queue_pipeline(&[404, 404, 200])
            .queue_pipeline(&[200, 200]),
    );

    let outcome = h
        .oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;

    assert!(outcome.noisy);
}

#[tokio::test]
async fn test_possible_is_reported_without_host_memo() {
    let h = harness(ScriptedTransport::new(200).queue_pipeline(&[404, 500, 200]));

    let outcome = h
        .oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;

    assert_eq!(outcome.classification, Classification::Possible);
    assert_eq!(
        outcome.title.as_deref(),
        Some("HTTP Request Smuggling maybe: probe -vanilla")
    );
    assert_eq!(h.sink.len(), 1);
    assert!(!h.sink.findings()[0].confirmed);
    assert!(!h.skip_cache.host_confirmed("example.com"));
}

#[tokio::test]
async fn test_throttled_batch_is_not_evidence() {
    let h = harness(ScriptedTransport::new(200).queue_pipeline(&[429, 200, 200]));

    let outcome = h
        .oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;

    assert_eq!(outcome.classification, Classification::Inconclusive);
    assert!(h.sink.is_empty());
    assert_eq!(h.transport.pipeline_sizes(), vec![3]);
}

#[tokio::test]
async fn test_missing_pipelined_responses_are_inconclusive() {
    let h = harness(ScriptedTransport::new(200).queue_pipeline(&[404]));

    let outcome = h
        .oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;

    assert_eq!(outcome.classification, Classification::Inconclusive);
    assert!(h.sink.is_empty());
}

#[tokio::test]
async fn test_stable_target_is_no_signal() {
    let h = harness(ScriptedTransport::new(200));

    let outcome = h
        .oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;

    assert_eq!(outcome.classification, Classification::NoSignal);
    assert!(h.sink.is_empty());
}

#[tokio::test]
async fn test_transport_failures_become_no_signal() {
    let h = harness(ScriptedTransport::new(200).queue_send_error());
    let outcome = h
        .oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;
    assert_eq!(outcome.classification, Classification::NoSignal);
    assert!(outcome.statuses.is_none());
    assert!(h.transport.pipeline_sizes().is_empty());

    let h = harness(ScriptedTransport::new(200).queue_pipeline_error());
    let outcome = h
        .oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;
    assert_eq!(outcome.classification, Classification::NoSignal);

    // noise check failing after a confirmation aborts the report
    let h = harness(
        ScriptedTransport::new(200)
            .queue_pipeline(&[404, 404, 200])
            .queue_pipeline_error(),
    );
    let outcome = h
        .oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;
    assert_eq!(outcome.classification, Classification::NoSignal);
    assert!(h.sink.is_empty());
    assert!(!h.skip_cache.host_confirmed("example.com"));
}

#[tokio::test]
async fn test_failed_cleanup_send_is_sentinel_zero() {
    let h = harness(
        ScriptedTransport::new(200)
            .queue_send(200)
            .queue_send_error()
            .queue_pipeline(&[404, 404, 200]),
    );

    let outcome = h
        .oracle
        .send_poc("probe", b"SETUP", &sample_post(), &example_service(), &vanilla())
        .await;

    assert_eq!(outcome.classification, Classification::Inconclusive);
    assert_eq!(outcome.statuses.unwrap().cleanup, 0);
}
