// File: oracle.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{ProbeError, TransportError};
use crate::rawrequest::RawRequest;
use crate::report::{Finding, FindingSink};
use crate::service::ServiceEndpoint;
use crate::settings::{FlagStore, SKIP_STRAIGHT_TO_POC};
use crate::skip_cache::SkipCache;
use crate::technique::Configuration;
use crate::transport::{HttpResponse, Transport};
use chrono::Utc;
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Throttling or connection failure: evidence neither way.
pub const INCONCLUSIVE_STATUSES: [u16; 4] = [0, 428, 429, 430];
pub const CLEANUP_ATTEMPTS: usize = 3;
pub const NOISE_CHECKS: usize = 7;
pub const NOISE_CHECKS_FAST: usize = 14;

pub const CONFIRMED_TITLE: &str = "HTTP Request Smuggling Confirmed";
pub const POSSIBLE_TITLE: &str = "HTTP Request Smuggling maybe";
pub const NOISY_MARKER: &str = " (dodgy)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    NoSignal,
    /// A throttling or failure status was involved. Handled exactly like
    /// `NoSignal`, kept distinct for reporting.
    Inconclusive,
    Confirmed,
    Possible,
}

impl Classification {
    pub fn label(&self) -> Option<&'static str> {
        match self {
            Classification::Confirmed => Some(CONFIRMED_TITLE),
            Classification::Possible => Some(POSSIBLE_TITLE),
            Classification::NoSignal | Classification::Inconclusive => None,
        }
    }

    pub fn is_finding(&self) -> bool {
        self.label().is_some()
    }
}

/// Interprets the cleanup / miner / victim status codes of one probe.
pub fn classify(cleanup: u16, miner: u16, victim: u16) -> Classification {
    if cleanup == miner && miner == victim {
        return Classification::NoSignal;
    }
    if [cleanup, miner, victim]
        .iter()
        .any(|status| INCONCLUSIVE_STATUSES.contains(status))
    {
        return Classification::Inconclusive;
    }
    if miner == victim || cleanup == miner {
        Classification::Confirmed
    } else if cleanup == victim {
        Classification::NoSignal
    } else {
        Classification::Possible
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTriple {
    pub baseline: u16,
    pub cleanup: u16,
    pub miner: u16,
    pub victim: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub classification: Classification,
    pub statuses: Option<StatusTriple>,
    pub noisy: bool,
    pub title: Option<String>,
}

impl ProbeOutcome {
    pub fn no_signal() -> Self {
        Self {
            classification: Classification::NoSignal,
            statuses: None,
            noisy: false,
            title: None,
        }
    }

    fn unreported(classification: Classification, statuses: StatusTriple) -> Self {
        Self {
            classification,
            statuses: Some(statuses),
            noisy: false,
            title: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.classification == Classification::Confirmed
    }
}

pub fn finding_title(
    classification: Classification,
    noisy: bool,
    name: &str,
    config: &Configuration,
) -> Option<String> {
    let mut title = classification.label()?.to_string();
    if noisy {
        title.push_str(NOISY_MARKER);
    }
    title.push_str(&format!(": {} -{}", name, config.keys()));
    Some(title)
}

/// Runs the baseline, pipelined batch and cleanup protocol and reports findings.
#[derive(Clone)]
pub struct Oracle {
    transport: Arc<dyn Transport>,
    settings: Arc<dyn FlagStore>,
    sink: Arc<dyn FindingSink>,
    skip_cache: Arc<SkipCache>,
}

impl Oracle {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: Arc<dyn FlagStore>,
        sink: Arc<dyn FindingSink>,
        skip_cache: Arc<SkipCache>,
    ) -> Self {
        Self {
            transport,
            settings,
            sink,
            skip_cache,
        }
    }

    /// Probes `service` with `setup` followed by two copies of `victim`.
    ///
    /// Never fails: transport problems end the probe with
    /// [`Classification::NoSignal`].
    pub async fn send_poc(
        &self,
        name: &str,
        setup: &[u8],
        victim: &RawRequest,
        service: &ServiceEndpoint,
        config: &Configuration,
    ) -> ProbeOutcome {
        match self.try_send_poc(name, setup, victim, service, config).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Probe {} [{}] on {} aborted: {}", name, config.keys(), service, e);
                ProbeOutcome::no_signal()
            }
        }
    }

    async fn try_send_poc(
        &self,
        name: &str,
        setup: &[u8],
        victim: &RawRequest,
        service: &ServiceEndpoint,
        config: &Configuration,
    ) -> Result<ProbeOutcome, ProbeError> {
        let baseline = self.transport.send(service, victim.as_bytes()).await?;
        trace!("Baseline for {}: {}", service, baseline.status);

        let batch = vec![
            setup.to_vec(),
            victim.as_bytes().to_vec(),
            victim.as_bytes().to_vec(),
        ];
        let mut results = self.transport.pipeline(service, &batch).await?.into_iter();
        let miner = results.next().unwrap_or_else(HttpResponse::unanswered);
        let victim_response = results.next().unwrap_or_else(HttpResponse::unanswered);

        let cleanup = self.cleanup(victim, service, baseline.status).await;

        let statuses = StatusTriple {
            baseline: baseline.status,
            cleanup: cleanup.status,
            miner: miner.status,
            victim: victim_response.status,
        };
        let classification = classify(statuses.cleanup, statuses.miner, statuses.victim);
        debug!(
            "{} [{}] on {}: cleanup={} miner={} victim={} -> {:?}",
            name,
            config.keys(),
            service,
            statuses.cleanup,
            statuses.miner,
            statuses.victim,
            classification
        );

        if !classification.is_finding() {
            return Ok(ProbeOutcome::unreported(classification, statuses));
        }

        let noisy = self.is_noisy(victim, service, baseline.status).await?;
        let title = finding_title(classification, noisy, name, config).unwrap_or_default();
        info!("{} on {}", title, service);

        self.sink.report(&Finding {
            title: title.clone(),
            technique: name.to_string(),
            configuration: config.clone(),
            service: service.clone(),
            confirmed: classification == Classification::Confirmed,
            noisy,
            baseline_status: baseline.status,
            cleanup,
            miner,
            victim: victim_response,
            timestamp: Utc::now(),
        });

        if classification == Classification::Confirmed {
            self.skip_cache.remember_host(&service.host);
        }

        Ok(ProbeOutcome {
            classification,
            statuses: Some(statuses),
            noisy,
            title: Some(title),
        })
    }

    /// Sends up to [`CLEANUP_ATTEMPTS`] isolated victims, stopping at the first
    /// status that differs from the baseline. A failed send counts as status 0.
    async fn cleanup(
        &self,
        victim: &RawRequest,
        service: &ServiceEndpoint,
        baseline: u16,
    ) -> HttpResponse {
        let mut cleanup = HttpResponse::unanswered();
        for attempt in 0..CLEANUP_ATTEMPTS {
            cleanup = self.send_or_sentinel(service, victim).await;
            if cleanup.status != baseline {
                trace!(
                    "Cleanup attempt {} diverged ({} != {}), draining",
                    attempt + 1,
                    cleanup.status,
                    baseline
                );
                self.send_or_sentinel(service, victim).await;
                break;
            }
        }
        cleanup
    }

    async fn send_or_sentinel(
        &self,
        service: &ServiceEndpoint,
        request: &RawRequest,
    ) -> HttpResponse {
        match self.transport.send(service, request.as_bytes()).await {
            Ok(response) => response,
            Err(e) => {
                trace!("Send to {} failed: {}", service, e);
                HttpResponse::unanswered()
            }
        }
    }

    /// Pipelines plain copies of the victim and reports whether any of them
    /// already diverges from the baseline without an attack in front.
    async fn is_noisy(
        &self,
        victim: &RawRequest,
        service: &ServiceEndpoint,
        baseline: u16,
    ) -> Result<bool, TransportError> {
        let count = if self.settings.get_flag(SKIP_STRAIGHT_TO_POC) {
            NOISE_CHECKS_FAST
        } else {
            NOISE_CHECKS
        };
        let batch = vec![victim.as_bytes().to_vec(); count];
        let mut responses = self.transport.pipeline(service, &batch).await?;
        responses.resize_with(count, HttpResponse::unanswered);
        Ok(responses.iter().any(|r| r.status != baseline))
    }
}
