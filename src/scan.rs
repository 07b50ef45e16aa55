// File: scan.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::ProbeResult;
use crate::mutator::RequestMutator;
use crate::oracle::{Oracle, ProbeOutcome};
use crate::poc::build_poc;
use crate::rawrequest::RawRequest;
use crate::registry::PermutationRegistry;
use crate::report::FindingSink;
use crate::service::ServiceEndpoint;
use crate::settings::{FlagStore, SKIP_OBSOLETE_PERMUTATIONS, SKIP_VULNERABLE_HOSTS};
use crate::skip_cache::{SkipCache, SkipKey};
use crate::technique::{Configuration, TechniqueId};
use crate::technique_engine::TechniqueEngine;
use crate::transport::{HttpResponse, Transport};
use async_trait::async_trait;
use log::{debug, info, trace};
use std::sync::Arc;

/// Shared state handed to every scan unit. All members are safe to use from
/// concurrently running scans.
pub struct ScanContext {
    pub settings: Arc<dyn FlagStore>,
    pub registry: Arc<PermutationRegistry>,
    pub skip_cache: Arc<SkipCache>,
    pub transport: Arc<dyn Transport>,
    pub mutator: RequestMutator,
    pub oracle: Oracle,
}

impl ScanContext {
    pub fn new(
        settings: Arc<dyn FlagStore>,
        engine: Arc<dyn TechniqueEngine>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn FindingSink>,
    ) -> Self {
        let registry = Arc::new(PermutationRegistry::with_defaults(
            Arc::clone(&settings),
            &engine.special_chars(),
        ));
        Self::with_registry(settings, engine, transport, sink, registry)
    }

    pub fn with_registry(
        settings: Arc<dyn FlagStore>,
        engine: Arc<dyn TechniqueEngine>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn FindingSink>,
        registry: Arc<PermutationRegistry>,
    ) -> Self {
        let skip_cache = Arc::new(SkipCache::new());
        Self {
            mutator: RequestMutator::new(engine, Arc::clone(&settings)),
            oracle: Oracle::new(
                Arc::clone(&transport),
                Arc::clone(&settings),
                sink,
                Arc::clone(&skip_cache),
            ),
            settings,
            registry,
            skip_cache,
            transport,
        }
    }
}

/// One way of turning a request plus a technique configuration into a probe.
#[async_trait]
pub trait ConfiguredScan: Send + Sync {
    fn name(&self) -> &'static str;

    /// Errors are reserved for bugs on our side; target behaviour, including
    /// network failures, is expressed through the returned outcome.
    async fn run(
        &self,
        ctx: &ScanContext,
        request: &RawRequest,
        service: &ServiceEndpoint,
        config: &Configuration,
    ) -> ProbeResult<ProbeOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkingSet {
    /// A technique already worked here and vulnerable hosts are skipped.
    Abandon,
    /// Only techniques that already worked here.
    Restricted(Vec<TechniqueId>),
    Full(Vec<TechniqueId>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub abandoned: bool,
    pub attempted: Vec<TechniqueId>,
    pub confirmed: Vec<TechniqueId>,
    pub possible: Vec<TechniqueId>,
}

pub struct ScanDriver {
    ctx: Arc<ScanContext>,
}

impl ScanDriver {
    pub fn new(ctx: Arc<ScanContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<ScanContext> {
        &self.ctx
    }

    pub fn working_set(&self, service: &ServiceEndpoint) -> WorkingSet {
        let settings = &self.ctx.settings;
        let mut memoized = Vec::new();
        for id in self.ctx.registry.ids() {
            if !self.ctx.skip_cache.contains(&SkipKey::new(*id, service)) {
                continue;
            }
            if settings.get_flag(SKIP_VULNERABLE_HOSTS) {
                return WorkingSet::Abandon;
            }
            if settings.get_flag(SKIP_OBSOLETE_PERMUTATIONS) {
                memoized.push(*id);
            }
        }

        if memoized.is_empty() {
            WorkingSet::Full(self.ctx.registry.ids().to_vec())
        } else {
            WorkingSet::Restricted(memoized)
        }
    }

    /// Runs `strategy` once per enabled technique in the working set, each with
    /// a single-technique configuration.
    pub async fn scan(
        &self,
        request: &RawRequest,
        service: &ServiceEndpoint,
        strategy: &dyn ConfiguredScan,
    ) -> ProbeResult<ScanSummary> {
        let mut summary = ScanSummary::default();

        let candidates = match self.working_set(service) {
            WorkingSet::Abandon => {
                info!("Skipping {}: already confirmed vulnerable", service);
                summary.abandoned = true;
                return Ok(summary);
            }
            WorkingSet::Restricted(ids) => {
                debug!(
                    "Restricting {} to {} previously confirmed permutation(s)",
                    service,
                    ids.len()
                );
                ids
            }
            WorkingSet::Full(ids) => ids,
        };

        for id in candidates {
            if !self.ctx.registry.is_enabled(&id) {
                trace!("Permutation {} disabled", id);
                continue;
            }

            let config = Configuration::single(id);
            summary.attempted.push(id);
            let outcome = strategy.run(&self.ctx, request, service, &config).await?;

            if outcome.is_confirmed() {
                summary.confirmed.push(id);
                self.ctx.skip_cache.remember(SkipKey::new(id, service));
                if self.ctx.settings.get_flag(SKIP_OBSOLETE_PERMUTATIONS) {
                    break;
                }
            } else if outcome.classification.is_finding() {
                summary.possible.push(id);
            }
        }

        Ok(summary)
    }

    /// Sends `request` with `Connection: keep-alive` and returns the response
    /// only if the server promises to keep the connection open.
    pub async fn left_alive(
        &self,
        request: &RawRequest,
        service: &ServiceEndpoint,
    ) -> Option<HttpResponse> {
        let keepalive = request.set_header("Connection", "keep-alive");
        let response = match self.ctx.transport.send(service, keepalive.as_bytes()).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Keep-alive check against {} failed: {}", service, e);
                return None;
            }
        };
        let alive = response
            .header("Connection")
            .map(|v| v.to_ascii_lowercase().contains("alive"))
            .unwrap_or(false);
        alive.then_some(response)
    }
}

/// Chunked-body desync probe: a poison request whose Content-Length overshoots
/// its chunked body by one byte, followed by the normalized request. With
/// `gzip_victim` the victim additionally declares `Transfer-Encoding: gzip`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChunkedPocScan {
    pub gzip_victim: bool,
}

impl ChunkedPocScan {
    pub fn new(gzip_victim: bool) -> Self {
        Self { gzip_victim }
    }
}

#[async_trait]
impl ConfiguredScan for ChunkedPocScan {
    fn name(&self) -> &'static str {
        if self.gzip_victim {
            "chunked-poc-gzip"
        } else {
            "chunked-poc"
        }
    }

    async fn run(
        &self,
        ctx: &ScanContext,
        request: &RawRequest,
        service: &ServiceEndpoint,
        config: &Configuration,
    ) -> ProbeResult<ProbeOutcome> {
        let mut victim = ctx
            .mutator
            .normalize_method(request)
            .set_header("Connection", "keep-alive");
        let poc = build_poc(&ctx.mutator, &victim, service, config)?;
        if self.gzip_victim {
            victim = RequestMutator::gzip_wrap(&victim);
        }
        Ok(ctx
            .oracle
            .send_poc(self.name(), &poc.bytes, &victim, service, config)
            .await)
    }
}
