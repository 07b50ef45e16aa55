// File: skip_cache.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Append-only memo of what has already been confirmed.
//!
//! Two granularities are kept and never unified:
//! * [`SkipKey`]: one technique against one endpoint. Drives the scan
//!   driver's "skip vulnerable hosts" and "skip obsolete permutations" policies.
//! * host: any technique confirmed against this host name, regardless of
//!   protocol or port. Written by the oracle on every confirmation.
//!
//! Entries are never removed for the lifetime of the process.

use crate::service::ServiceEndpoint;
use crate::technique::TechniqueId;
use dashmap::DashSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SkipKey {
    pub technique: TechniqueId,
    pub service: ServiceEndpoint,
}

impl SkipKey {
    pub fn new(technique: TechniqueId, service: &ServiceEndpoint) -> Self {
        Self {
            technique,
            service: service.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SkipCache {
    confirmed: DashSet<SkipKey>,
    hosts: DashSet<String>,
}

impl SkipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the key was newly inserted.
    pub fn remember(&self, key: SkipKey) -> bool {
        self.confirmed.insert(key)
    }

    pub fn contains(&self, key: &SkipKey) -> bool {
        self.confirmed.contains(key)
    }

    pub fn remember_host(&self, host: &str) -> bool {
        self.hosts.insert(host.to_string())
    }

    pub fn host_confirmed(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    pub fn len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty()
    }
}
