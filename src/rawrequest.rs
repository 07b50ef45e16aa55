// File: rawrequest.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

//! Byte-level HTTP/1.1 request helpers.
//!
//! Requests are handled as raw bytes rather than parsed structures because the
//! whole point of the mutator is to produce framings a strict parser would
//! reject. Every operation returns a new [`RawRequest`]; the input is never
//! modified.

use std::fmt;

const CRLF: &[u8] = b"\r\n";

pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    find_bytes_from(haystack, needle, 0)
}

pub fn find_bytes_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() || needle.len() > haystack.len() - from {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

pub fn replace_bytes(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    if from.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut cursor = 0;
    while let Some(pos) = find_bytes_from(haystack, from, cursor) {
        out.extend_from_slice(&haystack[cursor..pos]);
        out.extend_from_slice(to);
        cursor = pos + from.len();
    }
    out.extend_from_slice(&haystack[cursor..]);
    out
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RawRequest {
    bytes: Vec<u8>,
}

impl RawRequest {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Builds a request from text, normalising bare `\n` line endings to CRLF.
    pub fn from_text(text: &str) -> Self {
        let normalized = text.replace("\r\n", "\n").replace('\n', "\r\n");
        Self::new(normalized.into_bytes())
    }

    /// Minimal GET request for `path` on `host`, used when no request file is given.
    pub fn get(host: &str, path: &str) -> Self {
        Self::new(format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nAccept: */*\r\nUser-Agent: smuggleprobe/{}\r\nConnection: keep-alive\r\n\r\n",
            path,
            host,
            env!("CARGO_PKG_VERSION")
        ))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn contains(&self, needle: &[u8]) -> bool {
        find_bytes(&self.bytes, needle).is_some()
    }

    pub fn replace(&self, from: &[u8], to: &[u8]) -> Self {
        Self::new(replace_bytes(&self.bytes, from, to))
    }

    /// Offset of the first body byte. Falls back to a bare `\n\n` separator and
    /// finally to the end of the buffer when there is no header terminator.
    pub fn body_start(&self) -> usize {
        if let Some(pos) = find_bytes(&self.bytes, b"\r\n\r\n") {
            return pos + 4;
        }
        if let Some(pos) = find_bytes(&self.bytes, b"\n\n") {
            return pos + 2;
        }
        self.bytes.len()
    }

    pub fn body(&self) -> &[u8] {
        &self.bytes[self.body_start()..]
    }

    pub fn head(&self) -> &[u8] {
        &self.bytes[..self.body_start()]
    }

    pub fn with_body(&self, body: &[u8]) -> Self {
        let start = self.body_start();
        let mut bytes = Vec::with_capacity(start + body.len() + 4);
        bytes.extend_from_slice(&self.bytes[..start]);
        if start == self.bytes.len() && find_bytes(&self.bytes, b"\n\n").is_none() {
            bytes.extend_from_slice(b"\r\n\r\n");
        }
        bytes.extend_from_slice(body);
        Self::new(bytes)
    }

    fn first_line_end(&self) -> usize {
        find_bytes(&self.bytes, b"\n")
            .map(|pos| pos + 1)
            .unwrap_or(self.bytes.len())
    }

    fn header_block_end(&self) -> usize {
        // Position where a new header line can be inserted: just before the blank line.
        if let Some(pos) = find_bytes(&self.bytes, b"\r\n\r\n") {
            return pos + 2;
        }
        if let Some(pos) = find_bytes(&self.bytes, b"\n\n") {
            return pos + 1;
        }
        self.bytes.len()
    }

    pub fn start_line(&self) -> String {
        let end = self.first_line_end();
        String::from_utf8_lossy(&self.bytes[..end])
            .trim_end()
            .to_string()
    }

    pub fn method(&self) -> String {
        self.start_line()
            .split(' ')
            .next()
            .unwrap_or_default()
            .to_string()
    }

    pub fn path(&self) -> String {
        self.start_line()
            .split(' ')
            .nth(1)
            .unwrap_or("/")
            .to_string()
    }

    /// Locates the value span of the first header named `name` (case-insensitive).
    fn header_value_span(&self, name: &str) -> Option<(usize, usize)> {
        let head_end = self.header_block_end();
        let mut line_start = self.first_line_end();
        let needle = name.to_ascii_lowercase();

        while line_start < head_end {
            let line_end = find_bytes_from(&self.bytes[..head_end], CRLF, line_start)
                .unwrap_or(head_end);
            let line = &self.bytes[line_start..line_end];
            if let Some(colon) = line.iter().position(|&b| b == b':') {
                if line[..colon].eq_ignore_ascii_case(needle.as_bytes()) {
                    let mut value_start = line_start + colon + 1;
                    while value_start < line_end && self.bytes[value_start] == b' ' {
                        value_start += 1;
                    }
                    return Some((value_start, line_end));
                }
            }
            line_start = line_end + CRLF.len();
        }
        None
    }

    /// Replaces the whole first `name` header line, CRLF included, with `replacement`.
    /// Returns `None` when there is no such header.
    pub fn replace_header_line(&self, name: &str, replacement: &[u8]) -> Option<Self> {
        let (value_start, value_end) = self.header_value_span(name)?;
        let line_start = self.bytes[..value_start]
            .iter()
            .rposition(|&b| b == b'\n')
            .map(|pos| pos + 1)
            .unwrap_or(0);
        let line_end = if self.bytes[value_end..].starts_with(CRLF) {
            value_end + CRLF.len()
        } else {
            value_end
        };
        let mut bytes = Vec::with_capacity(self.bytes.len() + replacement.len());
        bytes.extend_from_slice(&self.bytes[..line_start]);
        bytes.extend_from_slice(replacement);
        bytes.extend_from_slice(&self.bytes[line_end..]);
        Some(Self::new(bytes))
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.header_value_span(name)
            .map(|(start, end)| String::from_utf8_lossy(&self.bytes[start..end]).to_string())
    }

    /// Appends a header line at the end of the header block.
    pub fn add_header(&self, name: &str, value: &str) -> Self {
        let at = self.header_block_end();
        let line = format!("{}: {}\r\n", name, value);
        let mut bytes = Vec::with_capacity(self.bytes.len() + line.len() + 4);
        bytes.extend_from_slice(&self.bytes[..at]);
        if at == self.bytes.len() {
            if !bytes.ends_with(CRLF) {
                bytes.extend_from_slice(CRLF);
            }
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(CRLF);
        } else {
            bytes.extend_from_slice(line.as_bytes());
            bytes.extend_from_slice(&self.bytes[at..]);
        }
        Self::new(bytes)
    }

    /// Replaces the value of an existing header, or appends it when absent.
    pub fn set_header(&self, name: &str, value: &str) -> Self {
        match self.header_value_span(name) {
            Some((start, end)) => {
                let mut bytes = Vec::with_capacity(self.bytes.len() + value.len());
                bytes.extend_from_slice(&self.bytes[..start]);
                bytes.extend_from_slice(value.as_bytes());
                bytes.extend_from_slice(&self.bytes[end..]);
                Self::new(bytes)
            }
            None => self.add_header(name, value),
        }
    }

    pub fn add_or_replace_header(&self, name: &str, value: &str) -> Self {
        self.set_header(name, value)
    }

    /// Flips GET to POST (query string becomes a form body) and anything else to
    /// GET (form body becomes the query string).
    pub fn toggle_method(&self) -> Self {
        if self.method().eq_ignore_ascii_case("GET") {
            let path = self.path();
            let (base, query) = match path.split_once('?') {
                Some((base, query)) => (base.to_string(), query.to_string()),
                None => (path.clone(), String::new()),
            };
            let line_end = self.first_line_end();
            let version = self
                .start_line()
                .split(' ')
                .nth(2)
                .unwrap_or("HTTP/1.1")
                .to_string();
            let mut bytes = format!("POST {} {}\r\n", base, version).into_bytes();
            bytes.extend_from_slice(&self.bytes[line_end..]);
            Self::new(bytes)
                .set_header("Content-Type", "application/x-www-form-urlencoded")
                .set_header("Content-Length", &query.len().to_string())
                .with_body(query.as_bytes())
        } else {
            let body = String::from_utf8_lossy(self.body()).to_string();
            let path = self.path();
            let target = if body.is_empty() {
                path
            } else if path.contains('?') {
                format!("{}&{}", path, body)
            } else {
                format!("{}?{}", path, body)
            };
            let line_end = self.first_line_end();
            let version = self
                .start_line()
                .split(' ')
                .nth(2)
                .unwrap_or("HTTP/1.1")
                .to_string();
            let mut bytes = format!("GET {} {}\r\n", target, version).into_bytes();
            bytes.extend_from_slice(&self.bytes[line_end..]);
            Self::new(bytes).with_body(b"")
        }
    }

    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }
}

impl fmt::Debug for RawRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawRequest({:?})", self.to_text())
    }
}

impl From<&str> for RawRequest {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes().to_vec())
    }
}
