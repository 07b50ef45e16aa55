// File: error.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use std::fmt;

#[derive(Debug)]
pub enum TransportError {
    Connect(String),
    Timeout(String),
    Io(std::io::Error),
    Tls(String),
    MalformedResponse(String),
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(msg) => write!(f, "Connection failed: {}", msg),
            Self::Timeout(msg) => write!(f, "Timeout: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Tls(msg) => write!(f, "TLS error: {}", msg),
            Self::MalformedResponse(msg) => write!(f, "Malformed response: {}", msg),
            Self::Closed => write!(f, "Connection closed before a response arrived"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

#[derive(Debug)]
pub enum ProbeError {
    Transport(TransportError),
    /// Assembling an in-memory PoC buffer failed. This is a bug, not target behaviour.
    PocConstruction(std::io::Error),
    InvalidTarget(String),
    Config(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::PocConstruction(e) => write!(f, "PoC construction failed: {}", e),
            Self::InvalidTarget(msg) => write!(f, "Invalid target: {}", msg),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::PocConstruction(e) => Some(e),
            Self::InvalidTarget(_) => None,
            Self::Config(_) => None,
        }
    }
}

impl From<TransportError> for ProbeError {
    fn from(error: TransportError) -> Self {
        Self::Transport(error)
    }
}

impl From<url::ParseError> for ProbeError {
    fn from(error: url::ParseError) -> Self {
        Self::InvalidTarget(error.to_string())
    }
}

pub type ProbeResult<T> = Result<T, ProbeError>;
