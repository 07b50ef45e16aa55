// File: service.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::ProbeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a target; also the scope of skip memoization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn new(protocol: Protocol, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol,
            host: host.into(),
            port,
        }
    }

    pub fn from_url(raw: &str) -> Result<Self, ProbeError> {
        if raw.is_empty() || raw.len() > 2048 {
            return Err(ProbeError::InvalidTarget("Invalid URL length".to_string()));
        }

        let parsed = Url::parse(raw)?;
        let protocol = match parsed.scheme() {
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            other => {
                return Err(ProbeError::InvalidTarget(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
        };
        let host = parsed
            .host_str()
            .ok_or_else(|| ProbeError::InvalidTarget("No host in URL".to_string()))?;

        if host.contains('\r') || host.contains('\n') || host.contains('\t') {
            return Err(ProbeError::InvalidTarget(
                "Host contains dangerous characters".to_string(),
            ));
        }

        let port = parsed
            .port_or_known_default()
            .unwrap_or_else(|| protocol.default_port());
        Ok(Self::new(protocol, host, port))
    }

    pub fn host_header(&self) -> String {
        if self.port == self.protocol.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}", self.protocol, self.host_header())
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}
