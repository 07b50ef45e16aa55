// File: transport.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use crate::error::TransportError;
use crate::service::{Protocol, ServiceEndpoint};
use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Status used for a request that never got a response.
pub const NO_RESPONSE: u16 = 0;
const CRLF_LEN: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "lossy_bytes")]
    pub body: Vec<u8>,
    #[serde(with = "lossy_bytes")]
    pub raw: Vec<u8>,
}

mod lossy_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(deserializer)?.into_bytes())
    }
}

impl HttpResponse {
    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Placeholder for a pipelined request whose response never arrived.
    pub fn unanswered() -> Self {
        Self::with_status(NO_RESPONSE)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// Sends raw request bytes. `pipeline` must write every request before reading
/// and return responses in send order, padding with [`HttpResponse::unanswered`]
/// when the connection ends early.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        service: &ServiceEndpoint,
        request: &[u8],
    ) -> Result<HttpResponse, TransportError>;

    async fn pipeline(
        &self,
        service: &ServiceEndpoint,
        requests: &[Vec<u8>],
    ) -> Result<Vec<HttpResponse>, TransportError>;
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_response_bytes: usize,
    pub requests_per_second: NonZeroU32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            read_timeout: Duration::from_millis(8000),
            max_response_bytes: 1024 * 1024,
            requests_per_second: NonZeroU32::new(20).unwrap_or(NonZeroU32::MIN),
        }
    }
}

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Plain TCP / rustls transport that writes bytes exactly as given.
pub struct RawTransport {
    config: TransportConfig,
    rate_limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    tls: tokio_rustls::TlsConnector,
}

impl RawTransport {
    pub fn new(config: TransportConfig) -> Self {
        use tokio_rustls::rustls;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        let tls_config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_second(
                config.requests_per_second,
            ))),
            tls: tokio_rustls::TlsConnector::from(Arc::new(tls_config)),
            config,
        }
    }

    async fn connect(&self, service: &ServiceEndpoint) -> Result<Box<dyn Stream>, TransportError> {
        self.rate_limiter.until_ready().await;

        let addr = format!("{}:{}", service.host, service.port);
        let tcp = match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(TransportError::Connect(format!("{}: {}", addr, e))),
            Err(_) => return Err(TransportError::Timeout(format!("connect to {}", addr))),
        };
        let _ = tcp.set_nodelay(true);

        match service.protocol {
            Protocol::Http => Ok(Box::new(tcp)),
            Protocol::Https => {
                let domain = tokio_rustls::rustls::ServerName::try_from(service.host.as_str())
                    .map_err(|e| TransportError::Tls(e.to_string()))?;
                let tls = tokio::time::timeout(
                    self.config.connect_timeout,
                    self.tls.connect(domain, tcp),
                )
                .await
                .map_err(|_| TransportError::Timeout(format!("TLS handshake with {}", addr)))?
                .map_err(|e| TransportError::Tls(e.to_string()))?;
                Ok(Box::new(tls))
            }
        }
    }

    async fn exchange(
        &self,
        service: &ServiceEndpoint,
        requests: &[Vec<u8>],
    ) -> Result<Vec<HttpResponse>, TransportError> {
        let mut stream = self.connect(service).await?;

        // Everything goes out before the first read: the ordering is the signal.
        for request in requests {
            stream.write_all(request).await?;
        }
        stream.flush().await?;
        trace!("Wrote {} request(s) to {}", requests.len(), service);

        let mut buffer = Vec::with_capacity(8192);
        let mut responses = Vec::with_capacity(requests.len());
        let mut eof = false;
        let deadline = Instant::now() + self.config.read_timeout;

        while responses.len() < requests.len() {
            match parse_response(&buffer, eof, self.config.max_response_bytes)? {
                Some((response, consumed)) => {
                    buffer.drain(..consumed);
                    responses.push(response);
                    continue;
                }
                None if eof => break,
                None => {}
            }

            if buffer.len() >= self.config.max_response_bytes {
                return Err(TransportError::MalformedResponse(format!(
                    "response exceeds {} bytes",
                    self.config.max_response_bytes
                )));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(
                    "Read timeout from {} after {} of {} responses",
                    service,
                    responses.len(),
                    requests.len()
                );
                break;
            }

            let mut chunk = [0u8; 8192];
            match tokio::time::timeout(remaining, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => eof = true,
                Ok(Ok(n)) => buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    debug!("Read error from {}: {}", service, e);
                    eof = true;
                }
                Err(_) => {
                    debug!("Read timeout from {}", service);
                    break;
                }
            }
        }

        Ok(responses)
    }
}

#[async_trait]
impl Transport for RawTransport {
    async fn send(
        &self,
        service: &ServiceEndpoint,
        request: &[u8],
    ) -> Result<HttpResponse, TransportError> {
        let mut responses = self.exchange(service, &[request.to_vec()]).await?;
        if responses.is_empty() {
            return Err(TransportError::Closed);
        }
        Ok(responses.remove(0))
    }

    async fn pipeline(
        &self,
        service: &ServiceEndpoint,
        requests: &[Vec<u8>],
    ) -> Result<Vec<HttpResponse>, TransportError> {
        let mut responses = self.exchange(service, requests).await?;
        responses.resize_with(requests.len(), HttpResponse::unanswered);
        Ok(responses)
    }
}

/// Tries to take one complete response off the front of `buf`.
///
/// Returns the response and the number of bytes it occupied, or `None` when
/// more data is needed. Interim 1xx responses are skipped. A response without
/// any length framing runs until `eof`. Declared body or chunk sizes beyond
/// `max_body` are rejected as malformed.
pub fn parse_response(
    buf: &[u8],
    eof: bool,
    max_body: usize,
) -> Result<Option<(HttpResponse, usize)>, TransportError> {
    let mut offset = 0;
    loop {
        let mut headers = [httparse::EMPTY_HEADER; 96];
        let mut parsed = httparse::Response::new(&mut headers);
        let head_len = match parsed.parse(&buf[offset..]) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(TransportError::MalformedResponse(e.to_string())),
        };
        let status = parsed.code.unwrap_or(NO_RESPONSE);
        let header_pairs: Vec<(String, String)> = parsed
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).trim().to_string(),
                )
            })
            .collect();

        let body_start = offset + head_len;
        if (100..200).contains(&status) && status != 101 {
            offset = body_start;
            continue;
        }

        let find = |name: &str| {
            header_pairs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };

        let (body, end) = if status == 204 || status == 304 {
            (Vec::new(), body_start)
        } else if find("Transfer-Encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
        {
            match decode_chunked(&buf[body_start..], max_body)? {
                Some((body, used)) => (body, body_start + used),
                None => return Ok(None),
            }
        } else if let Some(length) = find("Content-Length") {
            let length: usize = length.parse().map_err(|_| {
                TransportError::MalformedResponse(format!("bad Content-Length '{}'", length))
            })?;
            let end = body_start
                .checked_add(length)
                .filter(|_| length <= max_body)
                .ok_or_else(|| {
                    TransportError::MalformedResponse(format!(
                        "Content-Length {} exceeds {} bytes",
                        length, max_body
                    ))
                })?;
            if buf.len() < end {
                return Ok(None);
            }
            (buf[body_start..end].to_vec(), end)
        } else if eof {
            (buf[body_start..].to_vec(), buf.len())
        } else {
            return Ok(None);
        };

        let response = HttpResponse {
            status,
            headers: header_pairs,
            body,
            raw: buf[offset..end].to_vec(),
        };
        return Ok(Some((response, end)));
    }
}

fn decode_chunked(
    buf: &[u8],
    max_body: usize,
) -> Result<Option<(Vec<u8>, usize)>, TransportError> {
    let mut pos = 0;
    let mut body = Vec::new();
    loop {
        let Some(line_len) = buf[pos..].windows(2).position(|w| w == b"\r\n") else {
            return Ok(None);
        };
        let line = String::from_utf8_lossy(&buf[pos..pos + line_len]).to_string();
        let size_text = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_text, 16).map_err(|_| {
            TransportError::MalformedResponse(format!("bad chunk size '{}'", size_text))
        })?;
        pos += line_len + 2;

        if size == 0 {
            // Trailers end with an empty line.
            loop {
                let Some(trailer_len) = buf[pos..].windows(2).position(|w| w == b"\r\n") else {
                    return Ok(None);
                };
                pos += trailer_len + 2;
                if trailer_len == 0 {
                    return Ok(Some((body, pos)));
                }
            }
        }

        let chunk_end = pos
            .checked_add(size)
            .filter(|_| body.len().saturating_add(size) <= max_body)
            .ok_or_else(|| {
                TransportError::MalformedResponse(format!(
                    "chunk of {} bytes exceeds {} bytes",
                    size, max_body
                ))
            })?;
        if buf.len() < chunk_end.saturating_add(CRLF_LEN) {
            return Ok(None);
        }
        body.extend_from_slice(&buf[pos..chunk_end]);
        pos = chunk_end + CRLF_LEN;
    }
}
