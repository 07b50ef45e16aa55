// File: common/mod.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

#![allow(dead_code)]

use async_trait::async_trait;
use smuggleprobe::error::TransportError;
use smuggleprobe::rawrequest::RawRequest;
use smuggleprobe::service::{Protocol, ServiceEndpoint};
use smuggleprobe::transport::{HttpResponse, Transport};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Replays queued status codes. Isolated sends fall back to `default_status`
/// once their queue is empty; pipelines fall back to `default_status` for
/// every request.
pub struct ScriptedTransport {
    default_status: u16,
    sends: Mutex<VecDeque<Result<u16, ()>>>,
    pipelines: Mutex<VecDeque<Result<Vec<u16>, ()>>>,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub pipelined: Mutex<Vec<Vec<Vec<u8>>>>,
}

impl ScriptedTransport {
    pub fn new(default_status: u16) -> Self {
        Self {
            default_status,
            sends: Mutex::new(VecDeque::new()),
            pipelines: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            pipelined: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_send(self, status: u16) -> Self {
        self.sends.lock().unwrap().push_back(Ok(status));
        self
    }

    pub fn queue_send_error(self) -> Self {
        self.sends.lock().unwrap().push_back(Err(()));
        self
    }

    pub fn queue_pipeline(self, statuses: &[u16]) -> Self {
        self.pipelines.lock().unwrap().push_back(Ok(statuses.to_vec()));
        self
    }

    pub fn queue_pipeline_error(self) -> Self {
        self.pipelines.lock().unwrap().push_back(Err(()));
        self
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn pipeline_sizes(&self) -> Vec<usize> {
        self.pipelined.lock().unwrap().iter().map(|b| b.len()).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        _service: &ServiceEndpoint,
        request: &[u8],
    ) -> Result<HttpResponse, TransportError> {
        self.sent.lock().unwrap().push(request.to_vec());
        match self.sends.lock().unwrap().pop_front() {
            Some(Ok(status)) => Ok(HttpResponse::with_status(status)),
            Some(Err(())) => Err(TransportError::Connect("scripted failure".to_string())),
            None => Ok(HttpResponse::with_status(self.default_status)),
        }
    }

    async fn pipeline(
        &self,
        _service: &ServiceEndpoint,
        requests: &[Vec<u8>],
    ) -> Result<Vec<HttpResponse>, TransportError> {
        self.pipelined.lock().unwrap().push(requests.to_vec());
        match self.pipelines.lock().unwrap().pop_front() {
            Some(Ok(statuses)) => Ok(statuses.into_iter().map(HttpResponse::with_status).collect()),
            Some(Err(())) => Err(TransportError::Timeout("scripted timeout".to_string())),
            None => Ok(requests
                .iter()
                .map(|_| HttpResponse::with_status(self.default_status))
                .collect()),
        }
    }
}

pub fn example_service() -> ServiceEndpoint {
    ServiceEndpoint::new(Protocol::Http, "example.com", 80)
}

pub fn sample_post() -> RawRequest {
    RawRequest::from_text("POST /login HTTP/1.1\nHost: example.com\nContent-Length: 7\n\nuser=me")
}

pub fn sample_get(path: &str) -> RawRequest {
    RawRequest::get("example.com", path)
}

/// One-shot HTTP server: waits for `expect_requests` header blocks, answers
/// with `reply` verbatim and closes its write side.
pub async fn spawn_pipeline_server(expect_requests: usize, reply: Vec<u8>) -> ServiceEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut seen = Vec::new();
        let mut chunk = [0u8; 4096];
        while seen.windows(4).filter(|w| *w == b"\r\n\r\n").count() < expect_requests {
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => seen.extend_from_slice(&chunk[..n]),
            }
        }
        let _ = socket.write_all(&reply).await;
        let _ = socket.shutdown().await;
        let _ = socket.read_to_end(&mut seen).await;
    });

    ServiceEndpoint::new(Protocol::Http, "127.0.0.1", port)
}
