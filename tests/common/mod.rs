//! Scripted in-process server for integration tests.
//!
//! Each `connect` on a [`MockConnector`] creates an in-memory pipe and runs
//! the next scripted handler on the server end of it.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use reql_driver::network::{BoxedStream, ConnectionOptions, Connector, ProtocolVersion};
use reql_driver::{Connection, ReqlError};
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

type Handler = Box<dyn FnOnce(MockServer) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

#[derive(Default)]
pub struct MockConnector {
    handlers: Mutex<VecDeque<Handler>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler for the next connection attempt.
    pub fn serve<F, Fut>(self, handler: F) -> Self
    where
        F: FnOnce(MockServer) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers
            .lock()
            .push_back(Box::new(move |server| Box::pin(handler(server))));
        self
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _options: &ConnectionOptions) -> Result<BoxedStream, ReqlError> {
        let handler = self
            .handlers
            .lock()
            .pop_front()
            .ok_or_else(|| ReqlError::driver("Could not connect: no scripted server left"))?;
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(handler(MockServer { stream: server }));
        Ok(Box::new(client))
    }
}

/// Server end of one mock connection.
pub struct MockServer {
    stream: DuplexStream,
}

impl MockServer {
    /// Reads a V0_4 handshake without answering it, returning the auth key.
    pub async fn read_v0_4(&mut self) -> String {
        let version = self.stream.read_u32_le().await.unwrap();
        assert_eq!(version, reql_driver::network::VERSION_V0_4);
        let key_len = self.stream.read_u32_le().await.unwrap() as usize;
        let mut key = vec![0u8; key_len];
        self.stream.read_exact(&mut key).await.unwrap();
        let protocol = self.stream.read_u32_le().await.unwrap();
        assert_eq!(protocol, reql_driver::network::PROTOCOL_JSON);
        String::from_utf8(key).unwrap()
    }

    /// Completes a V0_4 handshake.
    pub async fn accept_v0_4(&mut self) -> String {
        let key = self.read_v0_4().await;
        self.send_raw(b"SUCCESS\0").await;
        key
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    pub async fn read_u32_le(&mut self) -> u32 {
        self.stream.read_u32_le().await.unwrap()
    }

    /// One `\0`-terminated handshake message, terminator stripped.
    pub async fn read_message(&mut self) -> Vec<u8> {
        let mut message = Vec::new();
        loop {
            let byte = self.stream.read_u8().await.unwrap();
            if byte == 0 {
                return message;
            }
            message.push(byte);
        }
    }

    pub async fn send_json_message(&mut self, value: Value) {
        let mut bytes = serde_json::to_vec(&value).unwrap();
        bytes.push(0);
        self.send_raw(&bytes).await;
    }

    /// Next query frame as (token, body); `None` once the client hung up.
    pub async fn read_query(&mut self) -> Option<(u64, Value)> {
        let mut header = [0u8; 12];
        self.stream.read_exact(&mut header).await.ok()?;
        let token = u64::from_le_bytes(header[..8].try_into().unwrap());
        let len = u32::from_le_bytes(header[8..].try_into().unwrap()) as usize;
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await.ok()?;
        Some((token, serde_json::from_slice(&body).unwrap()))
    }

    pub async fn reply(&mut self, token: u64, body: Value) {
        let body = serde_json::to_vec(&body).unwrap();
        let mut frame = Vec::with_capacity(12 + body.len());
        frame.extend_from_slice(&token.to_le_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        self.send_raw(&frame).await;
    }

    /// Answers NOREPLY_WAIT and ignores everything else until the client
    /// hangs up.
    pub async fn idle(mut self) {
        while let Some((token, body)) = self.read_query().await {
            if body[0] == 4 {
                self.reply(token, serde_json::json!({"t": 4, "r": []})).await;
            }
        }
    }
}

pub fn options() -> ConnectionOptions {
    ConnectionOptions {
        handshake: ProtocolVersion::V0_4,
        ..ConnectionOptions::default()
    }
}

pub async fn connect(connector: MockConnector) -> Connection {
    Connection::connect_with(options(), Arc::new(connector))
        .await
        .unwrap()
}
