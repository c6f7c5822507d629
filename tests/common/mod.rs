//! Common test utilities - SkirmishTest harness for end-to-end testing

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use skirmishd::{Config, Server};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Test harness that spawns a real skirmishd server on a random port
pub struct SkirmishTest {
    pub addr: SocketAddr,
    pub client: Client,
    server: Arc<Server>,
    _handle: JoinHandle<()>,
}

impl SkirmishTest {
    /// Start a new test server instance
    pub async fn start() -> Result<Self> {
        // Find a random available port
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        drop(listener);

        let config = Config {
            bind_addr: addr,
            db_path: None, // In-memory for tests
            ..Config::default()
        };

        let server = Arc::new(Server::new(config).await?);
        let server_clone = server.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = server_clone.run().await {
                eprintln!("Server error: {}", e);
            }
        });

        let client = Client::builder().timeout(Duration::from_secs(5)).build()?;

        // Poll until server is ready (max 2 seconds)
        let mut ready = false;
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if client
                .get(format!("http://{}/health", addr))
                .send()
                .await
                .is_ok()
            {
                ready = true;
                break;
            }
        }

        if !ready {
            panic!("Server failed to start within 2 seconds");
        }

        Ok(Self {
            addr,
            client,
            server,
            _handle: handle,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(format!("{}{}", self.base_url(), path))
            .send()
            .await?)
    }

    /// Make a POST request with JSON body
    pub async fn post<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(format!("{}{}", self.base_url(), path))
            .json(body)
            .send()
            .await?)
    }

    /// Create a session from a roster and return its id
    pub async fn create_session(
        &self,
        name: &str,
        entities: serde_json::Value,
    ) -> Result<String> {
        let resp = self
            .post(
                "/sessions",
                &serde_json::json!({"name": name, "entities": entities}),
            )
            .await?;
        anyhow::ensure!(resp.status() == 201, "create failed: {}", resp.status());
        let body: serde_json::Value = resp.json().await?;
        body["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("no id in {}", body))
    }

    /// Apply a mutation, returning status and JSON body
    pub async fn mutate(
        &self,
        session_id: &str,
        mutation: serde_json::Value,
    ) -> Result<(u16, serde_json::Value)> {
        let resp = self
            .post(&format!("/sessions/{}/mutations", session_id), &mutation)
            .await?;
        let status = resp.status().as_u16();
        Ok((status, resp.json().await?))
    }

    pub fn sessions(&self) -> Arc<skirmishd::session::SessionManager> {
        self.server.sessions()
    }

    /// Shutdown the server gracefully
    pub fn shutdown(&self) {
        self.server.shutdown();
    }

    pub fn ws_url(&self, session_id: &str) -> String {
        format!("ws://{}/ws?session={}", self.addr, session_id)
    }

    /// Attach a WebSocket client to a session
    pub async fn connect_ws(&self, session_id: &str) -> Result<WsClient> {
        let (ws_stream, _) = connect_async(&self.ws_url(session_id)).await?;
        let (write, read) = ws_stream.split();
        Ok(WsClient { write, read })
    }
}

/// WebSocket client for testing
pub struct WsClient {
    write: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    read: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
}

impl WsClient {
    /// Send a mutation over the socket
    pub async fn send_mutation(&mut self, mutation: serde_json::Value) -> Result<()> {
        let msg = serde_json::json!({
            "type": "mutate",
            "mutation": mutation
        });
        self.write
            .send(Message::Text(msg.to_string().into()))
            .await?;
        Ok(())
    }

    pub async fn send_raw(&mut self, text: &str) -> Result<()> {
        self.write.send(Message::Text(text.to_string().into())).await?;
        Ok(())
    }

    /// Send a ping message
    pub async fn send_ping(&mut self) -> Result<()> {
        let msg = serde_json::json!({
            "type": "ping"
        });
        self.write
            .send(Message::Text(msg.to_string().into()))
            .await?;
        Ok(())
    }

    /// Receive the next message as JSON
    pub async fn recv_json(&mut self) -> Result<serde_json::Value> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(serde_json::from_str(&text)?);
                }
                Some(Ok(Message::Close(_))) | None => {
                    anyhow::bail!("WebSocket closed");
                }
                Some(Err(e)) => return Err(e.into()),
                _ => continue, // Skip binary/ping/pong frames
            }
        }
    }

    /// Receive with a timeout
    pub async fn recv_json_timeout(&mut self, timeout: Duration) -> Result<serde_json::Value> {
        tokio::time::timeout(timeout, self.recv_json())
            .await
            .map_err(|_| anyhow::anyhow!("Timeout waiting for message"))?
    }

    /// Skip messages until one with the given `type` arrives
    pub async fn recv_type(&mut self, kind: &str) -> Result<serde_json::Value> {
        loop {
            let msg = self.recv_json_timeout(Duration::from_secs(2)).await?;
            if msg["type"] == kind {
                return Ok(msg);
            }
        }
    }
}
