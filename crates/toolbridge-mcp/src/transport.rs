//! MCP transport implementations.
//!
//! Three transports reach tool-providing endpoints: a standard-I/O child
//! process speaking newline-delimited JSON, a Server-Sent-Events endpoint,
//! and a streamable-HTTP endpoint. Each is selected by the closed
//! [`TransportKind`] enum and constructed from a validated
//! [`TransportSpec`], one constructor per variant.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use toolbridge_core::config::McpSettings;

use crate::error::{RegistryError, TransportError};

/// Trait for MCP transport implementations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to the server.
    async fn send(&mut self, message: &str) -> Result<(), TransportError>;

    /// Receive a message from the server.
    async fn receive(&mut self) -> Result<String, TransportError>;

    /// Close the transport connection.
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// The protocol-level channel used to reach an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Standard-I/O child process.
    Stdio,
    /// Server-Sent-Events endpoint.
    Sse,
    /// Streamable-HTTP endpoint.
    StreamableHttp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Sse => write!(f, "sse"),
            Self::StreamableHttp => write!(f, "streamable_http"),
        }
    }
}

/// Raw, unvalidated transport parameters as they arrive on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportParams {
    /// Command for stdio transport.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments for the stdio command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the stdio command.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// URL for the SSE and streamable-HTTP transports.
    #[serde(default)]
    pub server_url: Option<String>,
    /// HTTP headers for the streamable-HTTP transport.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Requested HTTP timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Requested SSE read timeout in seconds.
    #[serde(default)]
    pub sse_read_timeout: Option<u64>,
}

/// Validated parameters for opening a transport; immutable after creation.
#[derive(Debug, Clone)]
pub enum TransportSpec {
    /// Spawn a child process and speak over its stdin/stdout.
    Stdio {
        /// Command to execute.
        command: String,
        /// Command arguments.
        args: Vec<String>,
        /// Environment variables for the child.
        env: HashMap<String, String>,
    },
    /// Attach to a Server-Sent-Events endpoint.
    Sse {
        /// Endpoint URL.
        server_url: String,
        /// Read timeout per server event.
        read_timeout: Duration,
    },
    /// POST requests to a streamable-HTTP endpoint.
    StreamableHttp {
        /// Endpoint URL.
        server_url: String,
        /// Extra request headers.
        headers: HashMap<String, String>,
        /// Per-request timeout.
        timeout: Duration,
    },
}

impl TransportSpec {
    /// Validate raw parameters into a spec for the given transport kind.
    ///
    /// Requested timeouts are clamped to the configured ceiling.
    pub fn from_params(
        kind: TransportKind,
        params: TransportParams,
        settings: &McpSettings,
    ) -> Result<Self, RegistryError> {
        match kind {
            TransportKind::Stdio => {
                let command = params.command.filter(|c| !c.is_empty()).ok_or_else(|| {
                    RegistryError::TransportConfig(
                        "command is required for stdio transport".to_string(),
                    )
                })?;
                Ok(Self::Stdio {
                    command,
                    args: params.args,
                    env: params.env,
                })
            }
            TransportKind::Sse => {
                let server_url = params.server_url.filter(|u| !u.is_empty()).ok_or_else(|| {
                    RegistryError::TransportConfig(
                        "server_url is required for SSE transport".to_string(),
                    )
                })?;
                Ok(Self::Sse {
                    server_url,
                    read_timeout: settings.cap_sse_read_timeout(params.sse_read_timeout),
                })
            }
            TransportKind::StreamableHttp => {
                let server_url = params.server_url.filter(|u| !u.is_empty()).ok_or_else(|| {
                    RegistryError::TransportConfig(
                        "server_url is required for streamable HTTP transport".to_string(),
                    )
                })?;
                Ok(Self::StreamableHttp {
                    server_url,
                    headers: params.headers,
                    timeout: settings.cap_timeout(params.timeout),
                })
            }
        }
    }

    /// The transport kind this spec opens.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stdio { .. } => TransportKind::Stdio,
            Self::Sse { .. } => TransportKind::Sse,
            Self::StreamableHttp { .. } => TransportKind::StreamableHttp,
        }
    }

    /// Human-readable summary of the endpoint or command, for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Self::Stdio { command, args, .. } => {
                if args.is_empty() {
                    command.clone()
                } else {
                    format!("{} {}", command, args.join(" "))
                }
            }
            Self::Sse { server_url, .. } | Self::StreamableHttp { server_url, .. } => {
                server_url.clone()
            }
        }
    }

    /// Open a live transport for this spec.
    pub async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        match self {
            Self::Stdio { command, args, env } => Ok(Box::new(
                StdioTransport::spawn(command, args, env.clone()).await?,
            )),
            Self::Sse {
                server_url,
                read_timeout,
            } => Ok(Box::new(
                SseTransport::connect(server_url, *read_timeout).await?,
            )),
            Self::StreamableHttp {
                server_url,
                headers,
                timeout,
            } => Ok(Box::new(StreamableHttpTransport::new(
                server_url, headers, *timeout,
            )?)),
        }
    }
}

// ============================================================================
// stdio
// ============================================================================

/// Standard I/O transport.
///
/// Spawns a child process and exchanges newline-delimited JSON messages over
/// its stdin/stdout.
pub struct StdioTransport {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    connected: bool,
}

impl StdioTransport {
    /// Spawn a new stdio transport.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: HashMap<String, String>,
    ) -> Result<Self, TransportError> {
        debug!(command = command, args = ?args, "Spawning MCP server process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        for (key, value) in &env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(TransportError::SpawnFailed)?;

        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdin"))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::SpawnFailed(std::io::Error::other("failed to capture stdout"))
        })?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            connected: true,
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        self.stdin
            .write_all(message.as_bytes())
            .await
            .map_err(TransportError::WriteError)?;
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(TransportError::WriteError)?;
        self.stdin
            .flush()
            .await
            .map_err(TransportError::WriteError)?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        let mut line = String::new();
        let bytes_read = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(TransportError::ReadError)?;

        if bytes_read == 0 {
            self.connected = false;
            return Err(TransportError::ConnectionClosed);
        }

        Ok(line.trim_end().to_string())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        if let Some(pid) = self.child.id() {
            debug!(pid = pid, "Stopping MCP server process");

            // Ask nicely first, then kill after a short grace period.
            #[cfg(unix)]
            {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

                tokio::select! {
                    _ = self.child.wait() => {
                        debug!("MCP server exited gracefully");
                    }
                    _ = tokio::time::sleep(Duration::from_secs(2)) => {
                        warn!("MCP server did not exit gracefully, killing");
                        let _ = self.child.kill().await;
                    }
                }
            }

            #[cfg(not(unix))]
            {
                let _ = self.child.kill().await;
            }
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // kill_on_drop(true) reaps the child; just bar further use.
        self.connected = false;
    }
}

// ============================================================================
// SSE
// ============================================================================

struct SseEvent {
    name: String,
    data: String,
}

/// Incremental parser over an HTTP byte stream yielding SSE events.
struct SseEventStream {
    stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send + Sync>>,
    buffer: String,
}

impl SseEventStream {
    fn new(stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send + Sync>>) -> Self {
        Self {
            stream,
            buffer: String::new(),
        }
    }

    async fn next_event(&mut self) -> Result<SseEvent, TransportError> {
        loop {
            if let Some(event) = self.take_buffered_event() {
                return Ok(event);
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    let text = String::from_utf8_lossy(&chunk).replace("\r\n", "\n");
                    self.buffer.push_str(&text);
                }
                Some(Err(e)) => return Err(TransportError::Http(e)),
                None => return Err(TransportError::ConnectionClosed),
            }
        }
    }

    fn take_buffered_event(&mut self) -> Option<SseEvent> {
        // Skip comment/keep-alive blocks that parse to nothing.
        while let Some(boundary) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..boundary + 2).collect();
            if let Some(event) = parse_sse_block(block.trim_end()) {
                return Some(event);
            }
        }
        None
    }
}

fn parse_sse_block(block: &str) -> Option<SseEvent> {
    let mut name = String::new();
    let mut data: Vec<&str> = Vec::new();

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            name = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.trim_start());
        }
        // Comment lines (leading ':') and unknown fields are ignored.
    }

    if name.is_empty() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        name,
        data: data.join("\n"),
    })
}

/// Extract the data payloads of every event in a complete SSE body.
fn parse_sse_body(body: &str) -> Vec<String> {
    body.replace("\r\n", "\n")
        .split("\n\n")
        .filter_map(|block| parse_sse_block(block.trim_end()))
        .filter(|event| !event.data.is_empty())
        .map(|event| event.data)
        .collect()
}

/// Server-Sent-Events transport.
///
/// A GET against the endpoint yields the event stream; the stream's first
/// `endpoint` event names the URL messages are POSTed to, and responses
/// arrive back as `message` events.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: Url,
    events: SseEventStream,
    read_timeout: Duration,
    connected: bool,
}

impl SseTransport {
    /// Attach to an SSE endpoint and wait for its message endpoint.
    pub async fn connect(server_url: &str, read_timeout: Duration) -> Result<Self, TransportError> {
        debug!(url = server_url, "Opening SSE transport");

        let client = reqwest::Client::builder()
            .connect_timeout(read_timeout)
            .build()?;

        let response = client
            .get(server_url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        let mut events = SseEventStream::new(Box::pin(response.bytes_stream()));

        let base = Url::parse(server_url)
            .map_err(|_| TransportError::InvalidEndpoint(server_url.to_string()))?;
        let endpoint = loop {
            let event = tokio::time::timeout(read_timeout, events.next_event())
                .await
                .map_err(|_| TransportError::Timeout(read_timeout))?
                .map_err(|e| match e {
                    TransportError::ConnectionClosed => TransportError::EndpointMissing,
                    other => other,
                })?;
            if event.name == "endpoint" {
                let target = event.data.trim();
                break base
                    .join(target)
                    .map_err(|_| TransportError::InvalidEndpoint(target.to_string()))?;
            }
        };

        debug!(endpoint = %endpoint, "SSE transport ready");

        Ok(Self {
            client,
            endpoint,
            events,
            read_timeout,
            connected: true,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        self.client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(message.to_string())
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        loop {
            let event = tokio::time::timeout(self.read_timeout, self.events.next_event())
                .await
                .map_err(|_| TransportError::Timeout(self.read_timeout))??;

            // An absent event field means the default "message" type.
            if event.name.is_empty() || event.name == "message" {
                return Ok(event.data);
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Streamable HTTP
// ============================================================================

/// Streamable-HTTP transport.
///
/// Every message is POSTed to the endpoint; the response body (plain JSON or
/// a one-shot SSE stream) is queued for the following `receive`.
pub struct StreamableHttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    pending: VecDeque<String>,
    connected: bool,
}

impl StreamableHttpTransport {
    /// Build a transport for the given endpoint.
    pub fn new(
        server_url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| TransportError::InvalidHeader(key.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| TransportError::InvalidHeader(key.clone()))?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: server_url.to_string(),
            headers: header_map,
            pending: VecDeque::new(),
            connected: true,
        })
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(message.to_string())
            .send()
            .await?
            .error_for_status()?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await?;

        // Notifications are acknowledged with an empty body.
        if body.trim().is_empty() {
            return Ok(());
        }

        if content_type.starts_with("text/event-stream") {
            self.pending.extend(parse_sse_body(&body));
        } else {
            self.pending.push_back(body);
        }

        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.pending
            .pop_front()
            .ok_or(TransportError::NoPendingResponse)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        self.pending.clear();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
