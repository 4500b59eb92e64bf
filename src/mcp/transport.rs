//! Stdio and streamable-HTTP transports

use super::types::{Message, Request};
use super::McpError;
use crate::flow::McpConfig;
use crate::llm::sse::SseParser;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

const SESSION_HEADER: &str = "mcp-session-id";

/// One JSON-RPC channel to a tool server
#[async_trait]
pub(crate) trait Transport: Send + Sync {
    /// Send a request and wait for the response with the same id
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError>;

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError>;
}

fn into_result(message: Message) -> Result<Value, McpError> {
    if let Some(error) = message.error {
        return Err(McpError::Invocation(format!(
            "JSON-RPC error {}: {}",
            error.code, error.message
        )));
    }
    Ok(message.result.unwrap_or(Value::Null))
}

/// Newline-delimited JSON-RPC over a child process
pub(crate) struct StdioTransport {
    io: tokio::sync::Mutex<StdioIo>,
    next_id: AtomicU64,
}

struct StdioIo {
    // Held so the server is killed when the transport drops
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl StdioTransport {
    pub fn spawn(config: &McpConfig) -> Result<Self, McpError> {
        let program = config
            .command
            .as_deref()
            .ok_or_else(|| McpError::Connection(format!("{}: no command configured", config.name)))?;

        let mut child = Command::new(program)
            .args(&config.args)
            .envs(&config.envs)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Connection(format!("{}: failed to spawn {program}: {e}", config.name)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Connection(format!("{}: stdin unavailable", config.name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Connection(format!("{}: stdout unavailable", config.name)))?;

        if let Some(stderr) = child.stderr.take() {
            let server = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, "{line}");
                }
            });
        }

        Ok(Self {
            io: tokio::sync::Mutex::new(StdioIo {
                _child: child,
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            next_id: AtomicU64::new(1),
        })
    }

    async fn write(io: &mut StdioIo, request: &Request<'_>) -> Result<(), McpError> {
        let mut line = serde_json::to_vec(request).map_err(|e| McpError::Protocol(e.to_string()))?;
        line.push(b'\n');
        io.stdin
            .write_all(&line)
            .await
            .map_err(|e| McpError::Invocation(format!("write failed: {e}")))?;
        io.stdin
            .flush()
            .await
            .map_err(|e| McpError::Invocation(format!("flush failed: {e}")))
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut io = self.io.lock().await;
        Self::write(&mut io, &Request::call(id, method, params)).await?;

        // Responses to abandoned requests and server notifications are skipped
        loop {
            let line = io
                .stdout
                .next_line()
                .await
                .map_err(|e| McpError::Invocation(format!("read failed: {e}")))?
                .ok_or_else(|| McpError::Invocation("tool server closed its output".to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(error = %e, line = %line, "Ignoring non JSON-RPC output from tool server");
                    continue;
                }
            };
            if message.answers(id) {
                return into_result(message);
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        let mut io = self.io.lock().await;
        Self::write(&mut io, &Request::notification(method, params)).await
    }
}

/// JSON-RPC over HTTP POST; responses arrive as JSON or as an SSE stream
pub(crate) struct HttpTransport {
    client: reqwest::Client,
    url: String,
    authorization: Option<HeaderValue>,
    session_id: Mutex<Option<HeaderValue>>,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(config: &McpConfig) -> Result<Self, McpError> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| McpError::Connection(format!("{}: no url configured", config.name)))?;
        let authorization = config
            .authentication
            .as_deref()
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|e| McpError::Connection(format!("{}: invalid credential: {e}", config.name)))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| McpError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            url,
            authorization,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    fn session_id(&self) -> Option<HeaderValue> {
        self.session_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    async fn post(&self, request: &Request<'_>) -> Result<reqwest::Response, McpError> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(request);
        if let Some(auth) = &self.authorization {
            builder = builder.header(AUTHORIZATION, auth.clone());
        }
        if let Some(session) = self.session_id() {
            builder = builder.header(SESSION_HEADER, session);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| McpError::Invocation(format!("HTTP request failed: {e}")))?;

        if let Some(session) = response.headers().get(SESSION_HEADER) {
            *self
                .session_id
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(session.clone());
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Invocation(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }

    async fn read_event_stream(response: reqwest::Response, id: u64) -> Result<Value, McpError> {
        let mut stream = response.bytes_stream();
        let mut parser = SseParser::default();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| McpError::Invocation(format!("stream interrupted: {e}")))?;
            for payload in parser.feed(&bytes) {
                if let Some(message) = parse_answer(&payload, id)? {
                    return into_result(message);
                }
            }
        }
        if let Some(payload) = parser.finish() {
            if let Some(message) = parse_answer(&payload, id)? {
                return into_result(message);
            }
        }
        Err(McpError::Protocol(format!("event stream ended without a response to request {id}")))
    }
}

fn parse_answer(payload: &str, id: u64) -> Result<Option<Message>, McpError> {
    let message: Message = serde_json::from_str(payload).map_err(|e| McpError::Protocol(e.to_string()))?;
    Ok(message.answers(id).then_some(message))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self.post(&Request::call(id, method, params)).await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        if is_event_stream {
            Self::read_event_stream(response, id).await
        } else {
            let message: Message = response
                .json()
                .await
                .map_err(|e| McpError::Protocol(e.to_string()))?;
            into_result(message)
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.post(&Request::notification(method, params)).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{header, HeaderMap, StatusCode},
        response::IntoResponse,
        routing::post,
        Json, Router,
    };
    use serde_json::json;

    async fn mcp_endpoint(headers: HeaderMap, Json(body): Json<Value>) -> axum::response::Response {
        let Some(id) = body.get("id").cloned() else {
            return StatusCode::ACCEPTED.into_response();
        };
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let session = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        match body["method"].as_str() {
            Some("initialize") => (
                [(SESSION_HEADER, "sess-1")],
                Json(json!({"jsonrpc": "2.0", "id": id, "result": {"protocolVersion": "2025-03-26"}})),
            )
                .into_response(),
            Some("echo") => {
                let frame = format!(
                    "event: message\ndata: {}\n\n",
                    json!({"jsonrpc": "2.0", "id": id, "result": {"auth": auth, "session": session}})
                );
                ([(header::CONTENT_TYPE, "text/event-stream")], frame).into_response()
            }
            _ => Json(json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}}))
                .into_response(),
        }
    }

    async fn serve() -> String {
        let app = Router::new().route("/mcp", post(mcp_endpoint));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/mcp")
    }

    #[tokio::test]
    async fn test_http_keeps_session_and_credential() {
        let url = serve().await;
        let transport =
            HttpTransport::new(&McpConfig::http("remote", url, Some("Bearer abc".into()))).unwrap();

        transport.request("initialize", json!({})).await.unwrap();
        transport.notify("notifications/initialized", Value::Null).await.unwrap();
        let result = transport.request("echo", json!({})).await.unwrap();
        assert_eq!(result, json!({"auth": "Bearer abc", "session": "sess-1"}));
    }

    #[tokio::test]
    async fn test_http_rpc_error_is_invocation_error() {
        let url = serve().await;
        let transport = HttpTransport::new(&McpConfig::http("remote", url, None)).unwrap();
        let err = transport.request("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Invocation(msg) if msg.contains("-32601")));
    }

    #[tokio::test]
    async fn test_stdio_spawn_failure_is_connection_error() {
        let config = McpConfig::stdio("ghost", "/nonexistent/stockmind-tool-server", vec![]);
        assert!(matches!(StdioTransport::spawn(&config), Err(McpError::Connection(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_skips_notifications_until_response() {
        let script = r#"read line; echo '{"jsonrpc":"2.0","method":"notifications/message","params":{}}'; echo '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}'"#;
        let config = McpConfig::stdio("sh", "sh", vec!["-c".into(), script.into()]);
        let transport = StdioTransport::spawn(&config).unwrap();
        let result = transport.request("ping", json!({})).await.unwrap();
        assert_eq!(result, json!({"ok": true}));
    }
}
