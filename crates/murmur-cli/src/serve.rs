// ABOUTME: Line-delimited JSON-RPC tool server over stdin and stdout.
// ABOUTME: Dispatches initialize, tools/list, and tools/call onto BusTools.

use anyhow::{Context, Result};
use murmur_core::{AgentBus, Config};
use murmur_tools::{tool_definitions, BusTools};
use serde_json::{json, Value};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::rpc::{
    JsonRpcRequest, JsonRpcResponse, TextContent, ToolsCallParams, ToolsCallResult,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
    PROTOCOL_VERSION,
};

pub struct ServeOptions {
    pub config_path: Option<PathBuf>,
}

/// Tools that wait on another agent; their calls run off the read loop.
const DETACHED_TOOLS: &[&str] = &["request_response"];

/// Buffered responses from detached calls awaiting the writer.
const RESPONSE_BUFFER: usize = 32;

/// Serves tool calls for one bus.
#[derive(Clone)]
pub struct StdioServer {
    tools: BusTools,
}

impl StdioServer {
    pub fn new(bus: Arc<AgentBus>) -> Self {
        Self {
            tools: BusTools::new(bus),
        }
    }

    pub fn bus(&self) -> &Arc<AgentBus> {
        self.tools.bus()
    }

    /// Handle one request line. Notifications produce no response.
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        match parse_request(line) {
            Ok(request) => encode(&self.handle_request(request).await?),
            Err(response) => encode(&response),
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id else {
            debug!(method = %request.method, "Notification received");
            return None;
        };

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                id,
                INVALID_REQUEST,
                format!("unsupported jsonrpc version: {}", request.jsonrpc),
            ));
        }

        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::result(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "murmur",
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            ),
            "ping" => JsonRpcResponse::result(id, json!({})),
            "tools/list" => JsonRpcResponse::result(id, json!({ "tools": tool_definitions() })),
            "tools/call" => {
                let params: ToolsCallParams =
                    match serde_json::from_value(request.params.unwrap_or_default()) {
                        Ok(params) => params,
                        Err(e) => {
                            return Some(JsonRpcResponse::error(
                                id,
                                INVALID_PARAMS,
                                format!("invalid tools/call params: {e}"),
                            ))
                        }
                    };

                let outcome = self.tools.call(&params.name, &params.arguments).await;
                let result = ToolsCallResult {
                    content: vec![TextContent::new(outcome.text)],
                    is_error: outcome.is_error,
                };
                match serde_json::to_value(&result) {
                    Ok(value) => JsonRpcResponse::result(id, value),
                    Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
                }
            }
            other => JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            ),
        };
        Some(response)
    }

    /// Serve until `reader` reaches EOF or `shutdown` completes.
    ///
    /// Requests are answered in arrival order, except calls that wait on
    /// another agent: those run on their own task and answer when they
    /// settle, so later lines (including the reply they wait for) keep
    /// flowing. At EOF the server finishes in-flight calls before returning.
    pub async fn run<R, W, S>(&self, reader: R, mut writer: W, shutdown: S) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        let mut lines = reader.lines();
        let (tx, mut rx) = mpsc::channel::<String>(RESPONSE_BUFFER);
        let mut tx = Some(tx);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                line = lines.next_line(), if tx.is_some() => {
                    let Some(line) = line.context("reading request")? else {
                        info!("Input closed, finishing in-flight requests");
                        tx = None;
                        continue;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let request = match parse_request(&line) {
                        Ok(request) => request,
                        Err(response) => {
                            write_line(&mut writer, encode(&response)).await?;
                            continue;
                        }
                    };
                    match &tx {
                        Some(tx) if is_detached(&request) => {
                            let server = self.clone();
                            let tx = tx.clone();
                            tokio::spawn(async move {
                                let Some(response) = server.handle_request(request).await else {
                                    return;
                                };
                                if let Some(text) = encode(&response) {
                                    if tx.send(text).await.is_err() {
                                        debug!("Server stopped before a detached call finished");
                                    }
                                }
                            });
                        }
                        _ => {
                            let response = self.handle_request(request).await;
                            write_line(&mut writer, response.as_ref().and_then(encode)).await?;
                        }
                    }
                }
                response = rx.recv() => {
                    let Some(response) = response else {
                        info!("Input closed, stopping server");
                        break;
                    };
                    write_line(&mut writer, Some(response)).await?;
                }
                _ = &mut shutdown => break,
            }
        }

        Ok(())
    }
}

fn parse_request(line: &str) -> std::result::Result<JsonRpcRequest, JsonRpcResponse> {
    serde_json::from_str::<JsonRpcRequest>(line).map_err(|e| {
        warn!(error = %e, "Unparseable request");
        JsonRpcResponse::error(Value::Null, PARSE_ERROR, format!("parse error: {e}"))
    })
}

fn encode(response: &JsonRpcResponse) -> Option<String> {
    match serde_json::to_string(response) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, "Failed to serialize response");
            None
        }
    }
}

/// Whether the request is a tool call that blocks on another agent.
fn is_detached(request: &JsonRpcRequest) -> bool {
    request.id.is_some()
        && request.method == "tools/call"
        && request
            .params
            .as_ref()
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .is_some_and(|name| DETACHED_TOOLS.contains(&name))
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: Option<String>) -> Result<()> {
    let Some(line) = line else {
        return Ok(());
    };
    writer.write_all(line.as_bytes()).await.context("writing response")?;
    writer.write_all(b"\n").await.context("writing response")?;
    writer.flush().await.context("flushing response")?;
    Ok(())
}

/// Build a bus over the in-memory broker and serve stdio until EOF or a signal.
pub async fn run_serve(options: ServeOptions) -> Result<()> {
    let config = match options.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    }
    .with_env_overrides();

    let bus = Arc::new(
        AgentBus::in_memory(config)
            .await
            .context("starting agent bus")?,
    );
    let server = StdioServer::new(bus.clone());
    info!("murmur tool server listening on stdio");

    let result = server
        .run(
            BufReader::new(tokio::io::stdin()),
            tokio::io::stdout(),
            shutdown_signal(),
        )
        .await;

    bus.shutdown().await;
    info!("Server shut down gracefully");
    result
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Print every tool definition as pretty JSON.
pub fn run_tools() -> Result<()> {
    let json = serde_json::to_string_pretty(&tool_definitions())
        .context("serializing tool definitions")?;
    println!("{json}");
    Ok(())
}

/// Write the default config file if missing and print its path.
pub fn run_init() -> Result<()> {
    let path = Config::init()?;
    println!("Config: {}", path.display());
    Ok(())
}
