//! Stdio transport: newline-delimited JSON-RPC over a child process's pipes

use std::process::Stdio;
use std::time::Duration;

use mcpmux_shared::LocalSpec;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::client::{McpClientError, McpResult, REQUEST_TIMEOUT};
use super::types::{JsonRpcRequest, JsonRpcResponse};

/// How long a child gets to exit after its stdin closes
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

struct Pipes {
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

/// A spawned backend process
pub struct StdioTransport {
    backend: String,
    pipes: Mutex<Pipes>,
    child: Mutex<Child>,
}

impl StdioTransport {
    /// Spawn the backend process.
    ///
    /// The child inherits the gateway's environment with the descriptor's
    /// entries overlaid, and is killed if the transport is dropped.
    pub fn spawn(backend: &str, spec: &LocalSpec) -> McpResult<Self> {
        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            McpClientError::ProcessError(format!("Failed to spawn {}: {}", spec.executable, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpClientError::ProcessError("Failed to capture stdin".to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpClientError::ProcessError("Failed to capture stdout".to_string()))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpClientError::ProcessError("Failed to capture stderr".to_string()))?;

        // Drain stderr into the log so the child never blocks on a full pipe
        let backend_name = backend.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        if trimmed.contains("ERROR") || trimmed.contains("FATAL") {
                            tracing::error!(backend = %backend_name, stderr = %trimmed);
                        } else if trimmed.contains("WARN") {
                            tracing::warn!(backend = %backend_name, stderr = %trimmed);
                        } else {
                            tracing::debug!(backend = %backend_name, stderr = %trimmed);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(backend = %backend_name, error = %e, "Failed to read stderr");
                        break;
                    }
                }
            }
            tracing::debug!(backend = %backend_name, "stderr reader task exiting");
        });

        tracing::debug!(
            backend = %backend,
            executable = %spec.executable,
            args = ?spec.args,
            "Spawned backend process"
        );

        Ok(Self {
            backend: backend.to_string(),
            pipes: Mutex::new(Pipes {
                stdin: Some(stdin),
                stdout: BufReader::new(stdout),
            }),
            child: Mutex::new(child),
        })
    }

    async fn write_message(pipes: &mut Pipes, message: &JsonRpcRequest) -> McpResult<()> {
        let stdin = pipes.stdin.as_mut().ok_or(McpClientError::Closed)?;

        let mut line = serde_json::to_string(message)?;
        line.push('\n');

        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send a request and wait for the response carrying the same id.
    ///
    /// Server-initiated messages and responses to earlier, abandoned requests
    /// are skipped.
    pub async fn send(&self, request: &JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let mut pipes = self.pipes.lock().await;
        Self::write_message(&mut pipes, request).await?;

        let read = async {
            let mut line = String::new();
            loop {
                line.clear();
                let bytes = pipes.stdout.read_line(&mut line).await?;
                if bytes == 0 {
                    tracing::error!(backend = %self.backend, "Backend process closed stdout");
                    return Err(McpClientError::Closed);
                }

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let value: serde_json::Value = match serde_json::from_str(trimmed) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(backend = %self.backend, error = %e, "Skipping non-JSON line on stdout");
                        continue;
                    }
                };

                if value.get("method").is_some() {
                    tracing::debug!(
                        backend = %self.backend,
                        method = ?value.get("method"),
                        "Ignoring server-initiated message"
                    );
                    continue;
                }

                let response: JsonRpcResponse = serde_json::from_value(value)?;
                if response.id == request.id {
                    return Ok(response);
                }

                tracing::debug!(backend = %self.backend, id = ?response.id, "Skipping stale response");
            }
        };

        match tokio::time::timeout(REQUEST_TIMEOUT, read).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(backend = %self.backend, method = %request.method, "Timeout reading from backend process");
                Err(McpClientError::Timeout)
            }
        }
    }

    pub async fn notify(&self, notification: &JsonRpcRequest) -> McpResult<()> {
        let mut pipes = self.pipes.lock().await;
        Self::write_message(&mut pipes, notification).await
    }

    /// Close stdin, give the child a grace period, then kill and reap it
    pub async fn close(&self) {
        {
            let mut pipes = self.pipes.lock().await;
            pipes.stdin.take();
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(backend = %self.backend, status = ?status, "Backend process exited");
            }
            Ok(Err(e)) => {
                tracing::error!(backend = %self.backend, error = %e, "Error waiting for backend process");
            }
            Err(_) => {
                tracing::warn!(backend = %self.backend, "Killing unresponsive backend process");
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }
    }
}
