// src/player/process.rs — Audio runtime subprocess (JSON-RPC over stdio)
//
// Protocol, one JSON object per line:
//   ready              -> {"ready": bool}
//   evaluate {code}    -> {"ok": bool, "error"?: string}
//   hush               -> {"ok": bool, "error"?: string}
// The runtime may interleave `log {level, message}` notifications.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::{EvalEndpoint, EvalResult};
use crate::infra::config::PlayerConfig;
use crate::infra::errors::RiffError;

struct RpcIo {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// The audio runtime as a child process.
pub struct ProcessEndpoint {
    command: String,
    process: Mutex<Child>,
    io: Mutex<RpcIo>,
    next_id: AtomicU64,
    alive: AtomicBool,
}

/// One line read from the runtime.
#[derive(Debug, PartialEq)]
enum Incoming {
    Response {
        id: u64,
        result: Result<Value, String>,
    },
    Notification {
        method: String,
        params: Value,
    },
    Unrecognized,
}

impl ProcessEndpoint {
    /// Spawn the configured runtime. Fails if the command is not on PATH.
    pub fn spawn(cfg: &PlayerConfig) -> Result<Self, RiffError> {
        let program = which::which(&cfg.command).map_err(|_| {
            RiffError::Endpoint(format!(
                "'{}' not found. Install it or set [player].command in config.toml.",
                cfg.command
            ))
        })?;

        let mut cmd = Command::new(&program);
        cmd.args(&cfg.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        for (k, v) in &cfg.env {
            cmd.env(k, v);
        }

        let mut process = cmd.spawn()?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| RiffError::Endpoint("Failed to capture stdin".into()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| RiffError::Endpoint("Failed to capture stdout".into()))?;

        tracing::info!(command = %program.display(), pid = ?process.id(), "Audio engine spawned");

        Ok(Self {
            command: cfg.command.clone(),
            process: Mutex::new(process),
            io: Mutex::new(RpcIo {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            next_id: AtomicU64::new(1),
            alive: AtomicBool::new(true),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Send one request and wait for its response. Once the pipe breaks the
    /// endpoint stays dead and every call reports `EndpointNotReady`.
    async fn call(&self, method: &str, params: Value) -> Result<Value, RiffError> {
        if !self.is_alive() {
            return Err(RiffError::EndpointNotReady);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut io = self.io.lock().await;

        let line = serde_json::to_string(&rpc_request(id, method, params))?;
        let written = async {
            io.stdin.write_all(line.as_bytes()).await?;
            io.stdin.write_all(b"\n").await?;
            io.stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            return Err(self.mark_dead(&format!("write failed: {e}")));
        }

        loop {
            let mut buf = String::new();
            match io.stdout.read_line(&mut buf).await {
                Ok(0) => return Err(self.mark_dead("closed its output")),
                Ok(_) => {}
                Err(e) => return Err(self.mark_dead(&format!("read failed: {e}"))),
            }

            match classify(&buf) {
                Incoming::Response { id: rid, result } if rid == id => {
                    return result.map_err(RiffError::Endpoint);
                }
                Incoming::Response { id: rid, .. } => {
                    tracing::debug!(expected = id, got = rid, "Skipping stale response");
                }
                Incoming::Notification { method, params } => forward_notification(&method, &params),
                Incoming::Unrecognized => {
                    tracing::debug!(line = buf.trim_end(), "Ignoring non-JSON-RPC output");
                }
            }
        }
    }

    fn mark_dead(&self, reason: &str) -> RiffError {
        if self.alive.swap(false, Ordering::AcqRel) {
            tracing::warn!(command = %self.command, reason, "Audio engine exited");
        }
        RiffError::EndpointNotReady
    }
}

#[async_trait]
impl EvalEndpoint for ProcessEndpoint {
    async fn is_ready(&self) -> Result<bool, RiffError> {
        let result = self.call("ready", json!({})).await?;
        Ok(result.get("ready").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn evaluate(&self, code: &str) -> Result<EvalResult, RiffError> {
        let result = self.call("evaluate", json!({ "code": code })).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn stop(&self) -> Result<EvalResult, RiffError> {
        let result = self.call("hush", json!({})).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn close(&self) -> Result<(), RiffError> {
        self.alive.store(false, Ordering::Release);
        let mut process = self.process.lock().await;
        // Already exited is fine.
        process.kill().await.ok();
        Ok(())
    }
}

fn rpc_request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

fn classify(line: &str) -> Incoming {
    let Ok(msg) = serde_json::from_str::<Value>(line.trim()) else {
        return Incoming::Unrecognized;
    };

    if let Some(id) = msg.get("id").and_then(Value::as_u64) {
        let result = match msg.get("error") {
            Some(err) => Err(err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string()),
            None => Ok(msg.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Incoming::Response { id, result };
    }

    match msg.get("method").and_then(Value::as_str) {
        Some(method) => Incoming::Notification {
            method: method.to_string(),
            params: msg.get("params").cloned().unwrap_or(Value::Null),
        },
        None => Incoming::Unrecognized,
    }
}

/// Runtime log lines go to our tracing output.
fn forward_notification(method: &str, params: &Value) {
    if method != "log" {
        tracing::debug!(method, "Ignoring runtime notification");
        return;
    }
    let message = params.get("message").and_then(Value::as_str).unwrap_or("");
    match params.get("level").and_then(Value::as_str).unwrap_or("info") {
        "error" => tracing::error!(target: "riff::engine", "{message}"),
        "warn" => tracing::warn!(target: "riff::engine", "{message}"),
        "debug" => tracing::debug!(target: "riff::engine", "{message}"),
        _ => tracing::info!(target: "riff::engine", "{message}"),
    }
}
