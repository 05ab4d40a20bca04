#![allow(dead_code)]

use anyhow::Context as _;
use futures::StreamExt as _;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tokio::io::AsyncBufReadExt as _;
use tokio_util::io::StreamReader;

pub use toolsmith_test_support::{KillOnDrop, StubUpstream, pick_unused_port, wait_http_ok};

pub const BIN: &str = env!("CARGO_BIN_EXE_toolsmith-mcp-server");

/// A small users API pointing at `base_url`.
pub fn users_spec(base_url: &str) -> Value {
    json!({
        "openapi": "3.0.0",
        "info": {"title": "Users API", "version": "1"},
        "servers": [{"url": base_url}],
        "paths": {
            "/users/{id}": {
                "get": {
                    "summary": "Fetch a user",
                    "parameters": [
                        {"name": "id", "in": "path", "required": true, "schema": {"type": "integer"}}
                    ]
                }
            },
            "/users": {
                "post": {
                    "requestBody": {"content": {"application/json": {"schema": {
                        "type": "object",
                        "properties": {"name": {"type": "string"}, "age": {"type": "integer"}},
                        "required": ["name"]
                    }}}}
                }
            },
            "/fail": {"get": {"operationId": "always_fails"}}
        }
    })
}

pub fn write_spec(dir: &Path, spec: &Value) -> anyhow::Result<PathBuf> {
    let path = dir.join("openapi.json");
    std::fs::write(&path, serde_json::to_vec_pretty(spec)?).context("write spec")?;
    Ok(path)
}

pub fn spawn_http_server(spec_path: &Path, port: u16, transport: &str) -> anyhow::Result<Child> {
    Command::new(BIN)
        .arg("--spec")
        .arg(spec_path)
        .arg("--transport")
        .arg(transport)
        .arg("--bind")
        .arg(format!("127.0.0.1:{port}"))
        .arg("--log-level")
        .arg("info")
        .stdout(Stdio::null())
        .spawn()
        .context("spawn toolsmith-mcp-server")
}

/// Read the first `data:` event of an SSE response as JSON.
pub async fn read_next_event_json<R>(lines: &mut tokio::io::Lines<R>) -> anyhow::Result<Value>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut data_lines: Vec<String> = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim_end().to_string();

        if line.is_empty() {
            if data_lines.is_empty() {
                continue;
            }
            let data = data_lines.join("\n");
            return serde_json::from_str(&data).context("parse event-stream data as JSON");
        }

        if let Some(v) = line.strip_prefix("data:") {
            data_lines.push(v.trim().to_string());
        }
    }

    anyhow::bail!("event-stream ended without a JSON message")
}

pub fn event_stream_lines(
    resp: reqwest::Response,
) -> tokio::io::Lines<tokio::io::BufReader<impl tokio::io::AsyncRead + Unpin>> {
    let byte_stream = Box::pin(resp.bytes_stream().map(|r| r.map_err(std::io::Error::other)));
    let reader = StreamReader::new(byte_stream);
    tokio::io::BufReader::new(reader).lines()
}
