mod common;

use anyhow::Context as _;
use common::{BIN, StubUpstream, users_spec, write_spec};
use serde_json::{Value, json};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

struct StdioClient {
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl StdioClient {
    fn spawn(spec_path: &std::path::Path) -> anyhow::Result<Self> {
        let mut child = Command::new(BIN)
            .arg("--spec")
            .arg(spec_path)
            .arg("--transport")
            .arg("stdio")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("spawn toolsmith-mcp-server")?;
        let stdin = child.stdin.take().context("child stdin")?;
        let stdout = child.stdout.take().context("child stdout")?;
        Ok(Self {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn send(&mut self, message: &Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn request(&mut self, message: &Value) -> anyhow::Result<Value> {
        self.send(message).await?;
        let line = tokio::time::timeout(std::time::Duration::from_secs(10), self.stdout.next_line())
            .await
            .context("timed out waiting for reply")??
            .context("server closed stdout")?;
        serde_json::from_str(&line).context("reply is not JSON")
    }
}

#[tokio::test]
async fn stdio_session_lists_and_calls_tools() -> anyhow::Result<()> {
    let upstream = StubUpstream::start().await?;
    let dir = tempfile::tempdir()?;
    let spec_path = write_spec(dir.path(), &users_spec(upstream.base_url()))?;
    let mut client = StdioClient::spawn(&spec_path)?;

    let early = client
        .request(&json!({"jsonrpc": "2.0", "id": 0, "method": "tools/list"}))
        .await?;
    assert_eq!(early["error"]["code"], json!(-32002));

    let init = client
        .request(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        .await?;
    assert_eq!(init["id"], json!(1));
    assert_eq!(init["result"]["protocolVersion"], json!("2025-03-26"));
    assert_eq!(init["result"]["serverInfo"]["name"], json!("Users API"));

    client
        .send(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await?;

    let list = client
        .request(&json!({"jsonrpc": "2.0", "id": "list", "method": "tools/list"}))
        .await?;
    assert_eq!(list["id"], json!("list"));
    let names: Vec<&str> = list["result"]["tools"]
        .as_array()
        .context("tools array")?
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names, vec!["get_users", "create_user", "always_fails"]);

    let call = client
        .request(&json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": {"name": "get_users", "arguments": {"id": 42}}
        }))
        .await?;
    assert_eq!(call["result"]["isError"], json!(false));
    let text = call["result"]["content"][0]["text"]
        .as_str()
        .context("text content")?;
    let payload: Value = serde_json::from_str(text)?;
    assert_eq!(payload, json!({"id": 42, "name": "Ada"}));

    let created = client
        .request(&json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": {"name": "create_user", "arguments": {"name": "Ada", "age": 36}}
        }))
        .await?;
    let text = created["result"]["content"][0]["text"]
        .as_str()
        .context("text content")?;
    let echoed: Value = serde_json::from_str(text)?;
    assert_eq!(echoed["method"], json!("POST"));
    assert_eq!(echoed["path"], json!("/users"));
    assert_eq!(echoed["body"], json!({"name": "Ada", "age": 36}));

    let failed = client
        .request(&json!({
            "jsonrpc": "2.0", "id": 4, "method": "tools/call",
            "params": {"name": "always_fails", "arguments": {}}
        }))
        .await?;
    assert_eq!(failed["result"]["isError"], json!(true));

    Ok(())
}

#[tokio::test]
async fn stdio_missing_argument_never_reaches_upstream() -> anyhow::Result<()> {
    let upstream = StubUpstream::start().await?;
    let dir = tempfile::tempdir()?;
    let spec_path = write_spec(dir.path(), &users_spec(upstream.base_url()))?;
    let mut client = StdioClient::spawn(&spec_path)?;

    client
        .request(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}))
        .await?;

    let call = client
        .request(&json!({
            "jsonrpc": "2.0", "id": 2, "method": "tools/call",
            "params": {"name": "get_users", "arguments": {}}
        }))
        .await?;
    assert_eq!(call["result"]["isError"], json!(true));
    assert!(
        call["result"]["content"][0]["text"]
            .as_str()
            .is_some_and(|t| t.contains("Missing required parameter: id"))
    );

    let unknown = client
        .request(&json!({
            "jsonrpc": "2.0", "id": 3, "method": "tools/call",
            "params": {"name": "nope", "arguments": {}}
        }))
        .await?;
    assert_eq!(unknown["error"]["code"], json!(-32602));
    assert_eq!(unknown["error"]["message"], json!("Tool not found"));

    let garbage = client.request(&json!("not a request")).await?;
    assert_eq!(garbage["error"]["code"], json!(-32600));

    assert_eq!(upstream.hits(), 0);
    Ok(())
}
