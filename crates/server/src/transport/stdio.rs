//! Newline-delimited JSON-RPC over stdin/stdout.

use crate::app::ServerContext;
use crate::error::Result;
use crate::protocol::{JsonRpcError, JsonRpcResponse};
use crate::session::ProtocolSession;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Serve one session on the process's stdin/stdout until EOF.
///
/// # Errors
///
/// Returns an error if reading stdin or writing stdout fails.
pub async fn serve_stdio(ctx: Arc<ServerContext>) -> Result<()> {
    tracing::info!("Serving MCP over stdio");
    serve_lines(ctx, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Serve one session over any line-oriented reader/writer pair.
///
/// Blank lines are skipped. Malformed lines get a parse error reply and the loop continues.
///
/// # Errors
///
/// Returns an error if reading or writing fails.
pub async fn serve_lines<R, W>(ctx: Arc<ServerContext>, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session = ProtocolSession::new(ctx);
    let mut raw = Vec::new();

    loop {
        raw.clear();
        let n = reader.read_until(b'\n', &mut raw).await?;
        if n == 0 {
            break;
        }

        let reply = match std::str::from_utf8(&raw) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => session.handle_text(text.trim()).await,
            Err(_) => Some(JsonRpcResponse::error(
                Value::Null,
                JsonRpcError::parse_error(),
            )),
        };

        if let Some(reply) = reply {
            let mut line = serde_json::to_vec(&reply)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
            writer.flush().await?;
        }
    }

    tracing::info!("stdin closed; stdio session finished");
    Ok(())
}
