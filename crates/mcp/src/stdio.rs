//! Newline-delimited JSON-RPC over stdin/stdout.
//!
//! Every request is dispatched on its own task, so a slow handler does not
//! hold up later lines; responses may therefore leave out of order and
//! clients correlate them by id. Stdout carries protocol traffic only.

use crate::dispatcher::Dispatcher;
use crate::protocol::{JsonRpcError, JsonRpcResponse};
use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

/// Longest accepted input line.
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Serve the dispatcher on the process's stdin and stdout until stdin closes.
pub async fn serve_stdio(dispatcher: Arc<Dispatcher>) -> Result<()> {
    serve_io(dispatcher, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve the dispatcher over any line-oriented byte stream pair.
pub async fn serve_io<R, W>(dispatcher: Arc<Dispatcher>, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut sink = FramedWrite::new(writer, LinesCodec::new());

    let (tx, mut rx) = mpsc::channel::<String>(64);

    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if let Err(e) = sink.send(line).await {
                tracing::error!(error = %e, "Failed to write to stdout");
                break;
            }
        }
    });

    let mut in_flight = JoinSet::new();

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                tracing::warn!("Discarding oversized input line");
                send(&tx, JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error())).await;
                continue;
            }
            Err(LinesCodecError::Io(e)) => {
                tracing::error!(error = %e, "Failed to read from stdin");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let dispatcher = Arc::clone(&dispatcher);
        let tx = tx.clone();
        in_flight.spawn(async move {
            if let Some(response) = dispatcher.handle_message(&line).await {
                send(&tx, response).await;
            }
        });

        // Reap finished tasks so the set does not grow over a long session.
        while in_flight.try_join_next().is_some() {}
    }

    tracing::info!("Input closed, draining in-flight requests");
    while in_flight.join_next().await.is_some() {}
    drop(tx);
    let _ = writer_task.await;

    Ok(())
}

async fn send(tx: &mpsc::Sender<String>, response: JsonRpcResponse) {
    match serde_json::to_string(&response) {
        Ok(json) => {
            let _ = tx.send(json).await;
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize response"),
    }
}
