//! Shared I/O helpers for the fake server.
//!
//! Every write is flushed immediately so the client sees it on its
//! next poll.

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Write a string to the stream and flush.
pub async fn write_text<S: AsyncWrite + Unpin>(stream: &mut S, text: &str) -> std::io::Result<()> {
    write_bytes(stream, text.as_bytes()).await
}

/// Write raw bytes to the stream and flush.
pub async fn write_bytes<S: AsyncWrite + Unpin>(stream: &mut S, data: &[u8]) -> std::io::Result<()> {
    stream.write_all(data).await?;
    stream.flush().await
}
