//! Transport trait: sends an [`HttpRequest`] and streams back raw body text.
//!
//! Credentials are the transport's business; adapters never see them.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::provider::HttpRequest;

/// Raw body chunks in arrival order. Chunk boundaries are arbitrary and carry
/// no meaning; an `Err` item ends the stream.
pub type ChunkStream = mpsc::Receiver<std::result::Result<String, TransportError>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request. A non-success status is reported here, before any
    /// chunk is produced. Cancelling the token aborts the request and ends
    /// the stream with `TransportError::Cancelled`.
    async fn send(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ChunkStream, TransportError>;
}
