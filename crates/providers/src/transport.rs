//! reqwest-backed [`Transport`].
//!
//! Credentials are injected here and nowhere else: adapters describe the
//! request, this module adds the vendor's auth header, sends it, maps error
//! statuses, and streams the decoded body text over a channel.

use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use streamloop_core::{ChunkStream, HttpRequest, Transport, TransportError};

/// Default request timeout; long tool-heavy turns can take minutes.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// How the API key travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `x-api-key: <key>` (Anthropic)
    XApiKey,
    /// `Authorization: Bearer <key>` (OpenAI and compatibles)
    Bearer,
    /// `x-goog-api-key: <key>` (Gemini)
    GoogApiKey,
}

/// HTTP transport for streaming vendor APIs.
pub struct HttpTransport {
    client: reqwest::Client,
    auth: AuthScheme,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("auth", &self.auth)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl HttpTransport {
    pub fn new(auth: AuthScheme, api_key: Option<String>) -> Result<Self, TransportError> {
        Self::with_timeout(auth, api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        auth: AuthScheme,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            auth,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some(ref key) = self.api_key else {
            return builder;
        };
        match self.auth {
            AuthScheme::XApiKey => builder.header("x-api-key", key),
            AuthScheme::Bearer => builder.bearer_auth(key),
            AuthScheme::GoogApiKey => builder.header("x-goog-api-key", key),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, TransportError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        let builder = self.authorize(builder).json(&request.body);

        debug!(url = %request.url, "Sending streaming request");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = builder.send() => result.map_err(|e| TransportError::Network(e.to_string()))?,
        };

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(5);
            return Err(TransportError::RateLimited { retry_after_secs });
        }
        if status == 401 || status == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::AuthenticationFailed(body));
        }
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider API error");
            return Err(TransportError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = Utf8Decoder::default();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let _ = tx.send(Err(TransportError::Cancelled)).await;
                        return;
                    }
                    next = byte_stream.next() => next,
                };

                let bytes = match next {
                    Some(Ok(b)) => b,
                    Some(Err(e)) => {
                        let _ = tx
                            .send(Err(TransportError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                    None => break,
                };

                let text = decoder.decode(&bytes);
                if !text.is_empty() && tx.send(Ok(text)).await.is_err() {
                    return; // receiver dropped
                }
            }

            let rest = decoder.finish();
            if !rest.is_empty() {
                let _ = tx.send(Ok(rest)).await;
            }
        });

        Ok(rx)
    }
}

/// Decodes a byte stream as UTF-8 without splitting multi-byte characters
/// that straddle chunk boundaries.
#[derive(Debug, Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated character at the end: wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left once the stream ends.
    pub(crate) fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}
