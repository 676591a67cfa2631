use crate::record::EnrichedLogRecord;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

/// How much of an error response body ends up in logs
const BODY_EXCERPT_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum ShipError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

pub type Result<T> = std::result::Result<T, ShipError>;

/// What was delivered, for progress logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipReceipt {
    pub status: u16,
    pub bytes: usize,
    /// Hex SHA-256 of the exact request body
    pub digest: String,
}

/// Delivers one batch as one request.
#[async_trait]
pub trait BatchShipper: Send + Sync {
    /// `Ok` only on a 2xx response. Anything else means the whole batch
    /// counts as not delivered.
    async fn send(&self, endpoint: &str, records: &[EnrichedLogRecord]) -> Result<ShipReceipt>;
}

/// Serialize a batch exactly as it goes on the wire: one JSON array.
pub fn encode_batch(records: &[EnrichedLogRecord]) -> Result<(Vec<u8>, String)> {
    let payload = serde_json::to_vec(records)?;
    let digest = format!("{:x}", Sha256::digest(&payload));
    Ok((payload, digest))
}

/// POSTs batches to the LRS endpoint with a fixed timeout.
#[derive(Debug, Clone)]
pub struct HttpShipper {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpShipper {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl BatchShipper for HttpShipper {
    async fn send(&self, endpoint: &str, records: &[EnrichedLogRecord]) -> Result<ShipReceipt> {
        let (payload, digest) = encode_batch(records)?;
        let bytes = payload.len();

        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ShipError::Timeout(self.timeout)
                } else {
                    ShipError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShipError::Status {
                status: status.as_u16(),
                body: body.chars().take(BODY_EXCERPT_LEN).collect(),
            });
        }

        Ok(ShipReceipt {
            status: status.as_u16(),
            bytes,
            digest,
        })
    }
}
