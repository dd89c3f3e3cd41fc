// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Single delivery attempts to one target.
//!
//! [`TargetSender`] is the seam between the orchestrator and the network.
//! A sender performs exactly one attempt and reports the outcome; deciding
//! whether to retry is the caller's job.
//!
//! [`HttpSender`] POSTs JSON bodies with reqwest, gzipping them for targets
//! that opt in once they pass the size threshold. Any 2xx status counts as
//! delivered; webhook receivers commonly answer 202 or 204 instead of 200.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::compression::compress_with_stats;
use crate::config::{ConfigError, SyncConfig, TargetConfig};
use crate::metrics::LatencyTimer;

/// Why a delivery attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("request to '{target}' timed out")]
    Timeout { target: String },
    #[error("transport error sending to '{target}': {reason}")]
    Transport { target: String, reason: String },
    #[error("'{target}' responded with HTTP {status}")]
    Response { target: String, status: u16 },
    #[error("failed to serialize body for '{target}': {reason}")]
    Serialization { target: String, reason: String },
}

impl DeliveryError {
    /// Timeouts, connection failures and bad responses may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Serialization { .. })
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::Response { .. } => "response",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// Outcome of a successful delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub status: u16,
    /// Serialized body size before compression
    pub raw_bytes: usize,
    /// Bytes actually put on the wire
    pub sent_bytes: usize,
    /// `Some(original / compressed)` when the body was gzipped
    pub compression_ratio: Option<f64>,
}

impl DeliveryReceipt {
    /// Receipt for an uncompressed body.
    #[must_use]
    pub fn plain(status: u16, bytes: usize) -> Self {
        Self {
            status,
            raw_bytes: bytes,
            sent_bytes: bytes,
            compression_ratio: None,
        }
    }
}

/// Performs one delivery attempt of a JSON body to a target.
#[async_trait]
pub trait TargetSender: Send + Sync {
    async fn send(&self, target: &TargetConfig, body: &Value) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Request body after optional compression.
#[derive(Debug)]
pub struct EncodedBody {
    pub bytes: Vec<u8>,
    pub raw_bytes: usize,
    pub gzip: bool,
    pub compression_ratio: Option<f64>,
}

/// reqwest-backed [`TargetSender`].
///
/// A response in 200..=299 is a success. Every other status, redirects
/// included, becomes [`DeliveryError::Response`] and is retried like any
/// other retryable failure.
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: reqwest::Client,
    compression_threshold: usize,
}

impl HttpSender {
    pub fn new(timeout: Duration, compression_threshold: usize) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "request_timeout_secs",
                reason: format!("cannot build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            compression_threshold,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, ConfigError> {
        Self::new(config.request_timeout(), config.compression_threshold_bytes)
    }

    /// Serialize `body`, gzipping it when the target asks for compression and
    /// it is at least the threshold size. A compression failure falls back to
    /// the plain body.
    pub fn encode_body(&self, target: &TargetConfig, body: &Value) -> Result<EncodedBody, DeliveryError> {
        let raw = serde_json::to_vec(body).map_err(|e| DeliveryError::Serialization {
            target: target.name.clone(),
            reason: e.to_string(),
        })?;
        let raw_bytes = raw.len();

        if !target.use_compression || raw_bytes < self.compression_threshold {
            return Ok(EncodedBody { bytes: raw, raw_bytes, gzip: false, compression_ratio: None });
        }

        match compress_with_stats(&raw) {
            Ok((bytes, stats)) => Ok(EncodedBody {
                bytes,
                raw_bytes,
                gzip: true,
                compression_ratio: Some(stats.ratio),
            }),
            Err(e) => {
                warn!(target = %target.name, error = %e, "Compression failed, sending uncompressed");
                Ok(EncodedBody { bytes: raw, raw_bytes, gzip: false, compression_ratio: None })
            }
        }
    }
}

#[async_trait]
impl TargetSender for HttpSender {
    async fn send(&self, target: &TargetConfig, body: &Value) -> Result<DeliveryReceipt, DeliveryError> {
        let _timer = LatencyTimer::new(&target.name);
        let encoded = self.encode_body(target, body)?;
        let sent_bytes = encoded.bytes.len();

        let mut request = self
            .client
            .post(&target.url)
            .header(CONTENT_TYPE, "application/json");
        if encoded.gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.body(encoded.bytes).send().await.map_err(|e| {
            let err = if e.is_timeout() {
                DeliveryError::Timeout { target: target.name.clone() }
            } else {
                DeliveryError::Transport {
                    target: target.name.clone(),
                    reason: e.to_string(),
                }
            };
            crate::metrics::record_request(&target.name, err.kind());
            err
        })?;

        let status = response.status();
        if !is_delivered(status) {
            crate::metrics::record_request(&target.name, "response");
            return Err(DeliveryError::Response {
                target: target.name.clone(),
                status: status.as_u16(),
            });
        }

        crate::metrics::record_request(&target.name, "success");
        crate::metrics::record_bytes_sent(&target.name, sent_bytes);
        debug!(
            target = %target.name,
            status = status.as_u16(),
            raw_bytes = encoded.raw_bytes,
            sent_bytes,
            gzip = encoded.gzip,
            "Delivery succeeded"
        );

        Ok(DeliveryReceipt {
            status: status.as_u16(),
            raw_bytes: encoded.raw_bytes,
            sent_bytes,
            compression_ratio: encoded.compression_ratio,
        })
    }
}

/// Whether a target response acknowledges the delivery.
fn is_delivered(status: reqwest::StatusCode) -> bool {
    status.is_success()
}
