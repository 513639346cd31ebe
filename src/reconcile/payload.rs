//! Log batch payload decoding.
//!
//! # Data Flow
//! ```text
//! {"awslogs": {"data": "<base64>"}}
//!     → base64 decode
//!     → gzip decompress
//!     → {"logEvents": [{"message": "...", ...}, ...]}
//!     → Vec<String> (messages, in delivery order)
//! ```

use std::io::{Read, Write};

use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on the decompressed payload size.
pub const MAX_DECOMPRESSED_BYTES: u64 = 64 * 1024 * 1024;

/// Errors that make a whole batch unreadable.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("invalid invocation envelope: {0}")]
    Envelope(String),

    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid gzip: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("decompressed payload exceeds 64 MiB")]
    TooLarge,

    #[error("payload is not a log batch: {0}")]
    Json(#[from] serde_json::Error),
}

/// The invocation envelope delivered by the log subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationEvent {
    pub awslogs: AwsLogs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsLogs {
    /// base64(gzip(json))
    pub data: String,
}

/// Decompressed batch. Fields other than the messages are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogBatch {
    pub log_events: Vec<LogEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub message: String,
}

impl InvocationEvent {
    /// Parse the raw invocation body.
    pub fn from_slice(body: &[u8]) -> Result<Self, PayloadError> {
        serde_json::from_slice(body).map_err(|e| PayloadError::Envelope(e.to_string()))
    }
}

/// Decode `data` into the batch's record lines, in order.
pub fn decode_payload(data: &str) -> Result<Vec<String>, PayloadError> {
    let compressed = base64::engine::general_purpose::STANDARD.decode(data.trim())?;

    let mut json = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .take(MAX_DECOMPRESSED_BYTES + 1)
        .read_to_end(&mut json)
        .map_err(PayloadError::Gzip)?;
    if json.len() as u64 > MAX_DECOMPRESSED_BYTES {
        return Err(PayloadError::TooLarge);
    }

    let batch: LogBatch = serde_json::from_slice(&json)?;
    Ok(batch.log_events.into_iter().map(|e| e.message).collect())
}

/// Build a payload from record lines (the inverse of [`decode_payload`]).
pub fn encode_payload<I, S>(messages: I) -> Result<String, std::io::Error>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let batch = LogBatch {
        log_events: messages
            .into_iter()
            .map(|m| LogEvent { message: m.into() })
            .collect(),
    };
    let json = serde_json::to_vec(&batch)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    Ok(base64::engine::general_purpose::STANDARD.encode(compressed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gzip_b64(json: &str) -> String {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        base64::engine::general_purpose::STANDARD.encode(encoder.finish().unwrap())
    }

    #[test]
    fn test_decode_ignores_other_fields() {
        let data = gzip_b64(
            r#"{
                "messageType": "DATA_MESSAGE",
                "owner": "123456789012",
                "logGroup": "/ftp/sessions",
                "logEvents": [
                    {"id": "1", "timestamp": 1700000000000, "message": "alice.sess1 CONNECTED x"},
                    {"id": "2", "timestamp": 1700000000001, "message": "alice.sess2 DISCONNECTED y"}
                ]
            }"#,
        );

        let messages = decode_payload(&data).unwrap();
        assert_eq!(
            messages,
            vec!["alice.sess1 CONNECTED x", "alice.sess2 DISCONNECTED y"]
        );
    }

    #[test]
    fn test_encode_decode() {
        let data = encode_payload(["bob.s1 CONNECTED", "bob.s1 DISCONNECTED"]).unwrap();
        assert_eq!(
            decode_payload(&data).unwrap(),
            vec!["bob.s1 CONNECTED", "bob.s1 DISCONNECTED"]
        );
    }

    #[test]
    fn test_empty_batch() {
        let data = gzip_b64(r#"{"logEvents": []}"#);
        assert!(decode_payload(&data).unwrap().is_empty());
    }

    #[test]
    fn test_bad_base64() {
        assert!(matches!(decode_payload("not base64!!"), Err(PayloadError::Base64(_))));
    }

    #[test]
    fn test_not_gzip() {
        let data = base64::engine::general_purpose::STANDARD.encode(b"{\"logEvents\": []}");
        assert!(matches!(decode_payload(&data), Err(PayloadError::Gzip(_))));
    }

    #[test]
    fn test_not_a_log_batch() {
        let data = gzip_b64(r#"{"records": []}"#);
        assert!(matches!(decode_payload(&data), Err(PayloadError::Json(_))));
    }

    #[test]
    fn test_envelope() {
        let event = InvocationEvent::from_slice(br#"{"awslogs": {"data": "H4sI"}}"#).unwrap();
        assert_eq!(event.awslogs.data, "H4sI");

        assert!(matches!(
            InvocationEvent::from_slice(br#"{"data": "H4sI"}"#),
            Err(PayloadError::Envelope(_))
        ));
    }
}
