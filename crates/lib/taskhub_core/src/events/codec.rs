//! Envelope wire codec: UTF-8 JSON, gzip-compressed.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use thiserror::Error;

use crate::models::event::EventEnvelope;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid envelope JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),
}

pub fn encode(envelope: &EventEnvelope) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(envelope)?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 2), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn decode(bytes: &[u8]) -> Result<EventEnvelope, CodecError> {
    let mut json = Vec::with_capacity(bytes.len() * 4);
    GzDecoder::new(bytes).read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::DomainEvent;
    use serde_json::json;

    #[test]
    fn encoded_payload_is_gzip() {
        let event = DomainEvent::new("task.created", Some("t1".into()), json!({"title": "T"}), "api");
        let bytes = encode(&event.to_envelope()).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert_eq!(decode(&bytes).unwrap(), event.to_envelope());
    }

    #[test]
    fn plain_json_is_rejected() {
        let err = decode(br#"{"eventType":"x"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Compression(_)));
    }

    #[test]
    fn gzip_of_garbage_is_rejected() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{not json").unwrap();
        let bytes = encoder.finish().unwrap();
        assert!(matches!(decode(&bytes).unwrap_err(), CodecError::Json(_)));
    }
}
