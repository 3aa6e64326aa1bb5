use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::ids::RequestId;

/// The only transfer encoding in use: zlib-compressed, base64-encoded.
pub const KIND_GZIP_BASE64: &str = "string+gzip+base64";

#[derive(Clone, Debug, thiserror::Error)]
pub enum AdaptationError {
    #[error("unsupported adaptation state type: {0}")]
    UnsupportedKind(String),
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    #[error("decompression failed: {0}")]
    Decompress(String),
}

/// Wire envelope for an opaque decoder adaptation blob.
///
/// The decoder hands back speaker/acoustic adaptation as raw bytes; on the
/// wire they travel compressed and base64-armored so the envelope stays
/// valid JSON. Clients resupply the envelope verbatim on a later utterance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdaptationState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl AdaptationState {
    /// Wrap a raw decoder blob for transfer to the client.
    pub fn encode(id: RequestId, raw: &[u8]) -> Self {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        // Writing to a Vec cannot fail.
        encoder.write_all(raw).expect("write to Vec");
        let compressed = encoder.finish().expect("finish zlib stream");
        Self {
            id: Some(id),
            value: BASE64_STANDARD.encode(compressed),
            kind: KIND_GZIP_BASE64.to_string(),
            time: Some(chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()),
        }
    }

    /// Recover the raw decoder blob from a client-supplied envelope.
    pub fn decode(&self) -> Result<Vec<u8>, AdaptationError> {
        if self.kind != KIND_GZIP_BASE64 {
            return Err(AdaptationError::UnsupportedKind(self.kind.clone()));
        }
        let compressed = BASE64_STANDARD
            .decode(&self.value)
            .map_err(|e| AdaptationError::Base64(e.to_string()))?;
        let mut raw = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut raw)
            .map_err(|e| AdaptationError::Decompress(e.to_string()))?;
        Ok(raw)
    }
}
