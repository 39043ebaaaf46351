//! Wire codec for audio exchanged with the live endpoint.
//!
//! Outbound: i16 samples -> little-endian PCM16 -> base64, tagged with
//! `audio/pcm;rate=<hz>`. Inbound: base64 -> PCM16 -> f32 in [-1.0, 1.0).

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::backend::AudioFrame;

/// Base64 audio payload with its MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcmBlob {
    pub mime_type: String,
    pub data: String,
}

/// Serialize samples as little-endian PCM16 bytes
pub fn encode_pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode little-endian PCM16 bytes to normalized floats
///
/// A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect()
}

/// Encode a captured frame for transmission
pub fn create_pcm_blob(frame: &AudioFrame) -> PcmBlob {
    PcmBlob {
        mime_type: pcm_mime_type(frame.sample_rate),
        data: base64::engine::general_purpose::STANDARD.encode(encode_pcm16(&frame.samples)),
    }
}

/// Decode a base64 PCM16 payload received from the endpoint
pub fn decode_base64_audio(data: &str) -> Result<Vec<f32>, base64::DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;
    Ok(decode_pcm16(&bytes))
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Extract the `rate=` parameter of a PCM MIME type
pub fn rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}
