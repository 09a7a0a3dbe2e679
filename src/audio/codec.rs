//! # Audio Codec
//!
//! Sample-format and payload conversions for the voice session wire protocol:
//!
//! - **Float → PCM16**: capture frames arrive as f32 samples in [-1.0, 1.0]
//!   and are sent as 16-bit little-endian signed PCM.
//! - **Container synthesis**: received PCM is wrapped in a canonical 44-byte
//!   RIFF/WAVE header so a generic audio decoder can play it. The header is
//!   fully determined by the payload length and the fixed audio parameters.
//! - **Payload codec**: PCM bytes are carried inside JSON messages as
//!   standard base64; the round-trip is byte-exact.

use crate::error::{AppError, AppResult};
use base64::Engine;
use byteorder::{LittleEndian, WriteBytesExt};

/// Convert float samples to 16-bit little-endian PCM bytes.
///
/// Each sample maps as `round(min(1.0, s) * 32767)`. Note the asymmetry:
/// only the upper bound is clamped; this is the exact mapping the peer was
/// built against, so it is kept rather than corrected. Inputs below -1.0
/// saturate at the i16 floor through the cast.
///
/// The output length is always `2 * samples.len()`.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.min(1.0) * 32767.0).round() as i16;
        // Writing to a Vec cannot fail
        pcm.write_i16::<LittleEndian>(value).unwrap();
    }
    pcm
}

/// Build the canonical playback container: a 44-byte RIFF/WAVE header
/// followed by the PCM payload.
///
/// ## Header Layout (little-endian numeric fields):
/// ```text
/// offset  0: "RIFF"            offset 22: u16 channel count
/// offset  4: u32 36 + data len offset 24: u32 sample rate
/// offset  8: "WAVE"            offset 28: u32 byte rate
/// offset 12: "fmt "            offset 32: u16 block align
/// offset 16: u32 16            offset 34: u16 bits per sample
/// offset 20: u16 1 (PCM)       offset 36: "data"
///                              offset 40: u32 data len
/// ```
///
/// The output is bit-exact for any decoder consuming it: total length is
/// always `44 + pcm.len()` and the field at offset 40 equals `pcm.len()`.
pub fn build_wav_container(
    pcm: &[u8],
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
) -> Vec<u8> {
    let data_length = pcm.len() as u32;
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;

    let mut container = Vec::with_capacity(44 + pcm.len());
    container.extend_from_slice(b"RIFF");
    container.write_u32::<LittleEndian>(36 + data_length).unwrap();
    container.extend_from_slice(b"WAVE");
    container.extend_from_slice(b"fmt ");
    container.write_u32::<LittleEndian>(16).unwrap();
    container.write_u16::<LittleEndian>(1).unwrap();  // PCM format code
    container.write_u16::<LittleEndian>(channels).unwrap();
    container.write_u32::<LittleEndian>(sample_rate).unwrap();
    container.write_u32::<LittleEndian>(byte_rate).unwrap();
    container.write_u16::<LittleEndian>(block_align).unwrap();
    container.write_u16::<LittleEndian>(bits_per_sample).unwrap();
    container.extend_from_slice(b"data");
    container.write_u32::<LittleEndian>(data_length).unwrap();
    container.extend_from_slice(pcm);
    container
}

/// Encode raw bytes as the transport-safe payload text (standard base64).
pub fn encode_payload(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode a payload back to raw bytes.
///
/// A malformed payload is a decode error; the caller decides whether that
/// is a protocol anomaly (inbound dispatch) or a bug (our own frames).
pub fn decode_payload(payload: &str) -> AppResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| AppError::Decode(format!("invalid base64 payload: {}", e)))
}

/// Synthesize the end-of-turn silence buffer: `samples` zero-valued PCM16
/// samples (one second at the session rate), already byte-encoded.
pub fn silence_pcm16(samples: usize) -> Vec<u8> {
    vec![0u8; samples * 2]
}
