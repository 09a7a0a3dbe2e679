//! # Audio Pipeline Module
//!
//! Real-time audio handling for the voice interview session, from the
//! capture device to the wire and from the wire to the speaker.
//!
//! ## Key Components:
//! - **Capture**: cpal input stream on a dedicated thread (`capture`)
//! - **Chunker**: irregular capture buffers → fixed transport frames (`chunker`)
//! - **Codec**: f32 ↔ PCM16, WAV container synthesis, base64 payloads (`codec`)
//! - **Playback**: chunk reassembly and gapless output via rodio (`playback`)
//! - **Session**: orchestration of the whole pipeline and its lifecycle (`session`)
//!
//! ## Audio Format:
//! - **Sample Rate**: 24 kHz (the peer's synthesis rate)
//! - **Bit Depth**: 16-bit PCM, little-endian
//! - **Channels**: Mono
//! - **Transport framing**: 2732 samples per frame, base64 inside JSON

pub mod capture;   // Microphone input on a dedicated thread
pub mod chunker;   // Fixed-size transport framing
pub mod codec;     // Sample format and payload conversions
pub mod playback;  // Reassembly queue and output sink
pub mod session;   // Session orchestration and lifecycle
