//! # Configuration Management
//!
//! This module handles loading and managing the engine configuration from
//! multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_CONNECTION_URL, APP_CONNECTION_GAIN, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables

/// Main engine configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (connection, audio, turn)
/// keeps the wire parameters, the audio format, and the turn-taking knobs
/// independently overridable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub audio: AudioConfig,
    pub turn: TurnConfig,
}

/// Connection parameters for the voice session websocket.
///
/// ## Fields:
/// - `url`: websocket endpoint of the interview peer (e.g., "ws://localhost:8765")
/// - `participant_name`: display name sent as the `name` query parameter
/// - `gain`: initial playback volume in [0.0, 1.0], sent as the `gain` query
///   parameter and applied to the local playback sink
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub url: String,
    pub participant_name: String,
    pub gain: f32,
}

/// Audio format configuration.
///
/// The wire protocol and the playback container are defined around
/// 24 kHz / mono / 16-bit PCM; these values are configurable mostly so tests
/// and future peers can vary them, and they are validated together.
///
/// ## Fields:
/// - `sample_rate`: samples per second (24000 for the interview peer)
/// - `channels`: channel count (1, mono)
/// - `bits_per_sample`: PCM bit depth (16)
/// - `frame_size_samples`: samples per transport frame (2732)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub frame_size_samples: usize,
}

/// Turn-taking configuration.
///
/// ## Fields:
/// - `end_of_turn_debounce_ms`: how long the microphone must stay inactive
///   before the synthetic end-of-turn silence frame is sent
/// - `silence_duration_ms`: length of that synthetic silence frame
///
/// ## Tuning guidelines:
/// - Shorter debounce: snappier turn handoff, but risks cutting the speaker off
/// - Longer debounce: more tolerant of pauses, but the peer waits longer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    pub end_of_turn_debounce_ms: u64,
    pub silence_duration_ms: u64,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values let the engine start with nothing but a participant name
/// set, and they document the wire contract of the interview peer.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig {
                url: "ws://localhost:8765".to_string(),  // Interview peer endpoint
                participant_name: String::new(),         // Must be provided by the caller
                gain: 1.0,                               // Full playback volume
            },
            audio: AudioConfig {
                sample_rate: 24000,        // 24 kHz, the peer's synthesis rate
                channels: 1,               // Mono
                bits_per_sample: 16,       // 16-bit PCM
                frame_size_samples: 2732,  // Transport frame size expected by the peer
            },
            turn: TurnConfig {
                end_of_turn_debounce_ms: 3000,  // 3 seconds of mic-off ends the turn
                silence_duration_ms: 1000,      // 1 second of silence in the marker
            },
        }
    }
}

impl AudioConfig {
    /// Number of zero-valued samples in the synthetic end-of-turn silence
    /// frame for a given duration (24000 samples for one second at 24 kHz).
    pub fn silence_samples(&self, duration_ms: u64) -> usize {
        (self.sample_rate as u64 * duration_ms / 1000) as usize
    }
}

/// Implementation block for AppConfig - adds methods to the struct.
impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the bare SERVER_URL and PARTICIPANT_NAME variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_CONNECTION_URL=ws://interview.example:8765`: override the endpoint
    /// - `APP_CONNECTION_GAIN=0.5`: override the initial playback volume
    /// - `SERVER_URL` / `PARTICIPANT_NAME`: convenience overrides without the
    ///   APP_ prefix, for launcher scripts
    pub fn load() -> AppResult<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists) - required(false) means "don't error if missing"
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            // Example: APP_CONNECTION_URL becomes connection.url in the config
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Convenience variables that don't follow the APP_ prefix convention
        if let Ok(url) = env::var("SERVER_URL") {
            settings = settings.set_override("connection.url", url)?;
        }

        if let Ok(name) = env::var("PARTICIPANT_NAME") {
            settings = settings.set_override("connection.participant_name", name)?;
        }

        // Build the final configuration and convert it back to our AppConfig struct
        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - The endpoint is a ws:// or wss:// URL
    /// - A participant name was provided (the peer requires it)
    /// - Gain is within [0.0, 1.0]
    /// - The audio format is the 16-bit mono PCM the codec produces
    /// - Frame size and debounce window are non-zero
    ///
    /// ## Why validate:
    /// Catching configuration errors before connecting prevents a session
    /// that fails halfway through device setup.
    pub fn validate(&self) -> AppResult<()> {
        if !self.connection.url.starts_with("ws://") && !self.connection.url.starts_with("wss://") {
            return Err(AppError::ValidationError(format!(
                "Connection URL must be a ws:// or wss:// endpoint, got '{}'",
                self.connection.url
            )));
        }

        if self.connection.participant_name.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Participant name must be provided".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.connection.gain) {
            return Err(AppError::ValidationError(format!(
                "Gain must be within [0.0, 1.0], got {}",
                self.connection.gain
            )));
        }

        if self.audio.sample_rate == 0 {
            return Err(AppError::ValidationError(
                "Sample rate must be greater than 0".to_string(),
            ));
        }

        if self.audio.channels != 1 {
            return Err(AppError::ValidationError(
                "Only mono capture/playback is supported".to_string(),
            ));
        }

        if self.audio.bits_per_sample != 16 {
            return Err(AppError::ValidationError(
                "Only 16-bit PCM is supported".to_string(),
            ));
        }

        if self.audio.frame_size_samples == 0 {
            return Err(AppError::ValidationError(
                "Frame size must be greater than 0".to_string(),
            ));
        }

        if self.turn.end_of_turn_debounce_ms == 0 {
            return Err(AppError::ValidationError(
                "End-of-turn debounce must be greater than 0".to_string(),
            ));
        }

        if self.turn.silence_duration_ms == 0 {
            return Err(AppError::ValidationError(
                "Silence duration must be greater than 0".to_string(),
            ));
        }

        Ok(())  // All validation passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;  // Import everything from the parent module

    /// Test that the default configuration matches the peer's wire contract.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.audio.sample_rate, 24000);
        assert_eq!(config.audio.frame_size_samples, 2732);
        assert_eq!(config.turn.end_of_turn_debounce_ms, 3000);
        // Defaults fail validation only because the name is empty
        assert!(config.validate().is_err());

        let mut named = config;
        named.connection.participant_name = "Ada".to_string();
        assert!(named.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.connection.participant_name = "Ada".to_string();

        config.connection.gain = 1.5;  // Out of range
        assert!(config.validate().is_err());
        config.connection.gain = 1.0;

        config.connection.url = "http://localhost:8765".to_string();  // Not a websocket URL
        assert!(config.validate().is_err());
        config.connection.url = "wss://interview.example".to_string();

        config.audio.bits_per_sample = 24;  // Codec only emits 16-bit PCM
        assert!(config.validate().is_err());
    }

    /// One second of silence at 24 kHz is 24000 samples.
    #[test]
    fn test_silence_samples() {
        let config = AppConfig::default();
        assert_eq!(config.audio.silence_samples(1000), 24000);
        assert_eq!(config.audio.silence_samples(500), 12000);
    }
}
