//! # Interview Voice Engine - Main Application Entry Point
//!
//! This is the entry point for the real-time voice interview client engine.
//! It connects to the interview peer over a websocket, streams microphone
//! audio up, plays synthesized speech back, and enforces half-duplex
//! turn-taking between the two.
//!
//! ## Application Architecture:
//! - **config**: engine configuration (TOML files + environment variables)
//! - **state**: the turn-taking state machine and session counters
//! - **websocket**: the transport session (connect, send, dispatch)
//! - **audio**: capture, chunking, codec, reassembly, playback, orchestration
//! - **debounce**: the end-of-turn silence signal
//! - **error**: custom error types and conversions

// Module declarations - These tell Rust about our other source files
mod audio;       // Audio pipeline (audio/ directory)
mod config;      // Configuration management (config.rs)
mod debounce;    // End-of-turn debouncer (debounce.rs)
mod error;       // Error handling types (error.rs)
mod state;       // Session state management (state.rs)
mod websocket;   // Transport session (websocket.rs)

use crate::audio::session::{SessionHandle, VoiceSession};
use anyhow::Result;    // Better error handling with context
use config::AppConfig; // Our custom configuration struct
use std::sync::atomic::{AtomicBool, Ordering};  // Thread-safe boolean for shutdown
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};  // Structured logging
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};  // Logging setup

/// Global shutdown signal that can be accessed from anywhere in the program.
/// Set by the signal handlers when the process should wind the session down.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging** for debugging and monitoring
/// 3. **Connects the voice session** (transport + audio devices)
/// 4. **Reads local commands** from stdin (mic toggle, gain, quit)
/// 5. **Handles graceful shutdown** when receiving system signals
///
/// ## Error Handling:
/// Setup failures (bad config, unreachable peer, missing audio device)
/// return an error before any session is live. A fatal session error ends
/// the process with the surfaced message.
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Set up structured logging (tracing) for debugging and monitoring
    init_tracing()?;

    // Load configuration from config.toml and environment variables
    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting interview-voice-engine v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Participant '{}', peer {}",
        config.connection.participant_name, config.connection.url
    );

    // Set up signal handlers for graceful shutdown (Ctrl+C, SIGTERM, etc.)
    setup_signal_handlers();

    // Open the transport and acquire the audio devices. Any upload or
    // onboarding step the peer requires must already have happened; the
    // engine starts at "connect".
    let session = VoiceSession::connect(&config).await?;
    let handle = session.handle();
    spawn_command_loop(handle.clone());

    let mut session_task = tokio::spawn(session.run());

    // Wait for either the session to finish OR a shutdown signal
    tokio::select! {
        result = &mut session_task => {
            match result {
                Ok(Ok(())) => info!("Session finished"),
                Ok(Err(e)) => {
                    error!("Session failed: {}", e);
                    return Err(anyhow::Error::new(e));
                }
                Err(e) => error!("Session task error: {}", e),
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, ending session...");
            handle.end();
            // The session releases its resources on the way out
            match session_task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Session closed with error: {}", e),
                Err(e) => warn!("Session task error during shutdown: {}", e),
            }
        }
    }

    info!("Engine stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "interview_voice_engine=debug")
/// - If not set, defaults to "interview_voice_engine=debug"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            // Try to read RUST_LOG environment variable, or use defaults
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_voice_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())  // Format logs nicely for console output
        .init();  // Actually start the logging system

    Ok(())
}

/// Read local intents from stdin and forward them to the session.
///
/// ## Commands:
/// - `mic`: toggle the microphone (refused while the system is speaking)
/// - `gain <0..1>`: set playback volume
/// - `quit`: end the interview
fn spawn_command_loop(handle: SessionHandle) {
    tokio::spawn(async move {
        println!("Commands: 'mic' toggles the microphone, 'gain <0..1>' sets volume, 'quit' ends the session");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("mic") => handle.toggle_microphone(),
                Some("gain") => match parts.next().and_then(|v| v.parse::<f32>().ok()) {
                    Some(value) => handle.set_volume(value),
                    None => println!("Usage: gain <0..1>"),
                },
                Some("quit") | Some("end") => {
                    handle.end();
                    break;
                }
                Some(other) => println!("Unknown command '{}'", other),
                None => {}
            }
        }
    });
}

/// Set up signal handlers for graceful shutdown.
///
/// Listens for SIGTERM and SIGINT; when either arrives, sets the global
/// shutdown flag so the main loop can end the session cleanly instead of
/// dying with the capture and playback devices still open.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        // Wait for either signal to arrive
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set.
///
/// Simple polling loop; 100 ms of latency on Ctrl-C is fine for a session
/// teardown path and keeps the signal plumbing trivial.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
