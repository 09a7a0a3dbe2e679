//! # Voice Session Orchestration
//!
//! `VoiceSession` wires the whole engine together for the lifetime of one
//! interview: the websocket transport, the capture thread and chunker, the
//! playback thread, the turn-taking state machine, and the end-of-turn
//! debouncer.
//!
//! ## Concurrency Model:
//! Session and state logic is a single event loop over explicit messages:
//! transport events, playback events, and local commands each arrive on
//! their own channel and are handled one at a time. Audio capture and
//! playback run on dedicated threads and only ever talk to the loop through
//! those channels. There is no ambient event bus, and no handler writes
//! state fields directly.
//!
//! ## Session Lifecycle:
//! 1. **Connected**: transport open, devices acquired, waiting for the peer
//! 2. **Ready**: peer prepared the interview; first turn is the mic's
//! 3. **Running**: turns alternate between mic and peer speech
//! 4. **Closed**: fatal error, peer close, or local end; all resources
//!    released in bounded time

use crate::audio::capture::CaptureThread;
use crate::audio::chunker::FrameChunker;
use crate::audio::codec;
use crate::audio::playback::{PlaybackEvent, PlaybackHandle};
use crate::config::AppConfig;
use crate::debounce::EndOfTurnDebouncer;
use crate::error::{AppError, AppResult};
use crate::state::{SessionState, SharedStats, StateFlags};
use crate::websocket::{ClientMessage, TransportEvent, TransportSession};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Local intents, sent from the caller through a [`SessionHandle`].
#[derive(Debug)]
pub enum SessionCommand {
    /// Toggle the microphone (honored only while the session is open and
    /// the system is not speaking)
    ToggleMicrophone,
    /// Change playback volume
    SetVolume(f32),
    /// End the interview locally
    End,
}

/// Clonable handle for driving a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    command_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn toggle_microphone(&self) {
        let _ = self.command_tx.send(SessionCommand::ToggleMicrophone);
    }

    /// Set playback volume, clamped to [0.0, 1.0].
    pub fn set_volume(&self, value: f32) {
        let _ = self
            .command_tx
            .send(SessionCommand::SetVolume(value.clamp(0.0, 1.0)));
    }

    pub fn end(&self) {
        let _ = self.command_tx.send(SessionCommand::End);
    }
}

/// Everything the session event loop can wake up for.
enum LoopEvent {
    Transport(Option<TransportEvent>),
    Playback(PlaybackEvent),
    Command(SessionCommand),
}

/// One live voice session: owns every resource and the event loop.
pub struct VoiceSession {
    session_id: Uuid,
    started_at: DateTime<Utc>,

    state: SessionState,
    stats: SharedStats,

    transport: TransportSession,
    capture: Option<CaptureThread>,
    playback: Option<PlaybackHandle>,
    debouncer: EndOfTurnDebouncer,

    playback_rx: mpsc::UnboundedReceiver<PlaybackEvent>,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    command_rx: mpsc::UnboundedReceiver<SessionCommand>,

    /// The capture → chunker → transport send path
    sender_task: JoinHandle<()>,

    /// Guards against tearing down twice (run() then Drop)
    torn_down: bool,
}

impl VoiceSession {
    /// Open the transport and acquire the audio devices.
    ///
    /// Setup order: transport first (it anchors the session), then the
    /// playback sink, then the capture device. A failure at any step
    /// releases everything acquired so far and propagates as a setup or
    /// transport error.
    pub async fn connect(config: &AppConfig) -> AppResult<Self> {
        let session_id = Uuid::new_v4();
        let state = SessionState::new();
        let stats = SharedStats::default();

        info!(
            "Starting voice session {} for '{}'",
            session_id, config.connection.participant_name
        );

        let mut transport = TransportSession::connect(&config.connection).await?;

        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        let playback = match PlaybackHandle::spawn(
            &config.audio,
            config.connection.gain,
            playback_tx,
            stats.clone(),
        ) {
            Ok(playback) => playback,
            Err(e) => {
                transport.shutdown();
                return Err(e);
            }
        };

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let capture = match CaptureThread::spawn(&config.audio, frame_tx) {
            Ok(capture) => capture,
            Err(e) => {
                playback.stop();
                transport.shutdown();
                return Err(e);
            }
        };

        let sender_task = spawn_sender(
            frame_rx,
            FrameChunker::new(config.audio.frame_size_samples),
            &state,
            &transport,
            stats.clone(),
        );

        let debouncer = EndOfTurnDebouncer::new(
            &config.turn,
            &config.audio,
            transport.outbound(),
            stats.clone(),
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Ok(Self {
            session_id,
            started_at: Utc::now(),
            state,
            stats,
            transport,
            capture: Some(capture),
            playback: Some(playback),
            debouncer,
            playback_rx,
            command_tx,
            command_rx,
            sender_task,
            torn_down: false,
        })
    }

    /// A handle for local intents; clonable, usable from any task.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    /// Run the session to completion.
    ///
    /// Returns `Ok(())` on a clean close (peer close or local end) and the
    /// fatal error otherwise. All resources are released before returning,
    /// whichever way the loop exits.
    pub async fn run(mut self) -> AppResult<()> {
        let result = loop {
            // Resolve the next event first, then mutate; the handlers below
            // are the only writers of session state.
            let event = tokio::select! {
                event = self.transport.next_event() => LoopEvent::Transport(event),
                Some(event) = self.playback_rx.recv() => LoopEvent::Playback(event),
                Some(command) = self.command_rx.recv() => LoopEvent::Command(command),
            };

            match event {
                LoopEvent::Transport(Some(TransportEvent::Ready)) => {
                    info!("Interview prepared; microphone is live");
                    let before = self.state.snapshot();
                    let after = self.state.mark_ready();
                    self.sync_debouncer(before, after);
                }
                LoopEvent::Transport(Some(TransportEvent::TurnComplete)) => {
                    info!("Peer turn complete; microphone is live");
                    let before = self.state.snapshot();
                    let after = self.state.server_turn_complete();
                    self.sync_debouncer(before, after);
                }
                LoopEvent::Transport(Some(TransportEvent::Audio(bytes))) => {
                    self.stats.record_chunk_received(bytes.len());
                    let before = self.state.snapshot();
                    let after = self.state.audio_received();
                    self.sync_debouncer(before, after);
                    if let Some(playback) = &self.playback {
                        playback.send_chunk(bytes);
                    }
                }
                LoopEvent::Transport(Some(TransportEvent::PeerError(message))) => {
                    error!("Peer reported a session error: {}", message);
                    break Err(AppError::Transport(message));
                }
                LoopEvent::Transport(Some(TransportEvent::Closed { error: Some(detail) })) => {
                    error!("Connection error. Please try again. ({})", detail);
                    break Err(AppError::Transport(detail));
                }
                LoopEvent::Transport(Some(TransportEvent::Closed { error: None }))
                | LoopEvent::Transport(None) => {
                    info!("Transport closed; ending session");
                    break Ok(());
                }

                LoopEvent::Playback(PlaybackEvent::Finished) => {
                    let before = self.state.snapshot();
                    let after = self.state.playback_finished();
                    self.sync_debouncer(before, after);
                }
                LoopEvent::Playback(PlaybackEvent::Failed(detail)) => {
                    // Recoverable: the queue was dropped; the session
                    // continues as if the cycle finished.
                    warn!("Playback decode failed (recovering): {}", detail);
                    let before = self.state.snapshot();
                    let after = self.state.playback_finished();
                    self.sync_debouncer(before, after);
                }

                LoopEvent::Command(SessionCommand::ToggleMicrophone) => {
                    let before = self.state.snapshot();
                    if self.state.toggle_microphone() {
                        let after = self.state.snapshot();
                        info!(
                            "Microphone {}",
                            if after.mic_active { "activated" } else { "muted" }
                        );
                        self.sync_debouncer(before, after);
                    }
                }
                LoopEvent::Command(SessionCommand::SetVolume(value)) => {
                    if let Some(playback) = &self.playback {
                        playback.set_gain(value);
                    }
                }
                LoopEvent::Command(SessionCommand::End) => {
                    info!("Session ended locally");
                    break Ok(());
                }
            }
        };

        self.teardown();
        result
    }

    /// Arm the debouncer on every transition where the mic becomes inactive
    /// while the session is open; cancel it whenever the mic comes back.
    fn sync_debouncer(&mut self, before: StateFlags, after: StateFlags) {
        if after.session_open && before.mic_active && !after.mic_active {
            self.debouncer.arm();
        } else if after.mic_active {
            self.debouncer.cancel();
        }
    }

    /// Release every owned resource in bounded time. No timer, capture
    /// callback, or playback completion may fire after this returns.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        self.debouncer.cancel();
        self.state.close();

        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(playback) = self.playback.take() {
            playback.stop();
        }
        self.sender_task.abort();
        self.transport.shutdown();

        let stats = self.stats.snapshot();
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        info!(
            "Session {} closed after {:.1}s: {} frames sent ({} B), {} chunks received ({} B), \
             {} playback cycles, {} decode errors, {} end-of-turn markers",
            self.session_id,
            elapsed.num_milliseconds() as f64 / 1000.0,
            stats.frames_sent,
            stats.bytes_sent,
            stats.chunks_received,
            stats.bytes_received,
            stats.playback_cycles,
            stats.decode_errors,
            stats.end_of_turn_markers,
        );
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        // run() already tore everything down; this covers a session dropped
        // before or instead of running.
        self.teardown();
    }
}

/// Spawn the send path: capture frames → chunker → PCM16 → base64 → wire.
///
/// The mic gate is consulted per transport frame from the state machine's
/// watch channel; frames chunked while the mic is inactive are dropped, not
/// queued (the peer only ever hears live-mic audio and the debouncer's
/// silence marker). The task ends when the capture side hangs up.
fn spawn_sender(
    mut frame_rx: mpsc::UnboundedReceiver<Vec<f32>>,
    mut chunker: FrameChunker,
    state: &SessionState,
    transport: &TransportSession,
    stats: SharedStats,
) -> JoinHandle<()> {
    let mic_rx = state.subscribe_mic();
    let outbound = transport.outbound();

    tokio::spawn(async move {
        while let Some(samples) = frame_rx.recv().await {
            for frame in chunker.push(&samples) {
                if !*mic_rx.borrow() {
                    continue;
                }
                let pcm = codec::encode_pcm16(&frame);
                let payload = codec::encode_payload(&pcm);
                stats.record_frame_sent(pcm.len());
                if outbound.send(ClientMessage::audio(payload)).is_err() {
                    return;  // Transport is gone
                }
            }
        }
    })
}
