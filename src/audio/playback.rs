//! # Playback Reassembly and Output
//!
//! The peer streams synthesized speech as raw PCM chunks of arbitrary size.
//! Playing each chunk on its own would put an audible seam at every chunk
//! boundary, so chunks are batched: while one playback cycle is in flight,
//! everything that arrives waits in a pending queue; when the cycle ends the
//! whole queue is drained, concatenated in arrival order, wrapped in a WAV
//! container, decoded, and played as the next cycle. The cost is latency
//! proportional to inter-chunk arrival variance; the benefit is a gapless
//! voice.
//!
//! ## Threading:
//! rodio's `OutputStream` is not `Send`, so the sink lives on a dedicated
//! playback thread fed by a command channel. Completion and failure flow
//! back to the session event loop as [`PlaybackEvent`]s. The drain-and-play
//! cycle is an explicit "while pending non-empty, drain and play" loop,
//! never recursion, which keeps the at-most-one-in-flight invariant visible
//! in the control flow.

use crate::audio::codec;
use crate::config::AudioConfig;
use crate::error::{AppError, AppResult};
use crate::state::SharedStats;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rodio::{Decoder, OutputStream, Sink};
use std::io::Cursor;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// How long to wait for the playback thread to report sink startup.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll cadence while waiting for the sink to drain.
const SINK_POLL: Duration = Duration::from_millis(25);

/// Commands accepted by the playback thread.
pub enum PlaybackCommand {
    /// One received PCM chunk to queue for the next cycle
    Chunk(Vec<u8>),
    /// Adjust sink volume (already clamped by the handle)
    SetGain(f32),
    /// Tear down: stop the sink, clear the queue, exit the thread
    Shutdown,
}

/// Events reported back to the session event loop.
#[derive(Debug)]
pub enum PlaybackEvent {
    /// The pending queue drained completely and the sink went silent
    Finished,
    /// A concatenated container failed to decode; the queue was cleared and
    /// playback behaves as finished. Recoverable; the session stays open.
    Failed(String),
}

/// Pending-queue bookkeeping for the drain-and-play cycle.
///
/// Pure and lock-free: it is owned by the playback thread and exercised
/// directly by the unit tests below. `in_flight` enforces at-most-one
/// playback cycle; chunks pushed while a cycle is live stay queued until the
/// next [`ChunkAssembler::begin`].
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    pending: Vec<Vec<u8>>,
    in_flight: bool,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one received chunk (arrival order is preserved).
    pub fn push(&mut self, bytes: Vec<u8>) {
        self.pending.push(bytes);
    }

    /// Start a playback cycle if none is in flight and data is pending.
    ///
    /// Drains the entire queue atomically and returns the concatenation of
    /// every pending chunk in arrival order.
    pub fn begin(&mut self) -> Option<Vec<u8>> {
        if self.in_flight || self.pending.is_empty() {
            return None;
        }
        self.in_flight = true;

        let total: usize = self.pending.iter().map(|c| c.len()).sum();
        let mut pcm = Vec::with_capacity(total);
        for chunk in self.pending.drain(..) {
            pcm.extend_from_slice(&chunk);
        }
        Some(pcm)
    }

    /// Mark the in-flight cycle as finished (played or failed).
    pub fn complete(&mut self) {
        self.in_flight = false;
    }

    /// Drop everything: used on decode failure and teardown.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.in_flight = false;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Handle to the playback thread.
pub struct PlaybackHandle {
    command_tx: Sender<PlaybackCommand>,
    handle: JoinHandle<()>,
}

impl PlaybackHandle {
    /// Spawn the playback thread and open the default output device.
    ///
    /// Device acquisition failure is a setup error and propagates to the
    /// caller before any session state is touched.
    pub fn spawn(
        config: &AudioConfig,
        initial_gain: f32,
        event_tx: UnboundedSender<PlaybackEvent>,
        stats: SharedStats,
    ) -> AppResult<Self> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = mpsc::channel::<AppResult<()>>();
        let config = config.clone();
        let gain = initial_gain.clamp(0.0, 1.0);

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                run_playback(config, gain, command_rx, event_tx, stats, ready_tx);
            })
            .map_err(|e| AppError::Setup(format!("failed to spawn playback thread: {}", e)))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(Self { command_tx, handle }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::Setup(
                "playback thread did not start within the startup timeout".to_string(),
            )),
        }
    }

    /// Queue one received PCM chunk. If a cycle is in flight it stays queued
    /// for the next one; otherwise a new cycle starts immediately.
    pub fn send_chunk(&self, bytes: Vec<u8>) {
        let _ = self.command_tx.send(PlaybackCommand::Chunk(bytes));
    }

    /// Set the playback volume, clamped to [0.0, 1.0].
    pub fn set_gain(&self, gain: f32) {
        let _ = self.command_tx.send(PlaybackCommand::SetGain(gain.clamp(0.0, 1.0)));
    }

    /// Stop playback, clear the queue, and release the output device.
    pub fn stop(self) {
        let _ = self.command_tx.send(PlaybackCommand::Shutdown);
        if self.handle.join().is_err() {
            warn!("Playback thread panicked during shutdown");
        }
    }
}

/// Outcome of waiting for the sink while keeping the command channel live.
enum SinkWait {
    Drained,
    Shutdown,
}

/// Body of the playback thread.
fn run_playback(
    config: AudioConfig,
    initial_gain: f32,
    command_rx: Receiver<PlaybackCommand>,
    event_tx: UnboundedSender<PlaybackEvent>,
    stats: SharedStats,
    ready_tx: mpsc::Sender<AppResult<()>>,
) {
    // The stream handle must outlive the sink; both stay on this thread.
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            let _ = ready_tx.send(Err(AppError::Setup(format!(
                "failed to open output device: {}",
                e
            ))));
            return;
        }
    };
    let sink = match Sink::try_new(&stream_handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = ready_tx.send(Err(AppError::Setup(format!(
                "failed to create playback sink: {}",
                e
            ))));
            return;
        }
    };
    sink.set_volume(initial_gain);
    let _ = ready_tx.send(Ok(()));
    info!("Playback sink ready (gain {:.2})", initial_gain);

    let mut assembler = ChunkAssembler::new();

    'main: loop {
        match command_rx.recv() {
            Err(_) | Ok(PlaybackCommand::Shutdown) => break 'main,
            Ok(PlaybackCommand::SetGain(gain)) => sink.set_volume(gain),
            Ok(PlaybackCommand::Chunk(bytes)) => {
                assembler.push(bytes);

                // Pick up anything else already queued so the drain below is
                // atomic with respect to the command channel.
                while let Ok(cmd) = command_rx.try_recv() {
                    match cmd {
                        PlaybackCommand::Chunk(bytes) => assembler.push(bytes),
                        PlaybackCommand::SetGain(gain) => sink.set_volume(gain),
                        PlaybackCommand::Shutdown => break 'main,
                    }
                }

                // Drain-and-play: chunks arriving mid-cycle accumulate and
                // all land in the next cycle, in arrival order.
                let mut failed = false;
                while let Some(pcm) = assembler.begin() {
                    debug!("Starting playback cycle with {} PCM bytes", pcm.len());
                    let container = codec::build_wav_container(
                        &pcm,
                        config.sample_rate,
                        config.channels,
                        config.bits_per_sample,
                    );

                    match Decoder::new(Cursor::new(container)) {
                        Ok(source) => {
                            sink.append(source);
                            stats.record_playback_cycle();
                            match wait_for_sink(&sink, &command_rx, &mut assembler) {
                                SinkWait::Drained => assembler.complete(),
                                SinkWait::Shutdown => break 'main,
                            }
                        }
                        Err(e) => {
                            // Recoverable: drop the queue and fall through as
                            // if the cycle finished.
                            warn!("Failed to decode playback container: {}", e);
                            stats.record_decode_error();
                            assembler.clear();
                            sink.stop();
                            let _ = event_tx.send(PlaybackEvent::Failed(e.to_string()));
                            failed = true;
                            break;
                        }
                    }
                }

                if !failed {
                    let _ = event_tx.send(PlaybackEvent::Finished);
                }
            }
        }
    }

    // Teardown: cancel any in-flight audio and drop the queue.
    sink.stop();
    assembler.clear();
    info!("Playback sink released");
}

/// Block until the sink drains, queueing chunks that arrive mid-cycle.
fn wait_for_sink(
    sink: &Sink,
    command_rx: &Receiver<PlaybackCommand>,
    assembler: &mut ChunkAssembler,
) -> SinkWait {
    loop {
        if sink.empty() {
            return SinkWait::Drained;
        }
        match command_rx.recv_timeout(SINK_POLL) {
            Ok(PlaybackCommand::Chunk(bytes)) => assembler.push(bytes),
            Ok(PlaybackCommand::SetGain(gain)) => sink.set_volume(gain),
            Ok(PlaybackCommand::Shutdown) => return SinkWait::Shutdown,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => return SinkWait::Shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_cycle_concatenates_in_arrival_order() {
        let mut assembler = ChunkAssembler::new();
        assembler.push(vec![1, 2, 3]);
        assembler.push(vec![4, 5]);

        let pcm = assembler.begin().expect("cycle should start");
        assert_eq!(pcm, vec![1, 2, 3, 4, 5]);
        assert!(assembler.is_in_flight());
        assert_eq!(assembler.pending_len(), 0);
    }

    /// Chunks arriving while a cycle is in flight all land in the next
    /// cycle, concatenated in arrival order; none are dropped.
    #[test]
    fn test_late_chunks_batch_into_next_cycle() {
        let mut assembler = ChunkAssembler::new();

        // t1: first chunk starts a cycle
        assembler.push(vec![10, 11]);
        let first = assembler.begin().unwrap();
        assert_eq!(first, vec![10, 11]);

        // t2, t3: chunks arrive while the cycle is still in flight
        assembler.push(vec![20]);
        assembler.push(vec![30, 31]);
        assert!(assembler.begin().is_none(), "at most one cycle in flight");

        // Cycle ends: both late chunks appear in the next cycle, in order
        assembler.complete();
        let second = assembler.begin().unwrap();
        assert_eq!(second, vec![20, 30, 31]);

        assembler.complete();
        assert!(assembler.begin().is_none(), "queue fully drained");
    }

    /// Two chunks of 100 and 50 bytes before playback starts produce one
    /// cycle whose container carries a 150-byte payload (194 bytes total).
    #[test]
    fn test_pre_playback_chunks_merge_into_one_container() {
        let mut assembler = ChunkAssembler::new();
        assembler.push(vec![0xAA; 100]);
        assembler.push(vec![0xBB; 50]);

        let pcm = assembler.begin().unwrap();
        assert_eq!(pcm.len(), 150);

        let container = codec::build_wav_container(&pcm, 24000, 1, 16);
        assert_eq!(container.len(), 194);
        assert_eq!(&container[44..144], &[0xAA; 100][..]);
        assert_eq!(&container[144..], &[0xBB; 50][..]);
    }

    #[test]
    fn test_clear_resets_queue_and_flight() {
        let mut assembler = ChunkAssembler::new();
        assembler.push(vec![1]);
        let _ = assembler.begin().unwrap();
        assembler.push(vec![2]);

        assembler.clear();
        assert!(!assembler.is_in_flight());
        assert_eq!(assembler.pending_len(), 0);
        assert!(assembler.begin().is_none());
    }

    #[test]
    fn test_begin_empty_queue_is_none() {
        let mut assembler = ChunkAssembler::new();
        assert!(assembler.begin().is_none());
        assert!(!assembler.is_in_flight());
    }
}
