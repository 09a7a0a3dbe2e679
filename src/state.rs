//! # Session State Management
//!
//! This module owns the turn-taking state machine that is shared between the
//! transport dispatch, the playback pipeline, and local user intent. It is
//! the only cross-component mutable state in the engine.
//!
//! ## Turn-Taking Discipline:
//! Exactly one side may speak at a time. The state machine enforces the
//! exclusion invariant (`mic_active` and `system_speaking` are never both
//! true) on every transition. All mutations go through the named transition
//! methods below; no event handler writes fields directly.
//!
//! ## Shape:
//! `Idle → Preparing → Active(MicOn | SystemSpeaking) → TurnComplete →`
//! back to MicOn/SystemSpeaking, and terminal `Closed`. Closed is final:
//! every transition on a closed session is refused, and a fresh session
//! requires a fresh `SessionState`.

use std::sync::{Arc, RwLock};        // Thread-safe shared ownership and locking
use tokio::sync::watch;              // Mic-gate fan-out to the send path
use tracing::{debug, warn};

/// Snapshot of the turn-taking flags.
///
/// `mic_active` gates outbound audio; `system_speaking` means a playback
/// cycle is live (or queued); `turn_complete` mirrors the peer's last
/// `turn_complete` signal; `session_open` is true between the ready marker
/// and close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateFlags {
    pub mic_active: bool,
    pub system_speaking: bool,
    pub turn_complete: bool,
    pub session_open: bool,
    /// Terminal flag; once set, no transition is accepted again
    pub closed: bool,
}

/// The authoritative session state, shared across the engine's tasks.
///
/// ## Thread Safety Pattern:
/// Flags live behind `Arc<RwLock<_>>`: the event loop mutates through the
/// transition methods, the audio send path reads its gate from a `watch`
/// receiver that is refreshed after every committed transition. This keeps
/// the real-time path off the lock entirely.
#[derive(Debug, Clone)]
pub struct SessionState {
    flags: Arc<RwLock<StateFlags>>,
    mic_tx: Arc<watch::Sender<bool>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (mic_tx, _mic_rx) = watch::channel(false);
        Self {
            flags: Arc::new(RwLock::new(StateFlags::default())),
            mic_tx: Arc::new(mic_tx),
        }
    }

    /// Subscribe to the microphone gate.
    ///
    /// The receiver yields the current `mic_active` value and is refreshed
    /// on every transition; the outbound audio task consults it per frame
    /// without touching the state lock.
    pub fn subscribe_mic(&self) -> watch::Receiver<bool> {
        self.mic_tx.subscribe()
    }

    /// Get a copy of the current flags.
    pub fn snapshot(&self) -> StateFlags {
        *self.flags.read().unwrap()
    }

    pub fn mic_active(&self) -> bool {
        self.flags.read().unwrap().mic_active
    }

    pub fn session_open(&self) -> bool {
        self.flags.read().unwrap().session_open
    }

    pub fn is_closed(&self) -> bool {
        self.flags.read().unwrap().closed
    }

    /// Apply one transition under the write lock and re-publish the mic gate.
    ///
    /// Every transition funnels through here so the exclusion invariant is
    /// checked in exactly one place. A violation would be a bug in a
    /// transition body, not a runtime condition, hence the assert.
    fn commit(&self, name: &str, f: impl FnOnce(&mut StateFlags)) -> StateFlags {
        let mut flags = self.flags.write().unwrap();
        if flags.closed {
            warn!("State transition '{}' refused: session is closed", name);
            return *flags;
        }

        let before = *flags;
        f(&mut flags);
        assert!(
            !(flags.mic_active && flags.system_speaking),
            "turn-taking exclusion violated in transition '{}'",
            name
        );

        if before != *flags {
            debug!("State transition '{}': {:?} -> {:?}", name, before, *flags);
        }
        let _ = self.mic_tx.send(flags.mic_active);
        *flags
    }

    /// Peer finished preparing the interview: the session is live and the
    /// first turn belongs to the local participant.
    pub fn mark_ready(&self) -> StateFlags {
        self.commit("mark_ready", |f| {
            f.session_open = true;
            f.mic_active = true;
            f.system_speaking = false;
            f.turn_complete = false;
        })
    }

    /// Peer audio arrived: the system is speaking, the mic yields.
    pub fn audio_received(&self) -> StateFlags {
        self.commit("audio_received", |f| {
            f.system_speaking = true;
            f.mic_active = false;
            f.turn_complete = false;
        })
    }

    /// Peer signalled `turn_complete`: hand the turn back to the mic.
    pub fn server_turn_complete(&self) -> StateFlags {
        self.commit("server_turn_complete", |f| {
            f.system_speaking = false;
            f.mic_active = true;
            f.turn_complete = true;
        })
    }

    /// The playback queue drained (or a decode failure emptied it): the
    /// system is done speaking and the mic reopens.
    pub fn playback_finished(&self) -> StateFlags {
        self.commit("playback_finished", |f| {
            f.system_speaking = false;
            f.mic_active = true;
        })
    }

    /// Local mic-toggle intent.
    ///
    /// Allowed only while the session is open and the system is not
    /// speaking; otherwise refused with no state change. Returns whether the
    /// toggle was applied.
    pub fn toggle_microphone(&self) -> bool {
        let mut applied = false;
        self.commit("toggle_microphone", |f| {
            if f.session_open && !f.system_speaking {
                f.mic_active = !f.mic_active;
                applied = true;
            }
        });
        if !applied {
            debug!("Microphone toggle refused (session closed or system speaking)");
        }
        applied
    }

    /// Terminal transition: close the session and clear every flag.
    ///
    /// Safe to call more than once; the first call wins and later
    /// transitions of any kind are refused.
    pub fn close(&self) -> StateFlags {
        let mut flags = self.flags.write().unwrap();
        if !flags.closed {
            debug!("State transition 'close': {:?} -> closed", *flags);
        }
        *flags = StateFlags {
            closed: true,
            ..StateFlags::default()
        };
        let _ = self.mic_tx.send(false);
        *flags
    }
}

/// Performance counters for one voice session.
///
/// Updated from the transport and playback paths, snapshotted and logged at
/// session end.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Transport frames sent to the peer
    pub frames_sent: u64,

    /// PCM bytes sent to the peer (before base64 expansion)
    pub bytes_sent: u64,

    /// Audio chunks received from the peer
    pub chunks_received: u64,

    /// PCM bytes received from the peer (after base64 decoding)
    pub bytes_received: u64,

    /// Completed drain-and-play cycles
    pub playback_cycles: u64,

    /// Recoverable container decode failures
    pub decode_errors: u64,

    /// End-of-turn silence markers sent
    pub end_of_turn_markers: u64,
}

/// Shared handle to the session counters.
#[derive(Debug, Clone, Default)]
pub struct SharedStats(Arc<RwLock<SessionStats>>);

impl SharedStats {
    pub fn record_frame_sent(&self, pcm_bytes: usize) {
        let mut stats = self.0.write().unwrap();
        stats.frames_sent += 1;
        stats.bytes_sent += pcm_bytes as u64;
    }

    pub fn record_chunk_received(&self, pcm_bytes: usize) {
        let mut stats = self.0.write().unwrap();
        stats.chunks_received += 1;
        stats.bytes_received += pcm_bytes as u64;
    }

    pub fn record_playback_cycle(&self) {
        self.0.write().unwrap().playback_cycles += 1;
    }

    pub fn record_decode_error(&self) {
        self.0.write().unwrap().decode_errors += 1;
    }

    pub fn record_end_of_turn(&self) {
        self.0.write().unwrap().end_of_turn_markers += 1;
    }

    /// Get a snapshot of current counters (for the end-of-session log line).
    pub fn snapshot(&self) -> SessionStats {
        self.0.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive the machine through every transition in several interleavings
    /// and confirm the exclusion invariant after each step.
    #[test]
    fn test_exclusion_invariant_holds_across_interleavings() {
        let transitions: [fn(&SessionState); 5] = [
            |s| {
                s.mark_ready();
            },
            |s| {
                s.audio_received();
            },
            |s| {
                s.server_turn_complete();
            },
            |s| {
                s.playback_finished();
            },
            |s| {
                s.toggle_microphone();
            },
        ];

        // Exhaustive over all length-4 sequences of the five transitions
        for a in 0..transitions.len() {
            for b in 0..transitions.len() {
                for c in 0..transitions.len() {
                    for d in 0..transitions.len() {
                        let state = SessionState::new();
                        for idx in [a, b, c, d] {
                            transitions[idx](&state);
                            let flags = state.snapshot();
                            assert!(
                                !(flags.mic_active && flags.system_speaking),
                                "exclusion violated after sequence {:?}",
                                [a, b, c, d]
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_ready_activates_mic() {
        let state = SessionState::new();
        assert!(!state.mic_active());

        let flags = state.mark_ready();
        assert!(flags.session_open);
        assert!(flags.mic_active);
        assert!(!flags.system_speaking);
        assert!(!flags.turn_complete);
    }

    #[test]
    fn test_audio_received_yields_mic() {
        let state = SessionState::new();
        state.mark_ready();

        let flags = state.audio_received();
        assert!(flags.system_speaking);
        assert!(!flags.mic_active);

        let flags = state.server_turn_complete();
        assert!(!flags.system_speaking);
        assert!(flags.mic_active);
        assert!(flags.turn_complete);
    }

    #[test]
    fn test_toggle_refused_while_system_speaking() {
        let state = SessionState::new();
        state.mark_ready();
        state.audio_received();

        assert!(!state.toggle_microphone());
        assert!(state.snapshot().system_speaking);

        // After playback finishes the toggle is allowed again
        state.playback_finished();
        assert!(state.toggle_microphone());
        assert!(!state.mic_active());
        assert!(state.toggle_microphone());
        assert!(state.mic_active());
    }

    #[test]
    fn test_toggle_refused_before_open() {
        let state = SessionState::new();
        assert!(!state.toggle_microphone());
        assert!(!state.mic_active());
    }

    #[test]
    fn test_closed_is_terminal() {
        let state = SessionState::new();
        state.mark_ready();
        state.close();

        let flags = state.snapshot();
        assert!(flags.closed);
        assert!(!flags.session_open);
        assert!(!flags.mic_active);

        // No transition leaves Closed
        state.mark_ready();
        state.server_turn_complete();
        assert!(!state.toggle_microphone());
        let flags = state.snapshot();
        assert!(flags.closed);
        assert!(!flags.mic_active);
        assert!(!flags.session_open);
    }

    #[test]
    fn test_mic_watch_tracks_transitions() {
        let state = SessionState::new();
        let rx = state.subscribe_mic();
        assert!(!*rx.borrow());

        state.mark_ready();
        assert!(*rx.borrow());

        state.audio_received();
        assert!(!*rx.borrow());

        state.playback_finished();
        assert!(*rx.borrow());

        state.close();
        assert!(!*rx.borrow());
    }

    #[test]
    fn test_stats_counters() {
        let stats = SharedStats::default();
        stats.record_frame_sent(5464);
        stats.record_frame_sent(5464);
        stats.record_chunk_received(100);
        stats.record_playback_cycle();
        stats.record_decode_error();

        let snap = stats.snapshot();
        assert_eq!(snap.frames_sent, 2);
        assert_eq!(snap.bytes_sent, 10928);
        assert_eq!(snap.chunks_received, 1);
        assert_eq!(snap.playback_cycles, 1);
        assert_eq!(snap.decode_errors, 1);
    }
}
