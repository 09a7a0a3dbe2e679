//! # End-of-Turn Debouncer
//!
//! When the microphone goes inactive while the session is open, the peer
//! still needs an explicit signal that the local turn is over. The debouncer
//! waits out a quiet window (default 3000 ms); if the mic stays off, it
//! synthesizes one second of silence, encodes it like any other frame, and
//! sends it tagged `end_of_turn: true`. This is the only message that bypasses the
//! normal mic gate, since its purpose is precisely to speak for a silent mic.
//!
//! Reactivating the mic before the window elapses cancels the pending timer
//! with no side effect. Arming again replaces any prior timer; timers never
//! stack. Teardown cancels whatever is pending so nothing fires after the
//! session is gone.

use crate::audio::codec;
use crate::config::{AudioConfig, TurnConfig};
use crate::state::SharedStats;
use crate::websocket::ClientMessage;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Watches mic-inactive periods and emits the synthetic end-of-turn frame.
///
/// Owned by the session event loop, which calls [`arm`](Self::arm) on every
/// transition where `mic_active` becomes false while the session is open,
/// and [`cancel`](Self::cancel) when the mic comes back or the session ends.
pub struct EndOfTurnDebouncer {
    debounce: Duration,
    silence_samples: usize,
    outbound: UnboundedSender<ClientMessage>,
    stats: SharedStats,
    /// The pending single-shot task, if armed
    pending: Option<JoinHandle<()>>,
}

impl EndOfTurnDebouncer {
    pub fn new(
        turn: &TurnConfig,
        audio: &AudioConfig,
        outbound: UnboundedSender<ClientMessage>,
        stats: SharedStats,
    ) -> Self {
        Self {
            debounce: Duration::from_millis(turn.end_of_turn_debounce_ms),
            silence_samples: audio.silence_samples(turn.silence_duration_ms),
            outbound,
            stats,
            pending: None,
        }
    }

    /// Start (or restart) the quiet-window timer.
    ///
    /// Replaces any previously armed timer. When the window elapses the
    /// silence marker is sent exactly once.
    pub fn arm(&mut self) {
        self.cancel();

        let debounce = self.debounce;
        let silence_samples = self.silence_samples;
        let outbound = self.outbound.clone();
        let stats = self.stats.clone();

        debug!("End-of-turn debounce armed ({:?})", debounce);
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;

            let payload = codec::encode_payload(&codec::silence_pcm16(silence_samples));
            if outbound.send(ClientMessage::end_of_turn(payload)).is_ok() {
                stats.record_end_of_turn();
                info!(
                    "Sent end-of-turn marker ({} silence samples)",
                    silence_samples
                );
            }
        }));
    }

    /// Cancel the pending timer, if any, with no side effect.
    pub fn cancel(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
            debug!("End-of-turn debounce cancelled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

/// Nothing may fire after the owner is gone.
impl Drop for EndOfTurnDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use tokio::sync::mpsc;

    fn test_debouncer(
        outbound: UnboundedSender<ClientMessage>,
    ) -> EndOfTurnDebouncer {
        let config = AppConfig::default();
        EndOfTurnDebouncer::new(&config.turn, &config.audio, outbound, SharedStats::default())
    }

    /// Let spawned timer tasks observe advanced time and run to completion.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    /// After exactly the debounce window with no reactivation, one silence
    /// marker of 24000 zero samples goes out.
    #[tokio::test(start_paused = true)]
    async fn test_quiet_window_sends_one_marker() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = test_debouncer(tx);

        debouncer.arm();
        settle().await;
        tokio::time::advance(Duration::from_millis(3000)).await;
        settle().await;

        let msg = rx.try_recv().expect("marker should have been sent");
        assert_eq!(msg.end_of_turn, Some(true));
        let pcm = codec::decode_payload(&msg.audio).unwrap();
        assert_eq!(pcm.len(), 24000 * 2);
        assert!(pcm.iter().all(|&b| b == 0));

        // Exactly one
        assert!(rx.try_recv().is_err());
    }

    /// Reactivating the mic at 2000 ms cancels the timer: nothing is sent.
    #[tokio::test(start_paused = true)]
    async fn test_reactivation_cancels_marker() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = test_debouncer(tx);

        debouncer.arm();
        tokio::time::advance(Duration::from_millis(2000)).await;
        settle().await;
        debouncer.cancel();

        tokio::time::advance(Duration::from_millis(10_000)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
        assert!(!debouncer.is_armed());
    }

    /// Re-arming replaces the pending timer instead of stacking a second one.
    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = test_debouncer(tx);

        debouncer.arm();
        settle().await;
        tokio::time::advance(Duration::from_millis(1500)).await;
        settle().await;
        debouncer.arm();
        settle().await;

        // The first timer's deadline passes without firing
        tokio::time::advance(Duration::from_millis(1500)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        // The replacement fires at its own deadline
        tokio::time::advance(Duration::from_millis(1500)).await;
        settle().await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    /// Dropping the debouncer (teardown) cancels the outstanding timer.
    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = test_debouncer(tx);

        debouncer.arm();
        drop(debouncer);

        tokio::time::advance(Duration::from_millis(10_000)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }
}
