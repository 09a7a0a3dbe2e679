//! # Microphone Capture
//!
//! Runs the cpal input stream on a dedicated audio thread. The stream
//! callback fires on cpal's real-time thread and does exactly one thing:
//! forward the float samples across a channel. It never touches session
//! state; the chunker and the turn-taking gate live on the other side of
//! that boundary.

use crate::config::AudioConfig;
use crate::error::{AppError, AppResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

/// How long to wait for the capture thread to report stream startup.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A handle to the dedicated capture thread.
///
/// Dropping the handle without calling [`CaptureThread::stop`] leaks the
/// thread until process exit; teardown paths must stop it explicitly so the
/// device is released in bounded time.
pub struct CaptureThread {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl CaptureThread {
    /// Spawn the capture thread and start the input stream.
    ///
    /// The stream is opened at the session's exact format (mono, 24 kHz,
    /// f32 samples); if the default input device cannot satisfy it, this is
    /// a setup error and propagates to the caller without touching any
    /// already-open session resources.
    ///
    /// Each device callback is forwarded over `frame_tx` as one capture
    /// frame (arbitrary length, in delivery order).
    pub fn spawn(config: &AudioConfig, frame_tx: UnboundedSender<Vec<f32>>) -> AppResult<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop_flag = shutdown.clone();
        let stream_config = cpal::StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // The stream must be created and dropped on its owning thread, so
        // startup success is reported back over a one-shot channel.
        let (ready_tx, ready_rx) = mpsc::channel::<AppResult<()>>();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(&stream_config, frame_tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until teardown; the stream keeps capturing while alive
                while !stop_flag.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(50));
                }

                drop(stream);
                info!("Capture stream released");
            })
            .map_err(|e| AppError::Setup(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(())) => Ok(Self { handle, shutdown }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AppError::Setup(
                "capture thread did not start within the startup timeout".to_string(),
            )),
        }
    }

    /// Stop capturing and release the device. Bounded: the thread parks in
    /// 50 ms naps, so join returns promptly.
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if self.handle.join().is_err() {
            warn!("Capture thread panicked during shutdown");
        }
    }
}

/// Open the default input device at the requested format and start it.
fn build_input_stream(
    stream_config: &cpal::StreamConfig,
    frame_tx: UnboundedSender<Vec<f32>>,
) -> AppResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| AppError::Setup("no input device available".to_string()))?;

    let device_name = device.name().unwrap_or_else(|_| "<unknown>".to_string());
    info!(
        "Opening capture device '{}' at {} Hz, {} ch",
        device_name, stream_config.sample_rate.0, stream_config.channels
    );

    let err_fn = move |err: cpal::StreamError| {
        // Stream errors after startup are logged; the session learns about a
        // dead mic through silence, and teardown still releases the device.
        error!("Capture stream error: {}", err);
    };

    let stream = device
        .build_input_stream(
            stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                // Real-time callback: forward and get out. A send error only
                // means the session side is already gone.
                let _ = frame_tx.send(data.to_vec());
            },
            err_fn,
            None,
        )
        .map_err(|e| AppError::Setup(format!("failed to open capture stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| AppError::Setup(format!("failed to start capture stream: {}", e)))?;

    Ok(stream)
}
