use crate::{
    CoreResult, SessionError,
    audio::{AudioSource, SourceFactory, StreamFormat},
    worker::WorkerRole,
};

use std::{
    panic::Location,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc as std_mpsc,
    },
    thread,
    time::Duration,
};

use async_trait::async_trait;
use cpal::{
    StreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use error_location::ErrorLocation;
use tokio::{
    sync::{mpsc, oneshot},
    task,
};
use tracing::{debug, error, info, instrument, warn};

/// Chunks buffered between the device callback and the capture worker.
/// A full queue drops the newest chunk rather than blocking the callback.
pub(crate) const CHUNK_QUEUE_DEPTH: usize = 64;

/// How long to wait for the device thread to report the stream running.
pub(crate) const DEVICE_START_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens the default input device through cpal.
#[derive(Debug, Clone, Default)]
pub struct MicrophoneFactory;

#[async_trait]
impl SourceFactory for MicrophoneFactory {
    #[instrument(skip(self))]
    async fn open(&self) -> CoreResult<Box<dyn AudioSource>> {
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let failure = Arc::new(Mutex::new(None));

        let thread_failure = Arc::clone(&failure);
        let handle = thread::Builder::new()
            .name("parley-mic".to_string())
            .spawn(move || run_device(chunk_tx, ready_tx, stop_rx, thread_failure))
            .map_err(|e| capture_error(format!("Failed to spawn device thread: {}", e)))?;

        let format = match tokio::time::timeout(DEVICE_START_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(format))) => format,
            Ok(Ok(Err(reason))) => return Err(capture_error(reason)),
            Ok(Err(_)) => return Err(capture_error("Device thread exited early".to_string())),
            Err(_) => {
                let _ = stop_tx.send(());
                return Err(capture_error("Input device did not start in time".to_string()));
            }
        };

        info!(format = %format, "Microphone open");

        Ok(Box::new(Microphone {
            format,
            chunks: chunk_rx,
            failure,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }))
    }
}

struct Microphone {
    format: StreamFormat,
    chunks: mpsc::Receiver<Vec<f32>>,
    failure: Arc<Mutex<Option<String>>>,
    stop_tx: Option<std_mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[async_trait]
impl AudioSource for Microphone {
    fn format(&self) -> StreamFormat {
        self.format
    }

    async fn read(&mut self) -> CoreResult<Option<Vec<f32>>> {
        let chunk = self.chunks.recv().await;

        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(reason) = failure {
            return Err(capture_error(reason));
        }

        Ok(chunk)
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            // Joined on the blocking pool; the stop signal is already sent.
            drop(task::spawn_blocking(move || {
                if handle.join().is_err() {
                    error!("Microphone thread panicked");
                }
            }));
        }
        self.chunks.close();
        debug!("Microphone released");
    }
}

impl Drop for Microphone {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

/// Owns the cpal stream for its whole life; cpal streams are not `Send` on
/// every backend.
fn run_device(
    chunk_tx: mpsc::Sender<Vec<f32>>,
    ready_tx: oneshot::Sender<Result<StreamFormat, String>>,
    stop_rx: std_mpsc::Receiver<()>,
    failure: Arc<Mutex<Option<String>>>,
) {
    let host = cpal::default_host();

    let Some(device) = host.default_input_device() else {
        let _ = ready_tx.send(Err("No input device found".to_string()));
        return;
    };

    let config: StreamConfig = match device.default_input_config() {
        Ok(config) => config.into(),
        Err(e) => {
            let _ = ready_tx.send(Err(format!("Failed to get input config: {}", e)));
            return;
        }
    };

    let format = StreamFormat::new(config.sample_rate, config.channels);
    let shutdown = Arc::new(AtomicBool::new(false));
    let callback_shutdown = Arc::clone(&shutdown);
    let error_tx = chunk_tx.clone();

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if callback_shutdown.load(Ordering::Acquire) {
                return;
            }
            if chunk_tx.try_send(data.to_vec()).is_err() {
                warn!(samples = data.len(), "Capture queue full, chunk dropped");
            }
        },
        move |err| {
            error!("Input stream error: {}", err);
            *failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(err.to_string());
            // Wake the reader so it sees the failure.
            let _ = error_tx.try_send(Vec::new());
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(format!("Failed to build input stream: {}", e)));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(format!("Failed to start input stream: {}", e)));
        return;
    }

    if ready_tx.send(Ok(format)).is_err() {
        return;
    }

    // Either an explicit stop or the sender being dropped ends the capture.
    let _ = stop_rx.recv();

    shutdown.store(true, Ordering::Release);
    drop(stream);
    debug!("Input stream dropped");
}

#[track_caller]
fn capture_error(reason: String) -> SessionError {
    SessionError::Pipeline {
        role: WorkerRole::Capture,
        reason,
        location: ErrorLocation::from(Location::caller()),
    }
}
