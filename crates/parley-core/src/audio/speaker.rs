use crate::{
    CoreResult, SessionError,
    audio::{AudioSink, SinkFactory, StreamFormat, Volume},
    worker::WorkerRole,
};

use std::{
    collections::VecDeque,
    panic::Location,
    sync::{Arc, Mutex, mpsc as std_mpsc},
    thread,
    time::Duration,
};

use async_trait::async_trait;
use cpal::{
    BufferSize, StreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use error_location::ErrorLocation;
use tokio::{sync::oneshot, task};
use tracing::{debug, error, info, instrument};

/// Seconds of audio the sink queues before `write` starts waiting.
pub(crate) const MAX_BUFFERED_SECONDS: usize = 2;

/// Poll interval while waiting for buffer space or a drain.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long to wait for the device thread to report the stream running.
const DEVICE_START_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a full queue may go without the device pulling from it.
const DEVICE_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens the default output device through cpal.
#[derive(Debug, Clone)]
pub struct SpeakerFactory {
    volume: Volume,
}

impl SpeakerFactory {
    /// Speakers opened by this factory scale output by `volume`.
    pub fn new(volume: Volume) -> Self {
        Self { volume }
    }
}

#[async_trait]
impl SinkFactory for SpeakerFactory {
    async fn open(&self) -> CoreResult<Box<dyn AudioSink>> {
        Ok(Box::new(Speaker {
            volume: self.volume.clone(),
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            format: None,
            device: None,
        }))
    }
}

struct Speaker {
    volume: Volume,
    buffer: Arc<Mutex<VecDeque<f32>>>,
    format: Option<StreamFormat>,
    device: Option<DeviceThread>,
}

/// The thread owning a cpal output stream, stopped by a message.
pub(crate) struct DeviceThread {
    pub(crate) stop_tx: std_mpsc::Sender<()>,
    pub(crate) handle: thread::JoinHandle<()>,
}

impl DeviceThread {
    /// Signals the thread to drop its stream and joins it on the blocking pool.
    pub(crate) fn shutdown(self) -> task::JoinHandle<()> {
        let _ = self.stop_tx.send(());
        let handle = self.handle;
        task::spawn_blocking(move || {
            if handle.join().is_err() {
                error!("Speaker thread panicked");
            }
        })
    }
}

impl Speaker {
    fn buffered(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl AudioSink for Speaker {
    #[instrument(skip(self))]
    async fn configure(&mut self, format: StreamFormat) -> CoreResult<()> {
        if let Some(device) = self.device.take()
            && let Err(e) = device.shutdown().await
        {
            error!(error = %e, "Previous speaker thread not joined");
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let buffer = Arc::clone(&self.buffer);

        let handle = thread::Builder::new()
            .name("parley-speaker".to_string())
            .spawn(move || run_device(format, buffer, ready_tx, stop_rx))
            .map_err(|e| playback_error(format!("Failed to spawn device thread: {}", e)))?;

        match tokio::time::timeout(DEVICE_START_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(reason))) => return Err(playback_error(reason)),
            Ok(Err(_)) => return Err(playback_error("Device thread exited early".to_string())),
            Err(_) => {
                let _ = stop_tx.send(());
                return Err(playback_error(
                    "Output device did not start in time".to_string(),
                ));
            }
        }

        self.device = Some(DeviceThread { stop_tx, handle });
        self.format = Some(format);
        info!(format = %format, "Speaker configured");

        Ok(())
    }

    async fn write(&mut self, samples: &[i16]) -> CoreResult<()> {
        let Some(format) = self.format else {
            return Err(playback_error(
                "Samples written before the format was known".to_string(),
            ));
        };

        let limit =
            format.sample_rate as usize * usize::from(format.channels) * MAX_BUFFERED_SECONDS;
        let room = tokio::time::timeout(DEVICE_STALL_TIMEOUT, async {
            while self.buffered() >= limit {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await;
        if room.is_err() {
            return Err(playback_error(format!(
                "Output device stopped consuming samples for {}ms",
                DEVICE_STALL_TIMEOUT.as_millis()
            )));
        }

        let gain = self.volume.gain();
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(samples.iter().map(|&s| f32::from(s) / 32_768.0 * gain));

        Ok(())
    }

    async fn drain(&mut self, deadline: Duration) {
        if self.device.is_none() {
            return;
        }

        let drained = tokio::time::timeout(deadline, async {
            while self.buffered() > 0 {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await;

        if drained.is_err() {
            debug!(left = self.buffered(), "Drain deadline reached");
        }
    }

    fn stop(&mut self) {
        if let Some(device) = self.device.take() {
            // Joined in the background.
            drop(device.shutdown());
        }
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.format = None;
        debug!("Speaker released");
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            let _ = device.stop_tx.send(());
        }
    }
}

fn run_device(
    format: StreamFormat,
    buffer: Arc<Mutex<VecDeque<f32>>>,
    ready_tx: oneshot::Sender<Result<(), String>>,
    stop_rx: std_mpsc::Receiver<()>,
) {
    let host = cpal::default_host();

    let Some(device) = host.default_output_device() else {
        let _ = ready_tx.send(Err("No output device found".to_string()));
        return;
    };

    let config = StreamConfig {
        channels: format.channels,
        sample_rate: format.sample_rate,
        buffer_size: BufferSize::Default,
    };

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut queued = buffer.lock().unwrap_or_else(|e| e.into_inner());
            for slot in data.iter_mut() {
                *slot = queued.pop_front().unwrap_or(0.0);
            }
        },
        |err| {
            error!("Output stream error: {}", err);
        },
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(format!(
                "Failed to build output stream for {}: {}",
                format, e
            )));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(format!("Failed to start output stream: {}", e)));
        return;
    }

    if ready_tx.send(Ok(())).is_err() {
        return;
    }

    let _ = stop_rx.recv();
    drop(stream);
    debug!("Output stream dropped");
}

#[track_caller]
fn playback_error(reason: String) -> SessionError {
    SessionError::Pipeline {
        role: WorkerRole::Playback,
        reason,
        location: ErrorLocation::from(Location::caller()),
    }
}
