use crate::{
    CoreResult, SessionError,
    audio::{AudioSink, Decoder, DecoderFactory, SinkFactory, StreamFormat},
    router::RouterSender,
    stream::{Marker, SecureStream},
    worker::{
        ActivationContext, ActivationId, Activations, FinishReason, Worker, WorkerEvent,
        WorkerRole,
    },
};

use std::{panic::Location, sync::Arc, time::Duration};

use error_location::ErrorLocation;
use tracing::{debug, info, instrument, warn};

/// Consecutive read timeouts tolerated before any reply audio arrives.
pub const DEFAULT_IDLE_LIMIT: u32 = 5;

/// Bytes requested per stream read.
pub(crate) const READ_BUFFER_LEN: usize = 4096;

/// Upper bound on waiting for the sink to play out a completed reply.
pub(crate) const DRAIN_DEADLINE: Duration = Duration::from_secs(3);

/// Plays the server's reply.
///
/// Each activation reads the stream, decodes, and feeds the sink until the
/// reply ends, the worker is stopped, or something fails. The reply ends on
/// end-of-stream, on a read ending with the `end` marker, or on a read
/// timeout once audio has been flowing. Sink writes are raced against `stop()`
/// so a stalled device cannot hold the activation open.
pub struct PlaybackWorker {
    activations: Activations,
    stream: Arc<dyn SecureStream>,
    sinks: Arc<dyn SinkFactory>,
    decoders: Arc<dyn DecoderFactory>,
    idle_limit: u32,
}

impl PlaybackWorker {
    /// A worker with the default idle limit.
    pub fn new(
        router: RouterSender,
        stream: Arc<dyn SecureStream>,
        sinks: Arc<dyn SinkFactory>,
        decoders: Arc<dyn DecoderFactory>,
    ) -> Self {
        Self {
            activations: Activations::new(WorkerRole::Playback, router),
            stream,
            sinks,
            decoders,
            idle_limit: DEFAULT_IDLE_LIMIT,
        }
    }

    /// Replaces the number of timeouts tolerated while waiting for audio.
    pub fn with_idle_limit(mut self, idle_limit: u32) -> Self {
        self.idle_limit = idle_limit;
        self
    }
}

impl Worker for PlaybackWorker {
    #[track_caller]
    fn start(&self) -> CoreResult<ActivationId> {
        let stream = Arc::clone(&self.stream);
        let sinks = Arc::clone(&self.sinks);
        let decoder = self.decoders.create();
        let idle_limit = self.idle_limit;

        self.activations
            .spawn(move |ctx| run(ctx, stream, sinks, decoder, idle_limit))
    }

    fn stop(&self) -> bool {
        self.activations.stop()
    }

    fn is_running(&self) -> bool {
        self.activations.is_running()
    }
}

#[instrument(skip_all, fields(activation = %ctx.id))]
async fn run(
    mut ctx: ActivationContext,
    stream: Arc<dyn SecureStream>,
    sinks: Arc<dyn SinkFactory>,
    mut decoder: Box<dyn Decoder>,
    idle_limit: u32,
) {
    if let Err(e) = ctx.started().await {
        warn!(error = %e, "Router gone before playback started");
        return;
    }

    let mut sink = match sinks.open().await {
        Ok(sink) => sink,
        Err(e) => {
            ctx.finish(WorkerEvent::Error(e.to_string())).await;
            return;
        }
    };

    let outcome = download(
        &mut ctx,
        stream.as_ref(),
        sink.as_mut(),
        decoder.as_mut(),
        idle_limit,
    )
    .await;

    if outcome == WorkerEvent::Finished(FinishReason::Completed) && !ctx.is_cancelled() {
        sink.drain(DRAIN_DEADLINE).await;
    }
    sink.stop();
    info!(role = %ctx.role(), outcome = ?outcome, "Playback pipeline torn down");

    ctx.finish(outcome).await;
}

async fn download(
    ctx: &mut ActivationContext,
    stream: &dyn SecureStream,
    sink: &mut dyn AudioSink,
    decoder: &mut dyn Decoder,
    idle_limit: u32,
) -> WorkerEvent {
    let mut buf = vec![0u8; READ_BUFFER_LEN];
    let mut configured: Option<StreamFormat> = None;
    let mut audio_started = false;
    let mut idle_timeouts: u32 = 0;
    let mut bytes_received: usize = 0;

    loop {
        let read = tokio::select! {
            biased;
            _ = ctx.cancelled() => return finished(FinishReason::Cancelled, bytes_received),
            read = stream.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                debug!("Server closed the stream");
                return finished(FinishReason::Completed, bytes_received);
            }
            Ok(n) => n,
            Err(SessionError::StreamTimeout { timeout_ms, .. }) => {
                if audio_started {
                    debug!(timeout_ms, "Reply went quiet");
                    return finished(FinishReason::Completed, bytes_received);
                }
                idle_timeouts += 1;
                if idle_timeouts > idle_limit {
                    return WorkerEvent::Error(format!(
                        "No reply after {} consecutive {}ms timeouts",
                        idle_timeouts, timeout_ms
                    ));
                }
                debug!(idle_timeouts, "Waiting for reply");
                continue;
            }
            Err(e) => return WorkerEvent::Error(e.to_string()),
        };

        idle_timeouts = 0;
        audio_started = true;
        bytes_received += n;

        let (audio, end_of_reply) = match buf[..n].strip_suffix(Marker::End.as_bytes()) {
            Some(audio) => (audio, true),
            None => (&buf[..n], false),
        };

        if !audio.is_empty() {
            let played = tokio::select! {
                biased;
                _ = ctx.cancelled() => return finished(FinishReason::Cancelled, bytes_received),
                played = play(audio, decoder, sink, &mut configured) => played,
            };
            if let Err(e) = played {
                return WorkerEvent::Error(e.to_string());
            }
        }

        if end_of_reply {
            debug!("End marker received");
            return finished(FinishReason::Completed, bytes_received);
        }
    }
}

async fn play(
    bytes: &[u8],
    decoder: &mut dyn Decoder,
    sink: &mut dyn AudioSink,
    configured: &mut Option<StreamFormat>,
) -> CoreResult<()> {
    let decoded = decoder.decode(bytes)?;

    if let Some(format) = decoded.format {
        match *configured {
            None => {
                sink.configure(format).await?;
                *configured = Some(format);
            }
            Some(current) if current != format => {
                warn!(current = %current, reported = %format, "Format change mid-reply ignored");
            }
            Some(_) => {}
        }
    }

    if decoded.samples.is_empty() {
        return Ok(());
    }

    if configured.is_none() {
        return Err(SessionError::Pipeline {
            role: WorkerRole::Playback,
            reason: "Reply audio arrived before its format".to_string(),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    sink.write(&decoded.samples).await
}

fn finished(reason: FinishReason, bytes_received: usize) -> WorkerEvent {
    debug!(reason = ?reason, bytes_received, "Download ended");
    WorkerEvent::Finished(reason)
}
