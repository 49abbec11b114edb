use crate::{
    CoreResult,
    audio::{AudioSource, Resampler, SourceFactory, StreamFormat, UPLOAD_FORMAT, encode_pcm16},
    router::RouterSender,
    stream::SecureStream,
    worker::{
        ActivationContext, ActivationId, Activations, FinishReason, Worker, WorkerEvent,
        WorkerRole,
    },
};

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

/// Uploads microphone audio to the stream.
///
/// Each activation opens the source, converts to the upload format and
/// writes 16-bit PCM frames until cancelled or the source ends.
pub struct CaptureWorker {
    activations: Activations,
    stream: Arc<dyn SecureStream>,
    sources: Arc<dyn SourceFactory>,
    upload_format: StreamFormat,
}

impl CaptureWorker {
    /// A worker uploading in [`UPLOAD_FORMAT`].
    pub fn new(
        router: RouterSender,
        stream: Arc<dyn SecureStream>,
        sources: Arc<dyn SourceFactory>,
    ) -> Self {
        Self::with_format(router, stream, sources, UPLOAD_FORMAT)
    }

    /// A worker uploading in `upload_format`.
    pub fn with_format(
        router: RouterSender,
        stream: Arc<dyn SecureStream>,
        sources: Arc<dyn SourceFactory>,
        upload_format: StreamFormat,
    ) -> Self {
        Self {
            activations: Activations::new(WorkerRole::Capture, router),
            stream,
            sources,
            upload_format,
        }
    }
}

impl Worker for CaptureWorker {
    #[track_caller]
    fn start(&self) -> CoreResult<ActivationId> {
        let stream = Arc::clone(&self.stream);
        let sources = Arc::clone(&self.sources);
        let upload_format = self.upload_format;

        self.activations
            .spawn(move |ctx| run(ctx, stream, sources, upload_format))
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
    sources: Arc<dyn SourceFactory>,
    upload_format: StreamFormat,
) {
    if let Err(e) = ctx.started().await {
        warn!(error = %e, "Router gone before capture started");
        return;
    }

    let mut source = match sources.open().await {
        Ok(source) => source,
        Err(e) => {
            ctx.finish(WorkerEvent::Error(e.to_string())).await;
            return;
        }
    };

    let outcome = upload(&mut ctx, source.as_mut(), stream.as_ref(), upload_format).await;

    source.stop();
    info!(outcome = ?outcome, "Capture pipeline torn down");

    ctx.finish(outcome).await;
}

async fn upload(
    ctx: &mut ActivationContext,
    source: &mut dyn AudioSource,
    stream: &dyn SecureStream,
    upload_format: StreamFormat,
) -> WorkerEvent {
    let mut resampler = match Resampler::new(source.format(), upload_format) {
        Ok(resampler) => resampler,
        Err(e) => return WorkerEvent::Error(e.to_string()),
    };

    let mut bytes_sent: usize = 0;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = ctx.cancelled() => return finished(FinishReason::Cancelled, bytes_sent),
            chunk = source.read() => chunk,
        };

        let samples = match chunk {
            Ok(Some(samples)) => resampler.process(&samples),
            Ok(None) => {
                let tail = match resampler.flush() {
                    Ok(tail) => tail,
                    Err(e) => return WorkerEvent::Error(e.to_string()),
                };
                if let Err(e) = send(stream, &tail, &mut bytes_sent).await {
                    return WorkerEvent::Error(e.to_string());
                }
                return finished(FinishReason::Completed, bytes_sent);
            }
            Err(e) => return WorkerEvent::Error(e.to_string()),
        };

        let sent = match samples {
            Ok(samples) => send(stream, &samples, &mut bytes_sent).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            return WorkerEvent::Error(e.to_string());
        }
    }
}

async fn send(
    stream: &dyn SecureStream,
    samples: &[f32],
    bytes_sent: &mut usize,
) -> CoreResult<()> {
    if samples.is_empty() {
        return Ok(());
    }
    let frame = encode_pcm16(samples);
    *bytes_sent += stream.write(&frame).await?;
    Ok(())
}

fn finished(reason: FinishReason, bytes_sent: usize) -> WorkerEvent {
    debug!(reason = ?reason, bytes_sent, "Upload ended");
    WorkerEvent::Finished(reason)
}
