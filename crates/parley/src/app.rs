use crate::{
    AppResult, ButtonMonitor, ChatAcknowledger, ControlBridge, ControlHandler,
    config::{Config, ReplyCodec},
};

use std::{sync::Arc, time::Duration};

use parley_core::{
    CaptureWorker, MicrophoneFactory, Notification, PlaybackWorker, RouterSender, SecureStream,
    ServerStream, SessionMachine, SessionRequest, SpeakerFactory, TcpConnector, TlsConnector,
    TlsSettings, Volume,
    audio::{DecoderFactory, PcmDecoderFactory, WavDecoderFactory},
    router::{self, DEFAULT_ROUTER_CAPACITY},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, instrument, warn};

/// How long background tasks get to stop after the session exits.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Wires the session machine to its devices and collaborators.
pub struct App {
    pub(crate) config: Config,
}

impl App {
    /// An app for a validated configuration.
    pub(crate) fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until the session shuts down.
    #[instrument(skip(self))]
    pub(crate) async fn run(self) -> AppResult<()> {
        info!(host = %self.config.server.host, port = self.config.server.port, "Parley starting");

        let identity = self.config.device.identity()?;
        info!(identity = %identity, "Device identity resolved");

        let (router_tx, router_rx) = router::channel(DEFAULT_ROUTER_CAPACITY);
        let volume = Volume::new(self.config.audio.volume);
        let timeout = self.config.server.timeout();

        let stream: Arc<dyn SecureStream> = match &self.config.server.tls {
            Some(tls) => {
                let connector = TlsConnector::from_settings(&TlsSettings::from(tls))?;
                Arc::new(ServerStream::new(connector, identity, timeout))
            }
            None => {
                warn!("No TLS material configured, using plain TCP");
                Arc::new(ServerStream::new(TcpConnector, identity, timeout))
            }
        };

        let capture = Arc::new(CaptureWorker::with_format(
            router_tx.clone(),
            Arc::clone(&stream),
            Arc::new(MicrophoneFactory),
            self.config.audio.upload_format(),
        ));

        let decoders: Arc<dyn DecoderFactory> = match self.config.audio.reply_codec {
            ReplyCodec::Wav => Arc::new(WavDecoderFactory),
            ReplyCodec::Pcm => Arc::new(PcmDecoderFactory::new(self.config.audio.reply_format())),
        };
        let playback = Arc::new(
            PlaybackWorker::new(
                router_tx.clone(),
                Arc::clone(&stream),
                Arc::new(SpeakerFactory::new(volume.clone())),
                decoders,
            )
            .with_idle_limit(self.config.audio.idle_limit),
        );

        let machine = SessionMachine::new(
            router_rx,
            stream,
            capture,
            playback,
            self.config.session_settings(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let bridge = Arc::new(ControlBridge::new(self.config.control.socket_path.clone()));
        let listener = bridge.bind()?;
        let handler = Arc::new(ControlHandler::new(router_tx.clone(), volume));

        let ack_task = tokio::spawn(
            ChatAcknowledger::new(bridge.clone(), self.config.control.response_topic.clone())
                .run(machine.subscribe_chats(), shutdown_rx.clone()),
        );
        let bridge_task = tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move {
                if let Err(e) = bridge.run(listener, handler, shutdown_rx).await {
                    error!(error = ?e, "Control bridge error");
                }
            }
        });

        let button_task = tokio::spawn({
            let monitor = ButtonMonitor::new(&self.config.buttons, router_tx.clone());
            let shutdown_rx = shutdown_rx.clone();
            async move {
                if let Err(e) = monitor.run(shutdown_rx).await {
                    error!(error = ?e, "Button monitor error");
                }
            }
        });

        let signal_task = tokio::spawn(watch_signals(router_tx, shutdown_rx));

        let final_state = machine.run().await;
        info!(state = %final_state, "Session finished");

        // No receivers left is fine.
        let _ = shutdown_tx.send(true);

        for (name, task) in [
            ("control bridge", bridge_task),
            ("chat acknowledger", ack_task),
            ("button monitor", button_task),
            ("signal watcher", signal_task),
        ] {
            stop_task(name, task).await;
        }

        info!("Parley shut down successfully");

        Ok(())
    }
}

/// Best-effort join with a timeout; the runtime cleans up stragglers on exit.
async fn stop_task(name: &str, task: JoinHandle<()>) {
    match tokio::time::timeout(TASK_STOP_TIMEOUT, task).await {
        Ok(Ok(())) => debug!(task = name, "Task stopped cleanly"),
        Ok(Err(e)) => error!(task = name, error = ?e, "Task panicked"),
        Err(_) => debug!(task = name, "Task did not stop within timeout, will be cleaned up on exit"),
    }
}

/// Turns process signals into session requests: interrupt and terminate shut
/// down, hang-up resets.
async fn watch_signals(router: RouterSender, mut shutdown_rx: watch::Receiver<bool>) {
    #[cfg(unix)]
    let (mut terminate, mut hangup) = {
        use tokio::signal::unix::{SignalKind, signal};
        match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
            (Ok(terminate), Ok(hangup)) => (terminate, hangup),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                return;
            }
        }
    };

    loop {
        #[cfg(unix)]
        let request = tokio::select! {
            _ = shutdown_rx.changed() => return,
            _ = tokio::signal::ctrl_c() => SessionRequest::Shutdown,
            _ = terminate.recv() => SessionRequest::Shutdown,
            _ = hangup.recv() => SessionRequest::Reset,
        };

        #[cfg(not(unix))]
        let request = tokio::select! {
            _ = shutdown_rx.changed() => return,
            _ = tokio::signal::ctrl_c() => SessionRequest::Shutdown,
        };

        info!(request = ?request, "Signal received");
        if router.post(Notification::Request(request)).await.is_err() {
            return;
        }
    }
}
