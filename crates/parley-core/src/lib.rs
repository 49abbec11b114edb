//! Parley Core Library
//!
//! Session controller for a push-to-talk voice-chat appliance: an
//! authenticated stream to the voice server, capture and playback workers,
//! an ordered event router, the control-channel parser and the session state
//! machine that ties them together.
//!
//! # Example
//!
//! ```no_run
//! use parley_core::{
//!     CaptureWorker, DeviceIdentity, MicrophoneFactory, PlaybackWorker, ServerStream,
//!     SessionMachine, SessionSettings, SpeakerFactory, TcpConnector, Volume,
//!     WavDecoderFactory, router, stream::DEFAULT_TIMEOUT,
//! };
//!
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (sender, receiver) = router::channel(router::DEFAULT_ROUTER_CAPACITY);
//!     let identity = DeviceIdentity::new([0x02, 0, 0, 0, 0, 0x01]);
//!     let stream = Arc::new(ServerStream::new(TcpConnector, identity, DEFAULT_TIMEOUT));
//!
//!     let capture = Arc::new(CaptureWorker::new(
//!         sender.clone(),
//!         stream.clone(),
//!         Arc::new(MicrophoneFactory),
//!     ));
//!     let playback = Arc::new(PlaybackWorker::new(
//!         sender.clone(),
//!         stream.clone(),
//!         Arc::new(SpeakerFactory::new(Volume::default())),
//!         Arc::new(WavDecoderFactory),
//!     ));
//!
//!     let settings = SessionSettings {
//!         host: "voice.local".to_string(),
//!         port: 8443,
//!     };
//!     let machine = SessionMachine::new(receiver, stream, capture, playback, settings);
//!     machine.run().await;
//! }
//! ```

pub mod audio;
pub mod control;
mod error;
pub mod notification;
pub mod router;
pub mod session;
pub mod stream;
pub mod worker;

pub use {
    audio::{MicrophoneFactory, SpeakerFactory, StreamFormat, Volume, WavDecoderFactory},
    control::{CHAT_ACK, Command, ControlCommand, VolumeAction},
    error::{ParseError, Result as CoreResult, SessionError},
    notification::{ButtonEdge, ButtonEvent, ButtonId, Notification, SessionRequest, WifiStatus},
    router::{RouterReceiver, RouterSender},
    session::{ChatAccepted, SessionMachine, SessionSettings, SessionState},
    stream::{
        Connector, DeviceIdentity, SecureStream, ServerStream, TcpConnector, TlsConnector,
        TlsSettings,
    },
    worker::{ActivationId, CaptureWorker, FinishReason, PlaybackWorker, Worker, WorkerEvent},
};
