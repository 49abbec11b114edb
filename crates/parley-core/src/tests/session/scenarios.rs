use crate::{
    ButtonEdge, ButtonEvent, ButtonId, Command, ControlCommand, Notification, SessionRequest,
    SessionState,
    audio::{PcmDecoderFactory, StreamFormat, UPLOAD_FORMAT},
    router::{self, DEFAULT_ROUTER_CAPACITY, RouterSender},
    session::{SessionMachine, SessionSettings},
    stream::{DeviceIdentity, IDENTITY_RECORD_LEN, SecureStream, ServerStream},
    tests::support::{
        DuplexConnector, FakeStream, ReadStep, RecordingSinkFactory, RefusingConnector,
        ScriptedSourceFactory, SourceEnd, TEST_DEADLINE, TEST_MAC, expect_states, pcm_bytes,
    },
    worker::{CaptureWorker, PlaybackWorker, Worker},
};

use std::{sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::broadcast,
    task::JoinHandle,
};

const REPLY_FORMAT: StreamFormat = StreamFormat::new(16_000, 1);
const STREAM_TIMEOUT: Duration = Duration::from_millis(500);

use SessionState::{
    Connecting, Playing, PlayingFinished, Recording, RecordingFinished, Reset, Shutdown, Standby,
    StopRecording,
};

struct Harness {
    sender: RouterSender,
    observer: broadcast::Receiver<SessionState>,
    capture: Arc<CaptureWorker>,
    playback: Arc<PlaybackWorker>,
    sinks: Arc<RecordingSinkFactory>,
    session: JoinHandle<SessionState>,
}

impl Harness {
    fn spawn(stream: Arc<dyn SecureStream>, source: ScriptedSourceFactory) -> Self {
        let (sender, receiver) = router::channel(DEFAULT_ROUTER_CAPACITY);
        let sinks = Arc::new(RecordingSinkFactory::default());

        let capture = Arc::new(CaptureWorker::new(
            sender.clone(),
            Arc::clone(&stream),
            Arc::new(source),
        ));
        let playback = Arc::new(
            PlaybackWorker::new(
                sender.clone(),
                Arc::clone(&stream),
                sinks.clone(),
                Arc::new(PcmDecoderFactory::new(REPLY_FORMAT)),
            )
            .with_idle_limit(10_000),
        );

        let settings = SessionSettings {
            host: "voice.test".to_string(),
            port: 9000,
        };
        let machine = SessionMachine::new(
            receiver,
            stream,
            capture.clone(),
            playback.clone(),
            settings,
        );
        let observer = machine.subscribe();
        let session = tokio::spawn(machine.run());

        Self {
            sender,
            observer,
            capture,
            playback,
            sinks,
            session,
        }
    }

    #[allow(clippy::unwrap_used)]
    async fn post(&self, notification: Notification) {
        self.sender.post(notification).await.unwrap();
    }

    async fn press_home(&self) {
        for edge in [ButtonEdge::Pressed, ButtonEdge::Released] {
            self.post(Notification::Button(ButtonEvent {
                button: ButtonId::Home,
                edge,
            }))
            .await;
        }
    }

    /// Expects `states` in order, checking the workers never overlap.
    async fn expect(&mut self, states: &[SessionState]) {
        for state in states {
            expect_states(&mut self.observer, std::slice::from_ref(state)).await;
            assert!(
                !(self.capture.is_running() && self.playback.is_running()),
                "capture and playback both running in {}",
                state
            );
        }
    }

    #[allow(clippy::unwrap_used)]
    async fn shutdown(mut self) -> SessionState {
        self.post(Notification::Request(SessionRequest::Shutdown))
            .await;
        self.expect(&[Shutdown]).await;
        tokio::time::timeout(TEST_DEADLINE, self.session)
            .await
            .unwrap()
            .unwrap()
    }
}

/// Polls until the stream has recorded `expected` markers.
async fn wait_for_markers(stream: &FakeStream, expected: &[&str]) {
    let deadline = tokio::time::Instant::now() + TEST_DEADLINE;
    while stream.markers() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "markers {:?}, expected {:?}",
            stream.markers(),
            expected
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn finite_source() -> ScriptedSourceFactory {
    ScriptedSourceFactory::new(
        UPLOAD_FORMAT,
        vec![vec![0.0; 160], vec![0.0; 160]],
        SourceEnd::Dry,
    )
}

/// WHAT: One full turn over an authenticating server returns to Standby
/// WHY: The basic conversation: connect, upload, play, finish
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_standby_when_home_pressed_and_server_accepts_then_full_turn_returns_to_standby() {
    // Given: A server that accepts, waits for the end of upload, replies and hangs up
    let (connector, mut accepted) = DuplexConnector::new();
    let server = tokio::spawn(async move {
        let mut io = accepted.recv().await.unwrap();
        let mut record = [0u8; IDENTITY_RECORD_LEN];
        io.read_exact(&mut record).await.unwrap();
        io.write_all(b"accept\0\0").await.unwrap();

        let mut upload = Vec::new();
        let mut buf = [0u8; 1024];
        while !upload.ends_with(b"end") {
            let n = io.read(&mut buf).await.unwrap();
            assert!(n > 0, "client hung up mid upload");
            upload.extend_from_slice(&buf[..n]);
        }

        io.write_all(&pcm_bytes(&[100, 200, 300])).await.unwrap();
        upload
    });
    let stream: Arc<dyn SecureStream> = Arc::new(ServerStream::new(
        connector,
        DeviceIdentity::new(TEST_MAC),
        STREAM_TIMEOUT,
    ));
    let mut harness = Harness::spawn(Arc::clone(&stream), finite_source());

    // When: The user presses home
    harness.press_home().await;

    // Then: The session walks the whole turn and lands in Standby
    harness
        .expect(&[
            Connecting,
            Recording,
            RecordingFinished,
            Playing,
            PlayingFinished,
            Standby,
        ])
        .await;

    // Then: The server saw rec, the PCM upload, then end
    let upload = server.await.unwrap();
    assert!(upload.starts_with(b"rec"));
    assert!(upload.ends_with(b"end"));
    assert_eq!(upload.len(), 3 + 2 * 320 + 3);

    // Then: The reply was played and the stream is closed
    assert_eq!(harness.sinks.snapshot().samples, vec![100, 200, 300]);
    assert!(!stream.is_open());
    assert_eq!(harness.shutdown().await, Shutdown);
}

/// WHAT: A refused connection resets to Standby with the stream closed
/// WHY: Connect failures are recoverable, never fatal
#[tokio::test]
async fn given_connecting_when_open_fails_then_reset_to_standby_stream_closed() {
    // Given: A server that refuses connections
    let stream: Arc<dyn SecureStream> = Arc::new(ServerStream::new(
        RefusingConnector,
        DeviceIdentity::new(TEST_MAC),
        STREAM_TIMEOUT,
    ));
    let mut harness = Harness::spawn(Arc::clone(&stream), finite_source());

    // When: The user presses home
    harness.press_home().await;

    // Then: Connecting, Reset, Standby; nothing left open or running
    harness.expect(&[Connecting, Reset, Standby]).await;
    assert!(!stream.is_open());
    assert!(!harness.capture.is_running());
    assert_eq!(harness.shutdown().await, Shutdown);
}

/// WHAT: A rejected device resets to Standby
/// WHY: Auth failures are recoverable and never start an upload
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_connecting_when_auth_rejected_then_reset_to_standby() {
    // Given: A server that rejects the device
    let (connector, mut accepted) = DuplexConnector::new();
    tokio::spawn(async move {
        let mut io = accepted.recv().await.unwrap();
        let mut record = [0u8; IDENTITY_RECORD_LEN];
        io.read_exact(&mut record).await.unwrap();
        io.write_all(b"reject\0\0").await.unwrap();
        io
    });
    let stream: Arc<dyn SecureStream> = Arc::new(ServerStream::new(
        connector,
        DeviceIdentity::new(TEST_MAC),
        STREAM_TIMEOUT,
    ));
    let mut harness = Harness::spawn(Arc::clone(&stream), finite_source());

    // When: The user presses home
    harness.press_home().await;

    // Then: Reset back to Standby without recording
    harness.expect(&[Connecting, Reset, Standby]).await;
    assert!(!stream.is_open());
    assert!(!harness.capture.is_running());
    assert_eq!(harness.shutdown().await, Shutdown);
}

/// WHAT: chat with continue=true loops back to Connecting after playback
/// WHY: Multi-turn conversations start recording again without a button press
#[tokio::test]
async fn given_playing_when_chat_continue_then_playback_finished_loops_to_connecting() {
    // Given: A session recording from an endless microphone
    let stream = FakeStream::new();
    let mut harness = Harness::spawn(stream.clone(), ScriptedSourceFactory::endless());
    harness.press_home().await;
    harness.expect(&[Connecting, Recording]).await;

    // When: The server ends speech detection, then sends chat continue=true
    harness
        .post(Notification::ControlChannel(Command::Control(
            ControlCommand::SttEnd,
        )))
        .await;
    harness
        .expect(&[StopRecording, RecordingFinished, Playing])
        .await;
    harness
        .post(Notification::ControlChannel(Command::Chat {
            continue_chat: true,
        }))
        .await;
    wait_for_markers(&stream, &["rec", "end"]).await;
    stream.push_read(ReadStep::Data(pcm_bytes(&[1, 2])));
    stream.push_read(ReadStep::Eof);

    // Then: Playback finishes and the session reconnects instead of idling
    harness
        .expect(&[PlayingFinished, Connecting, Recording])
        .await;
    assert_eq!(stream.opens(), 2);
    assert_eq!(stream.closes(), 1);

    // Then: Shutting down mid-upload aborts it
    assert_eq!(harness.shutdown().await, Shutdown);
    assert_eq!(stream.markers(), vec!["rec", "end", "rec", "brk"]);
    assert!(!stream.is_open());
}

/// WHAT: Home during recording stops the upload and sends `end`
/// WHY: The button is the user's way to say "I'm done talking"
#[tokio::test]
async fn given_recording_when_home_pressed_then_end_sent_and_playback_started() {
    // Given: A session recording from an endless microphone
    let stream = FakeStream::new();
    let mut harness = Harness::spawn(stream.clone(), ScriptedSourceFactory::endless());
    harness.press_home().await;
    harness.expect(&[Connecting, Recording]).await;

    // When: Home is pressed again
    harness.press_home().await;

    // Then: Upload stops, `end` goes out, playback starts
    harness
        .expect(&[StopRecording, RecordingFinished, Playing])
        .await;
    assert_eq!(stream.markers(), vec!["rec", "end"]);
    assert_eq!(harness.shutdown().await, Shutdown);
}

/// WHAT: Home during playback cancels it and returns to Standby even if chat said continue
/// WHY: The user's cancel wins over the server's request to keep talking
#[tokio::test]
async fn given_playing_with_continue_when_home_pressed_then_standby() {
    // Given: A session playing a reply with continue=true already received
    let stream = FakeStream::new();
    let mut harness = Harness::spawn(stream.clone(), finite_source());
    harness.press_home().await;
    harness
        .expect(&[Connecting, Recording, RecordingFinished, Playing])
        .await;
    harness
        .post(Notification::ControlChannel(Command::Chat {
            continue_chat: true,
        }))
        .await;

    // When: Home is pressed during playback
    harness.press_home().await;

    // Then: Playback is cancelled and the session idles
    harness.expect(&[PlayingFinished, Standby]).await;
    assert!(!stream.is_open());
    assert!(!harness.sinks.snapshot().drained);
    assert_eq!(harness.shutdown().await, Shutdown);
}

/// WHAT: A microphone failure resets the session and aborts the upload
/// WHY: Pipeline errors must not leave the server waiting for audio
#[tokio::test]
async fn given_recording_when_capture_fails_then_brk_sent_and_standby() {
    // Given: A microphone that fails after one chunk
    let stream = FakeStream::new();
    let source = ScriptedSourceFactory::new(UPLOAD_FORMAT, vec![vec![0.0; 160]], SourceEnd::Fail);
    let mut harness = Harness::spawn(stream.clone(), source);

    // When: Recording starts
    harness.press_home().await;

    // Then: Reset to Standby with the abort marker sent before close
    harness
        .expect(&[Connecting, Recording, Reset, Standby])
        .await;
    assert_eq!(stream.markers(), vec!["rec", "brk"]);
    assert!(!stream.is_open());
    assert_eq!(harness.shutdown().await, Shutdown);
}

/// WHAT: A release without a matching press does nothing
/// WHY: A release left over from before startup must not start a session
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_standby_when_only_release_arrives_then_no_connect() {
    // Given: A session in Standby
    let stream = FakeStream::new();
    let mut harness = Harness::spawn(stream.clone(), finite_source());

    // When: Only a release edge arrives, then a reset request
    harness
        .post(Notification::Button(ButtonEvent {
            button: ButtonId::Home,
            edge: ButtonEdge::Released,
        }))
        .await;
    harness
        .post(Notification::Request(SessionRequest::Reset))
        .await;

    // Then: The first observed change is the reset, never Connecting
    harness.expect(&[Reset, Standby]).await;
    assert_eq!(stream.opens(), 0);
    assert_eq!(harness.shutdown().await, Shutdown);
}
