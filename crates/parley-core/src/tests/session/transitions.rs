use crate::{
    ButtonEdge, ButtonEvent, ButtonId, Command, ControlCommand, Notification, SessionRequest,
    SessionState, VolumeAction, WifiStatus,
    notification::WorkerReport,
    router::{self, RouterSender},
    session::{ChatAccepted, SessionMachine, SessionSettings},
    stream::SecureStream,
    tests::support::{FakeStream, FakeWorker, TEST_DEADLINE},
    worker::{ActivationId, FinishReason, Worker, WorkerEvent},
};

use std::sync::{Arc, atomic::Ordering};

use tokio::sync::broadcast::error::TryRecvError;

struct Rig {
    machine: SessionMachine,
    stream: Arc<FakeStream>,
    capture: Arc<FakeWorker>,
    playback: Arc<FakeWorker>,
    _sender: RouterSender,
}

fn rig_with(stream: Arc<FakeStream>) -> Rig {
    let (sender, receiver) = router::channel(4);
    let capture = Arc::new(FakeWorker::default());
    let playback = Arc::new(FakeWorker::default());
    let settings = SessionSettings {
        host: "voice.test".to_string(),
        port: 9000,
    };
    let machine = SessionMachine::new(
        receiver,
        stream.clone(),
        capture.clone(),
        playback.clone(),
        settings,
    );

    Rig {
        machine,
        stream,
        capture,
        playback,
        _sender: sender,
    }
}

fn rig() -> Rig {
    rig_with(FakeStream::new())
}

fn home(edge: ButtonEdge) -> Notification {
    Notification::Button(ButtonEvent {
        button: ButtonId::Home,
        edge,
    })
}

fn capture(activation: ActivationId, event: WorkerEvent) -> Notification {
    Notification::Capture(WorkerReport { activation, event })
}

fn playback(activation: ActivationId, event: WorkerEvent) -> Notification {
    Notification::Playback(WorkerReport { activation, event })
}

impl Rig {
    async fn press_home(&mut self) {
        self.machine.handle(home(ButtonEdge::Pressed)).await;
        self.machine.handle(home(ButtonEdge::Released)).await;
    }

    /// Drives Standby to Recording and returns the capture activation.
    #[allow(clippy::unwrap_used)]
    async fn start_recording(&mut self) -> ActivationId {
        self.press_home().await;
        assert_eq!(self.machine.state(), SessionState::Recording);
        self.capture.last_activation().unwrap()
    }

    /// Drives Standby to Playing and returns the playback activation.
    #[allow(clippy::unwrap_used)]
    async fn start_playing(&mut self) -> ActivationId {
        let activation = self.start_recording().await;
        self.machine
            .handle(capture(activation, WorkerEvent::Finished(FinishReason::Completed)))
            .await;
        assert_eq!(self.machine.state(), SessionState::Playing);
        self.playback.last_activation().unwrap()
    }
}

fn sample_notifications() -> Vec<Notification> {
    let stranger = ActivationId::new();
    vec![
        home(ButtonEdge::Pressed),
        home(ButtonEdge::Released),
        home(ButtonEdge::LongReleased),
        Notification::Button(ButtonEvent {
            button: ButtonId::Aux,
            edge: ButtonEdge::Released,
        }),
        capture(stranger, WorkerEvent::Started),
        capture(stranger, WorkerEvent::Finished(FinishReason::Completed)),
        capture(stranger, WorkerEvent::Error("boom".to_string())),
        playback(stranger, WorkerEvent::Finished(FinishReason::Cancelled)),
        playback(stranger, WorkerEvent::Error("boom".to_string())),
        Notification::ControlChannel(Command::Chat {
            continue_chat: true,
        }),
        Notification::ControlChannel(Command::Control(ControlCommand::SttEnd)),
        Notification::ControlChannel(Command::Control(ControlCommand::Volume(
            VolumeAction::Up,
        ))),
        Notification::Wifi(WifiStatus::Disconnected),
        Notification::Request(SessionRequest::Reset),
        Notification::Request(SessionRequest::Shutdown),
    ]
}

/// WHAT: Every state handles every kind of notification without hanging
/// WHY: Unexpected input in any state must be ignored or reset, never wedge the loop
#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn given_any_state_when_any_notification_arrives_then_handled_promptly() {
    for state in SessionState::ALL {
        for notification in sample_notifications() {
            // Given: A machine forced into the state
            let mut rig = rig();
            rig.machine.force_state(state);
            let description = format!("{:?} in {}", notification, state);

            // When: Handling the notification
            tokio::time::timeout(TEST_DEADLINE, rig.machine.handle(notification))
                .await
                .unwrap();

            // Then: Shutdown is terminal, Reset never lingers
            if state == SessionState::Shutdown {
                assert_eq!(rig.machine.state(), SessionState::Shutdown, "{}", description);
            }
            if state != SessionState::Reset {
                assert_ne!(rig.machine.state(), SessionState::Reset, "{}", description);
            }
        }
    }
}

/// WHAT: Notifications that never drive a transition leave the state alone
/// WHY: Connectivity, volume and unbound buttons are informational for the session
#[tokio::test]
async fn given_any_live_state_when_informational_notification_then_state_unchanged() {
    let informational = [
        Notification::Wifi(WifiStatus::Connected),
        Notification::ControlChannel(Command::Control(ControlCommand::Volume(
            VolumeAction::Down,
        ))),
        Notification::Button(ButtonEvent {
            button: ButtonId::Aux,
            edge: ButtonEdge::Pressed,
        }),
    ];

    for state in SessionState::ALL {
        for notification in informational.iter().cloned() {
            // Given: A machine in the state
            let mut rig = rig();
            rig.machine.force_state(state);

            // When: Handling an informational notification
            rig.machine.handle(notification).await;

            // Then: Nothing moved
            assert_eq!(rig.machine.state(), state);
            assert_eq!(rig.capture.starts.load(Ordering::Acquire), 0);
            assert_eq!(rig.stream.opens(), 0);
        }
    }
}

/// WHAT: A home press in Standby connects, announces the upload and starts capture
/// WHY: This is how every conversation begins
#[tokio::test]
async fn given_standby_when_home_pressed_then_recording_with_rec_marker() {
    // Given: A fresh machine
    let mut rig = rig();

    // When: Press and release home
    let activation = rig.start_recording().await;

    // Then: Stream opened, `rec` sent, capture awaited
    assert!(rig.stream.is_open());
    assert_eq!(rig.stream.markers(), vec!["rec"]);
    assert_eq!(rig.machine.pending(), (Some(activation), None));
}

/// WHAT: The press alone does nothing; the release fires
/// WHY: A held button must not start a session until it comes up
#[tokio::test]
async fn given_standby_when_only_pressed_then_still_standby() {
    // Given: A fresh machine
    let mut rig = rig();

    // When: Only the press edge arrives
    rig.machine.handle(home(ButtonEdge::Pressed)).await;

    // Then: Still idle
    assert_eq!(rig.machine.state(), SessionState::Standby);
    assert_eq!(rig.stream.opens(), 0);
}

/// WHAT: A long release counts as a home press
/// WHY: Users hold the button for varying lengths
#[tokio::test]
async fn given_standby_when_long_release_then_connects() {
    // Given: A fresh machine
    let mut rig = rig();

    // When: Press then long release
    rig.machine.handle(home(ButtonEdge::Pressed)).await;
    rig.machine.handle(home(ButtonEdge::LongReleased)).await;

    // Then: Recording
    assert_eq!(rig.machine.state(), SessionState::Recording);
}

/// WHAT: Capture completion writes `end` and starts playback
/// WHY: The server needs the end marker before it replies
#[tokio::test]
async fn given_recording_when_capture_completes_then_end_sent_and_playing() {
    // Given: A recording session
    let mut rig = rig();
    let activation = rig.start_recording().await;

    // When: Capture finishes on its own
    rig.machine
        .handle(capture(activation, WorkerEvent::Finished(FinishReason::Completed)))
        .await;

    // Then: `end` sent, playback started and awaited
    assert_eq!(rig.machine.state(), SessionState::Playing);
    assert_eq!(rig.stream.markers(), vec!["rec", "end"]);
    assert_eq!(rig.playback.starts.load(Ordering::Acquire), 1);
    assert_eq!(
        rig.machine.pending(),
        (None, rig.playback.last_activation())
    );
}

/// WHAT: stt/end stops capture without writing `end`
/// WHY: The server already knows the upload is over
#[tokio::test]
async fn given_recording_when_stt_end_then_no_end_marker_on_finish() {
    // Given: A recording session
    let mut rig = rig();
    let activation = rig.start_recording().await;

    // When: stt/end arrives, then capture reports cancellation
    rig.machine
        .handle(Notification::ControlChannel(Command::Control(
            ControlCommand::SttEnd,
        )))
        .await;
    assert_eq!(rig.machine.state(), SessionState::StopRecording);
    assert_eq!(rig.capture.stops.load(Ordering::Acquire), 1);
    rig.machine
        .handle(capture(activation, WorkerEvent::Finished(FinishReason::Cancelled)))
        .await;

    // Then: Playing, and only `rec` went out
    assert_eq!(rig.machine.state(), SessionState::Playing);
    assert_eq!(rig.stream.markers(), vec!["rec"]);
}

/// WHAT: A terminal from an activation nobody awaits is ignored
/// WHY: Reports from old activations must not drive the current session
#[tokio::test]
async fn given_recording_when_unknown_activation_finishes_then_ignored() {
    // Given: A recording session
    let mut rig = rig();
    let activation = rig.start_recording().await;

    // When: A terminal for some other activation arrives
    rig.machine
        .handle(capture(
            ActivationId::new(),
            WorkerEvent::Finished(FinishReason::Completed),
        ))
        .await;

    // Then: Still recording, still awaiting the real one
    assert_eq!(rig.machine.state(), SessionState::Recording);
    assert_eq!(rig.machine.pending(), (Some(activation), None));
    assert_eq!(rig.playback.starts.load(Ordering::Acquire), 0);
}

/// WHAT: Connecting while a previous activation is still draining resets instead
/// WHY: A new upload must not race the old worker for the stream
#[tokio::test]
async fn given_draining_capture_when_home_pressed_then_violation_resets_to_standby() {
    // Given: A recording session reset before capture reported back
    let mut rig = rig();
    let stale = rig.start_recording().await;
    rig.machine
        .handle(Notification::Request(SessionRequest::Reset))
        .await;
    assert_eq!(rig.machine.state(), SessionState::Standby);
    assert_eq!(rig.stream.markers(), vec!["rec", "brk"]);

    // When: Home is pressed while the old activation is still pending
    rig.press_home().await;

    // Then: Reset back to Standby without opening the stream again
    assert_eq!(rig.machine.state(), SessionState::Standby);
    assert_eq!(rig.stream.opens(), 1);

    // When: The stale terminal finally arrives
    rig.machine
        .handle(capture(stale, WorkerEvent::Finished(FinishReason::Cancelled)))
        .await;

    // Then: Its slot is cleared and nothing else happens
    assert_eq!(rig.machine.state(), SessionState::Standby);
    assert_eq!(rig.machine.pending(), (None, None));
    assert_eq!(rig.playback.starts.load(Ordering::Acquire), 0);

    // Then: The next press connects normally
    rig.start_recording().await;
    assert_eq!(rig.stream.opens(), 2);
}

/// WHAT: chat in Playing stores the continue flag and acknowledges with `end`
/// WHY: The flag decides what happens after the reply
#[tokio::test]
async fn given_playing_when_chat_continue_then_flag_set_and_end_sent() {
    // Given: A playing session
    let mut rig = rig();
    rig.start_playing().await;
    let mut chats = rig.machine.subscribe_chats();

    // When: chat continue=true
    rig.machine
        .handle(Notification::ControlChannel(Command::Chat {
            continue_chat: true,
        }))
        .await;

    // Then: Flag set, `end` written a second time, acceptance reported
    assert!(rig.machine.continue_chat());
    assert_eq!(rig.stream.markers(), vec!["rec", "end", "end"]);
    assert_eq!(
        chats.try_recv(),
        Ok(ChatAccepted {
            continue_chat: true
        })
    );
}

/// WHAT: chat outside Playing is ignored
/// WHY: A continue flag left over from nowhere would loop a conversation unasked
#[tokio::test]
async fn given_standby_when_chat_arrives_then_ignored() {
    // Given: A fresh machine
    let mut rig = rig();
    let mut chats = rig.machine.subscribe_chats();

    // When: chat continue=true arrives
    rig.machine
        .handle(Notification::ControlChannel(Command::Chat {
            continue_chat: true,
        }))
        .await;

    // Then: Nothing changed and nothing reported as accepted
    assert_eq!(rig.machine.state(), SessionState::Standby);
    assert!(!rig.machine.continue_chat());
    assert!(rig.stream.writes().is_empty());
    assert_eq!(chats.try_recv(), Err(TryRecvError::Empty));
}

/// WHAT: Playback completion with continue reconnects, and consumes the flag
/// WHY: Each reply decides afresh whether the conversation goes on
#[tokio::test]
async fn given_playing_with_continue_when_playback_completes_then_recording_again() {
    // Given: A playing session told to continue
    let mut rig = rig();
    let activation = rig.start_playing().await;
    rig.machine
        .handle(Notification::ControlChannel(Command::Chat {
            continue_chat: true,
        }))
        .await;

    // When: Playback completes
    rig.machine
        .handle(playback(activation, WorkerEvent::Finished(FinishReason::Completed)))
        .await;

    // Then: Recording again on a fresh stream, flag consumed
    assert_eq!(rig.machine.state(), SessionState::Recording);
    assert!(!rig.machine.continue_chat());
    assert_eq!(rig.stream.opens(), 2);
    assert_eq!(rig.stream.closes(), 1);
    assert_eq!(rig.capture.starts.load(Ordering::Acquire), 2);
}

/// WHAT: Playback completion without continue returns to Standby
/// WHY: Single-turn conversations end after the reply
#[tokio::test]
async fn given_playing_when_playback_completes_then_standby_stream_closed() {
    // Given: A playing session
    let mut rig = rig();
    let activation = rig.start_playing().await;

    // When: Playback completes
    rig.machine
        .handle(playback(activation, WorkerEvent::Finished(FinishReason::Completed)))
        .await;

    // Then: Idle with the stream closed
    assert_eq!(rig.machine.state(), SessionState::Standby);
    assert!(!rig.stream.is_open());
    assert_eq!(rig.machine.pending(), (None, None));
}

/// WHAT: A playback error resets the session
/// WHY: A half-played reply cannot be resumed
#[tokio::test]
async fn given_playing_when_playback_errors_then_standby_without_brk() {
    // Given: A playing session
    let mut rig = rig();
    let activation = rig.start_playing().await;

    // When: Playback fails
    rig.machine
        .handle(playback(activation, WorkerEvent::Error("speaker gone".to_string())))
        .await;

    // Then: Standby, no abort marker outside the upload
    assert_eq!(rig.machine.state(), SessionState::Standby);
    assert_eq!(rig.stream.markers(), vec!["rec", "end"]);
    assert!(!rig.stream.is_open());
}

/// WHAT: A failed connect resets to Standby without starting capture
/// WHY: The user can simply press again once the server is back
#[tokio::test]
async fn given_unreachable_server_when_home_pressed_then_standby() {
    // Given: A stream whose open fails
    let mut rig = rig_with(FakeStream::refusing());

    // When: Home is pressed
    rig.press_home().await;

    // Then: Standby, nothing started
    assert_eq!(rig.machine.state(), SessionState::Standby);
    assert_eq!(rig.capture.starts.load(Ordering::Acquire), 0);
    assert_eq!(rig.machine.pending(), (None, None));
}

/// WHAT: Shutdown stops both workers, closes the stream and is final
/// WHY: Nothing may reopen the stream once the process is exiting
#[tokio::test]
async fn given_recording_when_shutdown_then_terminal_and_inert() {
    // Given: A recording session
    let mut rig = rig();
    rig.start_recording().await;

    // When: Shutdown, then another home press
    rig.machine
        .handle(Notification::Request(SessionRequest::Shutdown))
        .await;
    rig.press_home().await;

    // Then: Shutdown, abort marker sent, stream stays closed
    assert_eq!(rig.machine.state(), SessionState::Shutdown);
    assert_eq!(rig.stream.markers(), vec!["rec", "brk"]);
    assert!(!rig.stream.is_open());
    assert_eq!(rig.stream.opens(), 1);
    assert!(!rig.capture.is_running());
}
