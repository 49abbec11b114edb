use crate::audio::DeviceThread;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc as std_mpsc,
    },
    thread,
    time::Duration,
};

/// WHAT: Shutting a device thread down leaves the async runtime free while it is joined
/// WHY: Speaker teardown runs inside the playback task and must not block its worker thread
#[tokio::test(flavor = "current_thread")]
#[allow(clippy::unwrap_used)]
async fn given_slow_device_thread_when_shutting_down_then_runtime_keeps_running() {
    // Given: A device thread that takes a while to release its stream
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
    let exited = Arc::new(AtomicBool::new(false));
    let handle = thread::spawn({
        let exited = Arc::clone(&exited);
        move || {
            let _ = stop_rx.recv();
            thread::sleep(Duration::from_millis(200));
            exited.store(true, Ordering::Release);
        }
    });
    let device = DeviceThread { stop_tx, handle };

    // When: Shutting it down
    let joined = device.shutdown();

    // Then: Timers on the single runtime thread still fire while the join is pending
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(!joined.is_finished());

    // Then: The join completes once the thread exits
    tokio::time::timeout(Duration::from_secs(2), joined)
        .await
        .unwrap()
        .unwrap();
    assert!(exited.load(Ordering::Acquire));
}
