// Integration tests for the previewer supervisor
// Each test launches the real host stub as a child process

use crate::helpers::{
    EventCollector, ProjectFixture, init_test_logger, test_options, wait_until, wait_until_async,
};

use preview_core::config::PreviewerOptions;
use preview_core::error::previewer::PreviewerError;
use preview_core::previewer::{PreviewerEvent, PreviewerProcess};

use std::time::Duration;

use serial_test::serial;

const SETTLE_LIMIT: Duration = Duration::from_secs(10);

fn previewer() -> PreviewerProcess {
    init_test_logger();
    PreviewerProcess::new(test_options())
}

/// **VALUE**: Verifies the full happy path: start, handshake, update,
/// preview frame, acknowledgment, second frame.
///
/// **WHY THIS MATTERS**: This is the product. The second frame is the
/// load-bearing assertion: the host holds it until the first one is
/// acknowledged, so its arrival proves the acknowledgment pipeline works
/// end to end.
///
/// **BUG THIS CATCHES**: A supervisor that receives frames but never
/// acknowledges them would pass every single-frame test and deadlock in
/// real use on the second update.
#[tokio::test]
#[serial]
async fn given_running_previewer_when_updating_then_frames_flow_and_are_acknowledged() {
    // GIVEN: a started previewer backed by the host stub
    let previewer = previewer();
    let events = EventCollector::attach(&previewer);
    let fixture = ProjectFixture::new();
    fixture.start(&previewer).await;

    assert!(previewer.is_ready().await);
    assert!(previewer.process_id().await.is_some());

    // WHEN: the first update succeeds
    previewer
        .update_xaml("<Window />", (10, 20))
        .await
        .expect("first update");

    // THEN: its frame arrives
    wait_until(SETTLE_LIMIT, "first preview frame", || {
        previewer
            .preview_data()
            .is_some_and(|data| data.image_file_name == "preview-1.png")
    })
    .await;

    // WHEN: a second update follows
    previewer
        .update_xaml("<Window><Button /></Window>", (10, 20))
        .await
        .expect("second update");

    // THEN: the second frame arrives, which requires the first one's ack
    wait_until(SETTLE_LIMIT, "second preview frame", || {
        previewer
            .preview_data()
            .is_some_and(|data| data.image_file_name == "preview-2.png")
    })
    .await;

    // AND: each frame produced a clear-then-set notification pair
    let frames: Vec<_> = events
        .snapshot()
        .into_iter()
        .filter_map(|event| match event {
            PreviewerEvent::PreviewDataReceived(data) => {
                Some(data.map(|d| d.image_file_name))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        frames,
        vec![
            None,
            Some("preview-1.png".to_string()),
            None,
            Some("preview-2.png".to_string()),
        ]
    );

    previewer.stop().await;
}

/// **VALUE**: Verifies error reporting with de-duplication: the same
/// markup error notifies once, a different one notifies again, success
/// clears.
///
/// **WHY THIS MATTERS**: Updates fire on every keystroke; without
/// de-duplication the error panel would flicker on each one even though
/// nothing changed.
///
/// **BUG THIS CATCHES**: Comparing errors with full equality (stack
/// traces differ between reports of the same error) or forgetting to
/// clear on success.
#[tokio::test]
#[serial]
async fn given_failing_markup_when_repeated_then_error_notified_once() {
    let previewer = previewer();
    let events = EventCollector::attach(&previewer);
    let fixture = ProjectFixture::new();
    fixture.start(&previewer).await;

    // WHEN: the same broken markup is submitted twice
    previewer
        .update_xaml("<Window error-line=3 />", (0, 0))
        .await
        .expect("first failing update");
    wait_until(SETTLE_LIMIT, "error on line 3", || {
        previewer
            .error()
            .is_some_and(|error| error.uixml_line_number == Some(3))
    })
    .await;

    previewer
        .update_xaml("<Window error-line=3 />", (0, 0))
        .await
        .expect("repeated failing update");

    // AND: a differently-placed error follows
    previewer
        .update_xaml("<Window error-line=5 />", (0, 0))
        .await
        .expect("different failing update");
    wait_until(SETTLE_LIMIT, "error on line 5", || {
        previewer
            .error()
            .is_some_and(|error| error.uixml_line_number == Some(5))
    })
    .await;

    // THEN: the duplicate produced no notification of its own
    assert_eq!(events.error_changes(), 2);

    // AND: a successful update clears the error
    previewer
        .update_xaml("<Window />", (0, 0))
        .await
        .expect("successful update");
    wait_until(SETTLE_LIMIT, "error cleared", || previewer.error().is_none()).await;
    assert_eq!(events.error_changes(), 3);

    previewer.stop().await;
}

/// **VALUE**: Verifies the last error outlives `stop`.
///
/// **WHY THIS MATTERS**: The designer shows the error panel while the
/// previewer is torn down and rebuilt; wiping it on stop would blank the
/// panel exactly when the user is reading it. The next `start` clears it.
///
/// **BUG THIS CATCHES**: A stop that resets error state along with the
/// process state.
#[tokio::test]
#[serial]
async fn given_error_state_when_stopped_then_error_persists() {
    let previewer = previewer();
    let fixture = ProjectFixture::new();
    fixture.start(&previewer).await;

    previewer
        .update_xaml("<Window error-line=3 />", (0, 0))
        .await
        .expect("failing update");
    wait_until(SETTLE_LIMIT, "error reported", || previewer.error().is_some()).await;

    previewer.stop().await;

    assert!(previewer.error().is_some());

    // A fresh start clears it again
    fixture.start(&previewer).await;
    assert!(previewer.error().is_none());
    previewer.stop().await;
}

/// **VALUE**: Verifies a second `start` on a running previewer is
/// refused.
///
/// **BUG THIS CATCHES**: A double start would spawn a second host racing
/// the first for the same session.
#[tokio::test]
#[serial]
async fn given_running_previewer_when_started_again_then_invalid_operation() {
    let previewer = previewer();
    let fixture = ProjectFixture::new();
    fixture.start(&previewer).await;

    let error = previewer
        .start(
            &fixture.assembly_path,
            &fixture.executable_path,
            &fixture.host_app_path,
        )
        .await
        .unwrap_err();

    assert!(matches!(error, PreviewerError::InvalidOperation { .. }));
    previewer.stop().await;
}

/// **VALUE**: Verifies stop ends the session and the supervisor can start
/// a fresh one afterwards.
///
/// **WHY THIS MATTERS**: One supervisor instance lives as long as the
/// designer pane; it cycles through many previewer processes.
///
/// **BUG THIS CATCHES**: State left behind by stop (a registered
/// listener, a stale connection) would make every second session fail to
/// start.
#[tokio::test]
#[serial]
async fn given_stopped_previewer_when_started_again_then_new_session_works() {
    let previewer = previewer();
    let fixture = ProjectFixture::new();

    fixture.start(&previewer).await;
    previewer.stop().await;
    previewer.stop().await; // idempotent

    wait_until_async(SETTLE_LIMIT, "process to end", || async {
        !previewer.is_running().await
    })
    .await;
    assert!(!previewer.is_ready().await);

    fixture.start(&previewer).await;
    assert!(previewer.is_ready().await);

    previewer
        .update_xaml("<Window />", (0, 0))
        .await
        .expect("update in the second session");
    wait_until(SETTLE_LIMIT, "frame in the second session", || {
        previewer.preview_data().is_some()
    })
    .await;

    previewer.stop().await;
}

/// **VALUE**: Verifies an externally killed previewer is detected: exit
/// event raised, session torn down, later updates refused.
///
/// **WHY THIS MATTERS**: Previewer crashes are routine (bad user code
/// runs inside it). The designer recovers by observing the exit event
/// and restarting.
///
/// **BUG THIS CATCHES**: A supervisor that keeps reporting ready with a
/// dead child would hang every subsequent update.
#[tokio::test]
#[serial]
async fn given_killed_process_when_detected_then_exit_event_and_updates_refused() {
    let previewer = previewer();
    let events = EventCollector::attach(&previewer);
    let fixture = ProjectFixture::new();
    fixture.start(&previewer).await;

    let pid = previewer.process_id().await.expect("running pid");

    // WHEN: the previewer dies outside the supervisor's control
    std::process::Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .status()
        .expect("kill previewer process");

    // THEN: the exit is observed and the session is torn down
    wait_until(SETTLE_LIMIT, "process exit event", || {
        events.process_exits() >= 1
    })
    .await;
    wait_until_async(SETTLE_LIMIT, "running flag to clear", || async {
        !previewer.is_running().await
    })
    .await;

    let error = previewer.update_xaml("<Window />", (0, 0)).await.unwrap_err();
    assert!(matches!(error, PreviewerError::InvalidOperation { .. }));

    previewer.stop().await;
}

/// **VALUE**: Verifies the memory guard restarts the previewer before an
/// update when it exceeds its budget, transparently to the caller.
///
/// **WHY THIS MATTERS**: Long-running previewers accumulate memory from
/// repeatedly loading user assemblies; the guard is what keeps a day-long
/// design session from eating the machine.
///
/// **BUG THIS CATCHES**: A restart that loses the session paths, or one
/// that tears down the new process's state instead of the old one's.
#[tokio::test]
#[serial]
async fn given_memory_over_budget_when_updating_then_process_restarted_transparently() {
    init_test_logger();
    // GIVEN: a budget every real process exceeds immediately
    let previewer = PreviewerProcess::new(PreviewerOptions {
        max_process_memory_bytes: 1,
        ..test_options()
    });
    let events = EventCollector::attach(&previewer);
    let fixture = ProjectFixture::new();
    fixture.start(&previewer).await;

    let first_pid = previewer.process_id().await.expect("first pid");

    // WHEN: an update triggers the guard
    previewer
        .update_xaml("<Window />", (0, 0))
        .await
        .expect("update should survive the restart");

    // THEN: a different process serves the update
    let second_pid = previewer.process_id().await.expect("second pid");
    assert_ne!(first_pid, second_pid);
    assert!(previewer.is_ready().await);
    wait_until(SETTLE_LIMIT, "exit event from the old process", || {
        events.process_exits() >= 1
    })
    .await;

    wait_until(SETTLE_LIMIT, "frame from the restarted process", || {
        previewer
            .preview_data()
            .is_some_and(|data| data.image_file_name == "preview-1.png")
    })
    .await;

    previewer.stop().await;
}

/// **VALUE**: Verifies a host that dies before connecting fails `start`
/// with its exit code, and the supervisor recovers for the next session.
///
/// **WHY THIS MATTERS**: A broken host install exits instantly; `start`
/// must fail with the code rather than hang until its timeout.
///
/// **BUG THIS CATCHES**: A monitor that reaps the process without failing
/// the pending start would leave `start` waiting for its full timeout.
#[tokio::test]
#[serial]
async fn given_host_that_exits_when_starting_then_process_exited_error() {
    let previewer = previewer();
    let fixture = ProjectFixture::with_exiting_host(3);

    let error = previewer
        .start(
            &fixture.assembly_path,
            &fixture.executable_path,
            &fixture.host_app_path,
        )
        .await
        .unwrap_err();

    match error {
        PreviewerError::ProcessExited { exit_code, .. } => assert_eq!(exit_code, Some(3)),
        other => panic!("expected ProcessExited, got {other:?}"),
    }

    previewer.stop().await;

    // After stop, a working host starts fine
    let working = ProjectFixture::new();
    working.start(&previewer).await;
    previewer.stop().await;
}

/// **VALUE**: Verifies a host that never connects back fails `start` with
/// a timeout.
///
/// **WHY THIS MATTERS**: A hung host is indistinguishable from a slow one
/// except by the clock; without the timeout `start` blocks the designer
/// forever.
///
/// **BUG THIS CATCHES**: A handshake wait with no upper bound.
#[tokio::test]
#[serial]
async fn given_host_that_never_connects_when_starting_then_timeout() {
    init_test_logger();
    let previewer = PreviewerProcess::new(PreviewerOptions {
        handshake_timeout_secs: 1,
        ..PreviewerOptions::default()
    });
    let fixture = ProjectFixture::with_silent_host();

    let error = previewer
        .start(
            &fixture.assembly_path,
            &fixture.executable_path,
            &fixture.host_app_path,
        )
        .await
        .unwrap_err();

    assert!(matches!(error, PreviewerError::Timeout { .. }));

    previewer.stop().await;
}
