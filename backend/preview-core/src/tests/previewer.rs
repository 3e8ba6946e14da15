// Unit tests for supervisor argument and state validation
// Process-spawning paths are covered by the integration tests

use crate::error::previewer::PreviewerError;
use crate::previewer::PreviewerProcess;

use models::{ExceptionDetails, Message};

use std::path::Path;

use tempfile::tempdir;

/// **VALUE**: Verifies a blank assembly path is rejected as an argument
/// error before anything is spawned.
///
/// **WHY THIS MATTERS**: The designer calls `start` with paths it
/// computed from project state; a blank one means that computation broke
/// and must be surfaced as a caller bug, not a spawn failure.
///
/// **BUG THIS CATCHES**: Passing a blank path into the filesystem checks
/// would misreport it as file-not-found.
#[tokio::test]
async fn given_blank_assembly_path_when_start_then_argument_error() {
    let previewer = PreviewerProcess::default();

    let error = previewer
        .start(Path::new(""), Path::new("/tmp/app"), Path::new("/tmp/host"))
        .await
        .unwrap_err();

    assert!(matches!(error, PreviewerError::Argument { .. }));
}

/// **VALUE**: Verifies a path that does not exist fails with the
/// build-your-project guidance, naming the missing file.
///
/// **WHY THIS MATTERS**: The by-far most common start failure is an
/// unbuilt project; the message tells the user exactly what to do.
///
/// **BUG THIS CATCHES**: Letting the spawn fail instead would produce an
/// OS error about the host binary, pointing at the wrong file.
#[tokio::test]
async fn given_missing_executable_when_start_then_file_not_found() {
    let dir = tempdir().unwrap();
    let assembly = dir.path().join("app.dll");
    std::fs::write(&assembly, b"").unwrap();
    let missing = dir.path().join("does-not-exist.exe");

    let previewer = PreviewerProcess::default();
    let error = previewer
        .start(&assembly, &missing, &assembly)
        .await
        .unwrap_err();

    match error {
        PreviewerError::FileNotFound { path, .. } => assert_eq!(path, missing),
        other => panic!("expected FileNotFound, got {other:?}"),
    }
}

/// **VALUE**: Verifies an update before `start` is an invalid-operation
/// error.
///
/// **WHY THIS MATTERS**: Editor keystrokes can race ahead of the
/// previewer lifecycle; the supervisor must refuse cleanly rather than
/// panic or hang.
///
/// **BUG THIS CATCHES**: Dereferencing a connection that was never
/// created.
#[tokio::test]
async fn given_not_started_when_update_xaml_then_invalid_operation() {
    let previewer = PreviewerProcess::default();

    let error = previewer.update_xaml("<Window />", (0, 0)).await.unwrap_err();

    match error {
        PreviewerError::InvalidOperation { message, .. } => {
            assert_eq!(message, "Process not started.");
        }
        other => panic!("expected InvalidOperation, got {other:?}"),
    }
}

/// **VALUE**: Verifies `send_input` rejects non-input messages before any
/// readiness check.
///
/// **WHY THIS MATTERS**: The input path is the only one that forwards
/// caller-constructed messages verbatim; the gate is what keeps protocol
/// control messages out of it.
///
/// **BUG THIS CATCHES**: A widened gate that let an `UpdateXamlResult`
/// be sent backwards to the previewer.
#[tokio::test]
async fn given_non_input_message_when_send_input_then_argument_error() {
    let previewer = PreviewerProcess::default();

    let error = previewer
        .send_input(Message::UpdateXamlResult {
            error: None,
            exception: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(error, PreviewerError::Argument { .. }));
}

/// **VALUE**: Verifies `restart` without a prior `start` fails instead of
/// spawning with no paths.
///
/// **BUG THIS CATCHES**: A restart path that unwraps absent session
/// paths.
#[tokio::test]
async fn given_not_started_when_restart_then_invalid_operation() {
    let previewer = PreviewerProcess::default();

    let error = previewer.restart().await.unwrap_err();

    assert!(matches!(error, PreviewerError::InvalidOperation { .. }));
}

/// **VALUE**: Verifies scaling set before the previewer is ready is
/// stored for the next handshake rather than rejected.
///
/// **WHY THIS MATTERS**: The designer learns its monitor scaling before
/// it starts the previewer; the value must survive until a connection
/// exists to send it on.
///
/// **BUG THIS CATCHES**: Requiring readiness for `set_scaling` would
/// drop the initial scaling on every start.
#[tokio::test]
async fn given_not_ready_when_set_scaling_then_value_stored() {
    let previewer = PreviewerProcess::default();

    previewer.set_scaling(2.0).await.unwrap();

    assert_eq!(previewer.scaling(), 2.0);
}

/// **VALUE**: Verifies the initial observable state: not running, not
/// ready, no error, no preview data, scaling 1.0.
///
/// **BUG THIS CATCHES**: A constructor that pre-populates state the
/// protocol has not produced yet.
#[tokio::test]
async fn given_new_supervisor_when_inspected_then_state_is_empty() {
    let previewer = PreviewerProcess::default();

    assert!(!previewer.is_running().await);
    assert!(!previewer.is_ready().await);
    assert!(previewer.process_id().await.is_none());
    assert!(previewer.error().is_none());
    assert!(previewer.preview_data().is_none());
    assert_eq!(previewer.scaling(), 1.0);
}

/// **VALUE**: Verifies `stop` on a never-started supervisor is a no-op.
///
/// **WHY THIS MATTERS**: Shutdown paths call `stop` unconditionally.
///
/// **BUG THIS CATCHES**: A stop that assumes a process or listener
/// exists.
#[tokio::test]
async fn given_not_started_when_stop_then_no_effect() {
    let previewer = PreviewerProcess::default();

    previewer.stop().await;

    assert!(!previewer.is_running().await);
}

/// **VALUE**: Verifies subscription tokens detach their handler and only
/// theirs (wired through the supervisor surface).
///
/// **BUG THIS CATCHES**: The supervisor exposing a registry other than
/// the one it emits on.
#[tokio::test]
async fn given_subscription_when_unsubscribed_then_detached() {
    let previewer = PreviewerProcess::default();

    let subscription = previewer.subscribe(|_event| {});
    subscription.unsubscribe();
}

// ExceptionDetails equality is models territory, but the supervisor's
// de-duplication depends on it; pin the contract here too.

/// **VALUE**: Verifies the de-duplication equality ignores the stack
/// trace.
///
/// **WHY THIS MATTERS**: The same markup error re-reported on every
/// keystroke arrives with shifting stack addresses; notifying on each
/// would make the error panel flicker.
///
/// **BUG THIS CATCHES**: Using derived `PartialEq` for de-duplication.
#[test]
fn given_same_error_different_stack_when_matches_then_equal() {
    let first = ExceptionDetails {
        message: Some("Markup is invalid".to_string()),
        uixml_line_number: Some(3),
        stack_trace: Some("frame a".to_string()),
        ..ExceptionDetails::default()
    };
    let second = ExceptionDetails {
        stack_trace: Some("frame b".to_string()),
        ..first.clone()
    };

    assert!(first.matches(&second));
    assert_ne!(first, second);
}
