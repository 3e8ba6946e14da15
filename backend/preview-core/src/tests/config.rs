// Unit tests for supervisor options
// Tests defaults, file round-trip, partial files, and validation

use crate::config::PreviewerOptions;
use crate::error::config::ConfigError;

use std::time::Duration;

use tempfile::tempdir;

/// **VALUE**: Verifies loading from a directory without an options file
/// yields the documented defaults.
///
/// **WHY THIS MATTERS**: Most installs never write an options file; the
/// defaults ARE the product configuration for them.
///
/// **BUG THIS CATCHES**: Treating a missing file as an error would break
/// first launch on every fresh machine.
#[test]
fn given_missing_file_when_load_then_returns_defaults() {
    let dir = tempdir().unwrap();

    let options = PreviewerOptions::load(dir.path()).unwrap();

    assert_eq!(options.max_process_memory_bytes, 200 * 1024 * 1024);
    assert_eq!(options.runtime_launcher, "dotnet");
    assert_eq!(options.handshake_timeout_secs, 60);
}

/// **VALUE**: Verifies saved options load back identically.
///
/// **WHY THIS MATTERS**: Save and load share one schema; drift between
/// them silently reverts user configuration.
///
/// **BUG THIS CATCHES**: A field renamed on one side only.
#[test]
fn given_saved_options_when_load_then_round_trips() {
    let dir = tempdir().unwrap();
    let options = PreviewerOptions {
        max_process_memory_bytes: 64 * 1024 * 1024,
        runtime_launcher: "mono".to_string(),
        handshake_timeout_secs: 5,
    };

    options.save(dir.path()).unwrap();
    let loaded = PreviewerOptions::load(dir.path()).unwrap();

    assert_eq!(loaded.max_process_memory_bytes, 64 * 1024 * 1024);
    assert_eq!(loaded.runtime_launcher, "mono");
    assert_eq!(loaded.handshake_timeout_secs, 5);
}

/// **VALUE**: Verifies a file with only some fields fills the rest with
/// defaults.
///
/// **WHY THIS MATTERS**: Options files written by an older build miss
/// fields added later; rejecting them would make every upgrade a
/// config-reset.
///
/// **BUG THIS CATCHES**: Dropping a `#[serde(default)]` when adding a
/// field.
#[test]
fn given_partial_file_when_load_then_missing_fields_default() {
    let dir = tempdir().unwrap();
    std::fs::write(
        dir.path().join("previewer.json"),
        r#"{"runtime_launcher": "mono"}"#,
    )
    .unwrap();

    let options = PreviewerOptions::load(dir.path()).unwrap();

    assert_eq!(options.runtime_launcher, "mono");
    assert_eq!(options.max_process_memory_bytes, 200 * 1024 * 1024);
}

/// **VALUE**: Verifies malformed JSON is a parse error, not a silent
/// fallback to defaults.
///
/// **WHY THIS MATTERS**: A user who hand-edited the file and broke it
/// should hear about it instead of wondering why their settings stopped
/// applying.
///
/// **BUG THIS CATCHES**: Swallowing parse failures into defaults.
#[test]
fn given_invalid_json_when_load_then_parse_error() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("previewer.json"), "not json {").unwrap();

    let error = PreviewerOptions::load(dir.path()).unwrap_err();

    assert!(matches!(error, ConfigError::ParseError { .. }));
}

/// **VALUE**: Verifies a zero memory budget fails validation.
///
/// **WHY THIS MATTERS**: Zero would restart the previewer on every single
/// update; the option exists to bound memory, not to disable previewing.
///
/// **BUG THIS CATCHES**: Loading such a file without validation would
/// produce a restart loop that looks like a previewer crash.
#[test]
fn given_zero_memory_budget_when_validate_then_validation_error() {
    let options = PreviewerOptions {
        max_process_memory_bytes: 0,
        ..PreviewerOptions::default()
    };

    let error = options.validate().unwrap_err();

    assert!(matches!(error, ConfigError::ValidationError { .. }));
}

/// **VALUE**: Verifies a blank runtime launcher fails validation.
///
/// **WHY THIS MATTERS**: Spawning an empty program name fails with an OS
/// error far from the real cause; validation names the actual problem.
///
/// **BUG THIS CATCHES**: An empty string sneaking through to `Command`.
#[test]
fn given_blank_launcher_when_validate_then_validation_error() {
    let options = PreviewerOptions {
        runtime_launcher: "   ".to_string(),
        ..PreviewerOptions::default()
    };

    let error = options.validate().unwrap_err();

    assert!(matches!(error, ConfigError::ValidationError { .. }));
}

/// **VALUE**: Verifies timeout 0 means wait-forever and a positive value
/// maps to that many seconds.
///
/// **WHY THIS MATTERS**: `start` picks between a bounded and an unbounded
/// wait on this; inverting the mapping would either hang forever by
/// default or time out instantly when the user opted out.
///
/// **BUG THIS CATCHES**: Treating 0 as a zero-length timeout.
#[test]
fn given_timeout_values_when_handshake_timeout_then_zero_means_forever() {
    let bounded = PreviewerOptions {
        handshake_timeout_secs: 5,
        ..PreviewerOptions::default()
    };
    let unbounded = PreviewerOptions {
        handshake_timeout_secs: 0,
        ..PreviewerOptions::default()
    };

    assert_eq!(bounded.handshake_timeout(), Some(Duration::from_secs(5)));
    assert_eq!(unbounded.handshake_timeout(), None);
}
