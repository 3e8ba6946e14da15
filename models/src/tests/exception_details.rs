// Unit tests for the error de-duplication equality.

use crate::ExceptionDetails;

fn sample() -> ExceptionDetails {
    ExceptionDetails {
        exception_type: Some("UixmlParseException".to_string()),
        message: Some("unexpected token".to_string()),
        stack_trace: Some("at Parse()".to_string()),
        uixml_line_number: Some(3),
        uixml_line_position: Some(9),
    }
}

/// **VALUE**: Verifies that `matches()` ignores the stack trace.
///
/// **WHY THIS MATTERS**: The same markup error repeated across rapid update
/// attempts carries varying stack traces; comparing them would re-raise the
/// error notification on every keystroke.
///
/// **BUG THIS CATCHES**: Would catch someone "fixing" matches() to compare
/// all fields, reintroducing notification storms.
#[test]
fn given_identical_errors_with_different_stack_traces_when_matched_then_equal() {
    // GIVEN: Two details differing only in stack trace
    let first = sample();
    let second = ExceptionDetails {
        stack_trace: Some("at Parse() in other frame".to_string()),
        ..sample()
    };

    // WHEN / THEN: They match for de-duplication purposes
    assert!(first.matches(&second));
    // ...but are structurally different
    assert_ne!(first, second);
}

/// **VALUE**: Verifies that a changed UIXML position defeats de-duplication.
///
/// **WHY THIS MATTERS**: Moving the error to a different line is a new
/// user-facing condition and must raise a fresh notification.
///
/// **BUG THIS CATCHES**: Would catch the line/column fields being dropped
/// from the comparison.
#[test]
fn given_error_at_different_line_when_matched_then_not_equal() {
    // GIVEN: The same error reported one line further down
    let first = sample();
    let second = ExceptionDetails {
        uixml_line_number: Some(4),
        ..sample()
    };

    // WHEN / THEN: De-duplication sees a different error
    assert!(!first.matches(&second));
}

/// **VALUE**: Verifies wrapping a plain error string.
///
/// **WHY THIS MATTERS**: Older previewer builds send `error` strings rather
/// than structured exceptions; the supervisor wraps them into minimal
/// details with just the message set.
///
/// **BUG THIS CATCHES**: Would catch `from_message` populating fields it
/// should leave absent.
#[test]
fn given_plain_error_string_when_wrapped_then_only_message_is_set() {
    // GIVEN / WHEN: Wrapping a bare string
    let details = ExceptionDetails::from_message("boom");

    // THEN: Only the message field is populated
    assert_eq!(details.message.as_deref(), Some("boom"));
    assert!(details.exception_type.is_none());
    assert!(details.stack_trace.is_none());
    assert!(details.uixml_line_number.is_none());
    assert!(details.uixml_line_position.is_none());
}
