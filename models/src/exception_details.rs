//! Structured error information returned by the previewer process.

use serde::{Deserialize, Serialize};

/// Details of a rendering or UIXML-parse failure inside the previewer.
///
/// Delivered as data in an `UpdateXamlResultMessage`, never thrown: bad
/// markup is an expected, recoverable, user-facing condition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionDetails {
    #[serde(default)]
    pub exception_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub uixml_line_number: Option<i32>,
    #[serde(default)]
    pub uixml_line_position: Option<i32>,
}

impl ExceptionDetails {
    /// Wrap a plain error string into details with only `message` set.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// De-duplication equality: exception type, message and UIXML
    /// line/column. The stack trace is excluded so that the same error
    /// repeated across rapid update attempts never re-notifies just
    /// because frame addresses shifted.
    pub fn matches(&self, other: &ExceptionDetails) -> bool {
        self.exception_type == other.exception_type
            && self.message == other.message
            && self.uixml_line_number == other.uixml_line_number
            && self.uixml_line_position == other.uixml_line_position
    }
}
