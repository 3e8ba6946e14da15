//! The remote-preview protocol message set.
//!
//! Every unit of communication between the designer and the previewer
//! process is one [`Message`]. On the wire a message is encoded as a tagged
//! object: the tag is the protocol type name (string), fields are camelCase.
//! Tagging by name is what allows additive protocol evolution - an older
//! reader ignores fields it does not know and decodes tags it does not know
//! to [`Message::Unknown`].

use serde::{Deserialize, Serialize};

use crate::exception_details::ExceptionDetails;
use crate::pixel_format::PixelFormat;

/// Keyboard modifiers attached to a forwarded input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputModifier {
    Alt,
    Control,
    Shift,
    Windows,
}

/// Mouse button attached to a pointer press/release event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

/// One unit of protocol communication.
///
/// The designer-side supervisor sends `Client*`, `UpdateXaml`, the input
/// events and the preview acknowledgment; the previewer process sends
/// `UpdateXamlResult` and `PreviewData`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Sent once after the connection is accepted, before update traffic.
    #[serde(rename = "ClientSupportedPixelFormatsMessage", rename_all = "camelCase")]
    ClientSupportedPixelFormats { formats: Vec<PixelFormat> },

    /// Sent after the handshake and whenever the preview scaling changes.
    #[serde(rename = "ClientRenderInfoMessage", rename_all = "camelCase")]
    ClientRenderInfo { dpi_x: f64, dpi_y: f64 },

    /// One content update for the previewer to render.
    #[serde(rename = "UpdateXamlMessage", rename_all = "camelCase")]
    UpdateXaml {
        assembly_path: String,
        xaml: String,
        owner_window_x: i32,
        owner_window_y: i32,
    },

    /// Result of an update; `error` and `exception` are mutually exclusive
    /// in practice, both absent on success.
    #[serde(rename = "UpdateXamlResultMessage", rename_all = "camelCase")]
    UpdateXamlResult {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        exception: Option<ExceptionDetails>,
    },

    /// A rendered frame is available on disk under `image_file_name`.
    #[serde(rename = "PreviewDataMessage", rename_all = "camelCase")]
    PreviewData {
        sequence_id: u64,
        image_file_name: String,
    },

    /// Acknowledges a `PreviewData` frame so the previewer may recycle
    /// the frame slot.
    #[serde(rename = "PreviewDataReceivedMessage", rename_all = "camelCase")]
    PreviewDataReceived { sequence_id: u64 },

    #[serde(rename = "PointerMovedEventMessage", rename_all = "camelCase")]
    PointerMoved {
        modifiers: Vec<InputModifier>,
        x: f64,
        y: f64,
    },

    #[serde(rename = "PointerPressedEventMessage", rename_all = "camelCase")]
    PointerPressed {
        modifiers: Vec<InputModifier>,
        x: f64,
        y: f64,
        button: MouseButton,
    },

    #[serde(rename = "PointerReleasedEventMessage", rename_all = "camelCase")]
    PointerReleased {
        modifiers: Vec<InputModifier>,
        x: f64,
        y: f64,
        button: MouseButton,
    },

    #[serde(rename = "ScrollEventMessage", rename_all = "camelCase")]
    Scroll {
        modifiers: Vec<InputModifier>,
        x: f64,
        y: f64,
        delta_x: f64,
        delta_y: f64,
    },

    /// Any tag this build does not know. Decoded, never acted upon.
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Whether this message is a forwarded user-interaction event.
    ///
    /// Only these variants are accepted by the supervisor's `send_input`.
    pub fn is_input_event(&self) -> bool {
        matches!(
            self,
            Message::PointerMoved { .. }
                | Message::PointerPressed { .. }
                | Message::PointerReleased { .. }
                | Message::Scroll { .. }
        )
    }

    /// The wire tag of this message, for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            Message::ClientSupportedPixelFormats { .. } => "ClientSupportedPixelFormatsMessage",
            Message::ClientRenderInfo { .. } => "ClientRenderInfoMessage",
            Message::UpdateXaml { .. } => "UpdateXamlMessage",
            Message::UpdateXamlResult { .. } => "UpdateXamlResultMessage",
            Message::PreviewData { .. } => "PreviewDataMessage",
            Message::PreviewDataReceived { .. } => "PreviewDataReceivedMessage",
            Message::PointerMoved { .. } => "PointerMovedEventMessage",
            Message::PointerPressed { .. } => "PointerPressedEventMessage",
            Message::PointerReleased { .. } => "PointerReleasedEventMessage",
            Message::Scroll { .. } => "ScrollEventMessage",
            Message::Unknown => "Unknown",
        }
    }
}
