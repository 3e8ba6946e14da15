// Unit tests for the protocol message set's wire shape.
// Frame-level (length prefix) tests live in preview-core.

use crate::{ExceptionDetails, Message, PixelFormat};

use serde_json::{Value, json};

/// **VALUE**: Verifies that messages serialize under their protocol type
/// name with camelCase fields.
///
/// **WHY THIS MATTERS**: The wire tag and field names ARE the protocol.
/// A renamed Rust field or variant silently breaks every previewer build
/// on the other side of the socket.
///
/// **BUG THIS CATCHES**: Would catch someone removing a `#[serde(rename)]`
/// attribute or letting a field fall back to snake_case.
#[test]
fn given_update_xaml_message_when_serialized_then_uses_protocol_tag_and_camel_case_fields() {
    // GIVEN: An update message with distinguishable owner-window coordinates
    let message = Message::UpdateXaml {
        assembly_path: "/tmp/app.dll".to_string(),
        xaml: "<Window/>".to_string(),
        owner_window_x: 10,
        owner_window_y: 20,
    };

    // WHEN: Serializing to the wire object
    let value: Value = serde_json::to_value(&message).expect("serializes");

    // THEN: Tag and field names match the protocol
    assert_eq!(value["type"], "UpdateXamlMessage");
    assert_eq!(value["assemblyPath"], "/tmp/app.dll");
    assert_eq!(value["ownerWindowX"], 10);
    assert_eq!(value["ownerWindowY"], 20);
}

/// **VALUE**: Round-trips every variant the supervisor sends or receives.
///
/// **WHY THIS MATTERS**: The supervisor and the previewer process are built
/// from the same message definitions; a variant that does not survive
/// encode/decode corrupts the protocol in a way only visible at runtime.
///
/// **BUG THIS CATCHES**: Would catch a field marked skip/rename in one
/// direction only, or an Option losing its value through defaults.
#[test]
fn given_each_protocol_variant_when_round_tripped_then_decodes_field_for_field() {
    // GIVEN: One instance of each variant used by the core protocol
    let messages = vec![
        Message::ClientSupportedPixelFormats {
            formats: vec![PixelFormat::Bgra8888, PixelFormat::Rgba8888],
        },
        Message::ClientRenderInfo {
            dpi_x: 144.0,
            dpi_y: 144.0,
        },
        Message::UpdateXaml {
            assembly_path: "a.dll".to_string(),
            xaml: "<Border/>".to_string(),
            owner_window_x: -3,
            owner_window_y: 7,
        },
        Message::UpdateXamlResult {
            error: Some("boom".to_string()),
            exception: None,
        },
        Message::UpdateXamlResult {
            error: None,
            exception: Some(ExceptionDetails {
                exception_type: Some("UixmlParseException".to_string()),
                message: Some("unexpected token".to_string()),
                stack_trace: Some("at Parse()".to_string()),
                uixml_line_number: Some(12),
                uixml_line_position: Some(4),
            }),
        },
        Message::PreviewData {
            sequence_id: 7,
            image_file_name: "f.png".to_string(),
        },
        Message::PreviewDataReceived { sequence_id: 7 },
    ];

    for message in messages {
        // WHEN: Encoding and decoding
        let bytes = serde_json::to_vec(&message).expect("encodes");
        let decoded: Message = serde_json::from_slice(&bytes).expect("decodes");

        // THEN: The decoded value equals the original field-for-field
        assert_eq!(decoded, message);
    }
}

/// **VALUE**: Proves forward compatibility with payloads carrying fields
/// this build does not know.
///
/// **WHY THIS MATTERS**: The protocol evolves additively; a newer previewer
/// process may send extra fields. Rejecting them would break every mixed
/// version pairing.
///
/// **BUG THIS CATCHES**: Would catch a `deny_unknown_fields` attribute (or
/// a serializer switch) sneaking into the message definitions.
#[test]
fn given_payload_with_unknown_fields_when_decoded_then_known_variant_ignores_extras() {
    // GIVEN: A preview-data payload with extra unrecognized fields
    let payload = json!({
        "type": "PreviewDataMessage",
        "sequenceId": 42,
        "imageFileName": "frame.png",
        "colorSpace": "sRGB",
        "futureFlag": true,
    });

    // WHEN: Decoding
    let decoded: Message = serde_json::from_value(payload).expect("decodes");

    // THEN: The known fields arrive, extras are dropped
    assert_eq!(
        decoded,
        Message::PreviewData {
            sequence_id: 42,
            image_file_name: "frame.png".to_string(),
        }
    );
}

/// **VALUE**: Proves an unrecognized message tag decodes to `Unknown`
/// instead of failing the frame.
///
/// **WHY THIS MATTERS**: One unknown message from a newer peer must not be
/// treated as a protocol error; the supervisor ignores it and the channel
/// stays up.
///
/// **BUG THIS CATCHES**: Would catch removal of the `#[serde(other)]`
/// catch-all variant.
#[test]
fn given_unrecognized_tag_when_decoded_then_yields_unknown_variant() {
    // GIVEN: A payload whose tag no current variant matches
    let payload = json!({ "type": "HolographicFrameMessage", "depth": 3 });

    // WHEN: Decoding
    let decoded: Message = serde_json::from_value(payload).expect("decodes");

    // THEN: It is the ignorable Unknown variant
    assert_eq!(decoded, Message::Unknown);
    assert!(!decoded.is_input_event());
}

/// **VALUE**: Verifies optional result fields default to absent.
///
/// **WHY THIS MATTERS**: A success result carries neither `error` nor
/// `exception`; older previewer builds omit the keys entirely rather than
/// sending nulls.
///
/// **BUG THIS CATCHES**: Would catch a missing `#[serde(default)]` turning
/// a clean success result into a decode failure.
#[test]
fn given_result_without_optional_fields_when_decoded_then_fields_are_none() {
    // GIVEN: A minimal success result
    let payload = json!({ "type": "UpdateXamlResultMessage" });

    // WHEN: Decoding
    let decoded: Message = serde_json::from_value(payload).expect("decodes");

    // THEN: Both optional fields are absent
    assert_eq!(
        decoded,
        Message::UpdateXamlResult {
            error: None,
            exception: None,
        }
    );
}

/// **VALUE**: Verifies the input-event gate admits exactly the
/// user-interaction variants.
///
/// **WHY THIS MATTERS**: `send_input` forwards messages verbatim; the gate
/// is the only thing stopping a caller from pushing protocol-control
/// messages through the input path.
///
/// **BUG THIS CATCHES**: Would catch a new input variant forgotten in
/// `is_input_event`, which would make the supervisor reject it.
#[test]
fn given_message_variants_when_checked_for_input_then_only_interaction_events_qualify() {
    // GIVEN: An input event and a control message
    let moved = Message::PointerMoved {
        modifiers: vec![],
        x: 1.0,
        y: 2.0,
    };
    let control = Message::PreviewDataReceived { sequence_id: 1 };

    // WHEN / THEN: Only the pointer event passes the gate
    assert!(moved.is_input_event());
    assert!(!control.is_input_event());
}
