use serde::{Deserialize, Serialize};

/// Pixel formats the designer can consume for preview frames.
///
/// Advertised to the previewer process in the handshake so it can pick a
/// format it is able to render into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb565,
    Rgba8888,
    Bgra8888,
}
