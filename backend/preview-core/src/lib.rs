pub mod config;
pub mod error;
pub mod events;
pub mod previewer;
pub mod transport;

#[cfg(test)]
mod tests;

/// The previewer process always connects back over loopback.
pub const PREVIEWER_HOSTNAME: &str = "127.0.0.1";

/// Scheme of the transport endpoint passed to the previewer process.
pub const TRANSPORT_SCHEME: &str = "tcp-bson";

pub const TRANSPORT_ENDPOINT_PREFIX: &str =
    const_format::concatcp!(TRANSPORT_SCHEME, "://", PREVIEWER_HOSTNAME, ":");

/// Command-line flag carrying the transport endpoint to the host app.
pub const TRANSPORT_FLAG: &str = "--transport";

/// Host applications with this extension are run through the managed
/// runtime launcher instead of being executed directly.
pub const MANAGED_HOST_EXTENSION: &str = "dll";

/// Reference DPI; the render-info message carries `BASELINE_DPI * scaling`.
pub const BASELINE_DPI: f64 = 96.0;

/// The endpoint argument for a previewer listening port.
pub fn transport_endpoint(port: u16) -> String {
    format!("{TRANSPORT_ENDPOINT_PREFIX}{port}/")
}
