pub mod config;
pub mod previewer;
pub mod transport;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Previewer(#[from] previewer::PreviewerError),

    #[error(transparent)]
    Transport(#[from] transport::TransportError),
}
