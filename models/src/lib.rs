//! Domain models for the UIXML previewer.
//!
//! This crate contains pure data structures representing the remote-preview
//! protocol. Models have no business logic - they're just data that can be
//! passed between layers.
//!
//! ## Architecture
//!
//! - **models** (this crate): Pure data structures
//! - **preview-core**: Transport and process supervision operating on models
//!
//! This layered architecture keeps concerns separated and makes testing easier.

pub mod exception_details;
pub mod messages;
pub mod pixel_format;
pub mod preview_data;

#[cfg(test)]
mod tests;

pub use exception_details::ExceptionDetails;
pub use messages::{InputModifier, Message, MouseButton};
pub use pixel_format::PixelFormat;
pub use preview_data::PreviewData;
