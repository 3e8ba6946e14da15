//! Shared plumbing for the UIXML previewer workspace.
//!
//! This crate contains infrastructure types that every other crate in the
//! workspace depends on. It must stay free of business logic so that
//! `models` and `preview-core` can both use it without cycles.

pub mod error;

pub use error::error_location::ErrorLocation;
