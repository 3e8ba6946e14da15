//! The framed loopback message channel.
//!
//! One frame is `[length: u32 little-endian][payload: length bytes]`; the
//! payload is a self-describing tagged object (see [`codec`] for the
//! concrete encoding). The listener accepts the single expected inbound
//! connection from the previewer process and hands it over as a
//! [`connection::Connection`].

pub mod codec;
pub mod connection;
pub mod listener;

pub use connection::{Connection, ConnectionEvent};
pub use listener::{TransportListener, free_tcp_port};
