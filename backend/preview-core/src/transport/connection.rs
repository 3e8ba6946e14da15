//! One established message channel to the previewer process.
//!
//! A `Connection` owns its socket and its receive loop. Inbound traffic is
//! delivered through a bounded event queue in decode order, so a consumer
//! task observes messages exactly as they arrived and its failures stay
//! attributable (nothing is fired-and-forgotten). Outbound sends are
//! serialized behind a mutex on the write half - frames never interleave.

use crate::error::transport::TransportError;
use crate::transport::codec;

use common::ErrorLocation;

use models::Message;

use std::net::SocketAddr;
use std::panic::Location;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::spawn as TokioSpawn;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Inbound events, delivered in arrival order.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// One successfully decoded frame.
    Message(Message),
    /// A transport fault. Recoverable payload-decode faults leave the
    /// channel up; any other fault is the receive loop's last event.
    Exception(TransportError),
}

/// Capacity of the per-connection event queue.
const EVENT_QUEUE_CAPACITY: usize = 64;

pub struct Connection {
    peer: SocketAddr,
    writer: TokioMutex<OwnedWriteHalf>,
    receive_task: StdMutex<Option<JoinHandle<()>>>,
    faulted: Arc<AtomicBool>,
    disposed: AtomicBool,
}

impl Connection {
    /// Wrap an accepted socket and start its receive loop.
    ///
    /// The returned receiver is the connection's event stream; dropping it
    /// detaches the caller (the receive loop then stops).
    pub fn establish(
        stream: TcpStream,
    ) -> Result<(Arc<Self>, mpsc::Receiver<ConnectionEvent>), TransportError> {
        let peer = stream.peer_addr().map_err(|e| TransportError::Io {
            message: format!("Failed to resolve peer address: {e}"),
            location: ErrorLocation::from(Location::caller()),
            source: e,
        })?;

        let (read_half, write_half) = stream.into_split();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let faulted = Arc::new(AtomicBool::new(false));

        let receive_task = TokioSpawn(receive_loop(
            peer,
            read_half,
            events_tx,
            Arc::clone(&faulted),
        ));

        let connection = Arc::new(Self {
            peer,
            writer: TokioMutex::new(write_half),
            receive_task: StdMutex::new(Some(receive_task)),
            faulted,
            disposed: AtomicBool::new(false),
        });

        debug!("Connection established with {peer}");
        Ok((connection, events_rx))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether a transport fault has made this connection unusable.
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Encode `message` and write it as one frame.
    ///
    /// Concurrent callers are serialized; a completed send means the local
    /// write finished, not that the remote processed anything.
    ///
    /// # Errors
    ///
    /// Fails fast with [`TransportError::Closed`] after dispose and
    /// [`TransportError::Faulted`] after a transport fault; otherwise
    /// returns the underlying I/O error.
    pub async fn send(&self, message: &Message) -> Result<(), TransportError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TransportError::Closed {
                message: format!("Cannot send {}: connection disposed", message.tag()),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        if self.is_faulted() {
            return Err(TransportError::Faulted {
                message: format!(
                    "Cannot send {}: an earlier transport fault closed this channel",
                    message.tag()
                ),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let frame = codec::encode_frame(message)?;

        trace!("=> {} ({} bytes)", message.tag(), frame.len());

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&frame)
            .await
            .map_err(|e| TransportError::Io {
                message: format!("Failed to write {} frame: {e}", message.tag()),
                location: ErrorLocation::from(Location::caller()),
                source: e,
            })?;
        writer.flush().await.map_err(|e| TransportError::Io {
            message: format!("Failed to flush {} frame: {e}", message.tag()),
            location: ErrorLocation::from(Location::caller()),
            source: e,
        })
    }

    /// Stop the receive loop and release the socket. Idempotent.
    ///
    /// Event handlers attached to the event stream are NOT detached here;
    /// consumers drop their receiver themselves.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(task) = self
            .receive_task
            .lock()
            .expect("receive task slot poisoned")
            .take()
        {
            task.abort();
        }

        debug!("Connection with {} disposed", self.peer);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn receive_loop(
    peer: SocketAddr,
    mut read_half: OwnedReadHalf,
    events: mpsc::Sender<ConnectionEvent>,
    faulted: Arc<AtomicBool>,
) {
    loop {
        match codec::read_frame(&mut read_half).await {
            Ok(Some(message)) => {
                trace!("<= {} from {peer}", message.tag());
                if events.send(ConnectionEvent::Message(message)).await.is_err() {
                    debug!("Event consumer for {peer} detached, stopping receive loop");
                    break;
                }
            }
            Ok(None) => {
                debug!("Connection with {peer} closed by remote");
                break;
            }
            Err(error) if error.is_recoverable() => {
                // One bad frame must not kill the channel.
                warn!("Dropping undecodable frame from {peer}: {error}");
                if events
                    .send(ConnectionEvent::Exception(error))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Err(error) => {
                faulted.store(true, Ordering::Release);
                warn!("Transport fault on connection with {peer}: {error}");
                let _ = events.send(ConnectionEvent::Exception(error)).await;
                break;
            }
        }
    }
}
