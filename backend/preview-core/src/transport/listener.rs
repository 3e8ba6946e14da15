//! Loopback listener for the previewer's connect-back.

use crate::error::transport::TransportError;
use crate::transport::connection::{Connection, ConnectionEvent};

use common::ErrorLocation;

use std::net::{IpAddr, SocketAddr};
use std::panic::Location;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicBool;

use log::{debug, error, info};
use tokio::net::TcpListener;
use tokio::spawn as TokioSpawn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Accepts inbound previewer connections on a loopback port.
///
/// Only one connection is ever expected in practice; the accept loop still
/// keeps running so a failing callback cannot take the listener down. A
/// second connection, should one arrive, yields a second `Connection`
/// that the callback is free to orphan.
pub struct TransportListener {
    local_addr: SocketAddr,
    accept_task: StdMutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl TransportListener {
    /// Bind `address:port` and invoke `on_connected` for every accepted
    /// socket.
    ///
    /// Callback failures are logged and do not stop the accept loop.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the port cannot be bound.
    pub async fn listen<F, Fut>(
        address: IpAddr,
        port: u16,
        on_connected: F,
    ) -> Result<Self, TransportError>
    where
        F: Fn(Arc<Connection>, mpsc::Receiver<ConnectionEvent>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        let listener =
            TcpListener::bind((address, port))
                .await
                .map_err(|e| TransportError::Io {
                    message: format!("Failed to bind {address}:{port}: {e}"),
                    location: ErrorLocation::from(Location::caller()),
                    source: e,
                })?;

        let local_addr = listener.local_addr().map_err(|e| TransportError::Io {
            message: format!("Failed to read bound address: {e}"),
            location: ErrorLocation::from(Location::caller()),
            source: e,
        })?;

        info!("Transport listening on {local_addr}");

        let accept_task = TokioSpawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("Previewer connecting from {peer}");

                        match Connection::establish(stream) {
                            Ok((connection, events)) => {
                                if let Err(e) = on_connected(connection, events).await {
                                    error!("Connection callback failed: {e}");
                                }
                            }
                            Err(e) => error!("Failed to establish connection with {peer}: {e}"),
                        }
                    }
                    Err(e) => {
                        error!("Accept failed on {local_addr}: {e}");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            accept_task: StdMutex::new(Some(accept_task)),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting and release the bound port. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, std::sync::atomic::Ordering::AcqRel) {
            return;
        }

        if let Some(task) = self
            .accept_task
            .lock()
            .expect("accept task slot poisoned")
            .take()
        {
            task.abort();
        }

        debug!("Transport listener on {} disposed", self.local_addr);
    }
}

impl Drop for TransportListener {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Pick an ephemeral free TCP port by transiently binding it.
///
/// Best effort only: the port is released before the previewer is told to
/// connect to it, so another process can grab it in between. A lost race
/// surfaces as a bind error when the listener claims the port.
pub async fn free_tcp_port(address: IpAddr) -> Result<u16, TransportError> {
    let listener = TcpListener::bind((address, 0))
        .await
        .map_err(|e| TransportError::Io {
            message: format!("Failed to bind an ephemeral port on {address}: {e}"),
            location: ErrorLocation::from(Location::caller()),
            source: e,
        })?;

    let port = listener
        .local_addr()
        .map_err(|e| TransportError::Io {
            message: format!("Failed to read the ephemeral port: {e}"),
            location: ErrorLocation::from(Location::caller()),
            source: e,
        })?
        .port();

    drop(listener);
    Ok(port)
}
