//! The previewer process supervisor.
//!
//! Manages running a UIXML previewer process: launches the host
//! application, waits for it to connect back over the loopback transport,
//! performs the handshake, streams update/input messages, restarts the
//! process when it outgrows its memory budget, and surfaces structured
//! error state and process-exit notifications to registered observers.
//!
//! All inbound-message handling and observer invocation happens on one
//! pump task per connection, so observers see events in protocol order.
//! Observers needing a particular thread must redispatch themselves.

mod memory;

use crate::config::PreviewerOptions;
use crate::error::previewer::PreviewerError;
use crate::events::{EventRegistry, EventSubscription};
use crate::transport::{Connection, ConnectionEvent, TransportListener, free_tcp_port};
use crate::{BASELINE_DPI, MANAGED_HOST_EXTENSION, TRANSPORT_FLAG, transport_endpoint};

use common::ErrorLocation;

use models::{ExceptionDetails, Message, PixelFormat, PreviewData};

use std::net::{IpAddr, Ipv4Addr};
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::sync::{Arc, Weak};

use log::{debug, error, info, trace, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::spawn as TokioSpawn;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout as TokioTimeout;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

const NOT_STARTED_MESSAGE: &str = "Process not started.";
const NOT_READY_MESSAGE: &str = "Process not finished initializing.";

/// Notifications raised to registered observers.
///
/// Delivered on the supervisor's connection pump task (or on the process
/// monitor task for exits) - never on a caller's thread.
#[derive(Debug, Clone)]
pub enum PreviewerEvent {
    /// The error state changed; carries the new value.
    ErrorChanged(Option<ExceptionDetails>),
    /// The preview-data slot was set; carries the new value. Each frame
    /// produces two notifications: one clearing the slot, one with the new
    /// frame, so a repaint fires even when the file name repeats.
    PreviewDataReceived(Option<PreviewData>),
    /// The previewer process exited (crash, external kill, or restart).
    ProcessExited { exit_code: Option<i32> },
}

#[derive(Debug, Clone, Copy)]
struct ExitNotice {
    code: Option<i32>,
}

struct ProcessHandle {
    pid: u32,
    exit: watch::Receiver<Option<ExitNotice>>,
}

impl ProcessHandle {
    fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

#[derive(Default)]
struct SupervisorState {
    /// Bumped on every start; lets a stale process-exit notification
    /// recognize that a successor already owns the listener/connection.
    generation: u64,
    assembly_path: Option<PathBuf>,
    executable_path: Option<PathBuf>,
    host_app_path: Option<PathBuf>,
    listener: Option<TransportListener>,
    connection: Option<Arc<Connection>>,
    pump_task: Option<JoinHandle<()>>,
    process: Option<ProcessHandle>,
}

impl SupervisorState {
    fn is_running(&self) -> bool {
        self.process.as_ref().is_some_and(|p| !p.has_exited())
    }
}

type ReadySlot = Arc<StdMutex<Option<oneshot::Sender<Result<(), PreviewerError>>>>>;

struct PreviewerInner {
    options: PreviewerOptions,
    state: TokioMutex<SupervisorState>,
    scaling: StdMutex<f64>,
    error: StdMutex<Option<ExceptionDetails>>,
    preview_data: StdMutex<Option<PreviewData>>,
    events: EventRegistry<PreviewerEvent>,
}

/// Supervises one previewer process and its message channel.
pub struct PreviewerProcess {
    inner: Arc<PreviewerInner>,
}

impl PreviewerProcess {
    pub fn new(options: PreviewerOptions) -> Self {
        Self {
            inner: Arc::new(PreviewerInner {
                options,
                state: TokioMutex::new(SupervisorState::default()),
                scaling: StdMutex::new(1.0),
                error: StdMutex::new(None),
                preview_data: StdMutex::new(None),
                events: EventRegistry::new(),
            }),
        }
    }

    /// Register an observer; redeem the token to stop receiving events.
    pub fn subscribe<F>(&self, handler: F) -> EventSubscription<PreviewerEvent>
    where
        F: Fn(&PreviewerEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    /// Whether the previewer process is currently running.
    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.is_running()
    }

    /// Whether the previewer process is ready to receive messages.
    pub async fn is_ready(&self) -> bool {
        let state = self.inner.state.lock().await;
        state.is_running() && state.connection.is_some()
    }

    /// PID of the current previewer process, if one was started.
    pub async fn process_id(&self) -> Option<u32> {
        self.inner.state.lock().await.process.as_ref().map(|p| p.pid)
    }

    /// The current error state as returned from the previewer process.
    pub fn error(&self) -> Option<ExceptionDetails> {
        self.inner.error.lock().expect("error slot poisoned").clone()
    }

    /// The most recently received preview frame.
    pub fn preview_data(&self) -> Option<PreviewData> {
        self.inner
            .preview_data
            .lock()
            .expect("preview slot poisoned")
            .clone()
    }

    /// Scaling for the preview.
    pub fn scaling(&self) -> f64 {
        *self.inner.scaling.lock().expect("scaling slot poisoned")
    }

    /// Start the previewer process.
    ///
    /// Picks an ephemeral loopback port, starts the transport listener on
    /// it, launches the host application with the endpoint on its command
    /// line, and waits until the process connects back and the handshake
    /// (pixel formats + render info) completes.
    ///
    /// # Arguments
    ///
    /// * `assembly_path` - Assembly containing the UIXML being previewed
    /// * `executable_path` - The project executable to preview
    /// * `host_app_path` - The previewer host application; `.dll` hosts are
    ///   run through the configured runtime launcher
    ///
    /// # Errors
    ///
    /// * [`PreviewerError::InvalidOperation`] - already started
    /// * [`PreviewerError::Argument`] - a blank path
    /// * [`PreviewerError::FileNotFound`] - a path that does not exist
    /// * [`PreviewerError::Spawn`] - the host process could not be launched
    /// * [`PreviewerError::ProcessExited`] - the process exited before the
    ///   connection was initialized; carries the exit code
    /// * [`PreviewerError::Timeout`] - the process never connected back
    ///   within the configured handshake timeout
    pub async fn start(
        &self,
        assembly_path: &Path,
        executable_path: &Path,
        host_app_path: &Path,
    ) -> Result<(), PreviewerError> {
        debug!("Started PreviewerProcess::start()");

        let generation = {
            let mut state = self.inner.state.lock().await;

            if state.listener.is_some() {
                return Err(PreviewerError::InvalidOperation {
                    message: "Previewer process already started.".to_string(),
                    location: ErrorLocation::from(Location::caller()),
                });
            }

            validate_path_argument("Assembly path", assembly_path)?;
            validate_path_argument("Executable path", executable_path)?;
            validate_path_argument("Host application path", host_app_path)?;

            for path in [assembly_path, executable_path, host_app_path] {
                if !path.exists() {
                    return Err(PreviewerError::FileNotFound {
                        path: path.to_path_buf(),
                        location: ErrorLocation::from(Location::caller()),
                    });
                }
            }

            state.assembly_path = Some(assembly_path.to_path_buf());
            state.executable_path = Some(executable_path.to_path_buf());
            state.host_app_path = Some(host_app_path.to_path_buf());
            state.generation += 1;
            state.generation
        };

        self.inner.set_error(None);

        let port = free_tcp_port(LOOPBACK).await?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let ready_slot: ReadySlot = Arc::new(StdMutex::new(Some(ready_tx)));

        let callback_inner = Arc::clone(&self.inner);
        let callback_slot = Arc::clone(&ready_slot);
        let listener = TransportListener::listen(LOOPBACK, port, move |connection, events| {
            let inner = Arc::clone(&callback_inner);
            let slot = Arc::clone(&callback_slot);
            async move {
                let outcome = inner.connection_initialized(connection, events).await;
                if let Err(ref e) = outcome {
                    error!("Error initializing connection: {e}");
                }
                if let Some(tx) = slot.lock().expect("ready slot poisoned").take() {
                    let _ = tx.send(outcome);
                }
                Ok(())
            }
        })
        .await?;

        {
            let mut state = self.inner.state.lock().await;
            state.listener = Some(listener);
        }

        let endpoint = transport_endpoint(port);
        let is_managed = host_app_path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case(MANAGED_HOST_EXTENSION));

        let mut command = if is_managed {
            let mut command = TokioCommand::new(&self.inner.options.runtime_launcher);
            command.arg("exec").arg(host_app_path);
            command
        } else {
            TokioCommand::new(host_app_path)
        };
        command
            .arg(TRANSPORT_FLAG)
            .arg(&endpoint)
            .arg(executable_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(
            "Starting previewer process for '{}'",
            executable_path.display()
        );
        debug!("> {:?}", command.as_std());

        let mut child = command.spawn().map_err(|e| PreviewerError::Spawn {
            message: format!("Failed to spawn '{}': {e}", host_app_path.display()),
            location: ErrorLocation::from(Location::caller()),
            source: e,
        })?;

        let pid = child.id().unwrap_or_default();
        capture_process_output(&mut child);

        let (exit_tx, exit_rx) = watch::channel(None);

        {
            let mut state = self.inner.state.lock().await;
            state.process = Some(ProcessHandle { pid, exit: exit_rx });
        }

        TokioSpawn(monitor_process(
            child,
            pid,
            generation,
            Arc::downgrade(&self.inner),
            exit_tx,
            Arc::clone(&ready_slot),
        ));

        info!("Started previewer process (PID: {pid}). Waiting for connection to be initialized.");

        let ready = match self.inner.options.handshake_timeout() {
            Some(limit) => match TokioTimeout(limit, ready_rx).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(PreviewerError::Timeout {
                        message: format!(
                            "Previewer process did not connect back within {limit:?}"
                        ),
                        location: ErrorLocation::from(Location::caller()),
                    });
                }
            },
            None => ready_rx.await,
        };

        match ready {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(PreviewerError::InvalidOperation {
                    message: "Previewer start was aborted.".to_string(),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
        }

        debug!("Finished PreviewerProcess::start()");
        Ok(())
    }

    /// Stop the previewer process.
    ///
    /// Idempotent. Stops accepting, disposes the connection, and kills the
    /// process without waiting for graceful shutdown (failure to kill is
    /// swallowed - the process may have exited concurrently). The last
    /// error state stays visible until the next `start`.
    pub async fn stop(&self) {
        debug!("Started PreviewerProcess::stop()");
        info!("Stopping previewer process");

        let running_pid = {
            let mut state = self.inner.state.lock().await;
            PreviewerInner::teardown(&mut state);
            state
                .process
                .as_ref()
                .filter(|p| !p.has_exited())
                .map(|p| p.pid)
        };

        if let Some(pid) = running_pid {
            debug!("Killing previewer process {pid}");
            if !memory::kill_process(pid) {
                debug!("Failed to kill previewer process {pid}; it may have already exited");
            }
        }

        debug!("Finished PreviewerProcess::stop()");
    }

    /// Set the scaling for the preview.
    ///
    /// Stores the factor; if the previewer is ready the render-info message
    /// is sent immediately, otherwise the value applies at the next
    /// handshake.
    pub async fn set_scaling(&self, scaling: f64) -> Result<(), PreviewerError> {
        *self.inner.scaling.lock().expect("scaling slot poisoned") = scaling;

        if let Some(connection) = self.ready_connection().await {
            self.inner
                .send(&connection, &render_info_message(scaling))
                .await?;
        }

        Ok(())
    }

    /// Update the UIXML being previewed.
    ///
    /// Runs the memory guard first: if the previewer process has outgrown
    /// its budget it is restarted (stop + start, awaited) before the update
    /// is sent - transparent to the caller except for latency.
    ///
    /// # Errors
    ///
    /// [`PreviewerError::InvalidOperation`] when the process was never
    /// started or has not finished initializing; otherwise any restart or
    /// send failure. A send failure means the connection is broken and the
    /// caller should eventually `stop`.
    pub async fn update_xaml(
        &self,
        xaml: &str,
        owner_window_location: (i32, i32),
    ) -> Result<(), PreviewerError> {
        self.require_ready().await?;
        self.restart_if_max_memory_reached().await?;

        let (connection, assembly_path) = self.require_ready().await?;
        let (owner_window_x, owner_window_y) = owner_window_location;

        self.inner
            .send(
                &connection,
                &Message::UpdateXaml {
                    assembly_path: assembly_path.display().to_string(),
                    xaml: xaml.to_string(),
                    owner_window_x,
                    owner_window_y,
                },
            )
            .await
    }

    /// Forward an input event to the previewer process verbatim.
    ///
    /// # Errors
    ///
    /// [`PreviewerError::Argument`] when `message` is not an input event;
    /// readiness errors as for [`update_xaml`](Self::update_xaml). No
    /// memory-guard check on this path.
    pub async fn send_input(&self, message: Message) -> Result<(), PreviewerError> {
        if !message.is_input_event() {
            return Err(PreviewerError::Argument {
                message: format!("{} is not an input event message.", message.tag()),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let (connection, _) = self.require_ready().await?;
        self.inner.send(&connection, &message).await
    }

    /// Stop and start with the paths of the current session.
    pub async fn restart(&self) -> Result<(), PreviewerError> {
        let (assembly_path, executable_path, host_app_path) = {
            let state = self.inner.state.lock().await;
            match (
                state.assembly_path.clone(),
                state.executable_path.clone(),
                state.host_app_path.clone(),
            ) {
                (Some(a), Some(e), Some(h)) => (a, e, h),
                _ => {
                    return Err(PreviewerError::InvalidOperation {
                        message: NOT_STARTED_MESSAGE.to_string(),
                        location: ErrorLocation::from(Location::caller()),
                    });
                }
            }
        };

        self.stop().await;
        self.start(&assembly_path, &executable_path, &host_app_path)
            .await
    }

    async fn restart_if_max_memory_reached(&self) -> Result<(), PreviewerError> {
        let pid = {
            let state = self.inner.state.lock().await;
            state.process.as_ref().map(|p| p.pid)
        };

        let Some(pid) = pid else { return Ok(()) };

        // A vanished process is left for the send path to surface.
        let Some(memory_bytes) = memory::process_memory_bytes(pid) else {
            return Ok(());
        };

        if memory_bytes > self.inner.options.max_process_memory_bytes {
            info!(
                "Previewer process {pid} is using {memory_bytes} bytes \
                 (budget {}); restarting",
                self.inner.options.max_process_memory_bytes
            );
            self.restart().await?;
        }

        Ok(())
    }

    async fn ready_connection(&self) -> Option<Arc<Connection>> {
        let state = self.inner.state.lock().await;
        if state.is_running() {
            state.connection.clone()
        } else {
            None
        }
    }

    async fn require_ready(&self) -> Result<(Arc<Connection>, PathBuf), PreviewerError> {
        let state = self.inner.state.lock().await;

        if state.process.is_none() {
            return Err(PreviewerError::InvalidOperation {
                message: NOT_STARTED_MESSAGE.to_string(),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        match &state.connection {
            Some(connection) => Ok((
                Arc::clone(connection),
                state.assembly_path.clone().unwrap_or_default(),
            )),
            None => Err(PreviewerError::InvalidOperation {
                message: NOT_READY_MESSAGE.to_string(),
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }
}

impl Default for PreviewerProcess {
    fn default() -> Self {
        Self::new(PreviewerOptions::default())
    }
}

impl PreviewerInner {
    async fn connection_initialized(
        self: Arc<Self>,
        connection: Arc<Connection>,
        events: mpsc::Receiver<ConnectionEvent>,
    ) -> Result<(), PreviewerError> {
        debug!("Started connection_initialized()");
        info!("Connection initialized");

        {
            let mut state = self.state.lock().await;

            if !state.is_running() {
                warn!("Previewer process stopped before its connection initialized; dropping connection");
                return Ok(());
            }

            if state.connection.is_some() {
                warn!(
                    "Unexpected second previewer connection from {}; dropping it",
                    connection.peer()
                );
                return Ok(());
            }

            state.connection = Some(Arc::clone(&connection));
            state.pump_task = Some(TokioSpawn(message_pump(
                Arc::downgrade(&self),
                Arc::clone(&connection),
                events,
            )));
        }

        self.send(
            &connection,
            &Message::ClientSupportedPixelFormats {
                formats: vec![PixelFormat::Bgra8888, PixelFormat::Rgba8888],
            },
        )
        .await?;

        let scaling = *self.scaling.lock().expect("scaling slot poisoned");
        self.send(&connection, &render_info_message(scaling)).await?;

        debug!("Finished connection_initialized()");
        Ok(())
    }

    async fn send(
        &self,
        connection: &Connection,
        message: &Message,
    ) -> Result<(), PreviewerError> {
        debug!("=> Sending {}", message.tag());
        connection.send(message).await.map_err(PreviewerError::from)
    }

    async fn handle_message(&self, connection: &Connection, message: Message) {
        debug!("<= {}", message.tag());

        match message {
            Message::PreviewData {
                sequence_id,
                image_file_name,
            } => {
                // Clearing the slot first forces a change notification even
                // when the new frame reuses the previous file name.
                self.set_preview_data(None);
                self.set_preview_data(Some(PreviewData::new(image_file_name)));

                if let Err(e) = connection
                    .send(&Message::PreviewDataReceived { sequence_id })
                    .await
                {
                    error!("Failed to acknowledge preview frame {sequence_id}: {e}");
                }
            }
            Message::UpdateXamlResult { error, exception } => {
                let details = exception.or_else(|| {
                    error
                        .filter(|message| !message.trim().is_empty())
                        .map(ExceptionDetails::from_message)
                });

                if let Some(details) = &details {
                    warn!(
                        "Update failed: {:?} (line {:?}, position {:?})",
                        details.message, details.uixml_line_number, details.uixml_line_position
                    );
                }

                self.set_error(details);
            }
            other => trace!("Ignoring {}", other.tag()),
        }
    }

    /// Replace the error state, raising `ErrorChanged` only when the new
    /// value differs under the de-duplication equality.
    fn set_error(&self, details: Option<ExceptionDetails>) {
        let changed = {
            let mut slot = self.error.lock().expect("error slot poisoned");
            let same = match (&*slot, &details) {
                (None, None) => true,
                (Some(previous), Some(next)) => previous.matches(next),
                _ => false,
            };
            if same {
                false
            } else {
                *slot = details.clone();
                true
            }
        };

        if changed {
            self.events.emit(&PreviewerEvent::ErrorChanged(details));
        }
    }

    fn set_preview_data(&self, data: Option<PreviewData>) {
        *self.preview_data.lock().expect("preview slot poisoned") = data.clone();
        self.events.emit(&PreviewerEvent::PreviewDataReceived(data));
    }

    async fn cleanup_generation(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!("Skipping cleanup for superseded previewer generation {generation}");
            return;
        }
        Self::teardown(&mut state);
    }

    fn teardown(state: &mut SupervisorState) {
        if let Some(listener) = state.listener.take() {
            listener.dispose();
        }
        if let Some(pump_task) = state.pump_task.take() {
            pump_task.abort();
        }
        if let Some(connection) = state.connection.take() {
            connection.dispose();
        }
        state.executable_path = None;
        state.host_app_path = None;
    }
}

impl Drop for PreviewerInner {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_lock() {
            let running_pid = state
                .process
                .as_ref()
                .filter(|p| !p.has_exited())
                .map(|p| p.pid);

            Self::teardown(&mut state);

            if let Some(pid) = running_pid {
                let _ = memory::kill_process(pid);
            }
        }
    }
}

fn render_info_message(scaling: f64) -> Message {
    Message::ClientRenderInfo {
        dpi_x: BASELINE_DPI * scaling,
        dpi_y: BASELINE_DPI * scaling,
    }
}

#[track_caller]
fn validate_path_argument(name: &str, path: &Path) -> Result<(), PreviewerError> {
    if path.as_os_str().is_empty() || path.to_string_lossy().trim().is_empty() {
        return Err(PreviewerError::Argument {
            message: format!("{name} may not be empty."),
            location: ErrorLocation::from(Location::caller()),
        });
    }
    Ok(())
}

fn capture_process_output(child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        TokioSpawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    debug!("<= {line}");
                }
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        TokioSpawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    error!("<= {line}");
                }
            }
        });
    }
}

/// Waits for the child to exit, then publishes the exit, fails any pending
/// start, and - unless a successor generation already took over - tears
/// down listener/connection state and raises `ProcessExited`.
async fn monitor_process(
    mut child: Child,
    pid: u32,
    generation: u64,
    inner: Weak<PreviewerInner>,
    exit_tx: watch::Sender<Option<ExitNotice>>,
    ready_slot: ReadySlot,
) {
    let code = match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("Failed to wait on previewer process {pid}: {e}");
            None
        }
    };

    info!("Previewer process {pid} exited with code {code:?}");
    let _ = exit_tx.send(Some(ExitNotice { code }));

    if let Some(tx) = ready_slot.lock().expect("ready slot poisoned").take() {
        info!("Process exited while waiting for connection to be initialized.");
        let _ = tx.send(Err(PreviewerError::ProcessExited {
            exit_code: code,
            location: ErrorLocation::from(Location::caller()),
        }));
    }

    if let Some(inner) = inner.upgrade() {
        inner.cleanup_generation(generation).await;
        inner
            .events
            .emit(&PreviewerEvent::ProcessExited { exit_code: code });
    }
}

async fn message_pump(
    inner: Weak<PreviewerInner>,
    connection: Arc<Connection>,
    mut events: mpsc::Receiver<ConnectionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else { break };

        match event {
            ConnectionEvent::Message(message) => {
                inner.handle_message(&connection, message).await;
            }
            ConnectionEvent::Exception(error) => {
                // Logged only: restart policy stays with the memory guard
                // and explicit caller action. The connection marks itself
                // faulted, so later sends fail fast instead of hanging.
                error!("Connection error: {error}");
            }
        }
    }
}
