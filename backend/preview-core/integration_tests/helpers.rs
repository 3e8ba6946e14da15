//! Shared fixtures for the integration tests.
//!
//! Provides logger setup, project-file fixtures for the supervisor tests,
//! an event collector, and raw socket helpers for driving the transport
//! from the previewer's side of the wire.

use preview_core::config::PreviewerOptions;
use preview_core::previewer::{PreviewerEvent, PreviewerProcess};
use preview_core::transport::codec;

use models::Message;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Once};
use std::time::{Duration, Instant, SystemTime};

use fern::Dispatch;
use humantime::format_rfc3339;
use log::LevelFilter;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::sleep;

static INIT_LOGGER_ONCE: Once = Once::new();

/// Initialize a stdout test logger exactly once per test binary.
pub fn init_test_logger() {
    INIT_LOGGER_ONCE.call_once(|| {
        let _ = Dispatch::new()
            .level(LevelFilter::Debug)
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{date} - {level}] {message}",
                    date = format_rfc3339(SystemTime::now()),
                    level = record.level(),
                ))
            })
            .chain(std::io::stdout())
            .apply();
    });
}

/// Path of the stand-in previewer host built alongside this test binary.
pub fn host_stub_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_preview-host-stub"))
}

/// A throwaway project layout: an assembly and an executable that exist on
/// disk, plus the host stub standing in for the previewer host app.
pub struct ProjectFixture {
    pub assembly_path: PathBuf,
    pub executable_path: PathBuf,
    pub host_app_path: PathBuf,
    _dir: TempDir,
}

impl ProjectFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create fixture dir");
        let assembly_path = dir.path().join("app.dll");
        let executable_path = dir.path().join("app");
        std::fs::write(&assembly_path, b"assembly").expect("write assembly fixture");
        std::fs::write(&executable_path, b"executable").expect("write executable fixture");

        Self {
            assembly_path,
            executable_path,
            host_app_path: host_stub_path(),
            _dir: dir,
        }
    }

    /// A fixture whose host app is a script that stays alive but never
    /// connects back.
    pub fn with_silent_host() -> Self {
        let mut fixture = Self::new();
        let host = fixture._dir.path().join("silent-host.sh");
        std::fs::write(&host, "#!/bin/sh\nsleep 30\n").expect("write silent host");
        make_executable(&host);
        fixture.host_app_path = host;
        fixture
    }

    /// A fixture whose host app exits immediately with the given code.
    pub fn with_exiting_host(code: i32) -> Self {
        let mut fixture = Self::new();
        let host = fixture._dir.path().join("exiting-host.sh");
        std::fs::write(&host, format!("#!/bin/sh\nexit {code}\n")).expect("write exiting host");
        make_executable(&host);
        fixture.host_app_path = host;
        fixture
    }

    pub async fn start(&self, previewer: &PreviewerProcess) {
        previewer
            .start(
                &self.assembly_path,
                &self.executable_path,
                &self.host_app_path,
            )
            .await
            .expect("previewer should start against the host stub");
    }
}

fn make_executable(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = std::fs::metadata(path).expect("stat host script").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(path, permissions).expect("chmod host script");
}

/// Options tuned for tests: short handshake timeout, generous memory.
pub fn test_options() -> PreviewerOptions {
    PreviewerOptions {
        handshake_timeout_secs: 15,
        ..PreviewerOptions::default()
    }
}

/// Collects supervisor events for later assertions.
pub struct EventCollector {
    events: Arc<Mutex<Vec<PreviewerEvent>>>,
}

impl EventCollector {
    pub fn attach(previewer: &PreviewerProcess) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        // The token is dropped on purpose: handlers stay registered.
        let _ = previewer.subscribe(move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        Self { events }
    }

    pub fn snapshot(&self) -> Vec<PreviewerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn error_changes(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|event| matches!(event, PreviewerEvent::ErrorChanged(_)))
            .count()
    }

    pub fn process_exits(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|event| matches!(event, PreviewerEvent::ProcessExited { .. }))
            .count()
    }
}

/// Poll `condition` until it holds or `limit` elapses.
pub async fn wait_until<F>(limit: Duration, description: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out after {limit:?} waiting for: {description}");
}

/// Poll an async `condition` until it holds or `limit` elapses.
pub async fn wait_until_async<F, Fut>(limit: Duration, description: &str, condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition().await {
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out after {limit:?} waiting for: {description}");
}

/// Write one well-formed frame on a raw client socket.
pub async fn write_message(stream: &mut TcpStream, message: &Message) {
    let frame = codec::encode_frame(message).expect("encode test frame");
    stream.write_all(&frame).await.expect("write test frame");
    stream.flush().await.expect("flush test frame");
}

/// Write a frame whose declared length is honest but whose payload is not
/// decodable.
pub async fn write_garbage_frame(stream: &mut TcpStream) {
    let payload = b"this is not a message";
    let mut frame = (payload.len() as u32).to_le_bytes().to_vec();
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await.expect("write garbage frame");
    stream.flush().await.expect("flush garbage frame");
}

/// Write a frame prefix that promises more bytes than will ever arrive.
pub async fn write_truncated_frame(stream: &mut TcpStream) {
    let frame = 1024u32.to_le_bytes();
    stream
        .write_all(&frame)
        .await
        .expect("write truncated frame");
    stream.flush().await.expect("flush truncated frame");
}
