//! Stand-in previewer host used by the integration tests.
//!
//! Implements the process side of the protocol: connects back to the
//! endpoint given on the command line, consumes the handshake, answers
//! update requests with results and preview frames, and holds the next
//! frame until the previous one is acknowledged.
//!
//! Markup containing `error-line=<n>` is reported as a parse failure on
//! line `n`; everything else renders successfully.

use preview_core::error::transport::TransportError;
use preview_core::transport::codec;
use preview_core::{TRANSPORT_FLAG, TRANSPORT_SCHEME};

use common::ErrorLocation;

use models::{ExceptionDetails, Message, PreviewData};

use std::panic::Location;
use std::process::ExitCode;
use std::time::{Duration, SystemTime};

use backoff::{ExponentialBackoff, backoff::Backoff};
use fern::Dispatch;
use humantime::format_rfc3339;
use log::{LevelFilter, debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::time::sleep as TokioSleep;
use url::Url;

const CONNECT_MAX_ELAPSED: Duration = Duration::from_secs(20);

const ERROR_LINE_MARKER: &str = "error-line=";

#[tokio::main]
async fn main() -> ExitCode {
    initialize_logger();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            warn!("Host stub failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn initialize_logger() {
    // Stdout only; the supervisor captures it at debug level.
    let _ = Dispatch::new()
        .level(LevelFilter::Debug)
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{date} - {level}] {message}",
                date = format_rfc3339(SystemTime::now()),
                level = record.level(),
                message = message,
            ))
        })
        .chain(std::io::stdout())
        .apply();
}

async fn run() -> Result<(), TransportError> {
    let (endpoint, executable) = parse_arguments()?;

    info!("Host stub starting: endpoint={endpoint}, executable={executable}");

    let (host, port) = parse_endpoint(&endpoint)?;
    let stream = connect_with_retry(&host, port).await?;
    let (mut read_half, write_half) = stream.into_split();

    let mut session = StubSession::new(write_half);

    loop {
        match codec::read_frame(&mut read_half).await? {
            Some(message) => session.handle(message).await?,
            None => {
                info!("Designer closed the connection, shutting down");
                return Ok(());
            }
        }
    }
}

fn parse_arguments() -> Result<(String, String), TransportError> {
    let arguments: Vec<String> = std::env::args().skip(1).collect();

    let flag_index = arguments
        .iter()
        .position(|argument| argument == TRANSPORT_FLAG)
        .ok_or_else(|| TransportError::Framing {
            message: format!("Missing {TRANSPORT_FLAG} argument"),
            location: ErrorLocation::from(Location::caller()),
        })?;

    let endpoint = arguments
        .get(flag_index + 1)
        .cloned()
        .ok_or_else(|| TransportError::Framing {
            message: format!("{TRANSPORT_FLAG} given without an endpoint"),
            location: ErrorLocation::from(Location::caller()),
        })?;

    let executable = arguments
        .get(flag_index + 2)
        .cloned()
        .unwrap_or_default();

    Ok((endpoint, executable))
}

fn parse_endpoint(endpoint: &str) -> Result<(String, u16), TransportError> {
    let url = Url::parse(endpoint).map_err(|e| TransportError::Framing {
        message: format!("Invalid endpoint '{endpoint}': {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    if url.scheme() != TRANSPORT_SCHEME {
        return Err(TransportError::Framing {
            message: format!(
                "Unsupported endpoint scheme '{}', expected '{TRANSPORT_SCHEME}'",
                url.scheme()
            ),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    let host = url
        .host_str()
        .ok_or_else(|| TransportError::Framing {
            message: format!("Endpoint '{endpoint}' has no host"),
            location: ErrorLocation::from(Location::caller()),
        })?
        .to_string();

    let port = url.port().ok_or_else(|| TransportError::Framing {
        message: format!("Endpoint '{endpoint}' has no port"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    Ok((host, port))
}

async fn connect_with_retry(host: &str, port: u16) -> Result<TcpStream, TransportError> {
    let mut backoff = ExponentialBackoff {
        max_elapsed_time: Some(CONNECT_MAX_ELAPSED),
        ..Default::default()
    };

    debug!("Connecting to {host}:{port}");

    loop {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => {
                info!("Connected to {host}:{port}");
                return Ok(stream);
            }
            Err(e) => match backoff.next_backoff() {
                Some(duration) => {
                    debug!("Connect failed ({e}), retrying after {duration:?}");
                    TokioSleep(duration).await;
                }
                None => {
                    return Err(TransportError::Io {
                        message: format!(
                            "Could not connect to {host}:{port} within {CONNECT_MAX_ELAPSED:?}"
                        ),
                        location: ErrorLocation::from(Location::caller()),
                        source: e,
                    });
                }
            },
        }
    }
}

struct StubSession {
    writer: OwnedWriteHalf,
    next_sequence_id: u64,
    in_flight: Option<u64>,
    /// Frames produced while one was unacknowledged. Sent one per ack.
    queued_frames: u64,
}

impl StubSession {
    fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer,
            next_sequence_id: 1,
            in_flight: None,
            queued_frames: 0,
        }
    }

    async fn handle(&mut self, message: Message) -> Result<(), TransportError> {
        debug!("<= {}", message.tag());

        match message {
            Message::ClientSupportedPixelFormats { formats } => {
                info!("Designer supports pixel formats: {formats:?}");
            }
            Message::ClientRenderInfo { dpi_x, dpi_y } => {
                info!("Render info: dpi=({dpi_x}, {dpi_y})");
            }
            Message::UpdateXaml { xaml, .. } => {
                self.handle_update(&xaml).await?;
            }
            Message::PreviewDataReceived { sequence_id } => {
                self.handle_acknowledgment(sequence_id).await?;
            }
            other if other.is_input_event() => {
                info!("Input event: {}", other.tag());
            }
            other => {
                debug!("Ignoring {}", other.tag());
            }
        }

        Ok(())
    }

    async fn handle_update(&mut self, xaml: &str) -> Result<(), TransportError> {
        if let Some(line) = parse_error_line(xaml) {
            self.send(&Message::UpdateXamlResult {
                error: None,
                exception: Some(ExceptionDetails {
                    exception_type: Some("UixmlParseException".to_string()),
                    message: Some("Markup is invalid".to_string()),
                    stack_trace: Some(format!("at StubRenderer.Render() seq={}", self.next_sequence_id)),
                    uixml_line_number: Some(line),
                    uixml_line_position: Some(1),
                }),
            })
            .await?;
            return Ok(());
        }

        self.send(&Message::UpdateXamlResult {
            error: None,
            exception: None,
        })
        .await?;

        if self.in_flight.is_some() {
            // Frame slot occupied: wait for the ack before rendering more.
            self.queued_frames += 1;
            debug!("Frame slot busy, {} frame(s) queued", self.queued_frames);
        } else {
            self.send_frame().await?;
        }

        Ok(())
    }

    async fn handle_acknowledgment(&mut self, sequence_id: u64) -> Result<(), TransportError> {
        match self.in_flight {
            Some(expected) if expected == sequence_id => {
                self.in_flight = None;
            }
            Some(expected) => {
                warn!("Acknowledgment for frame {sequence_id}, expected {expected}");
                return Ok(());
            }
            None => {
                warn!("Unexpected acknowledgment for frame {sequence_id}");
                return Ok(());
            }
        }

        if self.queued_frames > 0 {
            self.queued_frames -= 1;
            self.send_frame().await?;
        }

        Ok(())
    }

    async fn send_frame(&mut self) -> Result<(), TransportError> {
        let sequence_id = self.next_sequence_id;
        self.next_sequence_id += 1;
        self.in_flight = Some(sequence_id);

        let frame = PreviewData::new(format!("preview-{sequence_id}.png"));
        self.send(&Message::PreviewData {
            sequence_id,
            image_file_name: frame.image_file_name,
        })
        .await
    }

    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        debug!("=> {}", message.tag());

        let frame = codec::encode_frame(message)?;
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| TransportError::Io {
                message: format!("Failed to write {} frame: {e}", message.tag()),
                location: ErrorLocation::from(Location::caller()),
                source: e,
            })?;
        self.writer.flush().await.map_err(|e| TransportError::Io {
            message: format!("Failed to flush {} frame: {e}", message.tag()),
            location: ErrorLocation::from(Location::caller()),
            source: e,
        })
    }
}

fn parse_error_line(xaml: &str) -> Option<i32> {
    let start = xaml.find(ERROR_LINE_MARKER)? + ERROR_LINE_MARKER.len();
    let digits: String = xaml[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
