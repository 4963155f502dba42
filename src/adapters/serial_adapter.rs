//! Serial line adapter for the MoCo
//!
//! Opens the connection named by a URL and provides deadline-bounded line
//! reads on top of it. Two kinds of endpoints are understood:
//!
//! - a local serial device (`/dev/ttyUSB0`, `COM3`, or `serial:///dev/ttyUSB0`),
//!   opened with the `serialport` crate at 8N1 without flow control
//! - a serial port exported over the network (`socket://host:port`), reached
//!   with a plain TCP stream
//!
//! The connection is opened once and never reopened. A timeout or I/O error is
//! returned to the caller as-is.
//!
//! Input is never discarded. A reply that arrives after its exchange timed out
//! stays buffered and is read as the answer to the next exchange, so after a
//! [`MocoError::Timeout`] the caller cannot trust the next reply to match its
//! request. Reopening the connection is the way to resynchronise.

use super::{escape_bytes, Transport};
use crate::error::{MocoError, MocoResult};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Default read timeout, matching the instrument's documented response window.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Default baud rate for the MoCo serial interface.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Lower bound for a single blocking read; some streams reject a zero timeout.
const MIN_POLL: Duration = Duration::from_millis(1);

/// Byte stream that can block for a bounded time on read.
pub trait LineStream: Read + Write + Send {
    /// Bound how long the next `read` may block before failing with
    /// `TimedOut` or `WouldBlock`.
    fn set_poll_timeout(&mut self, timeout: Duration) -> io::Result<()>;
}

impl LineStream for TcpStream {
    fn set_poll_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(timeout.max(MIN_POLL)))
    }
}

#[cfg(feature = "instrument_serial")]
impl LineStream for Box<dyn serialport::SerialPort> {
    fn set_poll_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.set_timeout(timeout.max(MIN_POLL)).map_err(io::Error::from)
    }
}

/// Where a connection URL points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Local serial device path.
    Serial(String),
    /// `host:port` of a TCP serial tunnel.
    Socket(String),
}

impl Endpoint {
    /// Parse a connection URL.
    ///
    /// A string without a scheme is taken as a serial device path.
    pub fn parse(url: &str) -> MocoResult<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(MocoError::Connection("empty connection URL".to_string()));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Ok(Endpoint::Serial(url.to_string()));
        };

        match scheme.to_ascii_lowercase().as_str() {
            "serial" if !rest.is_empty() => Ok(Endpoint::Serial(rest.to_string())),
            "socket" => {
                let address = rest.trim_end_matches('/');
                match address.rsplit_once(':') {
                    Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                        Ok(Endpoint::Socket(address.to_string()))
                    }
                    _ => Err(MocoError::Connection(format!(
                        "socket URL '{}' must have the form socket://host:port",
                        url
                    ))),
                }
            }
            "serial" => Err(MocoError::Connection(format!(
                "serial URL '{}' has no device path",
                url
            ))),
            other => Err(MocoError::Connection(format!(
                "unsupported URL scheme '{}' in '{}'",
                other, url
            ))),
        }
    }
}

/// Options applied when opening a [`SyncConnection`].
///
/// Default configuration:
/// * timeout: 1.5 seconds
/// * burst_timeout: same as `timeout`
/// * baud_rate: 9600
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    /// Window for a single-line reply.
    pub timeout: Duration,
    /// Silence that ends a multi-line burst. `None` reuses `timeout`.
    pub burst_timeout: Option<Duration>,
    /// Serial baud rate; ignored for socket endpoints.
    pub baud_rate: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            burst_timeout: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl ConnectionOptions {
    /// Set the single-line read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the inter-line silence that ends a burst read
    pub fn with_burst_timeout(mut self, timeout: Duration) -> Self {
        self.burst_timeout = Some(timeout);
        self
    }

    /// Set the serial baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    fn effective_burst_timeout(&self) -> Duration {
        self.burst_timeout.unwrap_or(self.timeout)
    }
}

/// Blocking connection to one MoCo.
///
/// Bytes received past the end of a line stay buffered for the next exchange,
/// so a reply is never split or lost between calls. The same applies to a
/// late reply after a timeout, which then answers the wrong request.
pub struct SyncConnection {
    url: String,
    stream: Box<dyn LineStream>,
    timeout: Duration,
    burst_timeout: Duration,
    pending: Vec<u8>,
}

impl fmt::Debug for SyncConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConnection")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("burst_timeout", &self.burst_timeout)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl SyncConnection {
    /// Open the endpoint named by `url`.
    ///
    /// # Errors
    /// Returns [`MocoError::Connection`] if the URL is malformed or the
    /// endpoint cannot be opened.
    pub fn open(url: &str, options: &ConnectionOptions) -> MocoResult<Self> {
        let stream: Box<dyn LineStream> = match Endpoint::parse(url)? {
            Endpoint::Serial(path) => open_serial(&path, options)?,
            Endpoint::Socket(address) => Box::new(open_socket(&address, options)?),
        };

        info!(url, timeout = ?options.timeout, "MoCo connection opened");
        Ok(Self::from_stream(url, stream, options))
    }

    /// Wrap an already opened stream.
    pub fn from_stream(
        url: impl Into<String>,
        stream: Box<dyn LineStream>,
        options: &ConnectionOptions,
    ) -> Self {
        Self {
            url: url.into(),
            stream,
            timeout: options.timeout,
            burst_timeout: options.effective_burst_timeout(),
            pending: Vec::new(),
        }
    }

    /// URL this connection was opened with
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Silence that ends a multi-line burst
    pub fn burst_timeout(&self) -> Duration {
        self.burst_timeout
    }

    fn send(&mut self, data: &[u8]) -> MocoResult<()> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        debug!(url = %self.url, payload = %escape_bytes(data), "sent");
        Ok(())
    }

    /// Wait up to `wait` for more bytes. Returns how many arrived (0 on timeout).
    fn fill(&mut self, wait: Duration) -> MocoResult<usize> {
        let mut buf = [0u8; 256];
        self.stream.set_poll_timeout(wait)?;
        match self.stream.read(&mut buf) {
            Ok(0) => Err(MocoError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("connection to {} closed", self.url),
            ))),
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(MocoError::Io(e)),
        }
    }

    /// Pop one complete line (terminator included) off the receive buffer.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        Some(self.pending.drain(..=end).collect())
    }
}

impl Transport for SyncConnection {
    fn write_read_line(&mut self, data: &[u8]) -> MocoResult<Vec<u8>> {
        self.send(data)?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(line) = self.take_line() {
                debug!(url = %self.url, reply = %escape_bytes(&line), "received");
                return Ok(line);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(MocoError::Timeout(self.timeout));
            }
            self.fill(remaining)?;
        }
    }

    fn write_read_lines(&mut self, data: &[u8]) -> MocoResult<Vec<Vec<u8>>> {
        self.send(data)?;

        // The first line gets the full read window.
        let deadline = Instant::now() + self.timeout;
        let mut lines = Vec::new();
        while lines.is_empty() {
            if let Some(line) = self.take_line() {
                trace!(url = %self.url, line = %escape_bytes(&line), "burst line");
                lines.push(line);
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.fill(remaining)?;
        }

        // After that, the burst ends at the first silent gap.
        while !lines.is_empty() {
            while let Some(line) = self.take_line() {
                trace!(url = %self.url, line = %escape_bytes(&line), "burst line");
                lines.push(line);
            }
            match self.fill(self.burst_timeout) {
                Ok(0) => break,
                Ok(_) => {}
                Err(MocoError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!(url = %self.url, "connection closed during burst");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if !self.pending.is_empty() {
            lines.push(std::mem::take(&mut self.pending));
        }
        debug!(url = %self.url, count = lines.len(), "received burst");
        Ok(lines)
    }

    fn write_raw(&mut self, data: &[u8]) -> MocoResult<()> {
        self.send(data)
    }

    fn read_timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(feature = "instrument_serial")]
fn open_serial(path: &str, options: &ConnectionOptions) -> MocoResult<Box<dyn LineStream>> {
    let port = serialport::new(path, options.baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(options.timeout)
        .open()
        .map_err(|e| {
            MocoError::Connection(format!(
                "Failed to open serial port '{}' at {} baud: {}",
                path, options.baud_rate, e
            ))
        })?;

    Ok(Box::new(port))
}

#[cfg(not(feature = "instrument_serial"))]
fn open_serial(path: &str, _options: &ConnectionOptions) -> MocoResult<Box<dyn LineStream>> {
    Err(MocoError::Connection(format!(
        "Serial support not enabled, cannot open '{}'. Rebuild with --features instrument_serial",
        path
    )))
}

fn open_socket(address: &str, options: &ConnectionOptions) -> MocoResult<TcpStream> {
    let connect_error =
        |e: io::Error| MocoError::Connection(format!("Failed to connect to '{}': {}", address, e));

    let addrs = address.to_socket_addrs().map_err(connect_error)?;
    let mut last_error = io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, options.timeout) {
            Ok(stream) => {
                stream.set_nodelay(true).map_err(connect_error)?;
                return Ok(stream);
            }
            Err(e) => last_error = e,
        }
    }
    Err(connect_error(last_error))
}
