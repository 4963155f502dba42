//! Transport adapters
//!
//! This module contains the blocking byte-level request/response primitives
//! the MoCo protocol engine is built on:
//! - [`SyncConnection`]: a real serial port or a TCP-tunneled serial port
//! - [`MockTransport`]: scripted replies for tests, with a log of every payload

pub mod mock_adapter;
pub mod serial_adapter;

pub use mock_adapter::{MockReply, MockTransport};
pub use serial_adapter::{ConnectionOptions, Endpoint, LineStream, SyncConnection};

use crate::error::MocoResult;
use std::time::Duration;

/// Blocking request/response channel to one instrument.
///
/// Every method writes the whole payload before reading. Returned lines still
/// carry their terminator; stripping is the protocol engine's job.
pub trait Transport {
    /// Write `data`, then block until exactly one line arrives.
    ///
    /// Fails with [`MocoError::Timeout`](crate::MocoError::Timeout) when no
    /// complete line arrives within [`Transport::read_timeout`].
    fn write_read_line(&mut self, data: &[u8]) -> MocoResult<Vec<u8>>;

    /// Write `data`, then collect every line the device sends in one burst.
    ///
    /// The first line may take up to [`Transport::read_timeout`]. After it,
    /// the burst ends when the channel stays silent for the transport's
    /// inter-line timeout. An empty vector means nothing arrived within the
    /// read timeout.
    fn write_read_lines(&mut self, data: &[u8]) -> MocoResult<Vec<Vec<u8>>>;

    /// Write `data` without reading anything back.
    fn write_raw(&mut self, data: &[u8]) -> MocoResult<()>;

    /// Window a single-line read waits before giving up.
    fn read_timeout(&self) -> Duration;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_read_line(&mut self, data: &[u8]) -> MocoResult<Vec<u8>> {
        (**self).write_read_line(data)
    }

    fn write_read_lines(&mut self, data: &[u8]) -> MocoResult<Vec<Vec<u8>>> {
        (**self).write_read_lines(data)
    }

    fn write_raw(&mut self, data: &[u8]) -> MocoResult<()> {
        (**self).write_raw(data)
    }

    fn read_timeout(&self) -> Duration {
        (**self).read_timeout()
    }
}

/// Printable form of a wire payload for log output (`\r`, `\n` escaped).
pub(crate) fn escape_bytes(data: &[u8]) -> String {
    data.escape_ascii().to_string()
}
