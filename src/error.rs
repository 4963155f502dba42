//! Custom error types for the MoCo driver.
//!
//! This module defines the primary error type, `MocoError`, used by every layer
//! of the crate. Using the `thiserror` crate, it gives callers one consistent
//! type to match on, whether the failure came from the serial line, from the
//! instrument itself, or from a reply that could not be decoded.
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: the channel could not be opened (bad URL, missing device,
//!   unsupported scheme, serial support compiled out).
//! - **`Timeout`**: no complete reply line arrived within the read window.
//! - **`Io`**: the channel failed after it was opened. Wraps `std::io::Error`.
//! - **`Device`**: the MoCo itself reported a failure. `detail` carries the
//!   instrument's own error text as returned by `?ERR`.
//! - **`Format`**: a reply arrived but could not be parsed into the expected
//!   shape (float, pair of floats, framed multi-line block).
//! - **`Config`** / **`ConfigLoad`**: configuration validation and loading.
//!
//! The core never retries. Every variant is returned to the immediate caller,
//! which decides whether to retry, report, or give up.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type MocoResult<T> = std::result::Result<T, MocoError>;

/// Every failure the driver can surface.
#[derive(Error, Debug)]
pub enum MocoError {
    /// The connection endpoint could not be opened.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No reply line arrived before the read deadline.
    #[error("No reply from MoCo within {0:?}")]
    Timeout(Duration),

    /// The channel failed while reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The instrument rejected a command or query.
    #[error("MoCo error: {detail}")]
    Device {
        /// Error text reported by the instrument.
        detail: String,
    },

    /// A reply could not be decoded into the expected value shape.
    #[error("Unexpected reply to {verb}: {reason} (got '{reply}')")]
    Format {
        /// Verb whose reply was being decoded.
        verb: String,
        /// The stripped reply text.
        reply: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Configuration values failed validation.
    #[error("Configuration validation error: {0}")]
    Config(String),

    /// Configuration sources could not be loaded or deserialized.
    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] figment::Error),
}

impl MocoError {
    pub(crate) fn format(verb: &str, reply: &str, reason: impl Into<String>) -> Self {
        MocoError::Format {
            verb: verb.to_string(),
            reply: reply.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the failure happened below the protocol, i.e. the device
    /// never got a chance to answer (closed port, silence, broken link).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MocoError::Connection(_) | MocoError::Timeout(_) | MocoError::Io(_)
        )
    }

    /// The instrument's own error text, if this is a device-reported failure.
    pub fn device_detail(&self) -> Option<&str> {
        match self {
            MocoError::Device { detail } => Some(detail),
            _ => None,
        }
    }
}
