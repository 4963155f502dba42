//! Driver for the MoCo monochromator controller.
//!
//! The MoCo regulates a monochromator by steering a piezo against the ratio of
//! two beam intensity signals. It speaks an ASCII line protocol over a serial
//! port, which may also be exported over the network.
//!
//! - [`adapters`]: blocking transports (serial port, TCP tunnel, test mock)
//! - [`instrument`]: the protocol engine [`Moco`] and reply codecs
//! - [`config`]: TOML + environment configuration
//! - [`error`]: the crate-wide [`MocoError`]
//!
//! All calls block the calling thread until the instrument answers or the
//! read timeout elapses. Nothing is retried.

pub mod adapters;
pub mod config;
pub mod error;
pub mod instrument;

pub use config::MocoConfig;
pub use error::{MocoError, MocoResult};
pub use instrument::{BeamSignal, Moco, MultilineFraming, OscBeamSignals, Reply, Speed};
