//! MoCo protocol engine and reply codecs.

pub mod moco;
pub mod reply;

pub use moco::Moco;
pub use reply::{BeamSignal, MultilineFraming, OscBeamSignals, Reply, Speed};
