//! Shared library used by both binaries.
//!
//! This crate is the **public gateway** for all shared functionality:
//! the packet model, wire formats, FEC codecs, sample/frame model, and
//! process-level observability. Downstream crates should import through
//! the re-exports here and not drill into internal module structure.

mod cli;
mod observability;

pub mod endpoint;
pub mod fec;
pub mod io;
pub mod l16;
pub mod packet;
pub mod rtcp;
pub mod rtp;
pub mod sample;
pub mod units;

pub use cli::ColorWhen;
pub use endpoint::{Endpoint, Proto};
pub use fec::{BlockCodec, FecError, FecPayloadId, FecScheme};
pub use io::{DeviceState, Sink, Source};
pub use observability::{init_tracing, MetricsContext, MetricsServerConfig};
pub use packet::{packet_flags, Packet, PacketReader};
pub use sample::{frame_flags, Frame, FrameReader, Sample, SampleSpec};
