//! TCSI Protocol
//!
//! The proprietary request/response protocol spoken over the data link.
//!
//! Split into three parts:
//!
//! 1. **Codec** ([`packet`]): pure framing - construct, validate and probe
//!    TCSI frames. No I/O, no state.
//! 2. **Engine** ([`engine`]): one in-flight exchange at a time - packet-id
//!    sequencing, stale-response resync, liveness accounting.
//! 3. **Stats** ([`stats`]): counters and bounded error logs shared with
//!    the device layer.

pub mod engine;
pub mod packet;
pub mod stats;

pub use engine::ProtocolTcsi;
pub use packet::{Command, DeviceStatus, Packet};
pub use stats::{ErrorLog, Stats, StatsRecorder};
