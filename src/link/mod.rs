//! Remote axis link: wire codec and transport channel.
//!
//! The rig controller exchanges plain-text datagrams with this client. One
//! incoming datagram carries a batch of axis state reports, `:`-separated;
//! each outgoing datagram carries the setpoint feedback for a single axis.
//! The transport itself is an opaque send/receive-string channel — datagram
//! oriented, unordered, lossy — so the codec and the sync engine never touch
//! sockets directly.
//!
//! ```text
//! link/
//! ├── codec.rs     - report batch decoding, feedback encoding
//! └── transport.rs - AxisLink trait, UDP implementation, loopback for tests
//! ```

pub mod codec;
pub mod transport;

pub use codec::{decode_batch, encode_feedback, AxisReading, DecodeError};
pub use transport::{AxisLink, LinkConfig, LinkError, MemoryLink, UdpAxisLink};
