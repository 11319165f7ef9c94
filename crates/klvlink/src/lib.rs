//! KLV telemetry and video frame transport over UDP.
//!
//! Facade over the workspace crates:
//!
//! - [`codec`]: BER lengths, local set items, packet assembly and the
//!   resynchronizing packet scanner.
//! - [`transport`]: connectionless datagram channels.
//! - [`session`]: sender and receiver loops, output sinks and offline
//!   extraction.

pub mod codec {
    pub use klvlink_codec::*;
}

pub mod transport {
    pub use klvlink_transport::*;
}

pub mod session {
    pub use klvlink_session::*;
}
