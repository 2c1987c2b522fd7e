//! Duplex websocket transport to the voice service
//!
//! One `TransportChannel` per session. Outbound audio is written as binary
//! messages in capture order; inbound binary messages are surfaced as a
//! receiver of sequenced chunks that ends when the connection does.

mod channel;
mod target;

pub use channel::{ChannelState, InboundFrames, TransportChannel, TransportConfig};
pub use target::{AuthToken, SessionTarget};
