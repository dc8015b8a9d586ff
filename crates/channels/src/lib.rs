//! Channel abstractions — the unified send/receive surface between the
//! agent core and its chat peers (Discord, Telegram, the HTTP device
//! gateway).
//!
//! A **channel** is any transport over which [`InboundMessage`]s arrive and
//! [`OutboundMessage`]s leave. Concrete SDK adapters live outside the core;
//! they implement [`Channel`] and push inbound traffic into the
//! [`ChannelManager`]'s fan-in queue.

mod manager;
mod reply;
mod traits;

pub use manager::ChannelManager;
pub use reply::ReplyRouter;
pub use traits::{Channel, ChannelCapabilities, InboundMessage, OutboundMessage};
