//! Domain model (channel references, messages, resolved ids).

pub mod channel;

pub use channel::{ChannelMessage, ChannelMessages, ChannelMeta, ChannelRef, ResolvedChannel};
