//! Transport: the line-delimited connection channel over TCP.

pub mod channel;

pub use channel::{Channel, ChannelError, ChannelHandle, ChannelReader};
