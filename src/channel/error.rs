//! Channel table error types

use super::stream::StreamKey;

/// Errors from channel table and application wiring
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// A channel with this id is already in the table
    #[error("channel {0} already exists")]
    DuplicateChannel(u32),

    /// No channel with this id is in the table
    #[error("unknown channel: {0}")]
    UnknownChannel(u32),

    /// The channel exists but has no stream bound yet
    #[error("channel {0} is not bound to a stream")]
    Unbound(u32),

    /// The stream is already attached to another channel, or the channel is
    /// already bound to this stream
    #[error("stream {0} is in use")]
    StreamInUse(StreamKey),

    #[error("unknown application: {0}")]
    UnknownApplication(String),

    /// The application is being torn down and accepts no new streams
    #[error("application closed: {0}")]
    ApplicationClosed(String),
}
