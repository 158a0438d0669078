//! Error types
//!
//! Converters and bit readers fail with [`MediaError`]. Everything above them
//! (track sets, channel table, provider) uses the crate-wide [`Error`].

use crate::channel::ChannelError;
use crate::media::BitstreamFormat;

/// Bitstream-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// Not enough bytes to complete a fixed-width or length-prefixed read.
    #[error("truncated bitstream")]
    Truncated,

    /// Malformed magic/sync word, declared length exceeding the buffer, or an
    /// inconsistent decoder configuration.
    #[error("invalid data: {0}")]
    InvalidData(&'static str),

    /// The operation is not implemented for this bitstream format.
    #[error("unsupported bitstream format: {0:?}")]
    UnsupportedFormat(BitstreamFormat),

    /// A raw AAC frame arrived before any AudioSpecificConfig for its track.
    #[error("no AudioSpecificConfig has been observed for this track")]
    MissingConfig,
}

/// Crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Media(#[from] MediaError),

    /// A packet referenced a track that was never created. This is a wiring
    /// bug between the provider and the application and is fatal to the stream.
    #[error("unknown track: {0}")]
    UnknownTrack(u32),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

pub type Result<T> = std::result::Result<T, Error>;
