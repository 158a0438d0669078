//! Ingest core for live media servers
//!
//! This crate sits between protocol-specific ingest sessions (RTMP, MPEG-TS,
//! WebRTC, ...) and downstream consumers (muxers, transcoders, relays):
//!
//! - [`media`]: bitstream converters that normalize every track to one framing
//!   (Annex-B for H.264/H.265, ADTS for AAC) with a per-NAL fragmentation index
//! - [`sync`]: the multi-track jitter buffer that drains packets in global
//!   timestamp order
//! - [`channel`]: the concurrent table of live ingest channels, their bound
//!   streams, and the background reaper that tears down silent channels
//! - [`provider`]: one provider instance owning a channel table, its reaper and
//!   its applications
//!
//! ```text
//!  provider adapter ──► ChannelTable::on_data_received(channel_id, packet)
//!                            │
//!                            ▼
//!                     Stream::ingest ──► TrackNormalizer ──► SharedTrackSet
//!                                                                 │
//!  muxer / transcoder ◄────────────── pop_next() / recv_timeout() ┘
//! ```

pub mod bits;
pub mod channel;
pub mod error;
pub mod media;
pub mod provider;
pub mod stats;
pub mod sync;

pub use channel::{
    Application, Channel, ChannelConfig, ChannelError, ChannelTable, ReaperHandle, Stream,
    StreamKey,
};
pub use error::{Error, MediaError, Result};
pub use media::{
    BitstreamFormat, FragmentationIndex, MediaPacket, PacketType, Timebase, TrackInfo,
    TrackNormalizer,
};
pub use provider::Provider;
pub use sync::{JitterBuffer, SharedTrackSet, TrackSet};
