//! Media bitstream handling
//!
//! This module provides:
//! - The canonical packet and track types
//! - Annex-B / length-prefixed NAL framing conversion and emulation prevention
//! - H.264 and H.265 decoder configuration parsing
//! - AAC AudioSpecificConfig, ADTS synthesis/parsing and LATM to ADTS conversion
//! - Per-track normalization to one canonical framing

pub mod aac;
pub mod h264;
pub mod h265;
pub mod nal;
pub mod normalize;
pub mod packet;

pub use aac::{AacConverter, AdtsHeader, AudioSpecificConfig};
pub use h264::{AvcConfig, NaluType};
pub use h265::{H265NaluType, HevcConfig};
pub use normalize::TrackNormalizer;
pub use packet::{
    BitstreamFormat, Fragment, FragmentationIndex, MediaPacket, PacketType, Timebase, TrackInfo,
};
