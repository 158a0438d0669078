//! Bit-level access to coded bitstreams
//!
//! Decoder configuration records and parameter sets are bit-packed. This module provides:
//! - [`BitReader`]: MSB-first reads over a plain byte slice
//! - [`NalUnitBitReader`]: the same reads over a NAL unit payload, skipping
//!   emulation-prevention bytes so field reads see the RBSP
//! - [`BitWriter`]: MSB-first packing for synthesized headers
//!
//! Reads past the end of the buffer fail with [`MediaError::Truncated`](crate::MediaError::Truncated).

pub mod nal_reader;
pub mod reader;
pub mod writer;

pub use nal_reader::NalUnitBitReader;
pub use reader::{BitReader, ReadBits};
pub use writer::BitWriter;
