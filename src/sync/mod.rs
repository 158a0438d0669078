//! Multi-track synchronization
//!
//! Each track of a stream has its own FIFO ([`JitterBuffer`]). The
//! [`TrackSet`] releases a packet only when every track has one queued, and
//! then picks the head with the smallest presentation time:
//!
//! ```text
//!  track 1 (1/90000)  [A@0] [A@90000]          ┐
//!                                              ├─► pop_next: A@0, B@0, B@24000, A@90000
//!  track 2 (1/48000)  [B@0] [B@24000]          ┘
//! ```

pub mod jitter;
pub mod shared;

pub use jitter::{JitterBuffer, TrackSet};
pub use shared::SharedTrackSet;
