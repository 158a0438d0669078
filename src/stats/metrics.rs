//! Counters for channels, streams and the channel table
//!
//! Counters are relaxed atomics updated on the ingest path; `snapshot()`
//! returns a plain copy for reporting.

use std::sync::atomic::{AtomicU64, Ordering};

fn bump(counter: &AtomicU64, by: u64) -> u64 {
    counter.fetch_add(by, Ordering::Relaxed) + by
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Per-channel statistics
#[derive(Debug, Default)]
pub struct ChannelStats {
    bytes_received: AtomicU64,
    packets_received: AtomicU64,
    /// Payloads the bound stream refused
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    pub bytes_received: u64,
    pub packets_received: u64,
    pub rejected: u64,
}

impl ChannelStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self, bytes: usize) {
        bump(&self.bytes_received, bytes as u64);
        bump(&self.packets_received, 1);
    }

    pub fn record_rejected(&self) {
        bump(&self.rejected, 1);
    }

    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            bytes_received: load(&self.bytes_received),
            packets_received: load(&self.packets_received),
            rejected: load(&self.rejected),
        }
    }
}

/// Per-stream statistics
#[derive(Debug, Default)]
pub struct StreamStats {
    packets_in: AtomicU64,
    packets_out: AtomicU64,
    keyframes: AtomicU64,
    conversion_errors: AtomicU64,
    dropped_before_config: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    /// Packets handed to the stream by its channel
    pub packets_in: u64,
    /// Packets pushed into the track set after normalization
    pub packets_out: u64,
    pub keyframes: u64,
    pub conversion_errors: u64,
    /// Raw AAC frames that arrived before any AudioSpecificConfig
    pub dropped_before_config: u64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_in(&self) {
        bump(&self.packets_in, 1);
    }

    pub fn record_out(&self, keyframe: bool) {
        bump(&self.packets_out, 1);
        if keyframe {
            bump(&self.keyframes, 1);
        }
    }

    pub fn record_conversion_error(&self) -> u64 {
        bump(&self.conversion_errors, 1)
    }

    /// Count one pre-config drop and return the running total
    pub fn record_dropped_before_config(&self) -> u64 {
        bump(&self.dropped_before_config, 1)
    }

    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            packets_in: load(&self.packets_in),
            packets_out: load(&self.packets_out),
            keyframes: load(&self.keyframes),
            conversion_errors: load(&self.conversion_errors),
            dropped_before_config: load(&self.dropped_before_config),
        }
    }
}

/// Channel table statistics
#[derive(Debug, Default)]
pub struct TableStats {
    created: AtomicU64,
    deleted: AtomicU64,
    reaped: AtomicU64,
    evicted: AtomicU64,
    unknown_channel_drops: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStatsSnapshot {
    pub created: u64,
    /// Every removal, including reaped and evicted channels
    pub deleted: u64,
    /// Removed by the reaper after a silence timeout
    pub reaped: u64,
    /// Removed because their application was deleted
    pub evicted: u64,
    pub unknown_channel_drops: u64,
}

impl TableStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_created(&self) {
        bump(&self.created, 1);
    }

    pub fn record_deleted(&self) {
        bump(&self.deleted, 1);
    }

    pub fn record_reaped(&self) {
        bump(&self.reaped, 1);
    }

    pub fn record_evicted(&self, count: usize) {
        bump(&self.evicted, count as u64);
    }

    /// Count one drop and return the running total
    pub fn record_unknown_channel(&self) -> u64 {
        bump(&self.unknown_channel_drops, 1)
    }

    pub fn snapshot(&self) -> TableStatsSnapshot {
        TableStatsSnapshot {
            created: load(&self.created),
            deleted: load(&self.deleted),
            reaped: load(&self.reaped),
            evicted: load(&self.evicted),
            unknown_channel_drops: load(&self.unknown_channel_drops),
        }
    }
}
