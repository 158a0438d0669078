//! Ingest statistics

pub mod metrics;

pub use metrics::{
    ChannelStats, ChannelStatsSnapshot, StreamStats, StreamStatsSnapshot, TableStats,
    TableStatsSnapshot,
};
