//! Streams: the normalizers and track set behind one published name

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, MediaError, Result};
use crate::media::{MediaPacket, TrackInfo, TrackNormalizer};
use crate::stats::StreamStats;
use crate::sync::SharedTrackSet;

/// Log one pre-config AAC drop per this many
const DROPPED_BEFORE_CONFIG_LOG_INTERVAL: u64 = 100;

/// Unique identifier for a stream (app + stream name)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    /// Application name (e.g., "live")
    pub app: String,
    /// Stream name (e.g., "cam1")
    pub name: String,
}

impl StreamKey {
    pub fn new(app: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.app, self.name)
    }
}

/// One published stream.
///
/// Packets go through the track's [`TrackNormalizer`] and land in the
/// [`SharedTrackSet`] that consumers drain.
#[derive(Debug)]
pub struct Stream {
    key: StreamKey,
    normalizers: Mutex<HashMap<u32, TrackNormalizer>>,
    tracks: Arc<SharedTrackSet>,
    stats: StreamStats,
}

impl Stream {
    pub fn new(key: StreamKey, tracks: impl IntoIterator<Item = TrackInfo>) -> Self {
        let stream = Self {
            key,
            normalizers: Mutex::new(HashMap::new()),
            tracks: Arc::new(SharedTrackSet::new()),
            stats: StreamStats::new(),
        };
        for info in tracks {
            stream.add_track(info);
        }
        stream
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    /// Declare a track. An existing track with the same id is reset.
    pub fn add_track(&self, info: TrackInfo) {
        let track_id = info.track_id;
        self.tracks.create_track(track_id, info.timebase);
        self.normalizers
            .lock()
            .insert(track_id, TrackNormalizer::new(info));
    }

    pub fn remove_track(&self, track_id: u32) -> bool {
        self.normalizers.lock().remove(&track_id);
        self.tracks.remove_track(track_id)
    }

    /// Track set consumers drain, in global timestamp order
    pub fn tracks(&self) -> &Arc<SharedTrackSet> {
        &self.tracks
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Normalize one packet and queue it on its track.
    ///
    /// Sequence headers are absorbed. Raw AAC frames that arrive before any
    /// AudioSpecificConfig are counted and dropped without failing. Every
    /// other conversion error is returned.
    pub fn ingest(&self, packet: MediaPacket) -> Result<()> {
        self.stats.record_in();
        let track_id = packet.track_id;

        let normalized = {
            let mut normalizers = self.normalizers.lock();
            let normalizer = normalizers
                .get_mut(&track_id)
                .ok_or(Error::UnknownTrack(track_id))?;
            normalizer.normalize(packet)
        };

        match normalized {
            Ok(Some(packet)) => {
                let keyframe = packet.keyframe;
                self.tracks.push(packet)?;
                self.stats.record_out(keyframe);
                Ok(())
            }
            Ok(None) => {
                tracing::debug!(stream = %self.key, track_id = track_id, "Sequence header applied");
                Ok(())
            }
            Err(MediaError::MissingConfig) => {
                let dropped = self.stats.record_dropped_before_config();
                if (dropped - 1) % DROPPED_BEFORE_CONFIG_LOG_INTERVAL == 0 {
                    tracing::warn!(
                        stream = %self.key,
                        track_id = track_id,
                        dropped = dropped,
                        "Dropping AAC frame received before its AudioSpecificConfig"
                    );
                }
                Ok(())
            }
            Err(e) => {
                self.stats.record_conversion_error();
                tracing::debug!(
                    stream = %self.key,
                    track_id = track_id,
                    error = %e,
                    "Packet conversion failed"
                );
                Err(e.into())
            }
        }
    }

    /// Wake consumers; no further packets will arrive
    pub fn close(&self) {
        self.tracks.close();
    }
}
