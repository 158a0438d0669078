//! Per-track FIFOs and cross-track ordered draining

use std::collections::{BTreeMap, VecDeque};

use crate::error::{Error, Result};
use crate::media::{MediaPacket, Timebase};

/// FIFO of normalized packets for one track
#[derive(Debug)]
pub struct JitterBuffer {
    timebase: Timebase,
    queue: VecDeque<MediaPacket>,
}

impl JitterBuffer {
    pub fn new(timebase: Timebase) -> Self {
        Self {
            timebase,
            queue: VecDeque::new(),
        }
    }

    pub fn timebase(&self) -> Timebase {
        self.timebase
    }

    /// Append in arrival order
    pub fn push(&mut self, packet: MediaPacket) {
        self.queue.push_back(packet);
    }

    pub fn pop(&mut self) -> Option<MediaPacket> {
        self.queue.pop_front()
    }

    pub fn peek(&self) -> Option<&MediaPacket> {
        self.queue.front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// PTS of the head packet in microseconds, using the track's timebase.
    ///
    /// `None` when the buffer is empty. A head whose timestamp cannot be
    /// converted (zero denominator, overflow) reports `i64::MAX` so it sorts
    /// after every convertible head.
    pub fn next_pts_usec(&self) -> Option<i64> {
        self.queue
            .front()
            .map(|packet| self.timebase.to_usec(packet.pts).unwrap_or(i64::MAX))
    }
}

/// All tracks of one stream, keyed by track id
#[derive(Debug, Default)]
pub struct TrackSet {
    tracks: BTreeMap<u32, JitterBuffer>,
}

impl TrackSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a track. Re-creating an existing track resets its queue.
    pub fn create_track(&mut self, track_id: u32, timebase: Timebase) {
        if self
            .tracks
            .insert(track_id, JitterBuffer::new(timebase))
            .is_some()
        {
            tracing::debug!(track_id = track_id, "Track re-created, queue reset");
        }
    }

    pub fn remove_track(&mut self, track_id: u32) -> Option<JitterBuffer> {
        self.tracks.remove(&track_id)
    }

    pub fn track(&self, track_id: u32) -> Option<&JitterBuffer> {
        self.tracks.get(&track_id)
    }

    pub fn track_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.tracks.keys().copied()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Queue a packet on its track
    pub fn push(&mut self, packet: MediaPacket) -> Result<()> {
        let track_id = packet.track_id;
        let track = self
            .tracks
            .get_mut(&track_id)
            .ok_or(Error::UnknownTrack(track_id))?;
        track.push(packet);
        Ok(())
    }

    /// Every declared track has at least one packet queued.
    ///
    /// An empty set is never ready.
    pub fn all_ready(&self) -> bool {
        !self.tracks.is_empty() && self.tracks.values().all(|t| !t.is_empty())
    }

    /// Remove and return the head packet with the smallest PTS in
    /// microseconds across all tracks.
    ///
    /// Returns `None` unless every track has a packet queued. Ties go to the
    /// lowest track id.
    pub fn pop_next(&mut self) -> Option<MediaPacket> {
        if !self.all_ready() {
            return None;
        }

        let mut earliest: Option<(u32, i64)> = None;
        for (&track_id, track) in &self.tracks {
            let Some(pts_usec) = track.next_pts_usec() else {
                continue;
            };
            match earliest {
                Some((_, best)) if pts_usec >= best => {}
                _ => earliest = Some((track_id, pts_usec)),
            }
        }

        let (track_id, _) = earliest?;
        self.tracks.get_mut(&track_id)?.pop()
    }

    /// Ids of tracks with nothing queued
    pub fn starved_tracks(&self) -> Vec<u32> {
        self.tracks
            .iter()
            .filter(|(_, track)| track.is_empty())
            .map(|(&id, _)| id)
            .collect()
    }

    /// Total packets queued across all tracks
    pub fn queued(&self) -> usize {
        self.tracks.values().map(JitterBuffer::len).sum()
    }

    pub fn clear(&mut self) {
        self.tracks.values_mut().for_each(JitterBuffer::clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::BitstreamFormat;
    use bytes::Bytes;
    use tokio_test::{assert_err, assert_ok};

    const VIDEO: u32 = 1;
    const AUDIO: u32 = 2;

    fn packet(track_id: u32, pts: i64, timebase: Timebase) -> MediaPacket {
        MediaPacket::new(
            track_id,
            pts,
            pts,
            timebase,
            BitstreamFormat::Unknown,
            Bytes::new(),
        )
    }

    fn two_tracks() -> TrackSet {
        let mut set = TrackSet::new();
        set.create_track(VIDEO, Timebase::VIDEO_90K);
        set.create_track(AUDIO, Timebase::from_rate(48_000));
        set
    }

    #[test]
    fn test_next_pts_usec() {
        let mut buffer = JitterBuffer::new(Timebase::from_rate(48_000));
        assert_eq!(buffer.next_pts_usec(), None);
        buffer.push(packet(AUDIO, 24_000, Timebase::from_rate(48_000)));
        assert_eq!(buffer.next_pts_usec(), Some(500_000));
    }

    #[test]
    fn test_unusable_timebase_sorts_last() {
        let mut buffer = JitterBuffer::new(Timebase::new(1, 0));
        buffer.push(packet(VIDEO, 10, Timebase::new(1, 0)));
        assert_eq!(buffer.next_pts_usec(), Some(i64::MAX));
    }

    #[test]
    fn test_push_unknown_track_fails() {
        let mut set = two_tracks();
        let err = assert_err!(set.push(packet(9, 0, Timebase::VIDEO_90K)));
        assert!(matches!(err, Error::UnknownTrack(9)));
    }

    #[test]
    fn test_pop_next_orders_across_timebases() {
        let mut set = two_tracks();
        // Interleaved arrivals
        assert_ok!(set.push(packet(VIDEO, 0, Timebase::VIDEO_90K)));
        assert_ok!(set.push(packet(AUDIO, 0, Timebase::from_rate(48_000))));
        assert_ok!(set.push(packet(AUDIO, 24_000, Timebase::from_rate(48_000))));
        assert_ok!(set.push(packet(VIDEO, 90_000, Timebase::VIDEO_90K)));

        let first = set.pop_next().unwrap();
        assert_eq!((first.track_id, first.pts), (VIDEO, 0));

        let second = set.pop_next().unwrap();
        assert_eq!((second.track_id, second.pts), (AUDIO, 0));

        let third = set.pop_next().unwrap();
        assert_eq!((third.track_id, third.pts), (AUDIO, 24_000));

        // Audio is now empty, so the gate holds the last video packet back
        assert!(set.pop_next().is_none());
        assert_eq!(set.starved_tracks(), vec![AUDIO]);

        assert_ok!(set.push(packet(AUDIO, 96_000, Timebase::from_rate(48_000))));
        let fourth = set.pop_next().unwrap();
        assert_eq!((fourth.track_id, fourth.pts), (VIDEO, 90_000));
    }

    #[test]
    fn test_pop_next_waits_for_every_track() {
        let mut set = two_tracks();
        for pts in [0, 3000, 6000] {
            assert_ok!(set.push(packet(VIDEO, pts, Timebase::VIDEO_90K)));
        }
        assert!(!set.all_ready());
        assert!(set.pop_next().is_none());
        assert_eq!(set.queued(), 3);
        assert_eq!(set.starved_tracks(), vec![AUDIO]);
    }

    #[test]
    fn test_ties_go_to_lowest_track_id() {
        let mut set = TrackSet::new();
        set.create_track(7, Timebase::MILLIS);
        set.create_track(3, Timebase::MILLIS);
        assert_ok!(set.push(packet(7, 40, Timebase::MILLIS)));
        assert_ok!(set.push(packet(3, 40, Timebase::MILLIS)));

        assert_eq!(set.pop_next().unwrap().track_id, 3);
    }

    #[test]
    fn test_fifo_order_within_track_is_preserved() {
        let mut set = TrackSet::new();
        set.create_track(VIDEO, Timebase::VIDEO_90K);
        // Non-monotonic input is not reordered
        for pts in [3000, 0, 6000] {
            assert_ok!(set.push(packet(VIDEO, pts, Timebase::VIDEO_90K)));
        }
        let order: Vec<i64> = std::iter::from_fn(|| set.pop_next()).map(|p| p.pts).collect();
        assert_eq!(order, vec![3000, 0, 6000]);
    }

    #[test]
    fn test_recreate_track_resets_queue() {
        let mut set = two_tracks();
        assert_ok!(set.push(packet(VIDEO, 0, Timebase::VIDEO_90K)));
        set.create_track(VIDEO, Timebase::MILLIS);

        let track = set.track(VIDEO).unwrap();
        assert!(track.is_empty());
        assert_eq!(track.timebase(), Timebase::MILLIS);
        assert_eq!(set.track_count(), 2);
    }

    #[test]
    fn test_empty_set_is_never_ready() {
        let mut set = TrackSet::new();
        assert!(!set.all_ready());
        assert!(set.pop_next().is_none());
    }
}
