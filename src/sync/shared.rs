//! Track set shared between one producer and one consumer
//!
//! Producers push synchronously from the ingest path. Consumers either poll
//! with [`SharedTrackSet::try_pop`] or await the next ordered packet.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::Result;
use crate::media::{MediaPacket, Timebase};
use crate::sync::jitter::TrackSet;

#[derive(Debug, Default)]
pub struct SharedTrackSet {
    inner: Mutex<TrackSet>,
    ready: Notify,
    closed: AtomicBool,
}

impl SharedTrackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_track(&self, track_id: u32, timebase: Timebase) {
        self.inner.lock().create_track(track_id, timebase);
        // A new, possibly complete, set of heads
        self.ready.notify_one();
    }

    pub fn remove_track(&self, track_id: u32) -> bool {
        let removed = self.inner.lock().remove_track(track_id).is_some();
        if removed {
            self.ready.notify_one();
        }
        removed
    }

    pub fn push(&self, packet: MediaPacket) -> Result<()> {
        let ready = {
            let mut tracks = self.inner.lock();
            tracks.push(packet)?;
            tracks.all_ready()
        };
        if ready {
            self.ready.notify_one();
        }
        Ok(())
    }

    /// Pop the next packet in global order without waiting
    pub fn try_pop(&self) -> Option<MediaPacket> {
        self.inner.lock().pop_next()
    }

    /// Pop every packet that is currently releasable
    pub fn drain_ready(&self) -> Vec<MediaPacket> {
        let mut tracks = self.inner.lock();
        std::iter::from_fn(|| tracks.pop_next()).collect()
    }

    /// Wait for the next packet in global order.
    ///
    /// Returns `None` once the set is closed.
    pub async fn recv(&self) -> Option<MediaPacket> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(packet) = self.try_pop() {
                return Some(packet);
            }
            if self.is_closed() {
                return None;
            }

            notified.await;
        }
    }

    /// [`recv`](Self::recv) bounded by `timeout`.
    ///
    /// When the wait expires while some tracks are empty, the starved track
    /// ids are logged.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<MediaPacket> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(packet) => packet,
            Err(_) => {
                let starved = self.starved_tracks();
                if !starved.is_empty() {
                    tracing::warn!(
                        starved_tracks = ?starved,
                        waited_ms = timeout.as_millis() as u64,
                        "Track set stalled waiting on empty tracks"
                    );
                }
                None
            }
        }
    }

    pub fn starved_tracks(&self) -> Vec<u32> {
        self.inner.lock().starved_tracks()
    }

    pub fn queued(&self) -> usize {
        self.inner.lock().queued()
    }

    pub fn track_count(&self) -> usize {
        self.inner.lock().track_count()
    }

    /// Wake any waiting consumer and make further waits return `None`
    /// once the queues can no longer release a packet.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.ready.notify_waiters();
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
