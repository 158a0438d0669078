//! One live ingest connection

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use super::application::Application;
use super::error::ChannelError;
use super::stream::{Stream, StreamKey};
use super::traits::Timeoutable;
use crate::stats::ChannelStats;

/// Stream a channel publishes, and the application that owns it
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub(crate) application: Arc<Application>,
    pub(crate) stream: Arc<Stream>,
}

/// A network session delivering media, bound to at most one stream
#[derive(Debug)]
pub struct Channel {
    id: u32,
    created_at: Instant,
    binding: RwLock<Option<Binding>>,
    last_received_at: Mutex<Instant>,
    /// 0 disables reaping
    silence_timeout_ms: AtomicU32,
    /// Set when the creator chose the timeout; otherwise the table default applies
    custom_timeout: bool,
    stats: ChannelStats,
}

impl Channel {
    /// An unbound channel; bind it later with
    /// [`ChannelTable::bind_stream`](super::ChannelTable::bind_stream)
    pub fn new(id: u32) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            binding: RwLock::new(None),
            last_received_at: Mutex::new(now),
            silence_timeout_ms: AtomicU32::new(0),
            custom_timeout: false,
            stats: ChannelStats::new(),
        }
    }

    /// A channel already publishing `stream` into `application`
    pub fn bound(id: u32, application: Arc<Application>, stream: Arc<Stream>) -> Self {
        let channel = Self::new(id);
        *channel.binding.write() = Some(Binding {
            application,
            stream,
        });
        channel
    }

    /// Use this silence timeout instead of the table default
    pub fn with_silence_timeout(mut self, timeout_ms: u32) -> Self {
        self.silence_timeout_ms = AtomicU32::new(timeout_ms);
        self.custom_timeout = true;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    pub fn silence_timeout_ms(&self) -> u32 {
        self.silence_timeout_ms.load(Ordering::Relaxed)
    }

    pub fn set_silence_timeout(&self, timeout_ms: u32) {
        self.silence_timeout_ms.store(timeout_ms, Ordering::Relaxed);
    }

    pub(crate) fn has_custom_timeout(&self) -> bool {
        self.custom_timeout
    }

    /// Refresh liveness
    pub fn mark_received(&self) {
        *self.last_received_at.lock() = Instant::now();
    }

    pub fn stream(&self) -> Option<Arc<Stream>> {
        self.binding
            .read()
            .as_ref()
            .map(|binding| Arc::clone(&binding.stream))
    }

    pub fn application(&self) -> Option<Arc<Application>> {
        self.binding
            .read()
            .as_ref()
            .map(|binding| Arc::clone(&binding.application))
    }

    pub fn stream_key(&self) -> Option<StreamKey> {
        self.binding
            .read()
            .as_ref()
            .map(|binding| binding.stream.key().clone())
    }

    pub fn is_bound(&self) -> bool {
        self.binding.read().is_some()
    }

    pub fn belongs_to(&self, application: &Arc<Application>) -> bool {
        self.binding
            .read()
            .as_ref()
            .is_some_and(|binding| Arc::ptr_eq(&binding.application, application))
    }

    pub(crate) fn binding(&self) -> Option<Binding> {
        self.binding.read().clone()
    }

    /// Bind once; a bound channel keeps its stream
    pub(crate) fn bind(&self, binding: Binding) -> Result<(), ChannelError> {
        let mut slot = self.binding.write();
        if let Some(existing) = slot.as_ref() {
            return Err(ChannelError::StreamInUse(existing.stream.key().clone()));
        }
        *slot = Some(binding);
        Ok(())
    }

    pub(crate) fn unbind(&self) -> Option<Binding> {
        self.binding.write().take()
    }
}

impl Timeoutable for Channel {
    fn silence_timeout(&self) -> Option<Duration> {
        match self.silence_timeout_ms() {
            0 => None,
            ms => Some(Duration::from_millis(u64::from(ms))),
        }
    }

    fn last_received_at(&self) -> Instant {
        *self.last_received_at.lock()
    }

    fn on_timeout(&self) {
        let silence = Instant::now().saturating_duration_since(self.last_received_at());
        match self.stream_key() {
            Some(key) => tracing::warn!(
                channel_id = self.id,
                stream = %key,
                silence_ms = silence.as_millis() as u64,
                timeout_ms = self.silence_timeout_ms(),
                "Channel timed out"
            ),
            None => tracing::warn!(
                channel_id = self.id,
                silence_ms = silence.as_millis() as u64,
                timeout_ms = self.silence_timeout_ms(),
                "Unbound channel timed out"
            ),
        }
    }
}
