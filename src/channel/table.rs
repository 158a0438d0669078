//! Channel table implementation
//!
//! The table lock guards only the id → channel map. It is released before
//! any call into application or stream code.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::Instant;

use super::application::Application;
use super::config::ChannelConfig;
use super::entry::{Binding, Channel};
use super::error::ChannelError;
use super::reaper::{self, ReaperHandle};
use super::stream::Stream;
use super::traits::{Attachable, Timeoutable};
use crate::error::Result;
use crate::media::{MediaPacket, TrackInfo};
use crate::stats::TableStats;

/// Called with each timed-out channel before it is removed
pub type TimeoutHook = Arc<dyn Fn(&Channel) + Send + Sync>;

/// Concurrent table of live ingest channels
///
/// Many ingest paths look channels up concurrently; creation and deletion
/// take the write lock.
pub struct ChannelTable {
    channels: RwLock<HashMap<u32, Arc<Channel>>>,
    config: ChannelConfig,
    stats: TableStats,
    timeout_hook: RwLock<Option<TimeoutHook>>,
}

impl ChannelTable {
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    pub fn with_config(config: ChannelConfig) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            config,
            stats: TableStats::new(),
            timeout_hook: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn stats(&self) -> &TableStats {
        &self.stats
    }

    /// Install the hook the reaper calls for every timed-out channel
    pub fn set_timeout_hook(&self, hook: impl Fn(&Channel) + Send + Sync + 'static) {
        *self.timeout_hook.write() = Some(Arc::new(hook));
    }

    pub fn get(&self, channel_id: u32) -> Option<Arc<Channel>> {
        self.channels.read().get(&channel_id).cloned()
    }

    pub fn contains(&self, channel_id: u32) -> bool {
        self.channels.read().contains_key(&channel_id)
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    pub fn channel_ids(&self) -> Vec<u32> {
        self.channels.read().keys().copied().collect()
    }

    /// Insert a new channel.
    ///
    /// Channels built without their own timeout get the table default. A
    /// channel created already bound is attached to its application; if the
    /// application refuses it, the insert is rolled back.
    pub fn on_channel_created(&self, channel: Channel) -> Result<Arc<Channel>> {
        if !channel.has_custom_timeout() {
            channel.set_silence_timeout(self.config.default_silence_timeout_ms);
        }
        let channel = Arc::new(channel);
        let channel_id = channel.id();

        {
            let mut channels = self.channels.write();
            if channels.contains_key(&channel_id) {
                return Err(ChannelError::DuplicateChannel(channel_id).into());
            }
            channels.insert(channel_id, Arc::clone(&channel));
        }

        if let Some(binding) = channel.binding() {
            if let Err(e) = binding.application.attach_stream(channel_id, &binding.stream) {
                self.remove_if_same(&channel);
                return Err(e.into());
            }
        }

        self.stats.record_created();
        tracing::info!(
            channel_id = channel_id,
            stream = ?channel.stream_key().map(|k| k.to_string()),
            silence_timeout_ms = channel.silence_timeout_ms(),
            "Channel created"
        );

        Ok(channel)
    }

    /// Bind an existing, unbound channel to a new stream of `application`
    pub fn bind_stream(
        &self,
        channel_id: u32,
        application: &Arc<Application>,
        stream_name: &str,
        tracks: impl IntoIterator<Item = TrackInfo>,
    ) -> Result<Arc<Stream>> {
        let channel = self
            .get(channel_id)
            .ok_or(ChannelError::UnknownChannel(channel_id))?;
        if let Some(key) = channel.stream_key() {
            return Err(ChannelError::StreamInUse(key).into());
        }

        let stream = Arc::new(Stream::new(application.stream_key(stream_name), tracks));
        application.attach_stream(channel_id, &stream)?;

        let binding = Binding {
            application: Arc::clone(application),
            stream: Arc::clone(&stream),
        };
        if let Err(e) = channel.bind(binding) {
            application.detach_stream(channel_id);
            return Err(e.into());
        }

        // The channel may have been deleted while we were binding
        if !self.is_current(&channel) {
            self.release(&channel);
            return Err(ChannelError::UnknownChannel(channel_id).into());
        }

        tracing::info!(
            channel_id = channel_id,
            stream = %stream.key(),
            tracks = stream.tracks().track_count(),
            "Channel bound to stream"
        );

        Ok(stream)
    }

    /// Deliver one packet to the channel's stream.
    ///
    /// Liveness is refreshed only when the stream accepted the packet.
    pub fn ingest(&self, channel_id: u32, packet: MediaPacket) -> Result<()> {
        let Some(channel) = self.get(channel_id) else {
            let drops = self.stats.record_unknown_channel();
            if (drops - 1) % self.config.unknown_channel_log_interval.max(1) == 0 {
                tracing::warn!(
                    channel_id = channel_id,
                    drops = drops,
                    "Dropping data for unknown channel"
                );
            }
            return Err(ChannelError::UnknownChannel(channel_id).into());
        };

        let Some(stream) = channel.stream() else {
            channel.stats().record_rejected();
            tracing::debug!(channel_id = channel_id, "Dropping data for unbound channel");
            return Err(ChannelError::Unbound(channel_id).into());
        };

        let size = packet.size();
        match stream.ingest(packet) {
            Ok(()) => {
                channel.mark_received();
                channel.stats().record_packet(size);
                Ok(())
            }
            Err(e) => {
                channel.stats().record_rejected();
                Err(e)
            }
        }
    }

    /// [`ingest`](Self::ingest), reporting only whether the data was consumed
    pub fn on_data_received(&self, channel_id: u32, packet: MediaPacket) -> bool {
        self.ingest(channel_id, packet).is_ok()
    }

    /// Refresh liveness without delivering media
    pub fn touch(&self, channel_id: u32) -> bool {
        match self.get(channel_id) {
            Some(channel) => {
                channel.mark_received();
                true
            }
            None => false,
        }
    }

    pub fn set_channel_timeout(&self, channel_id: u32, timeout_ms: u32) -> Result<()> {
        let channel = self
            .get(channel_id)
            .ok_or(ChannelError::UnknownChannel(channel_id))?;
        channel.set_silence_timeout(timeout_ms);
        tracing::debug!(
            channel_id = channel_id,
            timeout_ms = timeout_ms,
            "Channel silence timeout changed"
        );
        Ok(())
    }

    /// Remove a channel and detach it from its application
    pub fn on_channel_deleted(&self, channel_id: u32) -> Option<Arc<Channel>> {
        let channel = self.channels.write().remove(&channel_id)?;
        self.release(&channel);
        self.stats.record_deleted();
        tracing::info!(channel_id = channel_id, "Channel deleted");
        Some(channel)
    }

    /// Remove every channel publishing into `application`.
    ///
    /// Returns the number of channels removed.
    pub fn on_application_deleted(&self, application: &Arc<Application>) -> usize {
        let evicted: Vec<Arc<Channel>> = {
            let mut channels = self.channels.write();
            let ids: Vec<u32> = channels
                .iter()
                .filter(|(_, channel)| channel.belongs_to(application))
                .map(|(&id, _)| id)
                .collect();
            ids.iter().filter_map(|id| channels.remove(id)).collect()
        };

        for channel in &evicted {
            self.release(channel);
            self.stats.record_deleted();
        }
        for stream in application.close() {
            stream.close();
        }

        self.stats.record_evicted(evicted.len());
        tracing::info!(
            application = application.name(),
            evicted = evicted.len(),
            "Application deleted, channels evicted"
        );

        evicted.len()
    }

    /// One reaper sweep at `now`; returns the ids removed
    pub fn reap_expired(&self, now: Instant) -> Vec<u32> {
        let snapshot: Vec<Arc<Channel>> = self.channels.read().values().cloned().collect();
        let hook = self.timeout_hook.read().clone();

        let mut reaped = Vec::new();
        for channel in snapshot {
            if !channel.is_expired(now) {
                continue;
            }

            channel.on_timeout();
            if let Some(hook) = &hook {
                hook(&channel);
            }

            if self.remove_if_expired(&channel, now) {
                self.release(&channel);
                self.stats.record_deleted();
                self.stats.record_reaped();
                reaped.push(channel.id());
            }
        }

        reaped
    }

    /// Start the background reaper
    pub fn spawn_reaper(self: &Arc<Self>) -> ReaperHandle {
        reaper::spawn(Arc::clone(self))
    }

    /// Remove every channel
    pub fn clear(&self) -> usize {
        let drained: Vec<Arc<Channel>> = self.channels.write().drain().map(|(_, c)| c).collect();
        for channel in &drained {
            self.release(channel);
            self.stats.record_deleted();
        }
        drained.len()
    }

    fn is_current(&self, channel: &Arc<Channel>) -> bool {
        self.channels
            .read()
            .get(&channel.id())
            .is_some_and(|current| Arc::ptr_eq(current, channel))
    }

    /// Remove `channel` only if the id still maps to this very channel
    fn remove_if_same(&self, channel: &Arc<Channel>) -> bool {
        let mut channels = self.channels.write();
        match channels.get(&channel.id()) {
            Some(current) if Arc::ptr_eq(current, channel) => {
                channels.remove(&channel.id());
                true
            }
            _ => false,
        }
    }

    /// Remove `channel` if the id still maps to it and it is still silent.
    ///
    /// The timeout hook or an ingest thread may have refreshed it since the
    /// snapshot was taken.
    fn remove_if_expired(&self, channel: &Arc<Channel>, now: Instant) -> bool {
        let mut channels = self.channels.write();
        match channels.get(&channel.id()) {
            Some(current) if Arc::ptr_eq(current, channel) && channel.is_expired(now) => {
                channels.remove(&channel.id());
                true
            }
            _ => false,
        }
    }

    /// Detach a removed channel from its application and close its stream
    fn release(&self, channel: &Channel) {
        if let Some(binding) = channel.unbind() {
            binding.application.detach_stream(channel.id());
            binding.stream.close();
        }
    }
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChannelTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTable")
            .field("channels", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
