//! One ingest provider instance
//!
//! A provider (RTMP, MPEG-TS, WebRTC, ...) owns its channel table, the reaper
//! sweeping it and the applications streams are published into. Independent
//! providers share nothing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::channel::{
    Application, ChannelConfig, ChannelError, ChannelTable, ReaperHandle, Stream,
};
use crate::error::Result;
use crate::media::TrackInfo;

pub struct Provider {
    name: String,
    table: Arc<ChannelTable>,
    applications: RwLock<HashMap<String, Arc<Application>>>,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl Provider {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, ChannelConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: ChannelConfig) -> Self {
        Self {
            name: name.into(),
            table: Arc::new(ChannelTable::with_config(config)),
            applications: RwLock::new(HashMap::new()),
            reaper: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &Arc<ChannelTable> {
        &self.table
    }

    /// Spawn the reaper. Must be called from within a tokio runtime; calling
    /// it again while running does nothing.
    pub fn start(&self) {
        let mut reaper = self.reaper.lock();
        if reaper.as_ref().is_some_and(|r| !r.is_finished()) {
            return;
        }
        *reaper = Some(self.table.spawn_reaper());
        tracing::info!(provider = %self.name, "Provider started");
    }

    pub fn is_running(&self) -> bool {
        self.reaper
            .lock()
            .as_ref()
            .is_some_and(|r| !r.is_finished())
    }

    /// Get or create the application `name`
    pub fn create_application(&self, name: &str) -> Arc<Application> {
        let mut applications = self.applications.write();
        let app = applications
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(provider = %self.name, application = name, "Application created");
                Arc::new(Application::new(name))
            });
        Arc::clone(app)
    }

    pub fn application(&self, name: &str) -> Option<Arc<Application>> {
        self.applications.read().get(name).cloned()
    }

    /// Delete an application and evict every channel publishing into it.
    ///
    /// Returns the number of channels evicted, or `None` if there was no
    /// such application.
    pub fn delete_application(&self, name: &str) -> Option<usize> {
        let app = self.applications.write().remove(name)?;
        Some(self.table.on_application_deleted(&app))
    }

    /// Bind `channel_id` to a new stream `stream_name` of application `app`
    pub fn publish(
        &self,
        channel_id: u32,
        app: &str,
        stream_name: &str,
        tracks: impl IntoIterator<Item = TrackInfo>,
    ) -> Result<Arc<Stream>> {
        let application = self
            .application(app)
            .ok_or_else(|| ChannelError::UnknownApplication(app.to_string()))?;
        self.table
            .bind_stream(channel_id, &application, stream_name, tracks)
    }

    pub fn set_channel_timeout(&self, channel_id: u32, timeout_ms: u32) -> Result<()> {
        self.table.set_channel_timeout(channel_id, timeout_ms)
    }

    /// Stop and join the reaper, then tear down every channel and
    /// application
    pub async fn shutdown(&self) {
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.shutdown().await;
        }

        let channels = self.table.clear();
        let applications: Vec<Arc<Application>> =
            self.applications.write().drain().map(|(_, app)| app).collect();
        for app in &applications {
            self.table.on_application_deleted(app);
        }

        tracing::info!(
            provider = %self.name,
            channels = channels,
            applications = applications.len(),
            "Provider shut down"
        );
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("applications", &self.applications.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::error::Error;
    use crate::media::{BitstreamFormat, Timebase};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn tracks() -> Vec<TrackInfo> {
        vec![TrackInfo::new(1, Timebase::VIDEO_90K, BitstreamFormat::H264AnnexB)]
    }

    #[test]
    fn test_create_application_is_idempotent() {
        let provider = Provider::new("rtmp");
        let first = provider.create_application("live");
        let second = provider.create_application("live");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(provider.application("vod").is_none());
    }

    #[test]
    fn test_publish_requires_application() {
        let provider = Provider::new("rtmp");
        assert_ok!(provider.table().on_channel_created(Channel::new(1)));
        let err = assert_err!(provider.publish(1, "live", "cam1", tracks()));
        assert!(matches!(
            err,
            Error::Channel(ChannelError::UnknownApplication(_))
        ));

        provider.create_application("live");
        let stream = assert_ok!(provider.publish(1, "live", "cam1", tracks()));
        assert_eq!(stream.key().to_string(), "live/cam1");
    }

    #[test]
    fn test_delete_application_evicts_channels() {
        let provider = Provider::new("rtmp");
        provider.create_application("live");
        for id in 1..=3 {
            assert_ok!(provider.table().on_channel_created(Channel::new(id)));
            assert_ok!(provider.publish(id, "live", &format!("cam{id}"), tracks()));
        }
        assert_ok!(provider.table().on_channel_created(Channel::new(9)));

        assert_eq!(provider.delete_application("live"), Some(3));
        assert_eq!(provider.delete_application("live"), None);
        assert_eq!(provider.table().channel_ids(), vec![9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_channel_timeout_drives_reaper() {
        let provider = Provider::with_config(
            "mpegts",
            ChannelConfig::default().silence_timeout_ms(0),
        );
        assert_ok!(provider.table().on_channel_created(Channel::new(1)));
        provider.start();
        assert!(provider.is_running());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(provider.table().contains(1));

        assert_ok!(provider.set_channel_timeout(1, 200));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!provider.table().contains(1));

        provider.shutdown().await;
        assert!(!provider.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_stops_reaper_then_clears() {
        let provider = Provider::new("rtmp");
        let live = provider.create_application("live");
        provider.start();
        provider.start();

        assert_ok!(provider.table().on_channel_created(Channel::new(1)));
        let stream = assert_ok!(provider.publish(1, "live", "cam1", tracks()));

        provider.shutdown().await;
        assert!(!provider.is_running());
        assert!(provider.table().is_empty());
        assert!(provider.application("live").is_none());
        assert!(live.is_closed());
        assert!(stream.tracks().is_closed());
    }
}
