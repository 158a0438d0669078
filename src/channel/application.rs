//! Applications: named groups of published streams

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::error::ChannelError;
use super::stream::{Stream, StreamKey};
use super::traits::Attachable;

#[derive(Debug)]
struct AttachedStream {
    channel_id: u32,
    stream: Arc<Stream>,
}

#[derive(Debug, Default)]
struct ApplicationInner {
    /// Stream name to the stream and the channel publishing it
    streams: HashMap<String, AttachedStream>,
    closed: bool,
}

/// A named application (e.g. `live`) owning the streams published into it
#[derive(Debug)]
pub struct Application {
    name: String,
    inner: RwLock<ApplicationInner>,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(ApplicationInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stream_key(&self, stream_name: &str) -> StreamKey {
        StreamKey::new(self.name.as_str(), stream_name)
    }

    pub fn stream(&self, stream_name: &str) -> Option<Arc<Stream>> {
        self.inner
            .read()
            .streams
            .get(stream_name)
            .map(|attached| Arc::clone(&attached.stream))
    }

    pub fn stream_count(&self) -> usize {
        self.inner.read().streams.len()
    }

    /// Channel ids publishing into this application
    pub fn channel_ids(&self) -> Vec<u32> {
        self.inner
            .read()
            .streams
            .values()
            .map(|attached| attached.channel_id)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// Refuse new streams and detach every attached one
    pub(crate) fn close(&self) -> Vec<Arc<Stream>> {
        let mut inner = self.inner.write();
        inner.closed = true;
        inner
            .streams
            .drain()
            .map(|(_, attached)| attached.stream)
            .collect()
    }
}

impl Attachable for Application {
    fn attach_stream(&self, channel_id: u32, stream: &Arc<Stream>) -> Result<(), ChannelError> {
        let mut inner = self.inner.write();
        if inner.closed {
            return Err(ChannelError::ApplicationClosed(self.name.clone()));
        }

        let name = stream.key().name.clone();
        if inner.streams.contains_key(&name) {
            return Err(ChannelError::StreamInUse(stream.key().clone()));
        }

        inner.streams.insert(
            name,
            AttachedStream {
                channel_id,
                stream: Arc::clone(stream),
            },
        );
        Ok(())
    }

    fn detach_stream(&self, channel_id: u32) -> Option<Arc<Stream>> {
        let mut inner = self.inner.write();
        let name = inner
            .streams
            .iter()
            .find(|(_, attached)| attached.channel_id == channel_id)
            .map(|(name, _)| name.clone())?;
        inner.streams.remove(&name).map(|attached| attached.stream)
    }

    fn streams(&self) -> Vec<Arc<Stream>> {
        self.inner
            .read()
            .streams
            .values()
            .map(|attached| Arc::clone(&attached.stream))
            .collect()
    }
}
