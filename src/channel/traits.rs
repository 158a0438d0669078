//! Capabilities the channel table relies on

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::error::ChannelError;
use super::stream::Stream;

/// Something streams can be attached to for the lifetime of a channel
pub trait Attachable {
    /// Attach `stream`, published by `channel_id`
    fn attach_stream(&self, channel_id: u32, stream: &Arc<Stream>) -> Result<(), ChannelError>;

    /// Detach whatever stream `channel_id` published
    fn detach_stream(&self, channel_id: u32) -> Option<Arc<Stream>>;

    /// Streams currently attached
    fn streams(&self) -> Vec<Arc<Stream>>;
}

/// Something that expires after a silence window
pub trait Timeoutable {
    /// `None` when timeouts are disabled
    fn silence_timeout(&self) -> Option<Duration>;

    fn last_received_at(&self) -> Instant;

    /// Silence at `now` exceeds the timeout
    fn is_expired(&self, now: Instant) -> bool {
        match self.silence_timeout() {
            Some(timeout) => now.saturating_duration_since(self.last_received_at()) > timeout,
            None => false,
        }
    }

    /// Called by the reaper right before the item is removed
    fn on_timeout(&self) {}
}
