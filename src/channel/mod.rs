//! Live ingest channels and their lifecycle
//!
//! A channel is one network session delivering media. It is bound to at most
//! one [`Stream`], which belongs to an [`Application`].
//!
//! # Architecture
//!
//! ```text
//!                       Arc<ChannelTable>
//!                  ┌────────────────────────────┐
//!                  │ channels: RwLock<HashMap<  │
//!                  │   channel_id,              │
//!                  │   Arc<Channel> {           │
//!                  │     binding ──► Stream,    │
//!                  │     last_received_at,      │
//!                  │   }                        │
//!                  │ >>                         │
//!                  └─────────────┬──────────────┘
//!                                │
//!       ┌────────────────────────┼─────────────────────────┐
//!       │                        │                         │
//!       ▼                        ▼                         ▼
//!  [ingest path]            [reaper task]            [application]
//!  on_data_received()       snapshot under read      on_application_deleted()
//!  read lock, clone Arc,    lock, then expire and    write lock once,
//!  release, ingest          delete outside it        detach outside it
//! ```
//!
//! The map lock is never held while calling into application or stream
//! code.

pub mod application;
pub mod config;
pub mod entry;
pub mod error;
pub mod reaper;
pub mod stream;
pub mod table;
pub mod traits;

pub use application::Application;
pub use config::ChannelConfig;
pub use entry::Channel;
pub use error::ChannelError;
pub use reaper::ReaperHandle;
pub use stream::{Stream, StreamKey};
pub use table::{ChannelTable, TimeoutHook};
pub use traits::{Attachable, Timeoutable};
