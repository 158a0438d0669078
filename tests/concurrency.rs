//! Channel table under concurrent ingest, deletion and reaping

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_test::assert_ok;

use ingest_rs::{
    BitstreamFormat, Channel, ChannelConfig, MediaPacket, Provider, Timebase, TrackInfo,
};

const PUBLISHERS: u32 = 4;
const CHANNELS_PER_PUBLISHER: u32 = 200;

fn channel_id(publisher: u32, index: u32) -> u32 {
    publisher * 10_000 + index
}

fn opus_packet(pts: i64) -> MediaPacket {
    MediaPacket::new(
        1,
        pts,
        pts,
        Timebase::from_rate(48_000),
        BitstreamFormat::Opus,
        Bytes::from_static(&[0xFC, 0xFF, 0xFE]),
    )
}

fn opus_track() -> Vec<TrackInfo> {
    vec![TrackInfo::new(1, Timebase::from_rate(48_000), BitstreamFormat::Opus)]
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_delete_and_reap_stay_consistent() {
    let provider = Arc::new(Provider::with_config(
        "stress",
        ChannelConfig::default()
            .silence_timeout_ms(20)
            .reap_interval(Duration::from_millis(5)),
    ));
    let apps = [
        provider.create_application("a"),
        provider.create_application("b"),
    ];
    provider.start();

    let mut workers = Vec::new();

    for publisher in 0..PUBLISHERS {
        let provider = Arc::clone(&provider);
        let apps = apps.clone();
        workers.push(tokio::task::spawn_blocking(move || {
            let table = provider.table();
            for index in 0..CHANNELS_PER_PUBLISHER {
                let id = channel_id(publisher, index);
                if table.on_channel_created(Channel::new(id)).is_err() {
                    continue;
                }
                let app = &apps[(index % 2) as usize];
                // Fails once the application is gone or the channel was deleted
                let _ = table.bind_stream(id, app, &format!("s{id}"), opus_track());

                // Every tenth channel stays silent so the reaper has work
                if index % 10 != 0 {
                    for pts in 0..5 {
                        table.on_data_received(id, opus_packet(pts * 960));
                    }
                }
                // Earlier channels keep sending too
                if index > 0 {
                    table.on_data_received(channel_id(publisher, index - 1), opus_packet(0));
                }
                std::thread::sleep(Duration::from_micros(200));
            }
        }));
    }

    {
        let provider = Arc::clone(&provider);
        workers.push(tokio::task::spawn_blocking(move || {
            let table = provider.table();
            for index in 0..CHANNELS_PER_PUBLISHER {
                table.on_channel_deleted(channel_id(index % PUBLISHERS, index));
                if index == CHANNELS_PER_PUBLISHER / 2 {
                    assert!(provider.delete_application("a").is_some());
                }
                std::thread::sleep(Duration::from_micros(200));
            }
        }));
    }

    let finished = tokio::time::timeout(Duration::from_secs(30), async {
        for worker in workers {
            worker.await.unwrap();
        }
    })
    .await;
    assert_ok!(finished);

    // Freeze the table: nothing left is reapable, then let an in-flight sweep end
    let table = provider.table();
    for id in table.channel_ids() {
        let _ = table.set_channel_timeout(id, 0);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(provider.is_running());

    let stats = table.stats().snapshot();
    assert!(stats.created > 0);
    assert!(stats.reaped > 0);
    assert_eq!(stats.created - stats.deleted, table.len() as u64);

    let [a, b] = &apps;
    assert!(a.is_closed());
    assert!(!b.is_closed());

    // Every stream the open application holds belongs to a live channel bound to it
    let b_channels = b.channel_ids();
    assert_eq!(b_channels.len(), b.stream_count());
    for id in &b_channels {
        let channel = table.get(*id).unwrap();
        assert!(Arc::ptr_eq(&channel.application().unwrap(), b));
    }

    // and every live channel bound to it is listed there
    let bound_to_b = table
        .channel_ids()
        .into_iter()
        .filter_map(|id| table.get(id))
        .filter(|channel| channel.belongs_to(b))
        .count();
    assert_eq!(bound_to_b, b_channels.len());

    provider.shutdown().await;
    assert!(table.is_empty());
    assert_eq!(b.stream_count(), 0);
}
