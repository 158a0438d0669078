//! Provider → channel → stream → normalizer → track set → ordered drain

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio_test::assert_ok;

use ingest_rs::media::aac::AdtsHeader;
use ingest_rs::media::h264::NaluType;
use ingest_rs::{
    BitstreamFormat, Channel, ChannelConfig, MediaPacket, PacketType, Provider, Timebase,
    TrackInfo,
};

const VIDEO: u32 = 1;
const AUDIO: u32 = 2;

const AVCC_RECORD: &[u8] = &[
    0x01, 0x42, 0x00, 0x1E, 0xFF, //
    0xE1, 0x00, 0x04, 0x67, 0x42, 0x00, 0x1E, //
    0x01, 0x00, 0x02, 0x68, 0xCE,
];

fn tracks() -> Vec<TrackInfo> {
    vec![
        TrackInfo::new(VIDEO, Timebase::VIDEO_90K, BitstreamFormat::H264Avcc),
        TrackInfo::new(AUDIO, Timebase::from_rate(48_000), BitstreamFormat::AacLatm),
    ]
}

fn avcc(nal: &[u8]) -> Bytes {
    let mut out = BytesMut::new();
    out.put_u32(nal.len() as u32);
    out.extend_from_slice(nal);
    out.freeze()
}

fn video(pts: i64, payload: Bytes) -> MediaPacket {
    MediaPacket::new(VIDEO, pts, pts, Timebase::VIDEO_90K, BitstreamFormat::H264Avcc, payload)
}

fn audio(pts: i64, payload: &'static [u8]) -> MediaPacket {
    MediaPacket::new(
        AUDIO,
        pts,
        pts,
        Timebase::from_rate(48_000),
        BitstreamFormat::AacLatm,
        Bytes::from_static(payload),
    )
}

fn provider_with_stream() -> Provider {
    let provider = Provider::new("test");
    provider.create_application("live");
    assert_ok!(provider.table().on_channel_created(Channel::new(1)));
    assert_ok!(provider.publish(1, "live", "cam1", tracks()));
    provider
}

#[test]
fn test_normalized_packets_drain_in_timestamp_order() {
    let provider = provider_with_stream();
    let table = provider.table();

    // Sequence headers first; they configure the tracks and are not queued
    assert!(table.on_data_received(1, video(0, Bytes::from_static(AVCC_RECORD)).sequence_header()));
    // AAC-LC, 48 kHz, stereo
    assert!(table.on_data_received(1, audio(0, &[0x11, 0x90]).sequence_header()));

    assert!(table.on_data_received(1, video(0, avcc(&[0x65, 0x88, 0x84]))));
    assert!(table.on_data_received(1, audio(0, &[0x21, 0x00])));
    assert!(table.on_data_received(1, audio(24_000, &[0x21, 0x01])));
    assert!(table.on_data_received(1, video(90_000, avcc(&[0x41, 0x9A]))));

    let stream = provider.application("live").unwrap().stream("cam1").unwrap();
    let drained = stream.tracks().drain_ready();
    let order: Vec<(u32, i64)> = drained.iter().map(|p| (p.track_id, p.pts)).collect();
    // Audio ran dry, so the last video frame waits for the next audio packet
    assert_eq!(order, vec![(VIDEO, 0), (AUDIO, 0), (AUDIO, 24_000)]);

    let idr = &drained[0];
    assert_eq!(idr.bitstream_format, BitstreamFormat::H264AnnexB);
    assert!(idr.keyframe);
    let nal_types: Vec<_> = idr
        .fragmentation
        .as_ref()
        .unwrap()
        .nal_units(&idr.payload)
        .filter_map(NaluType::of)
        .collect();
    assert_eq!(nal_types, vec![NaluType::Sps, NaluType::Pps, NaluType::Idr]);

    let aac = &drained[1];
    assert_eq!(aac.bitstream_format, BitstreamFormat::AacAdts);
    let header = AdtsHeader::parse(&aac.payload).unwrap();
    assert_eq!(header.sampling_frequency_index, 3);
    assert_eq!(header.channel_configuration, 2);
    assert_eq!(header.frame_length as usize, aac.payload.len());

    assert!(table.on_data_received(1, audio(48_000, &[0x21, 0x02])));
    let next = stream.tracks().try_pop().unwrap();
    assert_eq!((next.track_id, next.pts), (VIDEO, 90_000));
    assert!(!next.keyframe);
    assert_eq!(next.packet_type, PacketType::Raw);
}

#[test]
fn test_aac_before_sequence_header_is_dropped_but_channel_stays_alive() {
    let provider = provider_with_stream();
    let table = provider.table();

    assert!(table.on_data_received(1, audio(0, &[0x21, 0x00])));
    let stream = table.get(1).unwrap().stream().unwrap();
    assert_eq!(stream.stats().snapshot().dropped_before_config, 1);
    assert_eq!(stream.tracks().queued(), 0);
}

#[test]
fn test_malformed_payload_is_rejected() {
    let provider = provider_with_stream();
    let table = provider.table();

    // Declared NAL length runs past the payload
    let broken = video(0, Bytes::from_static(&[0, 0, 0, 40, 0x65]));
    assert!(!table.on_data_received(1, broken));
    assert_eq!(table.get(1).unwrap().stats().snapshot().rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn test_consumer_waits_then_stream_is_reaped() {
    let provider = Arc::new(Provider::with_config(
        "test",
        ChannelConfig::default()
            .silence_timeout_ms(500)
            .reap_interval(Duration::from_millis(100)),
    ));
    provider.create_application("live");
    assert_ok!(provider.table().on_channel_created(Channel::new(7)));
    let stream = assert_ok!(provider.publish(
        7,
        "live",
        "mic",
        [TrackInfo::new(1, Timebase::from_rate(48_000), BitstreamFormat::Opus)],
    ));
    provider.start();

    let consumer = {
        let tracks = Arc::clone(stream.tracks());
        tokio::spawn(async move {
            let mut received = Vec::new();
            while let Some(packet) = tracks.recv().await {
                received.push(packet.pts);
            }
            received
        })
    };

    for pts in [0, 960, 1920] {
        let packet = MediaPacket::new(
            1,
            pts,
            pts,
            Timebase::from_rate(48_000),
            BitstreamFormat::Opus,
            Bytes::from_static(&[0xFC, 0xFF, 0xFE]),
        );
        assert!(provider.table().on_data_received(7, packet));
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Silence: the reaper removes the channel and closes the stream
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(!provider.table().contains(7));
    assert_eq!(provider.application("live").unwrap().stream_count(), 0);

    let received = consumer.await.unwrap();
    assert_eq!(received, vec![0, 960, 1920]);

    provider.shutdown().await;
}
