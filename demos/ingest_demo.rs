//! Ingest pipeline demo
//!
//! Run with: cargo run --example ingest_demo [SECONDS]
//!
//! Simulates one provider with two publishing channels:
//! - `live/cam1` sends AVCC H.264 at 30 fps and LATM AAC at ~43 fps
//! - `live/cam2` goes silent after one second and is reaped
//!
//! A consumer task drains `live/cam1` in timestamp order and prints each
//! packet. Set `RUST_LOG=ingest_rs=trace` for per-packet logs.

use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use ingest_rs::{
    BitstreamFormat, Channel, ChannelConfig, MediaPacket, Provider, Stream, Timebase, TrackInfo,
};

const VIDEO_TRACK: u32 = 1;
const AUDIO_TRACK: u32 = 2;

/// AVCDecoderConfigurationRecord: Baseline 3.0, one SPS, one PPS
const AVCC_RECORD: &[u8] = &[
    0x01, 0x42, 0x00, 0x1E, 0xFF, //
    0xE1, 0x00, 0x04, 0x67, 0x42, 0x00, 0x1E, //
    0x01, 0x00, 0x02, 0x68, 0xCE,
];

/// AudioSpecificConfig: AAC-LC, 44100 Hz, stereo
const AAC_CONFIG: &[u8] = &[0x12, 0x10];

fn tracks() -> Vec<TrackInfo> {
    vec![
        TrackInfo::new(VIDEO_TRACK, Timebase::VIDEO_90K, BitstreamFormat::H264Avcc),
        TrackInfo::new(AUDIO_TRACK, Timebase::from_rate(44_100), BitstreamFormat::AacLatm),
    ]
}

fn avcc_frame(index: u64) -> Bytes {
    let keyframe = index % 30 == 0;
    let nal: &[u8] = if keyframe {
        &[0x65, 0x88, 0x84, 0x00, 0x33]
    } else {
        &[0x41, 0x9A, 0x02, 0x04]
    };
    let mut out = BytesMut::with_capacity(nal.len() + 4);
    out.put_u32(nal.len() as u32);
    out.extend_from_slice(nal);
    out.freeze()
}

fn video(pts: i64, payload: Bytes) -> MediaPacket {
    MediaPacket::new(
        VIDEO_TRACK,
        pts,
        pts,
        Timebase::VIDEO_90K,
        BitstreamFormat::H264Avcc,
        payload,
    )
}

fn audio(pts: i64, payload: Bytes) -> MediaPacket {
    MediaPacket::new(
        AUDIO_TRACK,
        pts,
        pts,
        Timebase::from_rate(44_100),
        BitstreamFormat::AacLatm,
        payload,
    )
}

/// Feed one channel like a provider adapter would
async fn publish(provider: Arc<Provider>, channel_id: u32, duration: Duration) {
    let table = provider.table();
    if !table.on_data_received(
        channel_id,
        video(0, Bytes::from_static(AVCC_RECORD)).sequence_header(),
    ) {
        return;
    }
    table.on_data_received(
        channel_id,
        audio(0, Bytes::from_static(AAC_CONFIG)).sequence_header(),
    );

    let start = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(10));
    let (mut frame, mut aac_frame) = (0u64, 0u64);

    while start.elapsed() < duration {
        ticker.tick().await;
        let elapsed_us = start.elapsed().as_micros() as i64;

        while (frame as i64) * 33_333 <= elapsed_us {
            let pts = frame as i64 * 3000;
            table.on_data_received(channel_id, video(pts, avcc_frame(frame)));
            frame += 1;
        }
        while (aac_frame as i64) * 23_220 <= elapsed_us {
            let pts = aac_frame as i64 * 1024;
            table.on_data_received(channel_id, audio(pts, Bytes::from_static(&[0x21, 0x10, 0x04])));
            aac_frame += 1;
        }
    }
}

async fn consume(stream: Arc<Stream>) {
    let tracks = Arc::clone(stream.tracks());
    loop {
        match tracks.recv_timeout(Duration::from_millis(500)).await {
            Some(packet) => println!(
                "{} track={} pts_us={:>9} size={:>4} keyframe={} format={:?}",
                stream.key(),
                packet.track_id,
                packet.pts_usec().unwrap_or_default(),
                packet.size(),
                packet.keyframe,
                packet.bitstream_format,
            ),
            None if tracks.is_closed() => break,
            None => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let seconds: u64 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 5,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ingest_rs=info".parse()?)
                .add_directive("ingest_demo=debug".parse()?),
        )
        .init();

    let config = ChannelConfig::default().silence_timeout_ms(1500);
    let provider = Arc::new(Provider::with_config("demo", config));
    provider.create_application("live");
    provider.start();

    for (channel_id, name) in [(1, "cam1"), (2, "cam2")] {
        provider.table().on_channel_created(Channel::new(channel_id))?;
        provider.publish(channel_id, "live", name, tracks())?;
    }

    let consumer = match provider.application("live").and_then(|app| app.stream("cam1")) {
        Some(stream) => tokio::spawn(consume(stream)),
        None => return Err("live/cam1 was not published".into()),
    };

    let cam1 = tokio::spawn(publish(Arc::clone(&provider), 1, Duration::from_secs(seconds)));
    let cam2 = tokio::spawn(publish(Arc::clone(&provider), 2, Duration::from_secs(1)));

    tokio::select! {
        _ = async { let _ = tokio::join!(cam1, cam2); } => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
    }

    let stats = provider.table().stats().snapshot();
    println!(
        "channels created={} reaped={} deleted={}",
        stats.created, stats.reaped, stats.deleted
    );

    provider.shutdown().await;
    consumer.await?;

    Ok(())
}
