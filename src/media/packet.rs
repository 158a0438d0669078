//! Canonical packet and track types
//!
//! Every provider adapter turns its wire framing into [`MediaPacket`]s. The
//! converters then rewrite `payload`/`fragmentation`/`bitstream_format` in
//! place, and the jitter buffer takes ownership of the normalized packet.

use bytes::Bytes;

/// Framing of the bytes in a packet payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitstreamFormat {
    /// H.264 NAL units delimited by start codes
    H264AnnexB,
    /// H.264 NAL units with 4-byte big-endian length prefixes
    H264Avcc,
    /// H.265 NAL units delimited by start codes
    H265AnnexB,
    /// H.265 NAL units with 4-byte big-endian length prefixes
    H265Hvcc,
    /// AAC frames with 7 or 9 byte ADTS headers
    AacAdts,
    /// AAC access units carried with an out-of-band AudioSpecificConfig
    AacLatm,
    /// Bare AAC raw_data_block
    AacRaw,
    Vp8,
    Opus,
    Unknown,
}

impl BitstreamFormat {
    /// Whether payloads of this format are made of NAL units
    pub fn carries_nal_units(&self) -> bool {
        matches!(
            self,
            BitstreamFormat::H264AnnexB
                | BitstreamFormat::H264Avcc
                | BitstreamFormat::H265AnnexB
                | BitstreamFormat::H265Hvcc
        )
    }

    pub fn is_aac(&self) -> bool {
        matches!(
            self,
            BitstreamFormat::AacAdts | BitstreamFormat::AacLatm | BitstreamFormat::AacRaw
        )
    }

    pub fn is_h265(&self) -> bool {
        matches!(self, BitstreamFormat::H265AnnexB | BitstreamFormat::H265Hvcc)
    }

    /// Format a normalized track of this input format emits
    pub fn canonical(self) -> BitstreamFormat {
        match self {
            BitstreamFormat::H264Avcc => BitstreamFormat::H264AnnexB,
            BitstreamFormat::H265Hvcc => BitstreamFormat::H265AnnexB,
            BitstreamFormat::AacLatm | BitstreamFormat::AacRaw => BitstreamFormat::AacAdts,
            other => other,
        }
    }
}

/// Role of a packet within its track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketType {
    /// Decoder configuration (AVCDecoderConfigurationRecord, AudioSpecificConfig, ...)
    SequenceHeader,
    /// Coded media: one access unit
    #[default]
    Raw,
    /// Video end-of-sequence marker
    EndOfSequence,
}

/// Rational clock unit of a track, e.g. 1/90000
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timebase {
    pub num: i32,
    pub den: i32,
}

impl Timebase {
    /// 90 kHz video clock
    pub const VIDEO_90K: Timebase = Timebase::new(1, 90_000);

    /// Millisecond clock used by RTMP/FLV
    pub const MILLIS: Timebase = Timebase::new(1, 1000);

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Clock of an audio track sampled at `rate` Hz
    pub const fn from_rate(rate: i32) -> Self {
        Self::new(1, rate)
    }

    /// `ts * 1_000_000 * num / den`, truncated to whole microseconds.
    ///
    /// Returns `None` when the timebase has a zero denominator.
    pub fn to_usec(&self, ts: i64) -> Option<i64> {
        if self.den == 0 {
            return None;
        }
        let usec = i128::from(ts) * 1_000_000 * i128::from(self.num) / i128::from(self.den);
        i64::try_from(usec).ok()
    }
}

/// Byte range of one NAL unit inside a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment {
    pub offset: usize,
    pub length: usize,
}

impl Fragment {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Per-NAL boundaries of a payload, in payload order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentationIndex {
    fragments: Vec<Fragment>,
}

impl FragmentationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fragments: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, offset: usize, length: usize) {
        self.fragments.push(Fragment::new(offset, length));
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn first(&self) -> Option<&Fragment> {
        self.fragments.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Fragment> {
        self.fragments.iter()
    }

    pub fn as_slice(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Slice every fragment out of `payload`.
    ///
    /// Fragments that fall outside the payload are skipped; use
    /// [`is_consistent`](Self::is_consistent) to reject such an index up front.
    pub fn nal_units<'a>(&'a self, payload: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.fragments
            .iter()
            .filter_map(move |f| payload.get(f.offset..f.end()))
    }

    /// Fragments are sorted, disjoint and all inside a payload of `payload_len` bytes
    pub fn is_consistent(&self, payload_len: usize) -> bool {
        let mut prev_end = 0usize;
        for fragment in &self.fragments {
            if fragment.offset < prev_end || fragment.end() > payload_len {
                return false;
            }
            prev_end = fragment.end();
        }
        true
    }
}

impl<'a> IntoIterator for &'a FragmentationIndex {
    type Item = &'a Fragment;
    type IntoIter = std::slice::Iter<'a, Fragment>;

    fn into_iter(self) -> Self::IntoIter {
        self.fragments.iter()
    }
}

/// Declaration of one track of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub track_id: u32,
    pub timebase: Timebase,
    /// Framing the provider delivers for this track
    pub bitstream_format: BitstreamFormat,
    /// Out-of-band decoder config (avcC, hvcC, AudioSpecificConfig), if known up front
    pub extradata: Option<Bytes>,
}

impl TrackInfo {
    pub fn new(track_id: u32, timebase: Timebase, bitstream_format: BitstreamFormat) -> Self {
        Self {
            track_id,
            timebase,
            bitstream_format,
            extradata: None,
        }
    }

    pub fn with_extradata(mut self, extradata: impl Into<Bytes>) -> Self {
        self.extradata = Some(extradata.into());
        self
    }
}

/// One encoded access unit of one track
#[derive(Debug, Clone)]
pub struct MediaPacket {
    /// Track identifier, stable within a stream
    pub track_id: u32,
    /// Presentation timestamp in `timebase` units
    pub pts: i64,
    /// Decoding timestamp in `timebase` units
    pub dts: i64,
    pub timebase: Timebase,
    pub bitstream_format: BitstreamFormat,
    pub packet_type: PacketType,
    pub payload: Bytes,
    /// NAL unit boundaries; present for NAL-carrying formats once normalized
    pub fragmentation: Option<FragmentationIndex>,
    /// Set by the normalizer for IDR/IRAP access units
    pub keyframe: bool,
}

impl MediaPacket {
    pub fn new(
        track_id: u32,
        pts: i64,
        dts: i64,
        timebase: Timebase,
        bitstream_format: BitstreamFormat,
        payload: Bytes,
    ) -> Self {
        Self {
            track_id,
            pts,
            dts,
            timebase,
            bitstream_format,
            packet_type: PacketType::Raw,
            payload,
            fragmentation: None,
            keyframe: false,
        }
    }

    /// Mark the packet as a decoder configuration record
    pub fn sequence_header(mut self) -> Self {
        self.packet_type = PacketType::SequenceHeader;
        self
    }

    pub fn with_packet_type(mut self, packet_type: PacketType) -> Self {
        self.packet_type = packet_type;
        self
    }

    /// Presentation time in microseconds
    pub fn pts_usec(&self) -> Option<i64> {
        self.timebase.to_usec(self.pts)
    }

    pub fn dts_usec(&self) -> Option<i64> {
        self.timebase.to_usec(self.dts)
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
