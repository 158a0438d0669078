//! AAC audio parsing and ADTS framing
//!
//! Ingest protocols deliver AAC in one of three ways: ADTS frames (MPEG-TS,
//! SRT), raw access units with an out-of-band AudioSpecificConfig (RTMP/FLV,
//! MP4), or LATM/raw units whose config arrives as extradata (RTSP, WebRTC).
//! Every track is normalized to ADTS.
//!
//! ADTS header (7 bytes, 9 with CRC):
//! ```text
//! AAAAAAAA AAAABCCD EEFFFFGH HHIJKLMM MMMMMMMM MMMOOOOO OOOOOOPP (QQQQQQQQ QQQQQQQQ)
//!
//! A syncword 0xFFF      B MPEG version      C layer (0)      D protection absent
//! E profile (AOT - 1)   F frequency index   G private bit    H channel configuration
//! I original/copy       J home              K/L copyright    M frame length (header included)
//! O buffer fullness     P raw blocks - 1    Q CRC
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::bits::{BitReader, BitWriter, ReadBits};
use crate::error::MediaError;
use crate::media::packet::PacketType;

/// Size of an ADTS header without CRC
pub const ADTS_HEADER_SIZE: usize = 7;

/// Size of an ADTS header with CRC
pub const ADTS_HEADER_SIZE_WITH_CRC: usize = 9;

/// Largest value of the 13-bit frame length field
pub const ADTS_MAX_FRAME_LENGTH: usize = 0x1FFF;

/// Standard sampling frequencies by index (ISO 14496-3 Table 1.18)
pub const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Frequency index value announcing an explicit 24-bit frequency
const FREQUENCY_INDEX_ESCAPE: u8 = 0x0F;

/// Object type value announcing a 6-bit extension
const OBJECT_TYPE_ESCAPE: u8 = 31;

const OBJECT_TYPE_SBR: u8 = 5;
const OBJECT_TYPE_PS: u8 = 29;
const OBJECT_TYPE_ER_AAC_LD: u8 = 23;
const OBJECT_TYPE_ER_BSAC: u8 = 22;

/// Sampling frequency of a standard index
pub fn sampling_frequency(index: u8) -> Option<u32> {
    SAMPLING_FREQUENCIES.get(index as usize).copied()
}

/// Nearest standard index of an explicit frequency (ISO 14496-3 Table 4.82)
pub fn probe_frequency_index(frequency: u32) -> u8 {
    const LOWER_BOUNDS: [u32; 11] = [
        92017, 75132, 55426, 46009, 37566, 27713, 23004, 18783, 13856, 11502, 9391,
    ];
    LOWER_BOUNDS
        .iter()
        .position(|&min| frequency >= min)
        .unwrap_or(LOWER_BOUNDS.len()) as u8
}

/// AAC profile (audio object type)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacProfile {
    /// AAC Main
    Main = 1,
    /// AAC LC (Low Complexity) - most common
    Lc = 2,
    /// AAC SSR (Scalable Sample Rate)
    Ssr = 3,
    /// AAC LTP (Long Term Prediction)
    Ltp = 4,
    /// SBR (Spectral Band Replication) - HE-AAC
    Sbr = 5,
    /// AAC Scalable
    Scalable = 6,
    /// ER AAC LD (Low Delay)
    ErAacLd = 23,
    /// Parametric Stereo - HE-AAC v2
    Ps = 29,
}

impl AacProfile {
    pub fn from_object_type(ot: u8) -> Option<Self> {
        match ot {
            1 => Some(AacProfile::Main),
            2 => Some(AacProfile::Lc),
            3 => Some(AacProfile::Ssr),
            4 => Some(AacProfile::Ltp),
            5 => Some(AacProfile::Sbr),
            6 => Some(AacProfile::Scalable),
            23 => Some(AacProfile::ErAacLd),
            29 => Some(AacProfile::Ps),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AacProfile::Main => "AAC Main",
            AacProfile::Lc => "AAC LC",
            AacProfile::Ssr => "AAC SSR",
            AacProfile::Ltp => "AAC LTP",
            AacProfile::Sbr => "HE-AAC",
            AacProfile::Scalable => "AAC Scalable",
            AacProfile::ErAacLd => "AAC LD",
            AacProfile::Ps => "HE-AAC v2",
        }
    }
}

/// AudioSpecificConfig (from sequence header or extradata)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// Audio object type; for SBR/PS streams this is the core object type
    pub audio_object_type: u8,
    /// SBR (5) or PS (29) when the config signals an HE-AAC extension
    pub extension_object_type: Option<u8>,
    /// Sampling frequency index as written (15 = explicit frequency)
    pub sampling_frequency_index: u8,
    /// Sampling frequency in Hz
    pub sampling_frequency: u32,
    /// Channel configuration (1=mono, 2=stereo, etc.)
    pub channel_configuration: u8,
    /// Samples per frame: 1024/960, 512/480 for ER AAC LD, 256 for SSR
    pub frame_length: u32,
    /// Raw config bytes
    pub raw: Bytes,
}

impl AudioSpecificConfig {
    /// Parse from AAC sequence header data
    pub fn parse(data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 2 {
            return Err(MediaError::Truncated);
        }

        let mut r = BitReader::new(&data);

        let mut audio_object_type = read_object_type(&mut r)?;

        let sampling_frequency_index = r.read_bits(4)? as u8;
        let sampling_frequency = if sampling_frequency_index == FREQUENCY_INDEX_ESCAPE {
            r.read_bits(24)?
        } else {
            sampling_frequency(sampling_frequency_index).unwrap_or(0)
        };

        let channel_configuration = r.read_bits(4)? as u8;

        let mut extension_object_type = None;
        if audio_object_type == OBJECT_TYPE_SBR || audio_object_type == OBJECT_TYPE_PS {
            extension_object_type = Some(audio_object_type);
            let extension_frequency_index = r.read_bits(4)? as u8;
            if extension_frequency_index == FREQUENCY_INDEX_ESCAPE {
                let _extension_frequency = r.read_bits(24)?;
            }
            audio_object_type = read_object_type(&mut r)?;
            if audio_object_type == OBJECT_TYPE_ER_BSAC {
                let _extension_channel_configuration = r.read_bits(4)?;
            }
        }

        let mut frame_length = 1024;
        if matches!(audio_object_type, 1..=4 | 6 | 7 | 17 | 19..=23) {
            // GASpecificConfig is best effort; a short one keeps the default
            match read_ga_specific_config(&mut r, audio_object_type) {
                Ok(length) => frame_length = length,
                Err(e) => debug!(error = %e, "GASpecificConfig incomplete"),
            }
        }

        Ok(AudioSpecificConfig {
            audio_object_type,
            extension_object_type,
            sampling_frequency_index,
            sampling_frequency,
            channel_configuration,
            frame_length,
            raw: data,
        })
    }

    /// Index to use in an ADTS header: the written one, or the probed one for
    /// an explicit frequency
    pub fn frequency_index(&self) -> u8 {
        if self.sampling_frequency_index == FREQUENCY_INDEX_ESCAPE {
            probe_frequency_index(self.sampling_frequency)
        } else {
            self.sampling_frequency_index
        }
    }

    /// Object type, frequency and channel layout are usable
    pub fn is_valid(&self) -> bool {
        self.audio_object_type != 0
            && (self.frequency_index() as usize) < SAMPLING_FREQUENCIES.len()
            && self.channel_configuration < 15
    }

    /// ADTS profile field: Main=0, LC=1 (also for SBR/PS), SSR=2
    pub fn adts_profile(&self) -> Result<u8, MediaError> {
        let object_type = self.extension_object_type.unwrap_or(self.audio_object_type);
        match (object_type, self.audio_object_type) {
            (_, 1) => Ok(0),
            (OBJECT_TYPE_SBR | OBJECT_TYPE_PS, _) | (_, 2) => Ok(1),
            (_, 3) => Ok(2),
            _ => Err(MediaError::InvalidData("object type has no ADTS profile")),
        }
    }

    /// Get the profile
    pub fn profile(&self) -> Option<AacProfile> {
        AacProfile::from_object_type(self.audio_object_type)
    }

    /// RFC 6381 codec string, `mp4a.40.<object type>`
    pub fn codecs_parameter(&self) -> String {
        format!(
            "mp4a.40.{}",
            self.extension_object_type.unwrap_or(self.audio_object_type)
        )
    }

    /// Get channel count
    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            1..=6 => self.channel_configuration,
            7 => 8, // 7.1
            _ => 0,
        }
    }

    /// Build the 2-byte form: object type, frequency index, channels, and
    /// zeroed GASpecificConfig flags
    pub fn serialize(
        audio_object_type: u8,
        sampling_frequency_index: u8,
        channel_configuration: u8,
    ) -> Bytes {
        let mut w = BitWriter::with_capacity(2);
        w.write_bits(5, u32::from(audio_object_type));
        w.write_bits(4, u32::from(sampling_frequency_index));
        w.write_bits(4, u32::from(channel_configuration));
        w.write_bits(3, 0);
        w.finish()
    }
}

fn read_object_type(r: &mut impl ReadBits) -> Result<u8, MediaError> {
    let object_type = r.read_bits(5)? as u8;
    if object_type == OBJECT_TYPE_ESCAPE {
        return Ok(32 + r.read_bits(6)? as u8);
    }
    Ok(object_type)
}

/// Returns the frame length in samples
fn read_ga_specific_config(r: &mut impl ReadBits, audio_object_type: u8) -> Result<u32, MediaError> {
    let frame_length_flag = r.read_bit()?;
    let frame_length = match (audio_object_type, frame_length_flag) {
        (OBJECT_TYPE_ER_AAC_LD, false) => 512,
        (OBJECT_TYPE_ER_AAC_LD, true) => 480,
        (3, _) => 256,
        (_, false) => 1024,
        (_, true) => 960,
    };

    if r.read_bit()? {
        let _core_coder_delay = r.read_bits(14)?;
    }
    let extension_flag = r.read_bit()?;
    if matches!(audio_object_type, 6 | 20) {
        let _layer_nr = r.read_bits(3)?;
    }
    if extension_flag {
        if audio_object_type == OBJECT_TYPE_ER_BSAC {
            let _num_of_sub_frame = r.read_bits(5)?;
            let _layer_length = r.read_bits(11)?;
        }
        if matches!(audio_object_type, 17 | 19 | 20 | 23) {
            r.skip_bits(3)?;
        }
        let _extension_flag3 = r.read_bit()?;
    }

    Ok(frame_length)
}

/// Parsed ADTS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// `true` for MPEG-2, `false` for MPEG-4
    pub mpeg2: bool,
    pub layer: u8,
    pub protection_absent: bool,
    /// Audio object type minus one
    pub profile: u8,
    pub sampling_frequency_index: u8,
    pub private_bit: bool,
    pub channel_configuration: u8,
    pub original_copy: bool,
    pub home: bool,
    pub copyright_id_bit: bool,
    pub copyright_id_start: bool,
    /// Header plus payload, in bytes
    pub frame_length: u16,
    pub buffer_fullness: u16,
    /// Number of raw data blocks minus one
    pub raw_data_blocks: u8,
    pub crc: Option<u16>,
}

impl AdtsHeader {
    /// Parse the header at the start of `data`
    pub fn parse(data: &[u8]) -> Result<Self, MediaError> {
        if data.len() < ADTS_HEADER_SIZE {
            return Err(MediaError::Truncated);
        }

        let mut r = BitReader::new(data);
        if r.read_bits(12)? != 0xFFF {
            return Err(MediaError::InvalidData("missing ADTS syncword"));
        }

        let mpeg2 = r.read_bit()?;
        let layer = r.read_bits(2)? as u8;
        let protection_absent = r.read_bit()?;
        let profile = r.read_bits(2)? as u8;
        let sampling_frequency_index = r.read_bits(4)? as u8;
        let private_bit = r.read_bit()?;
        let channel_configuration = r.read_bits(3)? as u8;
        let original_copy = r.read_bit()?;
        let home = r.read_bit()?;
        let copyright_id_bit = r.read_bit()?;
        let copyright_id_start = r.read_bit()?;
        let frame_length = r.read_bits(13)? as u16;
        let buffer_fullness = r.read_bits(11)? as u16;
        let raw_data_blocks = r.read_bits(2)? as u8;
        let crc = if protection_absent {
            None
        } else {
            Some(r.read_u16()?)
        };

        Ok(AdtsHeader {
            mpeg2,
            layer,
            protection_absent,
            profile,
            sampling_frequency_index,
            private_bit,
            channel_configuration,
            original_copy,
            home,
            copyright_id_bit,
            copyright_id_start,
            frame_length,
            buffer_fullness,
            raw_data_blocks,
            crc,
        })
    }

    /// 7, or 9 when a CRC follows
    pub fn header_len(&self) -> usize {
        if self.protection_absent {
            ADTS_HEADER_SIZE
        } else {
            ADTS_HEADER_SIZE_WITH_CRC
        }
    }

    /// Payload bytes after the header; `None` if the frame length is too small
    pub fn payload_len(&self) -> Option<usize> {
        (self.frame_length as usize).checked_sub(self.header_len())
    }

    pub fn sample_rate(&self) -> Option<u32> {
        sampling_frequency(self.sampling_frequency_index)
    }

    /// Layer is 0, frequency index is standard and the frame length covers
    /// the header
    pub fn is_valid(&self) -> bool {
        self.layer == 0 && self.sample_rate().is_some() && self.payload_len().is_some()
    }
}

/// Prefix `payload` with a 7-byte ADTS header (MPEG-4, no CRC, buffer
/// fullness 0x7FF, one raw data block).
///
/// Output depends only on the three fields and `payload.len()`. Fails with
/// `InvalidData` if the frame does not fit the 13-bit length field.
pub fn append_adts_header(
    profile: u8,
    rate_index: u8,
    channels: u8,
    payload: &[u8],
) -> Result<Bytes, MediaError> {
    let frame_length = payload.len() + ADTS_HEADER_SIZE;
    if frame_length > ADTS_MAX_FRAME_LENGTH {
        return Err(MediaError::InvalidData("frame too long for ADTS"));
    }

    let profile = profile & 0x03;
    let rate_index = rate_index & 0x0F;
    let channels = channels & 0x07;

    let mut out = BytesMut::with_capacity(frame_length);
    out.put_u8(0xFF);
    out.put_u8(0xF1);
    out.put_u8((profile << 6) | (rate_index << 2) | (channels >> 2));
    out.put_u8((channels << 6) | (frame_length >> 11) as u8);
    out.put_u8((frame_length >> 3) as u8);
    out.put_u8((((frame_length & 0x07) << 5) | 0x1F) as u8);
    out.put_u8(0xFC);
    out.extend_from_slice(payload);

    Ok(out.freeze())
}

/// Strip ADTS headers from one or more concatenated frames.
///
/// Returns the concatenated raw payloads and the length of each.
pub fn adts_to_raw(data: &[u8]) -> Result<(Bytes, Vec<usize>), MediaError> {
    let mut out = BytesMut::with_capacity(data.len());
    let mut lengths = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        let header = AdtsHeader::parse(rest)?;
        if header.layer != 0 {
            return Err(MediaError::InvalidData("ADTS layer must be 0"));
        }

        let frame_length = header.frame_length as usize;
        let payload_len = header
            .payload_len()
            .ok_or(MediaError::InvalidData("ADTS frame shorter than its header"))?;
        if frame_length > rest.len() {
            return Err(MediaError::InvalidData("ADTS frame exceeds buffer"));
        }

        out.extend_from_slice(&rest[header.header_len()..frame_length]);
        lengths.push(payload_len);
        rest = &rest[frame_length..];
    }

    Ok((out.freeze(), lengths))
}

/// Per-track LATM/raw to ADTS converter.
///
/// Holds the last AudioSpecificConfig seen on the track.
#[derive(Debug, Default)]
pub struct AacConverter {
    config: Option<AudioSpecificConfig>,
}

impl AacConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self) -> Option<&AudioSpecificConfig> {
        self.config.as_ref()
    }

    /// Install a config; invalid ones are rejected and the previous config kept
    pub fn set_config(&mut self, config: AudioSpecificConfig) -> Result<(), MediaError> {
        if !config.is_valid() {
            return Err(MediaError::InvalidData("invalid AudioSpecificConfig"));
        }
        self.config = Some(config);
        Ok(())
    }

    /// Convert one packet.
    ///
    /// A sequence header updates the config from `extradata` (or from the
    /// payload itself when no extradata is given) and comes back unchanged.
    /// A raw access unit gets an ADTS header built from the current config;
    /// if none has been seen, `extradata` is tried before failing with
    /// `MissingConfig`.
    pub fn convert_latm_to_adts(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
        extradata: Option<&[u8]>,
    ) -> Result<Bytes, MediaError> {
        match packet_type {
            PacketType::SequenceHeader => {
                let raw = match extradata {
                    Some(extradata) => Bytes::copy_from_slice(extradata),
                    None => payload.clone(),
                };
                self.set_config(AudioSpecificConfig::parse(raw)?)?;
                Ok(payload)
            }
            PacketType::Raw => {
                if self.config.is_none() {
                    if let Some(extradata) = extradata {
                        self.set_config(AudioSpecificConfig::parse(Bytes::copy_from_slice(
                            extradata,
                        ))?)?;
                    }
                }
                let config = self.config.as_ref().ok_or(MediaError::MissingConfig)?;
                append_adts_header(
                    config.adts_profile()?,
                    config.frequency_index(),
                    config.channel_configuration,
                    &payload,
                )
            }
            PacketType::EndOfSequence => Ok(payload),
        }
    }
}
