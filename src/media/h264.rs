//! H.264/AVC parsing
//!
//! Push protocols deliver H.264 either as Annex-B (MPEG-TS, SRT, WebRTC after
//! depacketization) or AVCC (RTMP/FLV, MP4) with out-of-band parameter sets.
//!
//! AVCDecoderConfigurationRecord (sequence header):
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```

use bytes::{Buf, Bytes, BytesMut};

use crate::bits::{NalUnitBitReader, ReadBits};
use crate::error::MediaError;
use crate::media::nal::{LengthPrefixedNalus, START_CODE};
use crate::media::packet::FragmentationIndex;

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            _ => None,
        }
    }

    /// Type of the first byte of `nal`, if any
    pub fn of(nal: &[u8]) -> Option<Self> {
        nal.first().and_then(|&b| Self::from_byte(b))
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// AVC decoder configuration (from sequence header)
#[derive(Debug, Clone)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// Profile compatibility flags
    pub compatibility: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// NALU length size in bytes (usually 4)
    pub nalu_length_size: u8,
    /// Sequence Parameter Sets
    pub sps: Vec<Bytes>,
    /// Picture Parameter Sets
    pub pps: Vec<Bytes>,
    /// Raw AVCDecoderConfigurationRecord bytes
    pub raw: Bytes,
}

impl AvcConfig {
    /// Parse from AVCDecoderConfigurationRecord
    pub fn parse(data: Bytes) -> Result<Self, MediaError> {
        if data.len() < 7 {
            return Err(MediaError::Truncated);
        }

        let raw = data.clone();
        let mut data = data;

        let version = data.get_u8();
        if version != 1 {
            return Err(MediaError::InvalidData("unsupported avcC version"));
        }

        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = Self::parse_parameter_sets(&mut data, num_sps)?;

        if data.is_empty() {
            return Err(MediaError::Truncated);
        }
        let num_pps = data.get_u8() as usize;
        let pps = Self::parse_parameter_sets(&mut data, num_pps)?;

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
            raw,
        })
    }

    fn parse_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>, MediaError> {
        let mut sets = Vec::with_capacity(count);
        for _ in 0..count {
            if data.len() < 2 {
                return Err(MediaError::Truncated);
            }
            let len = data.get_u16() as usize;
            if data.len() < len {
                return Err(MediaError::InvalidData(
                    "parameter set length exceeds record",
                ));
            }
            sets.push(data.copy_to_bytes(len));
        }
        Ok(sets)
    }

    /// Get profile name
    pub fn profile_name(&self) -> &'static str {
        match self.profile {
            66 => "Baseline",
            77 => "Main",
            88 => "Extended",
            100 => "High",
            110 => "High 10",
            122 => "High 4:2:2",
            244 => "High 4:4:4",
            _ => "Unknown",
        }
    }

    /// Get level as string (e.g., "3.1")
    pub fn level_string(&self) -> String {
        format!("{}.{}", self.level / 10, self.level % 10)
    }

    /// `PPCCLL` hex triple used in `avc1.PPCCLL` codec strings
    pub fn profile_string(&self) -> String {
        format!(
            "{:02x}{:02x}{:02x}",
            self.profile, self.compatibility, self.level
        )
    }

    /// All SPS then all PPS, each behind a 4-byte start code
    pub fn to_annexb(&self) -> Bytes {
        let size: usize = self
            .sps
            .iter()
            .chain(&self.pps)
            .map(|ps| ps.len() + START_CODE.len())
            .sum();

        let mut out = BytesMut::with_capacity(size);
        for ps in self.sps.iter().chain(&self.pps) {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(ps);
        }
        out.freeze()
    }

    /// Parse the first SPS of the record
    pub fn parse_sps(&self) -> Option<Result<H264Sps, MediaError>> {
        self.sps.first().map(|sps| H264Sps::parse(sps))
    }
}

/// Access unit converted to Annex-B
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnexbAccessUnit {
    pub payload: Bytes,
    pub fragmentation: FragmentationIndex,
    /// Contains an IDR slice
    pub keyframe: bool,
}

/// Convert one AVCC access unit to Annex-B.
///
/// When the unit holds an IDR slice but carries no SPS/PPS of its own, the
/// parameter sets of `config` are prepended so every keyframe is decodable on
/// its own.
pub fn avcc_to_annexb(
    data: &[u8],
    nalu_length_size: u8,
    config: Option<&AvcConfig>,
) -> Result<AnnexbAccessUnit, MediaError> {
    let nals = LengthPrefixedNalus::new(data, nalu_length_size as usize)
        .collect::<Result<Vec<_>, _>>()?;

    let keyframe = nals
        .iter()
        .any(|nal| NaluType::of(nal) == Some(NaluType::Idr));
    let has_parameter_sets = nals
        .iter()
        .any(|nal| NaluType::of(nal).is_some_and(|t| t.is_parameter_set()));

    let injected: Vec<&[u8]> = match config {
        Some(config) if keyframe && !has_parameter_sets => config
            .sps
            .iter()
            .chain(&config.pps)
            .map(|ps| &ps[..])
            .collect(),
        _ => Vec::new(),
    };

    let mut out = BytesMut::with_capacity(data.len() + 1024);
    let mut fragmentation = FragmentationIndex::with_capacity(injected.len() + nals.len());
    for nal in injected.iter().chain(&nals) {
        out.extend_from_slice(&START_CODE);
        fragmentation.push(out.len(), nal.len());
        out.extend_from_slice(nal);
    }

    Ok(AnnexbAccessUnit {
        payload: out.freeze(),
        fragmentation,
        keyframe,
    })
}

/// Fields of a sequence parameter set needed to describe a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H264Sps {
    pub profile: u8,
    /// constraint_set flags
    pub constraint: u8,
    pub level: u8,
    pub id: u32,
    pub chroma_format_idc: u32,
    pub max_ref_frames: u32,
    pub frame_mbs_only: bool,
    pub width: u32,
    pub height: u32,
}

impl H264Sps {
    /// Parse an escaped SPS NAL unit, header byte included. VUI is not read.
    pub fn parse(nal: &[u8]) -> Result<Self, MediaError> {
        let mut r = NalUnitBitReader::new(nal);

        let header = r.read_u8()?;
        if header & 0x80 != 0 {
            return Err(MediaError::InvalidData("forbidden_zero_bit set"));
        }
        if NaluType::from_byte(header) != Some(NaluType::Sps) {
            return Err(MediaError::InvalidData("not an SPS NAL unit"));
        }

        let profile = r.read_u8()?;
        let constraint = r.read_u8()?;
        let level = r.read_u8()?;
        let id = r.read_ue()?;

        let mut chroma_format_idc = 1;
        if matches!(profile, 44 | 83 | 86 | 100 | 110 | 118 | 122 | 128 | 244) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                // separate_colour_plane_flag
                r.skip_bits(1)?;
            }
            let _bit_depth_luma_minus8 = r.read_ue()?;
            let _bit_depth_chroma_minus8 = r.read_ue()?;
            let _qpprime_y_zero_transform_bypass = r.read_bit()?;
            if r.read_bit()? {
                let lists = if chroma_format_idc == 3 { 12 } else { 8 };
                for i in 0..lists {
                    if r.read_bit()? {
                        skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        let _log2_max_frame_num_minus4 = r.read_ue()?;
        match r.read_ue()? {
            0 => {
                let _log2_max_poc_lsb_minus4 = r.read_ue()?;
            }
            1 => {
                let _delta_pic_order_always_zero = r.read_bit()?;
                let _offset_for_non_ref_pic = r.read_se()?;
                let _offset_for_top_to_bottom_field = r.read_se()?;
                let cycle = r.read_ue()?;
                for _ in 0..cycle {
                    r.read_se()?;
                }
            }
            _ => {}
        }

        let max_ref_frames = r.read_ue()?;
        let _gaps_in_frame_num_allowed = r.read_bit()?;
        let width_in_mbs = r.read_ue()?.saturating_add(1);
        let height_in_map_units = r.read_ue()?.saturating_add(1);
        let frame_mbs_only = r.read_bit()?;
        if !frame_mbs_only {
            let _mb_adaptive_frame_field = r.read_bit()?;
        }
        let _direct_8x8_inference = r.read_bit()?;

        let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
        if r.read_bit()? {
            crop_left = r.read_ue()?;
            crop_right = r.read_ue()?;
            crop_top = r.read_ue()?;
            crop_bottom = r.read_ue()?;
        }

        let field_factor: u64 = if frame_mbs_only { 1 } else { 2 };
        let width = cropped_size(
            u64::from(width_in_mbs) * 16,
            crop_left,
            crop_right,
        )
        .ok_or(MediaError::InvalidData("cropping exceeds picture width"))?;
        let height = cropped_size(
            field_factor * u64::from(height_in_map_units) * 16,
            crop_top,
            crop_bottom,
        )
        .ok_or(MediaError::InvalidData("cropping exceeds picture height"))?;

        Ok(H264Sps {
            profile,
            constraint,
            level,
            id,
            chroma_format_idc,
            max_ref_frames,
            frame_mbs_only,
            width,
            height,
        })
    }
}

/// Luma size after 4:2:0 cropping (two samples per crop unit)
fn cropped_size(full: u64, crop_a: u32, crop_b: u32) -> Option<u32> {
    let crop = 2 * (u64::from(crop_a) + u64::from(crop_b));
    full.checked_sub(crop).and_then(|size| u32::try_from(size).ok())
}

fn skip_scaling_list(r: &mut impl ReadBits, size: usize) -> Result<(), MediaError> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = r.read_se()?;
            next_scale = (last_scale + delta + 256).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}
