//! H.265/HEVC NAL classification and hvcC parsing
//!
//! The HEVC NAL header is two bytes:
//! ```text
//! forbidden_zero_bit (1) | nal_unit_type (6) | nuh_layer_id (6) | nuh_temporal_id_plus1 (3)
//! ```

use bytes::{Buf, Bytes, BytesMut};

use crate::error::MediaError;
use crate::media::h264::AnnexbAccessUnit;
use crate::media::nal::{LengthPrefixedNalus, START_CODE};
use crate::media::packet::FragmentationIndex;

/// Size of the HEVC NAL unit header
pub const NAL_HEADER_SIZE: usize = 2;

/// HEVC NAL unit types that matter for ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H265NaluType {
    /// Non-IRAP VCL slice (types 0..=15)
    Slice(u8),
    BlaWLp,
    BlaWRadl,
    BlaNLp,
    IdrWRadl,
    IdrNLp,
    Cra,
    /// Reserved IRAP types 22 and 23
    ReservedIrap(u8),
    Vps,
    Sps,
    Pps,
    Aud,
    EndOfSequence,
    EndOfBitstream,
    Filler,
    PrefixSei,
    SuffixSei,
    /// Reserved VCL 24..=31, reserved non-VCL 41..=47 and unspecified 48..=63
    Other(u8),
}

impl H265NaluType {
    /// Classify from the first header byte
    pub fn from_byte(b: u8) -> Self {
        match (b >> 1) & 0x3F {
            t @ 0..=15 => H265NaluType::Slice(t),
            16 => H265NaluType::BlaWLp,
            17 => H265NaluType::BlaWRadl,
            18 => H265NaluType::BlaNLp,
            19 => H265NaluType::IdrWRadl,
            20 => H265NaluType::IdrNLp,
            21 => H265NaluType::Cra,
            t @ 22..=23 => H265NaluType::ReservedIrap(t),
            32 => H265NaluType::Vps,
            33 => H265NaluType::Sps,
            34 => H265NaluType::Pps,
            35 => H265NaluType::Aud,
            36 => H265NaluType::EndOfSequence,
            37 => H265NaluType::EndOfBitstream,
            38 => H265NaluType::Filler,
            39 => H265NaluType::PrefixSei,
            40 => H265NaluType::SuffixSei,
            t => H265NaluType::Other(t),
        }
    }

    /// Classify a NAL unit; `None` if it is shorter than the 2-byte header
    pub fn of(nal: &[u8]) -> Option<Self> {
        (nal.len() >= NAL_HEADER_SIZE).then(|| Self::from_byte(nal[0]))
    }

    /// Intra random access point (types 16..=23)
    pub fn is_keyframe(&self) -> bool {
        matches!(
            self,
            H265NaluType::BlaWLp
                | H265NaluType::BlaWRadl
                | H265NaluType::BlaNLp
                | H265NaluType::IdrWRadl
                | H265NaluType::IdrNLp
                | H265NaluType::Cra
                | H265NaluType::ReservedIrap(_)
        )
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(
            self,
            H265NaluType::Vps | H265NaluType::Sps | H265NaluType::Pps
        )
    }
}

/// HEVCDecoderConfigurationRecord (hvcC)
#[derive(Debug, Clone)]
pub struct HevcConfig {
    pub general_profile_idc: u8,
    pub general_level_idc: u8,
    /// NALU length size in bytes
    pub nalu_length_size: u8,
    /// VPS, SPS, PPS and SEI units in record order
    pub parameter_sets: Vec<Bytes>,
    pub raw: Bytes,
}

impl HevcConfig {
    const FIXED_HEADER_SIZE: usize = 23;

    pub fn parse(data: Bytes) -> Result<Self, MediaError> {
        if data.len() < Self::FIXED_HEADER_SIZE {
            return Err(MediaError::Truncated);
        }
        if data[0] != 1 {
            return Err(MediaError::InvalidData("unsupported hvcC version"));
        }

        let raw = data.clone();
        let general_profile_idc = data[1] & 0x1F;
        let general_level_idc = data[12];
        let nalu_length_size = (data[21] & 0x03) + 1;
        let num_arrays = data[22] as usize;

        let mut data = data.slice(Self::FIXED_HEADER_SIZE..);
        let mut parameter_sets = Vec::new();
        for _ in 0..num_arrays {
            if data.len() < 3 {
                return Err(MediaError::Truncated);
            }
            let _nal_type = data.get_u8() & 0x3F;
            let num_nalus = data.get_u16();
            for _ in 0..num_nalus {
                if data.len() < 2 {
                    return Err(MediaError::Truncated);
                }
                let len = data.get_u16() as usize;
                if data.len() < len {
                    return Err(MediaError::InvalidData("hvcC NAL length exceeds record"));
                }
                parameter_sets.push(data.copy_to_bytes(len));
            }
        }

        Ok(HevcConfig {
            general_profile_idc,
            general_level_idc,
            nalu_length_size,
            parameter_sets,
            raw,
        })
    }

    /// Every VPS/SPS/PPS of the record behind a 4-byte start code
    pub fn to_annexb(&self) -> Bytes {
        let mut out = BytesMut::new();
        for ps in self.parameter_sets_only() {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(ps);
        }
        out.freeze()
    }

    fn parameter_sets_only(&self) -> impl Iterator<Item = &Bytes> {
        self.parameter_sets
            .iter()
            .filter(|nal| H265NaluType::of(nal).is_some_and(|t| t.is_parameter_set()))
    }
}

/// Convert one HVCC access unit to Annex-B, prepending the record's
/// parameter sets in front of an IRAP picture that carries none.
pub fn hvcc_to_annexb(
    data: &[u8],
    nalu_length_size: u8,
    config: Option<&HevcConfig>,
) -> Result<AnnexbAccessUnit, MediaError> {
    let nals = LengthPrefixedNalus::new(data, nalu_length_size as usize)
        .collect::<Result<Vec<_>, _>>()?;

    let keyframe = nals
        .iter()
        .any(|nal| H265NaluType::of(nal).is_some_and(|t| t.is_keyframe()));
    let has_parameter_sets = nals
        .iter()
        .any(|nal| H265NaluType::of(nal).is_some_and(|t| t.is_parameter_set()));

    let injected: Vec<&[u8]> = match config {
        Some(config) if keyframe && !has_parameter_sets => {
            config.parameter_sets_only().map(|ps| &ps[..]).collect()
        }
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
