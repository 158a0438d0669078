//! Per-track bitstream normalization
//!
//! Every track leaves the normalizer in one canonical framing:
//!
//! | Input                      | Output                              |
//! |----------------------------|-------------------------------------|
//! | `H264AnnexB`, `H264Avcc`   | `H264AnnexB` + fragmentation index  |
//! | `H265AnnexB`, `H265Hvcc`   | `H265AnnexB` + fragmentation index  |
//! | `AacLatm`, `AacRaw`        | `AacAdts`                           |
//! | `AacAdts`                  | `AacAdts` (header validated)        |
//! | `Vp8`, `Opus`, `Unknown`   | unchanged                           |
//!
//! Sequence headers update the decoder config held here and are consumed.

use bytes::Bytes;

use crate::error::MediaError;
use crate::media::aac::{AacConverter, AdtsHeader, AudioSpecificConfig};
use crate::media::h264::{avcc_to_annexb, AvcConfig, NaluType};
use crate::media::h265::{hvcc_to_annexb, H265NaluType, HevcConfig};
use crate::media::nal::scan_start_codes;
use crate::media::packet::{BitstreamFormat, MediaPacket, PacketType, TrackInfo};

const DEFAULT_NALU_LENGTH_SIZE: u8 = 4;

/// Converter state of one track
#[derive(Debug)]
pub struct TrackNormalizer {
    info: TrackInfo,
    avc: Option<AvcConfig>,
    hevc: Option<HevcConfig>,
    aac: AacConverter,
    /// Last sequence header payload, whatever the codec
    decoder_config: Option<Bytes>,
}

impl TrackNormalizer {
    /// Create the normalizer, applying `info.extradata` as the initial decoder
    /// config. Unparseable extradata is logged and ignored; a later sequence
    /// header can still configure the track.
    pub fn new(info: TrackInfo) -> Self {
        let mut normalizer = Self {
            info,
            avc: None,
            hevc: None,
            aac: AacConverter::new(),
            decoder_config: None,
        };

        if let Some(extradata) = normalizer.info.extradata.clone() {
            let format = normalizer.info.bitstream_format;
            if let Err(e) = normalizer.apply_decoder_config(format, extradata) {
                tracing::warn!(
                    track_id = normalizer.info.track_id,
                    format = ?format,
                    error = %e,
                    "Ignoring unusable track extradata"
                );
            }
        }

        normalizer
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn track_id(&self) -> u32 {
        self.info.track_id
    }

    pub fn decoder_config(&self) -> Option<&Bytes> {
        self.decoder_config.as_ref()
    }

    pub fn avc_config(&self) -> Option<&AvcConfig> {
        self.avc.as_ref()
    }

    pub fn hevc_config(&self) -> Option<&HevcConfig> {
        self.hevc.as_ref()
    }

    pub fn aac_config(&self) -> Option<&AudioSpecificConfig> {
        self.aac.config()
    }

    /// Normalize one packet in place.
    ///
    /// Returns `Ok(None)` when the packet was a sequence header and has been
    /// absorbed into the track's decoder config.
    pub fn normalize(&mut self, mut packet: MediaPacket) -> Result<Option<MediaPacket>, MediaError> {
        let format = packet.bitstream_format;

        match packet.packet_type {
            PacketType::SequenceHeader => {
                self.apply_decoder_config(format, packet.payload)?;
                return Ok(None);
            }
            PacketType::EndOfSequence => {
                packet.bitstream_format = format.canonical();
                packet.fragmentation = None;
                return Ok(Some(packet));
            }
            PacketType::Raw => {}
        }

        match format {
            BitstreamFormat::H264AnnexB => {
                let fragmentation = scan_start_codes(&packet.payload);
                packet.keyframe = fragmentation
                    .nal_units(&packet.payload)
                    .any(|nal| NaluType::of(nal).is_some_and(|t| t.is_keyframe()));
                packet.fragmentation = Some(fragmentation);
            }
            BitstreamFormat::H265AnnexB => {
                let fragmentation = scan_start_codes(&packet.payload);
                packet.keyframe = fragmentation
                    .nal_units(&packet.payload)
                    .any(|nal| H265NaluType::of(nal).is_some_and(|t| t.is_keyframe()));
                packet.fragmentation = Some(fragmentation);
            }
            BitstreamFormat::H264Avcc => {
                let length_size = self
                    .avc
                    .as_ref()
                    .map_or(DEFAULT_NALU_LENGTH_SIZE, |c| c.nalu_length_size);
                let unit = avcc_to_annexb(&packet.payload, length_size, self.avc.as_ref())?;
                packet.payload = unit.payload;
                packet.fragmentation = Some(unit.fragmentation);
                packet.keyframe = unit.keyframe;
                packet.bitstream_format = BitstreamFormat::H264AnnexB;
            }
            BitstreamFormat::H265Hvcc => {
                let length_size = self
                    .hevc
                    .as_ref()
                    .map_or(DEFAULT_NALU_LENGTH_SIZE, |c| c.nalu_length_size);
                let unit = hvcc_to_annexb(&packet.payload, length_size, self.hevc.as_ref())?;
                packet.payload = unit.payload;
                packet.fragmentation = Some(unit.fragmentation);
                packet.keyframe = unit.keyframe;
                packet.bitstream_format = BitstreamFormat::H265AnnexB;
            }
            BitstreamFormat::AacLatm | BitstreamFormat::AacRaw => {
                let extradata = self.info.extradata.clone();
                packet.payload = self.aac.convert_latm_to_adts(
                    PacketType::Raw,
                    packet.payload,
                    extradata.as_deref(),
                )?;
                packet.bitstream_format = BitstreamFormat::AacAdts;
                packet.keyframe = true;
            }
            BitstreamFormat::AacAdts => {
                let header = AdtsHeader::parse(&packet.payload)?;
                if !header.is_valid() || header.frame_length as usize > packet.payload.len() {
                    return Err(MediaError::InvalidData("invalid ADTS header"));
                }
                packet.keyframe = true;
            }
            BitstreamFormat::Vp8 | BitstreamFormat::Opus | BitstreamFormat::Unknown => {
                packet.fragmentation = None;
            }
        }

        tracing::trace!(
            track_id = packet.track_id,
            pts = packet.pts,
            size = packet.payload.len(),
            keyframe = packet.keyframe,
            "Normalized packet"
        );

        Ok(Some(packet))
    }

    fn apply_decoder_config(
        &mut self,
        format: BitstreamFormat,
        config: Bytes,
    ) -> Result<(), MediaError> {
        match format {
            BitstreamFormat::H264Avcc => {
                let avc = AvcConfig::parse(config.clone())?;
                tracing::debug!(
                    track_id = self.info.track_id,
                    profile = avc.profile_name(),
                    level = %avc.level_string(),
                    "AVC decoder config updated"
                );
                self.avc = Some(avc);
            }
            BitstreamFormat::H265Hvcc => {
                let hevc = HevcConfig::parse(config.clone())?;
                tracing::debug!(
                    track_id = self.info.track_id,
                    profile = hevc.general_profile_idc,
                    level = hevc.general_level_idc,
                    "HEVC decoder config updated"
                );
                self.hevc = Some(hevc);
            }
            BitstreamFormat::AacLatm | BitstreamFormat::AacRaw | BitstreamFormat::AacAdts => {
                let asc = AudioSpecificConfig::parse(config.clone())?;
                tracing::debug!(
                    track_id = self.info.track_id,
                    codecs = %asc.codecs_parameter(),
                    sample_rate = asc.sampling_frequency,
                    channels = asc.channels(),
                    "AAC decoder config updated"
                );
                self.aac.set_config(asc)?;
            }
            // Annex-B parameter sets travel in-band; other codecs are opaque
            _ => {}
        }

        self.decoder_config = Some(config);
        Ok(())
    }
}
