//! NAL unit framing conversion
//!
//! H.264 and H.265 access units travel in one of two framings:
//!
//! ```text
//! Annex-B:          00 00 00 01 | NAL | 00 00 01 | NAL | ...
//! Length-prefixed:  len (4, BE) | NAL | len (4, BE) | NAL | ...
//! ```
//!
//! Every conversion here returns the new buffer together with a
//! [`FragmentationIndex`] describing where each NAL unit landed in that new
//! buffer. Length-prefixed output always uses 4-byte lengths
//! (`lengthSizeMinusOne == 3`).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::MediaError;
use crate::media::packet::{BitstreamFormat, FragmentationIndex};

/// 4-byte Annex-B start code
pub const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// 3-byte Annex-B start code
pub const SHORT_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];

const LENGTH_PREFIX_SIZE: usize = 4;

/// Extra capacity reserved when rewriting a buffer with different framing
const OUTPUT_SLACK: usize = 1024;

/// Size of the start code beginning at `pos`, if any.
///
/// The 4-byte pattern is tested first so `00 00 00 01` is never read as a
/// leading zero followed by a 3-byte code.
fn start_code_at(data: &[u8], pos: usize) -> Option<usize> {
    match data.get(pos..) {
        Some([0, 0, 0, 1, ..]) => Some(4),
        Some([0, 0, 1, ..]) => Some(3),
        _ => None,
    }
}

/// Find every NAL unit in an Annex-B buffer.
///
/// Each fragment spans the bytes strictly between the end of one start code
/// and the start of the next (or the end of the buffer). Adjacent start codes
/// yield a zero-length fragment. A non-empty run of bytes before the first
/// start code is reported as a NAL at offset 0, so a buffer without any start
/// code is a single NAL unit.
pub fn scan_start_codes(data: &[u8]) -> FragmentationIndex {
    let mut index = FragmentationIndex::new();
    let mut nal_start: Option<usize> = None;
    let mut pos = 0;

    while pos + SHORT_START_CODE.len() <= data.len() {
        match start_code_at(data, pos) {
            Some(code_len) => {
                match nal_start {
                    Some(start) => index.push(start, pos - start),
                    None if pos > 0 => index.push(0, pos),
                    None => {}
                }
                pos += code_len;
                nal_start = Some(pos);
            }
            None => pos += 1,
        }
    }

    match nal_start {
        Some(start) => index.push(start, data.len() - start),
        None if !data.is_empty() => index.push(0, data.len()),
        None => {}
    }

    index
}

/// Rewrite an Annex-B buffer with 4-byte big-endian length prefixes.
///
/// Empty NAL ranges between adjacent start codes are dropped; a zero length
/// prefix carries no NAL unit.
pub fn annexb_to_length_prefixed(data: &[u8]) -> (Bytes, FragmentationIndex) {
    let fragments = scan_start_codes(data);

    let mut out = BytesMut::with_capacity(data.len() + OUTPUT_SLACK);
    let mut index = FragmentationIndex::with_capacity(fragments.len());

    for nal in fragments.nal_units(data).filter(|nal| !nal.is_empty()) {
        out.put_u32(nal.len() as u32);
        index.push(out.len(), nal.len());
        out.extend_from_slice(nal);
    }

    (out.freeze(), index)
}

/// Rewrite a buffer of 4-byte length-prefixed NAL units with 4-byte start codes.
pub fn length_prefixed_to_annexb(data: &[u8]) -> Result<(Bytes, FragmentationIndex), MediaError> {
    let mut out = BytesMut::with_capacity(data.len() + OUTPUT_SLACK);
    let mut index = FragmentationIndex::new();

    for nal in LengthPrefixedNalus::new(data, LENGTH_PREFIX_SIZE) {
        let nal = nal?;
        out.extend_from_slice(&START_CODE);
        index.push(out.len(), nal.len());
        out.extend_from_slice(nal);
    }

    Ok((out.freeze(), index))
}

/// Emit length-prefixed NAL units at already-known offsets of `data`.
///
/// Avoids rescanning when the caller kept the fragmentation of an earlier
/// conversion. Fails with `InvalidData` if `fragments` does not describe
/// sorted, disjoint ranges inside `data`.
pub fn length_prefixed_from_fragments(
    data: &[u8],
    fragments: &FragmentationIndex,
) -> Result<(Bytes, FragmentationIndex), MediaError> {
    if !fragments.is_consistent(data.len()) {
        return Err(MediaError::InvalidData("fragmentation does not match payload"));
    }

    let mut out = BytesMut::with_capacity(data.len() + OUTPUT_SLACK);
    let mut index = FragmentationIndex::with_capacity(fragments.len());

    for nal in fragments.nal_units(data) {
        out.put_u32(nal.len() as u32);
        index.push(out.len(), nal.len());
        out.extend_from_slice(nal);
    }

    Ok((out.freeze(), index))
}

/// Re-frame every NAL of `data` in `target` framing and append `new_nal`.
///
/// Existing NAL bytes are copied untouched; `new_nal` is escaped with
/// [`escape_emulation`] first. For Annex-B targets the start code width
/// follows the first existing fragment (3 bytes if it starts at offset 3,
/// otherwise 4).
pub fn insert_nal(
    data: &[u8],
    fragments: &FragmentationIndex,
    new_nal: &[u8],
    target: BitstreamFormat,
) -> Result<(Bytes, FragmentationIndex), MediaError> {
    let framing = match target {
        BitstreamFormat::H264AnnexB | BitstreamFormat::H265AnnexB => {
            match fragments.first() {
                Some(first) if first.offset == SHORT_START_CODE.len() => {
                    Framing::StartCode(&SHORT_START_CODE)
                }
                _ => Framing::StartCode(&START_CODE),
            }
        }
        BitstreamFormat::H264Avcc => Framing::LengthPrefix,
        other => return Err(MediaError::UnsupportedFormat(other)),
    };

    if !fragments.is_consistent(data.len()) {
        return Err(MediaError::InvalidData("fragmentation does not match payload"));
    }

    let escaped = escape_emulation(new_nal);
    let mut out = BytesMut::with_capacity(data.len() + escaped.len() + OUTPUT_SLACK);
    let mut index = FragmentationIndex::with_capacity(fragments.len() + 1);

    for nal in fragments.nal_units(data).chain(std::iter::once(&escaped[..])) {
        framing.write_header(&mut out, nal.len());
        index.push(out.len(), nal.len());
        out.extend_from_slice(nal);
    }

    Ok((out.freeze(), index))
}

enum Framing {
    StartCode(&'static [u8]),
    LengthPrefix,
}

impl Framing {
    fn write_header(&self, out: &mut BytesMut, nal_len: usize) {
        match self {
            Framing::StartCode(code) => out.extend_from_slice(code),
            Framing::LengthPrefix => out.put_u32(nal_len as u32),
        }
    }
}

/// Insert emulation-prevention bytes into a raw NAL payload.
///
/// A `0x03` goes in front of any byte `<= 0x03` that follows two zero bytes.
/// The zero run restarts after every inserted `0x03`.
pub fn escape_emulation(nal: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(nal.len() + nal.len() / 2 + 1);
    let mut zero_run = 0usize;

    for &byte in nal {
        if zero_run >= 2 && byte <= 0x03 {
            out.put_u8(0x03);
            zero_run = 0;
        }
        out.put_u8(byte);
        zero_run = if byte == 0 { zero_run + 1 } else { 0 };
    }

    out.freeze()
}

/// Strip emulation-prevention bytes, the inverse of [`escape_emulation`].
///
/// A `0x03` is dropped when it follows two zero bytes and is either the last
/// byte or followed by a byte `<= 0x03`.
pub fn unescape_emulation(nal: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(nal.len());
    let mut zero_run = 0usize;

    for (i, &byte) in nal.iter().enumerate() {
        if zero_run >= 2 && byte == 0x03 {
            match nal.get(i + 1) {
                None | Some(0x00..=0x03) => {
                    zero_run = 0;
                    continue;
                }
                Some(_) => {}
            }
        }
        out.put_u8(byte);
        zero_run = if byte == 0 { zero_run + 1 } else { 0 };
    }

    out.freeze()
}

/// Iterator over NAL units in length-prefixed framing.
///
/// Yields `Truncated` if the buffer ends inside a length prefix and
/// `InvalidData` if a declared length runs past the end; iteration stops
/// after the first error.
pub struct LengthPrefixedNalus<'a> {
    data: &'a [u8],
    offset: usize,
    length_size: usize,
    failed: bool,
}

impl<'a> LengthPrefixedNalus<'a> {
    /// `length_size` is the prefix width in bytes (1 to 4)
    pub fn new(data: &'a [u8], length_size: usize) -> Self {
        Self {
            data,
            offset: 0,
            length_size: length_size.clamp(1, 4),
            failed: false,
        }
    }
}

impl<'a> Iterator for LengthPrefixedNalus<'a> {
    type Item = Result<&'a [u8], MediaError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }

        let Some(prefix) = self.data.get(self.offset..self.offset + self.length_size) else {
            self.failed = true;
            return Some(Err(MediaError::Truncated));
        };
        let len = prefix
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        self.offset += self.length_size;

        let Some(nal) = self.data.get(self.offset..self.offset + len) else {
            self.failed = true;
            return Some(Err(MediaError::InvalidData(
                "NAL length exceeds remaining bytes",
            )));
        };
        self.offset += len;
        Some(Ok(nal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn annexb(nals: &[&[u8]], code: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(code);
            out.extend_from_slice(nal);
        }
        out
    }

    fn fragments(index: &FragmentationIndex) -> Vec<(usize, usize)> {
        index.iter().map(|f| (f.offset, f.length)).collect()
    }

    #[test]
    fn test_scan_mixed_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, // SPS behind 4-byte code
            0x00, 0x00, 0x01, 0x68, 0xCE, // PPS behind 3-byte code
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, // IDR
        ];
        let index = scan_start_codes(&data);
        assert_eq!(fragments(&index), vec![(4, 2), (9, 2), (15, 3)]);
    }

    #[test]
    fn test_scan_four_byte_code_not_split() {
        // A 3-byte match at offset 1 must not leave a stray zero NAL at offset 0
        let data = [0x00, 0x00, 0x00, 0x01, 0x09, 0xF0];
        assert_eq!(fragments(&scan_start_codes(&data)), vec![(4, 2)]);
    }

    #[test]
    fn test_scan_adjacent_codes_yield_empty_fragment() {
        let data = [0x00, 0x00, 0x01, 0x00, 0x00, 0x01, 0x41];
        assert_eq!(fragments(&scan_start_codes(&data)), vec![(3, 0), (6, 1)]);
    }

    #[test]
    fn test_scan_leading_bytes_and_no_start_code() {
        let data = [0xAA, 0xBB, 0x00, 0x00, 0x01, 0x41];
        assert_eq!(fragments(&scan_start_codes(&data)), vec![(0, 2), (5, 1)]);

        assert_eq!(fragments(&scan_start_codes(&[0x65, 0x01])), vec![(0, 2)]);
        assert!(scan_start_codes(&[]).is_empty());
    }

    #[test]
    fn test_annexb_to_length_prefixed() {
        let data = annexb(&[&[0x67, 0x42, 0x00], &[0x68, 0xCE]], &START_CODE);
        let (avcc, index) = annexb_to_length_prefixed(&data);
        assert_eq!(
            &avcc[..],
            &[0, 0, 0, 3, 0x67, 0x42, 0x00, 0, 0, 0, 2, 0x68, 0xCE]
        );
        assert_eq!(fragments(&index), vec![(4, 3), (11, 2)]);
    }

    #[test]
    fn test_annexb_to_length_prefixed_skips_empty_nal() {
        let data = [0x00, 0x00, 0x01, 0x00, 0x00, 0x01, 0x41];
        let (avcc, index) = annexb_to_length_prefixed(&data);
        assert_eq!(&avcc[..], &[0, 0, 0, 1, 0x41]);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_round_trip_preserves_nal_payloads() {
        let nals: [&[u8]; 4] = [
            &[0x67, 0x64, 0x00, 0x1F, 0xAC],
            &[0x68, 0xEE, 0x3C, 0x80],
            &[0x06, 0x05, 0x00, 0x00, 0x03, 0x01],
            &[0x65, 0x88, 0x84, 0x00, 0x33, 0xFF],
        ];

        for code in [&START_CODE[..], &SHORT_START_CODE[..]] {
            let input = annexb(&nals, code);
            let (avcc, _) = annexb_to_length_prefixed(&input);
            let (output, index) = assert_ok!(length_prefixed_to_annexb(&avcc));

            let recovered: Vec<&[u8]> = index.nal_units(&output).collect();
            assert_eq!(recovered, nals.to_vec());
            assert_eq!(
                scan_start_codes(&output)
                    .nal_units(&output)
                    .collect::<Vec<_>>(),
                nals.to_vec()
            );
        }
    }

    #[test]
    fn test_fragments_cover_payload_bytes_only() {
        let input = annexb(
            &[&[0x09, 0xF0], &[0x41, 0x9A, 0x02], &[0x41, 0x01]],
            &SHORT_START_CODE,
        );
        let (avcc, index) = annexb_to_length_prefixed(&input);
        assert!(index.is_consistent(avcc.len()));

        // Every byte is either a length prefix or covered by exactly one fragment
        let covered: usize = index.iter().map(|f| f.length).sum();
        assert_eq!(covered + index.len() * LENGTH_PREFIX_SIZE, avcc.len());
        for fragment in &index {
            let prefix = &avcc[fragment.offset - LENGTH_PREFIX_SIZE..fragment.offset];
            assert_eq!(
                u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize,
                fragment.length
            );
        }
    }

    #[test]
    fn test_length_prefixed_to_annexb_rejects_overlong_nal() {
        let data = [0x00, 0x00, 0x00, 0x09, 0x65, 0x88];
        assert_eq!(
            length_prefixed_to_annexb(&data),
            Err(MediaError::InvalidData("NAL length exceeds remaining bytes"))
        );
    }

    #[test]
    fn test_length_prefixed_to_annexb_truncated_prefix() {
        let data = [0x00, 0x00, 0x00, 0x01, 0x65, 0x00, 0x00];
        assert_eq!(length_prefixed_to_annexb(&data), Err(MediaError::Truncated));
    }

    #[test]
    fn test_length_prefixed_from_fragments() {
        let input = annexb(&[&[0x67, 0x42], &[0x68]], &START_CODE);
        let known = scan_start_codes(&input);
        let (avcc, index) = assert_ok!(length_prefixed_from_fragments(&input, &known));
        assert_eq!(&avcc[..], &[0, 0, 0, 2, 0x67, 0x42, 0, 0, 0, 1, 0x68]);
        assert_eq!(fragments(&index), vec![(4, 2), (10, 1)]);

        let mut bogus = FragmentationIndex::new();
        bogus.push(4, 100);
        assert_err!(length_prefixed_from_fragments(&input, &bogus));
    }

    #[test]
    fn test_insert_nal_annexb_keeps_short_start_codes() {
        let input = annexb(&[&[0x41, 0x9A]], &SHORT_START_CODE);
        let index = scan_start_codes(&input);
        let sei = [0x06, 0x05, 0x00, 0x00, 0x01];

        let (out, out_index) =
            assert_ok!(insert_nal(&input, &index, &sei, BitstreamFormat::H264AnnexB));
        assert_eq!(
            &out[..],
            &[0, 0, 1, 0x41, 0x9A, 0, 0, 1, 0x06, 0x05, 0x00, 0x00, 0x03, 0x01]
        );
        assert_eq!(fragments(&out_index), vec![(3, 2), (8, 6)]);
    }

    #[test]
    fn test_insert_nal_defaults_to_four_byte_codes() {
        let (out, index) = assert_ok!(insert_nal(
            &[],
            &FragmentationIndex::new(),
            &[0x06, 0x01],
            BitstreamFormat::H265AnnexB
        ));
        assert_eq!(&out[..], &[0, 0, 0, 1, 0x06, 0x01]);
        assert_eq!(fragments(&index), vec![(4, 2)]);
    }

    #[test]
    fn test_insert_nal_avcc() {
        let avcc = [0, 0, 0, 2, 0x65, 0x88];
        let mut index = FragmentationIndex::new();
        index.push(4, 2);

        let (out, out_index) =
            assert_ok!(insert_nal(&avcc, &index, &[0x06], BitstreamFormat::H264Avcc));
        assert_eq!(&out[..], &[0, 0, 0, 2, 0x65, 0x88, 0, 0, 0, 1, 0x06]);
        assert_eq!(fragments(&out_index), vec![(4, 2), (10, 1)]);
    }

    #[test]
    fn test_insert_nal_unsupported_format() {
        for format in [
            BitstreamFormat::H265Hvcc,
            BitstreamFormat::AacAdts,
            BitstreamFormat::Vp8,
            BitstreamFormat::Unknown,
        ] {
            assert_eq!(
                insert_nal(&[], &FragmentationIndex::new(), &[0x06], format),
                Err(MediaError::UnsupportedFormat(format))
            );
        }
    }

    #[test]
    fn test_escape_emulation() {
        assert_eq!(
            &escape_emulation(&[0x00, 0x00, 0x01])[..],
            &[0x00, 0x00, 0x03, 0x01]
        );
        assert_eq!(
            &escape_emulation(&[0x00, 0x00, 0x00, 0x00])[..],
            &[0x00, 0x00, 0x03, 0x00, 0x00]
        );
        // Trailing zeros and large follow-up bytes are left alone
        assert_eq!(&escape_emulation(&[0x00, 0x00])[..], &[0x00, 0x00]);
        assert_eq!(&escape_emulation(&[0x00, 0x00, 0x04])[..], &[0x00, 0x00, 0x04]);
    }

    #[test]
    fn test_unescape_emulation() {
        assert_eq!(
            &unescape_emulation(&[0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03])[..],
            &[0x00, 0x00, 0x01, 0x00, 0x00]
        );
        assert_eq!(
            &unescape_emulation(&[0x00, 0x00, 0x03, 0x04])[..],
            &[0x00, 0x00, 0x03, 0x04]
        );
    }

    #[test]
    fn test_escape_then_unescape_is_identity() {
        let cases: [&[u8]; 8] = [
            &[],
            &[0x00],
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
            &[0x00, 0x00, 0x03],
            &[0x00, 0x00, 0x03, 0x03, 0x00, 0x00, 0x02],
            &[0x12, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00],
            &[0x00, 0x00, 0x03, 0x00, 0x00, 0x03, 0x00],
            &[0xFF, 0x00, 0x00, 0x04, 0x00, 0x00, 0x01, 0x03],
        ];
        for nal in cases {
            assert_eq!(&unescape_emulation(&escape_emulation(nal))[..], nal);
        }

        // Exhaustive over short inputs built from the interesting byte values
        let alphabet = [0x00u8, 0x01, 0x03, 0x04];
        for len in 0..=6u32 {
            for n in 0..alphabet.len().pow(len) {
                let mut m = n;
                let nal: Vec<u8> = (0..len)
                    .map(|_| {
                        let b = alphabet[m % alphabet.len()];
                        m /= alphabet.len();
                        b
                    })
                    .collect();
                assert_eq!(unescape_emulation(&escape_emulation(&nal)), nal);
            }
        }
    }

    #[test]
    fn test_length_prefixed_nalus_two_byte_lengths() {
        let data = [0x00, 0x02, 0x65, 0x88, 0x00, 0x01, 0x06];
        let nals: Vec<&[u8]> = LengthPrefixedNalus::new(&data, 2)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(nals, vec![&[0x65, 0x88][..], &[0x06][..]]);
        assert_eq!(LengthPrefixedNalus::new(&[], 4).count(), 0);
    }
}
