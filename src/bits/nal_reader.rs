//! Bit reader for NAL unit payloads
//!
//! Parameter sets carry emulation-prevention bytes: an encoder inserts `0x03`
//! after two zero bytes whenever the next byte is `<= 0x03`. Exp-Golomb and
//! fixed-width reads must see the unescaped RBSP, so this reader drops every
//! `00 00 03` escape byte as it crosses it.

use super::reader::ReadBits;
use crate::error::MediaError;

/// Bit reader that skips emulation-prevention bytes on the fly
#[derive(Debug, Clone)]
pub struct NalUnitBitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
    zero_run: u8,
    skipped: usize,
}

impl<'a> NalUnitBitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
            zero_run: 0,
            skipped: 0,
        }
    }

    /// Number of emulation-prevention bytes skipped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Whether every byte of the payload has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.byte_pos >= self.data.len()
    }

    fn skip_emulation_byte(&mut self) {
        if self.zero_run < 2 || self.data.get(self.byte_pos) != Some(&0x03) {
            return;
        }

        match self.data.get(self.byte_pos + 1) {
            None | Some(0x00..=0x03) => {
                self.byte_pos += 1;
                self.zero_run = 0;
                self.skipped += 1;
            }
            Some(_) => {}
        }
    }
}

impl ReadBits for NalUnitBitReader<'_> {
    fn read_bit(&mut self) -> Result<bool, MediaError> {
        if self.bit_pos == 0 {
            self.skip_emulation_byte();
        }

        let byte = *self.data.get(self.byte_pos).ok_or(MediaError::Truncated)?;

        let bit = (byte >> (7 - self.bit_pos)) & 1;
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
            self.zero_run = if byte == 0 {
                self.zero_run.saturating_add(1)
            } else {
                0
            };
        }

        Ok(bit != 0)
    }
}
