//! MSB-first bit reader

use crate::error::MediaError;

/// Bit-level reads shared by every reader in this module.
///
/// Implementors only provide [`read_bit`](Self::read_bit); fixed-width and
/// Exp-Golomb reads are built on top of it.
pub trait ReadBits {
    /// Read a single bit
    fn read_bit(&mut self) -> Result<bool, MediaError>;

    /// Read up to 32 bits as an unsigned big-endian value
    fn read_bits(&mut self, n: u8) -> Result<u32, MediaError> {
        if n > 32 {
            return Err(MediaError::InvalidData("cannot read more than 32 bits at once"));
        }

        let mut value: u32 = 0;
        for _ in 0..n {
            value = (value << 1) | u32::from(self.read_bit()?);
        }
        Ok(value)
    }

    /// Read an unsigned Exp-Golomb value, ue(v)
    fn read_ue(&mut self) -> Result<u32, MediaError> {
        let mut leading_zeros = 0u8;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(MediaError::InvalidData("exp-golomb value overflows 32 bits"));
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + u64::from(suffix)) as u32)
    }

    /// Read a signed Exp-Golomb value, se(v)
    fn read_se(&mut self) -> Result<i32, MediaError> {
        let ue = i64::from(self.read_ue()?);
        let magnitude = (ue + 1) / 2;
        Ok(if ue % 2 == 0 {
            -magnitude as i32
        } else {
            magnitude as i32
        })
    }

    fn read_u8(&mut self) -> Result<u8, MediaError> {
        self.read_bits(8).map(|v| v as u8)
    }

    fn read_u16(&mut self) -> Result<u16, MediaError> {
        self.read_bits(16).map(|v| v as u16)
    }

    fn read_u32(&mut self) -> Result<u32, MediaError> {
        self.read_bits(32)
    }

    /// Discard `n` bits
    fn skip_bits(&mut self, n: usize) -> Result<(), MediaError> {
        for _ in 0..n {
            self.read_bit()?;
        }
        Ok(())
    }
}

/// Bit reader over a byte slice
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    /// Current position in bits
    pub fn position(&self) -> usize {
        self.byte_pos * 8 + self.bit_pos as usize
    }

    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position())
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bit_pos == 0
    }

    /// Bytes from the next byte boundary onward
    pub fn remaining_bytes(&self) -> &'a [u8] {
        let start = if self.bit_pos == 0 {
            self.byte_pos
        } else {
            self.byte_pos + 1
        };
        self.data.get(start..).unwrap_or(&[])
    }
}

impl ReadBits for BitReader<'_> {
    fn read_bit(&mut self) -> Result<bool, MediaError> {
        let byte = *self.data.get(self.byte_pos).ok_or(MediaError::Truncated)?;

        let bit = (byte >> (7 - self.bit_pos)) & 1;
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }

        Ok(bit != 0)
    }

    fn read_bits(&mut self, n: u8) -> Result<u32, MediaError> {
        if n > 32 {
            return Err(MediaError::InvalidData("cannot read more than 32 bits at once"));
        }
        // Fail before consuming anything so a short read leaves the cursor alone
        if self.remaining_bits() < n as usize {
            return Err(MediaError::Truncated);
        }

        let mut value: u32 = 0;
        for _ in 0..n {
            value = (value << 1) | u32::from(self.read_bit()?);
        }
        Ok(value)
    }

    fn skip_bits(&mut self, n: usize) -> Result<(), MediaError> {
        if self.remaining_bits() < n {
            return Err(MediaError::Truncated);
        }
        let pos = self.position() + n;
        self.byte_pos = pos / 8;
        self.bit_pos = (pos % 8) as u8;
        Ok(())
    }
}
