//! MSB-first bit writer

use bytes::{Bytes, BytesMut};

#[derive(Debug, Default)]
pub struct BitWriter {
    buf: BytesMut,
    bit_pos: u8,
}

impl BitWriter {
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(bytes),
            bit_pos: 0,
        }
    }

    pub fn write_bit(&mut self, bit: bool) {
        if self.bit_pos == 0 {
            self.buf.extend_from_slice(&[0]);
        }
        if bit {
            let last = self.buf.len() - 1;
            self.buf[last] |= 0x80 >> self.bit_pos;
        }
        self.bit_pos = (self.bit_pos + 1) % 8;
    }

    /// Write the low `n` bits of `value`, most significant first
    pub fn write_bits(&mut self, n: u8, value: u32) {
        for i in (0..n.min(32)).rev() {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    /// Write an unsigned Exp-Golomb value, ue(v)
    pub fn write_ue(&mut self, value: u32) {
        let code = u64::from(value) + 1;
        let bits = 63 - code.leading_zeros() as u8;
        self.write_bits(bits, 0);
        for i in (0..=bits).rev() {
            self.write_bit((code >> i) & 1 != 0);
        }
    }

    /// Number of bytes touched so far (the last one may be partial)
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
