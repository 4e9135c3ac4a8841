use std::fmt::{Debug, Formatter};
use crate::bits::bit_vector::BitVector;
use crate::error::{RudpError, RudpResult};

/// A bit-granular writer backed by a fixed-length, pre-allocated buffer. Writers are reused
///  across packets: [BitWriter::clear] resets the position without giving up the allocation.
///
/// Bits are written in little-endian bit order: the lowest bit of a value goes to the lowest
///  free bit position, and bit position `n` lives in bit `n % 8` of byte `n / 8`. For
///  byte-aligned writes, this yields plain little-endian byte order.
pub struct BitWriter {
    // invariant: all bytes at or after the current byte position are zero
    buf: Vec<u8>,
    bit_pos: usize,
}

impl BitWriter {
    /// create a new writer with the given capacity in bytes
    pub fn new(capacity: usize) -> BitWriter {
        BitWriter {
            buf: vec![0; capacity],
            bit_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn bit_position(&self) -> usize {
        self.bit_pos
    }

    pub fn remaining_bits(&self) -> usize {
        self.buf.len() * 8 - self.bit_pos
    }

    pub fn clear(&mut self) {
        let used = self.bit_pos.div_ceil(8);
        self.buf[..used].fill(0);
        self.bit_pos = 0;
    }

    fn ensure_capacity(&self, num_bits: usize) -> RudpResult<()> {
        if num_bits > self.remaining_bits() {
            return Err(RudpError::Capacity {
                requested_bits: num_bits,
                available_bits: self.remaining_bits(),
            });
        }
        Ok(())
    }

    pub fn write_bit(&mut self, value: bool) -> RudpResult<()> {
        self.ensure_capacity(1)?;
        if value {
            self.buf[self.bit_pos / 8] |= 1 << (self.bit_pos % 8);
        }
        self.bit_pos += 1;
        Ok(())
    }

    /// writes the lowest `num_bits` bits of `value`
    pub fn write_bits(&mut self, value: u64, num_bits: usize) -> RudpResult<()> {
        assert!(num_bits <= 64, "at most 64 bits can be written at a time, requested {}", num_bits);
        self.ensure_capacity(num_bits)?;

        let mut value = value;
        let mut remaining = num_bits;
        while remaining > 0 {
            let bit_offs = self.bit_pos % 8;
            let chunk_len = remaining.min(8 - bit_offs);
            let chunk = (value & ((1u64 << chunk_len) - 1)) as u8;

            self.buf[self.bit_pos / 8] |= chunk << bit_offs;

            value >>= chunk_len;
            remaining -= chunk_len;
            self.bit_pos += chunk_len;
        }
        Ok(())
    }

    pub fn write_bit_vector(&mut self, bits: &BitVector) -> RudpResult<()> {
        self.ensure_capacity(bits.len())?;
        for b in bits.iter() {
            self.write_bit(b)?;
        }
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> RudpResult<()> {
        self.write_bits(value as u64, 8)
    }

    pub fn write_u16(&mut self, value: u16) -> RudpResult<()> {
        self.write_bits(value as u64, 16)
    }

    pub fn write_i16(&mut self, value: i16) -> RudpResult<()> {
        self.write_u16(value as u16)
    }

    pub fn write_u32(&mut self, value: u32) -> RudpResult<()> {
        self.write_bits(value as u64, 32)
    }

    pub fn write_i32(&mut self, value: i32) -> RudpResult<()> {
        self.write_u32(value as u32)
    }

    pub fn write_u64(&mut self, value: u64) -> RudpResult<()> {
        self.write_bits(value, 64)
    }

    pub fn write_i64(&mut self, value: i64) -> RudpResult<()> {
        self.write_u64(value as u64)
    }

    pub fn write_f32(&mut self, value: f32) -> RudpResult<()> {
        self.write_u32(value.to_bits())
    }

    pub fn write_f64(&mut self, value: f64) -> RudpResult<()> {
        self.write_u64(value.to_bits())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> RudpResult<()> {
        self.ensure_capacity(data.len() * 8)?;

        if self.bit_pos % 8 == 0 {
            let start = self.bit_pos / 8;
            self.buf[start..start + data.len()].copy_from_slice(data);
            self.bit_pos += data.len() * 8;
        }
        else {
            for &b in data {
                self.write_bits(b as u64, 8)?;
            }
        }
        Ok(())
    }

    /// advance to the next byte boundary, leaving the skipped bits zero
    pub fn pad_bits(&mut self) {
        self.bit_pos = self.bit_pos.div_ceil(8) * 8;
    }

    /// the bytes written so far, including a partially written last byte
    pub fn get_bytes(&self) -> &[u8] {
        &self.buf[..self.bit_pos.div_ceil(8)]
    }
}

impl Debug for BitWriter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "BitWriter{{{}/{} bits: {:?}}}", self.bit_pos, self.buf.len() * 8, self.get_bytes())
    }
}
