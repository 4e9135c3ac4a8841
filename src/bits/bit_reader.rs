use bytes::Bytes;
use crate::bits::bit_vector::BitVector;
use crate::error::{RudpError, RudpResult};

/// Reads bits from a byte slice in the order they were written by a
///  [BitWriter](crate::bits::bit_writer::BitWriter).
pub struct BitReader<'a> {
    buf: &'a [u8],
    bit_pos: usize,
}

impl <'a> BitReader<'a> {
    pub fn new(buf: &'a [u8]) -> BitReader<'a> {
        BitReader {
            buf,
            bit_pos: 0,
        }
    }

    pub fn bit_position(&self) -> usize {
        self.bit_pos
    }

    pub fn bit_len(&self) -> usize {
        self.buf.len() * 8
    }

    pub fn remaining_bits(&self) -> usize {
        self.bit_len() - self.bit_pos
    }

    pub fn is_at_end(&self) -> bool {
        self.bit_pos == self.bit_len()
    }

    fn ensure_available(&self, num_bits: usize) -> RudpResult<()> {
        if num_bits > self.remaining_bits() {
            return Err(RudpError::Format {
                requested_bits: num_bits,
                available_bits: self.remaining_bits(),
            });
        }
        Ok(())
    }

    pub fn read_bit(&mut self) -> RudpResult<bool> {
        self.ensure_available(1)?;
        let result = self.buf[self.bit_pos / 8] & (1 << (self.bit_pos % 8)) != 0;
        self.bit_pos += 1;
        Ok(result)
    }

    pub fn read_bits(&mut self, num_bits: usize) -> RudpResult<u64> {
        assert!(num_bits <= 64, "at most 64 bits can be read at a time, requested {}", num_bits);
        self.ensure_available(num_bits)?;

        let mut result = 0u64;
        let mut done = 0;
        while done < num_bits {
            let bit_offs = self.bit_pos % 8;
            let chunk_len = (num_bits - done).min(8 - bit_offs);
            let chunk = (self.buf[self.bit_pos / 8] >> bit_offs) as u64 & ((1u64 << chunk_len) - 1);

            result |= chunk << done;

            done += chunk_len;
            self.bit_pos += chunk_len;
        }
        Ok(result)
    }

    pub fn read_bit_vector(&mut self, len: usize) -> RudpResult<BitVector> {
        self.ensure_available(len)?;
        let mut result = BitVector::new(len);
        for i in 0..len {
            if self.read_bit()? {
                result.set(i);
            }
        }
        Ok(result)
    }

    pub fn read_u8(&mut self) -> RudpResult<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    pub fn read_u16(&mut self) -> RudpResult<u16> {
        Ok(self.read_bits(16)? as u16)
    }

    pub fn read_i16(&mut self) -> RudpResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> RudpResult<u32> {
        Ok(self.read_bits(32)? as u32)
    }

    pub fn read_i32(&mut self) -> RudpResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> RudpResult<u64> {
        self.read_bits(64)
    }

    pub fn read_i64(&mut self) -> RudpResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> RudpResult<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> RudpResult<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bytes_into(&mut self, target: &mut [u8]) -> RudpResult<()> {
        self.ensure_available(target.len() * 8)?;

        if self.bit_pos % 8 == 0 {
            let start = self.bit_pos / 8;
            target.copy_from_slice(&self.buf[start..start + target.len()]);
            self.bit_pos += target.len() * 8;
        }
        else {
            for b in target.iter_mut() {
                *b = self.read_bits(8)? as u8;
            }
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> RudpResult<Bytes> {
        self.ensure_available(len * 8)?;

        if self.bit_pos % 8 == 0 {
            let start = self.bit_pos / 8;
            self.bit_pos += len * 8;
            return Ok(Bytes::copy_from_slice(&self.buf[start..start + len]));
        }

        let mut result = vec![0; len];
        self.read_bytes_into(&mut result)?;
        Ok(result.into())
    }

    /// skip to the next byte boundary
    pub fn pad_bits(&mut self) {
        self.bit_pos = self.bit_pos.div_ceil(8) * 8;
    }
}
