//! Bit-level packing helpers.
//!
//! Headers are laid out MSB-first with no padding between fields. The writer
//! rejects values that overflow their field width; the reader reports how
//! many bits were missing when the input runs out.

use crate::core::PayloadError;

/// MSB-first bit writer.
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with room for `bytes` bytes.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            bit_len: 0,
        }
    }

    /// Append the low `bits` bits of `value`.
    ///
    /// Fails if `value` does not fit in `bits` bits.
    pub fn write(&mut self, field: &'static str, value: u32, bits: u8) -> Result<(), PayloadError> {
        debug_assert!(bits <= 32);
        if bits < 32 && value >> bits != 0 {
            return Err(PayloadError::FieldOutOfRange { field, value, bits });
        }
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(())
    }

    /// Append a single flag bit.
    pub fn write_flag(&mut self, flag: bool) {
        self.push_bit(flag);
    }

    /// Append whole bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        if self.bit_len % 8 == 0 {
            self.bytes.extend_from_slice(data);
            self.bit_len += data.len() * 8;
        } else {
            for &b in data {
                for i in (0..8).rev() {
                    self.push_bit((b >> i) & 1 == 1);
                }
            }
        }
    }

    /// Number of bits written so far.
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Finish writing. Fails unless a whole number of bytes was written.
    pub fn finish(self) -> Result<Vec<u8>, PayloadError> {
        if self.bit_len % 8 != 0 {
            return Err(PayloadError::BitLength(self.bit_len));
        }
        Ok(self.bytes)
    }

    fn push_bit(&mut self, bit: bool) {
        let offset = self.bit_len % 8;
        if offset == 0 {
            self.bytes.push(0);
        }
        if bit {
            if let Some(last) = self.bytes.last_mut() {
                *last |= 0x80 >> offset;
            }
        }
        self.bit_len += 1;
    }
}

/// MSB-first bit reader over a byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Create a reader at the first bit of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bits left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    /// Read `bits` bits as an unsigned value.
    pub fn read(&mut self, bits: u8) -> Result<u32, PayloadError> {
        debug_assert!(bits <= 32);
        self.ensure(bits as usize)?;
        let mut value = 0u32;
        for _ in 0..bits {
            let byte = self.data[self.pos / 8];
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | u32::from(bit);
            self.pos += 1;
        }
        Ok(value)
    }

    /// Read a field of at most 8 bits.
    pub fn read_u8(&mut self, bits: u8) -> Result<u8, PayloadError> {
        debug_assert!(bits <= 8);
        // Fits by construction.
        Ok(self.read(bits)? as u8)
    }

    /// Read a single flag bit.
    pub fn read_flag(&mut self) -> Result<bool, PayloadError> {
        Ok(self.read(1)? == 1)
    }

    /// Read `len` whole bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, PayloadError> {
        self.ensure(len * 8)?;
        if self.pos % 8 == 0 {
            let start = self.pos / 8;
            self.pos += len * 8;
            return Ok(self.data[start..start + len].to_vec());
        }
        (0..len).map(|_| self.read_u8(8)).collect()
    }

    fn ensure(&self, bits: usize) -> Result<(), PayloadError> {
        if self.remaining() < bits {
            return Err(PayloadError::Truncated {
                expected: self.pos + bits,
                actual: self.data.len() * 8,
            });
        }
        Ok(())
    }
}

/// Pack a string of `'0'`/`'1'` characters into bytes.
///
/// Fails with [`PayloadError::BitLength`] if the length is not a multiple
/// of 8. Any character other than `'1'` counts as a zero bit.
pub fn bits_to_bytes(bits: &str) -> Result<Vec<u8>, PayloadError> {
    if bits.len() % 8 != 0 {
        return Err(PayloadError::BitLength(bits.len()));
    }
    Ok(bits
        .as_bytes()
        .chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &c| (acc << 1) | u8::from(c == b'1')))
        .collect())
}

/// Render bytes as a string of `'0'`/`'1'` characters.
pub fn bytes_to_bits(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:08b}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_fields() {
        let mut w = BitWriter::new();
        w.write("a", 0b101, 3).unwrap();
        w.write_flag(true);
        w.write("b", 0xAB, 8).unwrap();
        w.write("c", 0x3, 4).unwrap();
        assert_eq!(w.bit_len(), 16);
        let bytes = w.finish().unwrap();
        assert_eq!(bytes, vec![0b1011_1010, 0b1011_0011]);

        let mut r = BitReader::new(&bytes);
        assert_eq!(r.read(3).unwrap(), 0b101);
        assert!(r.read_flag().unwrap());
        assert_eq!(r.read_u8(8).unwrap(), 0xAB);
        assert_eq!(r.read(4).unwrap(), 3);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_field_overflow() {
        let mut w = BitWriter::new();
        let err = w.write("address", 16, 4).unwrap_err();
        assert_eq!(
            err,
            PayloadError::FieldOutOfRange {
                field: "address",
                value: 16,
                bits: 4
            }
        );
    }

    #[test]
    fn test_finish_rejects_partial_byte() {
        let mut w = BitWriter::new();
        w.write("x", 1, 3).unwrap();
        assert_eq!(w.finish().unwrap_err(), PayloadError::BitLength(3));
    }

    #[test]
    fn test_unaligned_bytes() {
        let mut w = BitWriter::new();
        w.write("nibble", 0xF, 4).unwrap();
        w.write_bytes(&[0x12]);
        w.write("nibble", 0x0, 4).unwrap();
        let bytes = w.finish().unwrap();
        assert_eq!(bytes, vec![0xF1, 0x20]);

        let mut r = BitReader::new(&bytes);
        r.read(4).unwrap();
        assert_eq!(r.read_bytes(1).unwrap(), vec![0x12]);
    }

    #[test]
    fn test_truncated_read() {
        let mut r = BitReader::new(&[0xFF]);
        r.read(6).unwrap();
        assert_eq!(
            r.read(4).unwrap_err(),
            PayloadError::Truncated {
                expected: 10,
                actual: 8
            }
        );
    }

    #[test]
    fn test_bit_strings() {
        assert_eq!(bits_to_bytes("0000000111111111").unwrap(), vec![0x01, 0xFF]);
        assert_eq!(bytes_to_bits(&[0x01, 0xFF]), "0000000111111111");
        assert_eq!(bits_to_bytes("0101").unwrap_err(), PayloadError::BitLength(4));
    }
}
