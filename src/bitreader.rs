//! A bit-level cursor over a byte slice, with the Exp-Golomb decoding used throughout H.264
//! parameter sets.

/// Reading failed because the data ran out.
#[derive(Debug, PartialEq, Eq)]
pub enum BitReaderError {
    /// `requested` more bits were needed, but only `available` remained
    EndOfBuffer { requested: u32, available: usize },
    /// An Exp-Golomb code had more leading zeros than fit in 32 bits
    ExpGolombTooLarge { leading_zeros: u32 },
    /// More than 32 bits were requested from `read_bits()`
    TooManyBits(u32),
}

/// Reads bits most-significant-first.
pub struct BitReader<'buf> {
    buf: &'buf [u8],
    // position in bits from the start of buf
    pos: usize,
}

impl<'buf> BitReader<'buf> {
    pub fn new(buf: &'buf [u8]) -> BitReader<'buf> {
        BitReader { buf, pos: 0 }
    }

    pub fn bits_remaining(&self) -> usize {
        self.buf.len() * 8 - self.pos
    }

    /// The current position, in bits from the start of the buffer
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.pos % 8 == 0
    }

    fn check(&self, bits: u32) -> Result<(), BitReaderError> {
        if bits as usize > self.bits_remaining() {
            Err(BitReaderError::EndOfBuffer {
                requested: bits,
                available: self.bits_remaining(),
            })
        } else {
            Ok(())
        }
    }

    pub fn read_bit(&mut self) -> Result<bool, BitReaderError> {
        self.check(1)?;
        let byte = self.buf[self.pos / 8];
        let bit = byte >> (7 - (self.pos % 8)) & 1;
        self.pos += 1;
        Ok(bit != 0)
    }

    /// Read up to 32 bits as an unsigned value.
    pub fn read_bits(&mut self, count: u32) -> Result<u32, BitReaderError> {
        if count > 32 {
            return Err(BitReaderError::TooManyBits(count));
        }
        self.check(count)?;
        let mut value = 0u32;
        let mut remaining = count;
        while remaining > 0 {
            let bit_offset = (self.pos % 8) as u32;
            let available = 8 - bit_offset;
            let take = available.min(remaining);
            let byte = u32::from(self.buf[self.pos / 8]);
            let bits = (byte >> (available - take)) & ((1 << take) - 1);
            value = value << take | bits;
            self.pos += take as usize;
            remaining -= take;
        }
        Ok(value)
    }

    pub fn read_u8(&mut self, count: u32) -> Result<u8, BitReaderError> {
        assert!(count <= 8);
        self.read_bits(count).map(|v| v as u8)
    }

    pub fn skip_bits(&mut self, count: usize) -> Result<(), BitReaderError> {
        if count > self.bits_remaining() {
            return Err(BitReaderError::EndOfBuffer {
                requested: count.min(u32::MAX as usize) as u32,
                available: self.bits_remaining(),
            });
        }
        self.pos += count;
        Ok(())
    }

    /// Unsigned Exp-Golomb code, `ue(v)` in the H.264 syntax tables.
    pub fn read_ue(&mut self) -> Result<u32, BitReaderError> {
        let mut leading_zeros = 0u32;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(BitReaderError::ExpGolombTooLarge { leading_zeros });
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + u64::from(suffix)) as u32)
    }

    /// Signed Exp-Golomb code, `se(v)` in the H.264 syntax tables.
    ///
    /// Odd code numbers map to positive values, even to negative: 1, -1, 2, -2, ...
    pub fn read_se(&mut self) -> Result<i32, BitReaderError> {
        let code = i64::from(self.read_ue()?);
        Ok(if code % 2 == 1 {
            ((code + 1) / 2) as i32
        } else {
            (-(code / 2)) as i32
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use bitstream_io::{BigEndian, BitWrite, BitWriter};

    #[test]
    fn bits_across_bytes() {
        let data = [0b1010_1100, 0b0101_0011];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_bit(), Ok(true));
        assert_eq!(r.read_bits(3), Ok(0b010));
        assert_eq!(r.read_bits(8), Ok(0b1100_0101));
        assert_eq!(r.bits_remaining(), 4);
        assert_eq!(r.read_bits(4), Ok(0b0011));
        assert_matches!(
            r.read_bit(),
            Err(BitReaderError::EndOfBuffer {
                requested: 1,
                available: 0
            })
        );
    }

    #[test]
    fn read_32() {
        let data = [0xde, 0xad, 0xbe, 0xef, 0x01];
        let mut r = BitReader::new(&data);
        r.skip_bits(4).unwrap();
        assert_eq!(r.read_bits(32), Ok(0xeadbeef0));
        assert_eq!(r.read_bits(33), Err(BitReaderError::TooManyBits(33)));
    }

    #[test]
    fn exp_golomb() {
        // ue values 0, 1, 2, 3, 7 then se values 1, -1, 2
        let mut w = BitWriter::endian(Vec::new(), BigEndian);
        for code in ["1", "010", "011", "00100", "0001000", "010", "011", "00100"] {
            for c in code.chars() {
                w.write_bit(c == '1').unwrap();
            }
        }
        w.byte_align().unwrap();
        let data = w.into_writer();
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_ue(), Ok(0));
        assert_eq!(r.read_ue(), Ok(1));
        assert_eq!(r.read_ue(), Ok(2));
        assert_eq!(r.read_ue(), Ok(3));
        assert_eq!(r.read_ue(), Ok(7));
        assert_eq!(r.read_se(), Ok(1));
        assert_eq!(r.read_se(), Ok(-1));
        assert_eq!(r.read_se(), Ok(2));
    }

    #[test]
    fn exp_golomb_truncated() {
        let data = [0b0000_0001];
        let mut r = BitReader::new(&data);
        assert_matches!(r.read_ue(), Err(BitReaderError::EndOfBuffer { .. }));
    }

    #[test]
    fn exp_golomb_all_zeros() {
        let data = [0u8; 8];
        let mut r = BitReader::new(&data);
        assert_matches!(
            r.read_ue(),
            Err(BitReaderError::ExpGolombTooLarge { .. })
        );
    }
}
