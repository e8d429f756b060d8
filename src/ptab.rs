//! # Primary table
//!
//! The primary table stores one dictionary code per base pair. Codes are bit-packed
//! LSB-first: sample `i` occupies stream bits `[i * w, (i + 1) * w)`, and stream bit `k`
//! lives in byte `k / 8` at bit `k % 8`. The last byte is zero padded.
//!
//! Since a code is at most 16 bits wide and starts at most 7 bits into a byte, every code
//! fits in a 3-byte window, which is what [`read_code`] loads.

use std::sync::Arc;

use crate::dict::MAX_CODE_WIDTH;
use crate::error::{ReadError, Result};
use crate::stream::ByteStream;

/// Number of bytes needed to pack `samples` codes of `width` bits
#[must_use]
pub fn packed_len(samples: u64, width: u32) -> u64 {
    (samples * u64::from(width)).div_ceil(8)
}

/// Extracts the code starting at stream bit `bit`
///
/// Bytes past the end of `data` read as zero.
#[inline]
#[must_use]
pub fn read_code(data: &[u8], bit: usize, width: u32) -> u32 {
    let byte = bit / 8;
    let mut window = 0u32;
    for (i, b) in data.iter().skip(byte).take(3).enumerate() {
        window |= u32::from(*b) << (8 * i);
    }
    (window >> (bit % 8)) & ((1 << width) - 1)
}

/// Unpacks `out.len()` codes, the first one starting at stream bit `first_bit`
pub fn unpack_into(data: &[u8], first_bit: usize, width: u32, out: &mut [u32]) {
    let width_bits = width as usize;
    for (i, code) in out.iter_mut().enumerate() {
        *code = read_code(data, first_bit + i * width_bits, width);
    }
}

/// Packs a slice of codes into a new buffer
#[must_use]
pub fn pack(codes: &[u32], width: u32) -> Vec<u8> {
    let mut packer = BitPacker::new(width);
    for &code in codes {
        packer.push(code);
    }
    packer.finish()
}

/// Streaming LSB-first bit packer
///
/// Complete bytes accumulate in an output buffer that the caller drains with
/// [`BitPacker::take_bytes`]. Partial bytes stay in the accumulator until
/// [`BitPacker::finish`].
#[derive(Debug)]
pub struct BitPacker {
    width: u32,
    acc: u32,
    acc_bits: u32,
    out: Vec<u8>,
}
impl BitPacker {
    /// Creates a packer for codes of `width` bits (1 to 16)
    #[must_use]
    pub fn new(width: u32) -> Self {
        debug_assert!((1..=MAX_CODE_WIDTH).contains(&width));
        Self {
            width,
            acc: 0,
            acc_bits: 0,
            out: Vec::new(),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Appends one code
    #[inline]
    pub fn push(&mut self, code: u32) {
        self.acc |= (code & ((1 << self.width) - 1)) << self.acc_bits;
        self.acc_bits += self.width;
        while self.acc_bits >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.acc_bits -= 8;
        }
    }

    /// Appends `count` copies of one code
    ///
    /// Once the stream is byte aligned, eight codes fill exactly `width` bytes, so the
    /// bulk of the run is emitted as repeated `width`-byte blocks.
    pub fn push_repeat(&mut self, code: u32, mut count: u64) {
        while count > 0 && self.acc_bits != 0 {
            self.push(code);
            count -= 1;
        }
        if count >= 8 {
            let mut block = BitPacker::new(self.width);
            for _ in 0..8 {
                block.push(code);
            }
            let blocks = count / 8;
            self.out.reserve((blocks * u64::from(self.width)) as usize);
            for _ in 0..blocks {
                self.out.extend_from_slice(&block.out);
            }
            count %= 8;
        }
        for _ in 0..count {
            self.push(code);
        }
    }

    /// Number of complete bytes waiting in the output buffer
    #[must_use]
    pub fn pending(&self) -> usize {
        self.out.len()
    }

    /// Drains the complete bytes packed so far
    pub fn take_bytes(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    /// Flushes the partial byte and returns all remaining bytes
    #[must_use]
    pub fn finish(mut self) -> Vec<u8> {
        if self.acc_bits > 0 {
            self.out.push(self.acc as u8);
        }
        self.out
    }
}

/// Read view over the primary table chunk
#[derive(Clone)]
pub struct PrimaryTable {
    stream: Arc<dyn ByteStream>,

    /// Absolute offset of the chunk payload
    offset: u64,

    width: u32,
}
impl PrimaryTable {
    /// Wraps the primary table payload at `offset`
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::PrimarySizeMismatch`] if `len` disagrees with
    /// `total_samples` at the given width.
    pub fn new(
        stream: Arc<dyn ByteStream>,
        offset: u64,
        len: u64,
        width: u32,
        total_samples: u64,
    ) -> Result<Self> {
        let expected = packed_len(total_samples, width);
        if len != expected {
            return Err(ReadError::PrimarySizeMismatch { expected, got: len }.into());
        }
        Ok(Self {
            stream,
            offset,
            width,
        })
    }

    #[must_use]
    pub fn bit_width(&self) -> u32 {
        self.width
    }

    /// Decodes the codes of virtual positions `[start, start + out.len())`
    pub fn read_codes(&self, start: u64, out: &mut [u32]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        let width = u64::from(self.width);
        let first_bit = start * width;
        let end_bit = (start + out.len() as u64) * width;
        let first_byte = first_bit / 8;
        let end_byte = end_bit.div_ceil(8);

        let data = self
            .stream
            .read_vec(self.offset + first_byte, (end_byte - first_byte) as usize)?;
        unpack_into(&data, (first_bit % 8) as usize, self.width, out);
        Ok(())
    }
}

#[cfg(test)]
mod testing {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_lsb_first_layout() {
        // 3-bit codes 1, 2, 7 -> bits 001 010 111 from the LSB
        let bytes = pack(&[1, 2, 7], 3);
        assert_eq!(bytes, vec![0b1101_0001, 0b0000_0001]);
        assert_eq!(packed_len(3, 3), 2);
    }

    #[test]
    fn test_all_widths() {
        let mut rng = SmallRng::seed_from_u64(42);
        for width in 1..=16u32 {
            let mask = (1u32 << width) - 1;
            let codes: Vec<u32> = (0..1000).map(|_| rng.random::<u32>() & mask).collect();
            let bytes = pack(&codes, width);
            assert_eq!(bytes.len() as u64, packed_len(1000, width));

            let mut decoded = vec![0; codes.len()];
            unpack_into(&bytes, 0, width, &mut decoded);
            assert_eq!(decoded, codes, "width {width}");

            // Unaligned sub-range
            let mut part = vec![0; 17];
            let start = 333;
            unpack_into(&bytes, start * width as usize, width, &mut part);
            assert_eq!(part, codes[start..start + 17]);
        }
    }

    #[test]
    fn test_repeat_matches_push() {
        for width in [1, 3, 5, 8, 11, 16] {
            let code = (1 << width) - 2;
            let mut bulk = BitPacker::new(width);
            bulk.push(1);
            bulk.push_repeat(code, 1001);
            bulk.push(0);

            let mut single = BitPacker::new(width);
            single.push(1);
            for _ in 0..1001 {
                single.push(code);
            }
            single.push(0);
            assert_eq!(bulk.finish(), single.finish(), "width {width}");
        }
    }

    #[test]
    fn test_take_bytes() {
        let mut packer = BitPacker::new(4);
        packer.push(0xA);
        assert_eq!(packer.pending(), 0);
        packer.push(0x5);
        assert_eq!(packer.take_bytes(), vec![0x5A]);
        packer.push(0xF);
        assert_eq!(packer.finish(), vec![0x0F]);
    }

    #[test]
    fn test_primary_table_read() -> Result<()> {
        let codes: Vec<u32> = (0..100).map(|i| i % 8).collect();
        let bytes = pack(&codes, 3);
        let mut payload = vec![0xEE; 5];
        payload.extend_from_slice(&bytes);

        let len = bytes.len() as u64;
        let table = PrimaryTable::new(Arc::new(payload), 5, len, 3, 100)?;
        let mut out = vec![0; 10];
        table.read_codes(41, &mut out)?;
        assert_eq!(out, codes[41..51]);

        assert!(PrimaryTable::new(Arc::new(Vec::new()), 0, 3, 3, 100).is_err());
        Ok(())
    }
}
