//! VP8 boolean entropy decoder.
//!
//! The reader state is split from the bytes it reads. [`BitReader`] is a
//! small `Copy` value holding the arithmetic-coder registers and the
//! absolute `[pos, end)` window into whatever buffer backs the partition.
//! A [`BoolDecoder`] pairs that state with the buffer for the duration of
//! a parse. Because the state holds offsets instead of a borrowed slice it
//! can be snapshotted for rollback and shifted with [`BitReader::remap`]
//! when the backing buffer is compacted.

use byteorder_lite::{BigEndian, ByteOrder};

use crate::common::types::TreeNode;

/// Number of bits pulled in by a bulk load.
const BITS: i32 = 56;
/// Bytes consumed by a bulk load.
const BYTES_PER_LOAD: usize = 7;

/// Shift needed to bring a range back into [127, 254], indexed by range-1.
#[rustfmt::skip]
const LOG2_RANGE: [u8; 128] = [
      7,   6,   6,   5,   5,   5,   5,   4,   4,   4,   4,   4,   4,   4,   4,   3,
      3,   3,   3,   3,   3,   3,   3,   3,   3,   3,   3,   3,   3,   3,   3,   2,
      2,   2,   2,   2,   2,   2,   2,   2,   2,   2,   2,   2,   2,   2,   2,   2,
      2,   2,   2,   2,   2,   2,   2,   2,   2,   2,   2,   2,   2,   2,   2,   1,
      1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,
      1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,
      1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,
      1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   1,   0,
];

/// `((range + 1) << LOG2_RANGE[range]) - 1`
#[rustfmt::skip]
const NEW_RANGE: [u8; 128] = [
    127, 127, 191, 127, 159, 191, 223, 127, 143, 159, 175, 191, 207, 223, 239, 127,
    135, 143, 151, 159, 167, 175, 183, 191, 199, 207, 215, 223, 231, 239, 247, 127,
    131, 135, 139, 143, 147, 151, 155, 159, 163, 167, 171, 175, 179, 183, 187, 191,
    195, 199, 203, 207, 211, 215, 219, 223, 227, 231, 235, 239, 243, 247, 251, 127,
    129, 131, 133, 135, 137, 139, 141, 143, 145, 147, 149, 151, 153, 155, 157, 159,
    161, 163, 165, 167, 169, 171, 173, 175, 177, 179, 181, 183, 185, 187, 189, 191,
    193, 195, 197, 199, 201, 203, 205, 207, 209, 211, 213, 215, 217, 219, 221, 223,
    225, 227, 229, 231, 233, 235, 237, 239, 241, 243, 245, 247, 249, 251, 253, 127,
];

/// Registers of one boolean decoder plus its window into the backing buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BitReader {
    /// Current accumulated value
    value: u64,
    /// Current range minus 1. In [127, 254] interval.
    range: u32,
    /// Number of valid bits left
    bits: i32,
    /// Next byte to load
    pos: usize,
    /// One past the last byte of the partition
    end: usize,
    /// True if input is exhausted
    eof: bool,
}

impl Default for BitReader {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl BitReader {
    /// A reader over `[start, end)` of its backing buffer.
    ///
    /// Nothing is loaded until the first bit is requested, so a reader over
    /// an empty window only reports `eof` once it is actually read from.
    pub(crate) const fn new(start: usize, end: usize) -> Self {
        Self {
            value: 0,
            range: 255 - 1,
            // to load the very first 8 bits
            bits: -8,
            pos: start,
            end,
            eof: false,
        }
    }

    /// Shifts the window by `offset` bytes without touching the decode
    /// position inside the stream.
    pub(crate) fn remap(&mut self, offset: isize) {
        self.pos = self.pos.wrapping_add_signed(offset);
        self.end = self.end.wrapping_add_signed(offset);
    }

    /// Moves the end of the window, for partitions that grow as input arrives.
    pub(crate) fn set_end(&mut self, end: usize) {
        self.end = end;
    }

    /// Offset of the next unread byte in the backing buffer.
    pub(crate) const fn pos(&self) -> usize {
        self.pos
    }

    #[cfg(test)]
    pub(crate) const fn end(&self) -> usize {
        self.end
    }

    /// Bytes not yet pulled into the accumulator.
    pub(crate) const fn remaining(&self) -> usize {
        self.end.saturating_sub(self.pos)
    }

    #[cfg(test)]
    pub(crate) const fn is_eof(&self) -> bool {
        self.eof
    }

    /// Binds the reader to its backing buffer.
    #[inline(always)]
    pub(crate) fn attach<'a>(&'a mut self, buf: &'a [u8]) -> BoolDecoder<'a> {
        BoolDecoder { buf, br: self }
    }
}

/// A [`BitReader`] bound to the bytes it reads.
pub(crate) struct BoolDecoder<'a> {
    buf: &'a [u8],
    br: &'a mut BitReader,
}

impl BoolDecoder<'_> {
    #[cold]
    fn load_final_bytes(&mut self) {
        let br = &mut *self.br;
        // Only read 8bits at a time
        if br.pos < br.end {
            br.bits += 8;
            br.value = u64::from(self.buf[br.pos]) | (br.value << 8);
            br.pos += 1;
        } else if !br.eof {
            br.value <<= 8;
            br.bits += 8;
            br.eof = true;
        } else {
            // To avoid undefined behaviour with shifts.
            br.bits = 0;
        }
    }

    #[inline(always)]
    fn load_new_bytes(&mut self) {
        let br = &mut *self.br;
        // Read 'BITS' bits at a time if possible.
        if br.pos + 8 <= br.end {
            // Read 8 bytes as Big Endian and drop the last one.
            let in_bits = BigEndian::read_u64(&self.buf[br.pos..br.pos + 8]) >> 8;
            br.value = in_bits | (br.value << BITS);
            br.bits += BITS;
            br.pos += BYTES_PER_LOAD;
        } else {
            self.load_final_bytes();
        }
    }

    /// Read a bit with given probability (0-255).
    #[inline(always)]
    pub(crate) fn get_bit(&mut self, prob: u8) -> bool {
        if self.br.bits < 0 {
            self.load_new_bytes();
        }
        let br = &mut *self.br;
        let mut range = br.range;
        let pos = br.bits;
        let split = (range * u32::from(prob)) >> 8;
        let value = (br.value >> pos) as u32;
        let bit = value > split;

        if bit {
            range -= split + 1;
            br.value -= (u64::from(split) + 1) << pos;
        } else {
            range = split;
        }

        if range < 0x7f {
            let idx = range as usize;
            br.bits -= i32::from(LOG2_RANGE[idx]);
            range = u32::from(NEW_RANGE[idx]);
        }
        br.range = range;
        bit
    }

    /// Read a bit with probability 128 (50/50).
    #[inline(always)]
    pub(crate) fn get_flag(&mut self) -> bool {
        self.get_bit(0x80)
    }

    /// Negates `v` when the next even-odds bit is set.
    #[inline(always)]
    pub(crate) fn get_signed(&mut self, v: i32) -> i32 {
        if self.get_flag() {
            -v
        } else {
            v
        }
    }

    /// Read n bits as an unsigned value (MSB first)
    #[inline]
    pub(crate) fn get_value(&mut self, n: u8) -> u32 {
        let mut v = 0u32;
        for _ in 0..n {
            v = (v << 1) | u32::from(self.get_flag());
        }
        v
    }

    /// Read n bits of magnitude followed by a sign bit.
    pub(crate) fn get_signed_value(&mut self, n: u8) -> i32 {
        let value = self.get_value(n) as i32;
        self.get_signed(value)
    }

    /// Read optional signed value (flag + magnitude + sign)
    pub(crate) fn get_optional_signed(&mut self, n: u8) -> i32 {
        if !self.get_flag() {
            return 0;
        }
        self.get_signed_value(n)
    }

    /// Read from a probability tree.
    /// The tree uses bit 0x80 to indicate leaf values.
    #[inline]
    pub(crate) fn read_tree(&mut self, tree: &[TreeNode]) -> i8 {
        let mut node = tree[0];
        loop {
            let i = if self.get_bit(node.prob) { node.right } else { node.left };
            let Some(next_node) = tree.get(usize::from(i)) else {
                return TreeNode::value_from_branch(i);
            };
            node = *next_node;
        }
    }

    pub(crate) fn is_eof(&self) -> bool {
        self.br.eof
    }
}
