//! A small cursor over a byte slice for the fixed-layout headers.
//!
//! Reads return `None` once the slice is exhausted, leaving the caller to
//! decide whether that means "wait for more data" or "truncated input".

use byteorder_lite::{ByteOrder, LittleEndian};
use core::fmt;

/// A reader that wraps a byte slice and tracks the current position.
#[derive(Clone)]
pub(crate) struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    #[inline]
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Returns the number of bytes remaining from the current position.
    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub(crate) fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    #[inline]
    pub(crate) fn read_u16_le(&mut self) -> Option<u16> {
        self.take(2).map(LittleEndian::read_u16)
    }

    #[inline]
    pub(crate) fn read_u24_le(&mut self) -> Option<u32> {
        self.take(3).map(LittleEndian::read_u24)
    }

    /// Takes `n` bytes from the current position without copying.
    #[inline]
    pub(crate) fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    /// The unread bytes.
    #[inline]
    pub(crate) fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

impl fmt::Debug for SliceReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SliceReader")
            .field("len", &self.data.len())
            .field("pos", &self.pos)
            .finish()
    }
}
