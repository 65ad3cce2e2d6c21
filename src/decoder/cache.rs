//! Row caches shared by reconstruction, filtering and output.
//!
//! A [`RowSlot`] holds one macroblock row of samples below a prefix of
//! `extra_rows` lines. The prefix receives the still-unfinished bottom
//! lines of the previous row from the [`DelayLine`], so the loop filter
//! can work across the row boundary and the emitted range can lag the
//! decoded one by `extra_rows`.

use alloc::vec;
use alloc::vec::Vec;

/// One macroblock row of Y, U and V samples plus the filter prefix.
#[derive(Debug)]
pub(crate) struct RowSlot {
    pub(crate) y: Vec<u8>,
    pub(crate) u: Vec<u8>,
    pub(crate) v: Vec<u8>,
    pub(crate) y_stride: usize,
    pub(crate) uv_stride: usize,
    /// Luma lines above the macroblock row; chroma has half as many.
    pub(crate) extra_rows: usize,
}

impl RowSlot {
    pub(crate) fn new(mb_w: usize, extra_rows: usize) -> Self {
        let y_stride = 16 * mb_w;
        let uv_stride = 8 * mb_w;
        Self {
            y: vec![0; (extra_rows + 16) * y_stride],
            u: vec![0; (extra_rows / 2 + 8) * uv_stride],
            v: vec![0; (extra_rows / 2 + 8) * uv_stride],
            y_stride,
            uv_stride,
            extra_rows,
        }
    }

    /// Offset of the first luma line of the macroblock row.
    pub(crate) const fn y_top(&self) -> usize {
        self.extra_rows * self.y_stride
    }

    /// Offset of the first chroma line of the macroblock row.
    pub(crate) const fn uv_top(&self) -> usize {
        self.extra_rows / 2 * self.uv_stride
    }

    pub(crate) fn byte_size(mb_w: usize, extra_rows: usize) -> usize {
        (extra_rows + 16) * 16 * mb_w + 2 * (extra_rows / 2 + 8) * 8 * mb_w
    }
}

/// Bottom lines of the last finished row, waiting to be filtered against
/// the next row and emitted with it.
#[derive(Debug)]
pub(crate) struct DelayLine {
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

impl DelayLine {
    pub(crate) fn new(mb_w: usize, extra_rows: usize) -> Self {
        Self {
            y: vec![0; extra_rows * 16 * mb_w],
            u: vec![0; extra_rows / 2 * 8 * mb_w],
            v: vec![0; extra_rows / 2 * 8 * mb_w],
        }
    }

    /// Saves the bottom `extra_rows` lines of `slot`.
    pub(crate) fn store(&mut self, slot: &RowSlot) {
        let y_from = slot.y.len() - self.y.len();
        self.y.copy_from_slice(&slot.y[y_from..]);
        let uv_from = slot.u.len() - self.u.len();
        self.u.copy_from_slice(&slot.u[uv_from..]);
        self.v.copy_from_slice(&slot.v[uv_from..]);
    }

    /// Fills the prefix of `slot` with the saved lines.
    pub(crate) fn load(&self, slot: &mut RowSlot) {
        slot.y[..self.y.len()].copy_from_slice(&self.y);
        slot.u[..self.u.len()].copy_from_slice(&self.u);
        slot.v[..self.v.len()].copy_from_slice(&self.v);
    }
}
