//! Chroma dithering for heavily quantized frames.
//!
//! Flat chroma blocks are perturbed with low-amplitude noise from a
//! subtractive lagged-Fibonacci generator, which hides banding.

use core::ops::Range;

use super::cache::RowSlot;
use super::header::QuantMatrix;
use super::parser::MbData;

const QUANT_TO_DITHER_AMP: [i32; 12] = [8, 7, 6, 4, 4, 2, 2, 2, 1, 1, 1, 1];

/// Macroblocks with a smaller amplitude are left alone.
const MIN_DITHER_AMP: u8 = 4;

const RANDOM_DITHER_FIX: u32 = 8;
const DITHER_AMP_BITS: u32 = 7;
const DITHER_DESCALE: u32 = 4;

const RANDOM_TABLE_SIZE: usize = 55;

const RANDOM_TABLE: [u32; RANDOM_TABLE_SIZE] = [
    0x0de1_5230, 0x03b3_1886, 0x775f_accb, 0x1c88_626a, 0x6838_5c55, 0x14b3_b828, 0x4a85_fef8,
    0x49dd_b84b, 0x64fc_f397, 0x5c55_0289, 0x4a29_0000, 0x0d7e_c1da, 0x5940_b7ab, 0x5492_577d,
    0x4e19_ca72, 0x38d3_8c69, 0x0c01_ee65, 0x32a1_755f, 0x5437_f652, 0x5abb_2c32, 0x0faa_57b1,
    0x73f5_33e7, 0x685f_eeda, 0x7563_cce2, 0x6e99_0e83, 0x4730_a7ed, 0x4fc0_d9c6, 0x496b_153c,
    0x4f14_03fa, 0x133b_9cc8, 0x0e3d_0ab4, 0x1125_e9d9, 0x19d8_7bb9, 0x1b0a_b6b4, 0x3cd4_ddd5,
    0x1cd6_f45b, 0x7ce8_3e0f, 0x4e10_86bb, 0x49f3_d2cb, 0x3b00_be60, 0x3e8f_8e5b, 0x5b0e_8c13,
    0x70b7_bc8e, 0x6fc4_bcd8, 0x1f70_ca8d, 0x1ad9_e3dc, 0x5e5c_5de1, 0x5f2c_3d0b, 0x37ec_1af9,
    0x1e6b_40d0, 0x5b04_f05a, 0x4c7a_6f06, 0x2e66_c3be, 0x6cc7_cf80, 0x1ce0_bfa5,
];

/// Sets the per-segment dithering amplitude from a 0..=100 strength.
///
/// Returns whether any segment ends up dithered.
pub(crate) fn init_dithering(strength: u8, quant: &mut [QuantMatrix]) -> bool {
    let max_amp = (1 << RANDOM_DITHER_FIX) - 1;
    let f = i32::from(strength.min(100)) * max_amp / 100;
    if f == 0 {
        return false;
    }
    let mut all_amp = 0;
    for q in quant.iter_mut() {
        if q.uv_quant < QUANT_TO_DITHER_AMP.len() as i32 {
            let idx = q.uv_quant.max(0) as usize;
            q.dither = (f * QUANT_TO_DITHER_AMP[idx]) >> 3;
        }
        all_amp |= q.dither;
    }
    all_amp != 0
}

/// Knuth's subtractive generator, section 3.6 of TAOCP vol. 2.
#[derive(Clone, Debug)]
pub(crate) struct DitherRng {
    index1: usize,
    index2: usize,
    table: [u32; RANDOM_TABLE_SIZE],
}

impl Default for DitherRng {
    fn default() -> Self {
        Self {
            index1: 0,
            index2: 31,
            table: RANDOM_TABLE,
        }
    }
}

impl DitherRng {
    /// Returns a `num_bits` value centred on `1 << (num_bits - 1)`, with its
    /// spread scaled by `amp / 256`.
    fn bits(&mut self, num_bits: u32, amp: i32) -> i32 {
        let mut diff = self.table[self.index1].wrapping_sub(self.table[self.index2]);
        if diff & 0x8000_0000 != 0 {
            diff = diff.wrapping_add(1 << 31);
        }
        self.table[self.index1] = diff;
        self.index1 += 1;
        if self.index1 == RANDOM_TABLE_SIZE {
            self.index1 = 0;
        }
        self.index2 += 1;
        if self.index2 == RANDOM_TABLE_SIZE {
            self.index2 = 0;
        }
        // Sign-extend, then scale around zero.
        let centred = ((diff << 1) as i32) >> (32 - num_bits);
        let scaled = (centred * amp) >> RANDOM_DITHER_FIX;
        scaled + (1 << (num_bits - 1))
    }

    fn dither_block(&mut self, plane: &mut [u8], pos: usize, stride: usize, amp: i32) {
        let mut noise = [0i32; 64];
        for n in noise.iter_mut() {
            *n = self.bits(DITHER_AMP_BITS + 1, amp);
        }
        let center = 1 << DITHER_AMP_BITS;
        let rounder = 1 << (DITHER_DESCALE - 1);
        for (j, row) in noise.chunks_exact(8).enumerate() {
            let line = &mut plane[pos + j * stride..][..8];
            for (px, &n) in line.iter_mut().zip(row) {
                let delta = (n - center + rounder) >> DITHER_DESCALE;
                *px = (i32::from(*px) + delta).clamp(0, 255) as u8;
            }
        }
    }

    /// Dithers the chroma of the macroblocks `columns` of the row in `slot`.
    pub(crate) fn dither_row(&mut self, slot: &mut RowSlot, blocks: &[MbData], columns: Range<usize>) {
        let stride = slot.uv_stride;
        let top = slot.uv_top();
        for mb_x in columns {
            let amp = blocks[mb_x].dither;
            if amp >= MIN_DITHER_AMP {
                let pos = top + mb_x * 8;
                self.dither_block(&mut slot.u, pos, stride, i32::from(amp));
                self.dither_block(&mut slot.v, pos, stride, i32::from(amp));
            }
        }
    }
}
