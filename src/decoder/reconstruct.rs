//! Intra prediction plus residual addition for one macroblock row.
//!
//! Each macroblock is rebuilt in a small work buffer holding the block and
//! its top and left borders, then copied into the row slot. The bottom line
//! of every macroblock is kept for the row below; intra prediction always
//! sees unfiltered samples.

use alloc::vec;
use alloc::vec::Vec;

use super::cache::RowSlot;
use super::parser::MbData;
use crate::common::prediction::{
    predict_block, predict_subblock, DcEdge, BPS, U_OFF, V_OFF, YUV_SIZE, Y_OFF,
};
use crate::common::transform::{transform_by_class, transform_uv};

/// Position of each luma subblock inside the work buffer, relative to `Y_OFF`.
const SUBBLOCK_OFFSETS: [usize; 16] = {
    let mut offsets = [0; 16];
    let mut n = 0;
    while n < 16 {
        offsets[n] = (n & 3) * 4 + (n >> 2) * 4 * BPS;
        n += 1;
    }
    offsets
};

/// Unfiltered bottom line of one macroblock: 16 luma then 8 U and 8 V samples.
#[derive(Clone, Copy, Debug)]
struct TopSamples {
    y: [u8; 16],
    u: [u8; 8],
    v: [u8; 8],
}

impl Default for TopSamples {
    fn default() -> Self {
        Self {
            y: [0; 16],
            u: [0; 8],
            v: [0; 8],
        }
    }
}

pub(crate) struct Reconstructor {
    mb_w: usize,
    mb_h: usize,
    work: [u8; YUV_SIZE],
    top: Vec<TopSamples>,
}

impl Reconstructor {
    pub(crate) fn new(mb_w: usize, mb_h: usize) -> Self {
        Self {
            mb_w,
            mb_h,
            work: [0; YUV_SIZE],
            top: vec![TopSamples::default(); mb_w],
        }
    }

    /// Rebuilds row `mb_y` from its parsed macroblocks into `slot`.
    pub(crate) fn reconstruct_row(&mut self, mb_y: usize, blocks: &[MbData], slot: &mut RowSlot) {
        let work = &mut self.work;

        for j in 0..16 {
            work[Y_OFF + j * BPS - 1] = 129;
        }
        for j in 0..8 {
            work[U_OFF + j * BPS - 1] = 129;
            work[V_OFF + j * BPS - 1] = 129;
        }
        if mb_y > 0 {
            work[Y_OFF - BPS - 1] = 129;
            work[U_OFF - BPS - 1] = 129;
            work[V_OFF - BPS - 1] = 129;
        } else {
            // Stays valid along the whole first row.
            work[Y_OFF - BPS - 1..][..16 + 4 + 1].fill(127);
            work[U_OFF - BPS - 1..][..8 + 1].fill(127);
            work[V_OFF - BPS - 1..][..8 + 1].fill(127);
        }

        for (mb_x, block) in blocks.iter().enumerate().take(self.mb_w) {
            if mb_x > 0 {
                // Rotate the right columns of the previous block into the left border.
                for j in 0..17 {
                    let row = Y_OFF - BPS + j * BPS;
                    work.copy_within(row + 12..row + 16, row - 4);
                }
                for j in 0..9 {
                    let u_row = U_OFF - BPS + j * BPS;
                    work.copy_within(u_row + 4..u_row + 8, u_row - 4);
                    let v_row = V_OFF - BPS + j * BPS;
                    work.copy_within(v_row + 4..v_row + 8, v_row - 4);
                }
            }

            if mb_y > 0 {
                let top = &self.top[mb_x];
                work[Y_OFF - BPS..][..16].copy_from_slice(&top.y);
                work[U_OFF - BPS..][..8].copy_from_slice(&top.u);
                work[V_OFF - BPS..][..8].copy_from_slice(&top.v);
            }

            let coeffs = &block.coeffs;
            let mut bits = block.non_zero_y;
            if block.is_i4x4 {
                let top_right = Y_OFF - BPS + 16;
                if mb_y > 0 {
                    if mb_x + 1 >= self.mb_w {
                        let last = self.top[mb_x].y[15];
                        work[top_right..top_right + 4].fill(last);
                    } else {
                        let next = self.top[mb_x + 1].y;
                        work[top_right..top_right + 4].copy_from_slice(&next[..4]);
                    }
                }
                // Subblocks on the right column of rows 1 to 3 see the
                // same top-right samples as the first one.
                for k in 1..4 {
                    work.copy_within(top_right..top_right + 4, top_right + 4 * k * BPS);
                }
                for (n, &offset) in SUBBLOCK_OFFSETS.iter().enumerate() {
                    let dst = Y_OFF + offset;
                    predict_subblock(&mut work[..], dst, block.imodes[n]);
                    transform_by_class(bits >> 30, &coeffs[n * 16..], &mut work[..], dst);
                    bits <<= 2;
                }
            } else {
                let edge = DcEdge::for_position(mb_x, mb_y);
                predict_block(&mut work[..], Y_OFF, 16, block.ymode as i8, edge);
                if bits != 0 {
                    for (n, &offset) in SUBBLOCK_OFFSETS.iter().enumerate() {
                        transform_by_class(bits >> 30, &coeffs[n * 16..], &mut work[..], Y_OFF + offset);
                        bits <<= 2;
                    }
                }
            }

            let edge = DcEdge::for_position(mb_x, mb_y);
            predict_block(&mut work[..], U_OFF, 8, block.uvmode as i8, edge);
            predict_block(&mut work[..], V_OFF, 8, block.uvmode as i8, edge);
            transform_uv(block.non_zero_uv, &coeffs[16 * 16..], &mut work[..], U_OFF);
            transform_uv(block.non_zero_uv >> 8, &coeffs[20 * 16..], &mut work[..], V_OFF);

            if mb_y + 1 < self.mb_h {
                let top = &mut self.top[mb_x];
                top.y.copy_from_slice(&work[Y_OFF + 15 * BPS..][..16]);
                top.u.copy_from_slice(&work[U_OFF + 7 * BPS..][..8]);
                top.v.copy_from_slice(&work[V_OFF + 7 * BPS..][..8]);
            }

            let y_out = slot.y_top() + mb_x * 16;
            for j in 0..16 {
                slot.y[y_out + j * slot.y_stride..][..16].copy_from_slice(&work[Y_OFF + j * BPS..][..16]);
            }
            let uv_out = slot.uv_top() + mb_x * 8;
            for j in 0..8 {
                let at = uv_out + j * slot.uv_stride;
                slot.u[at..at + 8].copy_from_slice(&work[U_OFF + j * BPS..][..8]);
                slot.v[at..at + 8].copy_from_slice(&work[V_OFF + j * BPS..][..8]);
            }
        }
    }
}
