//! Per-macroblock syntax: intra modes from the first partition and
//! residual tokens from the coefficient partitions.

use alloc::vec;
use alloc::vec::Vec;

use super::bit_reader::{BitReader, BoolDecoder};
use super::header::{FilterType, FrameHeader, PositionProbas};
use super::loop_filter::FilterInfo;
use crate::common::transform::iwht4x4;
use crate::common::types::{
    ChromaMode, IntraMode, LumaMode, CAT3456, KEYFRAME_BPRED_MODE_NODES, KEYFRAME_UV_MODE_NODES,
    KEYFRAME_YMODE_NODES, ZIGZAG,
};

/// Decoded syntax of one macroblock, ready for reconstruction.
#[derive(Clone, Debug)]
pub(crate) struct MbData {
    /// Dequantized coefficients: 16 luma blocks, then 4 U and 4 V blocks.
    pub(crate) coeffs: [i16; 384],
    pub(crate) is_i4x4: bool,
    pub(crate) ymode: LumaMode,
    pub(crate) imodes: [IntraMode; 16],
    pub(crate) uvmode: ChromaMode,
    /// Two bits per luma block, first block in the top bits.
    pub(crate) non_zero_y: u32,
    /// Two bits per chroma block, U in the low byte and V in the next.
    pub(crate) non_zero_uv: u32,
    pub(crate) dither: u8,
    pub(crate) skip: bool,
    pub(crate) segment: u8,
    pub(crate) finfo: FilterInfo,
}

impl Default for MbData {
    fn default() -> Self {
        Self {
            coeffs: [0; 384],
            is_i4x4: false,
            ymode: LumaMode::DC,
            imodes: [IntraMode::DC; 16],
            uvmode: ChromaMode::DC,
            non_zero_y: 0,
            non_zero_uv: 0,
            dither: 0,
            skip: false,
            segment: 0,
            finfo: FilterInfo::default(),
        }
    }
}

/// Non-zero flags along one macroblock edge.
///
/// Bits 0-3 are the luma blocks, 4-5 the U blocks and 6-7 the V blocks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct NzContext {
    pub(crate) nz: u8,
    pub(crate) nz_dc: u8,
}

/// Everything a macroblock decode mutates outside its own [`MbData`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MbCheckpoint {
    left: NzContext,
    top: NzContext,
    token: BitReader,
}

/// Mode and non-zero context carried between macroblocks.
pub(crate) struct MacroblockParser {
    intra_t: Vec<IntraMode>,
    intra_l: [IntraMode; 4],
    top: Vec<NzContext>,
    left: NzContext,
}

impl MacroblockParser {
    pub(crate) fn new(mb_w: usize) -> Self {
        Self {
            intra_t: vec![IntraMode::DC; 4 * mb_w],
            intra_l: [IntraMode::DC; 4],
            top: vec![NzContext::default(); mb_w],
            left: NzContext::default(),
        }
    }

    pub(crate) fn byte_size(mb_w: usize) -> usize {
        mb_w * (4 * core::mem::size_of::<IntraMode>() + core::mem::size_of::<NzContext>())
    }

    /// Resets the left context before a new macroblock row.
    pub(crate) fn init_scanline(&mut self) {
        self.left = NzContext::default();
        self.intra_l = [IntraMode::DC; 4];
    }

    /// Reads the segment, skip flag and prediction modes of a whole row.
    ///
    /// Returns false if the first partition ran out.
    pub(crate) fn parse_intra_row(
        &mut self,
        d: &mut BoolDecoder<'_>,
        hdr: &FrameHeader,
        row: &mut [MbData],
    ) -> bool {
        for (mb_x, block) in row.iter_mut().enumerate() {
            self.parse_intra_mode(d, hdr, mb_x, block);
        }
        !d.is_eof()
    }

    fn parse_intra_mode(
        &mut self,
        d: &mut BoolDecoder<'_>,
        hdr: &FrameHeader,
        mb_x: usize,
        block: &mut MbData,
    ) {
        block.segment = if hdr.segment.update_map {
            d.read_tree(&hdr.proba.segment_nodes) as u8
        } else {
            0
        };
        block.skip = match hdr.skip_proba {
            Some(p) => d.get_bit(p),
            None => false,
        };

        let top = &mut self.intra_t[4 * mb_x..4 * mb_x + 4];
        let left = &mut self.intra_l;
        let ymode = LumaMode::from_i8(d.read_tree(&KEYFRAME_YMODE_NODES)).unwrap_or_default();
        block.ymode = ymode;
        block.is_i4x4 = ymode == LumaMode::B;
        match ymode.into_intra() {
            Some(context) => {
                top.fill(context);
                left.fill(context);
            }
            None => {
                for y in 0..4 {
                    let mut mode = left[y];
                    for x in 0..4 {
                        let nodes = &KEYFRAME_BPRED_MODE_NODES[top[x] as usize][mode as usize];
                        mode = IntraMode::from_i8(d.read_tree(nodes)).unwrap_or_default();
                        top[x] = mode;
                    }
                    block.imodes[4 * y..4 * y + 4].copy_from_slice(top);
                    left[y] = mode;
                }
            }
        }
        block.uvmode = ChromaMode::from_i8(d.read_tree(&KEYFRAME_UV_MODE_NODES)).unwrap_or_default();
    }

    pub(crate) fn checkpoint(&self, mb_x: usize, token: &BitReader) -> MbCheckpoint {
        MbCheckpoint {
            left: self.left,
            top: self.top[mb_x],
            token: *token,
        }
    }

    pub(crate) fn restore(&mut self, mb_x: usize, saved: &MbCheckpoint, token: &mut BitReader) {
        self.left = saved.left;
        self.top[mb_x] = saved.top;
        *token = saved.token;
    }

    /// Reads the residuals of one macroblock and fills its filter info.
    ///
    /// Returns false if the coefficient partition ran out, in which case
    /// the macroblock is incomplete.
    pub(crate) fn decode_mb(
        &mut self,
        mb_x: usize,
        d: &mut BoolDecoder<'_>,
        hdr: &FrameHeader,
        fstrengths: &[[FilterInfo; 2]; 4],
        block: &mut MbData,
    ) -> bool {
        let mut skip = block.skip;
        if skip {
            self.left.nz = 0;
            self.top[mb_x].nz = 0;
            if !block.is_i4x4 {
                self.left.nz_dc = 0;
                self.top[mb_x].nz_dc = 0;
            }
            block.non_zero_y = 0;
            block.non_zero_uv = 0;
            block.dither = 0;
        } else {
            skip = self.parse_residuals(mb_x, d, hdr, block);
        }

        if hdr.filter_type != FilterType::None {
            let mut finfo = fstrengths[usize::from(block.segment)][usize::from(block.is_i4x4)];
            finfo.inner |= !skip;
            block.finfo = finfo;
        }
        !d.is_eof()
    }

    /// Returns true when the macroblock has no non-zero coefficient.
    fn parse_residuals(
        &mut self,
        mb_x: usize,
        d: &mut BoolDecoder<'_>,
        hdr: &FrameHeader,
        block: &mut MbData,
    ) -> bool {
        let bands = &hdr.proba.coeffs;
        let q = &hdr.quant[usize::from(block.segment)];
        let top = &mut self.top[mb_x];
        let left = &mut self.left;
        let dst = &mut block.coeffs;
        dst.fill(0);

        let (first, ac_proba) = if block.is_i4x4 {
            (0, &bands[3])
        } else {
            let mut dc = [0i16; 16];
            let ctx = usize::from(top.nz_dc + left.nz_dc);
            let nz = get_coeffs(d, &bands[1], ctx, q.y2, 0, &mut dc);
            let has_dc = u8::from(nz > 0);
            top.nz_dc = has_dc;
            left.nz_dc = has_dc;
            if nz > 1 {
                iwht4x4(&dc, &mut dst[..]);
            } else {
                // only DC is non-zero
                let dc0 = (i32::from(dc[0]) + 3) >> 3;
                for i in (0..256).step_by(16) {
                    dst[i] = dc0 as i16;
                }
            }
            (1, &bands[0])
        };

        let mut non_zero_y = 0u32;
        let mut tnz = top.nz & 0x0f;
        let mut lnz = left.nz & 0x0f;
        for y in 0..4 {
            let mut l = lnz & 1;
            let mut nz_coeffs = 0u32;
            for x in 0..4 {
                let ctx = usize::from(l + (tnz & 1));
                let block_coeffs = &mut dst[(4 * y + x) * 16..][..16];
                let nz = get_coeffs(d, ac_proba, ctx, q.y1, first, block_coeffs);
                l = u8::from(nz > first);
                tnz = (tnz >> 1) | (l << 7);
                nz_coeffs = nz_code_bits(nz_coeffs, nz, block_coeffs[0] != 0);
            }
            tnz >>= 4;
            lnz = (lnz >> 1) | (l << 7);
            non_zero_y = (non_zero_y << 8) | nz_coeffs;
        }
        let mut out_t_nz = tnz;
        let mut out_l_nz = lnz >> 4;

        let mut non_zero_uv = 0u32;
        for ch in [0usize, 2] {
            let mut nz_coeffs = 0u32;
            tnz = top.nz >> (4 + ch);
            lnz = left.nz >> (4 + ch);
            for y in 0..2 {
                let mut l = lnz & 1;
                for x in 0..2 {
                    let ctx = usize::from(l + (tnz & 1));
                    let n = 16 + 2 * ch + 2 * y + x;
                    let block_coeffs = &mut dst[n * 16..][..16];
                    let nz = get_coeffs(d, &bands[2], ctx, q.uv, 0, block_coeffs);
                    l = u8::from(nz > 0);
                    tnz = (tnz >> 1) | (l << 3);
                    nz_coeffs = nz_code_bits(nz_coeffs, nz, block_coeffs[0] != 0);
                }
                tnz >>= 2;
                lnz = (lnz >> 1) | (l << 5);
            }
            non_zero_uv |= nz_coeffs << (4 * ch);
            out_t_nz |= (tnz << 4) << ch;
            out_l_nz |= (lnz & 0xf0) << ch;
        }
        top.nz = out_t_nz;
        left.nz = out_l_nz;

        block.non_zero_y = non_zero_y;
        block.non_zero_uv = non_zero_uv;
        // no chroma AC coefficients: the block may be dithered
        block.dither = if non_zero_uv & 0xaaaa != 0 {
            0
        } else {
            q.dither as u8
        };

        non_zero_y | non_zero_uv == 0
    }
}

/// Two-bit class of a block: 3 for any coefficient past the third, 2 for
/// AC within the first three, 1 for DC only and 0 for an empty block.
#[inline(always)]
fn nz_code_bits(nz_coeffs: u32, nz: usize, dc_nz: bool) -> u32 {
    let code = if nz > 3 {
        3
    } else if nz > 1 {
        2
    } else {
        u32::from(dc_nz)
    };
    (nz_coeffs << 2) | code
}

/// Reads the tokens of one 4x4 block starting at position `n`, storing
/// dequantized values in natural order.
///
/// Returns the position after the last decoded coefficient, or `n` if the
/// block is empty.
fn get_coeffs(
    d: &mut BoolDecoder<'_>,
    prob: &PositionProbas,
    ctx: usize,
    dq: [i32; 2],
    mut n: usize,
    out: &mut [i16],
) -> usize {
    let mut p = &prob[n][ctx];
    while n < 16 {
        if !d.get_bit(p[0]) {
            // previous coeff was last non-zero coefficient
            return n;
        }
        while !d.get_bit(p[1]) {
            n += 1;
            if n == 16 {
                return 16;
            }
            p = &prob[n][0];
        }
        let p_ctx = &prob[n + 1];
        let v = if !d.get_bit(p[2]) {
            p = &p_ctx[1];
            1
        } else {
            let v = get_large_value(d, p);
            p = &p_ctx[2];
            v
        };
        let dq = dq[usize::from(n > 0)];
        out[usize::from(ZIGZAG[n])] = (d.get_signed(v) * dq) as i16;
        n += 1;
    }
    16
}

/// Section 13.2: tokens DCT_VAL2 and up.
fn get_large_value(d: &mut BoolDecoder<'_>, p: &[u8; 11]) -> i32 {
    if !d.get_bit(p[3]) {
        if !d.get_bit(p[4]) {
            2
        } else {
            3 + i32::from(d.get_bit(p[5]))
        }
    } else if !d.get_bit(p[6]) {
        if !d.get_bit(p[7]) {
            5 + i32::from(d.get_bit(159))
        } else {
            let v = 7 + 2 * i32::from(d.get_bit(165));
            v + i32::from(d.get_bit(145))
        }
    } else {
        let bit1 = usize::from(d.get_bit(p[8]));
        let bit0 = usize::from(d.get_bit(p[9 + bit1]));
        let cat = 2 * bit1 + bit0;
        let mut v = 0i32;
        for &prob in CAT3456[cat].iter().take_while(|&&p| p != 0) {
            v += v + i32::from(d.get_bit(prob));
        }
        v + 3 + (8 << cat)
    }
}
