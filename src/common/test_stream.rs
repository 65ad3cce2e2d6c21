//! Bit-exact VP8 key frame writer used to build test streams.
//!
//! Shared with the integration tests, so it only reaches the tables
//! through `super::types`.

use super::types::{
    TokenProbTables, B_DC_PRED, B_HE_PRED, B_PRED, B_TM_PRED, B_VE_PRED, CAT3456, COEFF_BANDS,
    COEFF_PROBS, COEFF_UPDATE_PROBS, DC_PRED, DC_QUANT, H_PRED, KEYFRAME_BPRED_MODE_PROBS,
    KEYFRAME_BPRED_MODE_TREE, KEYFRAME_UV_MODE_PROBS, KEYFRAME_UV_MODE_TREE, KEYFRAME_YMODE_PROBS,
    KEYFRAME_YMODE_TREE, SEGMENT_ID_TREE, TM_PRED, V_PRED,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Boolean entropy encoder, the mirror image of the decoder in RFC 6386 section 7.
pub(crate) struct BoolEncoder {
    writer: Vec<u8>,
    bottom: u32,
    /// the range for the next bit, must be between 128 and 255 inclusive
    range: u32,
    /// number of bits that have been encoded in the current byte
    bit_num: i32,
    decisions: usize,
}

impl BoolEncoder {
    pub(crate) fn new() -> Self {
        Self {
            writer: Vec::new(),
            bottom: 0,
            range: 255,
            bit_num: 24,
            decisions: 0,
        }
    }

    // 0xff bytes absorb the carry and roll over to zero
    fn add_one_to_output(&mut self) {
        let mut i = self.writer.len();
        while i > 0 {
            i -= 1;
            if self.writer[i] < 255 {
                self.writer[i] += 1;
                return;
            }
            self.writer[i] = 0;
        }
        self.writer.insert(0, 1);
    }

    pub(crate) fn write_bool(&mut self, bit: bool, prob: u8) {
        self.decisions += 1;
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);
        if bit {
            self.bottom = self.bottom.wrapping_add(split);
            self.range -= split;
        } else {
            self.range = split;
        }

        while self.range < 128 {
            self.range <<= 1;
            if self.bottom & (1 << 31) != 0 {
                self.add_one_to_output();
            }
            self.bottom <<= 1;
            self.bit_num -= 1;
            if self.bit_num == 0 {
                self.writer.push((self.bottom >> 24) as u8);
                self.bottom &= (1 << 24) - 1;
                self.bit_num = 8;
            }
        }
    }

    pub(crate) fn write_flag(&mut self, bit: bool) {
        self.write_bool(bit, 128);
    }

    /// Writes the low `n` bits of `value`, most significant first.
    pub(crate) fn write_literal(&mut self, n: u8, value: u32) {
        for bit in (0..n).rev() {
            self.write_flag((value >> bit) & 1 != 0);
        }
    }

    /// Magnitude then sign, where a set sign bit means negative.
    pub(crate) fn write_signed(&mut self, n: u8, value: i32) {
        self.write_literal(n, value.unsigned_abs());
        self.write_flag(value < 0);
    }

    pub(crate) fn write_optional_signed(&mut self, n: u8, value: i32) {
        self.write_flag(value != 0);
        if value != 0 {
            self.write_signed(n, value);
        }
    }

    /// Writes `value` as a leaf of `tree`, walking from the root.
    pub(crate) fn write_tree(&mut self, tree: &[i8], probs: &[u8], value: i8) {
        fn path(tree: &[i8], index: usize, value: i8, out: &mut Vec<(bool, usize)>) -> bool {
            for (bit, &branch) in [false, true].iter().zip(&tree[index..index + 2]) {
                out.push((*bit, index / 2));
                if branch <= 0 {
                    if -branch == value {
                        return true;
                    }
                } else if path(tree, branch as usize, value, out) {
                    return true;
                }
                out.pop();
            }
            false
        }
        let mut steps = Vec::new();
        assert!(path(tree, 0, value, &mut steps), "{value} not in tree");
        for (bit, node) in steps {
            self.write_bool(bit, probs[node]);
        }
    }

    /// Number of boolean decisions written so far.
    pub(crate) fn decisions(&self) -> usize {
        self.decisions
    }

    /// Flushes the pending bits; the result always ends with four bytes
    /// of padding past the last decision.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        let mut c = self.bit_num;
        let mut v = self.bottom;
        if self.bottom & (1 << (32 - self.bit_num)) != 0 {
            self.add_one_to_output();
        }
        v <<= c & 0b111;
        c = (c >> 3) - 1;
        while c >= 0 {
            v <<= 8;
            c -= 1;
        }
        for _ in 0..4 {
            self.writer.push((v >> 24) as u8);
            v <<= 8;
        }
        self.writer
    }
}

/// Luma prediction of one macroblock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LumaSyntax {
    /// One 16x16 predictor (`DC_PRED`, `V_PRED`, `H_PRED` or `TM_PRED`).
    Whole(i8),
    /// Sixteen 4x4 predictors in raster order.
    Split([i8; 16]),
}

/// Everything written for one macroblock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MbSyntax {
    pub segment: u8,
    /// Only written when the frame carries a skip probability.
    pub skip: bool,
    pub luma: LumaSyntax,
    pub uv_mode: i8,
    /// Quantized levels in zigzag order: blocks 0..16 are luma, 16..20 U,
    /// 20..24 V and 24 is the Y2 block of a 16x16 macroblock.
    pub levels: [[i16; 16]; 25],
}

impl Default for MbSyntax {
    fn default() -> Self {
        Self {
            segment: 0,
            skip: false,
            luma: LumaSyntax::Whole(DC_PRED),
            uv_mode: DC_PRED,
            levels: [[0; 16]; 25],
        }
    }
}

impl MbSyntax {
    fn is_split(&self) -> bool {
        matches!(self.luma, LumaSyntax::Split(_))
    }

    /// A macroblock with random modes and sparse random levels.
    pub(crate) fn random(rng: &mut StdRng, segments: u8) -> Self {
        let luma = if rng.gen_bool(0.4) {
            let mut modes = [0i8; 16];
            for m in &mut modes {
                *m = rng.gen_range(0..10);
            }
            LumaSyntax::Split(modes)
        } else {
            LumaSyntax::Whole(rng.gen_range(0..4))
        };
        let mut mb = Self {
            segment: rng.gen_range(0..segments.max(1)),
            skip: rng.gen_bool(0.15),
            luma,
            uv_mode: rng.gen_range(0..4),
            levels: [[0; 16]; 25],
        };
        let density: f64 = rng.gen_range(0.0..0.5);
        for block in mb.levels.iter_mut() {
            for level in block.iter_mut() {
                if rng.gen_bool(density * 0.4) {
                    let magnitude = match rng.gen_range(0..100) {
                        0..=59 => 1,
                        60..=84 => rng.gen_range(2..=10),
                        85..=97 => rng.gen_range(11..=66),
                        _ => rng.gen_range(67..=600),
                    };
                    *level = if rng.gen_bool(0.5) { -magnitude } else { magnitude };
                }
            }
        }
        mb
    }
}

/// Segment header contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SegmentSpec {
    pub update_map: bool,
    pub absolute: bool,
    pub quantizer: [i32; 4],
    pub filter_strength: [i32; 4],
    pub tree_probs: [u8; 3],
}

/// A complete key frame description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FrameSpec {
    pub width: u16,
    pub height: u16,
    pub version: u8,
    pub show_frame: bool,
    pub segments: Option<SegmentSpec>,
    pub simple_filter: bool,
    pub filter_level: u8,
    pub sharpness: u8,
    /// Reference and mode loop filter deltas.
    pub lf_deltas: Option<([i32; 4], [i32; 4])>,
    pub log2_partitions: u8,
    pub base_q: u8,
    /// y1 dc, y2 dc, y2 ac, uv dc, uv ac
    pub q_deltas: [i32; 5],
    /// `(type, band, ctx, index, value)` token probability updates.
    pub prob_updates: Vec<(usize, usize, usize, usize, u8)>,
    pub skip_prob: Option<u8>,
    /// Emit unused coefficient partitions (all their macroblocks skipped)
    /// with zero bytes. The last partition always keeps its padding.
    pub trim_unused_partitions: bool,
    pub macroblocks: Vec<MbSyntax>,
}

impl FrameSpec {
    /// A frame of flat grey macroblocks with no filtering.
    pub(crate) fn new(width: u16, height: u16) -> Self {
        let mbs = usize::from(width.div_ceil(16)) * usize::from(height.div_ceil(16));
        Self {
            width,
            height,
            version: 0,
            show_frame: true,
            segments: None,
            simple_filter: false,
            filter_level: 0,
            sharpness: 0,
            lf_deltas: None,
            log2_partitions: 0,
            base_q: 40,
            q_deltas: [0; 5],
            prob_updates: Vec::new(),
            skip_prob: None,
            trim_unused_partitions: false,
            macroblocks: vec![MbSyntax::default(); mbs],
        }
    }

    /// A frame with random headers and macroblocks drawn from `seed`.
    pub(crate) fn random(width: u16, height: u16, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut spec = Self::new(width, height);
        spec.base_q = rng.gen_range(0..128);
        for d in &mut spec.q_deltas {
            if rng.gen_bool(0.3) {
                *d = rng.gen_range(-15..=15);
            }
        }
        spec.filter_level = rng.gen_range(0..64);
        spec.simple_filter = rng.gen_bool(0.3);
        spec.sharpness = rng.gen_range(0..8);
        if rng.gen_bool(0.5) {
            let mut refs = [0; 4];
            let mut modes = [0; 4];
            for v in refs.iter_mut().chain(modes.iter_mut()) {
                *v = rng.gen_range(-63..=63);
            }
            spec.lf_deltas = Some((refs, modes));
        }
        if rng.gen_bool(0.5) {
            let mut quantizer = [0; 4];
            let mut filter_strength = [0; 4];
            let absolute = rng.gen_bool(0.5);
            for q in &mut quantizer {
                *q = if absolute {
                    rng.gen_range(0..128)
                } else {
                    rng.gen_range(-30..=30)
                };
            }
            for f in &mut filter_strength {
                *f = if absolute {
                    rng.gen_range(0..64)
                } else {
                    rng.gen_range(-20..=20)
                };
            }
            spec.segments = Some(SegmentSpec {
                update_map: true,
                absolute,
                quantizer,
                filter_strength,
                tree_probs: [rng.gen_range(1..=255), rng.gen_range(1..=255), 255],
            });
        }
        for _ in 0..rng.gen_range(0..20) {
            spec.prob_updates.push((
                rng.gen_range(0..4),
                rng.gen_range(0..8),
                rng.gen_range(0..3),
                rng.gen_range(0..11),
                rng.gen_range(1..=255),
            ));
        }
        if rng.gen_bool(0.7) {
            spec.skip_prob = Some(rng.gen_range(1..=255));
        }
        let segments = if spec.segments.is_some() { 4 } else { 1 };
        for mb in &mut spec.macroblocks {
            *mb = MbSyntax::random(&mut rng, segments);
        }
        spec
    }

    pub(crate) fn mb_width(&self) -> usize {
        usize::from(self.width.div_ceil(16))
    }

    pub(crate) fn mb_height(&self) -> usize {
        usize::from(self.height.div_ceil(16))
    }

    fn uses_skip(&self, mb: &MbSyntax) -> bool {
        self.skip_prob.is_some() && mb.skip
    }

    fn token_probs(&self) -> TokenProbTables {
        let mut probs = COEFF_PROBS;
        for &(t, b, c, p, v) in &self.prob_updates {
            probs[t][b][c][p] = v;
        }
        probs
    }

    fn write_headers(&self, enc: &mut BoolEncoder) {
        // color space and clamping type
        enc.write_literal(1, 0);
        enc.write_literal(1, 0);

        enc.write_flag(self.segments.is_some());
        if let Some(seg) = &self.segments {
            enc.write_flag(seg.update_map);
            enc.write_flag(true);
            enc.write_flag(seg.absolute);
            for &q in &seg.quantizer {
                enc.write_optional_signed(7, q);
            }
            for &f in &seg.filter_strength {
                enc.write_optional_signed(6, f);
            }
            if seg.update_map {
                for &p in &seg.tree_probs {
                    enc.write_flag(p != 255);
                    if p != 255 {
                        enc.write_literal(8, u32::from(p));
                    }
                }
            }
        }

        enc.write_flag(self.simple_filter);
        enc.write_literal(6, u32::from(self.filter_level));
        enc.write_literal(3, u32::from(self.sharpness));
        enc.write_flag(self.lf_deltas.is_some());
        if let Some((refs, modes)) = &self.lf_deltas {
            enc.write_flag(true);
            for &d in refs.iter().chain(modes) {
                enc.write_optional_signed(6, d);
            }
        }

        enc.write_literal(2, u32::from(self.log2_partitions));

        enc.write_literal(7, u32::from(self.base_q));
        for &d in &self.q_deltas {
            enc.write_optional_signed(4, d);
        }

        // refresh entropy probs
        enc.write_flag(false);

        let probs = self.token_probs();
        for t in 0..4 {
            for b in 0..8 {
                for c in 0..3 {
                    for p in 0..11 {
                        let update = probs[t][b][c][p] != COEFF_PROBS[t][b][c][p];
                        enc.write_bool(update, COEFF_UPDATE_PROBS[t][b][c][p]);
                        if update {
                            enc.write_literal(8, u32::from(probs[t][b][c][p]));
                        }
                    }
                }
            }
        }

        enc.write_flag(self.skip_prob.is_some());
        if let Some(p) = self.skip_prob {
            enc.write_literal(8, u32::from(p));
        }
    }

    fn write_modes(&self, enc: &mut BoolEncoder) {
        let mb_w = self.mb_width();
        let mut top = vec![B_DC_PRED; 4 * mb_w];
        for row in self.macroblocks.chunks(mb_w) {
            let mut left = [B_DC_PRED; 4];
            for (mb_x, mb) in row.iter().enumerate() {
                if let Some(seg) = self.segments.as_ref().filter(|s| s.update_map) {
                    enc.write_tree(&SEGMENT_ID_TREE, &seg.tree_probs, mb.segment as i8);
                }
                if let Some(p) = self.skip_prob {
                    enc.write_bool(mb.skip, p);
                }
                let top = &mut top[4 * mb_x..4 * mb_x + 4];
                match mb.luma {
                    LumaSyntax::Whole(mode) => {
                        enc.write_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, mode);
                        let sub = match mode {
                            V_PRED => B_VE_PRED,
                            H_PRED => B_HE_PRED,
                            TM_PRED => B_TM_PRED,
                            _ => B_DC_PRED,
                        };
                        top.fill(sub);
                        left.fill(sub);
                    }
                    LumaSyntax::Split(modes) => {
                        enc.write_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, B_PRED);
                        for y in 0..4 {
                            for x in 0..4 {
                                let mode = modes[4 * y + x];
                                let probs =
                                    &KEYFRAME_BPRED_MODE_PROBS[top[x] as usize][left[y] as usize];
                                enc.write_tree(&KEYFRAME_BPRED_MODE_TREE, probs, mode);
                                top[x] = mode;
                                left[y] = mode;
                            }
                        }
                    }
                }
                enc.write_tree(&KEYFRAME_UV_MODE_TREE, &KEYFRAME_UV_MODE_PROBS, mb.uv_mode);
            }
        }
    }

    /// Serializes the frame: frame tag, key frame header, partition 0,
    /// partition size table and coefficient partitions.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let (first, parts) = self.encode_partitions();
        let mut out = Vec::new();
        let tag = u32::from(self.version & 7) << 1
            | u32::from(self.show_frame) << 4
            | (first.len() as u32) << 5;
        out.extend_from_slice(&tag.to_le_bytes()[..3]);
        out.extend_from_slice(&[0x9d, 0x01, 0x2a]);
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        out.extend_from_slice(&first);
        for p in &parts[..parts.len() - 1] {
            out.extend_from_slice(&(p.len() as u32).to_le_bytes()[..3]);
        }
        for p in &parts {
            out.extend_from_slice(p);
        }
        out
    }

    /// Partition 0 and the coefficient partitions as separate buffers.
    pub(crate) fn encode_partitions(&self) -> (Vec<u8>, Vec<Vec<u8>>) {
        let mut first = BoolEncoder::new();
        self.write_headers(&mut first);
        self.write_modes(&mut first);

        let num_parts = 1usize << self.log2_partitions;
        let mut parts: Vec<BoolEncoder> = (0..num_parts).map(|_| BoolEncoder::new()).collect();
        let probs = self.token_probs();
        let mb_w = self.mb_width();
        let mut top = vec![NzContext::default(); mb_w];
        for (mb_y, row) in self.macroblocks.chunks(mb_w).enumerate() {
            let enc = &mut parts[mb_y % num_parts];
            let mut left = NzContext::default();
            for (mb_x, mb) in row.iter().enumerate() {
                write_residuals(enc, &probs, mb, self.uses_skip(mb), &mut top[mb_x], &mut left);
            }
        }

        let last = num_parts - 1;
        let parts = parts
            .into_iter()
            .enumerate()
            .map(|(i, enc)| {
                if self.trim_unused_partitions && enc.decisions() == 0 && i != last {
                    Vec::new()
                } else {
                    enc.finish()
                }
            })
            .collect();
        (first.finish(), parts)
    }

    /// Expected value of every pixel of a frame whose macroblocks are all
    /// 16x16 `DC_PRED` with DC-only residuals, decoded without filtering.
    /// Returns the Y plane of `mb_width*16` columns and `mb_height*16` rows.
    pub(crate) fn dc_only_luma(&self) -> Vec<u8> {
        let mb_w = self.mb_width();
        let mb_h = self.mb_height();
        let stride = mb_w * 16;
        let mut y = vec![0u8; stride * mb_h * 16];
        let q = i32::from(self.base_q);
        let y2dc = i32::from(DC_QUANT[(q + self.q_deltas[1]).clamp(0, 127) as usize]) * 2;
        for mb_y in 0..mb_h {
            for mb_x in 0..mb_w {
                let mb = &self.macroblocks[mb_y * mb_w + mb_x];
                assert_eq!(mb.luma, LumaSyntax::Whole(DC_PRED));
                let mut sum = 0u32;
                let mut count = 0;
                if mb_y > 0 {
                    let row = (mb_y * 16 - 1) * stride + mb_x * 16;
                    sum += y[row..row + 16].iter().map(|&v| u32::from(v)).sum::<u32>();
                    count += 16;
                }
                if mb_x > 0 {
                    for r in 0..16 {
                        sum += u32::from(y[(mb_y * 16 + r) * stride + mb_x * 16 - 1]);
                    }
                    count += 16;
                }
                let pred = if count == 0 {
                    128
                } else {
                    ((sum + count / 2) / count) as i32
                };
                let skipped = self.uses_skip(mb);
                let dc = if skipped {
                    0
                } else {
                    let level = i32::from(mb.levels[24][0]);
                    let dc = ((level * y2dc) as i16 as i32 + 3) >> 3;
                    (dc + 4) >> 3
                };
                let value = (pred + dc).clamp(0, 255) as u8;
                for r in 0..16 {
                    let start = (mb_y * 16 + r) * stride + mb_x * 16;
                    y[start..start + 16].fill(value);
                }
            }
        }
        y
    }
}

/// Encoder-side copy of the non-zero context of one macroblock edge.
#[derive(Clone, Copy, Default)]
struct NzContext {
    y: [bool; 4],
    u: [bool; 2],
    v: [bool; 2],
    dc: bool,
}

fn write_residuals(
    enc: &mut BoolEncoder,
    probs: &TokenProbTables,
    mb: &MbSyntax,
    skipped: bool,
    top: &mut NzContext,
    left: &mut NzContext,
) {
    if skipped {
        let keep_dc = (top.dc, left.dc);
        *top = NzContext::default();
        *left = NzContext::default();
        if mb.is_split() {
            top.dc = keep_dc.0;
            left.dc = keep_dc.1;
        }
        return;
    }

    let (first, ac_type) = if mb.is_split() {
        (0, 3)
    } else {
        let ctx = usize::from(top.dc) + usize::from(left.dc);
        let nz = write_block(enc, &probs[1], ctx, 0, &mb.levels[24]);
        top.dc = nz;
        left.dc = nz;
        (1, 0)
    };

    for y in 0..4 {
        for x in 0..4 {
            let ctx = usize::from(top.y[x]) + usize::from(left.y[y]);
            let nz = write_block(enc, &probs[ac_type], ctx, first, &mb.levels[4 * y + x]);
            top.y[x] = nz;
            left.y[y] = nz;
        }
    }
    for (plane, base) in [(0, 16), (1, 20)] {
        for y in 0..2 {
            for x in 0..2 {
                let (t, l) = if plane == 0 {
                    (&mut top.u[x], &mut left.u[y])
                } else {
                    (&mut top.v[x], &mut left.v[y])
                };
                let ctx = usize::from(*t) + usize::from(*l);
                let nz = write_block(enc, &probs[2], ctx, 0, &mb.levels[base + 2 * y + x]);
                *t = nz;
                *l = nz;
            }
        }
    }
}

/// Writes the tokens of one block; returns whether any level at or after
/// `first` is non-zero.
fn write_block(
    enc: &mut BoolEncoder,
    probs: &[[[u8; 11]; 3]; 8],
    ctx: usize,
    first: usize,
    levels: &[i16; 16],
) -> bool {
    let Some(last) = (first..16).rev().find(|&i| levels[i] != 0) else {
        enc.write_bool(false, probs[usize::from(COEFF_BANDS[first])][ctx][0]);
        return false;
    };
    let mut p = probs[usize::from(COEFF_BANDS[first])][ctx];
    let mut n = first;
    while n < 16 {
        if n > last {
            enc.write_bool(false, p[0]);
            break;
        }
        enc.write_bool(true, p[0]);
        while levels[n] == 0 {
            enc.write_bool(false, p[1]);
            n += 1;
            p = probs[usize::from(COEFF_BANDS[n])][0];
        }
        enc.write_bool(true, p[1]);
        let v = u32::from(levels[n].unsigned_abs());
        let next_band = usize::from(COEFF_BANDS[n + 1]);
        if v == 1 {
            enc.write_bool(false, p[2]);
            p = probs[next_band][1];
        } else {
            enc.write_bool(true, p[2]);
            write_large_value(enc, &p, v);
            p = probs[next_band][2];
        }
        enc.write_flag(levels[n] < 0);
        n += 1;
    }
    true
}

fn write_large_value(enc: &mut BoolEncoder, p: &[u8; 11], v: u32) {
    match v {
        2..=4 => {
            enc.write_bool(false, p[3]);
            enc.write_bool(v != 2, p[4]);
            if v != 2 {
                enc.write_bool(v == 4, p[5]);
            }
        }
        5..=10 => {
            enc.write_bool(true, p[3]);
            enc.write_bool(false, p[6]);
            if v <= 6 {
                enc.write_bool(false, p[7]);
                enc.write_bool(v == 6, 159);
            } else {
                enc.write_bool(true, p[7]);
                enc.write_bool((v - 7) & 2 != 0, 165);
                enc.write_bool((v - 7) & 1 != 0, 145);
            }
        }
        _ => {
            enc.write_bool(true, p[3]);
            enc.write_bool(true, p[6]);
            let cat = (0..4).rev().find(|&c| v >= 3 + (8 << c)).unwrap_or(0);
            let bit1 = cat >> 1;
            enc.write_bool(bit1 != 0, p[8]);
            enc.write_bool(cat & 1 != 0, p[9 + bit1]);
            let extra = v - (3 + (8 << cat));
            let tab = CAT3456[cat];
            let bits = tab.len() - 1;
            for (i, &prob) in tab[..bits].iter().enumerate() {
                enc.write_bool((extra >> (bits - 1 - i)) & 1 != 0, prob);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_short() {
        let mut encoder = BoolEncoder::new();
        encoder.write_flag(false);
        encoder.write_bool(true, 10);
        encoder.write_bool(false, 250);
        encoder.write_literal(1, 1);
        encoder.write_literal(3, 5);
        encoder.write_literal(8, 64);
        encoder.write_literal(8, 185);
        assert_eq!(&[104, 101, 107, 128], &*encoder.finish());
    }

    #[test]
    fn test_encoder_tree() {
        let mut encoder = BoolEncoder::new();
        encoder.write_tree(&KEYFRAME_YMODE_TREE, &KEYFRAME_YMODE_PROBS, TM_PRED);
        assert_eq!(&[233, 64, 0, 0], &*encoder.finish());
    }

    #[test]
    fn test_frame_layout() {
        let spec = FrameSpec::new(20, 30);
        let data = spec.encode();
        assert_eq!(&data[3..6], &[0x9d, 0x01, 0x2a]);
        assert_eq!(u16::from_le_bytes([data[6], data[7]]), 20);
        assert_eq!(u16::from_le_bytes([data[8], data[9]]), 30);
        let tag = u32::from(data[0]) | u32::from(data[1]) << 8 | u32::from(data[2]) << 16;
        assert_eq!(tag & 1, 0);
        assert_eq!((tag >> 4) & 1, 1);
        let (first, parts) = spec.encode_partitions();
        assert_eq!((tag >> 5) as usize, first.len());
        assert_eq!(data.len(), 10 + first.len() + parts[0].len());
    }
}
