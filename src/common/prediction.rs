//! Intra predictors operating in place on the reconstruction work buffer.
//!
//! Every predictor receives the work buffer and the offset of the top-left
//! sample of the block it fills. The row above the block lives at
//! `off - BPS`, the column to the left at `off - 1`, and the top-left corner
//! at `off - BPS - 1`. Subblock predictors may also read four samples to the
//! right of the row above.

#![allow(clippy::identity_op)]

/// Stride of the reconstruction work buffer.
pub(crate) const BPS: usize = 32;

/// Offset of the luma block inside the work buffer.
pub(crate) const Y_OFF: usize = BPS + 8;
/// Offset of the U block inside the work buffer.
pub(crate) const U_OFF: usize = Y_OFF + BPS * 16 + BPS;
/// Offset of the V block inside the work buffer.
pub(crate) const V_OFF: usize = U_OFF + 16;
/// Total size of the work buffer: 17 luma rows and 9 chroma rows.
pub(crate) const YUV_SIZE: usize = BPS * 17 + BPS * 9;

/// Which neighbours a DC predictor may use.
///
/// Macroblocks on the top row or left column of the frame have no real
/// samples on that side, so the DC average drops them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DcEdge {
    Both,
    NoTop,
    NoLeft,
    NoTopLeft,
}

impl DcEdge {
    pub(crate) const fn for_position(mb_x: usize, mb_y: usize) -> Self {
        match (mb_x == 0, mb_y == 0) {
            (false, false) => DcEdge::Both,
            (false, true) => DcEdge::NoTop,
            (true, false) => DcEdge::NoLeft,
            (true, true) => DcEdge::NoTopLeft,
        }
    }
}

#[inline(always)]
fn avg3(left: u8, this: u8, right: u8) -> u8 {
    let avg = (u16::from(left) + 2 * u16::from(this) + u16::from(right) + 2) >> 2;
    avg as u8
}

#[inline(always)]
fn avg2(this: u8, right: u8) -> u8 {
    let avg = (u16::from(this) + u16::from(right) + 1) >> 1;
    avg as u8
}

#[inline(always)]
fn fill_block(buf: &mut [u8], off: usize, size: usize, value: u8) {
    for row in buf[off..].chunks_mut(BPS).take(size) {
        row[..size].fill(value);
    }
}

/// Copies the row above into every row of the block.
pub(crate) fn predict_vertical(buf: &mut [u8], off: usize, size: usize) {
    let (above, curr) = buf.split_at_mut(off);
    let above_row = &above[off - BPS..][..size];
    for row in curr.chunks_mut(BPS).take(size) {
        row[..size].copy_from_slice(above_row);
    }
}

/// Replicates the left neighbour of every row across the row.
pub(crate) fn predict_horizontal(buf: &mut [u8], off: usize, size: usize) {
    for y in 0..size {
        let pos = off + y * BPS;
        let left = buf[pos - 1];
        buf[pos..pos + size].fill(left);
    }
}

/// DC prediction for 16x16 luma and 8x8 chroma blocks.
pub(crate) fn predict_dc(buf: &mut [u8], off: usize, size: usize, edge: DcEdge) {
    // log2(size)
    let shift = if size == 16 { 4 } else { 3 };
    let top = || -> u32 { buf[off - BPS..][..size].iter().map(|&v| u32::from(v)).sum() };
    let left = || -> u32 { (0..size).map(|y| u32::from(buf[off + y * BPS - 1])).sum() };

    let dc = match edge {
        DcEdge::Both => {
            let sum = top() + left();
            ((sum + size as u32) >> (shift + 1)) as u8
        }
        DcEdge::NoTop => ((left() + (size as u32 >> 1)) >> shift) as u8,
        DcEdge::NoLeft => ((top() + (size as u32 >> 1)) >> shift) as u8,
        DcEdge::NoTopLeft => 0x80,
    };
    fill_block(buf, off, size, dc);
}

// Clippy suggests the clamp method, but it seems to optimize worse.
#[allow(clippy::manual_clamp)]
pub(crate) fn predict_tm(buf: &mut [u8], off: usize, size: usize) {
    // X_ij = L_i + A_j - P
    //
    // |-----|-----|-----|-----|-----|
    // | P   | A0  | A1  | A2  | A3  |
    // |-----|-----|-----|-----|-----|
    // | L0  | X00 | X01 | X02 | X03 |
    // |-----|-----|-----|-----|-----|
    // | L1  | X10 | X11 | X12 | X13 |
    // |-----|-----|-----|-----|-----|
    // Diagram from p. 52 of RFC 6386
    let p = i32::from(buf[off - BPS - 1]);
    let mut above = [0u8; 16];
    above[..size].copy_from_slice(&buf[off - BPS..][..size]);

    for y in 0..size {
        let pos = off + y * BPS;
        let left_minus_p = i32::from(buf[pos - 1]) - p;
        buf[pos..pos + size]
            .iter_mut()
            .zip(&above[..size])
            .for_each(|(cur, &abv)| *cur = (left_minus_p + i32::from(abv)).max(0).min(255) as u8);
    }
}

/// Dispatches a whole-block predictor by mode.
pub(crate) fn predict_block(buf: &mut [u8], off: usize, size: usize, mode: i8, edge: DcEdge) {
    use super::types::{H_PRED, TM_PRED, V_PRED};
    match mode {
        V_PRED => predict_vertical(buf, off, size),
        H_PRED => predict_horizontal(buf, off, size),
        TM_PRED => predict_tm(buf, off, size),
        _ => predict_dc(buf, off, size, edge),
    }
}

fn top_pixels(buf: &[u8], off: usize) -> [u8; 8] {
    let mut top = [0u8; 8];
    top.copy_from_slice(&buf[off - BPS..][..8]);
    top
}

fn left_pixels(buf: &[u8], off: usize) -> [u8; 4] {
    [
        buf[off - 1],
        buf[off + BPS - 1],
        buf[off + 2 * BPS - 1],
        buf[off + 3 * BPS - 1],
    ]
}

/// The eight edge samples from bottom-left to the top row, plus the sample
/// above the block's last column.
fn edge_pixels(buf: &[u8], off: usize) -> [u8; 9] {
    let pos = off - BPS - 1;
    [
        buf[pos + 4 * BPS],
        buf[pos + 3 * BPS],
        buf[pos + 2 * BPS],
        buf[pos + BPS],
        buf[pos],
        buf[pos + 1],
        buf[pos + 2],
        buf[pos + 3],
        buf[pos + 4],
    ]
}

#[inline(always)]
fn put4(buf: &mut [u8], off: usize, x: usize, y: usize, v: u8) {
    buf[off + y * BPS + x] = v;
}

fn predict_b_dc(buf: &mut [u8], off: usize) {
    let mut v = 4u32;
    buf[off - BPS..][..4].iter().for_each(|&a| v += u32::from(a));
    left_pixels(buf, off).iter().for_each(|&l| v += u32::from(l));
    fill_block(buf, off, 4, (v >> 3) as u8);
}

fn predict_b_ve(buf: &mut [u8], off: usize) {
    let p = buf[off - BPS - 1];
    let [a0, a1, a2, a3, a4, ..] = top_pixels(buf, off);
    let avg = [avg3(p, a0, a1), avg3(a0, a1, a2), avg3(a1, a2, a3), avg3(a2, a3, a4)];
    for y in 0..4 {
        buf[off + y * BPS..][..4].copy_from_slice(&avg);
    }
}

fn predict_b_he(buf: &mut [u8], off: usize) {
    let p = buf[off - BPS - 1];
    let [l0, l1, l2, l3] = left_pixels(buf, off);
    let avgs = [avg3(p, l0, l1), avg3(l0, l1, l2), avg3(l1, l2, l3), avg3(l2, l3, l3)];
    for (y, avg) in avgs.into_iter().enumerate() {
        buf[off + y * BPS..][..4].fill(avg);
    }
}

fn predict_b_ld(buf: &mut [u8], off: usize) {
    let [a0, a1, a2, a3, a4, a5, a6, a7] = top_pixels(buf, off);
    let avgs = [
        avg3(a0, a1, a2),
        avg3(a1, a2, a3),
        avg3(a2, a3, a4),
        avg3(a3, a4, a5),
        avg3(a4, a5, a6),
        avg3(a5, a6, a7),
        avg3(a6, a7, a7),
    ];
    for y in 0..4 {
        buf[off + y * BPS..][..4].copy_from_slice(&avgs[y..y + 4]);
    }
}

fn predict_b_rd(buf: &mut [u8], off: usize) {
    let [e0, e1, e2, e3, e4, e5, e6, e7, e8] = edge_pixels(buf, off);
    let avgs = [
        avg3(e0, e1, e2),
        avg3(e1, e2, e3),
        avg3(e2, e3, e4),
        avg3(e3, e4, e5),
        avg3(e4, e5, e6),
        avg3(e5, e6, e7),
        avg3(e6, e7, e8),
    ];
    for y in 0..4 {
        buf[off + y * BPS..][..4].copy_from_slice(&avgs[3 - y..7 - y]);
    }
}

fn predict_b_vr(buf: &mut [u8], off: usize) {
    let [_, e1, e2, e3, e4, e5, e6, e7, e8] = edge_pixels(buf, off);
    put4(buf, off, 0, 3, avg3(e1, e2, e3));
    put4(buf, off, 0, 2, avg3(e2, e3, e4));
    put4(buf, off, 1, 3, avg3(e3, e4, e5));
    put4(buf, off, 0, 1, avg3(e3, e4, e5));
    put4(buf, off, 1, 2, avg2(e4, e5));
    put4(buf, off, 0, 0, avg2(e4, e5));
    put4(buf, off, 2, 3, avg3(e4, e5, e6));
    put4(buf, off, 1, 1, avg3(e4, e5, e6));
    put4(buf, off, 2, 2, avg2(e5, e6));
    put4(buf, off, 1, 0, avg2(e5, e6));
    put4(buf, off, 3, 3, avg3(e5, e6, e7));
    put4(buf, off, 2, 1, avg3(e5, e6, e7));
    put4(buf, off, 3, 2, avg2(e6, e7));
    put4(buf, off, 2, 0, avg2(e6, e7));
    put4(buf, off, 3, 1, avg3(e6, e7, e8));
    put4(buf, off, 3, 0, avg2(e7, e8));
}

fn predict_b_vl(buf: &mut [u8], off: usize) {
    let [a0, a1, a2, a3, a4, a5, a6, a7] = top_pixels(buf, off);
    put4(buf, off, 0, 0, avg2(a0, a1));
    put4(buf, off, 0, 1, avg3(a0, a1, a2));
    put4(buf, off, 0, 2, avg2(a1, a2));
    put4(buf, off, 1, 0, avg2(a1, a2));
    put4(buf, off, 1, 1, avg3(a1, a2, a3));
    put4(buf, off, 0, 3, avg3(a1, a2, a3));
    put4(buf, off, 1, 2, avg2(a2, a3));
    put4(buf, off, 2, 0, avg2(a2, a3));
    put4(buf, off, 1, 3, avg3(a2, a3, a4));
    put4(buf, off, 2, 1, avg3(a2, a3, a4));
    put4(buf, off, 2, 2, avg2(a3, a4));
    put4(buf, off, 3, 0, avg2(a3, a4));
    put4(buf, off, 2, 3, avg3(a3, a4, a5));
    put4(buf, off, 3, 1, avg3(a3, a4, a5));
    put4(buf, off, 3, 2, avg3(a4, a5, a6));
    put4(buf, off, 3, 3, avg3(a5, a6, a7));
}

fn predict_b_hd(buf: &mut [u8], off: usize) {
    let [e0, e1, e2, e3, e4, e5, e6, e7, _] = edge_pixels(buf, off);
    put4(buf, off, 0, 3, avg2(e0, e1));
    put4(buf, off, 1, 3, avg3(e0, e1, e2));
    put4(buf, off, 0, 2, avg2(e1, e2));
    put4(buf, off, 2, 3, avg2(e1, e2));
    put4(buf, off, 1, 2, avg3(e1, e2, e3));
    put4(buf, off, 3, 3, avg3(e1, e2, e3));
    put4(buf, off, 2, 2, avg2(e2, e3));
    put4(buf, off, 0, 1, avg2(e2, e3));
    put4(buf, off, 3, 2, avg3(e2, e3, e4));
    put4(buf, off, 1, 1, avg3(e2, e3, e4));
    put4(buf, off, 2, 1, avg2(e3, e4));
    put4(buf, off, 0, 0, avg2(e3, e4));
    put4(buf, off, 3, 1, avg3(e3, e4, e5));
    put4(buf, off, 1, 0, avg3(e3, e4, e5));
    put4(buf, off, 2, 0, avg3(e4, e5, e6));
    put4(buf, off, 3, 0, avg3(e5, e6, e7));
}

fn predict_b_hu(buf: &mut [u8], off: usize) {
    let [l0, l1, l2, l3] = left_pixels(buf, off);
    put4(buf, off, 0, 0, avg2(l0, l1));
    put4(buf, off, 1, 0, avg3(l0, l1, l2));
    put4(buf, off, 2, 0, avg2(l1, l2));
    put4(buf, off, 0, 1, avg2(l1, l2));
    put4(buf, off, 3, 0, avg3(l1, l2, l3));
    put4(buf, off, 1, 1, avg3(l1, l2, l3));
    put4(buf, off, 2, 1, avg2(l2, l3));
    put4(buf, off, 0, 2, avg2(l2, l3));
    put4(buf, off, 3, 1, avg3(l2, l3, l3));
    put4(buf, off, 1, 2, avg3(l2, l3, l3));
    for (x, y) in [(2, 2), (3, 2), (0, 3), (1, 3), (2, 3), (3, 3)] {
        put4(buf, off, x, y, l3);
    }
}

/// Predicts one 4x4 luma subblock.
pub(crate) fn predict_subblock(buf: &mut [u8], off: usize, mode: super::types::IntraMode) {
    use super::types::IntraMode;
    match mode {
        IntraMode::DC => predict_b_dc(buf, off),
        IntraMode::TM => predict_tm(buf, off, 4),
        IntraMode::VE => predict_b_ve(buf, off),
        IntraMode::HE => predict_b_he(buf, off),
        IntraMode::LD => predict_b_ld(buf, off),
        IntraMode::RD => predict_b_rd(buf, off),
        IntraMode::VR => predict_b_vr(buf, off),
        IntraMode::VL => predict_b_vl(buf, off),
        IntraMode::HD => predict_b_hd(buf, off),
        IntraMode::HU => predict_b_hu(buf, off),
    }
}
