//! In-loop deblocking filter, section 15.
//!
//! Edge kernels operate on a byte slice with a position `p` on the first
//! sample past the edge (`q0`) and a `step` across the edge: `1` for a
//! vertical edge, the stride for a horizontal one.

use core::ops::Range;

use super::cache::RowSlot;
use super::header::{FilterType, FrameHeader};
use crate::common::types::MAX_SEGMENTS;
use super::parser::MbData;

/// Filter parameters of one macroblock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct FilterInfo {
    /// Edge limit before the `+4` applied on macroblock edges; zero disables
    /// filtering of the macroblock.
    pub(crate) limit: u8,
    pub(crate) interior_limit: u8,
    /// Filter the inner 4x4 edges too.
    pub(crate) inner: bool,
    pub(crate) hev_threshold: u8,
}

/// Filter parameters per segment and per `[i16x16, i4x4]` luma type.
pub(crate) fn precompute_filter_strengths(hdr: &FrameHeader) -> [[FilterInfo; 2]; MAX_SEGMENTS] {
    let mut strengths = [[FilterInfo::default(); 2]; MAX_SEGMENTS];
    if hdr.filter_type == FilterType::None {
        return strengths;
    }
    let filter = &hdr.filter;
    let sharpness = i32::from(filter.sharpness);
    for (s, infos) in strengths.iter_mut().enumerate() {
        let base_level = if hdr.segment.use_segment {
            let strength = i32::from(hdr.segment.filter_strength[s]);
            if hdr.segment.absolute_delta {
                strength
            } else {
                strength + i32::from(filter.level)
            }
        } else {
            i32::from(filter.level)
        };

        for (i4x4, info) in infos.iter_mut().enumerate() {
            let mut level = base_level;
            if filter.use_lf_delta {
                level += filter.ref_lf_delta[0];
                if i4x4 == 1 {
                    level += filter.mode_lf_delta[0];
                }
            }
            let level = level.clamp(0, 63);
            if level > 0 {
                let mut interior_limit = level;
                if sharpness > 0 {
                    interior_limit >>= if sharpness > 4 { 2 } else { 1 };
                    interior_limit = interior_limit.min(9 - sharpness);
                }
                let interior_limit = interior_limit.max(1);
                info.interior_limit = interior_limit as u8;
                info.limit = (2 * level + interior_limit) as u8;
                info.hev_threshold = if level >= 40 {
                    2
                } else if level >= 15 {
                    1
                } else {
                    0
                };
            }
            info.inner = i4x4 == 1;
        }
    }
    strengths
}

#[inline]
fn sclip1(v: i32) -> i32 {
    v.clamp(-128, 127)
}

#[inline]
fn sclip2(v: i32) -> i32 {
    v.clamp(-16, 15)
}

#[inline]
fn clip1(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

#[inline]
fn sample(buf: &[u8], p: usize, step: usize, k: isize) -> i32 {
    i32::from(buf[p.wrapping_add_signed(k * step as isize)])
}

// 4 samples in, 2 out.
#[inline]
fn common_adjust(buf: &mut [u8], p: usize, step: usize) {
    let p1 = sample(buf, p, step, -2);
    let p0 = sample(buf, p, step, -1);
    let q0 = sample(buf, p, step, 0);
    let q1 = sample(buf, p, step, 1);
    let a = 3 * (q0 - p0) + sclip1(p1 - q1);
    let a1 = sclip2((a + 4) >> 3);
    let a2 = sclip2((a + 3) >> 3);
    buf[p - step] = clip1(p0 + a2);
    buf[p] = clip1(q0 - a1);
}

// 4 samples in, 4 out.
#[inline]
fn subblock_adjust(buf: &mut [u8], p: usize, step: usize) {
    let p1 = sample(buf, p, step, -2);
    let p0 = sample(buf, p, step, -1);
    let q0 = sample(buf, p, step, 0);
    let q1 = sample(buf, p, step, 1);
    let a = 3 * (q0 - p0);
    let a1 = sclip2((a + 4) >> 3);
    let a2 = sclip2((a + 3) >> 3);
    let a3 = (a1 + 1) >> 1;
    buf[p - 2 * step] = clip1(p1 + a3);
    buf[p - step] = clip1(p0 + a2);
    buf[p] = clip1(q0 - a1);
    buf[p + step] = clip1(q1 - a3);
}

// 6 samples in, 6 out.
#[inline]
fn macroblock_adjust(buf: &mut [u8], p: usize, step: usize) {
    let p2 = sample(buf, p, step, -3);
    let p1 = sample(buf, p, step, -2);
    let p0 = sample(buf, p, step, -1);
    let q0 = sample(buf, p, step, 0);
    let q1 = sample(buf, p, step, 1);
    let q2 = sample(buf, p, step, 2);
    let a = sclip1(3 * (q0 - p0) + sclip1(p1 - q1));
    let a1 = (27 * a + 63) >> 7;
    let a2 = (18 * a + 63) >> 7;
    let a3 = (9 * a + 63) >> 7;
    buf[p - 3 * step] = clip1(p2 + a3);
    buf[p - 2 * step] = clip1(p1 + a2);
    buf[p - step] = clip1(p0 + a1);
    buf[p] = clip1(q0 - a1);
    buf[p + step] = clip1(q1 - a2);
    buf[p + 2 * step] = clip1(q2 - a3);
}

#[inline]
fn high_edge_variance(buf: &[u8], p: usize, step: usize, threshold: i32) -> bool {
    let p1 = sample(buf, p, step, -2);
    let p0 = sample(buf, p, step, -1);
    let q0 = sample(buf, p, step, 0);
    let q1 = sample(buf, p, step, 1);
    (p1 - p0).abs() > threshold || (q1 - q0).abs() > threshold
}

#[inline]
fn simple_threshold(buf: &[u8], p: usize, step: usize, t: i32) -> bool {
    let p1 = sample(buf, p, step, -2);
    let p0 = sample(buf, p, step, -1);
    let q0 = sample(buf, p, step, 0);
    let q1 = sample(buf, p, step, 1);
    4 * (p0 - q0).abs() + (p1 - q1).abs() <= t
}

#[inline]
fn normal_threshold(buf: &[u8], p: usize, step: usize, t: i32, interior_limit: i32) -> bool {
    if !simple_threshold(buf, p, step, t) {
        return false;
    }
    let s = |k| sample(buf, p, step, k);
    let (p3, p2, p1, p0) = (s(-4), s(-3), s(-2), s(-1));
    let (q0, q1, q2, q3) = (s(0), s(1), s(2), s(3));
    (p3 - p2).abs() <= interior_limit
        && (p2 - p1).abs() <= interior_limit
        && (p1 - p0).abs() <= interior_limit
        && (q3 - q2).abs() <= interior_limit
        && (q2 - q1).abs() <= interior_limit
        && (q1 - q0).abs() <= interior_limit
}

/// Simple filter over `count` positions along an edge.
fn simple_segment(buf: &mut [u8], p: usize, step: usize, along: usize, count: usize, limit: i32) {
    let t = 2 * limit + 1;
    for i in 0..count {
        let at = p + i * along;
        if simple_threshold(buf, at, step, t) {
            common_adjust(buf, at, step);
        }
    }
}

#[derive(Clone, Copy)]
struct EdgeParams {
    limit: i32,
    interior_limit: i32,
    hev_threshold: i32,
}

fn macroblock_filter(buf: &mut [u8], p: usize, step: usize, along: usize, count: usize, e: EdgeParams) {
    let t = 2 * e.limit + 1;
    for i in 0..count {
        let at = p + i * along;
        if normal_threshold(buf, at, step, t, e.interior_limit) {
            if high_edge_variance(buf, at, step, e.hev_threshold) {
                common_adjust(buf, at, step);
            } else {
                macroblock_adjust(buf, at, step);
            }
        }
    }
}

fn subblock_filter(buf: &mut [u8], p: usize, step: usize, along: usize, count: usize, e: EdgeParams) {
    let t = 2 * e.limit + 1;
    for i in 0..count {
        let at = p + i * along;
        if normal_threshold(buf, at, step, t, e.interior_limit) {
            if high_edge_variance(buf, at, step, e.hev_threshold) {
                common_adjust(buf, at, step);
            } else {
                subblock_adjust(buf, at, step);
            }
        }
    }
}

fn filter_macroblock(
    slot: &mut RowSlot,
    filter_type: FilterType,
    info: FilterInfo,
    mb_x: usize,
    mb_y: usize,
) {
    if info.limit == 0 {
        return;
    }
    let y_stride = slot.y_stride;
    let y_pos = slot.y_top() + mb_x * 16;
    let limit = i32::from(info.limit);

    if filter_type == FilterType::Simple {
        let y = &mut slot.y[..];
        if mb_x > 0 {
            simple_segment(y, y_pos, 1, y_stride, 16, limit + 4);
        }
        if info.inner {
            for k in 1..4 {
                simple_segment(y, y_pos + 4 * k, 1, y_stride, 16, limit);
            }
        }
        if mb_y > 0 {
            simple_segment(y, y_pos, y_stride, 1, 16, limit + 4);
        }
        if info.inner {
            for k in 1..4 {
                simple_segment(y, y_pos + 4 * k * y_stride, y_stride, 1, 16, limit);
            }
        }
        return;
    }

    let uv_stride = slot.uv_stride;
    let uv_pos = slot.uv_top() + mb_x * 8;
    let edge = EdgeParams {
        limit: limit + 4,
        interior_limit: i32::from(info.interior_limit),
        hev_threshold: i32::from(info.hev_threshold),
    };
    let inner = EdgeParams { limit, ..edge };
    let RowSlot { y, u, v, .. } = slot;

    if mb_x > 0 {
        macroblock_filter(y, y_pos, 1, y_stride, 16, edge);
        macroblock_filter(u, uv_pos, 1, uv_stride, 8, edge);
        macroblock_filter(v, uv_pos, 1, uv_stride, 8, edge);
    }
    if info.inner {
        for k in 1..4 {
            subblock_filter(y, y_pos + 4 * k, 1, y_stride, 16, inner);
        }
        subblock_filter(u, uv_pos + 4, 1, uv_stride, 8, inner);
        subblock_filter(v, uv_pos + 4, 1, uv_stride, 8, inner);
    }
    if mb_y > 0 {
        macroblock_filter(y, y_pos, y_stride, 1, 16, edge);
        macroblock_filter(u, uv_pos, uv_stride, 1, 8, edge);
        macroblock_filter(v, uv_pos, uv_stride, 1, 8, edge);
    }
    if info.inner {
        for k in 1..4 {
            subblock_filter(y, y_pos + 4 * k * y_stride, y_stride, 1, 16, inner);
        }
        subblock_filter(u, uv_pos + 4 * uv_stride, uv_stride, 1, 8, inner);
        subblock_filter(v, uv_pos + 4 * uv_stride, uv_stride, 1, 8, inner);
    }
}

/// Filters the macroblocks `columns` of row `mb_y`, held in `slot`.
///
/// The previous row's bottom lines must already be in the slot prefix.
pub(crate) fn filter_row(
    slot: &mut RowSlot,
    filter_type: FilterType,
    mb_y: usize,
    blocks: &[MbData],
    columns: Range<usize>,
) {
    if filter_type == FilterType::None {
        return;
    }
    for mb_x in columns {
        filter_macroblock(slot, filter_type, blocks[mb_x].finfo, mb_x, mb_y);
    }
}
