//! Row-wise YUV -> RGB conversion for the built-in frame buffer.
//!
//! Decoded frames are Y'CbCr 4:2:0: the luma plane maps 1-1 onto pixels,
//! each chroma sample covers a 2x2 pixel square. The simple upsampler just
//! repeats each chroma sample over its square:
//!
//! ||||||
//! |yyyy|
//! |yyyy|
//! |yyyy|
//! |yyyy|
//! ||||||
//!
//! |||||||
//! |uu|vv|
//! |uu|vv|
//! |||||||
//!
//! Fancy upsampling, the default, interpolates instead: a pixel gets
//! `(9*near + 3*side + 3*vertical + diagonal + 8) / 16` of the chroma
//! samples around it, where `near` is the sample covering it. Edge pixels
//! mirror, so the first and last rows use their own chroma row twice.

/// `_mm_mulhi_epu16` emulation
fn mulhi(v: u8, coeff: u16) -> i32 {
    ((u32::from(v) * u32::from(coeff)) >> 8) as i32
}

// Clippy suggests the clamp method, but it seems to optimize worse as of rustc 1.82.0 nightly.
#[allow(clippy::manual_clamp)]
fn clip(v: i32) -> u8 {
    const YUV_FIX2: i32 = 6;
    (v >> YUV_FIX2).max(0).min(255) as u8
}

#[inline(always)]
fn yuv_to_r(y: u8, v: u8) -> u8 {
    clip(mulhi(y, 19077) + mulhi(v, 26149) - 14234)
}

#[inline(always)]
fn yuv_to_g(y: u8, u: u8, v: u8) -> u8 {
    clip(mulhi(y, 19077) - mulhi(u, 6419) - mulhi(v, 13320) + 8708)
}

#[inline(always)]
fn yuv_to_b(y: u8, u: u8) -> u8 {
    clip(mulhi(y, 19077) + mulhi(u, 33050) - 17685)
}

/// Byte layout of one packed output pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PixelLayout {
    /// Bytes per pixel, 3 or 4.
    pub(crate) bpp: usize,
    /// Blue first instead of red.
    pub(crate) bgr: bool,
}

impl PixelLayout {
    #[inline]
    fn set_pixel(self, px: &mut [u8], y: u8, u: u8, v: u8) {
        let (r, g, b) = (yuv_to_r(y, v), yuv_to_g(y, u, v), yuv_to_b(y, u));
        if self.bgr {
            px[0] = b;
            px[1] = g;
            px[2] = r;
        } else {
            px[0] = r;
            px[1] = g;
            px[2] = b;
        }
    }
}

#[inline]
fn fancy_chroma(main: u8, side: u8, vertical: u8, diagonal: u8) -> u8 {
    let val0 = u16::from(main);
    let val1 = u16::from(side);
    let val2 = u16::from(vertical);
    let val3 = u16::from(diagonal);
    ((9 * val0 + 3 * val1 + 3 * val2 + val3 + 8) / 16) as u8
}

/// Converts one row, repeating each chroma sample over two pixels.
///
/// Alpha bytes of a 4-byte layout are left untouched.
pub(crate) fn convert_row_simple(out: &mut [u8], layout: PixelLayout, y_row: &[u8], u_row: &[u8], v_row: &[u8]) {
    for (x, (px, &y)) in out.chunks_exact_mut(layout.bpp).zip(y_row).enumerate() {
        layout.set_pixel(px, y, u_row[x / 2], v_row[x / 2]);
    }
}

/// Converts one row with interpolated chroma.
///
/// `u_near`/`v_near` is the chroma row covering this luma row, and
/// `u_far`/`v_far` the neighbouring chroma row on the side the luma row
/// leans towards. Pass the same row twice at the top and bottom edges.
pub(crate) fn convert_row_fancy(
    out: &mut [u8],
    layout: PixelLayout,
    y_row: &[u8],
    u_near: &[u8],
    u_far: &[u8],
    v_near: &[u8],
    v_far: &[u8],
) {
    let width = y_row.len();
    let bpp = layout.bpp;
    if width == 0 {
        return;
    }

    // The first pixel has no chroma to its left.
    let u = fancy_chroma(u_near[0], u_near[0], u_far[0], u_far[0]);
    let v = fancy_chroma(v_near[0], v_near[0], v_far[0], v_far[0]);
    layout.set_pixel(&mut out[..bpp], y_row[0], u, v);

    // Pixels 2k+1 and 2k+2 sit between chroma columns k and k+1.
    let mut main_row_chunks = out[bpp..width * bpp].chunks_exact_mut(bpp * 2);
    let mut main_y_chunks = y_row[1..].chunks_exact(2);
    for (((((px, ys), un), uf), vn), vf) in (&mut main_row_chunks)
        .zip(&mut main_y_chunks)
        .zip(u_near.windows(2))
        .zip(u_far.windows(2))
        .zip(v_near.windows(2))
        .zip(v_far.windows(2))
    {
        let u = fancy_chroma(un[0], un[1], uf[0], uf[1]);
        let v = fancy_chroma(vn[0], vn[1], vf[0], vf[1]);
        layout.set_pixel(&mut px[..bpp], ys[0], u, v);
        let u = fancy_chroma(un[1], un[0], uf[1], uf[0]);
        let v = fancy_chroma(vn[1], vn[0], vf[1], vf[0]);
        layout.set_pixel(&mut px[bpp..], ys[1], u, v);
    }

    // An even width leaves one pixel with no chroma to its right.
    let final_pixel = main_row_chunks.into_remainder();
    if let (px, [y]) = (final_pixel, main_y_chunks.remainder()) {
        let last = (width - 1) / 2;
        let u = fancy_chroma(u_near[last], u_near[last], u_far[last], u_far[last]);
        let v = fancy_chroma(v_near[last], v_near[last], v_far[last], v_far[last]);
        layout.set_pixel(&mut px[..bpp], *y, u, v);
    }
}

// RGB -> YUV, BT.601 limited range in 16 bit fixed point:
// Y = 0.2569 * R + 0.5044 * G + 0.0979 * B + 16
// U = -0.1482 * R - 0.2910 * G + 0.4392 * B + 128
// V = 0.4392 * R - 0.3678 * G - 0.0714 * B + 128
const YUV_FIX: i32 = 16;
const YUV_HALF: i32 = 1 << (YUV_FIX - 1);

fn rgb_to_y(rgb: &[u8]) -> u8 {
    let luma = 16839 * i32::from(rgb[0]) + 33059 * i32::from(rgb[1]) + 6420 * i32::from(rgb[2]);
    ((luma + YUV_HALF + (16 << YUV_FIX)) >> YUV_FIX) as u8
}

fn rgb_to_u_raw(rgb: &[u8]) -> i32 {
    -9719 * i32::from(rgb[0]) - 19081 * i32::from(rgb[1])
        + 28800 * i32::from(rgb[2])
        + (128 << YUV_FIX)
}

fn rgb_to_v_raw(rgb: &[u8]) -> i32 {
    28800 * i32::from(rgb[0]) - 24116 * i32::from(rgb[1]) - 4684 * i32::from(rgb[2])
        + (128 << YUV_FIX)
}

/// Converts a pair of RGBA rows to two luma rows and one chroma row.
///
/// `second` may be the same row as `first` for the last row of an odd
/// height; chroma then averages each pixel with itself. A lone last column
/// is handled the same way.
pub(crate) fn rgba_rows_to_yuv(first: &[u8], second: &[u8], y_first: &mut [u8], y_second: &mut [u8], u: &mut [u8], v: &mut [u8]) {
    for (y, px) in y_first.iter_mut().zip(first.chunks_exact(4)) {
        *y = rgb_to_y(px);
    }
    for (y, px) in y_second.iter_mut().zip(second.chunks_exact(4)) {
        *y = rgb_to_y(px);
    }
    let width = y_first.len();
    for (x, (u, v)) in u.iter_mut().zip(v.iter_mut()).enumerate() {
        let left = 2 * x * 4;
        let right = if 2 * x + 1 < width { left + 4 } else { left };
        let quad = [
            &first[left..left + 4],
            &first[right..right + 4],
            &second[left..left + 4],
            &second[right..right + 4],
        ];
        let u_sum: i32 = quad.iter().map(|px| rgb_to_u_raw(px)).sum();
        let v_sum: i32 = quad.iter().map(|px| rgb_to_v_raw(px)).sum();
        *u = ((u_sum + (YUV_HALF << 2)) >> (YUV_FIX + 2)) as u8;
        *v = ((v_sum + (YUV_HALF << 2)) >> (YUV_FIX + 2)) as u8;
    }
}

/// Scales the colour channels of RGBA pixels by their alpha.
pub(crate) fn premultiply_row(row: &mut [u8]) {
    for px in row.chunks_exact_mut(4) {
        let a = u32::from(px[3]);
        if a != 255 {
            for c in &mut px[..3] {
                *c = ((u32::from(*c) * a + 127) / 255) as u8;
            }
        }
    }
}
