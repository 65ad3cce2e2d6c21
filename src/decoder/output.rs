//! The built-in [`RowSink`]: a whole-frame buffer in YUV or packed RGB.

use alloc::vec;
use alloc::vec::Vec;

use super::api::ColorMode;
use super::io::{FrameIo, RowBatch, RowSink};
use crate::yuv::{
    convert_row_fancy, convert_row_simple, premultiply_row, rgba_rows_to_yuv, PixelLayout,
};

/// Borrowed planes of a YUV 4:2:0 frame with optional alpha.
#[derive(Clone, Copy, Debug)]
pub struct YuvaPlanes<'a> {
    /// Luma, `y_stride * height` bytes.
    pub y: &'a [u8],
    /// U, `uv_stride * ((height + 1) / 2)` bytes.
    pub u: &'a [u8],
    /// V, same layout as `u`.
    pub v: &'a [u8],
    /// Alpha, same layout as `y`.
    pub a: Option<&'a [u8]>,
    /// Stride of `y` and `a`.
    pub y_stride: usize,
    /// Stride of `u` and `v`.
    pub uv_stride: usize,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
}

/// Collects decoded rows into whole-frame planes and converts them to the
/// requested [`ColorMode`] as they arrive.
///
/// The buffer covers the crop rectangle of the decode. Rows become visible
/// in [`last_row`](Self::last_row) order, so a partially decoded frame can
/// be shown while an incremental decode is still running.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    mode: ColorMode,
    width: usize,
    height: usize,
    fancy: bool,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
    a: Option<Vec<u8>>,
    rgb: Vec<u8>,
    /// Even RGBA row waiting for its partner before chroma can be computed.
    pending_rgba: Vec<u8>,
    /// Rows received from the decoder.
    received: usize,
    /// Rows converted to packed RGB.
    converted: usize,
}

impl FrameBuffer {
    /// An empty buffer that will hold the frame in `mode`.
    #[must_use]
    pub fn new(mode: ColorMode) -> Self {
        Self {
            mode,
            width: 0,
            height: 0,
            fancy: true,
            y: Vec::new(),
            u: Vec::new(),
            v: Vec::new(),
            a: None,
            rgb: Vec::new(),
            pending_rgba: Vec::new(),
            received: 0,
            converted: 0,
        }
    }

    /// The output colour mode.
    #[must_use]
    pub fn color_mode(&self) -> ColorMode {
        self.mode
    }

    /// Width of the buffered picture.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height of the buffered picture.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of rows, from the top, that are final in the output mode.
    #[must_use]
    pub fn last_row(&self) -> usize {
        if self.mode.is_rgb() {
            self.converted
        } else {
            self.received
        }
    }

    /// Packed pixels, `width * bytes_per_pixel` bytes per row, for the RGB
    /// family of modes.
    #[must_use]
    pub fn rgb(&self) -> Option<&[u8]> {
        self.mode.is_rgb().then_some(&self.rgb[..])
    }

    /// The planes as decoded.
    ///
    /// Available in every mode: the RGB modes convert from them.
    #[must_use]
    pub fn yuva(&self) -> YuvaPlanes<'_> {
        YuvaPlanes {
            y: &self.y,
            u: &self.u,
            v: &self.v,
            a: self.a.as_deref(),
            y_stride: self.width,
            uv_stride: self.width.div_ceil(2),
            width: self.width,
            height: self.height,
        }
    }

    /// Consumes the buffer, returning the packed pixels or, in the YUV
    /// modes, the luma plane followed by the U and V planes.
    #[must_use]
    pub fn into_pixels(self) -> Vec<u8> {
        if self.mode.is_rgb() {
            self.rgb
        } else {
            let mut out = self.y;
            out.extend_from_slice(&self.u);
            out.extend_from_slice(&self.v);
            if let Some(a) = self.a {
                out.extend_from_slice(&a);
            }
            out
        }
    }

    /// Bytes the buffer will need for a `width` x `height` picture.
    pub(crate) fn byte_size(mode: ColorMode, width: usize, height: usize) -> usize {
        let luma = width * height;
        let chroma = 2 * width.div_ceil(2) * height.div_ceil(2);
        let alpha = if mode.has_alpha() { luma } else { 0 };
        let packed = if mode.is_rgb() {
            luma * mode.bytes_per_pixel()
        } else {
            0
        };
        luma + chroma + alpha + packed
    }

    /// Stores one row of RGBA pixels from a lossless decode.
    ///
    /// Rows must arrive in order. In the YUV modes chroma is computed per
    /// pair of rows, so an even row stays pending until its partner or the
    /// end of the frame arrives.
    pub(crate) fn put_rgba_row(&mut self, row: usize, rgba: &[u8]) -> bool {
        let width = self.width;
        if row != self.received + usize::from(!self.pending_rgba.is_empty())
            || row >= self.height
            || rgba.len() < width * 4
        {
            return false;
        }
        let rgba = &rgba[..width * 4];
        if let Some(a) = self.a.as_mut() {
            for (dst, px) in a[row * width..][..width].iter_mut().zip(rgba.chunks_exact(4)) {
                *dst = px[3];
            }
        }

        if self.mode.is_rgb() {
            let bpp = self.mode.bytes_per_pixel();
            let bgr = matches!(self.mode, ColorMode::Bgr | ColorMode::Bgra);
            let out = &mut self.rgb[row * width * bpp..][..width * bpp];
            for (dst, px) in out.chunks_exact_mut(bpp).zip(rgba.chunks_exact(4)) {
                if bgr {
                    dst[..3].copy_from_slice(&[px[2], px[1], px[0]]);
                } else {
                    dst[..3].copy_from_slice(&px[..3]);
                }
                if bpp == 4 {
                    dst[3] = px[3];
                }
            }
            if self.mode == ColorMode::RgbaPremultiplied {
                premultiply_row(out);
            }
            self.received = row + 1;
            self.converted = row + 1;
            return true;
        }

        if row % 2 == 0 && row + 1 < self.height {
            self.pending_rgba.clear();
            self.pending_rgba.extend_from_slice(rgba);
            return true;
        }
        let first_row = row & !1;
        let pending = core::mem::take(&mut self.pending_rgba);
        let first = if row % 2 == 1 { &pending[..] } else { rgba };
        let uv_w = width.div_ceil(2);
        let uv_at = (first_row / 2) * uv_w;
        let (y_first, y_second) = self.y[first_row * width..].split_at_mut(width);
        let y_second = if row % 2 == 1 {
            &mut y_second[..width]
        } else {
            // A lone last row converts into a scratch second row.
            &mut [][..]
        };
        rgba_rows_to_yuv(
            first,
            rgba,
            &mut y_first[..width],
            y_second,
            &mut self.u[uv_at..uv_at + uv_w],
            &mut self.v[uv_at..uv_at + uv_w],
        );
        self.received = row + 1;
        true
    }

    const fn layout(&self) -> PixelLayout {
        PixelLayout {
            bpp: self.mode.bytes_per_pixel(),
            bgr: matches!(self.mode, ColorMode::Bgr | ColorMode::Bgra),
        }
    }

    fn chroma_row(&self, row: usize) -> (&[u8], &[u8]) {
        let uv_w = self.width.div_ceil(2);
        (&self.u[row * uv_w..][..uv_w], &self.v[row * uv_w..][..uv_w])
    }

    /// Converts the rows whose chroma neighbourhood has fully arrived.
    fn convert_ready_rows(&mut self) {
        if !self.mode.is_rgb() {
            return;
        }
        let uv_rows_in = self.received.div_ceil(2);
        let uv_rows_total = self.height.div_ceil(2);
        let layout = self.layout();
        let bpp = layout.bpp;
        let mut rgb = core::mem::take(&mut self.rgb);

        while self.converted < self.received {
            let r = self.converted;
            let near = r / 2;
            let far = if !self.fancy {
                near
            } else if r % 2 == 1 {
                (near + 1).min(uv_rows_total - 1)
            } else {
                near.saturating_sub(1)
            };
            if far >= uv_rows_in {
                break;
            }
            let out = &mut rgb[r * self.width * bpp..][..self.width * bpp];
            let y_row = &self.y[r * self.width..][..self.width];
            let (u_near, v_near) = self.chroma_row(near);
            if self.fancy {
                let (u_far, v_far) = self.chroma_row(far);
                convert_row_fancy(out, layout, y_row, u_near, u_far, v_near, v_far);
            } else {
                convert_row_simple(out, layout, y_row, u_near, v_near);
            }
            if bpp == 4 {
                match &self.a {
                    Some(a) => {
                        let alpha = &a[r * self.width..][..self.width];
                        for (px, &av) in out.chunks_exact_mut(4).zip(alpha) {
                            px[3] = av;
                        }
                    }
                    None => {
                        for px in out.chunks_exact_mut(4) {
                            px[3] = 255;
                        }
                    }
                }
                if self.mode == ColorMode::RgbaPremultiplied {
                    premultiply_row(out);
                }
            }
            self.converted += 1;
        }
        self.rgb = rgb;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(ColorMode::default())
    }
}

impl RowSink for FrameBuffer {
    fn setup(&mut self, io: &mut FrameIo) -> bool {
        let width = io.crop.width as usize;
        let height = io.crop.height as usize;
        if width == 0 || height == 0 {
            return false;
        }
        let uv_len = width.div_ceil(2) * height.div_ceil(2);
        self.width = width;
        self.height = height;
        self.fancy = io.fancy_upsampling;
        self.y = vec![0; width * height];
        self.u = vec![0; uv_len];
        self.v = vec![0; uv_len];
        // An alpha-less frame decoded into an alpha mode is opaque.
        self.a = (io.has_alpha || self.mode.has_alpha()).then(|| vec![255; width * height]);
        self.rgb = if self.mode.is_rgb() {
            vec![0; width * height * self.mode.bytes_per_pixel()]
        } else {
            Vec::new()
        };
        self.pending_rgba.clear();
        self.received = 0;
        self.converted = 0;
        true
    }

    fn put(&mut self, batch: &RowBatch<'_>) -> bool {
        let width = self.width;
        if batch.width != width || batch.row + batch.height > self.height {
            return false;
        }
        for j in 0..batch.height {
            let dst = (batch.row + j) * width;
            self.y[dst..dst + width].copy_from_slice(&batch.y[j * batch.y_stride..][..width]);
        }
        let uv_w = width.div_ceil(2);
        let uv_row = batch.row / 2;
        for j in 0..batch.height.div_ceil(2) {
            let dst = (uv_row + j) * uv_w;
            let src = j * batch.uv_stride;
            self.u[dst..dst + uv_w].copy_from_slice(&batch.u[src..][..uv_w]);
            self.v[dst..dst + uv_w].copy_from_slice(&batch.v[src..][..uv_w]);
        }
        if let (Some(plane), Some(a)) = (self.a.as_mut(), batch.a) {
            for j in 0..batch.height {
                let dst = (batch.row + j) * width;
                plane[dst..dst + width].copy_from_slice(&a[j * batch.a_stride..][..width]);
            }
        }
        self.received = batch.row + batch.height;
        self.convert_ready_rows();
        true
    }
}
