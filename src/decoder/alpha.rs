//! Alpha planes for lossy frames.
//!
//! The row pipeline asks an [`AlphaDecoder`] for the alpha rows that match
//! each band of colour rows it emits. [`AlphPlaneDecoder`] handles the
//! payload of a WebP `ALPH` chunk.

use alloc::boxed::Box;
use alloc::format;
use alloc::vec;
use alloc::vec::Vec;

use super::api::DecodingError;
use super::lossless::LosslessDecoder;
use super::quant_levels::dequantize_levels;
use crate::slice_reader::SliceReader;

/// Supplies alpha rows alongside the decoded colour rows.
pub trait AlphaDecoder {
    /// Called once with the frame size before any rows are requested.
    ///
    /// `dithering_strength` (0..=100) asks for quantized alpha levels to
    /// be smoothed. Decoders without quantized levels may ignore it.
    fn init(&mut self, width: u32, height: u32, dithering_strength: u8) -> Result<(), DecodingError> {
        let _ = (width, height, dithering_strength);
        Ok(())
    }

    /// Returns `num_rows` rows of `width` alpha samples starting at `row`,
    /// or `None` if they cannot be produced.
    ///
    /// Requests arrive in top-to-bottom order and never overlap.
    fn decode_rows(&mut self, row: usize, num_rows: usize) -> Option<&[u8]>;
}

impl<A: AlphaDecoder + ?Sized> AlphaDecoder for Box<A> {
    fn init(&mut self, width: u32, height: u32, dithering_strength: u8) -> Result<(), DecodingError> {
        (**self).init(width, height, dithering_strength)
    }

    fn decode_rows(&mut self, row: usize, num_rows: usize) -> Option<&[u8]> {
        (**self).decode_rows(row, num_rows)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Compression {
    Raw,
    Lossless,
}

/// Spatial predictor applied to the alpha plane before compression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlphaFilter {
    /// Samples are stored as-is.
    None,
    /// Each sample is predicted from its left neighbour.
    Horizontal,
    /// Each sample is predicted from the sample above.
    Vertical,
    /// Each sample is predicted as `left + above - above_left`.
    Gradient,
}

impl AlphaFilter {
    fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Self::None,
            1 => Self::Horizontal,
            2 => Self::Vertical,
            _ => Self::Gradient,
        }
    }

    /// Reconstructs one row in place from its residuals and the row above.
    fn unfilter(self, prev: Option<&[u8]>, row: &mut [u8]) {
        match (self, prev) {
            (Self::None, _) => {}
            (_, None) | (Self::Horizontal, Some(_)) => {
                let mut pred = prev.map_or(0, |p| p[0]);
                for v in row.iter_mut() {
                    *v = v.wrapping_add(pred);
                    pred = *v;
                }
            }
            (Self::Vertical, Some(prev)) => {
                for (v, &above) in row.iter_mut().zip(prev) {
                    *v = v.wrapping_add(above);
                }
            }
            (Self::Gradient, Some(prev)) => {
                let mut left = prev[0];
                let mut top_left = prev[0];
                for (v, &top) in row.iter_mut().zip(prev) {
                    let pred = (i32::from(left) + i32::from(top) - i32::from(top_left)).clamp(0, 255);
                    left = v.wrapping_add(pred as u8);
                    top_left = top;
                    *v = left;
                }
            }
        }
    }
}

/// Decoder for the payload of an `ALPH` chunk.
///
/// Raw payloads are handled directly. Losslessly compressed payloads need
/// a [`LosslessDecoder`], of which only the green channel is used.
pub struct AlphPlaneDecoder {
    data: Vec<u8>,
    compression: Compression,
    filter: AlphaFilter,
    pre_processing: u8,
    lossless: Option<Box<dyn LosslessDecoder + Send>>,
    width: usize,
    height: usize,
    dithering_strength: u8,
    plane: Vec<u8>,
    /// Rows of `plane` that are final.
    decoded: usize,
}

impl core::fmt::Debug for AlphPlaneDecoder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AlphPlaneDecoder")
            .field("compression", &self.compression)
            .field("filter", &self.filter)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("decoded", &self.decoded)
            .finish_non_exhaustive()
    }
}

impl AlphPlaneDecoder {
    /// Parses the header byte of `chunk`, the `ALPH` payload.
    pub fn new(chunk: &[u8]) -> Result<Self, DecodingError> {
        let mut r = SliceReader::new(chunk);
        let header = r
            .read_u8()
            .ok_or_else(|| DecodingError::NotEnoughData("empty alpha chunk".into()))?;
        let compression = match header & 3 {
            0 => Compression::Raw,
            1 => Compression::Lossless,
            method => {
                return Err(DecodingError::BitstreamError(format!(
                    "invalid alpha compression method {method}"
                )))
            }
        };
        let pre_processing = (header >> 4) & 3;
        if pre_processing > 1 || header >> 6 != 0 {
            return Err(DecodingError::BitstreamError(format!(
                "invalid alpha header byte {header:#04x}"
            )));
        }
        Ok(Self {
            data: r.rest().to_vec(),
            compression,
            filter: AlphaFilter::from_bits(header >> 2),
            pre_processing,
            lossless: None,
            width: 0,
            height: 0,
            dithering_strength: 0,
            plane: Vec::new(),
            decoded: 0,
        })
    }

    /// Sets the decoder for losslessly compressed payloads.
    #[must_use]
    pub fn with_lossless(mut self, decoder: Box<dyn LosslessDecoder + Send>) -> Self {
        self.lossless = Some(decoder);
        self
    }

    /// The spatial filter the payload was compressed with.
    #[must_use]
    pub fn filter(&self) -> AlphaFilter {
        self.filter
    }

    /// Whether the encoder quantized the alpha levels.
    #[must_use]
    pub fn is_quantized(&self) -> bool {
        self.pre_processing == 1
    }

    /// Whether the plane is smoothed once decoded.
    fn smooths(&self) -> bool {
        self.pre_processing == 1 && self.dithering_strength > 0
    }

    fn unfilter_rows(&mut self, start: usize, end: usize) {
        let width = self.width;
        for y in start..end {
            let (above, rest) = self.plane.split_at_mut(y * width);
            let prev = (y > 0).then(|| &above[(y - 1) * width..]);
            self.filter.unfilter(prev, &mut rest[..width]);
        }
    }

    fn decode_raw(&mut self, end: usize) {
        let width = self.width;
        let start = self.decoded;
        self.plane[start * width..end * width].copy_from_slice(&self.data[start * width..end * width]);
        self.unfilter_rows(start, end);
        self.decoded = end;
    }

    fn decode_lossless(&mut self) -> Result<(), DecodingError> {
        let Some(mut lossless) = self.lossless.take() else {
            return Err(DecodingError::UnsupportedFeature(
                "lossless alpha without a lossless decoder".into(),
            ));
        };
        let result = self.run_lossless(lossless.as_mut());
        self.lossless = Some(lossless);
        result
    }

    fn run_lossless(&mut self, lossless: &mut (dyn LosslessDecoder + Send)) -> Result<(), DecodingError> {
        let size = lossless
            .read_header(&self.data)?
            .ok_or_else(|| DecodingError::NotEnoughData("truncated lossless alpha header".into()))?;
        if size != (self.width as u32, self.height as u32) {
            return Err(DecodingError::BitstreamError(format!(
                "alpha plane is {}x{}, frame is {}x{}",
                size.0, size.1, self.width, self.height
            )));
        }
        let width = self.width;
        let mut received = self.decoded;
        let plane = &mut self.plane;
        let done = lossless.decode_rows(&self.data, &mut |y, rgba| {
            if y != received || rgba.len() < width * 4 {
                return false;
            }
            for (dst, px) in plane[y * width..][..width].iter_mut().zip(rgba.chunks_exact(4)) {
                *dst = px[1];
            }
            received += 1;
            true
        })?;
        if !done || received != self.height {
            return Err(DecodingError::NotEnoughData("truncated lossless alpha".into()));
        }
        let start = self.decoded;
        self.unfilter_rows(start, received);
        self.decoded = received;
        Ok(())
    }
}

impl AlphaDecoder for AlphPlaneDecoder {
    fn init(&mut self, width: u32, height: u32, dithering_strength: u8) -> Result<(), DecodingError> {
        let (width, height) = (width as usize, height as usize);
        if self.compression == Compression::Raw && self.data.len() < width * height {
            return Err(DecodingError::NotEnoughData(format!(
                "alpha payload of {} bytes for a {width}x{height} frame",
                self.data.len()
            )));
        }
        if self.compression == Compression::Lossless && self.lossless.is_none() {
            return Err(DecodingError::UnsupportedFeature(
                "lossless alpha without a lossless decoder".into(),
            ));
        }
        self.width = width;
        self.height = height;
        self.dithering_strength = dithering_strength;
        self.plane = vec![0; width * height];
        self.decoded = 0;
        Ok(())
    }

    fn decode_rows(&mut self, row: usize, num_rows: usize) -> Option<&[u8]> {
        let end = row.checked_add(num_rows)?;
        if end > self.height {
            return None;
        }
        if end > self.decoded {
            // Smoothing looks at the whole plane, so it is decoded up front.
            let smooth = self.smooths();
            match self.compression {
                Compression::Raw => self.decode_raw(if smooth { self.height } else { end }),
                Compression::Lossless => {
                    if let Err(e) = self.decode_lossless() {
                        log::debug!("alpha plane: {e}");
                        return None;
                    }
                }
            }
            if smooth {
                dequantize_levels(&mut self.plane, self.width, self.height, self.dithering_strength);
            }
        }
        Some(&self.plane[row * self.width..end * self.width])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::lossless::raw::{encode, RawRgba};

    fn chunk(header: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![header];
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_header_validation() {
        assert!(AlphPlaneDecoder::new(&[]).is_err());
        assert!(AlphPlaneDecoder::new(&[2]).is_err());
        assert!(AlphPlaneDecoder::new(&[0x20]).is_err());
        assert!(AlphPlaneDecoder::new(&[0x40]).is_err());
        let dec = AlphPlaneDecoder::new(&[0x1c]).unwrap();
        assert_eq!(dec.filter(), AlphaFilter::Gradient);
        assert!(dec.is_quantized());
    }

    #[test]
    fn test_raw_unfiltered() {
        let mut dec = AlphPlaneDecoder::new(&chunk(0, &[1, 2, 3, 4, 5, 6])).unwrap();
        dec.init(2, 3, 0).unwrap();
        assert_eq!(dec.decode_rows(0, 2), Some(&[1, 2, 3, 4][..]));
        assert_eq!(dec.decode_rows(2, 1), Some(&[5, 6][..]));
        assert_eq!(dec.decode_rows(2, 2), None);
    }

    #[test]
    fn test_raw_payload_too_short() {
        let mut dec = AlphPlaneDecoder::new(&chunk(0, &[1, 2, 3])).unwrap();
        assert!(dec.init(2, 2, 0).is_err());
    }

    #[test]
    fn test_horizontal_unfilter() {
        // First row predicts from 0, later rows start from the sample above.
        let mut dec = AlphPlaneDecoder::new(&chunk(1 << 2, &[10, 1, 1, 5, 2, 2])).unwrap();
        dec.init(3, 2, 0).unwrap();
        assert_eq!(dec.decode_rows(0, 1), Some(&[10, 11, 12][..]));
        assert_eq!(dec.decode_rows(1, 1), Some(&[15, 17, 19][..]));
    }

    #[test]
    fn test_vertical_unfilter() {
        let mut dec = AlphPlaneDecoder::new(&chunk(2 << 2, &[10, 1, 1, 5, 255, 2])).unwrap();
        dec.init(3, 2, 0).unwrap();
        assert_eq!(dec.decode_rows(0, 2), Some(&[10, 11, 12, 15, 10, 14][..]));
    }

    #[test]
    fn test_gradient_unfilter() {
        let mut dec = AlphPlaneDecoder::new(&chunk(3 << 2, &[100, 0, 50, 0, 0, 0])).unwrap();
        dec.init(3, 2, 0).unwrap();
        // Second row: predictors clip(left + top - top_left).
        // x=0: 100; x=1: 100 + 100 - 100 = 100; x=2: 100 + 150 - 100 = 150.
        assert_eq!(dec.decode_rows(0, 2), Some(&[100, 100, 150, 100, 100, 150][..]));
    }

    #[test]
    fn test_quantized_levels_follow_strength() {
        // Four vertical stripes of quantized levels.
        let payload: Vec<u8> = (0..12 * 12).map(|i| ((i % 12) / 3 * 60) as u8).collect();
        let rows = |header: u8, strength: u8| {
            let mut dec = AlphPlaneDecoder::new(&chunk(header, &payload)).unwrap();
            dec.init(12, 12, strength).unwrap();
            let first = dec.decode_rows(0, 4).unwrap().to_vec();
            [first, dec.decode_rows(4, 8).unwrap().to_vec()].concat()
        };
        assert_eq!(rows(0x10, 0), payload);
        assert_eq!(rows(0x00, 100), payload);
        let smoothed = rows(0x10, 100);
        assert_ne!(smoothed, payload);
        for row in smoothed.chunks_exact(12) {
            assert_eq!((row[0], row[11]), (0, 180));
            assert!(row.windows(2).all(|p| p[0] <= p[1]), "{row:?}");
        }
    }

    #[test]
    fn test_lossless_uses_green_channel() {
        let rgba = [9, 40, 9, 9, 9, 41, 9, 9];
        let payload = encode(2, 1, &rgba);
        let mut dec = AlphPlaneDecoder::new(&chunk(1, &payload))
            .unwrap()
            .with_lossless(Box::new(RawRgba::default()));
        dec.init(2, 1, 0).unwrap();
        assert_eq!(dec.decode_rows(0, 1), Some(&[40, 41][..]));
    }

    #[test]
    fn test_lossless_without_decoder() {
        let mut dec = AlphPlaneDecoder::new(&[1]).unwrap();
        assert!(matches!(
            dec.init(1, 1, 0),
            Err(DecodingError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn test_lossless_size_mismatch() {
        let payload = encode(1, 1, &[0, 0, 0, 0]);
        let mut dec = AlphPlaneDecoder::new(&chunk(1, &payload))
            .unwrap()
            .with_lossless(Box::new(RawRgba::default()));
        dec.init(2, 1, 0).unwrap();
        assert_eq!(dec.decode_rows(0, 1), None);
    }
}
