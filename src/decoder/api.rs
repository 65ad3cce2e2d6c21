//! Error types, status codes and decoder configuration.

use alloc::string::String;
use thiserror::Error;

use super::limits::Limits;

/// Errors that can occur when decoding a VP8 frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodingError {
    /// The compressed data is malformed or inconsistent.
    #[error("Corrupt bitstream: {0}")]
    BitstreamError(String),

    /// The input ended before the frame was complete.
    #[error("Not enough data: {0}")]
    NotEnoughData(String),

    /// VP8's `[0x9D, 0x01, 0x2A]` magic not found or invalid
    #[error("Invalid VP8 magic: {0:x?}")]
    Vp8MagicInvalid([u8; 3]),

    /// Only key frames can be decoded on their own.
    #[error("Not a key frame")]
    NotKeyframe,

    /// The frame tag carries a version above 3.
    #[error("Unsupported VP8 version: {0}")]
    UnsupportedVersion(u8),

    /// At time of writing, only the YUV colour-space encoded as `0` is specified
    #[error("Invalid VP8 color space: {0}")]
    ColorSpaceInvalid(u8),

    /// Invalid function call or parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The data may be valid, but this crate doesn't support decoding it.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// A buffer could not be allocated.
    #[error("Out of memory")]
    OutOfMemory,

    /// Memory limit exceeded
    #[error("Memory limit exceeded")]
    MemoryLimitExceeded,

    /// Image is too large for the platform's pointer size.
    #[error("Image too large")]
    ImageTooLarge,

    /// The output sink rejected the frame or one of its rows.
    #[error("Aborted: {0}")]
    UserAbort(String),
}

impl DecodingError {
    /// The status code this error is reported as.
    #[must_use]
    pub fn status(&self) -> Vp8Status {
        match self {
            DecodingError::BitstreamError(_)
            | DecodingError::Vp8MagicInvalid(_)
            | DecodingError::UnsupportedVersion(_)
            | DecodingError::ColorSpaceInvalid(_) => Vp8Status::BitstreamError,
            DecodingError::NotEnoughData(_) => Vp8Status::NotEnoughData,
            DecodingError::NotKeyframe | DecodingError::UnsupportedFeature(_) => {
                Vp8Status::UnsupportedFeature
            }
            DecodingError::InvalidParameter(_) => Vp8Status::InvalidParam,
            DecodingError::OutOfMemory
            | DecodingError::MemoryLimitExceeded
            | DecodingError::ImageTooLarge => Vp8Status::OutOfMemory,
            DecodingError::UserAbort(_) => Vp8Status::UserAbort,
        }
    }
}

/// Coarse outcome of a decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vp8Status {
    /// The frame is fully decoded.
    Ok,
    /// More input is needed; not an error.
    Suspended,
    /// The input is truncated.
    NotEnoughData,
    /// The input is malformed.
    BitstreamError,
    /// An allocation failed or a memory limit was hit.
    OutOfMemory,
    /// The output sink stopped the decode.
    UserAbort,
    /// The input uses a feature this decoder does not handle.
    UnsupportedFeature,
    /// The caller passed an invalid argument.
    InvalidParam,
}

/// Result of feeding data to an incremental decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// The frame is complete.
    Done,
    /// Everything available was consumed; call again with more data.
    Suspended,
}

impl From<DecodeStatus> for Vp8Status {
    fn from(status: DecodeStatus) -> Self {
        match status {
            DecodeStatus::Done => Vp8Status::Ok,
            DecodeStatus::Suspended => Vp8Status::Suspended,
        }
    }
}

/// Position of an incremental decoder in its state machine.
///
/// States only move forward, apart from the jump to [`DecState::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecState {
    /// Not enough bytes yet to tell lossy from lossless data.
    HeaderPending,
    /// Waiting for the 10-byte VP8 frame header.
    Vp8HeaderPending,
    /// Waiting for the whole of the first partition.
    Partition0Pending,
    /// Decoding macroblock rows.
    BitstreamDecoding,
    /// Waiting for the lossless header.
    Vp8lHeaderPending,
    /// Decoding lossless rows.
    Vp8lDecoding,
    /// The frame is complete.
    Done,
    /// Decoding failed; the decoder must be discarded.
    Error,
}

/// How the row pipeline splits work with a background thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadingMode {
    /// Parse, reconstruct, filter and emit every row on the calling thread.
    #[default]
    None,
    /// The calling thread parses and reconstructs; a worker filters and emits.
    FilterInWorker,
    /// The calling thread parses; a worker reconstructs, filters and emits.
    ReconstructInWorker,
}

/// Sub-rectangle of the frame to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    /// Left edge; rounded down to an even column.
    pub left: u32,
    /// Top edge; rounded down to an even row.
    pub top: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl CropRect {
    /// A crop rectangle at `(left, top)` of the given size.
    #[must_use]
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// The rectangle with its origin snapped to even coordinates, checked
    /// against a `width` x `height` frame.
    pub(crate) fn resolve(&self, width: u32, height: u32) -> Result<Self, DecodingError> {
        let left = self.left & !1;
        let top = self.top & !1;
        let fits = self.width > 0
            && self.height > 0
            && u64::from(left) + u64::from(self.width) <= u64::from(width)
            && u64::from(top) + u64::from(self.height) <= u64::from(height);
        if !fits {
            return Err(DecodingError::InvalidParameter(alloc::format!(
                "crop {}x{}+{}+{} outside {}x{} frame",
                self.width,
                self.height,
                self.left,
                self.top,
                width,
                height
            )));
        }
        Ok(Self::new(left, top, self.width, self.height))
    }

    pub(crate) const fn right(&self) -> u32 {
        self.left + self.width
    }

    pub(crate) const fn bottom(&self) -> u32 {
        self.top + self.height
    }
}

/// Pixel layout produced by the built-in output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// Planar Y, U and V with 2x2 subsampled chroma.
    #[default]
    Yuv420,
    /// Planar YUV 4:2:0 plus a full-resolution alpha plane.
    Yuva420,
    /// Packed 8-bit red, green, blue.
    Rgb,
    /// Packed 8-bit red, green, blue, alpha.
    Rgba,
    /// Packed 8-bit blue, green, red.
    Bgr,
    /// Packed 8-bit blue, green, red, alpha.
    Bgra,
    /// Packed RGBA with colour channels scaled by alpha.
    RgbaPremultiplied,
}

impl ColorMode {
    /// Bytes per packed pixel, or 1 for the planar modes.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            ColorMode::Yuv420 | ColorMode::Yuva420 => 1,
            ColorMode::Rgb | ColorMode::Bgr => 3,
            ColorMode::Rgba | ColorMode::Bgra | ColorMode::RgbaPremultiplied => 4,
        }
    }

    /// Whether the output carries an alpha channel.
    #[must_use]
    pub const fn has_alpha(self) -> bool {
        matches!(
            self,
            ColorMode::Yuva420 | ColorMode::Rgba | ColorMode::Bgra | ColorMode::RgbaPremultiplied
        )
    }

    /// Whether the output is packed RGB-family rather than planar YUV.
    #[must_use]
    pub const fn is_rgb(self) -> bool {
        !matches!(self, ColorMode::Yuv420 | ColorMode::Yuva420)
    }
}

/// VP8 decoder configuration. Reusable across requests.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodeConfig {
    /// Row pipeline threading. Default: [`ThreadingMode::None`].
    pub threading: ThreadingMode,
    /// Chroma dithering strength, 0 to 100. Default: 0.
    pub dithering_strength: u8,
    /// Alpha dithering strength, 0 to 100. Smooths quantized alpha levels. Default: 0.
    pub alpha_dithering_strength: u8,
    /// Skip the in-loop deblocking filter. Default: false.
    pub bypass_filtering: bool,
    /// Smooth chroma upsampling for RGB output. Default: true.
    pub fancy_upsampling: bool,
    /// Emit only this part of the frame. Default: the whole frame.
    pub crop: Option<CropRect>,
    /// Output pixel layout. Default: [`ColorMode::Yuv420`].
    pub output: ColorMode,
    /// Resource limits checked before allocating the frame.
    pub limits: Limits,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            threading: ThreadingMode::None,
            dithering_strength: 0,
            alpha_dithering_strength: 0,
            bypass_filtering: false,
            fancy_upsampling: true,
            crop: None,
            output: ColorMode::Yuv420,
            limits: Limits::default(),
        }
    }
}

impl DecodeConfig {
    /// Set the threading mode.
    #[must_use]
    pub fn threading(mut self, mode: ThreadingMode) -> Self {
        self.threading = mode;
        self
    }

    /// Set the chroma dithering strength (clamped to 100).
    #[must_use]
    pub fn dithering_strength(mut self, strength: u8) -> Self {
        self.dithering_strength = strength.min(100);
        self
    }

    /// Set the alpha dithering strength (clamped to 100).
    #[must_use]
    pub fn alpha_dithering_strength(mut self, strength: u8) -> Self {
        self.alpha_dithering_strength = strength.min(100);
        self
    }

    /// Disable the in-loop deblocking filter.
    #[must_use]
    pub fn bypass_filtering(mut self, bypass: bool) -> Self {
        self.bypass_filtering = bypass;
        self
    }

    /// Enable or disable fancy upsampling.
    #[must_use]
    pub fn fancy_upsampling(mut self, fancy: bool) -> Self {
        self.fancy_upsampling = fancy;
        self
    }

    /// Emit only `rect`.
    #[must_use]
    pub fn crop(mut self, rect: CropRect) -> Self {
        self.crop = Some(rect);
        self
    }

    /// Set the output pixel layout.
    #[must_use]
    pub fn output(mut self, mode: ColorMode) -> Self {
        self.output = mode;
        self
    }

    /// Set the resource limits.
    #[must_use]
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}
