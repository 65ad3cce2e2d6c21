//! Resource limits checked before a frame allocates anything.
//!
//! A VP8 key frame header is ten bytes, yet it may announce a 16383x16383
//! frame. The limits are checked against the header and against the
//! decoder's own estimate of the memory it is about to allocate.

use alloc::format;

use super::api::DecodingError;

/// Largest width or height a VP8 frame header can express.
const VP8_MAX_DIMENSION: u32 = (1 << 14) - 1;

/// Upper bounds on what a single decode may allocate.
///
/// `None` disables a bound.
///
/// # Example
///
/// ```rust
/// use zenvp8::{DecodeConfig, Limits};
///
/// let limits = Limits::default()
///     .max_dimensions(4096, 4096)
///     .max_memory(64 << 20);
/// let config = DecodeConfig::default().limits(limits);
///
/// // Trusted input only.
/// let unlimited = Limits::none();
/// ```
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Limits {
    /// Widest frame accepted, in pixels.
    pub max_width: Option<u32>,
    /// Tallest frame accepted, in pixels.
    pub max_height: Option<u32>,
    /// Most pixels accepted, whatever the aspect ratio.
    pub max_total_pixels: Option<u64>,
    /// Most bytes the caches and the output buffer may take together.
    pub max_memory: Option<u64>,
}

impl Default for Limits {
    /// Any size a VP8 header can express, up to 64 megapixels and 512 MiB.
    fn default() -> Self {
        Self {
            max_width: Some(VP8_MAX_DIMENSION),
            max_height: Some(VP8_MAX_DIMENSION),
            max_total_pixels: Some(64_000_000),
            max_memory: Some(512 << 20),
        }
    }
}

impl Limits {
    /// No bounds at all.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_width: None,
            max_height: None,
            max_total_pixels: None,
            max_memory: None,
        }
    }

    /// Bound the width and the height.
    #[must_use]
    pub fn max_dimensions(mut self, width: u32, height: u32) -> Self {
        self.max_width = Some(width);
        self.max_height = Some(height);
        self
    }

    /// Bound `width * height`.
    #[must_use]
    pub fn max_total_pixels(mut self, pixels: u64) -> Self {
        self.max_total_pixels = Some(pixels);
        self
    }

    /// Bound the memory allocated for one frame.
    #[must_use]
    pub fn max_memory(mut self, bytes: u64) -> Self {
        self.max_memory = Some(bytes);
        self
    }

    /// Rejects a frame of `width` x `height` that is over a bound.
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), DecodingError> {
        let pixels = u64::from(width) * u64::from(height);
        let over = [
            ("width", u64::from(width), self.max_width.map(u64::from)),
            ("height", u64::from(height), self.max_height.map(u64::from)),
            ("pixel count", pixels, self.max_total_pixels),
        ]
        .into_iter()
        .find(|&(_, value, max)| max.is_some_and(|max| value > max));
        match over {
            Some((what, value, Some(max))) => Err(DecodingError::InvalidParameter(format!(
                "frame {what} {value} over the limit of {max}"
            ))),
            _ => Ok(()),
        }
    }

    /// Rejects an allocation of `bytes` over the memory bound.
    pub fn check_memory(&self, bytes: usize) -> Result<(), DecodingError> {
        match self.max_memory {
            Some(max) if u64::try_from(bytes).map_or(true, |bytes| bytes > max) => {
                Err(DecodingError::MemoryLimitExceeded)
            }
            _ => Ok(()),
        }
    }
}
