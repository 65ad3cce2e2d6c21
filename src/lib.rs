//! Streaming decoding of VP8 key frames (lossy WebP)
//!
//! This crate decodes the VP8 bitstream carried in a WebP `VP8 ` chunk into
//! YUV 4:2:0 or packed RGB, bit-exact with the reference decoder. Data can
//! be supplied all at once or piece by piece, and finished rows are handed
//! to a [`RowSink`] as soon as the loop filter is done with them.
//!
//! # Features
//!
//! - `std` (default, required): the row pipeline's worker thread.
//!
//! # One-shot decoding
//!
//! ```rust,no_run
//! use zenvp8::DecodeConfig;
//!
//! let vp8_data: &[u8] = &[]; // payload of a `VP8 ` chunk
//! let (pixels, width, height) = zenvp8::decode_rgba(vp8_data, &DecodeConfig::default())?;
//! # Ok::<(), zenvp8::DecodingError>(())
//! ```
//!
//! Or the [`Vp8Decoder`] with your own sink and a worker thread:
//!
//! ```rust,no_run
//! use zenvp8::{DecodeConfig, RowBatch, RowSink, ThreadingMode, Vp8Decoder};
//!
//! struct LumaSum(u64);
//!
//! impl RowSink for LumaSum {
//!     fn put(&mut self, batch: &RowBatch<'_>) -> bool {
//!         for row in batch.y.chunks(batch.y_stride).take(batch.height) {
//!             self.0 += row[..batch.width].iter().map(|&v| u64::from(v)).sum::<u64>();
//!         }
//!         true
//!     }
//! }
//!
//! let vp8_data: &[u8] = &[];
//! let config = DecodeConfig::default().threading(ThreadingMode::FilterInWorker);
//! let sum = Vp8Decoder::new(config).decode(vp8_data, LumaSum(0))?;
//! # Ok::<(), zenvp8::DecodingError>(())
//! ```
//!
//! # Incremental decoding
//!
//! [`IncrementalDecoder`] accepts the frame in pieces and makes partially
//! decoded rows available while it waits for more. See its documentation.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

#[cfg(not(feature = "std"))]
compile_error!("zenvp8 needs the `std` feature for its row pipeline");

extern crate alloc;

mod common;
mod decoder;
mod slice_reader;
mod yuv;

// Re-export decoder public API
pub use decoder::{
    decode_rgba, decode_yuv420, get_info, AlphPlaneDecoder, AlphaDecoder, AlphaFilter, ColorMode,
    CropRect, DecState, DecodeConfig, DecodeStatus, DecodedArea, DecodingError, FrameBuffer,
    FrameInfo, FrameIo, IncrementalDecoder, Limits, LosslessDecoder, RowBatch, RowSink,
    ThreadingMode, Vp8Decoder, Vp8Status, YuvaPlanes, VP8L_SIGNATURE,
};
