//! VP8 key frame decoder

mod alpha;
mod api;
mod bit_reader;
mod cache;
mod dither;
mod frame;
mod header;
mod incremental;
mod io;
mod limits;
mod lossless;
mod loop_filter;
mod output;
mod parser;
mod pipeline;
mod quant_levels;
mod reconstruct;

// Re-export public API
pub use alpha::{AlphPlaneDecoder, AlphaDecoder, AlphaFilter};
pub use api::{
    ColorMode, CropRect, DecState, DecodeConfig, DecodeStatus, DecodingError, ThreadingMode,
    Vp8Status,
};
pub use frame::{decode_rgba, decode_yuv420, Vp8Decoder};
pub use header::{get_info, FrameInfo};
pub use incremental::{DecodedArea, IncrementalDecoder};
pub use io::{FrameIo, RowBatch, RowSink};
pub use limits::Limits;
pub use lossless::{LosslessDecoder, VP8L_SIGNATURE};
pub use output::{FrameBuffer, YuvaPlanes};
