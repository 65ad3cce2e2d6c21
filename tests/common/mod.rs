//! Helpers shared by the integration tests.
#![allow(dead_code)]

#[path = "../../src/common/types.rs"]
pub mod types;

#[path = "../../src/common/test_stream.rs"]
pub mod test_stream;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use zenvp8::{
    DecodeConfig, DecodeStatus, DecodingError, FrameBuffer, IncrementalDecoder, RowBatch, RowSink,
};

/// Y, U and V planes copied out of a decoded buffer, tightly packed.
pub fn planes(frame: &FrameBuffer) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let p = frame.yuva();
    let uv_w = p.width.div_ceil(2);
    let uv_h = p.height.div_ceil(2);
    let y = p
        .y
        .chunks(p.y_stride)
        .take(p.height)
        .flat_map(|row| row[..p.width].iter().copied())
        .collect();
    let u = p
        .u
        .chunks(p.uv_stride)
        .take(uv_h)
        .flat_map(|row| row[..uv_w].iter().copied())
        .collect();
    let v = p
        .v
        .chunks(p.uv_stride)
        .take(uv_h)
        .flat_map(|row| row[..uv_w].iter().copied())
        .collect();
    (y, u, v)
}

/// Decodes `data` in one go into YUV planes.
pub fn decode_planes(data: &[u8], config: &DecodeConfig) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let frame = zenvp8::decode_yuv420(data, config).expect("one-shot decode");
    planes(&frame)
}

/// Feeds `data` to an appending decoder in the given piece sizes.
pub fn decode_appending(
    data: &[u8],
    config: DecodeConfig,
    sizes: impl IntoIterator<Item = usize>,
) -> Result<FrameBuffer, DecodingError> {
    let mut dec = IncrementalDecoder::new(config);
    let mut pos = 0;
    for size in sizes {
        let end = (pos + size).min(data.len());
        let status = dec.append(&data[pos..end])?;
        pos = end;
        // Trailing padding of the last partition may never be needed.
        if status == DecodeStatus::Done || pos == data.len() {
            break;
        }
    }
    Ok(dec.into_output().expect("finished frame"))
}

/// Feeds growing prefixes of `data` to a decoder in remap mode.
pub fn decode_updating(
    data: &[u8],
    config: DecodeConfig,
    sizes: impl IntoIterator<Item = usize>,
) -> Result<FrameBuffer, DecodingError> {
    let mut dec = IncrementalDecoder::new(config);
    let mut end = 0;
    for size in sizes {
        end = (end + size).min(data.len());
        if dec.update(&data[..end])? == DecodeStatus::Done {
            break;
        }
    }
    Ok(dec.into_output().expect("finished frame"))
}

/// Random piece sizes between 1 and `max`, enough to cover `len` bytes.
pub fn random_splits(len: usize, max: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut sizes = Vec::new();
    let mut total = 0;
    while total < len {
        let size = rng.gen_range(1..=max);
        sizes.push(size);
        total += size;
    }
    sizes
}

/// A sink that records every band it receives.
#[derive(Debug, Default)]
pub struct Bands {
    pub setups: usize,
    pub teardowns: usize,
    /// `(first row, rows)` of each `put`.
    pub bands: Vec<(usize, usize)>,
    /// The luma rows, in emission order.
    pub luma: Vec<u8>,
    /// Reject the `put` with this index.
    pub reject_band: Option<usize>,
}

impl RowSink for Bands {
    fn setup(&mut self, _io: &mut zenvp8::FrameIo) -> bool {
        self.setups += 1;
        true
    }

    fn put(&mut self, batch: &RowBatch<'_>) -> bool {
        if self.reject_band == Some(self.bands.len()) {
            return false;
        }
        self.bands.push((batch.row, batch.height));
        for row in batch.y.chunks(batch.y_stride).take(batch.height) {
            self.luma.extend_from_slice(&row[..batch.width]);
        }
        true
    }

    fn teardown(&mut self, _io: &zenvp8::FrameIo) {
        self.teardowns += 1;
    }
}
