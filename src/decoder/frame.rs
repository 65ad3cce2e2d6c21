//! Frame-level decoding: sets up the row pipeline from the parsed headers
//! and feeds it macroblock rows.
//!
//! [`FrameDecoder`] is shared by the one-shot [`Vp8Decoder`] and the
//! incremental decoder. It can stop at any macroblock when a coefficient
//! partition runs dry and pick up again at the same macroblock later.

use alloc::boxed::Box;
use alloc::vec::Vec;

use log::{debug, trace};

use super::alpha::AlphaDecoder;
use super::api::{ColorMode, CropRect, DecodeConfig, DecodingError};
use super::bit_reader::BitReader;
use super::dither::init_dithering;
use super::header::{parse_headers, FilterType, FrameHeader, ParsedHeaders};
use super::io::{FrameIo, RowSink, SinkGuard};
use super::loop_filter::{precompute_filter_strengths, FilterInfo};
use super::output::FrameBuffer;
use super::parser::MacroblockParser;
use super::pipeline::{FilterWindow, RowPipeline, RowProcessor};
use crate::common::types::MAX_SEGMENTS;

/// No valid macroblock needs more coefficient data than this.
pub(crate) const MAX_MB_SIZE: usize = 4096;

/// How far a call to [`FrameDecoder::decode`] got.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Progress {
    /// Every row has been emitted and the sink torn down.
    Done,
    /// A coefficient partition ran out; nothing was consumed from the
    /// macroblock that starved.
    Starved,
}

pub(crate) struct FrameDecoder<S> {
    header: FrameHeader,
    fstrengths: [[FilterInfo; 2]; MAX_SEGMENTS],
    parser: MacroblockParser,
    modes: BitReader,
    partitions: Vec<BitReader>,
    pipeline: RowPipeline<S>,
    mb_w: usize,
    /// Rows below this one are never decoded.
    br_mb_y: usize,
    mb_x: usize,
    mb_y: usize,
    /// The intra modes of row `mb_y` are in the pipeline's current row.
    modes_parsed: bool,
    /// Starvation suspends instead of failing.
    incremental: bool,
    crop: CropRect,
}

impl<S: RowSink + Send + 'static> FrameDecoder<S> {
    /// Checks limits, runs the sink's `setup` and allocates the pipeline.
    ///
    /// `output_bytes` is what the sink will allocate, for the memory limit.
    /// On failure the sink is handed back, torn down if `setup` ran.
    pub(crate) fn new(
        parsed: ParsedHeaders,
        config: &DecodeConfig,
        sink: S,
        mut alpha: Option<Box<dyn AlphaDecoder + Send>>,
        incremental: bool,
        output_bytes: usize,
    ) -> Result<Self, (DecodingError, S)> {
        let ParsedHeaders {
            mut header,
            modes,
            partitions,
            ..
        } = parsed;
        let width = u32::from(header.info.width);
        let height = u32::from(header.info.height);
        let mb_w = header.info.mb_width();
        let mb_h = header.info.mb_height();
        let admitted = config.limits.check_dimensions(width, height).and_then(|()| {
            let crop = config
                .crop
                .unwrap_or(CropRect::new(0, 0, width, height))
                .resolve(width, height)?;
            let pipeline_bytes = RowPipeline::<S>::byte_size(config.threading, header.filter_type, mb_w);
            let needed = pipeline_bytes
                .checked_add(output_bytes)
                .and_then(|n| n.checked_add(MacroblockParser::byte_size(mb_w)))
                .ok_or(DecodingError::ImageTooLarge)?;
            config.limits.check_memory(needed)?;
            Ok(crop)
        });
        let crop = match admitted {
            Ok(crop) => crop,
            Err(e) => return Err((e, sink)),
        };

        let mut io = FrameIo::new(width, height);
        io.crop = crop;
        io.fancy_upsampling = config.fancy_upsampling;
        io.bypass_filtering = config.bypass_filtering;
        io.has_alpha = alpha.is_some();
        let mut guard = SinkGuard::new(sink, io);
        if !guard.setup() {
            let e = DecodingError::UserAbort("Frame setup failed".into());
            return Err((e, guard.into_sink()));
        }

        let crop = match guard.io.crop.resolve(width, height) {
            Ok(crop) => crop,
            Err(e) => return Err((e, guard.into_sink())),
        };
        guard.io.crop = crop;
        if guard.io.bypass_filtering {
            header.filter_type = FilterType::None;
        }
        if let Some(alpha) = alpha.as_mut() {
            if let Err(e) = alpha.init(width, height, config.alpha_dithering_strength) {
                return Err((e, guard.into_sink()));
            }
        }

        let dither = init_dithering(config.dithering_strength, &mut header.quant);
        let fstrengths = precompute_filter_strengths(&header);
        let window = FilterWindow::new(header.filter_type, &crop, mb_w, mb_h);
        let processor = RowProcessor::new(guard, window, mb_w, dither, alpha);
        let pipeline = RowPipeline::new(config.threading, processor, mb_w, mb_h);

        Ok(Self {
            header,
            fstrengths,
            parser: MacroblockParser::new(mb_w),
            modes,
            partitions,
            pipeline,
            mb_w,
            br_mb_y: window.br_mb_y,
            mb_x: 0,
            mb_y: 0,
            modes_parsed: false,
            incremental,
            crop,
        })
    }

    /// Decodes macroblocks until the frame is done or input runs out.
    ///
    /// `first` backs the first partition and `data` the coefficient
    /// partitions; both are whatever the readers' offsets point into.
    pub(crate) fn decode(&mut self, first: &[u8], data: &[u8]) -> Result<Progress, DecodingError> {
        let part_mask = self.partitions.len() - 1;
        while self.mb_y < self.br_mb_y {
            if !self.modes_parsed {
                let mut d = self.modes.attach(first);
                if !self.parser.parse_intra_row(&mut d, &self.header, self.pipeline.current_row()) {
                    let msg = "Premature end-of-partition0 encountered.".into();
                    return Err(if self.incremental {
                        DecodingError::BitstreamError(msg)
                    } else {
                        DecodingError::NotEnoughData(msg)
                    });
                }
                self.modes_parsed = true;
            }

            let token = &mut self.partitions[self.mb_y & part_mask];
            let row = self.pipeline.current_row();
            while self.mb_x < self.mb_w {
                let saved = self.parser.checkpoint(self.mb_x, token);
                let complete = self.parser.decode_mb(
                    self.mb_x,
                    &mut token.attach(data),
                    &self.header,
                    &self.fstrengths,
                    &mut row[self.mb_x],
                );
                if !complete {
                    if !self.incremental {
                        return Err(DecodingError::NotEnoughData(
                            "Premature end-of-file encountered.".into(),
                        ));
                    }
                    self.parser.restore(self.mb_x, &saved, token);
                    if part_mask == 0 && token.remaining() > MAX_MB_SIZE {
                        return Err(DecodingError::BitstreamError(
                            "macroblock larger than any valid one".into(),
                        ));
                    }
                    trace!("macroblock ({}, {}) starved, rolled back", self.mb_x, self.mb_y);
                    self.pipeline.sync()?;
                    return Ok(Progress::Starved);
                }
                self.mb_x += 1;
            }

            self.parser.init_scanline();
            self.mb_x = 0;
            self.modes_parsed = false;
            self.pipeline.finish_row(self.mb_y)?;
            self.mb_y += 1;
        }
        self.pipeline.end()?;
        Ok(Progress::Done)
    }

    /// Stops the worker and tears down the sink after a failure.
    pub(crate) fn abort(&mut self) {
        if let Err(e) = self.pipeline.end() {
            debug!("row pipeline stopped after: {e}");
        }
    }

    /// Offset of the first byte the decoder may still need, when the frame
    /// has a single coefficient partition.
    pub(crate) fn consumed(&self) -> Option<usize> {
        (self.partitions.len() == 1).then(|| self.partitions[0].pos())
    }

    /// Shifts every coefficient reader after the backing buffer moved.
    pub(crate) fn remap_partitions(&mut self, offset: isize) {
        for part in &mut self.partitions {
            part.remap(offset);
        }
    }

    /// Extends the last partition to `end` as more data arrives.
    pub(crate) fn extend_last_partition(&mut self, end: usize) {
        if let Some(last) = self.partitions.last_mut() {
            last.set_end(end);
        }
    }

    pub(crate) fn crop(&self) -> CropRect {
        self.crop
    }

    /// The sink, unless the worker holds it.
    pub(crate) fn sink(&self) -> Option<&S> {
        self.pipeline.sink()
    }

    pub(crate) fn into_sink(self) -> Option<S> {
        self.pipeline.into_sink()
    }
}

/// One-shot decoder for a complete VP8 frame.
///
/// # Example
///
/// ```rust,no_run
/// use zenvp8::{ColorMode, DecodeConfig, Vp8Decoder};
///
/// let data: &[u8] = &[]; // a VP8 key frame
/// let config = DecodeConfig::default().output(ColorMode::Rgb);
/// let frame = Vp8Decoder::new(config).decode_to_buffer(data)?;
/// let pixels = frame.rgb();
/// # Ok::<(), zenvp8::DecodingError>(())
/// ```
pub struct Vp8Decoder {
    config: DecodeConfig,
    alpha: Option<Box<dyn AlphaDecoder + Send>>,
}

impl core::fmt::Debug for Vp8Decoder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vp8Decoder")
            .field("config", &self.config)
            .field("alpha", &self.alpha.is_some())
            .finish()
    }
}

impl Vp8Decoder {
    /// A decoder using `config`.
    #[must_use]
    pub fn new(config: DecodeConfig) -> Self {
        Self { config, alpha: None }
    }

    /// Attach an alpha plane decoder; its rows accompany every emitted band.
    #[must_use]
    pub fn with_alpha(mut self, alpha: Box<dyn AlphaDecoder + Send>) -> Self {
        self.alpha = Some(alpha);
        self
    }

    /// Decodes `data` into `sink` and returns the sink.
    ///
    /// `data` is the VP8 payload, starting at the frame tag. The sink's
    /// `teardown` has run by the time this returns, successfully or not.
    pub fn decode<S: RowSink + Send + 'static>(self, data: &[u8], sink: S) -> Result<S, DecodingError> {
        self.decode_with_output(data, sink, 0)
    }

    /// Decodes `data` into a [`FrameBuffer`] in the configured colour mode.
    pub fn decode_to_buffer(self, data: &[u8]) -> Result<FrameBuffer, DecodingError> {
        let info = super::header::FrameInfo::parse(data)?;
        let mode = match (self.config.output, self.alpha.is_some()) {
            (ColorMode::Yuv420, true) => ColorMode::Yuva420,
            (mode, _) => mode,
        };
        let (w, h) = match self.config.crop {
            Some(crop) => (crop.width as usize, crop.height as usize),
            None => (usize::from(info.width), usize::from(info.height)),
        };
        let bytes = FrameBuffer::byte_size(mode, w, h);
        self.decode_with_output(data, FrameBuffer::new(mode), bytes)
    }

    fn decode_with_output<S: RowSink + Send + 'static>(
        self,
        data: &[u8],
        sink: S,
        output_bytes: usize,
    ) -> Result<S, DecodingError> {
        let parsed = parse_headers(data)?;
        let mut frame = FrameDecoder::new(parsed, &self.config, sink, self.alpha, false, output_bytes)
            .map_err(|(e, _)| e)?;
        match frame.decode(data, data) {
            Ok(Progress::Done) => frame.into_sink().ok_or_else(|| {
                DecodingError::BitstreamError("row pipeline lost its sink".into())
            }),
            Ok(Progress::Starved) => {
                frame.abort();
                Err(DecodingError::NotEnoughData("Premature end-of-file encountered.".into()))
            }
            Err(e) => {
                frame.abort();
                Err(e)
            }
        }
    }
}

/// Decodes a VP8 frame to planar YUV 4:2:0.
///
/// # Example
///
/// ```rust,no_run
/// let data: &[u8] = &[]; // a VP8 key frame
/// let frame = zenvp8::decode_yuv420(data, &zenvp8::DecodeConfig::default())?;
/// let planes = frame.yuva();
/// assert_eq!(planes.y.len(), planes.y_stride * planes.height);
/// # Ok::<(), zenvp8::DecodingError>(())
/// ```
pub fn decode_yuv420(data: &[u8], config: &DecodeConfig) -> Result<FrameBuffer, DecodingError> {
    Vp8Decoder::new(config.clone().output(ColorMode::Yuv420)).decode_to_buffer(data)
}

/// Decodes a VP8 frame to packed RGBA.
///
/// Returns the pixels and the width and height of the decoded area.
///
/// # Example
///
/// ```rust,no_run
/// let data: &[u8] = &[]; // a VP8 key frame
/// let (pixels, width, height) = zenvp8::decode_rgba(data, &zenvp8::DecodeConfig::default())?;
/// assert_eq!(pixels.len(), (width * height * 4) as usize);
/// # Ok::<(), zenvp8::DecodingError>(())
/// ```
pub fn decode_rgba(data: &[u8], config: &DecodeConfig) -> Result<(Vec<u8>, u32, u32), DecodingError> {
    let frame = Vp8Decoder::new(config.clone().output(ColorMode::Rgba)).decode_to_buffer(data)?;
    let (w, h) = (frame.width() as u32, frame.height() as u32);
    Ok((frame.into_pixels(), w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::test_stream::FrameSpec;
    use crate::decoder::api::ThreadingMode;
    use crate::decoder::io::RowBatch;

    #[test]
    fn test_flat_frame_decodes_to_mid_grey() {
        let data = FrameSpec::new(24, 20).encode();
        let frame = decode_yuv420(&data, &DecodeConfig::default()).unwrap();
        let planes = frame.yuva();
        assert_eq!((planes.width, planes.height), (24, 20));
        assert!(planes.y.iter().all(|&v| v == 128));
        assert!(planes.u.iter().chain(planes.v).all(|&v| v == 128));
    }

    #[test]
    fn test_rgba_helper_reports_crop_size() {
        let data = FrameSpec::new(40, 40).encode();
        let config = DecodeConfig::default().crop(CropRect::new(5, 7, 10, 3));
        let (pixels, w, h) = decode_rgba(&data, &config).unwrap();
        assert_eq!((w, h), (10, 3));
        assert_eq!(pixels.len(), 10 * 3 * 4);
        assert!(pixels.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_truncated_partition_is_not_enough_data() {
        let spec = FrameSpec::random(96, 96, 7);
        let data = spec.encode();
        let (_, parts) = spec.encode_partitions();
        let cut = data.len() - parts[0].len() / 2;
        let err = decode_yuv420(&data[..cut], &DecodeConfig::default()).unwrap_err();
        assert!(matches!(err, DecodingError::NotEnoughData(_)), "{err:?}");
    }

    #[test]
    fn test_memory_limit_checked_before_setup() {
        #[derive(Debug)]
        struct Refuse;
        impl RowSink for Refuse {
            fn setup(&mut self, _io: &mut FrameIo) -> bool {
                panic!("setup must not run");
            }
            fn put(&mut self, _batch: &RowBatch<'_>) -> bool {
                true
            }
        }
        let data = FrameSpec::new(64, 64).encode();
        let config = DecodeConfig::default().limits(crate::Limits::default().max_memory(100));
        let err = Vp8Decoder::new(config).decode(&data, Refuse).unwrap_err();
        assert_eq!(err, DecodingError::MemoryLimitExceeded);
    }

    #[test]
    fn test_setup_refusal_is_user_abort() {
        #[derive(Debug)]
        struct Refuse;
        impl RowSink for Refuse {
            fn setup(&mut self, _io: &mut FrameIo) -> bool {
                false
            }
            fn put(&mut self, _batch: &RowBatch<'_>) -> bool {
                true
            }
        }
        let data = FrameSpec::new(16, 16).encode();
        let err = Vp8Decoder::new(DecodeConfig::default()).decode(&data, Refuse).unwrap_err();
        assert!(matches!(err, DecodingError::UserAbort(_)));
    }

    #[test]
    fn test_sink_may_shrink_crop_and_bypass_filter() {
        #[derive(Default)]
        struct Shrink {
            rows: usize,
            width: usize,
        }
        impl RowSink for Shrink {
            fn setup(&mut self, io: &mut FrameIo) -> bool {
                io.crop = CropRect::new(3, 3, 8, 8);
                io.bypass_filtering = true;
                true
            }
            fn put(&mut self, batch: &RowBatch<'_>) -> bool {
                self.rows += batch.height;
                self.width = batch.width;
                true
            }
        }
        let data = FrameSpec::random(32, 32, 3).encode();
        let sink = Vp8Decoder::new(DecodeConfig::default()).decode(&data, Shrink::default()).unwrap();
        assert_eq!((sink.rows, sink.width), (8, 8));
    }

    #[test]
    fn test_worker_modes_match_single_thread() {
        let data = FrameSpec::random(72, 56, 11).encode();
        let reference = decode_yuv420(&data, &DecodeConfig::default()).unwrap();
        for mode in [ThreadingMode::FilterInWorker, ThreadingMode::ReconstructInWorker] {
            let config = DecodeConfig::default().threading(mode);
            let out = decode_yuv420(&data, &config).unwrap();
            assert_eq!(out.into_pixels(), reference.clone().into_pixels(), "{mode:?}");
        }
    }
}
