//! Incremental decoding for data that arrives in pieces.
//!
//! [`IncrementalDecoder`] is a state machine advanced by each call to
//! [`append`](IncrementalDecoder::append) or
//! [`update`](IncrementalDecoder::update). It decodes as far as the
//! available bytes allow, returns [`DecodeStatus::Suspended`], and resumes
//! at the same macroblock on the next call. Rows become visible in
//! [`output`](IncrementalDecoder::output) as soon as they are final.
//!
//! # Example
//!
//! ```rust,no_run
//! use zenvp8::{DecodeConfig, DecodeStatus, IncrementalDecoder};
//!
//! let chunks: Vec<Vec<u8>> = Vec::new(); // data as it arrives
//! let mut decoder = IncrementalDecoder::new(DecodeConfig::default());
//! for chunk in &chunks {
//!     match decoder.append(chunk)? {
//!         DecodeStatus::Suspended => {
//!             if let Some(area) = decoder.decoded_area() {
//!                 println!("{} rows ready", area.last_row);
//!             }
//!         }
//!         DecodeStatus::Done => break,
//!     }
//! }
//! let frame = decoder.into_output();
//! # Ok::<(), zenvp8::DecodingError>(())
//! ```

use alloc::boxed::Box;
use alloc::format;
use alloc::vec::Vec;

use log::{debug, trace};

use super::alpha::AlphaDecoder;
use super::api::{CropRect, DecState, DecodeConfig, DecodeStatus, DecodingError, Vp8Status};
use super::frame::{FrameDecoder, Progress};
use super::header::{parse_headers, FrameInfo, FRAME_HEADER_SIZE};
use super::io::{FrameIo, RowSink};
use super::lossless::{is_lossless, LosslessDecoder};
use super::output::FrameBuffer;

/// Append-mode storage grows in multiples of this many bytes.
const CHUNK_SIZE: usize = 4096;

/// Largest payload a single `append` accepts.
const MAX_CHUNK_PAYLOAD: usize = u32::MAX as usize - 9;

/// How the decoder is fed. Fixed by the first call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MemMode {
    None,
    /// Bytes are copied into an owned buffer.
    Append,
    /// The caller passes the whole, growing buffer on every call.
    Map,
}

/// The part of the frame that has been decoded so far.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedArea {
    /// Rows of the visible rectangle, from its top, that are final.
    pub last_row: usize,
    /// The visible rectangle within the frame.
    pub visible: CropRect,
}

/// A decoder fed with successive pieces of one frame.
///
/// Feed it either with [`append`](Self::append), which copies each piece,
/// or with [`update`](Self::update), which takes the whole buffer received
/// so far on every call. A decoder accepts only one of the two.
pub struct IncrementalDecoder {
    config: DecodeConfig,
    state: DecState,
    error: Option<DecodingError>,
    mode: MemMode,
    /// Append-mode storage. Bytes before `start` are no longer needed.
    buf: Vec<u8>,
    start: usize,
    /// Bytes seen so far, counted in the current backing buffer.
    end: usize,
    /// Private copy of the first partition in append mode.
    part0: Vec<u8>,
    info: Option<FrameInfo>,
    frame: Option<FrameDecoder<FrameBuffer>>,
    alpha: Option<Box<dyn AlphaDecoder + Send>>,
    lossless: Option<Box<dyn LosslessDecoder + Send>>,
    lossless_crop: Option<CropRect>,
    /// The output while no frame decoder holds it.
    output: Option<FrameBuffer>,
}

impl core::fmt::Debug for IncrementalDecoder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IncrementalDecoder")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl IncrementalDecoder {
    /// A decoder writing into a new [`FrameBuffer`] in the configured colour mode.
    #[must_use]
    pub fn new(config: DecodeConfig) -> Self {
        let output = FrameBuffer::new(config.output);
        Self::with_output(config, output)
    }

    /// A decoder writing into `output`, whose colour mode takes precedence
    /// over the configured one.
    #[must_use]
    pub fn with_output(config: DecodeConfig, output: FrameBuffer) -> Self {
        Self {
            config,
            state: DecState::HeaderPending,
            error: None,
            mode: MemMode::None,
            buf: Vec::new(),
            start: 0,
            end: 0,
            part0: Vec::new(),
            info: None,
            frame: None,
            alpha: None,
            lossless: None,
            lossless_crop: None,
            output: Some(output),
        }
    }

    /// Attach an alpha plane decoder for a lossy frame.
    #[must_use]
    pub fn with_alpha(mut self, alpha: Box<dyn AlphaDecoder + Send>) -> Self {
        self.alpha = Some(alpha);
        self
    }

    /// Attach a lossless decoder, enabling VP8L input.
    #[must_use]
    pub fn with_lossless(mut self, lossless: Box<dyn LosslessDecoder + Send>) -> Self {
        self.lossless = Some(lossless);
        self
    }

    /// Copies `data` after the bytes received so far and decodes as far as
    /// possible.
    pub fn append(&mut self, data: &[u8]) -> Result<DecodeStatus, DecodingError> {
        if let Some(status) = self.finished()? {
            return Ok(status);
        }
        self.check_mode(MemMode::Append)?;
        if data.len() > MAX_CHUNK_PAYLOAD {
            return Err(DecodingError::OutOfMemory);
        }
        self.grow(data)?;
        let buf = core::mem::take(&mut self.buf);
        let result = self.advance(&buf);
        self.buf = buf;
        self.record(result)
    }

    /// Decodes from `data`, which must start with the bytes passed to the
    /// previous call and may extend them.
    pub fn update(&mut self, data: &[u8]) -> Result<DecodeStatus, DecodingError> {
        if let Some(status) = self.finished()? {
            return Ok(status);
        }
        self.check_mode(MemMode::Map)?;
        if data.len() < self.end {
            return Err(DecodingError::InvalidParameter(format!(
                "buffer shrank from {} to {} bytes",
                self.end,
                data.len()
            )));
        }
        self.end = data.len();
        if let Some(frame) = self.frame.as_mut() {
            frame.extend_last_partition(self.end);
        }
        let result = self.advance(data);
        self.record(result)
    }

    /// The coarse status: `Ok` once done, `Suspended` while more data is
    /// expected, otherwise the status of the stored error.
    #[must_use]
    pub fn status(&self) -> Vp8Status {
        match (&self.error, self.state) {
            (Some(e), _) => e.status(),
            (None, DecState::Done) => Vp8Status::Ok,
            (None, _) => Vp8Status::Suspended,
        }
    }

    /// The exact position in the state machine.
    #[must_use]
    pub fn state(&self) -> DecState {
        self.state
    }

    /// The frame header, once the first ten bytes of a VP8 frame arrived.
    #[must_use]
    pub fn info(&self) -> Option<FrameInfo> {
        self.info
    }

    /// The rows decoded so far, or `None` before the output is set up.
    #[must_use]
    pub fn decoded_area(&self) -> Option<DecodedArea> {
        let visible = match (&self.frame, self.lossless_crop) {
            (Some(frame), _) => frame.crop(),
            (None, Some(crop)) => crop,
            (None, None) => {
                let out = self.output.as_ref()?;
                if out.height() == 0 {
                    return None;
                }
                CropRect::new(0, 0, out.width() as u32, out.height() as u32)
            }
        };
        Some(DecodedArea {
            last_row: self.output()?.last_row(),
            visible,
        })
    }

    /// The output buffer, with [`FrameBuffer::last_row`] rows final.
    #[must_use]
    pub fn output(&self) -> Option<&FrameBuffer> {
        match &self.frame {
            Some(frame) => frame.sink(),
            None => self.output.as_ref(),
        }
    }

    /// The finished frame, or `None` if decoding has not completed.
    #[must_use]
    pub fn into_output(mut self) -> Option<FrameBuffer> {
        if self.state == DecState::Done {
            self.output.take()
        } else {
            None
        }
    }

    /// Short-circuits calls after the end: the stored error, or `Done`.
    fn finished(&self) -> Result<Option<DecodeStatus>, DecodingError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        Ok((self.state == DecState::Done).then_some(DecodeStatus::Done))
    }

    fn check_mode(&mut self, wanted: MemMode) -> Result<(), DecodingError> {
        if self.mode == MemMode::None {
            self.mode = wanted;
        }
        if self.mode != wanted {
            return Err(DecodingError::InvalidParameter(
                "cannot mix append and update on one decoder".into(),
            ));
        }
        Ok(())
    }

    /// Adds `data` to the append buffer, compacting away consumed bytes
    /// whenever it has to reallocate.
    fn grow(&mut self, data: &[u8]) -> Result<(), DecodingError> {
        if self.buf.len() + data.len() > self.buf.capacity() {
            let kept = self.buf.len() - self.start;
            let new_size = (kept + data.len()).div_ceil(CHUNK_SIZE) * CHUNK_SIZE;
            let mut new_buf = Vec::new();
            new_buf
                .try_reserve_exact(new_size)
                .map_err(|_| DecodingError::OutOfMemory)?;
            new_buf.extend_from_slice(&self.buf[self.start..]);
            let offset = -(self.start as isize);
            if self.start > 0 {
                trace!("compacted {} consumed bytes", self.start);
            }
            self.buf = new_buf;
            self.start = 0;
            if let Some(frame) = self.frame.as_mut() {
                frame.remap_partitions(offset);
            }
        }
        self.buf.extend_from_slice(data);
        self.end = self.buf.len();
        if let Some(frame) = self.frame.as_mut() {
            frame.extend_last_partition(self.end);
        }
        Ok(())
    }

    /// Stores a failure and moves to the error state.
    fn record(&mut self, result: Result<DecodeStatus, DecodingError>) -> Result<DecodeStatus, DecodingError> {
        if let Err(e) = &result {
            debug!("incremental decode failed in {:?}: {e}", self.state);
            if let Some(frame) = self.frame.as_mut() {
                frame.abort();
            }
            self.error = Some(e.clone());
            self.set_state(DecState::Error);
        }
        result
    }

    fn set_state(&mut self, state: DecState) {
        debug!("incremental decoder: {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Runs the state machine over `data`, the whole backing buffer.
    fn advance(&mut self, data: &[u8]) -> Result<DecodeStatus, DecodingError> {
        loop {
            match self.state {
                DecState::HeaderPending => {
                    if data.len() <= self.start {
                        return Ok(DecodeStatus::Suspended);
                    }
                    if is_lossless(&data[self.start..]) {
                        self.set_state(DecState::Vp8lHeaderPending);
                    } else {
                        self.set_state(DecState::Vp8HeaderPending);
                    }
                }
                DecState::Vp8HeaderPending => {
                    if data.len() < FRAME_HEADER_SIZE {
                        return Ok(DecodeStatus::Suspended);
                    }
                    self.info = Some(FrameInfo::parse(data)?);
                    self.set_state(DecState::Partition0Pending);
                }
                DecState::Partition0Pending => {
                    if !self.start_frame(data)? {
                        return Ok(DecodeStatus::Suspended);
                    }
                    self.set_state(DecState::BitstreamDecoding);
                }
                DecState::BitstreamDecoding => return self.decode_macroblocks(data),
                DecState::Vp8lHeaderPending => {
                    if !self.start_lossless(data)? {
                        return Ok(DecodeStatus::Suspended);
                    }
                    self.set_state(DecState::Vp8lDecoding);
                }
                DecState::Vp8lDecoding => return self.decode_lossless(data),
                DecState::Done => return Ok(DecodeStatus::Done),
                DecState::Error => {
                    return Err(self
                        .error
                        .clone()
                        .unwrap_or_else(|| DecodingError::BitstreamError("decoder failed".into())))
                }
            }
        }
    }

    /// Sets up the frame once the first partition is complete. Returns
    /// false while it is not.
    fn start_frame(&mut self, data: &[u8]) -> Result<bool, DecodingError> {
        let Some(info) = self.info else {
            return Ok(false);
        };
        let p0_end = FRAME_HEADER_SIZE + info.partition0_size as usize;
        if data.len() < p0_end {
            return Ok(false);
        }
        let parsed = match parse_headers(data) {
            Ok(parsed) => parsed,
            // The partition table or the last partition is still incomplete.
            Err(DecodingError::NotEnoughData(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        let partitions_start = parsed.partitions_start;

        let output = self
            .output
            .take()
            .unwrap_or_else(|| FrameBuffer::new(self.config.output));
        let (w, h) = match self.config.crop {
            Some(crop) => (crop.width as usize, crop.height as usize),
            None => (usize::from(info.width), usize::from(info.height)),
        };
        let output_bytes = FrameBuffer::byte_size(output.color_mode(), w, h);
        let frame = match FrameDecoder::new(
            parsed,
            &self.config,
            output,
            self.alpha.take(),
            true,
            output_bytes,
        ) {
            Ok(frame) => frame,
            Err((e, output)) => {
                self.output = Some(output);
                return Err(e);
            }
        };

        if self.mode == MemMode::Append {
            let mut part0 = Vec::new();
            part0
                .try_reserve_exact(p0_end)
                .map_err(|_| DecodingError::OutOfMemory)?;
            part0.extend_from_slice(&data[..p0_end]);
            self.part0 = part0;
            // Only the coefficient partitions are read from the buffer now.
            self.start = partitions_start;
        }
        self.frame = Some(frame);
        Ok(true)
    }

    fn decode_macroblocks(&mut self, data: &[u8]) -> Result<DecodeStatus, DecodingError> {
        let Some(frame) = self.frame.as_mut() else {
            return Err(DecodingError::BitstreamError("frame decoder missing".into()));
        };
        let first = if self.mode == MemMode::Append {
            &self.part0[..]
        } else {
            data
        };
        let progress = frame.decode(first, data)?;
        if self.mode == MemMode::Append {
            if let Some(pos) = frame.consumed() {
                self.start = self.start.max(pos.min(data.len()));
            }
        }
        match progress {
            Progress::Starved => Ok(DecodeStatus::Suspended),
            Progress::Done => {
                self.output = self.frame.take().and_then(FrameDecoder::into_sink);
                self.part0 = Vec::new();
                self.set_state(DecState::Done);
                Ok(DecodeStatus::Done)
            }
        }
    }

    /// Reads the lossless header and sets up the output. Returns false
    /// while the header is incomplete.
    fn start_lossless(&mut self, data: &[u8]) -> Result<bool, DecodingError> {
        let Some(lossless) = self.lossless.as_mut() else {
            return Err(DecodingError::UnsupportedFeature(
                "lossless bitstream without a lossless decoder".into(),
            ));
        };
        let Some((width, height)) = lossless.read_header(data)? else {
            return Ok(false);
        };
        if width == 0 || height == 0 {
            return Err(DecodingError::BitstreamError(format!(
                "invalid dimensions {width}x{height}"
            )));
        }
        self.config.limits.check_dimensions(width, height)?;
        let crop = self
            .config
            .crop
            .unwrap_or(CropRect::new(0, 0, width, height))
            .resolve(width, height)?;
        let Some(output) = self.output.as_mut() else {
            return Err(DecodingError::BitstreamError("output buffer missing".into()));
        };
        let bytes = FrameBuffer::byte_size(output.color_mode(), crop.width as usize, crop.height as usize)
            .checked_add(4 * width as usize)
            .ok_or(DecodingError::ImageTooLarge)?;
        self.config.limits.check_memory(bytes)?;

        let mut io = FrameIo::new(width, height);
        io.crop = crop;
        io.fancy_upsampling = self.config.fancy_upsampling;
        io.has_alpha = true;
        if !output.setup(&mut io) {
            return Err(DecodingError::UserAbort("Frame setup failed".into()));
        }
        self.lossless_crop = Some(io.crop.resolve(width, height)?);
        Ok(true)
    }

    fn decode_lossless(&mut self, data: &[u8]) -> Result<DecodeStatus, DecodingError> {
        let (Some(lossless), Some(output), Some(crop)) =
            (self.lossless.as_mut(), self.output.as_mut(), self.lossless_crop)
        else {
            return Err(DecodingError::BitstreamError("lossless decoder missing".into()));
        };
        let (top, bottom) = (crop.top as usize, crop.bottom() as usize);
        let (left, right) = (crop.left as usize, crop.right() as usize);
        let done = lossless.decode_rows(data, &mut |y, rgba| {
            if !(top..bottom).contains(&y) {
                return true;
            }
            match rgba.get(4 * left..4 * right) {
                Some(visible) => output.put_rgba_row(y - top, visible),
                None => false,
            }
        })?;
        if !done {
            return Ok(DecodeStatus::Suspended);
        }
        let mut io = FrameIo::new(crop.width, crop.height);
        io.crop = crop;
        output.teardown(&io);
        self.set_state(DecState::Done);
        Ok(DecodeStatus::Done)
    }
}

impl Drop for IncrementalDecoder {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.as_mut() {
            frame.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::test_stream::FrameSpec;
    use crate::decoder::api::ColorMode;
    use crate::decoder::frame::decode_yuv420;
    use crate::decoder::lossless::raw::{encode, RawRgba};

    #[test]
    fn test_states_advance_with_data() {
        let data = FrameSpec::random(40, 40, 5).encode();
        let mut dec = IncrementalDecoder::new(DecodeConfig::default());
        assert_eq!(dec.state(), DecState::HeaderPending);
        assert_eq!(dec.append(&data[..0]).unwrap(), DecodeStatus::Suspended);
        assert_eq!(dec.state(), DecState::HeaderPending);
        assert_eq!(dec.append(&data[..4]).unwrap(), DecodeStatus::Suspended);
        assert_eq!(dec.state(), DecState::Vp8HeaderPending);
        assert_eq!(dec.append(&data[4..12]).unwrap(), DecodeStatus::Suspended);
        assert_eq!(dec.state(), DecState::Partition0Pending);
        assert_eq!(dec.info().map(|i| (i.width, i.height)), Some((40, 40)));
        assert!(dec.decoded_area().is_none());
        assert_eq!(dec.append(&data[12..]).unwrap(), DecodeStatus::Done);
        assert_eq!(dec.state(), DecState::Done);
        assert_eq!(dec.status(), Vp8Status::Ok);
        assert_eq!(dec.append(&[]).unwrap(), DecodeStatus::Done);
    }

    #[test]
    fn test_modes_cannot_be_mixed() {
        let data = FrameSpec::new(16, 16).encode();
        let mut dec = IncrementalDecoder::new(DecodeConfig::default());
        dec.append(&data[..5]).unwrap();
        assert!(matches!(
            dec.update(&data),
            Err(DecodingError::InvalidParameter(_))
        ));
        // Not a decoding failure: the decoder is still usable.
        assert_eq!(dec.status(), Vp8Status::Suspended);
        assert_eq!(dec.append(&data[5..]).unwrap(), DecodeStatus::Done);
    }

    #[test]
    fn test_update_rejects_shorter_buffer() {
        let data = FrameSpec::new(16, 16).encode();
        let mut dec = IncrementalDecoder::new(DecodeConfig::default());
        dec.update(&data[..8]).unwrap();
        assert!(matches!(
            dec.update(&data[..7]),
            Err(DecodingError::InvalidParameter(_))
        ));
        assert_eq!(dec.update(&data).unwrap(), DecodeStatus::Done);
    }

    #[test]
    fn test_error_is_sticky() {
        let mut data = FrameSpec::new(16, 16).encode();
        data[3] = 0;
        let mut dec = IncrementalDecoder::new(DecodeConfig::default());
        let err = dec.append(&data).unwrap_err();
        assert!(matches!(err, DecodingError::Vp8MagicInvalid(_)));
        assert_eq!(dec.state(), DecState::Error);
        assert_eq!(dec.status(), Vp8Status::BitstreamError);
        assert_eq!(dec.append(&[1, 2, 3]).unwrap_err(), err);
    }

    #[test]
    fn test_refused_frame_keeps_caller_buffer() {
        let data = FrameSpec::new(64, 64).encode();
        let config = DecodeConfig::default().limits(crate::Limits::none().max_memory(1000));
        let mut dec = IncrementalDecoder::with_output(config, FrameBuffer::new(ColorMode::Bgra));
        assert_eq!(dec.append(&data).unwrap_err(), DecodingError::MemoryLimitExceeded);
        assert_eq!(dec.state(), DecState::Error);
        assert_eq!(dec.output().map(FrameBuffer::color_mode), Some(ColorMode::Bgra));
    }

    #[test]
    fn test_single_partition_bytes_are_released() {
        let spec = FrameSpec::random(160, 160, 21);
        let data = spec.encode();
        let reference = decode_yuv420(&data, &DecodeConfig::default()).unwrap();
        let mut dec = IncrementalDecoder::new(DecodeConfig::default());
        let mut max_kept = 0;
        for chunk in data.chunks(3000) {
            dec.append(chunk).unwrap();
            max_kept = max_kept.max(dec.end - dec.start);
        }
        assert_eq!(dec.state(), DecState::Done);
        assert!(max_kept < data.len() || data.len() <= 3000);
        assert_eq!(dec.into_output().unwrap().into_pixels(), reference.into_pixels());
    }

    #[test]
    fn test_lossless_branch() {
        let pixels: Vec<u8> = (0..3 * 3).flat_map(|i| [i as u8 * 10, 0, 0, 255]).collect();
        let data = encode(3, 3, &pixels);
        let mut dec = IncrementalDecoder::new(DecodeConfig::default().output(ColorMode::Rgba))
            .with_lossless(Box::new(RawRgba::default()));
        assert_eq!(dec.append(&data[..3]).unwrap(), DecodeStatus::Suspended);
        assert_eq!(dec.state(), DecState::Vp8lHeaderPending);
        assert_eq!(dec.append(&data[3..10]).unwrap(), DecodeStatus::Suspended);
        assert_eq!(dec.state(), DecState::Vp8lDecoding);
        assert_eq!(dec.decoded_area().map(|a| a.last_row), Some(0));
        assert_eq!(dec.append(&data[10..]).unwrap(), DecodeStatus::Done);
        let out = dec.into_output().unwrap();
        assert_eq!(out.rgb(), Some(&pixels[..]));
    }

    #[test]
    fn test_lossless_without_decoder() {
        let data = encode(1, 1, &[0, 0, 0, 0]);
        let mut dec = IncrementalDecoder::new(DecodeConfig::default());
        let err = dec.append(&data).unwrap_err();
        assert_eq!(err.status(), Vp8Status::UnsupportedFeature);
    }
}
