//! The row pipeline: reconstruction, loop filtering, dithering and output.
//!
//! Parsed macroblock rows enter through [`RowPipeline::finish_row`]. What
//! happens next depends on the [`ThreadingMode`]:
//!
//! - `None`: the row is reconstructed, filtered and emitted on the spot.
//! - `FilterInWorker`: the calling thread reconstructs row `N + 1` into a
//!   free slot while the worker filters and emits row `N`.
//! - `ReconstructInWorker`: the worker does everything after parsing while
//!   the calling thread parses the next row.
//!
//! At most one job is ever in flight. Everything the worker touches
//! travels with the job: the macroblock row, the row slot and the
//! [`RowProcessor`] that owns the sink. They come back on the next sync,
//! so between rows the calling thread owns all of it again.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, trace, warn};

use super::alpha::AlphaDecoder;
use super::api::{CropRect, DecodingError, ThreadingMode};
use super::cache::{DelayLine, RowSlot};
use super::dither::DitherRng;
use super::header::FilterType;
use super::io::{RowBatch, RowSink, SinkGuard};
use super::loop_filter::filter_row;
use super::parser::MbData;
use super::reconstruct::Reconstructor;

/// Macroblocks that need filtering for a given crop rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FilterWindow {
    pub(crate) filter_type: FilterType,
    pub(crate) tl_mb_x: usize,
    pub(crate) tl_mb_y: usize,
    /// One past the last column to filter.
    pub(crate) br_mb_x: usize,
    /// One past the last row to decode.
    pub(crate) br_mb_y: usize,
}

impl FilterWindow {
    pub(crate) fn new(filter_type: FilterType, crop: &CropRect, mb_w: usize, mb_h: usize) -> Self {
        let extra = filter_type.extra_rows();
        let (tl_mb_x, tl_mb_y) = if filter_type == FilterType::Complex {
            // Complex filtering of a macroblock depends on every one before it.
            (0, 0)
        } else {
            (
                (crop.left as usize).saturating_sub(extra) >> 4,
                (crop.top as usize).saturating_sub(extra) >> 4,
            )
        };
        Self {
            filter_type,
            tl_mb_x,
            tl_mb_y,
            br_mb_x: ((crop.right() as usize + 15 + extra) >> 4).min(mb_w),
            br_mb_y: ((crop.bottom() as usize + 15 + extra) >> 4).min(mb_h),
        }
    }

    fn filters_row(&self, mb_y: usize) -> bool {
        self.filter_type != FilterType::None && (self.tl_mb_y..=self.br_mb_y).contains(&mb_y)
    }

    fn columns(&self) -> Range<usize> {
        self.tl_mb_x..self.br_mb_x
    }
}

/// Filters, dithers and emits finished rows; optionally reconstructs them
/// first. Owned by whichever thread runs the current row.
pub(crate) struct RowProcessor<S> {
    sink: SinkGuard<S>,
    window: FilterWindow,
    crop: CropRect,
    frame_width: usize,
    delay: DelayLine,
    dither: Option<DitherRng>,
    alpha: Option<Box<dyn AlphaDecoder + Send>>,
    recon: Option<Reconstructor>,
}

impl<S: RowSink> RowProcessor<S> {
    /// `sink` must have completed `setup`; its crop rectangle is final.
    pub(crate) fn new(
        sink: SinkGuard<S>,
        window: FilterWindow,
        mb_w: usize,
        dither: bool,
        alpha: Option<Box<dyn AlphaDecoder + Send>>,
    ) -> Self {
        let crop = sink.io.crop;
        let frame_width = sink.io.width as usize;
        Self {
            sink,
            window,
            crop,
            frame_width,
            delay: DelayLine::new(mb_w, window.filter_type.extra_rows()),
            dither: dither.then(DitherRng::default),
            alpha,
            recon: None,
        }
    }

    pub(crate) fn sink(&self) -> &S {
        &self.sink.sink
    }

    pub(crate) fn into_sink(self) -> S {
        self.sink.into_sink()
    }

    fn process(&mut self, mb_y: usize, blocks: &[MbData], slot: &mut RowSlot) -> Result<(), DecodingError> {
        if let Some(recon) = self.recon.as_mut() {
            recon.reconstruct_row(mb_y, blocks, slot);
        }
        self.finish_row(mb_y, blocks, slot)
    }

    /// Filters row `mb_y` and emits every line that no later row can change.
    fn finish_row(&mut self, mb_y: usize, blocks: &[MbData], slot: &mut RowSlot) -> Result<(), DecodingError> {
        let extra = slot.extra_rows;
        let is_last = mb_y + 1 == self.window.br_mb_y;
        if mb_y > 0 && extra > 0 {
            self.delay.load(slot);
        }
        if self.window.filters_row(mb_y) {
            filter_row(slot, self.window.filter_type, mb_y, blocks, self.window.columns());
        }
        if let Some(rng) = self.dither.as_mut() {
            rng.dither_row(slot, blocks, self.window.columns());
        }

        let mut y_start = if mb_y == 0 { 0 } else { 16 * mb_y - extra };
        let y_end = if is_last {
            self.crop.bottom() as usize
        } else {
            16 * (mb_y + 1) - extra
        };
        let y_end = y_end.min(self.crop.bottom() as usize);

        let mut alpha = None;
        if y_start < y_end {
            if let Some(decoder) = self.alpha.as_mut() {
                let rows = decoder
                    .decode_rows(y_start, y_end - y_start)
                    .ok_or_else(|| DecodingError::BitstreamError("Could not decode alpha data.".into()))?;
                alpha = Some(rows);
            }
        }

        let crop_top = self.crop.top as usize;
        let crop_left = self.crop.left as usize;
        let mut alpha_offset = crop_left;
        if y_start < crop_top {
            alpha_offset += (crop_top - y_start) * self.frame_width;
            y_start = crop_top;
        }
        if y_start < y_end {
            // Image row `r` sits on line `r + extra - 16 * mb_y` of the slot.
            let line = y_start + extra - 16 * mb_y;
            let batch = RowBatch {
                row: y_start - crop_top,
                width: self.crop.width as usize,
                height: y_end - y_start,
                y: &slot.y[line * slot.y_stride + crop_left..],
                u: &slot.u[line / 2 * slot.uv_stride + crop_left / 2..],
                v: &slot.v[line / 2 * slot.uv_stride + crop_left / 2..],
                y_stride: slot.y_stride,
                uv_stride: slot.uv_stride,
                a: alpha.map(|a| &a[alpha_offset..]),
                a_stride: self.frame_width,
            };
            if !self.sink.put(&batch) {
                return Err(DecodingError::UserAbort("Output aborted.".into()));
            }
        }

        if !is_last && extra > 0 {
            self.delay.store(slot);
        }
        Ok(())
    }
}

/// One row of work handed to the worker, and handed back.
struct Job<S> {
    mb_y: usize,
    blocks: Vec<MbData>,
    slot: RowSlot,
    processor: RowProcessor<S>,
    result: Result<(), DecodingError>,
}

struct Shared<S> {
    pending: Option<Job<S>>,
    done: Option<Job<S>>,
    busy: bool,
    quit: bool,
}

/// A persistent background thread with a single job slot.
struct Worker<S> {
    shared: Arc<(Mutex<Shared<S>>, Condvar)>,
    handle: Option<JoinHandle<()>>,
}

fn poisoned<T>(_: T) -> DecodingError {
    DecodingError::BitstreamError("row worker lock poisoned".into())
}

impl<S: RowSink + Send + 'static> Worker<S> {
    fn spawn() -> std::io::Result<Self> {
        let shared = Arc::new((
            Mutex::new(Shared {
                pending: None,
                done: None,
                busy: false,
                quit: false,
            }),
            Condvar::new(),
        ));
        let theirs = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("zenvp8-rows".into())
            .spawn(move || run_worker(&theirs))?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    fn launch(&self, job: Job<S>) -> Result<(), DecodingError> {
        let (lock, cv) = &*self.shared;
        let mut state = lock.lock().map_err(poisoned)?;
        state.pending = Some(job);
        state.busy = true;
        cv.notify_all();
        Ok(())
    }

    /// Waits for the job in flight, if any, and takes it back.
    fn sync(&self) -> Result<Option<Job<S>>, DecodingError> {
        let (lock, cv) = &*self.shared;
        let mut state = lock.lock().map_err(poisoned)?;
        while state.busy {
            state = cv.wait(state).map_err(poisoned)?;
        }
        Ok(state.done.take())
    }
}

impl<S> Drop for Worker<S> {
    fn drop(&mut self) {
        let (lock, cv) = &*self.shared;
        if let Ok(mut state) = lock.lock() {
            state.quit = true;
            cv.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_worker<S: RowSink>(shared: &(Mutex<Shared<S>>, Condvar)) {
    let (lock, cv) = shared;
    loop {
        let mut job = {
            let Ok(mut state) = lock.lock() else {
                return;
            };
            loop {
                if let Some(job) = state.pending.take() {
                    break job;
                }
                if state.quit {
                    return;
                }
                state = match cv.wait(state) {
                    Ok(state) => state,
                    Err(_) => return,
                };
            }
        };

        let Job {
            mb_y,
            ref blocks,
            ref mut slot,
            ref mut processor,
            ..
        } = job;
        let outcome = catch_unwind(AssertUnwindSafe(|| processor.process(mb_y, blocks, slot)));
        job.result = outcome
            .unwrap_or_else(|_| Err(DecodingError::BitstreamError("row worker panicked".into())));

        let Ok(mut state) = lock.lock() else {
            return;
        };
        state.done = Some(job);
        state.busy = false;
        cv.notify_all();
    }
}

/// Drives parsed rows through reconstruction and [`RowProcessor`].
pub(crate) struct RowPipeline<S> {
    mode: ThreadingMode,
    /// The row the parser is filling.
    current: Vec<MbData>,
    spare_blocks: Vec<Vec<MbData>>,
    spare_slots: Vec<RowSlot>,
    /// Reconstruction on the calling thread; `None` when the worker does it.
    recon: Option<Reconstructor>,
    /// Home of the processor while no job is in flight.
    processor: Option<RowProcessor<S>>,
    worker: Option<Worker<S>>,
    /// Set once the sink has been torn down.
    ended: bool,
}

impl<S: RowSink + Send + 'static> RowPipeline<S> {
    pub(crate) fn new(
        mode: ThreadingMode,
        mut processor: RowProcessor<S>,
        mb_w: usize,
        mb_h: usize,
    ) -> Self {
        let extra = processor.window.filter_type.extra_rows();
        let worker = match mode {
            ThreadingMode::None => None,
            _ => match Worker::spawn() {
                Ok(worker) => Some(worker),
                Err(e) => {
                    warn!("cannot start row worker ({e}), decoding on the calling thread");
                    None
                }
            },
        };
        let mode = if worker.is_some() { mode } else { ThreadingMode::None };

        let recon = Reconstructor::new(mb_w, mb_h);
        let recon = if mode == ThreadingMode::ReconstructInWorker {
            processor.recon = Some(recon);
            None
        } else {
            Some(recon)
        };
        // Reconstruction of the next row may overlap filtering of this one
        // only when they run on different threads.
        let slots = if mode == ThreadingMode::FilterInWorker { 2 } else { 1 };
        let block_rows = if mode == ThreadingMode::None { 1 } else { 2 };
        debug!(
            "row pipeline: {mode:?}, {slots} slot(s) of {} lines, {block_rows} macroblock row(s)",
            16 + extra
        );

        Self {
            mode,
            current: vec![MbData::default(); mb_w],
            spare_blocks: (1..block_rows).map(|_| vec![MbData::default(); mb_w]).collect(),
            spare_slots: (0..slots).map(|_| RowSlot::new(mb_w, extra)).collect(),
            recon,
            processor: Some(processor),
            worker,
            ended: false,
        }
    }

    /// Memory held by the caches for a frame of `mb_w` macroblock columns.
    pub(crate) fn byte_size(mode: ThreadingMode, filter_type: FilterType, mb_w: usize) -> usize {
        let extra = filter_type.extra_rows();
        let slots = if mode == ThreadingMode::FilterInWorker { 2 } else { 1 };
        let block_rows = if mode == ThreadingMode::None { 1 } else { 2 };
        slots * RowSlot::byte_size(mb_w, extra)
            + block_rows * mb_w * core::mem::size_of::<MbData>()
            + extra * 24 * mb_w
            + 32 * mb_w
    }

    /// The macroblock row being parsed.
    pub(crate) fn current_row(&mut self) -> &mut [MbData] {
        &mut self.current
    }

    /// Hands the parsed row `mb_y` to the rest of the pipeline.
    pub(crate) fn finish_row(&mut self, mb_y: usize) -> Result<(), DecodingError> {
        match self.mode {
            ThreadingMode::None => {
                let (Some(processor), Some(recon), Some(slot)) = (
                    self.processor.as_mut(),
                    self.recon.as_mut(),
                    self.spare_slots.first_mut(),
                ) else {
                    return Err(lost_state());
                };
                recon.reconstruct_row(mb_y, &self.current, slot);
                processor.finish_row(mb_y, &self.current, slot)
            }
            ThreadingMode::FilterInWorker => {
                let mut slot = self.spare_slots.pop().ok_or_else(lost_state)?;
                if let Some(recon) = self.recon.as_mut() {
                    recon.reconstruct_row(mb_y, &self.current, &mut slot);
                }
                self.launch(mb_y, slot)
            }
            ThreadingMode::ReconstructInWorker => {
                self.sync()?;
                let slot = self.spare_slots.pop().ok_or_else(lost_state)?;
                self.launch(mb_y, slot)
            }
        }
    }

    fn launch(&mut self, mb_y: usize, slot: RowSlot) -> Result<(), DecodingError> {
        self.sync()?;
        let next = self.spare_blocks.pop().ok_or_else(lost_state)?;
        let blocks = core::mem::replace(&mut self.current, next);
        let (Some(worker), Some(processor)) = (self.worker.as_ref(), self.processor.take()) else {
            return Err(lost_state());
        };
        trace!("row {mb_y}: launched");
        worker.launch(Job {
            mb_y,
            blocks,
            slot,
            processor,
            result: Ok(()),
        })
    }

    /// Waits for the worker and takes back everything it holds.
    pub(crate) fn sync(&mut self) -> Result<(), DecodingError> {
        let Some(worker) = self.worker.as_ref() else {
            return Ok(());
        };
        let Some(job) = worker.sync()? else {
            return Ok(());
        };
        self.spare_blocks.push(job.blocks);
        self.spare_slots.push(job.slot);
        self.processor = Some(job.processor);
        job.result
    }

    /// Finishes the frame: waits for the worker, stops it and tears down
    /// the sink. Runs the teardown even when the last row failed.
    pub(crate) fn end(&mut self) -> Result<(), DecodingError> {
        let result = self.sync();
        self.worker = None;
        if !self.ended {
            if let Some(processor) = self.processor.as_mut() {
                processor.sink.teardown();
                self.ended = true;
            }
        }
        result
    }

    /// The sink, unless a job is in flight.
    pub(crate) fn sink(&self) -> Option<&S> {
        self.processor.as_ref().map(RowProcessor::sink)
    }

    /// Stops the pipeline and returns the sink.
    pub(crate) fn into_sink(mut self) -> Option<S> {
        if let Err(e) = self.end() {
            debug!("row pipeline stopped after: {e}");
        }
        self.processor.take().map(RowProcessor::into_sink)
    }
}

fn lost_state() -> DecodingError {
    DecodingError::BitstreamError("row pipeline state lost after a failure".into())
}
