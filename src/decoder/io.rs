//! The row sink interface between the decoder and its output.
//!
//! A decode drives a [`RowSink`] through `setup`, a series of `put` calls
//! with finished rows in top-to-bottom order, and `teardown`. `teardown`
//! runs exactly when `setup` returned `true`, whether or not the decode
//! succeeded.

use super::api::CropRect;

/// Frame geometry and output options handed to [`RowSink::setup`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameIo {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Visible rectangle. A sink may shrink it in `setup`; the left and top
    /// edges are then rounded down to even positions.
    pub crop: CropRect,
    /// The sink should interpolate chroma when converting to RGB.
    pub fancy_upsampling: bool,
    /// Skip the in-loop filter. A sink may set this in `setup`.
    pub bypass_filtering: bool,
    /// Alpha rows accompany the colour rows.
    pub has_alpha: bool,
}

impl FrameIo {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            crop: CropRect::new(0, 0, width, height),
            fancy_upsampling: true,
            bypass_filtering: false,
            has_alpha: false,
        }
    }
}

/// A band of finished rows, already clipped to the crop rectangle.
///
/// Plane slices start at the top-left visible sample of the band. The
/// chroma planes hold `(height + 1) / 2` rows of `(width + 1) / 2` samples.
#[derive(Debug)]
pub struct RowBatch<'a> {
    /// First row of the band, counted from the top of the crop rectangle.
    /// Always even.
    pub row: usize,
    /// Visible width.
    pub width: usize,
    /// Number of rows in the band.
    pub height: usize,
    /// Luma samples.
    pub y: &'a [u8],
    /// U samples.
    pub u: &'a [u8],
    /// V samples.
    pub v: &'a [u8],
    /// Stride of `y`.
    pub y_stride: usize,
    /// Stride of `u` and `v`.
    pub uv_stride: usize,
    /// Alpha samples when the frame has an alpha plane.
    pub a: Option<&'a [u8]>,
    /// Stride of `a`.
    pub a_stride: usize,
}

/// Receives decoded rows.
pub trait RowSink {
    /// Called once before any row is decoded. Returning `false` aborts the
    /// decode before anything is allocated and skips `teardown`.
    fn setup(&mut self, io: &mut FrameIo) -> bool {
        let _ = io;
        true
    }

    /// Called for each band of finished rows. Returning `false` aborts the
    /// decode with a user-abort error.
    fn put(&mut self, batch: &RowBatch<'_>) -> bool;

    /// Called once after the last `put`, or after a failure, if `setup`
    /// succeeded.
    fn teardown(&mut self, io: &FrameIo) {
        let _ = io;
    }
}

impl<S: RowSink + ?Sized> RowSink for alloc::boxed::Box<S> {
    fn setup(&mut self, io: &mut FrameIo) -> bool {
        (**self).setup(io)
    }

    fn put(&mut self, batch: &RowBatch<'_>) -> bool {
        (**self).put(batch)
    }

    fn teardown(&mut self, io: &FrameIo) {
        (**self).teardown(io)
    }
}

/// Tracks the `setup` / `teardown` pairing for a sink.
#[derive(Debug)]
pub(crate) struct SinkGuard<S> {
    pub(crate) sink: S,
    pub(crate) io: FrameIo,
    active: bool,
}

impl<S: RowSink> SinkGuard<S> {
    pub(crate) fn new(sink: S, io: FrameIo) -> Self {
        Self {
            sink,
            io,
            active: false,
        }
    }

    /// Runs `setup`, remembering whether `teardown` is owed.
    pub(crate) fn setup(&mut self) -> bool {
        self.active = self.sink.setup(&mut self.io);
        self.active
    }

    pub(crate) fn put(&mut self, batch: &RowBatch<'_>) -> bool {
        self.sink.put(batch)
    }

    /// Runs `teardown` if `setup` succeeded and it has not run yet.
    pub(crate) fn teardown(&mut self) {
        if self.active {
            self.active = false;
            self.sink.teardown(&self.io);
        }
    }

    pub(crate) fn into_sink(mut self) -> S {
        self.teardown();
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counting {
        accept: bool,
        setups: usize,
        teardowns: usize,
    }

    impl RowSink for Counting {
        fn setup(&mut self, _io: &mut FrameIo) -> bool {
            self.setups += 1;
            self.accept
        }

        fn put(&mut self, _batch: &RowBatch<'_>) -> bool {
            true
        }

        fn teardown(&mut self, _io: &FrameIo) {
            self.teardowns += 1;
        }
    }

    #[test]
    fn test_teardown_only_after_successful_setup() {
        let mut guard = SinkGuard::new(Counting::default(), FrameIo::new(4, 4));
        assert!(!guard.setup());
        let sink = guard.into_sink();
        assert_eq!((sink.setups, sink.teardowns), (1, 0));

        let accepting = Counting {
            accept: true,
            ..Counting::default()
        };
        let mut guard = SinkGuard::new(accepting, FrameIo::new(4, 4));
        assert!(guard.setup());
        guard.teardown();
        guard.teardown();
        let sink = guard.into_sink();
        assert_eq!((sink.setups, sink.teardowns), (1, 1));
    }

    #[test]
    fn test_default_io_covers_frame() {
        let io = FrameIo::new(33, 17);
        assert_eq!(io.crop, CropRect::new(0, 0, 33, 17));
        assert!(io.fancy_upsampling);
        assert!(!io.has_alpha);
    }
}
