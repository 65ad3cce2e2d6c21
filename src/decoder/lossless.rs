//! Interface to an external lossless (VP8L) decoder.
//!
//! This crate does not decode VP8L bitstreams. An implementation of
//! [`LosslessDecoder`] can be plugged into the incremental decoder, which
//! then handles lossless input, and into [`AlphPlaneDecoder`] for
//! losslessly compressed alpha.
//!
//! [`AlphPlaneDecoder`]: super::alpha::AlphPlaneDecoder

use super::api::DecodingError;

/// First byte of a VP8L bitstream.
pub const VP8L_SIGNATURE: u8 = 0x2f;

/// A resumable lossless decoder.
///
/// Both methods receive every byte seen so far, starting at the beginning
/// of the bitstream, and may be called again with a longer slice after
/// asking for more data.
pub trait LosslessDecoder {
    /// Parses the header. Returns the frame dimensions, or `None` while more
    /// bytes are needed.
    fn read_header(&mut self, data: &[u8]) -> Result<Option<(u32, u32)>, DecodingError>;

    /// Decodes as many rows as `data` allows and hands each one to `emit` as
    /// `(row index, RGBA pixels)`, in top-to-bottom order.
    ///
    /// Returns `true` once the last row has been emitted and `false` when more
    /// data is needed. A `false` from `emit` must stop decoding with
    /// [`DecodingError::UserAbort`].
    fn decode_rows(
        &mut self,
        data: &[u8],
        emit: &mut dyn FnMut(usize, &[u8]) -> bool,
    ) -> Result<bool, DecodingError>;
}

impl<D: LosslessDecoder + ?Sized> LosslessDecoder for alloc::boxed::Box<D> {
    fn read_header(&mut self, data: &[u8]) -> Result<Option<(u32, u32)>, DecodingError> {
        (**self).read_header(data)
    }

    fn decode_rows(
        &mut self,
        data: &[u8],
        emit: &mut dyn FnMut(usize, &[u8]) -> bool,
    ) -> Result<bool, DecodingError> {
        (**self).decode_rows(data, emit)
    }
}

/// Whether `data` starts like a VP8L bitstream.
pub(crate) fn is_lossless(data: &[u8]) -> bool {
    data.first() == Some(&VP8L_SIGNATURE)
}
