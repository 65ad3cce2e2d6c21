//! Tables and pixel kernels shared by the decoder stages

pub(crate) mod prediction;
/// Inverse DCT and Walsh-Hadamard transforms
pub(crate) mod transform;
pub(crate) mod types;

#[cfg(test)]
pub(crate) mod test_stream;
