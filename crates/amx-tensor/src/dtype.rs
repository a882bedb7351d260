use std::fmt;

use crate::error::{Result, TensorError};

/// Element types a tensor can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// 16-bit floating point (IEEE 754 half-precision, via the `half` crate).
    F16,
    /// 4-bit quantized format (ggml Q4_0 block layout).
    Q4_0,
    /// 4-bit quantized format with a per-block minimum (ggml Q4_1 block layout).
    Q4_1,
    /// 5-bit quantized format (ggml Q5_0 block layout).
    Q5_0,
    /// 8-bit quantized format (ggml Q8_0 block layout).
    Q8_0,
}

impl DType {
    /// Returns the size in bytes of a single element for non-quantized types,
    /// or the block size for quantized types.
    ///
    /// - F32: 4 bytes per element
    /// - F16: 2 bytes per element (using `half::f16`)
    /// - Q4_0: 18 bytes per block of 32 elements (2-byte scale + 16 bytes of nibbles)
    /// - Q4_1: 20 bytes per block of 32 elements (2-byte scale + 2-byte min + 16 bytes of nibbles)
    /// - Q5_0: 22 bytes per block of 32 elements (2-byte scale + 4 bytes of high bits + 16 bytes of nibbles)
    /// - Q8_0: 34 bytes per block of 32 elements (2-byte scale + 32 bytes of quants)
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::Q4_0 => 18,
            DType::Q4_1 => 20,
            DType::Q5_0 => 22,
            DType::Q8_0 => 34,
        }
    }

    /// Returns the number of elements per quantization block, or 1 for
    /// non-quantized types.
    pub fn block_size(&self) -> usize {
        match self {
            DType::F32 | DType::F16 => 1,
            DType::Q4_0 | DType::Q4_1 | DType::Q5_0 | DType::Q8_0 => 32,
        }
    }

    /// Returns true if this dtype is a quantized format.
    pub fn is_quantized(&self) -> bool {
        self.block_size() > 1
    }

    /// Byte size of one row of `n` elements.
    ///
    /// # Errors
    /// Returns an error if `n` does not fill a whole number of blocks.
    pub fn row_size(&self, n: usize) -> Result<usize> {
        let block = self.block_size();
        if n % block != 0 {
            return Err(TensorError::BlockMisaligned {
                dtype: self.to_string(),
                len: n,
                block,
            });
        }
        Ok(n / block * self.size_in_bytes())
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::Q4_0 => write!(f, "q4_0"),
            DType::Q4_1 => write!(f, "q4_1"),
            DType::Q5_0 => write!(f, "q5_0"),
            DType::Q8_0 => write!(f, "q8_0"),
        }
    }
}
