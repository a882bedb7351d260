use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("tensor rank {0} exceeds the maximum of 4 dimensions")]
    TooManyDims(usize),
    #[error("row length {len} is not a multiple of the {dtype} block size {block}")]
    BlockMisaligned {
        dtype: String,
        len: usize,
        block: usize,
    },
    #[error("failed to allocate {size} bytes")]
    AllocationFailure { size: usize },
    #[error("byte range {offset}+{size} exceeds capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        size: usize,
        capacity: usize,
    },
    #[error("offset {offset} is not aligned to {alignment} bytes")]
    Misaligned { offset: usize, alignment: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("tensor '{0}' is not bound to a buffer")]
    Unbound(String),
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("unknown backend: {0}")]
    UnknownBackend(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
