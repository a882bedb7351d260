//! `amx-backend` - Tile matrix-multiply backend for amx-runtime.
//!
//! Claims `MulMat` nodes whose weight has an accelerated kernel, keeps those
//! weights in a packed tile layout inside 64-byte aligned host buffers, and
//! programs each worker thread's tile registers before running the kernel.

pub mod backend;
pub mod buffer;
pub mod capability;
pub mod config;
pub mod context;
pub mod eligibility;
pub mod error;
pub mod kernel;
pub mod repack;
pub mod tile;

pub use backend::{
    init, init_with_config, is_amx, register, set_n_threads, AmxBackend, AMX_GUID,
};
pub use buffer::{amx_buffer_type, get_alloc_size, AmxBuffer, AmxBufferType, AMX_NAME, TENSOR_ALIGNMENT};
pub use capability::request_capability;
pub use config::BackendConfig;
pub use context::BackendContext;
pub use error::{BackendError, Result};
pub use kernel::{MatMulKernel, PackedReferenceKernel};
pub use repack::{has_amx_kernels, packed_size, repack};
pub use tile::{EmulatedTiles, TileConfigState, TileGeometry, TileUnit, GEMM_GEOMETRY};
