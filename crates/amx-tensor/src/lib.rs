//! `amx-tensor` - Tensor graph data model and backend contract for amx-runtime.
//!
//! This crate provides:
//! - `Tensor`, `GraphNode` and `Graph` as the engine hands them to a backend
//! - The `Backend`, `BufferType` and `Buffer` traits a backend implements
//! - A `BackendRegistry` keyed by backend name
//! - The aligned host allocator and a plain host buffer type
//! - Shape utilities and data type definitions (F32, F16, quantized formats)

pub mod backend;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod host;
pub mod memory;
pub mod registry;
pub mod shape;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::{bind_tensor, checked_range, Backend, Buffer, BufferType, Guid};
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use graph::{Graph, GraphNode, Op, Status};
pub use host::{host_buffer_type, HostBuffer, HostBufferType};
pub use memory::AlignedBytes;
pub use registry::{BackendFactory, BackendRegistry, RegistryEntry};
pub use shape::Shape;
pub use tensor::{Tensor, TensorData};
