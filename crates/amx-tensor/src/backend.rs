use std::any::Any;
use std::fmt::{self, Debug};

use crate::error::{Result, TensorError};
use crate::graph::{Graph, GraphNode, Status};
use crate::tensor::{Tensor, TensorData};

/// Stable 128-bit identity of a backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub const fn new(bytes: [u8; 16]) -> Self {
        Guid(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Stateless descriptor of how a backend allocates and lays out memory.
///
/// Implementations are expected to be `'static` singletons so buffers can
/// point back at the type that created them.
pub trait BufferType: Send + Sync + Debug {
    /// Returns the name of this buffer type (e.g., "CPU", "AMX").
    fn name(&self) -> &'static str;

    /// Allocate a buffer of `size` bytes.
    fn alloc_buffer(&self, size: usize) -> Result<Box<dyn Buffer>>;

    /// Alignment, in bytes, of every buffer base and tensor offset.
    fn alignment(&self) -> usize;

    /// Largest single allocation this type can serve.
    fn max_size(&self) -> usize {
        usize::MAX
    }

    /// Bytes to reserve for `tensor` in a buffer of this type.
    fn alloc_size(&self, tensor: &Tensor) -> usize {
        tensor.nbytes()
    }

    /// True when buffers are plain host memory, readable without a transfer step.
    fn is_host(&self) -> bool {
        false
    }

    /// True when `tensor` is stored in a layout of this type's own instead of
    /// row-major order.
    fn is_repacked(&self, _tensor: &Tensor) -> bool {
        false
    }
}

/// One allocation owned by a backend. Dropping the buffer releases it.
pub trait Buffer: Send + Debug {
    /// The type that allocated this buffer.
    fn buffer_type(&self) -> &'static dyn BufferType;

    fn name(&self) -> &'static str {
        self.buffer_type().name()
    }

    /// Start address of the allocation.
    fn base(&self) -> *mut u8;

    /// Size of the allocation in bytes.
    fn size(&self) -> usize;

    /// Hook run after a tensor has been placed in this buffer.
    fn init_tensor(&mut self, _tensor: &Tensor) -> Result<()> {
        Ok(())
    }

    /// Write `data` into `tensor`'s bytes starting at byte `offset`.
    fn set_tensor(&mut self, tensor: &Tensor, data: &[u8], offset: usize) -> Result<()>;

    /// Read `out.len()` bytes of `tensor` starting at byte `offset`.
    fn get_tensor(&self, tensor: &Tensor, out: &mut [u8], offset: usize) -> Result<()>;

    /// Copy `src` into `dst` (which lives in this buffer).
    ///
    /// Returns false when the source memory cannot be read directly.
    fn cpy_tensor(&mut self, src: &Tensor, dst: &Tensor) -> bool;

    /// Fill the whole buffer with `value`.
    fn clear(&mut self, value: u8);

    fn is_host(&self) -> bool {
        self.buffer_type().is_host()
    }
}

/// Trait for pluggable compute backends addressed by the graph engine.
///
/// All calls are synchronous. Dropping the backend destroys it.
pub trait Backend: Send + Debug {
    /// Identity used by the engine to recognize this backend.
    fn guid(&self) -> Guid;

    /// Returns the name of this backend (e.g., "CPU", "AMX").
    fn name(&self) -> &str;

    /// Buffer type the engine should allocate this backend's tensors from.
    fn default_buffer_type(&self) -> &'static dyn BufferType;

    /// Execute every node of `graph`, in order.
    fn graph_compute(&mut self, graph: &Graph) -> Status;

    /// Whether this backend can execute `node`. Must be free of side effects.
    fn supports_op(&self, node: &GraphNode) -> bool;

    /// Whether tensors resident in `buft` can be consumed directly.
    fn supports_buffer_type(&self, buft: &dyn BufferType) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Place `tensor` inside `buffer` at byte `offset`.
///
/// Reserves the buffer type's alloc size for the tensor, so layouts that pad
/// or reorganize data get the room they need.
///
/// # Errors
/// Returns an error if the offset is misaligned or the tensor does not fit.
pub fn bind_tensor(buffer: &mut dyn Buffer, tensor: &mut Tensor, offset: usize) -> Result<()> {
    let buft = buffer.buffer_type();
    let alignment = buft.alignment();
    if offset % alignment != 0 {
        return Err(TensorError::Misaligned { offset, alignment });
    }
    let size = buft.alloc_size(tensor);
    let end = offset.checked_add(size).ok_or(TensorError::OutOfBounds {
        offset,
        size,
        capacity: buffer.size(),
    })?;
    if end > buffer.size() {
        return Err(TensorError::OutOfBounds {
            offset,
            size,
            capacity: buffer.size(),
        });
    }
    let ptr = unsafe { buffer.base().add(offset) };
    let data = TensorData::new(ptr, size, buft.name(), buft.is_host())
        .with_repacked(buft.is_repacked(tensor));
    tensor.set_data(data);
    buffer.init_tensor(tensor)
}

/// Check that `[offset, offset + len)` lies within `tensor`'s bound bytes
/// and that those bytes lie within the buffer starting at `base`.
///
/// Returns the absolute offset of the range inside the buffer.
pub fn checked_range(
    tensor: &Tensor,
    base: *const u8,
    buffer_size: usize,
    offset: usize,
    len: usize,
) -> Result<usize> {
    let data = tensor.try_data()?;
    let start = data.offset_in(base, buffer_size).ok_or_else(|| {
        TensorError::Other(format!(
            "tensor '{}' is not located in this buffer",
            tensor.name()
        ))
    })?;
    match offset.checked_add(len) {
        Some(end) if end <= data.len() => Ok(start + offset),
        _ => Err(TensorError::OutOfBounds {
            offset,
            size: len,
            capacity: data.len(),
        }),
    }
}
