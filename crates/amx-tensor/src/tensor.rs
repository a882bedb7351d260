use std::sync::Arc;

use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// Location of a tensor's bytes inside a backend buffer.
///
/// Set when the tensor is bound to a buffer; the pointer stays valid for as
/// long as the owning buffer is alive, which the graph engine guarantees.
#[derive(Debug, Clone, Copy)]
pub struct TensorData {
    ptr: *mut u8,
    len: usize,
    buffer_type: &'static str,
    host: bool,
    repacked: bool,
}

// The pointee is owned by a buffer; access goes through the buffer and the
// kernels, which only touch disjoint ranges concurrently.
unsafe impl Send for TensorData {}
unsafe impl Sync for TensorData {}

impl TensorData {
    pub fn new(ptr: *mut u8, len: usize, buffer_type: &'static str, host: bool) -> Self {
        TensorData {
            ptr,
            len,
            buffer_type,
            host,
            repacked: false,
        }
    }

    /// Mark the bytes as stored in a backend-specific layout rather than
    /// row-major order.
    pub fn with_repacked(mut self, repacked: bool) -> Self {
        self.repacked = repacked;
        self
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Number of bytes reserved for the tensor (the buffer type's alloc size).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Name of the buffer type the bytes live in.
    #[inline]
    pub fn buffer_type(&self) -> &'static str {
        self.buffer_type
    }

    #[inline]
    pub fn is_host(&self) -> bool {
        self.host
    }

    /// True when the bytes no longer match the tensor's row-major layout and
    /// must not be read or copied as plain data.
    #[inline]
    pub fn is_repacked(&self) -> bool {
        self.repacked
    }

    /// Byte offset of this data inside the region `[base, base + size)`, or
    /// `None` if it does not lie entirely within it.
    pub fn offset_in(&self, base: *const u8, size: usize) -> Option<usize> {
        let start = (self.ptr as usize).checked_sub(base as usize)?;
        let end = start.checked_add(self.len)?;
        (end <= size).then_some(start)
    }
}

/// Tensor metadata as seen by a backend: type, shape, strides, gradient link
/// and (once bound) the location of its bytes.
///
/// Backends never change shape or type; they only write bytes.
#[derive(Debug, Clone)]
pub struct Tensor {
    name: String,
    dtype: DType,
    shape: Shape,
    strides: Vec<usize>,
    grad: Option<Arc<Tensor>>,
    data: Option<TensorData>,
}

impl Tensor {
    /// Create an unbound, contiguous tensor.
    ///
    /// # Errors
    /// Returns an error if the innermost dimension does not fill whole
    /// quantization blocks.
    pub fn new(name: impl Into<String>, dtype: DType, shape: Shape) -> Result<Self> {
        dtype.row_size(shape.cols())?;
        let strides = shape.strides();
        Ok(Tensor {
            name: name.into(),
            dtype,
            shape,
            strides,
            grad: None,
            data: None,
        })
    }

    /// Attach a gradient tensor, marking this tensor as part of a training graph.
    pub fn with_grad(mut self, grad: Arc<Tensor>) -> Self {
        self.grad = Some(grad);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Element strides, outermost first.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn grad(&self) -> Option<&Arc<Tensor>> {
        self.grad.as_ref()
    }

    pub fn is_contiguous(&self) -> bool {
        self.shape.is_contiguous(&self.strides)
    }

    /// Row-major byte size of the tensor's logical contents.
    pub fn nbytes(&self) -> usize {
        self.shape.numel() / self.dtype.block_size() * self.dtype.size_in_bytes()
    }

    pub fn data(&self) -> Option<&TensorData> {
        self.data.as_ref()
    }

    /// Returns the bound data, or an `Unbound` error.
    pub fn try_data(&self) -> Result<&TensorData> {
        self.data
            .as_ref()
            .ok_or_else(|| TensorError::Unbound(self.name.clone()))
    }

    pub(crate) fn set_data(&mut self, data: TensorData) {
        self.data = Some(data);
    }

    /// A metadata-only reinterpretation sharing this tensor's bytes.
    ///
    /// The total number of elements must remain the same.
    pub fn reshape(&self, name: impl Into<String>, new_shape: Shape) -> Result<Tensor> {
        if self.shape.numel() != new_shape.numel() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.dims().to_vec(),
                got: new_shape.dims().to_vec(),
            });
        }
        let mut view = Tensor::new(name, self.dtype, new_shape)?;
        view.data = self.data;
        Ok(view)
    }

    /// Swap the two innermost dimensions without moving any bytes.
    ///
    /// The result is non-contiguous unless one of the swapped dimensions is 1.
    pub fn transpose(&self, name: impl Into<String>) -> Tensor {
        let mut dims = self.shape.dims().to_vec();
        let mut strides = self.strides.clone();
        let n = dims.len();
        if n >= 2 {
            dims.swap(n - 1, n - 2);
            strides.swap(n - 1, n - 2);
        }
        Tensor {
            name: name.into(),
            dtype: self.dtype,
            shape: Shape::new(dims),
            strides,
            grad: None,
            data: self.data,
        }
    }
}
