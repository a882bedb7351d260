use amx_tensor::{
    checked_range, AlignedBytes, Buffer, BufferType, Result, Tensor, TensorError,
};

use crate::repack::{has_amx_kernels, packed_size, repack};

/// Alignment of every AMX buffer base and tensor offset.
pub const TENSOR_ALIGNMENT: usize = 64;

/// Name shared by the AMX backend, its buffer type and its buffers.
pub const AMX_NAME: &str = "AMX";

/// Buffer type whose buffers hold accelerated weights in the packed layout.
#[derive(Debug)]
pub struct AmxBufferType;

static AMX_BUFFER_TYPE: AmxBufferType = AmxBufferType;

/// The process-wide AMX buffer type.
pub fn amx_buffer_type() -> &'static dyn BufferType {
    &AMX_BUFFER_TYPE
}

/// Bytes a tensor occupies in an AMX buffer: the packed size for types with
/// an accelerated kernel, the row-major size otherwise.
pub fn get_alloc_size(tensor: &Tensor) -> usize {
    packed_size(tensor.dtype(), tensor.shape()).unwrap_or_else(|| tensor.nbytes())
}

impl BufferType for AmxBufferType {
    fn name(&self) -> &'static str {
        AMX_NAME
    }

    fn alloc_buffer(&self, size: usize) -> Result<Box<dyn Buffer>> {
        Ok(Box::new(AmxBuffer::alloc(size)?))
    }

    fn alignment(&self) -> usize {
        TENSOR_ALIGNMENT
    }

    fn alloc_size(&self, tensor: &Tensor) -> usize {
        get_alloc_size(tensor)
    }

    fn is_host(&self) -> bool {
        true
    }

    fn is_repacked(&self, tensor: &Tensor) -> bool {
        has_amx_kernels(tensor.dtype())
    }
}

/// One 64-byte aligned host allocation.
///
/// Not internally synchronized: disjoint tensors may be written from
/// different threads, allocation and release are serialized by the owner.
#[derive(Debug)]
pub struct AmxBuffer {
    data: AlignedBytes,
}

impl AmxBuffer {
    /// # Errors
    /// Returns `AllocationFailure` when the host allocator refuses the request.
    pub fn alloc(size: usize) -> Result<Self> {
        match AlignedBytes::new(size, TENSOR_ALIGNMENT) {
            Ok(data) => {
                log::debug!("AMX buffer allocated: {} bytes", size);
                Ok(AmxBuffer { data })
            }
            Err(e) => {
                log::error!("failed to allocate AMX buffer of size {}", size);
                Err(e)
            }
        }
    }

    /// Release the allocation.
    pub fn free(self) {
        drop(self);
    }

    /// Copy `n` bytes from `src` to byte `start` of this buffer.
    ///
    /// `src` must point to `n` readable bytes; it may lie inside this buffer.
    unsafe fn copy_in(&mut self, src: *const u8, start: usize, n: usize) {
        std::ptr::copy(src, self.data.as_mut_ptr().add(start), n);
    }
}

impl Buffer for AmxBuffer {
    fn buffer_type(&self) -> &'static dyn BufferType {
        amx_buffer_type()
    }

    fn base(&self) -> *mut u8 {
        self.data.as_ptr() as *mut u8
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn set_tensor(&mut self, tensor: &Tensor, data: &[u8], offset: usize) -> Result<()> {
        if !has_amx_kernels(tensor.dtype()) {
            let start = checked_range(tensor, self.base(), self.size(), offset, data.len())?;
            self.data.as_mut_slice()[start..start + data.len()].copy_from_slice(data);
            return Ok(());
        }

        if offset != 0 || data.len() != tensor.nbytes() {
            return Err(TensorError::InvalidArgument(format!(
                "tensor '{}' ({}) is repacked on load and only accepts a whole-tensor write \
                 ({} bytes at offset 0), got {} bytes at offset {}",
                tensor.name(),
                tensor.dtype(),
                tensor.nbytes(),
                data.len(),
                offset
            )));
        }
        let packed = get_alloc_size(tensor);
        let start = checked_range(tensor, self.base(), self.size(), 0, packed)?;
        repack(
            tensor.dtype(),
            tensor.shape(),
            data,
            &mut self.data.as_mut_slice()[start..start + packed],
        )?;
        Ok(())
    }

    fn get_tensor(&self, tensor: &Tensor, out: &mut [u8], offset: usize) -> Result<()> {
        if has_amx_kernels(tensor.dtype()) {
            log::error!(
                "get_tensor on repacked tensor '{}' ({})",
                tensor.name(),
                tensor.dtype()
            );
            panic!(
                "tensor '{}' is stored in the packed {} layout and cannot be read back",
                tensor.name(),
                tensor.dtype()
            );
        }
        let start = checked_range(tensor, self.base(), self.size(), offset, out.len())?;
        out.copy_from_slice(&self.data.as_slice()[start..start + out.len()]);
        Ok(())
    }

    fn cpy_tensor(&mut self, src: &Tensor, dst: &Tensor) -> bool {
        let Some(src_data) = src.data().filter(|d| d.is_host()) else {
            return false;
        };
        if src.dtype() != dst.dtype() || src.shape().numel() != dst.shape().numel() {
            return false;
        }

        if has_amx_kernels(dst.dtype()) {
            // The packed layout depends on the row and column split.
            if src.shape() != dst.shape() {
                log::warn!(
                    "cannot copy {} into {}: packed shapes {} and {} differ",
                    src.name(),
                    dst.name(),
                    src.shape(),
                    dst.shape()
                );
                return false;
            }
            if !src_data.is_repacked() {
                let bytes =
                    unsafe { std::slice::from_raw_parts(src_data.as_ptr(), src.nbytes()) };
                return self.set_tensor(dst, bytes, 0).is_ok();
            }
        } else if src_data.is_repacked() {
            return false;
        }

        let n = get_alloc_size(dst);
        match checked_range(dst, self.base(), self.size(), 0, n) {
            Ok(start) if n <= src_data.len() => {
                unsafe { self.copy_in(src_data.as_ptr(), start, n) };
                true
            }
            _ => false,
        }
    }

    fn clear(&mut self, value: u8) {
        self.data.as_mut_slice().fill(value);
    }
}
