use crate::backend::{checked_range, Buffer, BufferType};
use crate::error::Result;
use crate::memory::AlignedBytes;
use crate::tensor::Tensor;

/// Alignment of plain host buffers.
pub const HOST_ALIGNMENT: usize = 32;

/// Plain host-memory buffer type, the default for backends without a
/// layout of their own. Tensors are stored byte-for-byte, row-major.
#[derive(Debug)]
pub struct HostBufferType;

static HOST_BUFFER_TYPE: HostBufferType = HostBufferType;

/// The process-wide host buffer type.
pub fn host_buffer_type() -> &'static dyn BufferType {
    &HOST_BUFFER_TYPE
}

impl BufferType for HostBufferType {
    fn name(&self) -> &'static str {
        "CPU"
    }

    fn alloc_buffer(&self, size: usize) -> Result<Box<dyn Buffer>> {
        let data = AlignedBytes::new(size, HOST_ALIGNMENT)?;
        log::debug!("host buffer allocated: {} bytes", size);
        Ok(Box::new(HostBuffer { data }))
    }

    fn alignment(&self) -> usize {
        HOST_ALIGNMENT
    }

    fn is_host(&self) -> bool {
        true
    }
}

/// A host allocation holding row-major tensor bytes.
#[derive(Debug)]
pub struct HostBuffer {
    data: AlignedBytes,
}

impl Buffer for HostBuffer {
    fn buffer_type(&self) -> &'static dyn BufferType {
        host_buffer_type()
    }

    fn base(&self) -> *mut u8 {
        self.data.as_ptr() as *mut u8
    }

    fn size(&self) -> usize {
        self.data.len()
    }

    fn set_tensor(&mut self, tensor: &Tensor, data: &[u8], offset: usize) -> Result<()> {
        let start = checked_range(tensor, self.base(), self.size(), offset, data.len())?;
        self.data.as_mut_slice()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn get_tensor(&self, tensor: &Tensor, out: &mut [u8], offset: usize) -> Result<()> {
        let start = checked_range(tensor, self.base(), self.size(), offset, out.len())?;
        out.copy_from_slice(&self.data.as_slice()[start..start + out.len()]);
        Ok(())
    }

    fn cpy_tensor(&mut self, src: &Tensor, dst: &Tensor) -> bool {
        let Some(src_data) = src.data().filter(|d| d.is_host()) else {
            return false;
        };
        if src_data.is_repacked() {
            log::warn!(
                "cannot copy {} into a host buffer: source is stored in the {} layout",
                src.name(),
                src_data.buffer_type()
            );
            return false;
        }
        let n = src.nbytes();
        let Ok(start) = checked_range(dst, self.base(), self.size(), 0, n) else {
            return false;
        };
        let bytes = unsafe { std::slice::from_raw_parts(src_data.as_ptr(), n) };
        self.data.as_mut_slice()[start..start + n].copy_from_slice(bytes);
        true
    }

    fn clear(&mut self, value: u8) {
        self.data.as_mut_slice().fill(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::bind_tensor;
    use crate::dtype::DType;
    use crate::shape::Shape;

    fn bound(buf: &mut dyn Buffer, name: &str, offset: usize) -> Tensor {
        let mut t = Tensor::new(name, DType::F32, Shape::new(vec![2, 4])).unwrap();
        bind_tensor(buf, &mut t, offset).unwrap();
        t
    }

    #[test]
    fn test_host_buffer_type() {
        let buft = host_buffer_type();
        assert_eq!(buft.name(), "CPU");
        assert_eq!(buft.alignment(), HOST_ALIGNMENT);
        assert!(buft.is_host());
        assert_eq!(buft.max_size(), usize::MAX);
    }

    #[test]
    fn test_set_get_roundtrip() {
        let mut buf = host_buffer_type().alloc_buffer(64).unwrap();
        let t = bound(buf.as_mut(), "x", 0);
        buf.set_tensor(&t, &[7, 8, 9], 5).unwrap();
        let mut out = [0u8; 3];
        buf.get_tensor(&t, &mut out, 5).unwrap();
        assert_eq!(out, [7, 8, 9]);
    }

    #[test]
    fn test_set_out_of_range() {
        let mut buf = host_buffer_type().alloc_buffer(64).unwrap();
        let t = bound(buf.as_mut(), "x", 0);
        assert!(buf.set_tensor(&t, &[0u8; 8], 30).is_err());
    }

    #[test]
    fn test_cpy_and_clear() {
        let mut a = host_buffer_type().alloc_buffer(64).unwrap();
        let mut b = host_buffer_type().alloc_buffer(64).unwrap();
        let src = bound(a.as_mut(), "src", 0);
        let dst = bound(b.as_mut(), "dst", 32);
        a.set_tensor(&src, &[3u8; 32], 0).unwrap();
        assert!(b.cpy_tensor(&src, &dst));
        let mut out = [0u8; 32];
        b.get_tensor(&dst, &mut out, 0).unwrap();
        assert_eq!(out, [3u8; 32]);

        b.clear(0xff);
        b.get_tensor(&dst, &mut out, 0).unwrap();
        assert_eq!(out, [0xff; 32]);
    }

    #[test]
    fn test_cpy_from_unbound_source() {
        let mut b = host_buffer_type().alloc_buffer(64).unwrap();
        let dst = bound(b.as_mut(), "dst", 0);
        let src = Tensor::new("src", DType::F32, Shape::new(vec![2, 4])).unwrap();
        assert!(!b.cpy_tensor(&src, &dst));
    }

    #[test]
    fn test_cpy_refuses_repacked_source() {
        let mut a = host_buffer_type().alloc_buffer(64).unwrap();
        let mut b = host_buffer_type().alloc_buffer(64).unwrap();
        let mut src = bound(a.as_mut(), "src", 0);
        let dst = bound(b.as_mut(), "dst", 0);
        let data = src.data().copied().unwrap().with_repacked(true);
        src.set_data(data);
        b.clear(0);
        assert!(!b.cpy_tensor(&src, &dst));
        let mut out = [1u8; 32];
        b.get_tensor(&dst, &mut out, 0).unwrap();
        assert_eq!(out, [0u8; 32]);
    }
}
