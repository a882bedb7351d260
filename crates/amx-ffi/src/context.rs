use amx_backend::AmxBackend;
use amx_tensor::Buffer;

/// Opaque handle owning one backend instance.
pub struct AmxBackendHandle {
    pub backend: AmxBackend,
}

/// Opaque handle owning one AMX buffer. Freed exactly once through
/// `amx_buffer_free`.
pub struct AmxBufferHandle {
    pub buffer: Box<dyn Buffer>,
}
