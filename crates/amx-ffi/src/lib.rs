mod context;
mod error;
mod types;

pub use context::*;
pub use error::*;
pub use types::*;

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::panic::{self, AssertUnwindSafe};

use amx_backend::{amx_buffer_type, BackendConfig, BackendError, AMX_GUID};
use amx_tensor::{Backend, TensorError};

/// Execute a closure that returns an `AmxStatus`, catching any panics
/// and converting them into `AmxStatus::ErrorInternal`.
fn catch_panic<F: FnOnce() -> AmxStatus>(f: F) -> AmxStatus {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(status) => status,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "internal panic".to_string());
            set_last_error(msg);
            AmxStatus::ErrorInternal
        }
    }
}

/// Create an AMX backend.
///
/// `params` is an optional `key=value,...` string (`n_threads`, `strict`)
/// and may be null. On success writes a heap-allocated handle into
/// `*backend_out`; release it with `amx_backend_free`.
#[no_mangle]
pub unsafe extern "C" fn amx_backend_init(
    params: *const c_char,
    backend_out: *mut *mut AmxBackendHandle,
) -> AmxStatus {
    catch_panic(|| {
        if backend_out.is_null() {
            set_last_error("backend_out is null".to_string());
            return AmxStatus::ErrorInvalidArgument;
        }
        let params = if params.is_null() {
            None
        } else {
            match unsafe { CStr::from_ptr(params) }.to_str() {
                Ok(s) => Some(s),
                Err(e) => {
                    set_last_error(format!("invalid params: {}", e));
                    return AmxStatus::ErrorInvalidArgument;
                }
            }
        };

        let config = match BackendConfig::parse(params) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(e.to_string());
                return AmxStatus::ErrorInvalidArgument;
            }
        };
        match amx_backend::init_with_config(config) {
            Ok(backend) => {
                let handle = Box::new(AmxBackendHandle { backend });
                unsafe { *backend_out = Box::into_raw(handle) };
                AmxStatus::Ok
            }
            Err(e) => {
                let status = init_error_status(&e);
                set_last_error(format!("AMX backend initialization failed: {}", e));
                status
            }
        }
    })
}

/// Status reported for a backend that could not be started from a valid
/// configuration.
fn init_error_status(err: &BackendError) -> AmxStatus {
    match err {
        BackendError::Unsupported(_) => AmxStatus::ErrorUnsupported,
        BackendError::InvalidArgument(_) => AmxStatus::ErrorInvalidArgument,
        _ => AmxStatus::ErrorInternal,
    }
}

/// Destroy a backend created by `amx_backend_init`. Null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn amx_backend_free(backend: *mut AmxBackendHandle) {
    if !backend.is_null() {
        drop(Box::from_raw(backend));
    }
}

/// Backend name as a static C string; do not free it.
#[no_mangle]
pub extern "C" fn amx_backend_name() -> *const c_char {
    b"AMX\0".as_ptr() as *const c_char
}

#[no_mangle]
pub extern "C" fn amx_backend_guid() -> AmxGuid {
    AmxGuid {
        bytes: *AMX_GUID.as_bytes(),
    }
}

/// True when `backend` is a live AMX backend handle.
#[no_mangle]
pub unsafe extern "C" fn amx_backend_is_amx(backend: *const AmxBackendHandle) -> bool {
    if backend.is_null() {
        return false;
    }
    amx_backend::is_amx(&(*backend).backend)
}

/// Set the number of worker threads the matmul kernel uses.
#[no_mangle]
pub unsafe extern "C" fn amx_backend_set_n_threads(
    backend: *mut AmxBackendHandle,
    n_threads: u32,
) -> AmxStatus {
    catch_panic(|| {
        if backend.is_null() || n_threads == 0 {
            set_last_error("set_n_threads needs a backend and at least one thread".to_string());
            return AmxStatus::ErrorInvalidArgument;
        }
        let handle = unsafe { &mut *backend };
        amx_backend::set_n_threads(&mut handle.backend as &mut dyn Backend, n_threads as usize);
        AmxStatus::Ok
    })
}

/// Alignment, in bytes, of AMX buffers and of tensor offsets inside them.
#[no_mangle]
pub extern "C" fn amx_buffer_type_alignment() -> usize {
    amx_buffer_type().alignment()
}

#[no_mangle]
pub extern "C" fn amx_buffer_type_is_host() -> bool {
    amx_buffer_type().is_host()
}

/// Allocate an AMX buffer of `size` bytes; release it with `amx_buffer_free`.
#[no_mangle]
pub unsafe extern "C" fn amx_buffer_alloc(
    size: usize,
    buffer_out: *mut *mut AmxBufferHandle,
) -> AmxStatus {
    catch_panic(|| {
        if buffer_out.is_null() {
            set_last_error("buffer_out is null".to_string());
            return AmxStatus::ErrorInvalidArgument;
        }
        match amx_buffer_type().alloc_buffer(size) {
            Ok(buffer) => {
                let handle = Box::new(AmxBufferHandle { buffer });
                unsafe { *buffer_out = Box::into_raw(handle) };
                AmxStatus::Ok
            }
            Err(e @ TensorError::AllocationFailure { .. }) => {
                set_last_error(e.to_string());
                AmxStatus::ErrorOutOfMemory
            }
            Err(e) => {
                set_last_error(e.to_string());
                AmxStatus::ErrorInternal
            }
        }
    })
}

/// Start address of the buffer, or null for a null handle.
#[no_mangle]
pub unsafe extern "C" fn amx_buffer_base(buffer: *const AmxBufferHandle) -> *mut c_void {
    if buffer.is_null() {
        return std::ptr::null_mut();
    }
    (*buffer).buffer.base() as *mut c_void
}

#[no_mangle]
pub unsafe extern "C" fn amx_buffer_size(buffer: *const AmxBufferHandle) -> usize {
    if buffer.is_null() {
        return 0;
    }
    (*buffer).buffer.size()
}

/// Fill the whole buffer with `value`.
#[no_mangle]
pub unsafe extern "C" fn amx_buffer_clear(buffer: *mut AmxBufferHandle, value: u8) {
    if !buffer.is_null() {
        (*buffer).buffer.clear(value);
    }
}

/// Release a buffer. Must be called exactly once per buffer; null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn amx_buffer_free(buffer: *mut AmxBufferHandle) {
    if !buffer.is_null() {
        drop(Box::from_raw(buffer));
    }
}

/// Retrieve the last error message.
///
/// Returns a pointer to a C string describing the most recent error on this
/// thread, or null if no error has occurred. The caller must free the
/// returned string with `amx_free_string`.
#[no_mangle]
pub extern "C" fn amx_last_error() -> *mut c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null_mut(),
    }
}

/// Free a string previously returned by `amx_last_error`.
#[no_mangle]
pub unsafe extern "C" fn amx_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn last_error() -> Option<String> {
        let ptr = amx_last_error();
        if ptr.is_null() {
            return None;
        }
        let msg = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        unsafe { amx_free_string(ptr) };
        Some(msg)
    }

    #[test]
    fn test_identity() {
        let name = unsafe { CStr::from_ptr(amx_backend_name()) };
        assert_eq!(name.to_str().unwrap(), "AMX");
        assert_eq!(amx_backend_guid().bytes[0], 0x13);
        assert_eq!(amx_backend_guid().bytes[15], 0x3e);
        assert_eq!(amx_buffer_type_alignment(), 64);
        assert!(amx_buffer_type_is_host());
    }

    #[test]
    fn test_init_null_out() {
        let status = unsafe { amx_backend_init(std::ptr::null(), std::ptr::null_mut()) };
        assert_eq!(status, AmxStatus::ErrorInvalidArgument);
        assert!(last_error().unwrap().contains("backend_out"));
    }

    #[test]
    fn test_backend_lifecycle() {
        let mut handle = std::ptr::null_mut();
        let params = CString::new("n_threads=2").unwrap();
        let status = unsafe { amx_backend_init(params.as_ptr(), &mut handle) };
        if cfg!(target_arch = "x86_64") {
            assert_eq!(status, AmxStatus::Ok);
            unsafe {
                assert!(amx_backend_is_amx(handle));
                assert_eq!(amx_backend_set_n_threads(handle, 3), AmxStatus::Ok);
                assert_eq!(
                    amx_backend_set_n_threads(handle, 0),
                    AmxStatus::ErrorInvalidArgument
                );
                amx_backend_free(handle);
            }
        } else {
            assert_eq!(status, AmxStatus::ErrorUnsupported);
            assert!(last_error().unwrap().contains("not compiled with AMX support"));
        }
    }

    #[test]
    fn test_init_bad_params() {
        let mut handle = std::ptr::null_mut();
        let params = CString::new("n_threads=zero").unwrap();
        let status = unsafe { amx_backend_init(params.as_ptr(), &mut handle) };
        assert_eq!(status, AmxStatus::ErrorInvalidArgument);
        assert!(handle.is_null());
        assert!(last_error().unwrap().contains("n_threads"));
    }

    #[test]
    fn test_init_error_status() {
        assert_eq!(
            init_error_status(&BackendError::ThreadPool("spawn failed".to_string())),
            AmxStatus::ErrorInternal
        );
        assert_eq!(
            init_error_status(&BackendError::Other("boom".to_string())),
            AmxStatus::ErrorInternal
        );
        assert_eq!(
            init_error_status(&BackendError::Unsupported("no AMX".to_string())),
            AmxStatus::ErrorUnsupported
        );
    }

    #[test]
    fn test_buffer_lifecycle() {
        let mut buf = std::ptr::null_mut();
        unsafe {
            assert_eq!(amx_buffer_alloc(65, &mut buf), AmxStatus::Ok);
            assert_eq!(amx_buffer_base(buf) as usize % 64, 0);
            assert_eq!(amx_buffer_size(buf), 65);
            amx_buffer_clear(buf, 7);
            assert_eq!(*(amx_buffer_base(buf) as *const u8).add(64), 7);
            amx_buffer_free(buf);
        }
    }

    #[test]
    fn test_buffer_alloc_failure() {
        let mut buf = std::ptr::null_mut();
        let status = unsafe { amx_buffer_alloc(usize::MAX - 64, &mut buf) };
        assert_eq!(status, AmxStatus::ErrorOutOfMemory);
        assert!(buf.is_null());
        assert!(last_error().is_some());
    }

    #[test]
    fn test_null_handles() {
        unsafe {
            assert!(!amx_backend_is_amx(std::ptr::null()));
            assert!(amx_buffer_base(std::ptr::null()).is_null());
            assert_eq!(amx_buffer_size(std::ptr::null()), 0);
            amx_buffer_free(std::ptr::null_mut());
            amx_backend_free(std::ptr::null_mut());
        }
        assert!(amx_last_error().is_null());
    }
}
