/// Status codes returned by the FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AmxStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorOutOfMemory = 2,
    /// The library was built without AMX support.
    ErrorUnsupported = 3,
    ErrorInternal = 4,
}

/// 128-bit backend identity.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmxGuid {
    pub bytes: [u8; 16],
}
