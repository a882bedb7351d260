use amx_tensor::TensorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("tile register access was denied by the operating system")]
    PermissionDenied,
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("thread pool error: {0}")]
    ThreadPool(String),
    #[error("{0}")]
    Other(String),
}

impl From<BackendError> for TensorError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Tensor(e) => e,
            BackendError::InvalidArgument(msg) => TensorError::InvalidArgument(msg),
            BackendError::UnsupportedDType(msg) => TensorError::UnsupportedDType(msg),
            other => TensorError::Other(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
