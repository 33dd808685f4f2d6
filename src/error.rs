use thiserror::Error;

/// Stable, numerically-assigned error codes shared with host-language
/// bindings. Numeric values must not be renumbered once released.
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
#[repr(i32)]
pub enum CoreError {
    #[error("generic failure")]
    Failed = 1,
    #[error("invalid state for this operation")]
    InvalidState = 2,
    #[error("invalid parameter")]
    InvalidParam = 3,
    #[error("socket error")]
    SockError = 4,
    #[error("tls failure")]
    SslFailed = 5,
    #[error("would block, retry later")]
    Again = 6,
    #[error("not supported")]
    NotSupported = 7,
    #[error("timed out")]
    Timeout = 8,
}

impl CoreError {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Fatal errors terminate the owning session/connection; transient ones
    /// (`Again`) do not.
    pub fn is_fatal(self) -> bool {
        !matches!(self, CoreError::Again)
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> CoreError {
        if err.kind() == std::io::ErrorKind::WouldBlock {
            CoreError::Again
        } else {
            CoreError::SockError
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
