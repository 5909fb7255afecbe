use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to open process: {0}")]
    ProcessOpenFailed(String),

    #[error("Invalid target address {0:#x}")]
    InvalidAddress(u64),

    #[error("Failed to read process memory at {address:#x}: {message}")]
    MemoryReadFailed { address: u64, message: String },

    #[error("Failed to write process memory at {address:#x}: {message}")]
    MemoryWriteFailed { address: u64, message: String },

    #[error("Failed to change protection at {address:#x}: {message}")]
    ProtectionChangeFailed { address: u64, message: String },

    #[error("Failed to allocate {size:#x} bytes near {preferred:#x}")]
    AllocationFailed { preferred: u64, size: usize },

    #[error("Replace count {actual} is below the {kind} detour minimum of {minimum}")]
    ReplaceCountTooSmall {
        kind: &'static str,
        minimum: usize,
        actual: usize,
    },

    #[error("Injection failed: {0}")]
    InjectionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error rejects an address below the writable floor.
    pub fn is_invalid_address(&self) -> bool {
        matches!(self, Error::InvalidAddress(_))
    }
}
