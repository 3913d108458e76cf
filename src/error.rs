//! Crate error types
//!
//! Only construction-time failures surface as errors. Backend failures during
//! normal operation (enumeration, descriptor reads, opens) are absorbed at
//! the component boundary and become empty results plus log lines, so callers
//! see a uniform "device not available" regardless of platform.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("USB backend error: {0}")]
    Backend(#[from] crate::backend::BackendError),

    #[error("thread error: {0}")]
    Thread(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
