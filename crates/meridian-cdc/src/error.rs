//! Local result alias over [`meridian_error::CdcError`].

pub use meridian_error::{CdcError, CdcErrorCode};

/// Convenience alias used throughout this crate.
pub type CdcResult<T> = Result<T, CdcError>;
