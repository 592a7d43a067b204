//! Unified error types for the Meridian CDC materializer and saga/CQRS
//! core, modeled on the teacher's `fraiseql-error::RuntimeError` top-level
//! wrapping pattern: narrow, per-concern error enums (`cdc::CdcError`,
//! `cqrs::CommandFailure`) fold into one top-level enum at the seams where
//! callers need a single `Result` type (the HTTP layer, the materializer's
//! outermost loop).

pub mod cdc;
pub mod cqrs;
#[cfg(feature = "axum-compat")]
pub mod http;

pub use cdc::{CdcError, CdcErrorCode};
pub use cqrs::CommandFailure;
#[cfg(feature = "axum-compat")]
pub use http::{ErrorCode, ErrorResponse};

use thiserror::Error;

/// Top-level error type, covering every fallible seam in the crate graph.
#[derive(Debug, Error, Clone)]
pub enum MeridianError {
    /// A failure from the CDC materializer pipeline.
    #[error(transparent)]
    Cdc(#[from] CdcError),

    /// A failure from a saga/CQRS command.
    #[error(transparent)]
    Command(#[from] CommandFailure),

    /// A database error not already classified into `Cdc`/`Command`.
    #[error("database error: {0}")]
    Database(String),

    /// Fallback for errors that don't merit their own variant.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for MeridianError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl MeridianError {
    /// Short machine-readable identifier, analogous to
    /// `fraiseql_error::RuntimeError::error_code`.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Cdc(err) => match err.code() {
                CdcErrorCode::DecodeFailed => "CDC001",
                CdcErrorCode::StoreTransient => "CDC002",
                CdcErrorCode::StorePermanent => "CDC003",
                CdcErrorCode::SourceConnectionFailed => "CDC004",
                CdcErrorCode::DeadLetterFailed => "CDC005",
                CdcErrorCode::RetriesExhausted => "CDC006",
            },
            Self::Command(_) => "COMMAND_FAILURE",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// `true` if retrying the operation that produced this error might
    /// succeed without operator intervention.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Cdc(err) => err.is_transient(),
            Self::Command(cmd) => !cmd.is_terminal(),
            Self::Database(_) => true,
            Self::Internal(_) => false,
        }
    }
}
