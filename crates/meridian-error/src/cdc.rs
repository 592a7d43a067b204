//! CDC materializer error types and error code definitions (spec §4.1, §7).

use thiserror::Error;

/// Materializer error type with structured, numbered error codes.
#[derive(Debug, Error, Clone)]
pub enum CdcError {
    /// CDC001: the envelope could not be decoded.
    #[error("CDC001: envelope decode failed: {reason}")]
    DecodeFailed {
        /// Reason decoding failed.
        reason: String,
    },

    /// CDC002: the downstream document store returned a transient error.
    #[error("CDC002: document store error (transient): {reason}")]
    StoreTransient {
        /// Reason the store call failed.
        reason: String,
    },

    /// CDC003: the downstream document store returned a permanent error.
    #[error("CDC003: document store error (permanent): {reason}")]
    StorePermanent {
        /// Reason the store call failed.
        reason: String,
    },

    /// CDC004: the log source (broker) connection failed.
    #[error("CDC004: log source connection failed: {reason}")]
    SourceConnectionFailed {
        /// Reason the connection failed.
        reason: String,
    },

    /// CDC005: the dead-letter sink itself failed to accept an envelope.
    #[error("CDC005: dead-letter sink error: {reason}")]
    DeadLetterFailed {
        /// Reason the sink rejected the envelope.
        reason: String,
    },

    /// CDC006: retry budget for a transient failure was exhausted.
    #[error("CDC006: retries exhausted: {reason}")]
    RetriesExhausted {
        /// Reason retries stopped.
        reason: String,
    },
}

/// Error code with classification for retry/dead-letter decisions,
/// mirroring the Retryable/Fatal split in spec §4.1's algorithm and
/// the Failure-semantics paragraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdcErrorCode {
    /// CDC001
    DecodeFailed,
    /// CDC002
    StoreTransient,
    /// CDC003
    StorePermanent,
    /// CDC004
    SourceConnectionFailed,
    /// CDC005
    DeadLetterFailed,
    /// CDC006
    RetriesExhausted,
}

impl CdcErrorCode {
    /// `true` if this error should be retried with backoff before giving up
    /// (spec §4.1: "Transient store errors → Retryable (retry with backoff, bounded)").
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::StoreTransient | Self::SourceConnectionFailed
        )
    }

    /// `true` if this error should be sent to the dead-letter sink and
    /// acknowledged (spec §4.1: "Permanent decode/shape errors ... send to
    /// dead-letter sink (abstract), ack").
    #[must_use]
    pub const fn should_dead_letter(self) -> bool {
        matches!(self, Self::DecodeFailed | Self::StorePermanent)
    }
}

impl CdcError {
    /// The classification code for this error.
    #[must_use]
    pub const fn code(&self) -> CdcErrorCode {
        match self {
            Self::DecodeFailed { .. } => CdcErrorCode::DecodeFailed,
            Self::StoreTransient { .. } => CdcErrorCode::StoreTransient,
            Self::StorePermanent { .. } => CdcErrorCode::StorePermanent,
            Self::SourceConnectionFailed { .. } => CdcErrorCode::SourceConnectionFailed,
            Self::DeadLetterFailed { .. } => CdcErrorCode::DeadLetterFailed,
            Self::RetriesExhausted { .. } => CdcErrorCode::RetriesExhausted,
        }
    }

    /// `true` if this error is transient (retryable).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.code().is_transient()
    }

    /// `true` if this error should go to the dead-letter sink.
    #[must_use]
    pub const fn should_dead_letter(&self) -> bool {
        self.code().should_dead_letter()
    }
}

impl From<sqlx::Error> for CdcError {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreTransient {
            reason: err.to_string(),
        }
    }
}
