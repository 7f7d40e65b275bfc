//! Error types for the vectorlib core library.
//!
//! Defines the error enum exposed by the public API, its stable error codes,
//! and a convenient result alias.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

use crate::hnsw::Label;

macro_rules! define_error_codes {
    (
        $(#[$enum_meta:meta])*
        enum $CodeTy:ident for $ErrTy:ident {
            $(
                $(#[$variant_meta:meta])*
                $CodeVariant:ident => $ErrVariant:ident $( { $($pattern:tt)* } )? => $code:expr
            ),+ $(,)?
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
        #[non_exhaustive]
        pub enum $CodeTy {
            $(
                $(#[$variant_meta])*
                $CodeVariant,
            )+
        }

        impl $CodeTy {
            /// Return the stable machine-readable representation of this error code.
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$CodeVariant => $code,)+
                }
            }
        }

        impl fmt::Display for $CodeTy {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl $ErrTy {
            #[doc = concat!(
                "Retrieve the stable [`",
                stringify!($CodeTy),
                "`] for this error."
            )]
            pub const fn code(&self) -> $CodeTy {
                match self {
                    $(Self::$ErrVariant $( { $($pattern)* } )? => $CodeTy::$CodeVariant,)+
                }
            }
        }
    };
}

/// Errors produced by the HNSW index.
///
/// Allocation failure is not represented: the global allocator aborts the
/// process when the node arena cannot be reserved.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HnswError {
    /// Parameters were invalid for the current configuration.
    #[error("invalid HNSW parameter: {reason}")]
    InvalidParameters {
        /// Human-readable explanation of the rejected parameter.
        reason: String,
    },
    /// Inserting another element would exceed the configured capacity.
    #[error("the number of elements exceeds the specified limit of {capacity}")]
    CapacityExceeded {
        /// Capacity of the index when the insertion was attempted.
        capacity: usize,
    },
    /// A serialised index failed structural or size checks.
    #[error("index seems to be corrupted or unsupported: {reason}")]
    Corrupted {
        /// Description of the failed check.
        reason: String,
    },
    /// Reading or writing an index file failed.
    #[error("I/O failure on `{}`: {source}", path.display())]
    Io {
        /// Path being accessed when the failure occurred.
        path: PathBuf,
        /// Underlying operating system error.
        #[source]
        source: io::Error,
    },
    /// Reading or writing a caller-supplied stream failed.
    #[error("I/O failure on index stream: {source}")]
    StreamIo {
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The requested operation is not valid for the element's current state.
    #[error("invalid operation: {reason}")]
    InvalidOperation {
        /// Explanation of why the operation was refused.
        reason: String,
    },
    /// A supplied vector did not match the byte width of the space.
    #[error("vector has {actual} bytes but the space expects {expected}")]
    VectorSize {
        /// Byte width required by the space.
        expected: usize,
        /// Byte width supplied by the caller.
        actual: usize,
    },
    /// No element is bound to the requested label.
    #[error("label {label} is not present in the index")]
    LabelNotFound {
        /// The unknown label.
        label: Label,
    },
    /// A lock guarding shared state was poisoned by a panicking thread.
    #[error("{resource} lock poisoned")]
    LockPoisoned {
        /// Name of the poisoned resource.
        resource: &'static str,
    },
}

define_error_codes! {
    /// Stable codes describing [`HnswError`] variants.
    enum HnswErrorCode for HnswError {
        /// Parameters were invalid for the current configuration.
        InvalidParameters => InvalidParameters { .. } => "HNSW_INVALID_PARAMETERS",
        /// Inserting another element would exceed the configured capacity.
        CapacityExceeded => CapacityExceeded { .. } => "HNSW_CAPACITY_EXCEEDED",
        /// A serialised index failed structural or size checks.
        Corrupted => Corrupted { .. } => "HNSW_CORRUPTED",
        /// Reading or writing an index file failed.
        Io => Io { .. } => "HNSW_IO",
        /// Reading or writing a caller-supplied stream failed.
        StreamIo => StreamIo { .. } => "HNSW_STREAM_IO",
        /// The requested operation is not valid for the element's current state.
        InvalidOperation => InvalidOperation { .. } => "HNSW_INVALID_OPERATION",
        /// A supplied vector did not match the byte width of the space.
        VectorSize => VectorSize { .. } => "HNSW_VECTOR_SIZE",
        /// No element is bound to the requested label.
        LabelNotFound => LabelNotFound { .. } => "HNSW_LABEL_NOT_FOUND",
        /// A lock guarding shared state was poisoned.
        LockPoisoned => LockPoisoned { .. } => "HNSW_LOCK_POISONED",
    }
}

impl HnswError {
    pub(crate) fn corrupted(reason: impl Into<String>) -> Self {
        Self::Corrupted {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }
}

/// Convenient alias for results returned by the core API.
pub type Result<T> = core::result::Result<T, HnswError>;
