use thiserror::Error;

/// The error type shared by all stria-* crates.
///
/// Allocation failure is the only recoverable condition in the library:
/// everything else (out-of-range indices, zero strides, use of a released
/// handle) is a programmer error, checked with `debug_assert!` at the call
/// sites rather than reported at runtime.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn out_of_memory(requested: usize) -> Error {
        Error(ErrorKind::OutOfMemory { requested }.into())
    }

    /// Returns `true` if this error represents an allocation failure.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self.kind(), ErrorKind::OutOfMemory { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("failed to allocate {requested} bytes")]
    OutOfMemory { requested: usize },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}
