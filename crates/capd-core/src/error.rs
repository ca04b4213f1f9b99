//! Unified error taxonomy (spec &7). Each sub-crate's error type widens
//! into this one via `From`; the IPC transport (outside this crate)
//! translates each kind to a stable 16-bit numeric code plus a
//! human-readable message.

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("compositor refused the call for policy reasons")]
    PermissionDenied,

    #[error("expected resource absent: {0}")]
    DeviceNotFound(String),

    #[error("buffer allocation failed: {0}")]
    ResourceExhausted(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("method called before initialize() succeeded")]
    NotInitialized,

    #[error("advance_with_timeout deadline expired across both attempts")]
    Timeout,

    #[error("internal fence wait exceeded its deadline")]
    FenceTimeout,

    #[error("symbol resolution exhausted all variants, or all variants returned null")]
    PrivateApiUnavailable,

    #[error("requested config option cannot be satisfied on this platform version: {0}")]
    NotSupported(String),

    #[error("programmer-visible invariant violated: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable 16-bit code distinct per kind (spec &7). Never reused or
    /// renumbered once published — the IPC transport's clients persist
    /// these.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::PermissionDenied => 0x4C01,
            Self::DeviceNotFound(_) => 0x4C02,
            Self::ResourceExhausted(_) => 0x4C03,
            Self::InvalidArgument(_) => 0x4C04,
            Self::NotInitialized => 0x4C05,
            Self::Timeout => 0x4C06,
            Self::FenceTimeout => 0x4C07,
            Self::PrivateApiUnavailable => 0x4C09,
            Self::NotSupported(_) => 0x4C0A,
            Self::InternalError(_) => 0x4CFF,
        }
    }
}

impl From<capd_resolver::Error> for Error {
    fn from(e: capd_resolver::Error) -> Self {
        match e {
            capd_resolver::Error::DeviceNotFound(s) => Self::DeviceNotFound(s),
            capd_resolver::Error::SymbolTableUnreadable(path, reason) => {
                Self::InternalError(format!("symbol table unreadable for '{path}': {reason}"))
            }
            capd_resolver::Error::PrivateApiUnavailable { .. } => Self::PrivateApiUnavailable,
            capd_resolver::Error::InvalidArgument { operation, found } => {
                Self::InvalidArgument(format!("{operation}: unexpected parameter count {found}"))
            }
            capd_resolver::Error::InternalError { operation } => {
                Self::InternalError(operation.to_string())
            }
        }
    }
}

impl From<capd_compositor::Error> for Error {
    fn from(e: capd_compositor::Error) -> Self {
        match e {
            capd_compositor::Error::PermissionDenied => Self::PermissionDenied,
            capd_compositor::Error::PrivateApiUnavailable(inner) => inner.into(),
            capd_compositor::Error::InvalidArgument(s) => Self::InvalidArgument(s),
            capd_compositor::Error::NotInitialized => Self::NotInitialized,
            capd_compositor::Error::Timeout => Self::Timeout,
            capd_compositor::Error::NotSupported(s) => Self::NotSupported(s),
            capd_compositor::Error::InternalError(s) => Self::InternalError(s),
        }
    }
}

impl From<capd_gpu::Error> for Error {
    fn from(e: capd_gpu::Error) -> Self {
        match e {
            capd_gpu::Error::Vulkan(r) => Self::InternalError(format!("vulkan: {r}")),
            capd_gpu::Error::DeviceNotFound => Self::DeviceNotFound("gpu device".into()),
            capd_gpu::Error::ResourceExhausted(s) => Self::ResourceExhausted(s),
            capd_gpu::Error::InvalidArgument(s) => Self::InvalidArgument(s),
            capd_gpu::Error::ContextBusy => {
                Self::InternalError("gpu context already bound on another thread".into())
            }
            capd_gpu::Error::NotSupported(s) => Self::NotSupported(s),
            capd_gpu::Error::InternalError(s) => Self::InternalError(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let all = [
            Error::PermissionDenied,
            Error::DeviceNotFound(String::new()),
            Error::ResourceExhausted(String::new()),
            Error::InvalidArgument(String::new()),
            Error::NotInitialized,
            Error::Timeout,
            Error::FenceTimeout,
            Error::PrivateApiUnavailable,
            Error::NotSupported(String::new()),
            Error::InternalError(String::new()),
        ];
        let mut codes: Vec<u16> = all.iter().map(Error::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}
