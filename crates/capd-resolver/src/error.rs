/// Errors produced while locating or invoking a private compositor entry point.
///
/// These map 1:1 onto a subset of the error taxonomy carried by `capd-core`;
/// `capd-core` widens them with `From` into its own kind.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("library '{0}' is not mapped into this process")]
    DeviceNotFound(String),

    #[error("failed to read symbol table of '{0}': {1}")]
    SymbolTableUnreadable(String, String),

    #[error("no ABI variant of '{operation}' is compatible with platform {platform}")]
    PrivateApiUnavailable { operation: &'static str, platform: u32 },

    #[error("demangled parameter count ({found}) does not match any known variant of '{operation}'")]
    InvalidArgument { operation: &'static str, found: usize },

    #[error("'{operation}' returned a null token")]
    InternalError { operation: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
