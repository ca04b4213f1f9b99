#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("compositor denied the request")]
    PermissionDenied,

    #[error(transparent)]
    PrivateApiUnavailable(#[from] capd_resolver::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("method called before initialize() succeeded")]
    NotInitialized,

    #[error("advance_with_timeout deadline expired")]
    Timeout,

    #[error("requested config option is not supported on this platform version")]
    NotSupported(String),

    #[error("internal invariant violated: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
