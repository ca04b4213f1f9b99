#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] ash::vk::Result),

    #[error("no suitable compute-capable physical device found")]
    DeviceNotFound,

    #[error("buffer allocation failed: {0}")]
    ResourceExhausted(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("gpu context already bound on another thread")]
    ContextBusy,

    #[error("requested compute-shader context version is not supported on this platform")]
    NotSupported(String),

    #[error("internal invariant violated: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
