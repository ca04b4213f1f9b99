//! Frame-lifecycle controller, rolling statistics, and the unified error
//! taxonomy that widens every sub-crate's errors into one (spec &2, &4.6,
//! &7).

#![warn(future_incompatible, nonstandard_style, rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod error;
pub mod frame;
pub mod init;
pub mod stats;

pub use error::{Error, Result};
pub use frame::{FrameController, FrameResult, PixelFormat};
pub use init::{init_capture, CaptureBackend, HelperConfig, ProjectionParams};
pub use stats::{Stats, StatsRecorder};
