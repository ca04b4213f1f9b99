//! Virtual-display, buffer-queue, and texture-consumer surface over the
//! resolved compositor ABI (spec &2, &4.2-&4.3, &4.7).
//!
//! Instantiates a virtual display, connects a producer/consumer buffer
//! pair to it, and exposes each newly composited frame as a GPU external
//! texture with a transform matrix and timestamp. When the platform
//! refuses to hand back a display token directly, [`helper_launcher`]
//! provides the documented fallback.

#![warn(future_incompatible, nonstandard_style, rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

pub mod buffer_queue;
pub mod error;
pub mod gateway;
pub mod helper_launcher;
pub mod texture_consumer;
pub mod transform;

pub use buffer_queue::{BufferHandle, BufferQueue};
pub use error::{Error, Result};
pub use gateway::{DisplayGateway, DisplayToken, Orientation, Rect};
pub use helper_launcher::{HelperLauncher, HelperToken};
pub use texture_consumer::TextureConsumer;
pub use transform::Mat4;
