//! Capture-backend selection and the documented init-only fallback chain
//! (spec &6, &7): `mode` picks which backend(s) to try; `auto` walks
//! `buffer_queue -> direct_capture -> fallback` in order and stops at the
//! first that succeeds. No fallback happens once a backend has
//! succeeded — only during this init path.

use std::sync::mpsc;
use std::time::Duration;

use capd_compositor::{BufferQueue, DisplayGateway, HelperLauncher, HelperToken, Orientation, Rect, TextureConsumer};
use capd_config::CaptureMode;
use capd_resolver::trampoline::CreateDisplayParams;
use capd_resolver::ResolverCatalog;

use crate::error::{Error, Result};

/// Which backend actually produced the returned consumer. Exposed so
/// callers can log or branch on degraded operation; never changes after
/// init (spec &7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureBackend {
    BufferQueue,
    DirectCapture,
    Fallback,
}

/// Source/destination rectangles and rotation applied once display
/// creation succeeds (spec &4.2).
pub struct ProjectionParams {
    pub source_rect: Rect,
    pub dest_rect: Rect,
    pub orientation: Orientation,
}

/// The three contract points the `fallback` backend needs from its
/// privileged helper (spec &4.7): a launch primitive, the channel a
/// real local-socket listener feeds the received [`HelperToken`] into,
/// and a timeout.
pub struct HelperConfig<'a> {
    pub helper_path: &'a str,
    pub args: &'a [&'a str],
    pub env_vars: &'a [(&'a str, &'a str)],
    pub timeout: Duration,
    pub token_rx: &'a mpsc::Receiver<HelperToken>,
}

/// Runs the init-only backend-selection chain named by `mode`. `auto`
/// tries `buffer_queue`, then `direct_capture`, then `fallback`,
/// stopping at the first success; the other three modes try exactly one
/// backend with no fallback (spec &6, &7).
///
/// Returns the constructed consumer, which backend produced it, and the
/// capture dimensions that backend settled on (the `fallback` backend
/// takes these from the helper's response rather than `physical_size`).
///
/// # Errors
/// Returns the last backend's error if every attempted backend fails.
pub fn init_capture(
    catalog: &ResolverCatalog,
    display_params: &CreateDisplayParams,
    projection: &ProjectionParams,
    texture_id: u32,
    mode: CaptureMode,
    physical_size: (u32, u32),
    helper: Option<&HelperConfig<'_>>,
) -> Result<(TextureConsumer, CaptureBackend, (u32, u32))> {
    let mut last_err = Error::PrivateApiUnavailable;
    for &backend in attempts_for(mode) {
        let attempt = match backend {
            CaptureBackend::BufferQueue => {
                try_buffer_queue(catalog, display_params, projection, texture_id).map(|c| (c, physical_size))
            }
            CaptureBackend::DirectCapture => {
                try_direct_capture(catalog, display_params, projection, texture_id).map(|c| (c, physical_size))
            }
            CaptureBackend::Fallback => try_fallback(catalog, texture_id, helper),
        };
        match attempt {
            Ok((consumer, size)) => return Ok((consumer, backend, size)),
            Err(e) => {
                tracing::warn!(backend = ?backend, error = %e, "capture backend init failed, trying next");
                last_err = e;
            }
        }
    }
    Err(last_err)
}

/// Which backends `mode` tries, in order (spec &6, &7).
fn attempts_for(mode: CaptureMode) -> &'static [CaptureBackend] {
    match mode {
        CaptureMode::Auto => &[CaptureBackend::BufferQueue, CaptureBackend::DirectCapture, CaptureBackend::Fallback],
        CaptureMode::BufferQueue => &[CaptureBackend::BufferQueue],
        CaptureMode::DirectCapture => &[CaptureBackend::DirectCapture],
        CaptureMode::Fallback => &[CaptureBackend::Fallback],
    }
}

fn try_buffer_queue(
    catalog: &ResolverCatalog,
    display_params: &CreateDisplayParams,
    projection: &ProjectionParams,
    texture_id: u32,
) -> Result<TextureConsumer> {
    let (token, consumer_handle) = create_display_and_queue(catalog, display_params, projection)?;
    drop(token);
    Ok(TextureConsumer::initialize(consumer_handle, texture_id, true))
}

/// Degraded direct-consumer path (spec &4.3): same display/queue
/// construction, but the consumer is built without the full
/// texture-update constructor, so `get_transform()` stays identity.
fn try_direct_capture(
    catalog: &ResolverCatalog,
    display_params: &CreateDisplayParams,
    projection: &ProjectionParams,
    texture_id: u32,
) -> Result<TextureConsumer> {
    let (token, consumer_handle) = create_display_and_queue(catalog, display_params, projection)?;
    drop(token);
    Ok(TextureConsumer::initialize_degraded(consumer_handle, texture_id))
}

fn create_display_and_queue(
    catalog: &ResolverCatalog,
    display_params: &CreateDisplayParams,
    projection: &ProjectionParams,
) -> Result<(capd_compositor::DisplayToken, capd_compositor::BufferHandle)> {
    let gateway = DisplayGateway::new(catalog);
    let token = gateway.create_display(display_params)?;
    let (producer, consumer_handle) = BufferQueue::create(catalog)?;
    gateway.configure_projection(
        &token,
        producer.raw(),
        projection.source_rect,
        projection.dest_rect,
        projection.orientation,
    )?;
    Ok((token, consumer_handle))
}

/// Spawns the privileged helper and waits for its display-token
/// response (spec &4.7). The helper only ever supplies the token and
/// the display's dimensions — it never produces frames itself, so once
/// its response arrives this still builds an ordinary (degraded)
/// buffer-queue consumer, just sized from the helper's answer rather
/// than the caller's `physical_size`.
fn try_fallback(
    catalog: &ResolverCatalog,
    texture_id: u32,
    helper: Option<&HelperConfig<'_>>,
) -> Result<(TextureConsumer, (u32, u32))> {
    let helper_cfg = helper.ok_or(Error::PrivateApiUnavailable)?;
    let mut launcher = HelperLauncher::launch(helper_cfg.helper_path, helper_cfg.args, helper_cfg.env_vars)?;
    let helper_token = launcher.await_token(helper_cfg.token_rx, helper_cfg.timeout)?;

    let (_producer, consumer_handle) = BufferQueue::create(catalog)?;
    let consumer = TextureConsumer::initialize_degraded(consumer_handle, texture_id);
    Ok((consumer, (helper_token.width, helper_token.height)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_tries_every_backend_in_spec_order() {
        assert_eq!(
            attempts_for(CaptureMode::Auto),
            &[CaptureBackend::BufferQueue, CaptureBackend::DirectCapture, CaptureBackend::Fallback]
        );
    }

    #[test]
    fn explicit_modes_never_fall_back() {
        assert_eq!(attempts_for(CaptureMode::BufferQueue), &[CaptureBackend::BufferQueue]);
        assert_eq!(attempts_for(CaptureMode::DirectCapture), &[CaptureBackend::DirectCapture]);
        assert_eq!(attempts_for(CaptureMode::Fallback), &[CaptureBackend::Fallback]);
    }

    #[test]
    fn fallback_without_helper_config_is_unavailable() {
        let err = helper_or_unavailable(None);
        assert!(matches!(err, Err(Error::PrivateApiUnavailable)));
    }

    fn helper_or_unavailable(helper: Option<&HelperConfig<'_>>) -> Result<&HelperConfig<'_>> {
        helper.ok_or(Error::PrivateApiUnavailable)
    }
}
