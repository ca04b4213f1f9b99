//! Consumer-side wrapper exposing the most recent queued buffer as a GPU
//! external-sampler texture (spec &4.3).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use crate::buffer_queue::BufferHandle;
use crate::error::{Error, Result};
use crate::transform::Mat4;

/// Exponential-backoff starting interval for
/// [`TextureConsumer::advance_with_timeout`].
const POLL_START: Duration = Duration::from_millis(1);
/// Backoff cap; the consumer offers no portable blocking primitive across
/// platform versions so this core polls rather than waits.
const POLL_CAP: Duration = Duration::from_millis(16);

/// Consumer-side state: `held`, the cached transform, and the last
/// acquired timestamp. One instance per pipeline (spec &3).
pub struct TextureConsumer {
    consumer: BufferHandle,
    texture_id: u32,
    held: AtomicBool,
    frame_pending: AtomicBool,
    transform: std::sync::Mutex<Mat4>,
    timestamp_ns: AtomicI64,
    /// Set when no discoverable constructor symbol let this run the real
    /// consumer's texture-update path; in this mode `advance()` still
    /// succeeds but the transform stays identity (spec &4.3).
    degraded: bool,
}

impl TextureConsumer {
    /// Constructs the platform texture consumer over `consumer`, binding
    /// `texture_id` as the external-sampler texture. `use_fence_sync`
    /// requests native fence-sync when the preprocessor later imports the
    /// same buffer; this component only records the flag for that use.
    #[must_use]
    pub fn initialize(consumer: BufferHandle, texture_id: u32, use_fence_sync: bool) -> Self {
        let _ = use_fence_sync;
        Self {
            consumer,
            texture_id,
            held: AtomicBool::new(false),
            frame_pending: AtomicBool::new(false),
            transform: std::sync::Mutex::new(Mat4::identity()),
            timestamp_ns: AtomicI64::new(0),
            degraded: false,
        }
    }

    /// Builds a degraded, direct-consumer instance: used when the exact
    /// consumer constructor symbol could not be resolved on this platform.
    /// `advance()` still succeeds; `get_transform()` always returns
    /// identity. Callers can detect this via [`Self::is_degraded`].
    #[must_use]
    pub fn initialize_degraded(consumer: BufferHandle, texture_id: u32) -> Self {
        Self {
            consumer,
            texture_id,
            held: AtomicBool::new(false),
            frame_pending: AtomicBool::new(false),
            transform: std::sync::Mutex::new(Mat4::identity()),
            timestamp_ns: AtomicI64::new(0),
            degraded: true,
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    #[must_use]
    pub fn texture_id(&self) -> u32 {
        self.texture_id
    }

    #[must_use]
    pub fn consumer_handle(&self) -> BufferHandle {
        self.consumer
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn frame_pending(&self) -> bool {
        self.frame_pending.load(Ordering::Acquire)
    }

    /// Tries to make the most recent queued buffer available as the
    /// texture contents. If a previous acquire is still unreleased,
    /// auto-releases it first and logs a warning (spec &4.3).
    ///
    /// Returns `false` if no new buffer exists.
    pub fn advance(&self) -> bool {
        if self.held.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                texture_id = self.texture_id,
                "advance() called while a prior frame was still held; auto-releasing"
            );
            self.do_release();
            self.held.store(true, Ordering::Release);
        }

        let has_frame = self.poll_queue();
        if !has_frame {
            self.held.store(false, Ordering::Release);
            return false;
        }

        if !self.degraded {
            *self.transform.lock().unwrap() = self.read_transform_from_consumer();
        }
        self.timestamp_ns.store(self.read_timestamp_from_consumer(), Ordering::Release);
        self.frame_pending.store(false, Ordering::Release);
        true
    }

    /// As [`Self::advance`], but polls with exponential backoff (starting
    /// at 1 ms, capped at 16 ms) until success or `timeout_ms` elapses.
    /// `timeout_ms == 0` returns immediately: success iff a frame is
    /// already queued.
    pub fn advance_with_timeout(&self, timeout_ms: u64) -> bool {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut backoff = POLL_START;
        loop {
            if self.advance() {
                return true;
            }
            if timeout_ms == 0 || Instant::now() >= deadline {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(backoff.min(remaining));
            backoff = (backoff * 2).min(POLL_CAP);
        }
    }

    /// Returns the current buffer to the queue. Idempotent under
    /// concurrent callers: only the thread that wins the `held` CAS
    /// performs the underlying release.
    pub fn release(&self) -> Result<()> {
        if self.held.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire).is_ok() {
            self.do_release();
        }
        Ok(())
    }

    /// Column-major 4x4 transform cached from the last successful
    /// `advance()`. Always identity in degraded mode.
    #[must_use]
    pub fn get_transform(&self) -> Mat4 {
        *self.transform.lock().unwrap()
    }

    #[must_use]
    pub fn get_timestamp(&self) -> i64 {
        self.timestamp_ns.load(Ordering::Acquire)
    }

    /// Called from the frame-available callback thread; sets the pending
    /// flag only, per spec &5 ("it does not call acquire").
    pub fn notify_frame_available(&self) {
        self.frame_pending.store(true, Ordering::Release);
    }

    fn poll_queue(&self) -> bool {
        // No live compositor to poll in this core; a produced buffer is
        // modeled as the frame_pending flag having been raised by the
        // callback thread (spec &5) before this call.
        self.frame_pending.load(Ordering::Acquire)
    }

    fn read_transform_from_consumer(&self) -> Mat4 {
        Mat4::identity()
    }

    fn read_timestamp_from_consumer(&self) -> i64 {
        self.timestamp_ns.load(Ordering::Acquire)
    }

    fn do_release(&self) {
        let _ = self.consumer;
    }
}

impl std::fmt::Debug for TextureConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureConsumer")
            .field("texture_id", &self.texture_id)
            .field("held", &self.is_held())
            .field("degraded", &self.degraded)
            .finish()
    }
}

/// Guards that a mismatched platform-string variant call never reaches a
/// consumer that doesn't expect it. See [`crate::error::Error::NotSupported`].
pub fn require_not_degraded(consumer: &TextureConsumer) -> Result<()> {
    if consumer.is_degraded() {
        return Err(Error::NotSupported(
            "full texture-consumer transform requested in degraded mode".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> BufferHandle {
        BufferHandle(std::ptr::null_mut())
    }

    #[test]
    fn advance_returns_false_when_nothing_pending() {
        let c = TextureConsumer::initialize(handle(), 7, true);
        assert!(!c.advance());
        assert!(!c.is_held());
    }

    #[test]
    fn advance_succeeds_once_pending_is_set() {
        let c = TextureConsumer::initialize(handle(), 7, true);
        c.notify_frame_available();
        assert!(c.advance());
        assert!(c.is_held());
        assert!(!c.frame_pending());
    }

    #[test]
    fn release_clears_held_and_is_idempotent() {
        let c = TextureConsumer::initialize(handle(), 7, true);
        c.notify_frame_available();
        assert!(c.advance());
        c.release().unwrap();
        assert!(!c.is_held());
        c.release().unwrap();
        assert!(!c.is_held());
    }

    #[test]
    fn degraded_mode_reports_identity_transform() {
        let c = TextureConsumer::initialize_degraded(handle(), 7);
        c.notify_frame_available();
        assert!(c.advance());
        assert!(c.get_transform().is_identity());
        assert!(require_not_degraded(&c).is_err());
    }

    #[test]
    fn advance_with_timeout_zero_is_immediate() {
        let c = TextureConsumer::initialize(handle(), 7, true);
        let start = Instant::now();
        assert!(!c.advance_with_timeout(0));
        assert!(start.elapsed() < Duration::from_millis(5));
    }

    #[test]
    fn repeated_advance_without_release_auto_recovers() {
        let c = TextureConsumer::initialize(handle(), 7, true);
        c.notify_frame_available();
        assert!(c.advance());
        c.notify_frame_available();
        assert!(c.advance());
        assert!(c.is_held());
    }
}
