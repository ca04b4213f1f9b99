//! GPU-synchronization handle ownership (spec &4.5, open question in &9).
//!
//! A non-empty fence must be waited on by the downstream consumer before
//! reading the output buffer; `FrameController` never waits on it itself.
//! If a `FrameResult` is dropped without the fence being consumed, the
//! exported file descriptor must still be closed — so `Fence` owns it
//! with a closing `Drop`, resolving the open question in favor of (b):
//! the return type owns the fence.

use std::os::unix::io::RawFd;

/// An exported native fence-sync file descriptor, or the empty fence used
/// when the native fence-sync extension is unavailable and the
/// implementation instead flushed the command stream synchronously.
pub struct Fence {
    fd: Option<RawFd>,
}

impl Fence {
    #[must_use]
    pub fn from_fd(fd: RawFd) -> Self {
        Self { fd: Some(fd) }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self { fd: None }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fd.is_none()
    }

    #[must_use]
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.fd
    }

    /// Hands ownership of the fd to the caller; the `Drop` impl will no
    /// longer close it. Used when the IPC transport takes over the fd's
    /// lifetime to pass it to the downstream consumer.
    pub fn into_raw_fd(mut self) -> Option<RawFd> {
        self.fd.take()
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        if let Some(fd) = self.fd.take() {
            unsafe {
                libc::close(fd);
            }
        }
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence").field("fd", &self.fd).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fence_reports_empty() {
        let f = Fence::empty();
        assert!(f.is_empty());
        assert_eq!(f.as_raw_fd(), None);
    }

    #[test]
    fn into_raw_fd_prevents_double_close() {
        // -1 is not a real fd; this only exercises the ownership-transfer
        // bookkeeping, not an actual close() syscall's outcome.
        let f = Fence::from_fd(-1);
        let taken = f.into_raw_fd();
        assert_eq!(taken, Some(-1));
    }
}
