//! Fallback path used only when `DisplayGateway::create_display` returns
//! null on every ABI variant (spec &4.7).
//!
//! The helper's own binary format and runtime are outside this crate's
//! concern; this module treats it as a black box reachable through three
//! contract points: a launch primitive, a receiver for the token
//! reference, and a timeout.

use std::process::{Child, Command};
use std::sync::mpsc;
use std::time::Duration;

use crate::error::{Error, Result};

/// Token reference and dimensions handed back by the helper over its
/// local IPC channel.
#[derive(Debug, Clone)]
pub struct HelperToken {
    pub token_ref: u64,
    pub width: u32,
    pub height: u32,
}

/// Spawns `helper_path` with `env_vars` appended to the current
/// environment (the `CLASSPATH`-equivalent pointing at a bundled package,
/// per spec), and waits up to `timeout` for a response on `receiver`.
///
/// `receiver` models the local IPC transaction as a channel; callers wire
/// a real local-socket listener to feed it in production. On timeout the
/// child is killed and [`Error::PrivateApiUnavailable`] returned so it
/// composes with the trampoline failure enum.
pub struct HelperLauncher {
    child: Option<Child>,
}

impl HelperLauncher {
    /// Forks a child running `helper_path` with `args`, extending the
    /// environment with `env_vars`.
    pub fn launch(helper_path: &str, args: &[&str], env_vars: &[(&str, &str)]) -> Result<Self> {
        let mut cmd = Command::new(helper_path);
        cmd.args(args);
        for (k, v) in env_vars {
            cmd.env(k, v);
        }
        let child = cmd.spawn().map_err(|e| {
            Error::InternalError(format!("failed to launch helper {helper_path}: {e}"))
        })?;
        Ok(Self { child: Some(child) })
    }

    /// Blocks the calling thread on `receiver` until it yields a token,
    /// the sender is dropped, or `timeout` elapses. On timeout or a
    /// dropped sender, the child is terminated and `PrivateApiUnavailable`
    /// is returned — the fallback never produces frames itself, it only
    /// supplies the display token.
    pub fn await_token(&mut self, receiver: &mpsc::Receiver<HelperToken>, timeout: Duration) -> Result<HelperToken> {
        match receiver.recv_timeout(timeout) {
            Ok(token) => Ok(token),
            Err(_) => {
                self.kill();
                Err(Error::PrivateApiUnavailable(capd_resolver::Error::PrivateApiUnavailable {
                    operation: "helper_launcher.await_token",
                    platform: 0,
                }))
            }
        }
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for HelperLauncher {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn await_token_times_out_without_a_sender() {
        let mut launcher = HelperLauncher { child: None };
        let (_tx, rx) = mpsc::channel::<HelperToken>();
        let result = launcher.await_token(&rx, Duration::from_millis(10));
        assert!(result.is_err());
    }

    #[test]
    fn await_token_returns_sent_value() {
        let mut launcher = HelperLauncher { child: None };
        let (tx, rx) = mpsc::channel();
        tx.send(HelperToken { token_ref: 42, width: 1080, height: 2400 }).unwrap();
        let token = launcher.await_token(&rx, Duration::from_millis(50)).unwrap();
        assert_eq!(token.token_ref, 42);
    }
}
