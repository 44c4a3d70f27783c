//! Teardown of everything a session spawned on the host.
//!
//! A [`ResourceSupervisor`] owns at most one virtual display and one browser
//! process. Its [`teardown`](ResourceSupervisor::teardown) runs each cleanup
//! action independently so a stuck display server cannot leave a browser
//! process behind, and an already-dead browser cannot keep a display alive.
//! The whole sequence is guarded by a latch and runs at most once per
//! supervisor no matter how many callers race into it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cdp_bridge::{BridgeError, LaunchedBrowser};
use tracing::{debug, warn};

use crate::display::DisplayError;

/// A virtual display that can be shut down.
#[async_trait]
pub trait DisplayHandle: Send + Sync {
    async fn stop(&self) -> Result<(), DisplayError>;
}

/// A browser process that can be killed.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// OS pid, if the process was spawned locally and is still known.
    fn pid(&self) -> Option<u32>;

    async fn kill(&self) -> Result<(), BridgeError>;
}

#[async_trait]
impl ProcessHandle for LaunchedBrowser {
    fn pid(&self) -> Option<u32> {
        LaunchedBrowser::pid(self)
    }

    async fn kill(&self) -> Result<(), BridgeError> {
        LaunchedBrowser::kill(self).await
    }
}

/// Cleans up host resources exactly once.
pub struct ResourceSupervisor {
    display: Option<Arc<dyn DisplayHandle>>,
    process: Option<Arc<dyn ProcessHandle>>,
    fired: AtomicBool,
}

impl ResourceSupervisor {
    pub fn new(
        display: Option<Arc<dyn DisplayHandle>>,
        process: Option<Arc<dyn ProcessHandle>>,
    ) -> Self {
        Self {
            display,
            process,
            fired: AtomicBool::new(false),
        }
    }

    /// Whether teardown has already run.
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Releases the display and the browser process.
    ///
    /// Only the first call does anything. Failures are logged, never
    /// returned: by the time teardown runs there is nobody left who could
    /// act on an error.
    pub async fn teardown(&self) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(display) = &self.display {
            if let Err(error) = display.stop().await {
                warn!(%error, "virtual display did not stop cleanly");
            }
        }

        if let Some(process) = &self.process {
            // Capture before kill(); the handle forgets the pid once reaped.
            let pid = process.pid();
            if let Err(error) = process.kill().await {
                warn!(%error, "browser process did not exit cleanly");
            }
            if let Some(pid) = pid {
                signal_pid(pid);
            }
        }
    }
}

/// Last-resort SIGKILL for a browser that survived the graceful kill.
#[cfg(unix)]
fn signal_pid(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pid, "sent SIGKILL to browser process"),
        Err(nix::errno::Errno::ESRCH) => debug!(pid, "browser process already gone"),
        Err(error) => warn!(pid, %error, "failed to signal browser process"),
    }
}

#[cfg(not(unix))]
fn signal_pid(_pid: u32) {}
