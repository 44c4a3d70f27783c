//! Xvfb-backed virtual display.
//!
//! Headful sessions on display-less Linux hosts get a throwaway X server so
//! the browser has somewhere to render. The display number is probed through
//! the X lock files under `/tmp`, the same files the servers themselves use
//! to claim a display.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::supervisor::DisplayHandle;

/// Geometry handed to Xvfb when the caller does not care.
pub const DEFAULT_SCREEN: &str = "1920x1080x24";

/// First display number probed; xvfb-run starts here too.
const FIRST_DISPLAY: u32 = 99;
const DISPLAY_SPAN: u32 = 512;

const START_POLL: Duration = Duration::from_millis(100);
const START_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("Xvfb binary not found on PATH")]
    MissingBinary,
    #[error("no free X display number in :{FIRST_DISPLAY}..:{last}", last = FIRST_DISPLAY + DISPLAY_SPAN)]
    NoFreeDisplay,
    #[error("failed to spawn Xvfb: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Xvfb exited during startup: {0}")]
    Exited(std::process::ExitStatus),
    #[error("Xvfb did not claim its display in time")]
    StartTimeout,
}

/// One running Xvfb server. Stopping is a single kill; later calls no-op.
pub struct VirtualDisplay {
    number: u32,
    child: Mutex<Option<Child>>,
}

impl VirtualDisplay {
    pub async fn start(screen: &str) -> Result<Self, DisplayError> {
        let binary = which::which("Xvfb").map_err(|_| DisplayError::MissingBinary)?;
        let number = free_display_number(Path::new("/tmp"), FIRST_DISPLAY, DISPLAY_SPAN)
            .ok_or(DisplayError::NoFreeDisplay)?;

        let mut child = Command::new(binary)
            .arg(format!(":{number}"))
            .args(["-screen", "0", screen])
            .args(["-nolisten", "tcp"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        wait_until_claimed(number, &mut child).await?;
        info!(target: "display", display = number, screen, "virtual display started");

        Ok(Self {
            number,
            child: Mutex::new(Some(child)),
        })
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Value for the browser's `DISPLAY` variable.
    pub fn display_env(&self) -> String {
        format!(":{}", self.number)
    }

    pub async fn shut_down(&self) -> Result<(), DisplayError> {
        let child = self.child.lock().await.take();
        match child {
            Some(mut child) => {
                child.kill().await?;
                debug!(target: "display", display = self.number, "virtual display stopped");
                Ok(())
            }
            None => {
                debug!(target: "display", display = self.number, "virtual display already stopped");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DisplayHandle for VirtualDisplay {
    async fn stop(&self) -> Result<(), DisplayError> {
        self.shut_down().await
    }
}

/// The lock file an X server holds for display `:number`.
fn lock_file(dir: &Path, number: u32) -> PathBuf {
    dir.join(format!(".X{number}-lock"))
}

fn free_display_number(dir: &Path, start: u32, span: u32) -> Option<u32> {
    (start..start.saturating_add(span)).find(|n| !lock_file(dir, *n).exists())
}

/// Waits for the server to create its lock file. A vanished child is a
/// startup failure, not a timeout.
async fn wait_until_claimed(number: u32, child: &mut Child) -> Result<(), DisplayError> {
    let deadline = tokio::time::Instant::now() + START_WAIT;
    while tokio::time::Instant::now() < deadline {
        if lock_file(Path::new("/tmp"), number).exists() {
            return Ok(());
        }
        if let Some(status) = child.try_wait()? {
            warn!(target: "display", display = number, %status, "Xvfb exited immediately");
            return Err(DisplayError::Exited(status));
        }
        tokio::time::sleep(START_POLL).await;
    }
    Err(DisplayError::StartTimeout)
}
