//! Browser process launch and DevTools endpoint discovery.
//!
//! Flag policy lives upstream; this module takes a finished flag list,
//! spawns the process, and waits for the stderr line that announces the
//! DevTools websocket. The launched process stays owned here so the
//! supervisor has a single handle to kill.

use std::env;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use which::which;

use crate::error::{BridgeError, BridgeErrorKind};

const WS_URL_WAIT: Duration = Duration::from_secs(20);

/// Everything needed to spawn one browser process.
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    pub executable: PathBuf,
    pub flags: Vec<String>,
    pub envs: Vec<(String, String)>,
}

/// A spawned browser plus the endpoint it exposed. Dropping this kills the
/// process (the child is spawned with `kill_on_drop`); the throwaway profile
/// directory, when one was created here, is removed with it.
pub struct LaunchedBrowser {
    child: Mutex<Option<Child>>,
    pid: Option<u32>,
    ws_url: String,
    port: u16,
    _profile_dir: Option<TempDir>,
}

impl LaunchedBrowser {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Kills the browser process. Safe to call more than once; later calls
    /// find the child already taken.
    pub async fn kill(&self) -> Result<(), BridgeError> {
        let child = self.child.lock().await.take();
        match child {
            Some(mut child) => child
                .kill()
                .await
                .map_err(|err| BridgeError::new(BridgeErrorKind::Io).with_hint(err.to_string())),
            None => Ok(()),
        }
    }
}

/// Spawns the browser and waits for its DevTools websocket announcement.
/// On any failure past the spawn the child is killed before the error
/// returns, so a half-started browser never outlives this call.
pub async fn launch(spec: LaunchSpec) -> Result<LaunchedBrowser, BridgeError> {
    let mut flags = spec.flags;
    if !flags.iter().any(|f| f.starts_with("--remote-debugging-port")) {
        flags.push("--remote-debugging-port=0".to_string());
    }

    let mut profile_dir = None;
    if !flags.iter().any(|f| f.starts_with("--user-data-dir")) {
        let dir = TempDir::with_prefix("veilbrowser-profile-").map_err(|err| {
            BridgeError::new(BridgeErrorKind::Launch)
                .with_hint(format!("failed to create profile dir: {err}"))
        })?;
        flags.push(format!("--user-data-dir={}", dir.path().display()));
        profile_dir = Some(dir);
    }

    debug!(
        target: "cdp_bridge",
        executable = %spec.executable.display(),
        flag_count = flags.len(),
        "spawning browser"
    );

    let mut command = Command::new(&spec.executable);
    command
        .args(&flags)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &spec.envs {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(|err| {
        BridgeError::new(BridgeErrorKind::Launch).with_hint(format!(
            "failed to spawn {}: {err}",
            spec.executable.display()
        ))
    })?;
    let pid = child.id();

    let ws_url = match extract_ws_url(&mut child).await {
        Ok(url) => url,
        Err(err) => {
            if let Err(kill_err) = child.kill().await {
                warn!(target: "cdp_bridge", ?kill_err, "failed to kill browser after bad start");
            }
            return Err(err);
        }
    };

    let port = ws_port(&ws_url)?;
    info!(target: "cdp_bridge", pid, port, "browser exposed devtools endpoint");

    Ok(LaunchedBrowser {
        child: Mutex::new(Some(child)),
        pid,
        ws_url,
        port,
        _profile_dir: profile_dir,
    })
}

/// Reads browser stderr until the DevTools websocket line shows up.
async fn extract_ws_url(child: &mut Child) -> Result<String, BridgeError> {
    let stderr = child.stderr.take().ok_or_else(|| {
        BridgeError::new(BridgeErrorKind::Launch).with_hint("browser process missing stderr handle")
    })?;
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = Vec::new();

    let reader = async {
        while let Ok(Some(line)) = lines.next_line().await {
            captured.push(line.clone());
            if let Some(ws) = parse_devtools_line(&line) {
                return Ok(ws);
            }
        }
        Err(
            BridgeError::new(BridgeErrorKind::Launch).with_hint(format!(
                "browser exited before exposing devtools websocket url. stderr preview: {}",
                captured
                    .iter()
                    .take(8)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" | ")
            )),
        )
    };

    timeout(WS_URL_WAIT, reader).await.map_err(|_| {
        BridgeError::new(BridgeErrorKind::Launch)
            .with_hint("timed out waiting for devtools websocket url")
    })?
}

fn parse_devtools_line(line: &str) -> Option<String> {
    let (_, ws) = line.rsplit_once("listening on ")?;
    let ws = ws.trim();
    if ws.starts_with("ws") && ws.contains("devtools/browser") {
        Some(ws.to_string())
    } else {
        None
    }
}

fn ws_port(ws_url: &str) -> Result<u16, BridgeError> {
    let parsed = url::Url::parse(ws_url).map_err(|err| {
        BridgeError::new(BridgeErrorKind::Launch)
            .with_hint(format!("unparseable devtools url {ws_url}: {err}"))
    })?;
    parsed.port().ok_or_else(|| {
        BridgeError::new(BridgeErrorKind::Launch)
            .with_hint(format!("devtools url {ws_url} carries no port"))
    })
}

/// Finds a browser binary: the `VEIL_EXECUTABLE` override first, then PATH
/// lookups, then well-known install locations. Brave leads the candidate
/// lists; its shields profile draws less attention than stock Chromium.
pub fn default_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("VEIL_EXECUTABLE") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    for candidate in os_specific_paths() {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}

fn executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["brave.exe", "chrome.exe", "chromium.exe"]
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
    {
        &[
            "brave-browser",
            "brave",
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_specific_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let root = PathBuf::from(trimmed);
                paths.push(root.join("BraveSoftware/Brave-Browser/Application/brave.exe"));
                paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                paths.push(root.join("Chromium/Application/chrome.exe"));
            }
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Brave Browser.app/Contents/MacOS/Brave Browser"),
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/brave-browser"),
            PathBuf::from("/usr/bin/brave"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}
