//! Session bootstrap.
//!
//! [`connect`] is the front door: it resolves the headless mode, brings up a
//! virtual display when the host needs one, computes the launch flag set,
//! spawns the browser, connects the protocol transport, and wires a
//! [`BrowserSession`] around the result. Failure anywhere in that chain
//! surfaces as [`Error::Launch`], and everything started so far is torn down
//! before the error returns, so a failed connect never leaves a process or
//! display behind.
//!
//! [`bootstrap_session`] is the lower half: it takes an already-connected
//! transport plus whatever host resources the caller owns, and does the
//! bridge, attach and watcher wiring. Sessions over a browser launched
//! elsewhere enter here with no process or display handle.

use std::sync::Arc;

use cdp_bridge::{
    default_executable, launch, BridgeError, BridgeErrorKind, BridgeEvent, BrowserBridge,
    CdpTransport, ChromiumTransport, LaunchSpec,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConnectOptions;
use crate::controller::{attach, PageHandle, SessionState};
use crate::display::{VirtualDisplay, DEFAULT_SCREEN};
use crate::errors::{Error, Result};
use crate::flags::{compute_launch_flags, HeadlessMode};
use crate::supervisor::{DisplayHandle, ProcessHandle, ResourceSupervisor};

/// A live session plus its initial page, ready for navigation.
pub struct Connected {
    pub session: BrowserSession,
    pub page: PageHandle,
}

/// Launches a local browser and builds a full session around it.
pub async fn connect(options: ConnectOptions) -> Result<Connected> {
    let mode = HeadlessMode::resolve(options.headless);
    let display = maybe_start_display(&options, mode).await;
    let flags = compute_launch_flags(&options, mode);

    let executable = match options.executable.clone().or_else(default_executable) {
        Some(path) => path,
        None => {
            stop_display(&display).await;
            return Err(Error::launch(
                BridgeError::new(BridgeErrorKind::Launch).with_hint(
                    "no browser executable found; set VEIL_EXECUTABLE or install chromium",
                ),
            ));
        }
    };

    let mut envs = Vec::new();
    if let Some(display) = &display {
        envs.push(("DISPLAY".to_string(), display.display_env()));
    }

    let browser = match launch(LaunchSpec {
        executable,
        flags: flags.clone(),
        envs,
    })
    .await
    {
        Ok(browser) => Arc::new(browser),
        Err(error) => {
            // launch() has already killed any half-started child.
            stop_display(&display).await;
            return Err(Error::launch(error));
        }
    };

    let transport = match ChromiumTransport::connect(browser.ws_url()).await {
        Ok(transport) => Arc::new(transport) as Arc<dyn CdpTransport>,
        Err(error) => {
            if let Err(kill_error) = browser.kill().await {
                warn!(%kill_error, "failed to kill browser after connect failure");
            }
            stop_display(&display).await;
            return Err(Error::launch(error));
        }
    };

    let display = display.map(|display| display as Arc<dyn DisplayHandle>);
    let process = Some(Arc::clone(&browser) as Arc<dyn ProcessHandle>);
    bootstrap_session(transport, options, flags, display, process).await
}

/// Builds a session over an already-connected transport.
///
/// `display` and `process` are the host resources the session is to own;
/// they end up in the supervisor and are released on close or disconnect.
/// Pass `None` for a browser this process did not launch.
pub async fn bootstrap_session(
    transport: Arc<dyn CdpTransport>,
    options: ConnectOptions,
    launch_flags: Vec<String>,
    display: Option<Arc<dyn DisplayHandle>>,
    process: Option<Arc<dyn ProcessHandle>>,
) -> Result<Connected> {
    // The supervisor exists before anything is wired so every failure path
    // below can fall back to the same teardown.
    let supervisor = Arc::new(ResourceSupervisor::new(display, process));

    let bridge = Arc::new(BrowserBridge::with_transport(transport));
    if let Err(error) = bridge.start().await {
        supervisor.teardown().await;
        return Err(Error::launch(error));
    }

    let state = SessionState::new(&options, Arc::clone(&supervisor));

    // Subscribed before the initial attach so targets created while it runs
    // are queued for the watcher instead of lost.
    let events = bridge.subscribe();

    let initial = match bridge.initial_page().await {
        Ok(driver) => driver,
        Err(error) => {
            bridge.shutdown().await;
            supervisor.teardown().await;
            return Err(Error::launch(error));
        }
    };

    let page = attach(&bridge, initial, &state, true).await;

    let pages = Arc::new(DashMap::new());
    pages.insert(page.target_id().to_string(), page.clone());
    let page_added = Arc::new(Notify::new());

    let watcher = spawn_target_watcher(&bridge, &state, &pages, &page_added, events);

    let session = BrowserSession {
        id: Uuid::new_v4(),
        bridge,
        state,
        launch_flags,
        pages,
        page_added,
        watcher: Mutex::new(Some(watcher)),
    };
    info!(session = %session.id, "browser session ready");

    Ok(Connected { session, page })
}

/// One connected browser: its pages, its watchers, and the host resources
/// it owns.
///
/// Dropping a session does not tear the browser down; call
/// [`close`](BrowserSession::close), or rely on the disconnect watcher when
/// the browser dies on its own.
pub struct BrowserSession {
    id: Uuid,
    bridge: Arc<BrowserBridge>,
    state: Arc<SessionState>,
    launch_flags: Vec<String>,
    pages: Arc<DashMap<String, PageHandle>>,
    page_added: Arc<Notify>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl BrowserSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn bridge(&self) -> &Arc<BrowserBridge> {
        &self.bridge
    }

    /// The flag list the browser was started with.
    pub fn launch_flags(&self) -> &[String] {
        &self.launch_flags
    }

    /// The attached page for a target, if the session knows it.
    pub fn page(&self, target_id: &str) -> Option<PageHandle> {
        self.pages.get(target_id).map(|entry| entry.value().clone())
    }

    /// Snapshot of every attached page.
    pub fn pages(&self) -> Vec<PageHandle> {
        self.pages.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Opens a new page and waits for the watcher to adopt and attach it.
    ///
    /// No internal deadline; callers wanting one wrap this in a timeout.
    pub async fn new_page(&self, url: &str) -> Result<PageHandle> {
        let target_id = self.bridge.create_target(url).await?;
        loop {
            let notified = self.page_added.notified();
            if let Some(handle) = self.pages.get(&target_id) {
                return Ok(handle.value().clone());
            }
            notified.await;
        }
    }

    /// Shuts the session down: stops the watchers and pollers, closes the
    /// browser connection, and releases the process and display. Safe to
    /// call more than once; resource teardown runs at most once.
    pub async fn close(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        self.state.stop_challenges();
        self.state.abort_tasks();
        self.bridge.shutdown().await;
        self.state.supervisor().teardown().await;
        info!(session = %self.id, "browser session closed");
    }
}

/// Adopts and attaches every page target the browser creates from here on,
/// and prunes the registry when targets go away.
fn spawn_target_watcher(
    bridge: &Arc<BrowserBridge>,
    state: &Arc<SessionState>,
    pages: &Arc<DashMap<String, PageHandle>>,
    page_added: &Arc<Notify>,
    mut events: broadcast::Receiver<BridgeEvent>,
) -> JoinHandle<()> {
    let bridge = Arc::clone(bridge);
    let state = Arc::clone(state);
    let pages = Arc::clone(pages);
    let page_added = Arc::clone(page_added);
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(BridgeEvent::TargetCreated(descriptor)) => {
                    if descriptor.kind != "page" {
                        continue;
                    }
                    // Discovery replays pre-existing targets as created
                    // events; the initial page is attached before this
                    // watcher starts and must not be attached twice.
                    if pages.contains_key(&descriptor.target_id) {
                        continue;
                    }
                    let driver = match bridge.adopt_target(&descriptor.target_id).await {
                        Ok(driver) => driver,
                        Err(error) => {
                            // Popup triage may have closed it already.
                            debug!(
                                target_id = %descriptor.target_id,
                                %error,
                                "new target gone before adoption"
                            );
                            continue;
                        }
                    };
                    let handle = attach(&bridge, driver, &state, false).await;
                    pages.insert(descriptor.target_id.clone(), handle);
                    page_added.notify_waiters();
                    debug!(target_id = %descriptor.target_id, "new page adopted");
                }
                Ok(BridgeEvent::TargetDestroyed { target_id }) => {
                    pages.remove(&target_id);
                }
                Ok(BridgeEvent::Disconnected) => break,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "target watcher lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Starts Xvfb when the session will be headful on a display-less Linux
/// host. Display trouble degrades to a warning; the browser launch is the
/// step that decides whether the host can actually run headful.
async fn maybe_start_display(
    options: &ConnectOptions,
    mode: HeadlessMode,
) -> Option<Arc<VirtualDisplay>> {
    if !cfg!(target_os = "linux")
        || mode.is_headless()
        || options.disable_virtual_display
        || std::env::var_os("DISPLAY").is_some()
    {
        return None;
    }

    match VirtualDisplay::start(DEFAULT_SCREEN).await {
        Ok(display) => {
            info!(display = %display.display_env(), "virtual display started");
            Some(Arc::new(display))
        }
        Err(error) => {
            warn!(%error, "virtual display unavailable, continuing without one");
            None
        }
    }
}

async fn stop_display(display: &Option<Arc<VirtualDisplay>>) {
    if let Some(display) = display {
        if let Err(error) = display.shut_down().await {
            warn!(%error, "virtual display did not stop cleanly");
        }
    }
}
