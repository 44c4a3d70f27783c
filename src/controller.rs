//! Page attachment.
//!
//! [`attach`] is the one choreography every page goes through before a
//! caller sees it, whether it is the initial page adopted at connect time or
//! a target the browser created later. The order is load-bearing: the
//! dialog spoof has to be registered through the raw instrumentation channel
//! before the Page domain comes up, ahead of the per-navigation bundle, or a
//! page script could observe the unpatched globals.
//!
//! The two browser-level watchers (disconnect, popup triage) are installed
//! by the first attach and guarded so later attaches never duplicate them.
//! Patch or hook failures are logged and skipped past; attach always hands
//! back a usable handle, because a partially patched page is still worth
//! more than no page and the persistent patches re-apply on navigation.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cdp_bridge::{AuthCredentials, BridgeError, BridgeEvent, BrowserBridge, PageDriver};
use dashmap::DashMap;
use parking_lot::Mutex;
use stealth_patch::{bootstrap_patch, navigation_patches, popup_url_is_suspect};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ConnectOptions;
use crate::cursor::{Cursor, MouseTempo};
use crate::plugin::PagePlugin;
use crate::poller::{ChallengePoller, ChallengeResolver, TurnstileResolver};
use crate::supervisor::ResourceSupervisor;

/// State shared by every attach within one browser session.
pub(crate) struct SessionState {
    challenge_solving: bool,
    challenge_poll_interval: Duration,
    resolver: Arc<dyn ChallengeResolver>,
    plugins: Vec<Arc<dyn PagePlugin>>,
    proxy_credentials: Option<AuthCredentials>,
    supervisor: Arc<ResourceSupervisor>,
    popup_watcher_installed: AtomicBool,
    disconnect_watcher_installed: AtomicBool,
    challenge_flags: DashMap<String, Arc<AtomicBool>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionState {
    pub(crate) fn new(options: &ConnectOptions, supervisor: Arc<ResourceSupervisor>) -> Arc<Self> {
        let resolver = options
            .challenge_resolver
            .clone()
            .unwrap_or_else(|| Arc::new(TurnstileResolver) as Arc<dyn ChallengeResolver>);
        Arc::new(Self {
            challenge_solving: options.challenge_solving,
            challenge_poll_interval: options.challenge_poll_interval,
            resolver,
            plugins: options.plugins.clone(),
            proxy_credentials: options.proxy.as_ref().and_then(|proxy| proxy.credentials()),
            supervisor,
            popup_watcher_installed: AtomicBool::new(false),
            disconnect_watcher_installed: AtomicBool::new(false),
            challenge_flags: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn supervisor(&self) -> &Arc<ResourceSupervisor> {
        &self.supervisor
    }

    /// Clears every page's challenge flag. Pollers notice on their next tick.
    pub(crate) fn stop_challenges(&self) {
        for entry in self.challenge_flags.iter() {
            entry.value().store(false, Ordering::SeqCst);
        }
    }

    /// Aborts every background task spawned under this session.
    pub(crate) fn abort_tasks(&self) {
        let handles = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            handle.abort();
        }
    }

    fn push_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }
}

/// A fully attached page: the driver plus session-side affordances.
///
/// Derefs to [`PageDriver`], so navigation, evaluation, screenshots and
/// cookie access read the same as on the bare driver.
#[derive(Clone)]
pub struct PageHandle {
    driver: Arc<PageDriver>,
    challenge_active: Arc<AtomicBool>,
    cursor: Arc<Cursor>,
}

impl PageHandle {
    pub fn driver(&self) -> &Arc<PageDriver> {
        &self.driver
    }

    /// Whether this page's challenge poller is still meant to run.
    pub fn challenge_solving_active(&self) -> bool {
        self.challenge_active.load(Ordering::SeqCst)
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Glides the pointer to `(x, y)` along a human-shaped track.
    pub async fn move_mouse(&self, x: f64, y: f64) -> Result<(), BridgeError> {
        self.cursor.move_to(&self.driver, x, y).await
    }

    /// Moves to `(x, y)` and left-clicks with a human-length hold.
    pub async fn click(&self, x: f64, y: f64) -> Result<(), BridgeError> {
        self.cursor.click(&self.driver, x, y).await
    }
}

impl Deref for PageHandle {
    type Target = PageDriver;

    fn deref(&self) -> &Self::Target {
        &self.driver
    }
}

impl fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageHandle")
            .field("target_id", &self.driver.target_id())
            .field("challenge_active", &self.challenge_solving_active())
            .finish()
    }
}

/// Runs the full attach sequence on a freshly adopted page.
///
/// `owns_process` marks the attach performed for the initial page of a
/// locally launched browser; only that attach arms the disconnect watcher
/// with resource teardown.
pub(crate) async fn attach(
    bridge: &Arc<BrowserBridge>,
    driver: PageDriver,
    state: &Arc<SessionState>,
    owns_process: bool,
) -> PageHandle {
    let driver = Arc::new(driver);
    let target_id = driver.target_id().to_string();

    // The flag and its close listener come first so a page that dies while
    // the rest of the sequence is still running already stops its poller.
    let challenge_active = Arc::new(AtomicBool::new(state.challenge_solving));
    state
        .challenge_flags
        .insert(target_id.clone(), Arc::clone(&challenge_active));
    {
        let driver = Arc::clone(&driver);
        let flag = Arc::clone(&challenge_active);
        let listener_state = Arc::clone(state);
        let page_id = target_id.clone();
        state.push_task(tokio::spawn(async move {
            driver.closed().await;
            flag.store(false, Ordering::SeqCst);
            listener_state.challenge_flags.remove(&page_id);
            debug!(target_id = %page_id, "page closed, challenge solving stopped");
        }));
    }

    install_disconnect_watcher(bridge, state, owns_process);

    if state.challenge_solving {
        let poller = ChallengePoller::spawn(
            Arc::clone(&driver),
            Arc::clone(&state.resolver),
            Arc::clone(&challenge_active),
            state.challenge_poll_interval,
        );
        state.push_task(poller);
    }

    if let Some(credentials) = &state.proxy_credentials {
        if let Err(error) = driver.authenticate(credentials.clone()).await {
            warn!(target_id = %target_id, %error, "proxy authentication failed");
        }
    }

    for plugin in &state.plugins {
        if let Err(error) = plugin.on_page_created(&driver).await {
            warn!(
                target_id = %target_id,
                plugin = plugin.name(),
                %error,
                "page plugin failed"
            );
        }
    }

    install_popup_watcher(bridge, state);

    let bootstrap = bootstrap_patch();
    if let Err(error) = driver.install_bootstrap_script(bootstrap.source).await {
        warn!(
            target_id = %target_id,
            patch = bootstrap.kind.as_str(),
            %error,
            "bootstrap patch failed"
        );
    }

    for patch in navigation_patches() {
        if let Err(error) = driver.install_on_new_document(patch.source).await {
            warn!(
                target_id = %target_id,
                patch = patch.kind.as_str(),
                %error,
                "navigation patch failed"
            );
        }
    }

    // Scripts registered for future navigations skip the document that is
    // already loaded, so the dialog spoof is applied to it directly. Blank
    // and internal pages may refuse the evaluation; the next navigation
    // picks the patch up regardless.
    if let Err(error) = driver.evaluate(bootstrap.source).await {
        debug!(target_id = %target_id, %error, "current-document dialog patch skipped");
    }

    let cursor = Arc::new(Cursor::new(MouseTempo::default()));

    debug!(target_id = %target_id, owns_process, "page attached");

    PageHandle {
        driver,
        challenge_active,
        cursor,
    }
}

/// Arms the session-wide disconnect watcher. Only the first call per session
/// does anything; `owns_process` is captured from that call.
fn install_disconnect_watcher(
    bridge: &Arc<BrowserBridge>,
    state: &Arc<SessionState>,
    owns_process: bool,
) {
    if state.disconnect_watcher_installed.swap(true, Ordering::SeqCst) {
        return;
    }

    let mut events = bridge.subscribe();
    let watcher_state = Arc::clone(state);
    let handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(BridgeEvent::Disconnected) => {
                    debug!("browser disconnected, stopping pollers");
                    watcher_state.stop_challenges();
                    if owns_process {
                        watcher_state.supervisor.teardown().await;
                    }
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "disconnect watcher lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    state.push_task(handle);
}

/// Arms the session-wide popup triage. A created page with an opener is
/// machine-opened; if its URL also looks like advertising it is closed on
/// the spot. Close failures are swallowed, the target usually lost the race
/// and is already gone.
fn install_popup_watcher(bridge: &Arc<BrowserBridge>, state: &Arc<SessionState>) {
    if state.popup_watcher_installed.swap(true, Ordering::SeqCst) {
        return;
    }

    let mut events = bridge.subscribe();
    let watcher_bridge = Arc::clone(bridge);
    let handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(BridgeEvent::TargetCreated(descriptor)) => {
                    if descriptor.kind != "page" || descriptor.opener_id.is_none() {
                        continue;
                    }
                    if !popup_url_is_suspect(&descriptor.url) {
                        continue;
                    }
                    debug!(
                        target_id = %descriptor.target_id,
                        url = %descriptor.url,
                        "closing machine-opened popup"
                    );
                    if let Err(error) = watcher_bridge.close_target(&descriptor.target_id).await {
                        debug!(
                            target_id = %descriptor.target_id,
                            %error,
                            "popup close failed"
                        );
                    }
                }
                Ok(BridgeEvent::Disconnected) => break,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "popup watcher lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    state.push_task(handle);
}
