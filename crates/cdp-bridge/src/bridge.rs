//! Browser-level target tracking and event fan-out.
//!
//! One `BrowserBridge` per browser process. It enables target discovery,
//! keeps a registry of page targets, answers proxy auth challenges for
//! sessions that registered credentials, and broadcasts lifecycle events.
//! When the transport's event stream ends the bridge marks every page
//! closed and emits a single `Disconnected`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BridgeError, BridgeErrorKind};
use crate::page::{AuthCredentials, PageDriver, PageShared};
use crate::transport::{CdpTransport, CommandTarget, TransportEvent};

const EVENT_BUS_CAPACITY: usize = 512;

/// Snapshot of a tracked page target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub target_id: String,
    pub kind: String,
    pub url: String,
    pub opener_id: Option<String>,
}

/// Lifecycle notifications on the bridge bus.
#[derive(Clone, Debug)]
pub enum BridgeEvent {
    TargetCreated(TargetDescriptor),
    TargetDestroyed { target_id: String },
    Disconnected,
}

struct TargetEntry {
    kind: String,
    url: String,
    opener_id: Option<String>,
    session: Option<String>,
    shared: Arc<PageShared>,
}

impl TargetEntry {
    fn descriptor(&self, target_id: &str) -> TargetDescriptor {
        TargetDescriptor {
            target_id: target_id.to_string(),
            kind: self.kind.clone(),
            url: self.url.clone(),
            opener_id: self.opener_id.clone(),
        }
    }
}

pub struct BrowserBridge {
    transport: Arc<dyn CdpTransport>,
    targets: DashMap<String, TargetEntry>,
    credentials: DashMap<String, AuthCredentials>,
    bus: broadcast::Sender<BridgeEvent>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disconnected: AtomicBool,
}

impl BrowserBridge {
    pub fn with_transport(transport: Arc<dyn CdpTransport>) -> Self {
        let (bus, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            transport,
            targets: DashMap::new(),
            credentials: DashMap::new(),
            bus,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Starts the transport, turns on target discovery, and spawns the
    /// event pump. Calling it again on a started bridge is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<(), BridgeError> {
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.transport.start().await?;
        self.transport
            .send_command(
                CommandTarget::Browser,
                "Target.setDiscoverTargets",
                json!({ "discover": true }),
            )
            .await?;

        let pump = tokio::spawn(Self::event_pump(Arc::clone(self)));
        self.tasks.lock().await.push(pump);
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.bus.subscribe()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// The first page target the browser already has, attached. A browser
    /// that came up without one gets a blank page created for it.
    pub async fn initial_page(self: &Arc<Self>) -> Result<PageDriver, BridgeError> {
        let response = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.getTargets",
                Value::Object(Default::default()),
            )
            .await?;

        let infos: Vec<TargetInfoPayload> = response
            .get("targetInfos")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| {
                BridgeError::new(BridgeErrorKind::Protocol)
                    .with_hint(format!("unreadable getTargets payload: {err}"))
            })?
            .unwrap_or_default();

        let mut first_page = None;
        for info in infos {
            if info.target_type != "page" {
                continue;
            }
            // Pre-existing targets are registered without an event; watchers
            // only care about targets created after they subscribed.
            self.register_target(&info);
            first_page.get_or_insert(info.target_id);
        }

        let target_id = match first_page {
            Some(id) => id,
            None => self.create_target("about:blank").await?,
        };
        self.adopt_target(&target_id).await
    }

    /// Opens a new page target and reports its id. Registration and the
    /// `TargetCreated` announcement ride the browser's own `targetCreated`
    /// event, which Chromium emits whether the event or this response lands
    /// first. Attachment is left to whoever watches the bus, so a page is
    /// adopted exactly once.
    pub async fn create_target(&self, url: &str) -> Result<String, BridgeError> {
        let response = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": url }),
            )
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                BridgeError::new(BridgeErrorKind::Protocol)
                    .with_hint("createTarget response missing targetId")
            })?
            .to_string();
        Ok(target_id)
    }

    /// Attaches to a target with a flattened session and hands back its
    /// driver.
    pub async fn adopt_target(self: &Arc<Self>, target_id: &str) -> Result<PageDriver, BridgeError> {
        let response = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = response
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                BridgeError::new(BridgeErrorKind::Protocol)
                    .with_hint("attachToTarget response missing sessionId")
            })?
            .to_string();

        let shared = {
            let mut entry = self
                .targets
                .entry(target_id.to_string())
                .or_insert_with(|| TargetEntry {
                    kind: "page".to_string(),
                    url: String::new(),
                    opener_id: None,
                    session: None,
                    shared: Arc::new(PageShared::new()),
                });
            entry.session = Some(session_id.clone());
            Arc::clone(&entry.shared)
        };

        debug!(target: "cdp_bridge", target_id, session = %session_id, "target adopted");
        Ok(PageDriver::new(
            Arc::clone(self),
            target_id.to_string(),
            session_id,
            shared,
        ))
    }

    /// Asks the browser to close a target. The registry entry goes away
    /// when the matching `targetDestroyed` arrives.
    pub async fn close_target(&self, target_id: &str) -> Result<(), BridgeError> {
        self.transport
            .send_command(
                CommandTarget::Browser,
                "Target.closeTarget",
                json!({ "targetId": target_id }),
            )
            .await
            .map(|_| ())
    }

    pub fn target_descriptor(&self, target_id: &str) -> Option<TargetDescriptor> {
        self.targets
            .get(target_id)
            .map(|entry| entry.descriptor(target_id))
    }

    pub fn target_url(&self, target_id: &str) -> Option<String> {
        self.targets.get(target_id).map(|entry| entry.url.clone())
    }

    pub(crate) fn transport(&self) -> &Arc<dyn CdpTransport> {
        &self.transport
    }

    pub(crate) fn register_credentials(&self, session_id: &str, credentials: AuthCredentials) {
        self.credentials.insert(session_id.to_string(), credentials);
    }

    /// Stops the pump and releases the transport. Pages are not touched;
    /// process teardown is the supervisor's job.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            let _ = handle.await;
        }
    }

    async fn event_pump(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => match event {
                    Some(event) => {
                        if let Err(err) = self.handle_event(event).await {
                            warn!(target: "cdp_bridge", ?err, "event handler failed");
                        }
                    }
                    None => {
                        self.mark_disconnected();
                        break;
                    }
                }
            }
        }
    }

    fn mark_disconnected(&self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(target: "cdp_bridge", "browser connection lost");
        for entry in self.targets.iter() {
            entry.value().shared.mark_closed();
        }
        let _ = self.bus.send(BridgeEvent::Disconnected);
    }

    async fn handle_event(&self, event: TransportEvent) -> Result<(), BridgeError> {
        match event.method.as_str() {
            "Target.targetCreated" => self.on_target_created(event.params),
            "Target.targetDestroyed" => self.on_target_destroyed(event.params),
            "Target.targetInfoChanged" => self.on_target_info_changed(event.params),
            "Fetch.authRequired" => self.on_auth_required(event).await,
            "Fetch.requestPaused" => self.on_request_paused(event).await,
            _ => Ok(()),
        }
    }

    fn register_target(&self, info: &TargetInfoPayload) -> Arc<PageShared> {
        let entry = self
            .targets
            .entry(info.target_id.clone())
            .or_insert_with(|| TargetEntry {
                kind: info.target_type.clone(),
                url: info.url.clone().unwrap_or_default(),
                opener_id: info.opener_id.clone(),
                session: None,
                shared: Arc::new(PageShared::new()),
            });
        Arc::clone(&entry.shared)
    }

    fn on_target_created(&self, params: Value) -> Result<(), BridgeError> {
        let payload: TargetCreatedParams = serde_json::from_value(params).map_err(|err| {
            BridgeError::new(BridgeErrorKind::Internal).with_hint(err.to_string())
        })?;

        if payload.target_info.target_type != "page" {
            return Ok(());
        }

        let info = payload.target_info;
        if let Some(mut entry) = self.targets.get_mut(&info.target_id) {
            // Already registered, e.g. a pre-existing target replayed by
            // discovery or one adopted before its event arrived. Refresh
            // the fields but do not announce it a second time.
            if let Some(url) = info.url.filter(|u| !u.is_empty()) {
                entry.url = url;
            }
            return Ok(());
        }

        self.register_target(&info);
        let descriptor = TargetDescriptor {
            target_id: info.target_id,
            kind: info.target_type,
            url: info.url.unwrap_or_default(),
            opener_id: info.opener_id,
        };
        debug!(
            target: "cdp_bridge",
            target_id = %descriptor.target_id,
            url = %descriptor.url,
            opener = ?descriptor.opener_id,
            "page target created"
        );
        let _ = self.bus.send(BridgeEvent::TargetCreated(descriptor));
        Ok(())
    }

    fn on_target_destroyed(&self, params: Value) -> Result<(), BridgeError> {
        let payload: TargetDestroyedParams = serde_json::from_value(params).map_err(|err| {
            BridgeError::new(BridgeErrorKind::Internal).with_hint(err.to_string())
        })?;

        if let Some((target_id, entry)) = self.targets.remove(&payload.target_id) {
            entry.shared.mark_closed();
            if let Some(session) = &entry.session {
                self.credentials.remove(session);
            }
            debug!(target: "cdp_bridge", target_id = %target_id, "page target destroyed");
            let _ = self.bus.send(BridgeEvent::TargetDestroyed { target_id });
        }
        Ok(())
    }

    fn on_target_info_changed(&self, params: Value) -> Result<(), BridgeError> {
        let payload: TargetInfoChangedParams = serde_json::from_value(params).map_err(|err| {
            BridgeError::new(BridgeErrorKind::Internal).with_hint(err.to_string())
        })?;

        if payload.target_info.target_type != "page" {
            return Ok(());
        }
        if let Some(mut entry) = self.targets.get_mut(&payload.target_info.target_id) {
            if let Some(url) = payload.target_info.url.filter(|u| !u.is_empty()) {
                entry.url = url;
            }
        }
        Ok(())
    }

    /// Answers a proxy auth challenge with the credentials the session
    /// registered, or lets the browser fall back to its own behavior.
    async fn on_auth_required(&self, event: TransportEvent) -> Result<(), BridgeError> {
        let session_id = match event.session_id {
            Some(id) => id,
            None => return Ok(()),
        };
        let payload: FetchRequestParams =
            serde_json::from_value(event.params).map_err(|err| {
                BridgeError::new(BridgeErrorKind::Internal).with_hint(err.to_string())
            })?;

        let response = match self.credentials.get(&session_id) {
            Some(creds) => json!({
                "response": "ProvideCredentials",
                "username": creds.username,
                "password": creds.password,
            }),
            None => json!({ "response": "Default" }),
        };

        if let Err(err) = self
            .transport
            .send_command(
                CommandTarget::Session(session_id),
                "Fetch.continueWithAuth",
                json!({
                    "requestId": payload.request_id,
                    "authChallengeResponse": response,
                }),
            )
            .await
        {
            warn!(target: "cdp_bridge", ?err, "failed to answer auth challenge");
        }
        Ok(())
    }

    /// With auth interception on, every request pauses; anything that is not
    /// an auth challenge just continues unchanged.
    async fn on_request_paused(&self, event: TransportEvent) -> Result<(), BridgeError> {
        let session_id = match event.session_id {
            Some(id) => id,
            None => return Ok(()),
        };
        let payload: FetchRequestParams =
            serde_json::from_value(event.params).map_err(|err| {
                BridgeError::new(BridgeErrorKind::Internal).with_hint(err.to_string())
            })?;

        if let Err(err) = self
            .transport
            .send_command(
                CommandTarget::Session(session_id),
                "Fetch.continueRequest",
                json!({ "requestId": payload.request_id }),
            )
            .await
        {
            debug!(target: "cdp_bridge", ?err, "failed to continue paused request");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TargetCreatedParams {
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct TargetDestroyedParams {
    #[serde(rename = "targetId")]
    target_id: String,
}

#[derive(Debug, Deserialize)]
struct TargetInfoChangedParams {
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Clone, Debug, Deserialize)]
struct TargetInfoPayload {
    #[serde(rename = "targetId")]
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    url: Option<String>,
    #[serde(rename = "openerId")]
    opener_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FetchRequestParams {
    #[serde(rename = "requestId")]
    request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use tokio::time::{sleep, timeout, Duration};

    fn target_created(target_id: &str, kind: &str, url: &str, opener: Option<&str>) -> TransportEvent {
        TransportEvent {
            method: "Target.targetCreated".into(),
            params: json!({
                "targetInfo": {
                    "targetId": target_id,
                    "type": kind,
                    "url": url,
                    "openerId": opener,
                    "attached": false,
                }
            }),
            session_id: None,
        }
    }

    #[tokio::test]
    async fn start_enables_discovery_once() {
        let (transport, _tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport.clone() as Arc<dyn CdpTransport>
        ));

        bridge.start().await.expect("start");
        bridge.start().await.expect("second start is a no-op");

        assert!(transport.started());
        let methods = transport.methods().await;
        assert_eq!(
            methods
                .iter()
                .filter(|m| m.as_str() == "Target.setDiscoverTargets")
                .count(),
            1
        );
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn page_targets_are_announced_and_registered() {
        let (transport, tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");
        let mut events = bridge.subscribe();

        tx.send(target_created("t-1", "page", "https://example.com/", Some("t-0")))
            .await
            .unwrap();

        let event = timeout(Duration::from_millis(200), events.recv())
            .await
            .expect("event in time")
            .expect("bus open");
        match event {
            BridgeEvent::TargetCreated(descriptor) => {
                assert_eq!(descriptor.target_id, "t-1");
                assert_eq!(descriptor.url, "https://example.com/");
                assert_eq!(descriptor.opener_id.as_deref(), Some("t-0"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(bridge.target_descriptor("t-1").is_some());
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn non_page_targets_are_ignored() {
        let (transport, tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");
        let mut events = bridge.subscribe();

        tx.send(target_created("w-1", "service_worker", "", None))
            .await
            .unwrap();

        let result = timeout(Duration::from_millis(100), events.recv()).await;
        assert!(result.is_err(), "no event expected for non-page target");
        assert!(bridge.target_descriptor("w-1").is_none());
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_creation_is_announced_once() {
        let (transport, tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");
        let mut events = bridge.subscribe();

        tx.send(target_created("t-1", "page", "about:blank", None))
            .await
            .unwrap();
        tx.send(target_created("t-1", "page", "https://example.com/", None))
            .await
            .unwrap();

        let first = timeout(Duration::from_millis(200), events.recv()).await;
        assert!(first.is_ok());
        let second = timeout(Duration::from_millis(100), events.recv()).await;
        assert!(second.is_err(), "duplicate target announced twice");
        // The second event still refreshed the stored url.
        assert_eq!(
            bridge.target_url("t-1").as_deref(),
            Some("https://example.com/")
        );
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn created_targets_are_announced_by_their_event() {
        let (transport, tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport.clone() as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");
        let mut events = bridge.subscribe();

        transport.set_response(json!({ "targetId": "t-7" })).await;
        let target_id = bridge.create_target("https://example.com/").await.expect("create");
        assert_eq!(target_id, "t-7");

        // The browser reports the new target on the event stream as well;
        // that report is what watchers adopt from.
        tx.send(target_created("t-7", "page", "https://example.com/", None))
            .await
            .unwrap();

        let event = timeout(Duration::from_millis(200), events.recv())
            .await
            .expect("event in time")
            .expect("bus open");
        match event {
            BridgeEvent::TargetCreated(descriptor) => {
                assert_eq!(descriptor.target_id, "t-7");
            }
            other => panic!("unexpected event {other:?}"),
        }
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn destroyed_targets_close_their_pages() {
        let (transport, tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport.clone() as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");
        transport.set_response(json!({ "sessionId": "sess-1" })).await;
        let mut events = bridge.subscribe();

        tx.send(target_created("t-1", "page", "about:blank", None))
            .await
            .unwrap();
        let _ = timeout(Duration::from_millis(200), events.recv()).await;

        let page = bridge.adopt_target("t-1").await.expect("adopt");
        assert!(!page.is_closed());

        tx.send(TransportEvent {
            method: "Target.targetDestroyed".into(),
            params: json!({ "targetId": "t-1" }),
            session_id: None,
        })
        .await
        .unwrap();

        let event = timeout(Duration::from_millis(200), events.recv())
            .await
            .expect("event in time")
            .expect("bus open");
        assert!(matches!(event, BridgeEvent::TargetDestroyed { ref target_id } if target_id == "t-1"));
        assert!(page.is_closed());
        assert!(bridge.target_descriptor("t-1").is_none());
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn stream_end_disconnects_once_and_closes_everything() {
        let (transport, tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport.clone() as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");
        transport.set_response(json!({ "sessionId": "sess-1" })).await;
        let mut events = bridge.subscribe();

        tx.send(target_created("t-1", "page", "about:blank", None))
            .await
            .unwrap();
        let _ = timeout(Duration::from_millis(200), events.recv()).await;
        let page = bridge.adopt_target("t-1").await.expect("adopt");

        drop(tx);

        let event = timeout(Duration::from_millis(200), events.recv())
            .await
            .expect("event in time")
            .expect("bus open");
        assert!(matches!(event, BridgeEvent::Disconnected));
        assert!(bridge.is_disconnected());
        assert!(page.is_closed());

        let extra = timeout(Duration::from_millis(100), events.recv()).await;
        assert!(
            !matches!(extra, Ok(Ok(BridgeEvent::Disconnected))),
            "disconnect announced twice"
        );
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn adopted_commands_ride_the_flat_session() {
        let (transport, tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport.clone() as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");
        transport.set_response(json!({ "sessionId": "sess-9" })).await;
        let mut events = bridge.subscribe();

        tx.send(target_created("t-9", "page", "about:blank", None))
            .await
            .unwrap();
        let _ = timeout(Duration::from_millis(200), events.recv()).await;

        let page = bridge.adopt_target("t-9").await.expect("adopt");
        page.navigate("https://example.com/").await.expect("navigate");

        let commands = transport.commands().await;
        let attach = commands
            .iter()
            .find(|(_, method, _)| method == "Target.attachToTarget")
            .expect("attach recorded");
        assert_eq!(attach.2["flatten"], json!(true));

        let navigate = commands
            .iter()
            .find(|(_, method, _)| method == "Page.navigate")
            .expect("navigate recorded");
        match &navigate.0 {
            CommandTarget::Session(session) => assert_eq!(session, "sess-9"),
            other => panic!("navigate addressed to {other:?}"),
        }
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn auth_challenges_use_registered_credentials() {
        let (transport, tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport.clone() as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");
        bridge.register_credentials(
            "sess-1",
            AuthCredentials {
                username: "proxy-user".into(),
                password: "proxy-pass".into(),
            },
        );

        tx.send(TransportEvent {
            method: "Fetch.authRequired".into(),
            params: json!({ "requestId": "req-7" }),
            session_id: Some("sess-1".into()),
        })
        .await
        .unwrap();
        sleep(Duration::from_millis(50)).await;

        let commands = transport.commands().await;
        let reply = commands
            .iter()
            .find(|(_, method, _)| method == "Fetch.continueWithAuth")
            .expect("auth answer recorded");
        assert_eq!(reply.2["requestId"], json!("req-7"));
        assert_eq!(
            reply.2["authChallengeResponse"]["response"],
            json!("ProvideCredentials")
        );
        assert_eq!(
            reply.2["authChallengeResponse"]["username"],
            json!("proxy-user")
        );
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_sessions_fall_back_to_default_auth() {
        let (transport, tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport.clone() as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");

        tx.send(TransportEvent {
            method: "Fetch.authRequired".into(),
            params: json!({ "requestId": "req-1" }),
            session_id: Some("sess-unknown".into()),
        })
        .await
        .unwrap();
        sleep(Duration::from_millis(50)).await;

        let commands = transport.commands().await;
        let reply = commands
            .iter()
            .find(|(_, method, _)| method == "Fetch.continueWithAuth")
            .expect("auth answer recorded");
        assert_eq!(reply.2["authChallengeResponse"]["response"], json!("Default"));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn paused_requests_are_continued() {
        let (transport, tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport.clone() as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");

        tx.send(TransportEvent {
            method: "Fetch.requestPaused".into(),
            params: json!({ "requestId": "req-2" }),
            session_id: Some("sess-1".into()),
        })
        .await
        .unwrap();
        sleep(Duration::from_millis(50)).await;

        let commands = transport.commands().await;
        let cont = commands
            .iter()
            .find(|(_, method, _)| method == "Fetch.continueRequest")
            .expect("continue recorded");
        assert_eq!(cont.2["requestId"], json!("req-2"));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn initial_page_prefers_existing_page_target() {
        let (transport, _tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport.clone() as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");
        transport
            .set_response(json!({
                "targetInfos": [
                    { "targetId": "w-1", "type": "service_worker", "url": "" },
                    { "targetId": "t-1", "type": "page", "url": "about:blank" },
                ]
            }))
            .await;
        transport.set_response(json!({ "sessionId": "sess-1" })).await;

        let page = bridge.initial_page().await.expect("initial page");
        assert_eq!(page.target_id(), "t-1");

        let methods = transport.methods().await;
        assert!(!methods.contains(&"Target.createTarget".to_string()));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn initial_page_creates_one_when_missing() {
        let (transport, _tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport.clone() as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");
        transport.set_response(json!({ "targetInfos": [] })).await;
        transport.set_response(json!({ "targetId": "t-new" })).await;
        transport.set_response(json!({ "sessionId": "sess-1" })).await;

        let page = bridge.initial_page().await.expect("initial page");
        assert_eq!(page.target_id(), "t-new");
        let methods = transport.methods().await;
        assert!(methods.contains(&"Target.createTarget".to_string()));
        bridge.shutdown().await;
    }
}
