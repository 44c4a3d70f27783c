//! Per-page command surface.
//!
//! A `PageDriver` is one attached page session: a thin, typed layer over the
//! session-scoped commands the controller needs. Close state is shared with
//! the bridge registry, so a `targetDestroyed` or a disconnect flips the
//! same flag the driver exposes.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::bridge::BrowserBridge;
use crate::error::{BridgeError, BridgeErrorKind};
use crate::transport::CommandTarget;

/// Proxy credentials a page answers auth challenges with.
#[derive(Clone)]
pub struct AuthCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Cookie shape for `Network.getCookies` / `Network.setCookies`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieParam {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// Close state shared between the bridge registry and every handle to the
/// page.
pub(crate) struct PageShared {
    closed: AtomicBool,
    notify: Notify,
}

impl PageShared {
    pub(crate) fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) async fn closed(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

pub struct PageDriver {
    bridge: Arc<BrowserBridge>,
    target_id: String,
    session_id: String,
    shared: Arc<PageShared>,
    page_domain_ready: AtomicBool,
}

impl PageDriver {
    pub(crate) fn new(
        bridge: Arc<BrowserBridge>,
        target_id: String,
        session_id: String,
        shared: Arc<PageShared>,
    ) -> Self {
        Self {
            bridge,
            target_id,
            session_id,
            shared,
            page_domain_ready: AtomicBool::new(false),
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Last URL the bridge saw for this target.
    pub fn url(&self) -> Option<String> {
        self.bridge.target_url(&self.target_id)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Resolves once the page is gone, whether by `close`, a browser-side
    /// destroy, or a disconnect.
    pub async fn closed(&self) {
        self.shared.closed().await
    }

    async fn command(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::new(BridgeErrorKind::TargetGone)
                .with_hint(format!("page {} is closed", self.target_id)));
        }
        self.bridge
            .transport()
            .send_command(
                CommandTarget::Session(self.session_id.clone()),
                method,
                params,
            )
            .await
    }

    pub async fn navigate(&self, url: &str) -> Result<(), BridgeError> {
        let response = self.command("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = response.get("errorText").and_then(|v| v.as_str()) {
            if !error_text.is_empty() {
                return Err(BridgeError::new(BridgeErrorKind::Protocol)
                    .with_hint(format!("navigation to {url} failed: {error_text}")));
            }
        }
        Ok(())
    }

    /// Evaluates an expression in the page, resolving promises and pulling
    /// the result back by value. An in-page exception becomes an error.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, BridgeError> {
        let response = self
            .command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let description = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|d| d.as_str())
                .or_else(|| details.get("text").and_then(|t| t.as_str()))
                .unwrap_or("unknown exception");
            return Err(BridgeError::new(BridgeErrorKind::Protocol)
                .with_hint(format!("evaluation raised: {description}")));
        }

        Ok(response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Registers a script to run before any page script, through the rawest
    /// channel the session has: the command goes out without waiting for the
    /// Page domain to be enabled, so it lands before ordinary instrumentation.
    pub async fn install_bootstrap_script(&self, source: &str) -> Result<String, BridgeError> {
        let response = self
            .command(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": source }),
            )
            .await?;
        Self::script_identifier(response)
    }

    /// Registers a script for every future navigation through the ordinary
    /// channel, enabling the Page domain first if this driver has not yet.
    pub async fn install_on_new_document(&self, source: &str) -> Result<String, BridgeError> {
        self.ensure_page_domain().await?;
        let response = self
            .command(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": source }),
            )
            .await?;
        Self::script_identifier(response)
    }

    async fn ensure_page_domain(&self) -> Result<(), BridgeError> {
        if self.page_domain_ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.command("Page.enable", Value::Object(Default::default()))
            .await?;
        self.page_domain_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn script_identifier(response: Value) -> Result<String, BridgeError> {
        response
            .get("identifier")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                BridgeError::new(BridgeErrorKind::Protocol)
                    .with_hint("addScriptToEvaluateOnNewDocument returned no identifier")
            })
    }

    /// Turns on request interception with auth handling and registers the
    /// credentials the bridge answers challenges with. Must run before the
    /// first navigation so no request escapes unauthenticated.
    pub async fn authenticate(&self, credentials: AuthCredentials) -> Result<(), BridgeError> {
        self.bridge
            .register_credentials(&self.session_id, credentials);
        self.command("Fetch.enable", json!({ "handleAuthRequests": true }))
            .await
            .map(|_| ())
    }

    pub async fn screenshot(&self) -> Result<Vec<u8>, BridgeError> {
        let response = self
            .command("Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        let data = response
            .get("data")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                BridgeError::new(BridgeErrorKind::Protocol).with_hint("missing screenshot data")
            })?;
        BASE64
            .decode(data)
            .map_err(|err| BridgeError::new(BridgeErrorKind::Protocol).with_hint(err.to_string()))
    }

    pub async fn cookies(&self) -> Result<Vec<CookieParam>, BridgeError> {
        let response = self
            .command("Network.getCookies", Value::Object(Default::default()))
            .await?;
        let cookies = response.get("cookies").cloned().unwrap_or(json!([]));
        serde_json::from_value(cookies).map_err(|err| {
            BridgeError::new(BridgeErrorKind::Protocol)
                .with_hint(format!("unreadable cookie payload: {err}"))
        })
    }

    pub async fn set_cookies(&self, cookies: &[CookieParam]) -> Result<(), BridgeError> {
        if cookies.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_value(cookies).map_err(|err| {
            BridgeError::new(BridgeErrorKind::Internal).with_hint(err.to_string())
        })?;
        self.command("Network.setCookies", json!({ "cookies": payload }))
            .await
            .map(|_| ())
    }

    pub async fn dispatch_mouse_event(&self, payload: Value) -> Result<(), BridgeError> {
        self.command("Input.dispatchMouseEvent", payload)
            .await
            .map(|_| ())
    }

    /// Closes the page target. Idempotent: a page already marked closed
    /// reports success without another round trip.
    pub async fn close(&self) -> Result<(), BridgeError> {
        if self.is_closed() {
            return Ok(());
        }
        self.bridge.close_target(&self.target_id).await?;
        self.shared.mark_closed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use crate::transport::{CdpTransport, TransportEvent};
    use tokio::time::{timeout, Duration};

    struct Fixture {
        transport: Arc<MockTransport>,
        bridge: Arc<BrowserBridge>,
        // Dropping this ends the mock event stream, which the bridge reads
        // as a disconnect; it must outlive the test body.
        _tx: tokio::sync::mpsc::Sender<TransportEvent>,
    }

    async fn adopted_page() -> (Fixture, PageDriver) {
        let (transport, tx) = MockTransport::new_pair();
        let bridge = Arc::new(BrowserBridge::with_transport(
            transport.clone() as Arc<dyn CdpTransport>
        ));
        bridge.start().await.expect("start");
        let mut events = bridge.subscribe();

        tx.send(TransportEvent {
            method: "Target.targetCreated".into(),
            params: json!({
                "targetInfo": {
                    "targetId": "t-1",
                    "type": "page",
                    "url": "about:blank",
                    "attached": false,
                }
            }),
            session_id: None,
        })
        .await
        .unwrap();
        let _ = timeout(Duration::from_millis(200), events.recv()).await;

        transport.set_response(json!({ "sessionId": "sess-1" })).await;
        let page = bridge.adopt_target("t-1").await.expect("adopt");
        (
            Fixture {
                transport,
                bridge,
                _tx: tx,
            },
            page,
        )
    }

    #[tokio::test]
    async fn evaluate_unwraps_result_value() {
        let (fx, page) = adopted_page().await;
        fx.transport
            .set_response(json!({ "result": { "type": "number", "value": 42 } }))
            .await;

        let value = page.evaluate("6 * 7").await.expect("evaluate");
        assert_eq!(value, json!(42));
        fx.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn evaluate_surfaces_page_exceptions() {
        let (fx, page) = adopted_page().await;
        fx.transport
            .set_response(json!({
                "result": { "type": "object" },
                "exceptionDetails": {
                    "text": "Uncaught",
                    "exception": { "description": "ReferenceError: nope is not defined" }
                }
            }))
            .await;

        let err = page.evaluate("nope()").await.expect_err("must fail");
        assert_eq!(err.kind, BridgeErrorKind::Protocol);
        assert!(err.hint.unwrap().contains("ReferenceError"));
        fx.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn bootstrap_install_skips_page_enable() {
        let (fx, page) = adopted_page().await;
        fx.transport.set_response(json!({ "identifier": "s-1" })).await;

        let id = page
            .install_bootstrap_script("(() => {})();")
            .await
            .expect("install");
        assert_eq!(id, "s-1");

        let methods = fx.transport.methods().await;
        assert!(!methods.contains(&"Page.enable".to_string()));
        fx.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn persistent_install_enables_page_domain_once() {
        let (fx, page) = adopted_page().await;
        fx.transport.set_response(Value::Object(Default::default())).await;
        fx.transport.set_response(json!({ "identifier": "s-1" })).await;
        fx.transport.set_response(json!({ "identifier": "s-2" })).await;

        page.install_on_new_document("(() => {})();")
            .await
            .expect("first install");
        page.install_on_new_document("(() => {})();")
            .await
            .expect("second install");

        let methods = fx.transport.methods().await;
        assert_eq!(
            methods
                .iter()
                .filter(|m| m.as_str() == "Page.enable")
                .count(),
            1
        );
        assert_eq!(
            methods
                .iter()
                .filter(|m| m.as_str() == "Page.addScriptToEvaluateOnNewDocument")
                .count(),
            2
        );
        fx.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn navigation_error_text_is_surfaced() {
        let (fx, page) = adopted_page().await;
        fx.transport
            .set_response(json!({ "frameId": "f-1", "errorText": "net::ERR_NAME_NOT_RESOLVED" }))
            .await;

        let err = page
            .navigate("https://nope.invalid/")
            .await
            .expect_err("must fail");
        assert!(err.hint.unwrap().contains("ERR_NAME_NOT_RESOLVED"));
        fx.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn authenticate_enables_interception() {
        let (fx, page) = adopted_page().await;
        fx.transport.set_response(Value::Object(Default::default())).await;

        page.authenticate(AuthCredentials {
            username: "user".into(),
            password: "secret".into(),
        })
        .await
        .expect("authenticate");

        let commands = fx.transport.commands().await;
        let fetch_enable = commands
            .iter()
            .find(|(_, method, _)| method == "Fetch.enable")
            .expect("Fetch.enable sent");
        assert_eq!(fetch_enable.2["handleAuthRequests"], json!(true));
        fx.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn screenshot_decodes_base64() {
        let (fx, page) = adopted_page().await;
        fx.transport
            .set_response(json!({ "data": BASE64.encode([1u8, 2, 3, 4]) }))
            .await;

        let bytes = page.screenshot().await.expect("screenshot");
        assert_eq!(bytes, vec![1, 2, 3, 4]);
        fx.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn cookies_serialize_camel_case() {
        let (fx, page) = adopted_page().await;
        fx.transport.set_response(Value::Object(Default::default())).await;

        page.set_cookies(&[CookieParam {
            name: "sid".into(),
            value: "abc".into(),
            domain: Some("example.com".into()),
            http_only: Some(true),
            same_site: Some("Lax".into()),
            ..Default::default()
        }])
        .await
        .expect("set cookies");

        let commands = fx.transport.commands().await;
        let set = commands
            .iter()
            .find(|(_, method, _)| method == "Network.setCookies")
            .expect("setCookies sent");
        assert_eq!(set.2["cookies"][0]["httpOnly"], json!(true));
        assert_eq!(set.2["cookies"][0]["sameSite"], json!("Lax"));
        assert!(set.2["cookies"][0].get("url").is_none());
        fx.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn commands_after_close_report_target_gone() {
        let (fx, page) = adopted_page().await;
        fx.transport.set_response(Value::Object(Default::default())).await;

        page.close().await.expect("close");
        assert!(page.is_closed());

        let err = page.evaluate("1").await.expect_err("must fail");
        assert_eq!(err.kind, BridgeErrorKind::TargetGone);

        // A second close is a quiet no-op.
        page.close().await.expect("second close");
        let methods = fx.transport.methods().await;
        assert_eq!(
            methods
                .iter()
                .filter(|m| m.as_str() == "Target.closeTarget")
                .count(),
            1
        );
        fx.bridge.shutdown().await;
    }

    #[tokio::test]
    async fn close_notifies_waiters() {
        let (fx, page) = adopted_page().await;
        fx.transport.set_response(Value::Object(Default::default())).await;

        let shared = Arc::new(page);
        let waiter = {
            let page = Arc::clone(&shared);
            tokio::spawn(async move {
                page.closed().await;
            })
        };

        shared.close().await.expect("close");
        timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter woke")
            .expect("waiter task");
        fx.bridge.shutdown().await;
    }
}
