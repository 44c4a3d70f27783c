//! Shared fixtures for the integration tests: a scripted protocol
//! transport, counting resource handles, and a counting resolver.

// Each test binary uses a different slice of this module.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_bridge::{
    BridgeError, BridgeErrorKind, CdpTransport, CommandTarget, PageDriver, TransportEvent,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use stealth_patch::ChallengeVerdict;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use veilbrowser::{ChallengeResolver, DisplayError, DisplayHandle, ProcessHandle};

/// One command the bridge sent, as the transport saw it.
#[derive(Clone, Debug)]
pub struct RecordedCommand {
    pub target: CommandTarget,
    pub method: String,
    pub params: Value,
}

enum ScriptedReply {
    Ok(Value),
    Err(String),
}

/// Method-aware mock transport. Every command is recorded; replies come
/// from per-method queues scripted by the test, falling back to canned
/// defaults that keep a whole attach sequence moving. Events are fed
/// through the paired sender; dropping it ends the stream, which the
/// bridge reads as a disconnect.
pub struct ScriptedTransport {
    started: AtomicBool,
    rx: AsyncMutex<mpsc::Receiver<TransportEvent>>,
    commands: Mutex<Vec<RecordedCommand>>,
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    next_target: AtomicUsize,
    next_script: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new_pair() -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (
            Arc::new(Self {
                started: AtomicBool::new(false),
                rx: AsyncMutex::new(rx),
                commands: Mutex::new(Vec::new()),
                replies: Mutex::new(HashMap::new()),
                next_target: AtomicUsize::new(0),
                next_script: AtomicUsize::new(0),
            }),
            tx,
        )
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.commands.lock().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .map(|command| command.method.clone())
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|command| command.method == method)
            .count()
    }

    pub fn commands_for(&self, method: &str) -> Vec<RecordedCommand> {
        self.commands
            .lock()
            .iter()
            .filter(|command| command.method == method)
            .cloned()
            .collect()
    }

    /// Queues one reply for the next `method` call, ahead of the defaults.
    pub fn push_response(&self, method: &str, value: Value) {
        self.replies
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(ScriptedReply::Ok(value));
    }

    /// Makes the next `method` call fail with a protocol error.
    pub fn fail_next(&self, method: &str, hint: &str) {
        self.replies
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(ScriptedReply::Err(hint.to_string()));
    }

    fn default_reply(&self, method: &str, params: &Value) -> Value {
        match method {
            // One blank page, the shape a fresh browser presents.
            "Target.getTargets" => json!({
                "targetInfos": [
                    { "targetId": "page-1", "type": "page", "url": "about:blank" }
                ]
            }),
            "Target.attachToTarget" => {
                let target_id = params
                    .get("targetId")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                json!({ "sessionId": format!("sess-{target_id}") })
            }
            "Target.createTarget" => {
                let n = self.next_target.fetch_add(1, Ordering::SeqCst);
                json!({ "targetId": format!("t-{n}") })
            }
            "Page.addScriptToEvaluateOnNewDocument" => {
                let n = self.next_script.fetch_add(1, Ordering::SeqCst);
                json!({ "identifier": format!("s-{n}") })
            }
            "Page.navigate" => json!({ "frameId": "frame-1" }),
            // Shaped like the challenge probe's no-challenge verdict so the
            // default resolver parses it cleanly.
            "Runtime.evaluate" => json!({
                "result": { "type": "object", "value": { "status": "none" } }
            }),
            "Page.captureScreenshot" => json!({ "data": "" }),
            "Network.getCookies" => json!({ "cookies": [] }),
            _ => Value::Object(Default::default()),
        }
    }
}

#[async_trait]
impl CdpTransport for ScriptedTransport {
    async fn start(&self) -> Result<(), BridgeError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.rx.lock().await;
        guard.recv().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, BridgeError> {
        self.commands.lock().push(RecordedCommand {
            target,
            method: method.to_string(),
            params: params.clone(),
        });
        let scripted = self
            .replies
            .lock()
            .get_mut(method)
            .and_then(|queue| queue.pop_front());
        match scripted {
            Some(ScriptedReply::Ok(value)) => Ok(value),
            Some(ScriptedReply::Err(hint)) => {
                Err(BridgeError::new(BridgeErrorKind::Protocol).with_hint(hint))
            }
            None => Ok(self.default_reply(method, &params)),
        }
    }
}

/// A `Target.targetCreated` event for a page target.
pub fn page_created(target_id: &str, url: &str, opener: Option<&str>) -> TransportEvent {
    TransportEvent {
        method: "Target.targetCreated".into(),
        params: json!({
            "targetInfo": {
                "targetId": target_id,
                "type": "page",
                "url": url,
                "openerId": opener,
                "attached": false,
            }
        }),
        session_id: None,
    }
}

/// A `Target.targetDestroyed` event.
pub fn target_destroyed(target_id: &str) -> TransportEvent {
    TransportEvent {
        method: "Target.targetDestroyed".into(),
        params: json!({ "targetId": target_id }),
        session_id: None,
    }
}

/// Polls `condition` until it holds. The session imposes no deadlines of
/// its own, so tests bound their waits here; two seconds is generous for
/// an all-mock run.
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Display stand-in that counts stops.
pub struct CountingDisplay {
    pub stops: AtomicUsize,
}

impl CountingDisplay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stops: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DisplayHandle for CountingDisplay {
    async fn stop(&self) -> Result<(), DisplayError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Process stand-in that counts kills.
pub struct CountingProcess {
    pub kills: AtomicUsize,
}

impl CountingProcess {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            kills: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ProcessHandle for CountingProcess {
    // Never expose a pid here: a stray kill signal from a test run must not
    // be able to reach a live process on the host.
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn kill(&self) -> Result<(), BridgeError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Resolver stand-in that counts attempts and never finds a challenge.
pub struct CountingResolver {
    pub attempts: AtomicUsize,
}

impl CountingResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChallengeResolver for CountingResolver {
    fn name(&self) -> &str {
        "counting"
    }

    async fn attempt(&self, _page: &PageDriver) -> Result<ChallengeVerdict, BridgeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(ChallengeVerdict::NoChallenge)
    }
}
