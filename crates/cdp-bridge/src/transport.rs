use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{BridgeError, BridgeErrorKind};

/// One decoded protocol event as it came off the wire.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Where a command is addressed: the browser connection itself or one
/// flattened target session.
#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// Wire seam between the bridge and a live browser. The production
/// implementation speaks websocket CDP; tests substitute a recording mock.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), BridgeError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, BridgeError>;
}

/// Transport over chromiumoxide's raw websocket connection.
///
/// Commands are funneled through an owned loop task that multiplexes them
/// with incoming traffic; responses are matched back to callers by `CallId`.
/// When the stream ends or errors, every caller still waiting gets a failure
/// and `next_event` starts returning `None`, which is how the upstream
/// bridge learns the browser is gone. Commands carry no internal deadline;
/// they resolve when the browser answers or when the connection dies.
pub struct ChromiumTransport {
    state: Arc<RuntimeState>,
}

impl ChromiumTransport {
    pub async fn connect(ws_url: &str) -> Result<Self, BridgeError> {
        let state = RuntimeState::connect(ws_url).await?;
        Ok(Self {
            state: Arc::new(state),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), BridgeError> {
        // Handshake so a dead endpoint fails here instead of on the first
        // real command.
        let version = self
            .state
            .send_internal(
                CommandTarget::Browser,
                "Browser.getVersion",
                Value::Object(Default::default()),
            )
            .await?;
        let product = version
            .get("product")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        info!(target: "cdp_bridge", product, "browser connection established");
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.state.next_event().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, BridgeError> {
        self.state.send_internal(target, method, params).await
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, BridgeError>>,
}

struct RuntimeState {
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

impl RuntimeState {
    async fn connect(ws_url: &str) -> Result<Self, BridgeError> {
        let conn = Connection::<CdpEventMessage>::connect(ws_url)
            .await
            .map_err(|err| BridgeError::new(BridgeErrorKind::Io).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(512);

        let alive = Arc::new(AtomicBool::new(true));
        let loop_alive = alive.clone();

        let loop_task = tokio::spawn(async move {
            let result = Self::run_loop(conn, command_rx, events_tx).await;
            loop_alive.store(false, Ordering::Relaxed);
            if let Err(err) = result {
                error!(target: "cdp_bridge", ?err, "transport loop terminated with error");
            }
        });

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            alive,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn send_internal(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, BridgeError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| BridgeError::new(BridgeErrorKind::Io).with_hint(err.to_string()))?;

        match resp_rx.await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::new(BridgeErrorKind::Io)
                .with_hint("command response channel closed")),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
        mut event_tx: mpsc::Sender<TransportEvent>,
    ) -> Result<(), BridgeError> {
        let mut inflight: HashMap<CallId, oneshot::Sender<Result<Value, BridgeError>>> =
            HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::handle_command(&mut conn, cmd, &mut inflight)?;
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::handle_response(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            if let Err(err) = Self::handle_event(event, &mut event_tx).await {
                                warn!(target: "cdp_bridge", ?err, "failed to forward event");
                            }
                        }
                        Some(Err(err)) => {
                            let bridge_err = Self::map_cdp_error(err);
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(bridge_err.clone()));
                            }
                            return Err(bridge_err);
                        }
                        None => {
                            let err = BridgeError::new(BridgeErrorKind::Io)
                                .with_hint("cdp connection closed");
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(err.clone()));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_command(
        conn: &mut Connection<CdpEventMessage>,
        cmd: ControlMessage,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, BridgeError>>>,
    ) -> Result<(), BridgeError> {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.clone().into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
                Ok(())
            }
            Err(err) => {
                let bridge_err =
                    BridgeError::new(BridgeErrorKind::Io).with_hint(err.to_string());
                let _ = cmd.responder.send(Err(bridge_err.clone()));
                Err(bridge_err)
            }
        }
    }

    fn handle_response(
        resp: Response,
        inflight: &mut HashMap<CallId, oneshot::Sender<Result<Value, BridgeError>>>,
    ) {
        let entry = inflight.remove(&resp.id);
        let result = Self::extract_payload(resp);

        if let Some(sender) = entry {
            let _ = sender.send(result);
        }
    }

    async fn handle_event(
        event: CdpEventMessage,
        event_tx: &mut mpsc::Sender<TransportEvent>,
    ) -> Result<(), BridgeError> {
        let raw: CdpJsonEventMessage = event.try_into().map_err(|err| {
            BridgeError::new(BridgeErrorKind::Internal)
                .with_hint(format!("failed to decode cdp event: {err}"))
        })?;

        let payload = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };

        event_tx
            .send(payload)
            .await
            .map_err(|err| BridgeError::new(BridgeErrorKind::Internal).with_hint(err.to_string()))
    }

    fn extract_payload(resp: Response) -> Result<Value, BridgeError> {
        if let Some(result) = resp.result {
            Ok(result)
        } else if let Some(error) = resp.error {
            Err(BridgeError::new(BridgeErrorKind::Protocol)
                .with_hint(format!("cdp error {}: {}", error.code, error.message)))
        } else {
            Err(BridgeError::new(BridgeErrorKind::Internal).with_hint("empty cdp response"))
        }
    }

    fn map_cdp_error(err: CdpError) -> BridgeError {
        let hint = err.to_string();
        match err {
            CdpError::JavascriptException(_) | CdpError::Serde(_) | CdpError::FrameNotFound(_) => {
                BridgeError::new(BridgeErrorKind::Protocol).with_hint(hint)
            }
            _ => BridgeError::new(BridgeErrorKind::Io).with_hint(hint),
        }
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.loop_task.abort();
    }
}
