//! Chromium DevTools Protocol bridge for VeilBrowser.
//!
//! The bridge owns exactly one browser connection and splits it into the
//! pieces the rest of the system works with: a process [`launcher`], a wire
//! [`transport`], browser-level target bookkeeping with an event bus
//! ([`bridge`]), and per-page command surfaces ([`page`]). Nothing here
//! knows about patches or polling; upstairs layers drive those through
//! `PageDriver`.

pub mod bridge;
pub mod launcher;
pub mod page;
pub mod transport;

pub mod error {
    use std::fmt;
    use thiserror::Error;

    /// High-level failure categories surfaced by the bridge.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
    pub enum BridgeErrorKind {
        #[error("browser launch failed")]
        Launch,
        #[error("connection i/o failure")]
        Io,
        #[error("protocol error")]
        Protocol,
        #[error("target gone")]
        TargetGone,
        #[error("internal error")]
        Internal,
    }

    /// Error value passed upward, a category plus a human hint.
    #[derive(Clone, Debug)]
    pub struct BridgeError {
        pub kind: BridgeErrorKind,
        pub hint: Option<String>,
    }

    impl fmt::Display for BridgeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for BridgeError {}

    impl BridgeError {
        pub fn new(kind: BridgeErrorKind) -> Self {
            Self { kind, hint: None }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }
    }
}

pub use bridge::{BridgeEvent, BrowserBridge, TargetDescriptor};
pub use error::{BridgeError, BridgeErrorKind};
pub use launcher::{default_executable, launch, LaunchSpec, LaunchedBrowser};
pub use page::{AuthCredentials, CookieParam, PageDriver};
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};
