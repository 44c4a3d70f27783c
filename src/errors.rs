//! Error taxonomy exposed to callers.
//!
//! Only two things ever reach a caller: `Launch` from `connect` (the process
//! never came up, or the client never reached it) and `Bridge` from page
//! operations on a live session. Patch installs, poll attempts, and resource
//! teardown degrade to log lines instead of surfacing here.

use cdp_bridge::BridgeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The browser process failed to start or the client could not connect.
    /// Any partially started process is killed before this is returned.
    #[error("browser launch failed: {source}")]
    Launch {
        #[source]
        source: BridgeError,
    },

    /// A page or browser operation failed on an established session.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl Error {
    pub(crate) fn launch(source: BridgeError) -> Self {
        Self::Launch { source }
    }

    pub fn is_launch(&self) -> bool {
        matches!(self, Self::Launch { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
