//! veilbrowser library
//!
//! Stealth-first browser sessions over the Chrome DevTools Protocol: launch
//! flag policy, virtual display management, detection-evasion patches,
//! popup triage, challenge polling, and supervised teardown.

pub mod bootstrap;
pub mod config;
pub mod controller;
pub mod cursor;
pub mod display;
pub mod errors;
pub mod flags;
pub mod plugin;
pub mod poller;
pub mod supervisor;

// Re-export commonly used types for external use
pub use bootstrap::{bootstrap_session, connect, BrowserSession, Connected};
pub use config::{load_profile, ConnectOptions, ConnectProfile, ProfileError, ProxyConfig};
pub use controller::PageHandle;
pub use cursor::{Cursor, MouseTempo};
pub use display::{DisplayError, VirtualDisplay};
pub use errors::{Error, Result};
pub use flags::{compute_launch_flags, HeadlessMode, DEFAULT_FLAGS};
pub use plugin::PagePlugin;
pub use poller::{ChallengePoller, ChallengeResolver, TurnstileResolver};
pub use supervisor::{DisplayHandle, ProcessHandle, ResourceSupervisor};

// The protocol layer and the patch set are part of the public surface;
// callers build resolvers and plugins against these types.
pub use cdp_bridge;
pub use stealth_patch;
