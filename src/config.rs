//! Connection configuration: the single value handed to `connect`.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plugin::PagePlugin;
use crate::poller::ChallengeResolver;
use cdp_bridge::AuthCredentials;

/// Cadence of the challenge poll loop when the caller does not override it.
pub const DEFAULT_CHALLENGE_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize connect profile: {0}")]
    Deserialize(String),
}

/// Everything `connect` needs, in one value. Environment lookups
/// (`VEIL_HEADLESS`, `VEIL_EXECUTABLE`) only fill fields left unset here.
#[derive(Clone)]
pub struct ConnectOptions {
    /// Extra command-line flags appended after the default set.
    pub args: Vec<String>,
    /// `None` defers to the `VEIL_HEADLESS` environment default.
    pub headless: Option<bool>,
    pub proxy: Option<ProxyConfig>,
    /// Poll for interactive challenge widgets on every attached page.
    pub challenge_solving: bool,
    /// Skip Xvfb even when a headful Linux session has no `DISPLAY`.
    pub disable_virtual_display: bool,
    /// Hooks run for every adopted page, in this order.
    pub plugins: Vec<Arc<dyn PagePlugin>>,
    /// Start from an empty flag list instead of the hardened defaults.
    pub ignore_default_flags: bool,
    /// Browser binary; `None` falls back to discovery.
    pub executable: Option<PathBuf>,
    pub challenge_poll_interval: Duration,
    /// Replaces the built-in Turnstile resolver when set.
    pub challenge_resolver: Option<Arc<dyn ChallengeResolver>>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            headless: None,
            proxy: None,
            challenge_solving: false,
            disable_virtual_display: false,
            plugins: Vec::new(),
            ignore_default_flags: false,
            executable: None,
            challenge_poll_interval: DEFAULT_CHALLENGE_POLL_INTERVAL,
            challenge_resolver: None,
        }
    }
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("args", &self.args)
            .field("headless", &self.headless)
            .field("proxy", &self.proxy)
            .field("challenge_solving", &self.challenge_solving)
            .field("disable_virtual_display", &self.disable_virtual_display)
            .field("plugins", &self.plugins.len())
            .field("ignore_default_flags", &self.ignore_default_flags)
            .field("executable", &self.executable)
            .field("challenge_poll_interval", &self.challenge_poll_interval)
            .finish()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyConfig {
    /// `host:port` for `--proxy-server`, or nothing when either half is
    /// missing. A half-specified proxy is treated as no proxy at all.
    pub fn endpoint(&self) -> Option<String> {
        match (self.host.as_deref(), self.port) {
            (Some(host), Some(port)) if !host.is_empty() => Some(format!("{host}:{port}")),
            _ => None,
        }
    }

    /// Credentials for `Fetch.authRequired`, only when both are present.
    pub fn credentials(&self) -> Option<AuthCredentials> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(username), Some(password)) if !username.is_empty() => Some(AuthCredentials {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => None,
        }
    }
}

/// Serde mirror of [`ConnectOptions`] for profile files. Plugins and
/// resolvers are code, not config, so they have no counterpart here.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectProfile {
    pub args: Vec<String>,
    pub headless: Option<bool>,
    pub proxy: Option<ProxyConfig>,
    pub challenge_solving: bool,
    pub disable_virtual_display: bool,
    pub ignore_default_flags: bool,
    pub executable: Option<PathBuf>,
    pub challenge_poll_interval_ms: Option<u64>,
}

impl ConnectProfile {
    pub fn into_options(self) -> ConnectOptions {
        ConnectOptions {
            args: self.args,
            headless: self.headless,
            proxy: self.proxy,
            challenge_solving: self.challenge_solving,
            disable_virtual_display: self.disable_virtual_display,
            ignore_default_flags: self.ignore_default_flags,
            executable: self.executable,
            challenge_poll_interval: self
                .challenge_poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_CHALLENGE_POLL_INTERVAL),
            ..ConnectOptions::default()
        }
    }
}

pub fn load_profile_from_reader<R: Read>(mut reader: R) -> Result<ConnectProfile, ProfileError> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    parse_profile_str(&buf)
}

pub fn load_profile(path: impl AsRef<Path>) -> Result<ConnectProfile, ProfileError> {
    let file = File::open(path.as_ref())?;
    load_profile_from_reader(file)
}

pub fn parse_profile_str(raw: &str) -> Result<ConnectProfile, ProfileError> {
    match serde_json::from_str(raw) {
        Ok(profile) => Ok(profile),
        Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
            ProfileError::Deserialize(format!(
                "json error: {}; yaml error: {}",
                json_err, yaml_err
            ))
        }),
    }
}
