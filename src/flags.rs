//! Launch flag computation.
//!
//! Pure value work: the final flag list is derived once per launch from the
//! default set, caller extras, and the resolved headless/proxy state, and is
//! never mutated afterwards.

use std::env;

use crate::config::{ConnectOptions, ProxyConfig};

/// Hardened default flag set for Chromium-family browsers. One entry is the
/// feature-disable list that [`compute_launch_flags`] extends.
pub const DEFAULT_FLAGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-features=Translate,OptimizationHints,MediaRouter",
    "--disable-hang-monitor",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-sync",
    "--metrics-recording-only",
    "--no-default-browser-check",
    "--no-first-run",
    "--password-store=basic",
    "--remote-allow-origins=*",
    "--use-mock-keychain",
];

const DISABLE_FEATURES_PREFIX: &str = "--disable-features=";

/// Appended to the feature-disable entry so the browser stops reporting
/// itself as automation-controlled.
pub const AUTOMATION_FEATURE: &str = "AutomationControlled";

/// Environment toggle consulted when `ConnectOptions.headless` is unset.
pub const HEADLESS_ENV: &str = "VEIL_HEADLESS";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeadlessMode {
    Headless,
    Headful,
}

impl HeadlessMode {
    /// Explicit caller choice wins; otherwise `VEIL_HEADLESS` decides,
    /// defaulting to headless.
    pub fn resolve(requested: Option<bool>) -> Self {
        match requested {
            Some(true) => Self::Headless,
            Some(false) => Self::Headful,
            None => {
                if headless_env_default() {
                    Self::Headless
                } else {
                    Self::Headful
                }
            }
        }
    }

    pub fn is_headless(self) -> bool {
        matches!(self, Self::Headless)
    }
}

fn headless_env_default() -> bool {
    // "0", "false", "no", "off" mean headful
    match env::var(HEADLESS_ENV) {
        Ok(value) => {
            let lower = value.trim().to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => true,
    }
}

/// Builds the full launch flag list.
///
/// Starting point is [`DEFAULT_FLAGS`] with `AutomationControlled` appended
/// to the feature-disable entry, or an empty list under
/// `ignore_default_flags`. Caller args follow in order, then `--headless=new`
/// when the resolved mode is headless, then a single `--proxy-server` entry
/// when the proxy has both host and port.
pub fn compute_launch_flags(options: &ConnectOptions, headless: HeadlessMode) -> Vec<String> {
    let mut flags: Vec<String> = if options.ignore_default_flags {
        Vec::new()
    } else {
        DEFAULT_FLAGS
            .iter()
            .map(|flag| {
                if let Some(features) = flag.strip_prefix(DISABLE_FEATURES_PREFIX) {
                    format!("{DISABLE_FEATURES_PREFIX}{features},{AUTOMATION_FEATURE}")
                } else {
                    (*flag).to_string()
                }
            })
            .collect()
    };

    flags.extend(options.args.iter().cloned());

    if headless.is_headless() {
        flags.push("--headless=new".to_string());
    }

    if let Some(endpoint) = options.proxy.as_ref().and_then(ProxyConfig::endpoint) {
        flags.push(format!("--proxy-server={endpoint}"));
    }

    flags
}
