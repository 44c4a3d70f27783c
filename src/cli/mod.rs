pub mod doctor;
pub mod flags;
pub mod open;

pub use doctor::cmd_doctor;
pub use flags::{cmd_flags, FlagsArgs};
pub use open::{cmd_open, OpenArgs};

use anyhow::{anyhow, bail, Context, Result};
use veilbrowser::ProxyConfig;

/// Parses `host:port` or `host:port@user:pass` into a proxy config.
pub(crate) fn parse_proxy(raw: &str) -> Result<ProxyConfig> {
    let (endpoint, credentials) = match raw.split_once('@') {
        Some((endpoint, credentials)) => (endpoint, Some(credentials)),
        None => (raw, None),
    };

    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("proxy must be host:port or host:port@user:pass"))?;
    if host.is_empty() {
        bail!("proxy host is empty");
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("bad proxy port {port:?}"))?;

    let mut config = ProxyConfig {
        host: Some(host.to_string()),
        port: Some(port),
        ..ProxyConfig::default()
    };

    if let Some(credentials) = credentials {
        let (username, password) = credentials
            .split_once(':')
            .ok_or_else(|| anyhow!("proxy credentials must be user:pass"))?;
        config.username = Some(username.to_string());
        config.password = Some(password.to_string());
    }

    Ok(config)
}
