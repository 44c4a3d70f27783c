//! Background challenge solving.
//!
//! Every page the session adopts gets a poller task that repeatedly runs a
//! [`ChallengeResolver`] against the page. The loop has no idea whether a
//! challenge is coming; it probes on a fixed interval and logs whatever the
//! resolver reports. It keeps running after a solve because interstitials
//! can re-appear on navigation, and it stops only when the page goes away.
//!
//! Cancellation is cooperative: the session clears the page's
//! challenge-active flag when the page closes, and the loop re-checks that
//! flag (and the driver's own closed latch) before every attempt. Worst
//! case, one probe that was already in flight still lands on the closed
//! page and fails harmlessly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_bridge::{BridgeError, PageDriver};
use stealth_patch::{challenge_probe, ChallengeVerdict};
use tokio::task::JoinHandle;
use tracing::debug;

/// One attempt at clearing an interactive challenge on a page.
///
/// Implementations must tolerate pages with no challenge at all; that is the
/// common case, and it is reported as a verdict rather than an error.
#[async_trait]
pub trait ChallengeResolver: Send + Sync {
    /// Name used in log fields.
    fn name(&self) -> &str;

    async fn attempt(&self, page: &PageDriver) -> Result<ChallengeVerdict, BridgeError>;
}

/// Default resolver. Evaluates the Turnstile probe in the page and reads the
/// verdict it returns by value.
#[derive(Debug, Default)]
pub struct TurnstileResolver;

#[async_trait]
impl ChallengeResolver for TurnstileResolver {
    fn name(&self) -> &str {
        "turnstile"
    }

    async fn attempt(&self, page: &PageDriver) -> Result<ChallengeVerdict, BridgeError> {
        let value = page.evaluate(challenge_probe()).await?;
        Ok(ChallengeVerdict::from_value(&value))
    }
}

/// Per-page poll loop.
pub struct ChallengePoller;

impl ChallengePoller {
    /// Spawns the loop for one page. The task exits on its own once `active`
    /// is cleared or the driver reports closed; resolver failures are logged
    /// and never end the loop.
    pub fn spawn(
        page: Arc<PageDriver>,
        resolver: Arc<dyn ChallengeResolver>,
        active: Arc<AtomicBool>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if !active.load(Ordering::SeqCst) || page.is_closed() {
                    break;
                }
                match resolver.attempt(&page).await {
                    Ok(verdict) => debug!(
                        target_id = page.target_id(),
                        resolver = resolver.name(),
                        verdict = verdict.as_str(),
                        "challenge probe"
                    ),
                    Err(error) => debug!(
                        target_id = page.target_id(),
                        resolver = resolver.name(),
                        %error,
                        "challenge probe failed"
                    ),
                }
                tokio::time::sleep(interval).await;
            }
            debug!(target_id = page.target_id(), "challenge poller stopped");
        })
    }
}
