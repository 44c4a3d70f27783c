//! Extension hook surface for third-party page instrumentation.

use async_trait::async_trait;
use cdp_bridge::{BridgeError, PageDriver};

/// A plugin gets one callback per page the controller adopts, after proxy
/// authentication and before the stealth patches go in. Hooks run in
/// registration order; a failing hook is logged and the rest still run.
#[async_trait]
pub trait PagePlugin: Send + Sync {
    /// Name used in log fields when a hook fails.
    fn name(&self) -> &str;

    async fn on_page_created(&self, page: &PageDriver) -> Result<(), BridgeError>;
}
