//! In-page patch set for the VeilBrowser page controller.
//!
//! The patches are a fixed, ordered list of JavaScript snippets that make an
//! automated page harder to fingerprint: native-looking dialog functions,
//! hardware-consistent pointer geometry, a permissions mask, and a popup and
//! redirect guard. Every snippet is idempotent per navigation and is written
//! so it can never throw into the page. The crate also carries the challenge
//! probe script and the parser for its verdict.

pub mod challenge;

use serde::{Deserialize, Serialize};

pub use challenge::{challenge_probe, ChallengeVerdict};

/// How long after a trusted click the popup guard treats window-opening
/// calls as user intent. Mirrored by the constant inside `popup_guard.js`.
pub const USER_GESTURE_WINDOW_MS: u64 = 500;

/// Substrings that mark a popup destination as advertising or tracking.
/// Mirrored by the blocklist inside `popup_guard.js`.
const URL_BLOCKLIST: &[&str] = &[
    "ad", "pop", "click", "redirect", "track", "banner", "sweep",
];

/// The individual patches, in the order they are registered per navigation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    DialogSpoof,
    PointerGeometry,
    PermissionsMask,
    PopupGuard,
}

impl PatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatchKind::DialogSpoof => "dialog_spoof",
            PatchKind::PointerGeometry => "pointer_geometry",
            PatchKind::PermissionsMask => "permissions_mask",
            PatchKind::PopupGuard => "popup_guard",
        }
    }
}

/// One embedded page script plus its identity, for logging and ordering.
#[derive(Clone, Copy, Debug)]
pub struct Patch {
    pub kind: PatchKind,
    pub source: &'static str,
}

static DIALOG_SPOOF: Patch = Patch {
    kind: PatchKind::DialogSpoof,
    source: include_str!("../js/dialog_spoof.js"),
};

static NAVIGATION_BUNDLE: [Patch; 4] = [
    DIALOG_SPOOF,
    Patch {
        kind: PatchKind::PointerGeometry,
        source: include_str!("../js/pointer_geometry.js"),
    },
    Patch {
        kind: PatchKind::PermissionsMask,
        source: include_str!("../js/permissions_mask.js"),
    },
    Patch {
        kind: PatchKind::PopupGuard,
        source: include_str!("../js/popup_guard.js"),
    },
];

/// The patch that must reach the page before any of its own scripts run.
/// Installed through the rawest instrumentation channel available, ahead of
/// the per-navigation bundle.
pub fn bootstrap_patch() -> &'static Patch {
    &DIALOG_SPOOF
}

/// The full bundle re-registered for every future navigation, in order.
/// The dialog spoof leads so later patches already run under a masked
/// `Function.prototype.toString`.
pub fn navigation_patches() -> &'static [Patch] {
    &NAVIGATION_BUNDLE
}

/// Browser-side twin of the popup guard's URL check. A blank destination or
/// one matching the blocklist is treated as machine-opened.
pub fn popup_url_is_suspect(url: &str) -> bool {
    let trimmed = url.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("about:blank") {
        return true;
    }
    let lowered = trimmed.to_ascii_lowercase();
    URL_BLOCKLIST.iter().any(|needle| lowered.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_bundle_keeps_mandated_order() {
        let kinds: Vec<PatchKind> = navigation_patches().iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PatchKind::DialogSpoof,
                PatchKind::PointerGeometry,
                PatchKind::PermissionsMask,
                PatchKind::PopupGuard,
            ]
        );
    }

    #[test]
    fn bootstrap_patch_is_the_dialog_spoof() {
        assert_eq!(bootstrap_patch().kind, PatchKind::DialogSpoof);
        assert_eq!(bootstrap_patch().source, navigation_patches()[0].source);
    }

    #[test]
    fn patch_sources_are_self_contained_iifes() {
        for patch in navigation_patches() {
            let source = patch.source.trim_start();
            assert!(
                source.starts_with("(() => {"),
                "{} does not open as an IIFE",
                patch.kind.as_str()
            );
            assert!(
                patch.source.trim_end().ends_with("})();"),
                "{} does not close as an IIFE",
                patch.kind.as_str()
            );
        }
    }

    #[test]
    fn dialog_spoof_masks_tostring() {
        let source = bootstrap_patch().source;
        assert!(source.contains("WeakMap"));
        assert!(source.contains("[native code]"));
        assert!(source.contains("Function.prototype.toString"));
    }

    #[test]
    fn popup_guard_mirrors_rust_blocklist() {
        let source = navigation_patches()[3].source;
        for needle in URL_BLOCKLIST {
            assert!(
                source.contains(&format!("'{needle}'")),
                "blocklist entry {needle} missing from popup_guard.js"
            );
        }
        assert!(source.contains(&USER_GESTURE_WINDOW_MS.to_string()));
    }

    #[test]
    fn blank_urls_are_suspect() {
        assert!(popup_url_is_suspect(""));
        assert!(popup_url_is_suspect("   "));
        assert!(popup_url_is_suspect("about:blank"));
        assert!(popup_url_is_suspect("ABOUT:BLANK"));
    }

    #[test]
    fn blocklist_matches_are_suspect() {
        assert!(popup_url_is_suspect("https://adserver.example.com/win"));
        assert!(popup_url_is_suspect("https://example.com/?utm=popunder"));
        assert!(popup_url_is_suspect("https://TRACKing.example.net/pixel"));
    }

    #[test]
    fn ordinary_urls_pass() {
        assert!(!popup_url_is_suspect("https://docs.rs/"));
        assert!(!popup_url_is_suspect("https://news.example.org/story/42"));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&PatchKind::PopupGuard).unwrap();
        assert_eq!(json, "\"popup_guard\"");
    }
}
