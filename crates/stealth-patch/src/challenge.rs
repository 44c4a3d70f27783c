//! Interactive-challenge probing.
//!
//! One probe is a single in-page evaluation: it looks for a Turnstile-family
//! widget, clicks whatever part of it is clickable, and reports back a small
//! JSON verdict. The poller on the controller side repeats the probe until
//! the page closes.

use serde::Deserialize;
use serde_json::Value;

static CHALLENGE_PROBE: &str = include_str!("../js/challenge_probe.js");

/// The probe script, evaluated with `returnByValue` so the verdict comes
/// back as a plain JSON object.
pub fn challenge_probe() -> &'static str {
    CHALLENGE_PROBE
}

/// Outcome of one probe evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChallengeVerdict {
    /// A success token is present and filled.
    Solved,
    /// A widget exists and was poked; `clicked` counts the elements hit.
    Pending { clicked: u32 },
    /// No challenge markers on the page.
    NoChallenge,
    /// The probe itself misbehaved or returned something unreadable.
    ProbeFailed { reason: Option<String> },
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
enum ProbeReport {
    Solved,
    Pending {
        #[serde(default)]
        clicked: u32,
    },
    None,
    ProbeFailed {
        #[serde(default)]
        error: Option<String>,
    },
}

impl ChallengeVerdict {
    /// Reads the evaluation result. Anything that does not match the probe's
    /// report shape counts as a failed probe rather than an error.
    pub fn from_value(value: &Value) -> Self {
        match serde_json::from_value::<ProbeReport>(value.clone()) {
            Ok(ProbeReport::Solved) => ChallengeVerdict::Solved,
            Ok(ProbeReport::Pending { clicked }) => ChallengeVerdict::Pending { clicked },
            Ok(ProbeReport::None) => ChallengeVerdict::NoChallenge,
            Ok(ProbeReport::ProbeFailed { error }) => {
                ChallengeVerdict::ProbeFailed { reason: error }
            }
            Err(err) => {
                tracing::debug!(target: "stealth_patch", error = %err, "unreadable probe verdict");
                ChallengeVerdict::ProbeFailed {
                    reason: Some(err.to_string()),
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeVerdict::Solved => "solved",
            ChallengeVerdict::Pending { .. } => "pending",
            ChallengeVerdict::NoChallenge => "none",
            ChallengeVerdict::ProbeFailed { .. } => "probe-failed",
        }
    }
}
