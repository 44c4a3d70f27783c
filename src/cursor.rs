//! Human-shaped pointer input.
//!
//! Bot checks flag pointers that teleport. The [`Cursor`] keeps per-page
//! pointer state and turns every move into a short eased track of
//! `Input.dispatchMouseEvent` calls: quadratic ease-in-out along the
//! straight line, a few pixels of jitter on the interior points, and a
//! randomized hold between press and release on clicks. Consecutive moves
//! chain, each one starting where the previous ended.

use std::time::Duration;

use cdp_bridge::{BridgeError, PageDriver};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::time::sleep;

/// Pacing knobs for synthetic pointer input.
#[derive(Clone, Debug)]
pub struct MouseTempo {
    /// Points per move, destination included. Clamped to at least 2.
    pub path_points: u32,
    /// Maximum absolute jitter applied per axis to interior points.
    pub jitter_px: f64,
    /// Base pause between path points.
    pub step_delay_ms: u64,
    /// Extra random pause per step, up to this much.
    pub step_jitter_ms: u64,
    /// Base hold between press and release.
    pub press_ms: u64,
    /// Extra random hold, up to this much.
    pub press_jitter_ms: u64,
}

impl Default for MouseTempo {
    fn default() -> Self {
        Self {
            path_points: 16,
            jitter_px: 3.5,
            step_delay_ms: 8,
            step_jitter_ms: 8,
            press_ms: 40,
            press_jitter_ms: 40,
        }
    }
}

/// Pointer state for one page.
pub struct Cursor {
    tempo: MouseTempo,
    position: Mutex<(f64, f64)>,
}

impl Cursor {
    pub fn new(tempo: MouseTempo) -> Self {
        Self {
            tempo,
            position: Mutex::new((0.0, 0.0)),
        }
    }

    /// Where the pointer currently rests.
    pub fn position(&self) -> (f64, f64) {
        *self.position.lock()
    }

    /// Glides the pointer to `(x, y)` along an eased, jittered track.
    pub async fn move_to(&self, page: &PageDriver, x: f64, y: f64) -> Result<(), BridgeError> {
        let from = self.position();
        let mut rng = StdRng::from_entropy();
        let path = trace_path(from, (x, y), self.tempo.path_points, self.tempo.jitter_px, &mut rng);

        for (px, py) in path {
            page.dispatch_mouse_event(json!({
                "type": "mouseMoved",
                "x": px,
                "y": py,
            }))
            .await?;

            let jitter = if self.tempo.step_jitter_ms > 0 {
                rng.gen_range(0..=self.tempo.step_jitter_ms)
            } else {
                0
            };
            sleep(Duration::from_millis(self.tempo.step_delay_ms + jitter)).await;
        }

        *self.position.lock() = (x, y);
        Ok(())
    }

    /// Moves to `(x, y)` and performs a left click with a human-length hold.
    pub async fn click(&self, page: &PageDriver, x: f64, y: f64) -> Result<(), BridgeError> {
        self.move_to(page, x, y).await?;

        page.dispatch_mouse_event(json!({
            "type": "mousePressed",
            "x": x,
            "y": y,
            "button": "left",
            "clickCount": 1,
        }))
        .await?;

        let mut rng = StdRng::from_entropy();
        let hold = if self.tempo.press_jitter_ms > 0 {
            self.tempo.press_ms + rng.gen_range(0..=self.tempo.press_jitter_ms)
        } else {
            self.tempo.press_ms
        };
        sleep(Duration::from_millis(hold)).await;

        page.dispatch_mouse_event(json!({
            "type": "mouseReleased",
            "x": x,
            "y": y,
            "button": "left",
            "clickCount": 1,
        }))
        .await
    }
}

/// Quadratic ease-in-out over `[0, 1]`.
fn ease_in_out(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

/// Builds the points of a move. The final point is exactly `to`; interior
/// points sit on the eased line within `jitter_px` per axis.
fn trace_path(
    from: (f64, f64),
    to: (f64, f64),
    points: u32,
    jitter_px: f64,
    rng: &mut StdRng,
) -> Vec<(f64, f64)> {
    let steps = points.max(2);
    let mut path = Vec::with_capacity(steps as usize);

    for i in 1..=steps {
        if i == steps {
            path.push(to);
            break;
        }

        let t = f64::from(i) / f64::from(steps);
        let eased = ease_in_out(t);
        let mut px = from.0 + (to.0 - from.0) * eased;
        let mut py = from.1 + (to.1 - from.1) * eased;
        if jitter_px > 0.0 {
            px += rng.gen_range(-jitter_px..=jitter_px);
            py += rng.gen_range(-jitter_px..=jitter_px);
        }
        path.push((px, py));
    }

    path
}
