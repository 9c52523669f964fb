//! Heading rotation animation
//!
//! Rotates the view heading along the shortest angular path with a cubic
//! ease-in-out curve.
//!
//! # Design
//! - [`RotationAnimation`] is a pure stepper: call `advance(dt)` with the time
//!   since the previous frame and render the returned heading.
//! - [`RotationAnimator`] drives a stepper from a frame ticker on tokio's
//!   clock and applies each frame through a callback.
//!
//! The animator has no mutual exclusion of its own; callers hold the view
//! lease while an animation runs.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::trace;

use crate::cancel::CancellationToken;
use crate::error::{NavError, NavResult};
use crate::types::PovUpdate;
use crate::view::ViewHandle;

// =============================================================================
// ANGLE MATH
// =============================================================================

/// Normalize an angle in degrees to `[0, 360)`
pub fn normalize_angle(angle: f64) -> f64 {
    let normalized = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if normalized >= 360.0 {
        0.0
    } else {
        normalized
    }
}

/// Signed delta from `from` to `to` along the shortest arc, in `[-180, 180]`.
///
/// `shortest_rotation(350.0, 10.0) == 20.0`, never `-340.0`.
pub fn shortest_rotation(from: f64, to: f64) -> f64 {
    let delta = normalize_angle(to) - normalize_angle(from);
    if delta.abs() > 180.0 {
        if delta > 0.0 {
            delta - 360.0
        } else {
            delta + 360.0
        }
    } else {
        delta
    }
}

/// Cubic ease-in-out on `[0, 1]`
pub fn ease_in_out_cubic(progress: f64) -> f64 {
    let p = progress.clamp(0.0, 1.0);
    if p < 0.5 {
        4.0 * p * p * p
    } else {
        1.0 - (-2.0 * p + 2.0).powi(3) / 2.0
    }
}

/// Eight-point compass label for a heading
pub fn cardinal_direction(heading: f64) -> &'static str {
    const DIRECTIONS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];
    let index = (normalize_angle(heading) / 45.0).round() as usize % DIRECTIONS.len();
    DIRECTIONS[index]
}

// =============================================================================
// ROTATION STEPPER
// =============================================================================

/// One rendered frame of a rotation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationFrame {
    pub heading: f64,
    /// Linear time progress in `[0, 1]`
    pub progress: f64,
    pub done: bool,
}

/// Time-based heading interpolation.
///
/// Headings are `from + delta * eased` and are not re-normalized, so a
/// rotation from 350° to 10° ends at 370°.
#[derive(Debug, Clone)]
pub struct RotationAnimation {
    from: f64,
    delta: f64,
    duration: Duration,
    elapsed: Duration,
}

impl RotationAnimation {
    pub fn new(from: f64, to: f64, duration: Duration) -> Self {
        Self {
            from,
            delta: shortest_rotation(from, to),
            duration,
            elapsed: Duration::ZERO,
        }
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn target(&self) -> f64 {
        self.from + self.delta
    }

    pub fn is_done(&self) -> bool {
        self.elapsed >= self.duration
    }

    /// Advance by `dt` and return the frame to render
    pub fn advance(&mut self, dt: Duration) -> RotationFrame {
        self.elapsed = self.elapsed.saturating_add(dt).min(self.duration);
        let progress = if self.duration.is_zero() {
            1.0
        } else {
            (self.elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
        };

        RotationFrame {
            heading: self.from + self.delta * ease_in_out_cubic(progress),
            progress,
            done: progress >= 1.0,
        }
    }
}

// =============================================================================
// ANIMATOR
// =============================================================================

/// Drives rotations frame by frame
#[derive(Debug, Clone)]
pub struct RotationAnimator {
    frame_interval: Duration,
}

impl Default for RotationAnimator {
    fn default() -> Self {
        Self::new(Duration::from_millis(16))
    }
}

impl RotationAnimator {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            frame_interval: frame_interval.max(Duration::from_millis(1)),
        }
    }

    /// Animate from `from` to `to` over `duration`, calling `on_frame` with
    /// the heading of every frame. The last frame always carries the target
    /// heading. Returns once the duration has elapsed.
    pub async fn animate<F>(
        &self,
        from: f64,
        to: f64,
        duration: Duration,
        cancel: &CancellationToken,
        mut on_frame: F,
    ) -> NavResult<()>
    where
        F: FnMut(f64),
    {
        let mut animation = RotationAnimation::new(from, to, duration);
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();
        let mut frames = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(NavError::Cancelled),
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let frame = animation.advance(now - last);
            last = now;
            frames += 1;
            on_frame(frame.heading);

            if frame.done {
                trace!(from, to, frames, "Rotation complete");
                return Ok(());
            }
        }
    }

    /// Rotate the view from its current heading to `target`, preserving
    /// the current pitch on every frame
    pub async fn rotate_view(
        &self,
        view: &dyn ViewHandle,
        target: f64,
        duration: Duration,
        cancel: &CancellationToken,
    ) -> NavResult<()> {
        let from = view.heading();
        self.animate(from, target, duration, cancel, |heading| {
            view.set_pov(PovUpdate::new(heading, view.pitch()));
        })
        .await
    }
}
