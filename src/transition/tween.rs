use std::time::{Duration, Instant};

use glam::Vec3;

use crate::transition::easing::Curve;

pub trait Lerp: Copy {
    fn lerp_to(self, to: Self, t: f32) -> Self;
}

impl Lerp for f32 {
    fn lerp_to(self, to: Self, t: f32) -> Self {
        self + (to - self) * t
    }
}

impl Lerp for Vec3 {
    fn lerp_to(self, to: Self, t: f32) -> Self {
        self.lerp(to, t)
    }
}

/// Tweens a value toward a target over a fixed duration.
#[derive(Debug, Clone)]
pub struct Tween<T: Lerp> {
    from: T,
    to: T,
    start: Instant,
    duration: Duration,
    curve: &'static dyn Curve,
}

impl<T: Lerp> Tween<T> {
    pub fn new(from: T, to: T, duration: Duration, curve: &'static dyn Curve) -> Self {
        Self::starting_at(from, to, duration, curve, Instant::now())
    }

    pub fn starting_at(from: T, to: T, duration: Duration, curve: &'static dyn Curve, start: Instant) -> Self {
        Self {
            from,
            to,
            start,
            duration,
            curve,
        }
    }

    /// Normalized, un-eased time in `[0, 1]`.
    pub fn time(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.start);
        (elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
    }

    pub fn value(&self, now: Instant) -> T {
        let t = self.time(now);
        if t >= 1.0 {
            return self.to;
        }
        self.from.lerp_to(self.to, self.curve.y_at_x(t))
    }

    pub fn is_finished(&self, now: Instant) -> bool {
        self.time(now) >= 1.0
    }

    pub fn target(&self) -> T {
        self.to
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transition::easing::{EMPHASIZED, LINEAR};

    #[test]
    fn reaches_the_target_exactly() {
        let start = Instant::now();
        let tween = Tween::starting_at(Vec3::ZERO, Vec3::new(10.0, 0.0, 5.0), Duration::from_millis(100), &*EMPHASIZED, start);
        assert_eq!(tween.value(start), Vec3::ZERO);
        assert!(!tween.is_finished(start + Duration::from_millis(50)));
        assert_eq!(tween.value(start + Duration::from_millis(150)), Vec3::new(10.0, 0.0, 5.0));
        assert!(tween.is_finished(start + Duration::from_millis(100)));
    }

    #[test]
    fn linear_tween_is_proportional() {
        let start = Instant::now();
        let tween = Tween::starting_at(0.0f32, 2.0, Duration::from_secs(1), &*LINEAR, start);
        assert!((tween.value(start + Duration::from_millis(500)) - 1.0).abs() < 1e-2);
    }

    #[test]
    fn zero_duration_is_immediately_done() {
        let tween = Tween::new(0.0f32, 1.0, Duration::ZERO, &*LINEAR);
        assert!(tween.is_finished(Instant::now()));
        assert_eq!(tween.value(Instant::now()), 1.0);
    }
}
