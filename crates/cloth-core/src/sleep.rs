use glam::{Vec3, Vec4};

use crate::math::xyz;

/// Sleep bookkeeping of one cloth; counters persist across frames.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SleepState {
    /// Maximum per-axis velocity (distance per second) considered at rest.
    pub threshold: f32,
    /// Milliseconds between tests.
    pub test_interval: u32,
    /// Consecutive passed tests after which the cloth sleeps.
    pub after_count: u32,
    pub pass_counter: u32,
    pub test_counter: u32,
}

impl Default for SleepState {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            test_interval: u32::MAX,
            after_count: u32::MAX,
            pass_counter: 0,
            test_counter: 0,
        }
    }
}

impl SleepState {
    pub fn is_asleep(&self) -> bool {
        self.pass_counter >= self.after_count
    }

    pub fn wake_up(&mut self) {
        self.pass_counter = 0;
    }

    pub fn put_to_sleep(&mut self) {
        self.pass_counter = self.after_count;
    }

    /// Run after each iteration.
    ///
    /// Elapsed milliseconds accumulate until a test interval is reached.
    /// The test passes when every particle moved less than
    /// `threshold * iter_dt` on every axis during the iteration; a failed
    /// test resets the pass counter.
    pub fn update(&mut self, current: &[Vec4], previous: &[Vec4], iter_dt: f32) {
        let elapsed_ms = ((iter_dt * 1000.0) as u32).max(1);
        self.test_counter = self.test_counter.saturating_add(elapsed_ms);
        if self.test_counter < self.test_interval {
            return;
        }

        let max_delta = current
            .iter()
            .zip(previous)
            .fold(Vec3::ZERO, |acc, (c, p)| acc.max((xyz(*c) - xyz(*p)).abs()));

        self.pass_counter = self.pass_counter.saturating_add(1);
        let threshold = self.threshold * iter_dt;
        if max_delta.cmpge(Vec3::splat(threshold)).any() {
            self.pass_counter = 0;
        }

        self.test_counter -= self.test_interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SleepState {
        SleepState {
            threshold: 1.0,
            test_interval: 10,
            after_count: 2,
            ..Default::default()
        }
    }

    #[test]
    fn still_particles_fall_asleep() {
        let mut sleep = state();
        let particles = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        for _ in 0..4 {
            sleep.update(&particles, &particles, 0.005);
        }
        assert_eq!(sleep.pass_counter, 2);
        assert!(sleep.is_asleep());
    }

    #[test]
    fn movement_resets_pass_counter() {
        let mut sleep = state();
        sleep.pass_counter = 1;
        sleep.test_counter = 9;
        let cur = vec![Vec4::new(1.0, 0.0, 0.0, 1.0)];
        let prev = vec![Vec4::new(0.0, 0.0, 0.0, 1.0)];
        sleep.update(&cur, &prev, 0.005);
        assert_eq!(sleep.pass_counter, 0);
        assert_eq!(sleep.test_counter, 4);
    }

    #[test]
    fn default_interval_never_tests() {
        let mut sleep = SleepState::default();
        let particles = vec![Vec4::ZERO];
        for _ in 0..100 {
            sleep.update(&particles, &particles, 0.01);
        }
        assert_eq!(sleep.pass_counter, 0);
    }
}
