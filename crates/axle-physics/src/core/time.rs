/// Fixed timestep accumulator.
/// Drives the world's fixed-rate mode: frame deltas go in, whole slices come out.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    /// The fixed delta time per slice.
    dt: f32,
    /// Accumulated time from variable frame deltas.
    accumulator: f32,
    /// Optional cap on slices per frame. `None` drains everything.
    max_steps: Option<u32>,
}

impl FixedTimestep {
    pub fn new(dt: f32) -> Self {
        Self {
            dt,
            accumulator: 0.0,
            max_steps: None,
        }
    }

    /// Cap the number of slices produced by one `accumulate` call.
    /// Excess time is dropped rather than carried over.
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// Add frame time to the accumulator. Returns the number of fixed slices to run.
    pub fn accumulate(&mut self, frame_dt: f32) -> u32 {
        self.accumulator += frame_dt;
        if let Some(max) = self.max_steps {
            self.accumulator = self.accumulator.min(self.dt * max as f32);
        }
        // Tolerate float drift so that exact multiples of dt are not lost.
        let steps = ((self.accumulator + self.dt * 1e-4) / self.dt) as u32;
        self.accumulator = (self.accumulator - steps as f32 * self.dt).max(0.0);
        steps
    }

    /// Fraction of a slice left in the accumulator (0.0 to 1.0).
    pub fn alpha(&self) -> f32 {
        self.accumulator / self.dt
    }

    /// The fixed delta time.
    pub fn dt(&self) -> f32 {
        self.dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_step_exact() {
        let mut ts = FixedTimestep::new(1.0 / 60.0);
        let steps = ts.accumulate(1.0 / 60.0);
        assert_eq!(steps, 1);
    }

    #[test]
    fn accumulates_partial() {
        let mut ts = FixedTimestep::new(1.0 / 60.0);
        let steps = ts.accumulate(0.008); // half a slice
        assert_eq!(steps, 0);
        let steps = ts.accumulate(0.010); // over one slice total
        assert_eq!(steps, 1);
    }

    #[test]
    fn uncapped_drains_everything() {
        let mut ts = FixedTimestep::new(1.0 / 60.0);
        let steps = ts.accumulate(0.5);
        assert_eq!(steps, 30);
    }

    #[test]
    fn cap_limits_slices() {
        let mut ts = FixedTimestep::new(1.0 / 60.0).with_max_steps(10);
        let steps = ts.accumulate(1.0);
        assert_eq!(steps, 10);
        assert!(ts.alpha() < 1.0, "excess time must be dropped, alpha={}", ts.alpha());
    }

    #[test]
    fn alpha_is_between_zero_and_one() {
        let mut ts = FixedTimestep::new(1.0 / 60.0);
        ts.accumulate(0.008);
        let a = ts.alpha();
        assert!((0.0..=1.0).contains(&a), "alpha was {}", a);
    }
}
