use lavoe_transport::TICK_MEASURES;

/// One clock advance: the position before and after, before wrapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub prev: f64,
    pub next: f64,
}

/// Transport position in measures, advanced in quarter-measure steps and
/// wrapped back to 0 at the end of the timeline.
#[derive(Debug, Clone)]
pub struct Clock {
    position: f64,
    total_measures: f64,
}

impl Clock {
    pub fn new(total_measures: f64) -> Self {
        Self {
            position: 0.0,
            total_measures,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn total_measures(&self) -> f64 {
        self.total_measures
    }

    pub fn next_step(&self) -> Step {
        Step {
            prev: self.position,
            next: self.position + TICK_MEASURES,
        }
    }

    /// Move to `step.next`, wrapping to exactly 0 when it reaches the end.
    /// Returns whether the clock wrapped.
    pub fn commit(&mut self, step: Step) -> bool {
        if step.next >= self.total_measures {
            self.position = 0.0;
            true
        } else {
            self.position = step.next;
            false
        }
    }

    /// Direct placement (scrub, reset). Clamped to `[0, total_measures]`.
    pub fn set(&mut self, position: f64) {
        let upper = self.total_measures.max(0.0);
        self.position = position.clamp(0.0, upper);
    }

    /// Relative jump, clamped to `[0, total_measures - 1]`.
    pub fn seek_relative(&mut self, delta: f64) -> f64 {
        let upper = (self.total_measures - 1.0).max(0.0);
        self.position = (self.position + delta).clamp(0.0, upper);
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_by_quarter_measure() {
        let mut clock = Clock::new(64.0);
        let step = clock.next_step();
        assert_eq!(step, Step { prev: 0.0, next: 0.25 });
        assert!(!clock.commit(step));
        assert_eq!(clock.position(), 0.25);
    }

    #[test]
    fn test_wraps_to_exactly_zero() {
        let mut clock = Clock::new(2.0);
        clock.set(1.75);
        let step = clock.next_step();
        assert_eq!(step.next, 2.0);
        assert!(clock.commit(step));
        assert_eq!(clock.position(), 0.0);
    }

    #[test]
    fn test_wrap_from_past_the_end() {
        let mut clock = Clock::new(4.0);
        clock.set(4.0);
        assert!(clock.commit(clock.next_step()));
        assert_eq!(clock.position(), 0.0);
    }

    #[test]
    fn test_set_clamps_to_timeline() {
        let mut clock = Clock::new(64.0);
        clock.set(80.0);
        assert_eq!(clock.position(), 64.0);
        clock.set(-3.0);
        assert_eq!(clock.position(), 0.0);
    }

    #[test]
    fn test_seek_relative_clamps_below_last_measure() {
        let mut clock = Clock::new(64.0);
        clock.set(60.0);
        assert_eq!(clock.seek_relative(8.0), 63.0);
        assert_eq!(clock.seek_relative(-8.0), 55.0);
        clock.set(3.0);
        assert_eq!(clock.seek_relative(-8.0), 0.0);
    }

    #[test]
    fn test_degenerate_length_does_not_panic() {
        let mut clock = Clock::new(-4.0);
        clock.set(2.0);
        assert_eq!(clock.position(), 0.0);
        assert_eq!(clock.seek_relative(1.0), 0.0);

        let mut clock = Clock::new(f64::NAN);
        clock.set(2.0);
        assert_eq!(clock.position(), 0.0);
    }
}
