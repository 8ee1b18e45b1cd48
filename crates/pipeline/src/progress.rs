//! Overall progress across the image and video phases.

/// Maps phase-local percentages onto one overall `[0, 100]` scale.
///
/// The image phase owns `[0, share * 100]`, the video phase the rest. The
/// overall value never decreases.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    image_share: f64,
    current: f64,
}

impl ProgressTracker {
    pub fn new(image_share: f64) -> Self {
        Self {
            image_share: image_share.clamp(0.0, 1.0),
            current: 0.0,
        }
    }

    /// Overall progress so far.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Record image-phase progress. Returns the new overall value if it moved.
    pub fn image(&mut self, phase_percent: f64) -> Option<f64> {
        let overall = clamp_percent(phase_percent) * self.image_share;
        self.advance(overall)
    }

    /// Record video-phase progress. Returns the new overall value if it moved.
    pub fn video(&mut self, phase_percent: f64) -> Option<f64> {
        let base = self.image_share * 100.0;
        let overall = base + clamp_percent(phase_percent) * (1.0 - self.image_share);
        self.advance(overall)
    }

    /// Pin progress to exactly 100.
    pub fn finish(&mut self) -> f64 {
        self.current = 100.0;
        self.current
    }

    fn advance(&mut self, overall: f64) -> Option<f64> {
        let overall = overall.min(100.0);
        if overall > self.current {
            self.current = overall;
            Some(overall)
        } else {
            None
        }
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_split_the_range() {
        let mut tracker = ProgressTracker::new(0.8);
        assert_eq!(tracker.image(50.0), Some(40.0));
        assert_eq!(tracker.image(100.0), Some(80.0));
        assert_eq!(tracker.video(50.0), Some(90.0));
        assert_eq!(tracker.finish(), 100.0);
    }

    #[test]
    fn test_never_decreases() {
        let mut tracker = ProgressTracker::new(0.5);
        tracker.video(10.0);
        let high = tracker.current();
        assert_eq!(tracker.image(100.0), None);
        assert_eq!(tracker.video(5.0), None);
        assert_eq!(tracker.video(f64::NAN), None);
        assert_eq!(tracker.current(), high);
    }

    #[test]
    fn test_all_image_share() {
        let mut tracker = ProgressTracker::new(1.0);
        assert_eq!(tracker.image(100.0), Some(100.0));
        assert_eq!(tracker.video(100.0), None);
    }
}
