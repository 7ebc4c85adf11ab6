// Button Monitor Module
// Measures continuous-press duration on the reset input and reports when a
// deliberate long press crosses the reset threshold.

/// Hold duration that distinguishes a reset request from an incidental press.
pub const RESET_HOLD_MS: u64 = 5000;

/// Press-duration state machine, fed one input sample per loop iteration.
///
/// `press_start` of `None` means the button is not held; `long_press_fired`
/// prevents repeated triggers while the operator keeps holding after the
/// threshold. Both reset the instant a released sample arrives.
#[derive(Debug, Default)]
pub struct ButtonMonitor {
    press_start: Option<u64>,
    long_press_fired: bool,
}

impl ButtonMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample. Returns true exactly once per hold, when the
    /// unbroken run of pressed samples exceeds [`RESET_HOLD_MS`].
    pub fn sample(&mut self, pressed: bool, now_ms: u64) -> bool {
        if !pressed {
            // A short press that never crossed the threshold leaves no
            // residue; a new hold can trigger again later.
            self.press_start = None;
            self.long_press_fired = false;
            return false;
        }

        match self.press_start {
            None => {
                self.press_start = Some(now_ms);
                false
            }
            Some(start) => {
                if !self.long_press_fired && now_ms.saturating_sub(start) > RESET_HOLD_MS {
                    self.long_press_fired = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn is_held(&self) -> bool {
        self.press_start.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_press_never_fires() {
        let mut monitor = ButtonMonitor::new();
        for t in (0..4000).step_by(100) {
            assert!(!monitor.sample(true, t));
        }
        assert!(!monitor.sample(false, 4000));
        assert!(!monitor.is_held());
    }

    #[test]
    fn long_press_fires_exactly_once() {
        let mut monitor = ButtonMonitor::new();
        let mut fired = 0;
        for t in (0..=7000).step_by(100) {
            if monitor.sample(true, t) {
                fired += 1;
                // First sample past the threshold relative to press start.
                assert_eq!(t, 5100);
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn release_resets_and_allows_a_second_hold() {
        let mut monitor = ButtonMonitor::new();
        for t in (0..=5200).step_by(100) {
            monitor.sample(true, t);
        }
        assert!(!monitor.sample(false, 5300));

        // Fresh hold starting later fires again relative to its own start.
        let mut fired = false;
        for t in (10_000..=15_200).step_by(100) {
            fired |= monitor.sample(true, t);
        }
        assert!(fired);
    }

    #[test]
    fn threshold_is_strict() {
        let mut monitor = ButtonMonitor::new();
        assert!(!monitor.sample(true, 0));
        assert!(!monitor.sample(true, RESET_HOLD_MS));
        assert!(monitor.sample(true, RESET_HOLD_MS + 1));
    }

    #[test]
    fn release_mid_hold_discards_accumulated_time() {
        let mut monitor = ButtonMonitor::new();
        assert!(!monitor.sample(true, 0));
        assert!(!monitor.sample(true, 4900));
        assert!(!monitor.sample(false, 5000));
        // 4900 ms of the old hold must not count toward the new one.
        assert!(!monitor.sample(true, 5100));
        assert!(!monitor.sample(true, 10_000));
        assert!(monitor.sample(true, 10_200));
    }
}
