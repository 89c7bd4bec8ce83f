//! Auxiliary button, backlight timer and keep-awake window.
//!
//! Millisecond comparisons here use the signed reading of the wrapped
//! difference, so they stay correct across a counter rollover as long as the
//! windows are far shorter than half the counter range.

use core::time::Duration;

use crate::config::millis;
use crate::time_source::Epoch;

/// Backlight auto-off timer on the seconds time base.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Backlight {
    lit_since: Option<Epoch>,
}

impl Backlight {
    pub const fn new() -> Self {
        Self { lit_since: None }
    }

    pub const fn is_active(&self) -> bool {
        self.lit_since.is_some()
    }

    /// (Re)starts the timer at `now`.
    pub fn turn_on(&mut self, now: Epoch) {
        self.lit_since = Some(now);
    }

    /// Switches off once `duration_secs` have passed. Returns `true` on the
    /// call that switched it off.
    #[allow(clippy::cast_possible_wrap)]
    pub fn maintain(&mut self, now: Epoch, duration_secs: u32) -> bool {
        match self.lit_since {
            Some(start) if now.wrapping_sub(start) as i32 >= duration_secs as i32 => {
                self.lit_since = None;
                true
            }
            _ => false,
        }
    }
}

/// Minimum spacing between accepted button presses.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ButtonDebounce {
    last_handled_ms: Option<u32>,
}

impl ButtonDebounce {
    pub const fn new() -> Self {
        Self {
            last_handled_ms: None,
        }
    }

    /// Accepts a press when more than `debounce` has passed since the last
    /// accepted one.
    pub fn accept(&mut self, now_ms: u32, debounce: Duration) -> bool {
        let ready = match self.last_handled_ms {
            Some(last) => now_ms.wrapping_sub(last) > millis(debounce),
            None => true,
        };
        if ready {
            self.last_handled_ms = Some(now_ms);
        }
        ready
    }
}

/// Window during which the loop stays awake to service serial input.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct KeepAwake {
    until_ms: Option<u32>,
}

impl KeepAwake {
    pub const fn new() -> Self {
        Self { until_ms: None }
    }

    /// Extends the window to at least `now_ms + window`.
    pub fn extend(&mut self, now_ms: u32, window: Duration) {
        let candidate = now_ms.wrapping_add(millis(window));
        self.until_ms = match self.until_ms {
            Some(current) if remaining(current, now_ms) > remaining(candidate, now_ms) => {
                Some(current)
            }
            _ => Some(candidate),
        };
    }

    pub fn is_active(&self, now_ms: u32) -> bool {
        self.until_ms
            .is_some_and(|until| remaining(until, now_ms) > 0)
    }

    pub fn clear(&mut self) {
        self.until_ms = None;
    }
}

#[allow(clippy::cast_possible_wrap)]
fn remaining(until_ms: u32, now_ms: u32) -> i32 {
    until_ms.wrapping_sub(now_ms) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlight_turns_off_after_duration() {
        let mut backlight = Backlight::new();
        backlight.turn_on(1_000);
        assert!(!backlight.maintain(1_009, 10));
        assert!(backlight.is_active());
        assert!(backlight.maintain(1_010, 10));
        assert!(!backlight.is_active());
        assert!(!backlight.maintain(1_020, 10));
    }

    #[test]
    fn backlight_survives_epoch_rollover() {
        let mut backlight = Backlight::new();
        backlight.turn_on(u32::MAX - 3);
        assert!(!backlight.maintain(2, 10));
        assert!(backlight.maintain(6, 10));
    }

    #[test]
    fn button_presses_closer_than_debounce_are_rejected() {
        let debounce = Duration::from_millis(150);
        let mut button = ButtonDebounce::new();
        assert!(button.accept(10, debounce));
        assert!(!button.accept(160, debounce));
        assert!(button.accept(161, debounce));
    }

    #[test]
    fn keep_awake_keeps_the_later_deadline() {
        let mut awake = KeepAwake::new();
        assert!(!awake.is_active(0));

        awake.extend(1_000, Duration::from_millis(1_500));
        awake.extend(1_100, Duration::from_millis(1_200));
        assert!(awake.is_active(2_499));
        assert!(!awake.is_active(2_500));
    }

    #[test]
    fn keep_awake_across_millisecond_rollover() {
        let mut awake = KeepAwake::new();
        let now = u32::MAX - 100;
        awake.extend(now, Duration::from_millis(1_200));
        assert!(awake.is_active(now.wrapping_add(1_199)));
        assert!(!awake.is_active(now.wrapping_add(1_200)));
    }
}
