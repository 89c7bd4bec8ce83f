//! Debounced arbitration between clock mode and logger mode.
//!
//! The slide switch is sampled once per loop iteration. A new level must hold
//! for the debounce window before it becomes the stable mode; the promotion
//! raises the [`WakeSignal::ModeSwitch`] flag, which is the pending-transition
//! signal. The transition is honoured only outside the re-entry guard window
//! after the previous entry, otherwise the signal is discarded. After an
//! honoured entry the switch's edge source stays masked for the suppression
//! window.

use crate::config::ModeTiming;
use crate::wake::{WakeFlags, WakeSignal};

/// Operating mode selected by the slide switch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceMode {
    /// Wall clock display refreshed by the 1 Hz tick.
    Clock,
    /// Periodic environmental logger driven by the alarm scheduler.
    Logger,
}

impl DeviceMode {
    /// Switch pulled low selects the logger.
    pub const fn from_switch_level(high: bool) -> Self {
        if high {
            DeviceMode::Clock
        } else {
            DeviceMode::Logger
        }
    }

    pub const fn as_raw(self) -> u8 {
        match self {
            DeviceMode::Clock => 0,
            DeviceMode::Logger => 1,
        }
    }

    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => DeviceMode::Clock,
            _ => DeviceMode::Logger,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            DeviceMode::Clock => "clock",
            DeviceMode::Logger => "logger",
        }
    }
}

/// Outcome of one [`ModeStateMachine::evaluate`] call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ModeTransition {
    /// Nothing changed.
    None,
    /// The raw input differs from the stable mode but has not held long enough.
    Debouncing,
    /// A pending transition arrived inside the re-entry guard and was dropped.
    Discarded,
    /// The device switched to the contained mode.
    Entered(DeviceMode),
}

/// Result reported to the control loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ModeEvaluation {
    pub stable_mode: DeviceMode,
    pub active_mode: DeviceMode,
    pub transition: ModeTransition,
}

impl ModeEvaluation {
    pub const fn transitioned(&self) -> bool {
        matches!(self.transition, ModeTransition::Entered(_))
    }
}

/// Switch mask change requested by [`ModeStateMachine::maintain_mask`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MaskUpdate {
    Unchanged,
    Release,
}

/// Debounce bookkeeping, owned by the [`ModeStateMachine`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ModeState {
    pub stable_mode: DeviceMode,
    pub active_mode: DeviceMode,
    pub raw_mode_last_seen: DeviceMode,
    pub last_stable_change_ms: u32,
    pub last_mode_enter_ms: u32,
    pub switch_masked: bool,
}

pub struct ModeStateMachine {
    timing: ModeTiming,
    state: ModeState,
}

impl ModeStateMachine {
    /// Takes the boot reading as stable and active immediately. Boot counts as
    /// a mode entry, so the switch starts out masked.
    pub const fn new(timing: ModeTiming, initial: DeviceMode, now_ms: u32) -> Self {
        Self {
            timing,
            state: ModeState {
                stable_mode: initial,
                active_mode: initial,
                raw_mode_last_seen: initial,
                last_stable_change_ms: now_ms,
                last_mode_enter_ms: now_ms,
                switch_masked: true,
            },
        }
    }

    pub const fn state(&self) -> &ModeState {
        &self.state
    }

    pub const fn active_mode(&self) -> DeviceMode {
        self.state.active_mode
    }

    pub const fn stable_mode(&self) -> DeviceMode {
        self.state.stable_mode
    }

    /// Runs the debounce and transition rules for one loop iteration.
    pub fn evaluate(&mut self, raw: DeviceMode, now_ms: u32, flags: &WakeFlags) -> ModeEvaluation {
        let state = &mut self.state;
        let mut transition = ModeTransition::None;

        if raw == state.stable_mode {
            state.raw_mode_last_seen = raw;
            state.last_stable_change_ms = now_ms;
        } else {
            if raw != state.raw_mode_last_seen {
                state.raw_mode_last_seen = raw;
                state.last_stable_change_ms = now_ms;
            }
            if now_ms.wrapping_sub(state.last_stable_change_ms) >= self.timing.debounce_ms() {
                state.stable_mode = raw;
                state.last_stable_change_ms = now_ms;
                flags.raise(WakeSignal::ModeSwitch);
            } else {
                transition = ModeTransition::Debouncing;
            }
        }

        if flags.take(WakeSignal::ModeSwitch) && state.stable_mode != state.active_mode {
            if now_ms.wrapping_sub(state.last_mode_enter_ms) >= self.timing.reentry_guard_ms() {
                state.active_mode = state.stable_mode;
                state.last_mode_enter_ms = now_ms;
                state.switch_masked = true;
                transition = ModeTransition::Entered(state.active_mode);
            } else {
                transition = ModeTransition::Discarded;
            }
        }

        ModeEvaluation {
            stable_mode: state.stable_mode,
            active_mode: state.active_mode,
            transition,
        }
    }

    /// Releases the switch mask once the suppression window has elapsed.
    pub fn maintain_mask(&mut self, now_ms: u32) -> MaskUpdate {
        if self.state.switch_masked
            && now_ms.wrapping_sub(self.state.last_mode_enter_ms) >= self.timing.suppress_ms()
        {
            self.state.switch_masked = false;
            MaskUpdate::Release
        } else {
            MaskUpdate::Unchanged
        }
    }

    pub const fn switch_masked(&self) -> bool {
        self.state.switch_masked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(initial: DeviceMode) -> ModeStateMachine {
        ModeStateMachine::new(ModeTiming::DEFAULT, initial, 0)
    }

    #[test]
    fn boot_reading_is_stable_immediately() {
        let flags = WakeFlags::new();
        let mut machine = machine(DeviceMode::Logger);
        let eval = machine.evaluate(DeviceMode::Logger, 0, &flags);
        assert_eq!(eval.stable_mode, DeviceMode::Logger);
        assert_eq!(eval.transition, ModeTransition::None);
        assert!(machine.switch_masked());
        assert_eq!(machine.maintain_mask(120), MaskUpdate::Release);
    }

    #[test]
    fn debounce_measures_continuous_difference() {
        let flags = WakeFlags::new();
        let mut machine = machine(DeviceMode::Clock);

        // Long quiet period, then the switch moves.
        machine.evaluate(DeviceMode::Clock, 1_000, &flags);
        let eval = machine.evaluate(DeviceMode::Logger, 9_000, &flags);
        assert_eq!(eval.transition, ModeTransition::Debouncing);

        let eval = machine.evaluate(DeviceMode::Logger, 9_079, &flags);
        assert_eq!(eval.transition, ModeTransition::Debouncing);

        let eval = machine.evaluate(DeviceMode::Logger, 9_080, &flags);
        assert_eq!(eval.transition, ModeTransition::Entered(DeviceMode::Logger));
        assert!(eval.transitioned());
        assert!(machine.switch_masked());
    }

    #[test]
    fn bounce_back_restarts_debounce() {
        let flags = WakeFlags::new();
        let mut machine = machine(DeviceMode::Clock);

        machine.evaluate(DeviceMode::Logger, 1_000, &flags);
        machine.evaluate(DeviceMode::Clock, 1_050, &flags);
        let eval = machine.evaluate(DeviceMode::Logger, 1_100, &flags);
        assert_eq!(eval.transition, ModeTransition::Debouncing);
        let eval = machine.evaluate(DeviceMode::Logger, 1_170, &flags);
        assert_eq!(eval.transition, ModeTransition::Debouncing);
        let eval = machine.evaluate(DeviceMode::Logger, 1_180, &flags);
        assert!(eval.transitioned());
    }

    #[test]
    fn transition_inside_guard_is_discarded() {
        let flags = WakeFlags::new();
        let mut machine = machine(DeviceMode::Clock);

        machine.evaluate(DeviceMode::Logger, 10, &flags);
        let eval = machine.evaluate(DeviceMode::Logger, 100, &flags);
        assert_eq!(eval.stable_mode, DeviceMode::Logger);
        assert_eq!(eval.transition, ModeTransition::Discarded);
        assert_eq!(machine.active_mode(), DeviceMode::Clock);
        assert!(!flags.is_raised(WakeSignal::ModeSwitch));

        // Not queued: nothing happens once the guard expires on its own.
        let eval = machine.evaluate(DeviceMode::Logger, 1_000, &flags);
        assert_eq!(eval.transition, ModeTransition::None);
        assert_eq!(eval.active_mode, DeviceMode::Clock);

        // A later switch edge re-raises the pending signal.
        flags.raise(WakeSignal::ModeSwitch);
        let eval = machine.evaluate(DeviceMode::Logger, 1_010, &flags);
        assert_eq!(eval.transition, ModeTransition::Entered(DeviceMode::Logger));
    }

    #[test]
    fn switch_edge_without_mode_change_is_consumed() {
        let flags = WakeFlags::new();
        let mut machine = machine(DeviceMode::Clock);
        flags.raise(WakeSignal::ModeSwitch);

        let eval = machine.evaluate(DeviceMode::Clock, 500, &flags);
        assert_eq!(eval.transition, ModeTransition::None);
        assert!(!flags.is_raised(WakeSignal::ModeSwitch));
    }

    #[test]
    fn mask_released_after_suppression_window() {
        let flags = WakeFlags::new();
        let mut machine = machine(DeviceMode::Clock);

        machine.evaluate(DeviceMode::Logger, 1_000, &flags);
        machine.evaluate(DeviceMode::Logger, 1_080, &flags);
        assert!(machine.switch_masked());

        assert_eq!(machine.maintain_mask(1_199), MaskUpdate::Unchanged);
        assert_eq!(machine.maintain_mask(1_200), MaskUpdate::Release);
        assert!(!machine.switch_masked());
        assert_eq!(machine.maintain_mask(1_300), MaskUpdate::Unchanged);
    }

    #[test]
    fn millisecond_counter_rollover_keeps_debounce() {
        let flags = WakeFlags::new();
        let start = u32::MAX - 40;
        let mut machine = ModeStateMachine::new(ModeTiming::DEFAULT, DeviceMode::Clock, start - 400);

        machine.evaluate(DeviceMode::Logger, start, &flags);
        let eval = machine.evaluate(DeviceMode::Logger, start.wrapping_add(79), &flags);
        assert_eq!(eval.transition, ModeTransition::Debouncing);
        let eval = machine.evaluate(DeviceMode::Logger, start.wrapping_add(80), &flags);
        assert!(eval.transitioned());
    }
}
