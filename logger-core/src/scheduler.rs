//! Periodic logger alarm scheduling with grid alignment, drift correction and
//! a silence failsafe.
//!
//! Targets always sit on multiples of the sampling interval so consecutive
//! samples line up with the wall clock. Three recovery paths keep the cadence
//! alive when the alarm path misbehaves:
//!
//! * [`AlarmScheduler::should_fire`] also fires on a plain `now >= next`
//!   comparison, covering an interrupt that never arrived;
//! * [`AlarmScheduler::sanity`] realigns a target that drifted implausibly far
//!   ahead (typically after the clock was set);
//! * [`AlarmScheduler::failsafe_check`] forces a reschedule and an out-of-band
//!   sample after too long without service.
//!
//! Every comparison uses wrapping subtraction so the logic keeps working
//! across a 32-bit epoch rollover.

use crate::config::SchedulerConfig;
use crate::time_source::{AlarmPort, Epoch, is_due, seconds_between};

/// Scheduling state owned exclusively by the [`AlarmScheduler`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ScheduleState {
    next_epoch: Option<Epoch>,
    elapsed_base: Option<Epoch>,
    last_serviced: Epoch,
    alarm_armed: bool,
}

/// Target change applied by [`AlarmScheduler::sanity`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Realignment {
    pub previous: Epoch,
    pub next: Epoch,
}

/// Smallest multiple of `interval` strictly after `now`.
pub const fn next_grid_after(now: Epoch, interval: u32) -> Epoch {
    now.wrapping_sub(now % interval).wrapping_add(interval)
}

/// Grid-aligned alarm scheduler for logger mode.
#[derive(Clone, Debug)]
pub struct AlarmScheduler {
    config: SchedulerConfig,
    state: ScheduleState,
}

impl AlarmScheduler {
    pub const fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            state: ScheduleState {
                next_epoch: None,
                elapsed_base: None,
                last_serviced: 0,
                alarm_armed: false,
            },
        }
    }

    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub const fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Starts a schedule at the first grid slot after `start`, treating `start`
    /// itself as serviced.
    pub fn init<A: AlarmPort>(&mut self, alarm: &mut A, start: Epoch) {
        if !alarm.has_hardware_alarm() {
            return;
        }
        let next = next_grid_after(start, self.config.interval());
        self.state.next_epoch = Some(next);
        self.state.elapsed_base = Some(next);
        self.state.last_serviced = start;
        self.program(alarm, next);
    }

    /// Drops the schedule, e.g. when leaving logger mode.
    pub fn reset(&mut self) {
        self.state = ScheduleState::default();
    }

    /// `true` when the alarm latched or `now` has reached the target.
    pub fn should_fire<A: AlarmPort>(&mut self, alarm: &mut A, now: Epoch) -> bool {
        if !alarm.has_hardware_alarm() {
            return false;
        }
        let Some(next) = self.state.next_epoch else {
            return false;
        };
        alarm.fired() || is_due(now, next)
    }

    /// Moves the target to the first grid slot strictly after `now`, skipping
    /// any slots that were missed, and re-arms. Call before sampling.
    ///
    /// Wrapped comparisons only order epochs less than half the `u32` range
    /// apart. After a forward gap of 2^31 s or more `now` reads as lying before
    /// the target, which is then kept; [`sanity`](Self::sanity) in the same
    /// tick sees it as too far ahead and realigns after `now`.
    pub fn advance_after_fire<A: AlarmPort>(&mut self, alarm: &mut A, now: Epoch) {
        if !alarm.has_hardware_alarm() {
            return;
        }
        let Some(mut next) = self.state.next_epoch else {
            return;
        };
        alarm.clear();

        if is_due(now, next) {
            let interval = self.config.interval();
            let missed = seconds_between(next, now) / interval + 1;
            next = next.wrapping_add(missed.wrapping_mul(interval));
        }
        self.state.next_epoch = Some(next);
        self.program(alarm, next);
    }

    /// Records that a sample was attempted at `now`.
    pub fn mark_sample(&mut self, now: Epoch) {
        self.state.last_serviced = now;
    }

    /// Realigns a target that sits more than the look-ahead bound in the
    /// future. A due target is left alone for the fire path.
    pub fn sanity<A: AlarmPort>(&mut self, alarm: &mut A, now: Epoch) -> Option<Realignment> {
        if !alarm.has_hardware_alarm() {
            return None;
        }
        let previous = self.state.next_epoch?;
        if previous != now && is_due(now, previous) {
            return None;
        }
        if seconds_between(now, previous) <= self.config.max_ahead() {
            return None;
        }

        let next = next_grid_after(now, self.config.interval());
        self.state.next_epoch = Some(next);
        self.state.elapsed_base = Some(next);
        self.program(alarm, next);
        Some(Realignment { previous, next })
    }

    /// Forces a reschedule when nothing was serviced for longer than the
    /// failsafe window. Returns `true` when the caller must sample now.
    pub fn failsafe_check<A: AlarmPort>(&mut self, alarm: &mut A, now: Epoch) -> bool {
        let Some(window) = self.config.failsafe() else {
            return false;
        };
        if !alarm.has_hardware_alarm() || self.state.next_epoch.is_none() {
            return false;
        }
        if seconds_between(self.state.last_serviced, now) <= window {
            return false;
        }

        let next = next_grid_after(now, self.config.interval());
        self.state.next_epoch = Some(next);
        self.program(alarm, next);
        self.state.last_serviced = now;
        true
    }

    /// Current target epoch, 0 when nothing is scheduled.
    pub fn next_epoch(&self) -> Epoch {
        self.state.next_epoch.unwrap_or(0)
    }

    /// Anchor for the elapsed-time display, 0 when unset.
    pub fn base_epoch(&self) -> Epoch {
        self.state.elapsed_base.unwrap_or(0)
    }

    pub fn last_serviced_epoch(&self) -> Epoch {
        self.state.last_serviced
    }

    /// `false` when the last attempt to program the hardware alarm failed; the
    /// polling comparison in [`should_fire`](Self::should_fire) still covers the
    /// target.
    pub fn alarm_armed(&self) -> bool {
        self.state.alarm_armed
    }

    /// Seconds elapsed since the display anchor, 0 before the anchor.
    pub fn elapsed_since_base(&self, now: Epoch) -> u32 {
        match self.state.elapsed_base {
            Some(base) if base != now && is_due(now, base) => seconds_between(base, now),
            _ => 0,
        }
    }

    fn program<A: AlarmPort>(&mut self, alarm: &mut A, epoch: Epoch) {
        self.state.alarm_armed = alarm.arm(epoch);
    }
}

impl Default for AlarmScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::DEFAULT)
    }
}

/// Logger cadence for boards without a hardware clock.
///
/// Time is measured in awake milliseconds plus seconds credited by completed
/// sleep quanta, since the millisecond counter does not run while suspended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SoftwareCadence {
    interval: u32,
    mode_start_ms: u32,
    mode_slept_secs: u32,
    last_sample_ms: Option<u32>,
    slept_since_sample: u32,
}

impl SoftwareCadence {
    pub const fn new(interval: u32) -> Self {
        Self {
            interval,
            mode_start_ms: 0,
            mode_slept_secs: 0,
            last_sample_ms: None,
            slept_since_sample: 0,
        }
    }

    /// Restarts the cadence on logger entry; the next check is due at once.
    pub fn start(&mut self, now_ms: u32) {
        *self = Self {
            mode_start_ms: now_ms,
            ..Self::new(self.interval)
        };
    }

    pub fn is_due(&self, now_ms: u32) -> bool {
        self.last_sample_ms.is_none() || self.since_sample(now_ms) >= self.interval
    }

    pub fn mark_sample(&mut self, now_ms: u32) {
        self.last_sample_ms = Some(now_ms);
        self.slept_since_sample = 0;
    }

    /// Seconds left until the next sample, 0 when due.
    pub fn remaining(&self, now_ms: u32) -> u32 {
        if self.last_sample_ms.is_none() {
            return 0;
        }
        self.interval.saturating_sub(self.since_sample(now_ms))
    }

    /// Credits a countdown; a countdown that ran to completion forces the next
    /// sample.
    pub fn credit_sleep(&mut self, slept_secs: u32, completed: bool) {
        self.mode_slept_secs = self.mode_slept_secs.wrapping_add(slept_secs);
        self.slept_since_sample = self.slept_since_sample.saturating_add(slept_secs);
        if completed {
            self.last_sample_ms = None;
        }
    }

    /// Seconds spent in logger mode, for the elapsed display.
    pub fn elapsed_in_mode(&self, now_ms: u32) -> u32 {
        (now_ms.wrapping_sub(self.mode_start_ms) / 1_000).wrapping_add(self.mode_slept_secs)
    }

    fn since_sample(&self, now_ms: u32) -> u32 {
        self.last_sample_ms.map_or(0, |last| {
            (now_ms.wrapping_sub(last) / 1_000).saturating_add(self.slept_since_sample)
        })
    }
}
