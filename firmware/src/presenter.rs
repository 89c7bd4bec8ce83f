//! Log-backed presenter.
//!
//! The board has no sensor or display drivers of its own yet, so samples and
//! clock refreshes are written to the log sink in the same shape the display
//! would show them.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::fmt;

use logger_core::controller::{Presenter, SampleContext};
use logger_core::mode::DeviceMode;
use logger_core::time_source::{ClockKind, Epoch};

use crate::rtc::CalendarTime;
use crate::telemetry::emit_line;

/// Seconds rendered as `HH:MM:SS`; hours keep counting past 24.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Hms(pub u32);

impl fmt::Display for Hms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0;
        write!(
            f,
            "{:02}:{:02}:{:02}",
            secs / 3_600,
            secs % 3_600 / 60,
            secs % 60
        )
    }
}

/// What the clock face shows for a given reading.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockFace {
    pub now: Epoch,
    pub clock: ClockKind,
}

impl fmt::Display for ClockFace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.clock, CalendarTime::from_epoch(self.now)) {
            (ClockKind::Hardware, Some(time)) => write!(
                f,
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                time.year, time.month, time.day, time.hour, time.minute, time.second
            ),
            (ClockKind::Hardware, None) => write!(f, "epoch {}", self.now),
            // Without a hardware clock the counter is uptime, not wall time.
            (ClockKind::Software, _) => write!(f, "up {}", Hms(self.now)),
        }
    }
}

const fn clock_label(clock: ClockKind) -> &'static str {
    match clock {
        ClockKind::Hardware => "rtc",
        ClockKind::Software => "no-rtc",
    }
}

pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn announce_mode(&mut self, mode: DeviceMode, clock: ClockKind) {
        emit_line(&format_args!(
            "mode: {} ({})",
            mode.label(),
            clock_label(clock)
        ));
    }

    fn take_sample(&mut self, sample: &SampleContext) {
        emit_line(&format_args!(
            "sample: {} at {} elapsed {}",
            sample.trigger.label(),
            ClockFace {
                now: sample.epoch,
                clock: sample.clock,
            },
            Hms(sample.elapsed_secs)
        ));
    }

    fn show_clock(&mut self, now: Epoch, clock: ClockKind) {
        emit_line(&format_args!("clock: {}", ClockFace { now, clock }));
    }
}
