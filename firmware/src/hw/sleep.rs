//! Bounded suspend on top of the embassy timer.
//!
//! The executor idles in WFI while the timer runs; any edge or serial byte
//! signals [`WAKE`](crate::runtime::WAKE) and ends the quantum early. Time
//! spent here is subtracted from the awake clock.

use embassy_futures::select::select;
use embassy_time::{Duration, Instant, Timer};
use logger_core::sleep::{SleepPrimitive, SleepQuantum};
use portable_atomic::Ordering;

use crate::runtime::{SLEPT_MS, WakeNotifier};

pub struct TimerSleep {
    wake: &'static WakeNotifier,
}

impl TimerSleep {
    pub const fn new(wake: &'static WakeNotifier) -> Self {
        Self { wake }
    }
}

impl SleepPrimitive for TimerSleep {
    #[allow(clippy::cast_possible_truncation)]
    async fn suspend(&mut self, quantum: SleepQuantum) {
        let started = Instant::now();
        let timeout = Duration::from_secs(u64::from(quantum.secs()));
        select(Timer::after(timeout), self.wake.wait()).await;

        let slept = Instant::now().saturating_duration_since(started).as_millis();
        SLEPT_MS.fetch_add(slept as u32, Ordering::AcqRel);
    }
}
