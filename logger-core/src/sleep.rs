//! Bounded CPU suspension driven by the latched wake flags.
//!
//! The only blocking construct in the device is one sleep quantum. The
//! coordinator strings quanta together until a relevant wake signal is latched
//! (event-wait, used with a hardware clock) or until a seconds budget runs out
//! (countdown, used by the software fallback). A flag that is already latched
//! when a wait starts ends it immediately; the coordinator never clears flags,
//! the caller consumes what it acts on.

use core::time::Duration;

use crate::wake::{WakeFlags, WakeSignal, WakeSignalSet};

/// Sleep durations the power controller supports.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum SleepQuantum {
    S1,
    S2,
    S4,
    S8,
}

impl SleepQuantum {
    /// Longest supported quantum.
    pub const MAX: Self = SleepQuantum::S8;

    pub const fn secs(self) -> u32 {
        match self {
            SleepQuantum::S1 => 1,
            SleepQuantum::S2 => 2,
            SleepQuantum::S4 => 4,
            SleepQuantum::S8 => 8,
        }
    }

    pub const fn duration(self) -> Duration {
        match self {
            SleepQuantum::S1 => Duration::from_secs(1),
            SleepQuantum::S2 => Duration::from_secs(2),
            SleepQuantum::S4 => Duration::from_secs(4),
            SleepQuantum::S8 => Duration::from_secs(8),
        }
    }

    /// Largest quantum not exceeding `remaining` seconds.
    pub const fn largest_within(remaining: u32) -> Option<Self> {
        match remaining {
            0 => None,
            1 => Some(SleepQuantum::S1),
            2 | 3 => Some(SleepQuantum::S2),
            4..=7 => Some(SleepQuantum::S4),
            _ => Some(SleepQuantum::S8),
        }
    }
}

/// Platform hook that suspends the CPU.
#[allow(async_fn_in_trait)]
pub trait SleepPrimitive {
    /// Suspends for `quantum`, returning early when an edge handler raises a
    /// wake flag.
    async fn suspend(&mut self, quantum: SleepQuantum);
}

/// Why a sleep ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WakeCause {
    /// A relevant wake signal was latched; carries the highest-priority one.
    Signal(WakeSignal),
    /// The failsafe poll asked for an immediate sample.
    Failsafe,
    /// The countdown budget elapsed without a wake signal.
    BudgetElapsed,
}

/// Outcome of an event-wait.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WakeReport {
    pub cause: WakeCause,
    /// Relevant signals latched when the wait ended.
    pub signals: WakeSignalSet,
    /// Number of full or partial quanta spent suspended.
    pub quanta: u32,
}

/// Outcome of a countdown sleep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CountdownReport {
    /// `true` when the whole budget elapsed.
    pub completed: bool,
    /// Seconds credited: the sum of quanta that ran to completion.
    pub slept_secs: u32,
    pub signals: WakeSignalSet,
}

impl CountdownReport {
    pub fn cause(&self) -> WakeCause {
        match self.signals.primary() {
            Some(signal) if !self.completed => WakeCause::Signal(signal),
            _ => WakeCause::BudgetElapsed,
        }
    }
}

/// Decides how long to sleep and reports why the CPU resumed.
#[derive(Copy, Clone)]
pub struct SleepCoordinator<'a> {
    flags: &'a WakeFlags,
}

impl<'a> SleepCoordinator<'a> {
    pub const fn new(flags: &'a WakeFlags) -> Self {
        Self { flags }
    }

    /// Sleeps in maximum quanta until a relevant signal is latched. After each
    /// quantum that ends without a signal, `failsafe` is polled; when it
    /// returns `true` the wait ends so the caller can sample at once.
    pub async fn sleep_until_signal_or_failsafe<P, F>(
        &self,
        primitive: &mut P,
        relevant: WakeSignalSet,
        mut failsafe: F,
    ) -> WakeReport
    where
        P: SleepPrimitive,
        F: FnMut() -> bool,
    {
        let mut quanta = 0u32;
        loop {
            if let Some(report) = self.signalled(relevant, quanta) {
                return report;
            }
            primitive.suspend(SleepQuantum::MAX).await;
            quanta = quanta.saturating_add(1);

            if let Some(report) = self.signalled(relevant, quanta) {
                return report;
            }
            if failsafe() {
                return WakeReport {
                    cause: WakeCause::Failsafe,
                    signals: WakeSignalSet::EMPTY,
                    quanta,
                };
            }
        }
    }

    /// Event-wait without a failsafe poll.
    pub async fn sleep_until_signal<P: SleepPrimitive>(
        &self,
        primitive: &mut P,
        relevant: WakeSignalSet,
    ) -> WakeReport {
        self.sleep_until_signal_or_failsafe(primitive, relevant, || false)
            .await
    }

    /// Sleeps for up to `remaining` seconds in 8/4/2/1 s quanta, stopping early
    /// when a relevant signal is latched. An interrupted quantum is not
    /// credited.
    pub async fn sleep_countdown<P: SleepPrimitive>(
        &self,
        primitive: &mut P,
        remaining: u32,
        relevant: WakeSignalSet,
    ) -> CountdownReport {
        let mut left = remaining;
        let mut signals = self.flags.pending(relevant);

        while signals.is_empty() {
            let Some(quantum) = SleepQuantum::largest_within(left) else {
                break;
            };
            primitive.suspend(quantum).await;
            signals = self.flags.pending(relevant);
            if signals.is_empty() {
                left -= quantum.secs();
            }
        }

        CountdownReport {
            completed: left == 0,
            slept_secs: remaining - left,
            signals,
        }
    }

    fn signalled(&self, relevant: WakeSignalSet, quanta: u32) -> Option<WakeReport> {
        let signals = self.flags.pending(relevant);
        signals.primary().map(|signal| WakeReport {
            cause: WakeCause::Signal(signal),
            signals,
            quanta,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use embassy_futures::block_on;

    /// Records requested quanta and raises a flag on the chosen call.
    struct ScriptedSleep<'a> {
        flags: &'a WakeFlags,
        calls: heapless::Vec<SleepQuantum, 16>,
        raise_on: Option<(usize, WakeSignal)>,
    }

    impl<'a> ScriptedSleep<'a> {
        fn new(flags: &'a WakeFlags, raise_on: Option<(usize, WakeSignal)>) -> Self {
            Self {
                flags,
                calls: heapless::Vec::new(),
                raise_on,
            }
        }
    }

    impl SleepPrimitive for ScriptedSleep<'_> {
        async fn suspend(&mut self, quantum: SleepQuantum) {
            let index = self.calls.len();
            let _ = self.calls.push(quantum);
            if let Some((_, signal)) = self.raise_on.filter(|(at, _)| *at == index) {
                self.flags.raise(signal);
            }
        }
    }

    #[test]
    fn largest_quantum_decomposition() {
        assert_eq!(SleepQuantum::largest_within(0), None);
        assert_eq!(SleepQuantum::largest_within(1), Some(SleepQuantum::S1));
        assert_eq!(SleepQuantum::largest_within(3), Some(SleepQuantum::S2));
        assert_eq!(SleepQuantum::largest_within(7), Some(SleepQuantum::S4));
        assert_eq!(SleepQuantum::largest_within(30), Some(SleepQuantum::S8));
    }

    #[test]
    fn countdown_uses_largest_quanta() {
        let flags = WakeFlags::new();
        let coordinator = SleepCoordinator::new(&flags);
        let mut sleep = ScriptedSleep::new(&flags, None);

        let report = block_on(coordinator.sleep_countdown(&mut sleep, 23, WakeSignalSet::ALL));
        assert!(report.completed);
        assert_eq!(report.slept_secs, 23);
        assert_eq!(report.cause(), WakeCause::BudgetElapsed);
        assert_eq!(
            sleep.calls.as_slice(),
            &[
                SleepQuantum::S8,
                SleepQuantum::S8,
                SleepQuantum::S4,
                SleepQuantum::S2,
                SleepQuantum::S1
            ]
        );
    }

    #[test]
    fn countdown_stops_on_signal_without_crediting_interrupted_quantum() {
        let flags = WakeFlags::new();
        let coordinator = SleepCoordinator::new(&flags);
        let mut sleep = ScriptedSleep::new(&flags, Some((1, WakeSignal::Button)));

        let report = block_on(coordinator.sleep_countdown(&mut sleep, 30, WakeSignalSet::ALL));
        assert!(!report.completed);
        assert_eq!(report.slept_secs, 8);
        assert_eq!(report.cause(), WakeCause::Signal(WakeSignal::Button));
        // The coordinator leaves the flag for its consumer.
        assert!(flags.is_raised(WakeSignal::Button));
    }

    #[test]
    fn pending_signal_skips_sleep() {
        let flags = WakeFlags::new();
        flags.raise(WakeSignal::Serial);
        let coordinator = SleepCoordinator::new(&flags);
        let mut sleep = ScriptedSleep::new(&flags, None);

        let report = block_on(coordinator.sleep_until_signal(&mut sleep, WakeSignalSet::ALL));
        assert_eq!(report.cause, WakeCause::Signal(WakeSignal::Serial));
        assert_eq!(report.quanta, 0);
        assert!(sleep.calls.is_empty());

        let report = block_on(coordinator.sleep_countdown(&mut sleep, 10, WakeSignalSet::ALL));
        assert_eq!(report.slept_secs, 0);
        assert!(!report.completed);
    }

    #[test]
    fn irrelevant_signals_do_not_end_the_wait() {
        let flags = WakeFlags::new();
        flags.raise(WakeSignal::Serial);
        let coordinator = SleepCoordinator::new(&flags);
        let mut sleep = ScriptedSleep::new(&flags, Some((2, WakeSignal::Tick)));

        let relevant = WakeSignalSet::single(WakeSignal::Tick);
        let report = block_on(coordinator.sleep_until_signal(&mut sleep, relevant));
        assert_eq!(report.cause, WakeCause::Signal(WakeSignal::Tick));
        assert_eq!(report.signals, relevant);
        assert_eq!(report.quanta, 3);
    }

    #[test]
    fn failsafe_poll_ends_event_wait() {
        let flags = WakeFlags::new();
        let coordinator = SleepCoordinator::new(&flags);
        let mut sleep = ScriptedSleep::new(&flags, None);

        let mut polls = 0;
        let report = block_on(coordinator.sleep_until_signal_or_failsafe(
            &mut sleep,
            WakeSignalSet::ALL,
            || {
                polls += 1;
                polls == 4
            },
        ));
        assert_eq!(report.cause, WakeCause::Failsafe);
        assert_eq!(report.quanta, 4);
        assert!(sleep.calls.iter().all(|q| *q == SleepQuantum::S8));
    }

    #[test]
    fn signal_wins_over_failsafe_in_same_quantum() {
        let flags = WakeFlags::new();
        let coordinator = SleepCoordinator::new(&flags);
        let mut sleep = ScriptedSleep::new(&flags, Some((0, WakeSignal::Tick)));

        let report = block_on(coordinator.sleep_until_signal_or_failsafe(
            &mut sleep,
            WakeSignalSet::ALL,
            || true,
        ));
        assert_eq!(report.cause, WakeCause::Signal(WakeSignal::Tick));
    }
}
