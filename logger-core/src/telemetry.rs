//! Structured event log shared by the firmware and the emulator.
//!
//! The core never prints. The controller records what it did into a
//! fixed-capacity ring, and the platform drains new records after each loop
//! iteration to emit them through its own logger.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::mode::DeviceMode;
use crate::sleep::WakeCause;
use crate::time_source::Epoch;

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// What caused a sample to be taken.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SampleTrigger {
    /// Immediate sample on logger entry.
    ModeEntry,
    /// Alarm latched or target reached.
    Alarm,
    /// Silence failsafe forced a reschedule.
    Failsafe,
    /// Software-fallback interval elapsed.
    Cadence,
}

impl SampleTrigger {
    pub const fn label(self) -> &'static str {
        match self {
            SampleTrigger::ModeEntry => "mode-entry",
            SampleTrigger::Alarm => "alarm",
            SampleTrigger::Failsafe => "failsafe",
            SampleTrigger::Cadence => "cadence",
        }
    }
}

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    ModeEntered(DeviceMode),
    TransitionDiscarded(DeviceMode),
    SwitchUnmasked,
    Woke(WakeCause),
    SampleTaken { trigger: SampleTrigger, epoch: Epoch },
    AlarmScheduled { next: Epoch, armed: bool },
    SanityRealigned { previous: Epoch, next: Epoch },
    FailsafeTriggered { at: Epoch },
    BacklightOn,
    BacklightOff,
    ClockReadFailed { total: u32 },
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::ModeEntered(mode) => write!(f, "mode-entered {}", mode.label()),
            TelemetryEventKind::TransitionDiscarded(mode) => {
                write!(f, "transition-discarded {}", mode.label())
            }
            TelemetryEventKind::SwitchUnmasked => f.write_str("switch-unmasked"),
            TelemetryEventKind::Woke(WakeCause::Signal(signal)) => {
                write!(f, "woke {}", signal.label())
            }
            TelemetryEventKind::Woke(WakeCause::Failsafe) => f.write_str("woke failsafe"),
            TelemetryEventKind::Woke(WakeCause::BudgetElapsed) => f.write_str("woke budget"),
            TelemetryEventKind::SampleTaken { trigger, epoch } => {
                write!(f, "sample {} at {epoch}", trigger.label())
            }
            TelemetryEventKind::AlarmScheduled { next, armed } => {
                if *armed {
                    write!(f, "alarm armed for {next}")
                } else {
                    write!(f, "alarm target {next} (arm failed, polling)")
                }
            }
            TelemetryEventKind::SanityRealigned { previous, next } => {
                write!(f, "realigned {previous} -> {next}")
            }
            TelemetryEventKind::FailsafeTriggered { at } => write!(f, "failsafe at {at}"),
            TelemetryEventKind::BacklightOn => f.write_str("backlight on"),
            TelemetryEventKind::BacklightOff => f.write_str("backlight off"),
            TelemetryEventKind::ClockReadFailed { total } => {
                write!(f, "clock read failed ({total} total)")
            }
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    /// Awake-time milliseconds when the event was recorded.
    pub at_ms: u32,
    pub event: TelemetryEventKind,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Records an event and returns its identifier.
    pub fn record(&mut self, event: TelemetryEventKind, at_ms: u32) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord { id, at_ms, event });
        id
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Records with an id at or after `cursor`, oldest first. Records that were
    /// overwritten before being drained are skipped.
    pub fn since(&self, cursor: EventId) -> impl Iterator<Item = &TelemetryRecord> {
        self.oldest_first()
            .filter(move |record| record.id.wrapping_sub(cursor) < 1 << 31)
    }

    /// Identifier the next record will receive.
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Number of retained records of the given kind.
    pub fn count(&self, matches: impl Fn(&TelemetryEventKind) -> bool) -> usize {
        self.oldest_first()
            .filter(|record| matches(&record.event))
            .count()
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::wake::WakeSignal;

    #[test]
    fn records_are_numbered_in_order() {
        let mut recorder = TelemetryRecorder::<8>::new();
        let first = recorder.record(TelemetryEventKind::ModeEntered(DeviceMode::Logger), 0);
        let second = recorder.record(
            TelemetryEventKind::SampleTaken {
                trigger: SampleTrigger::ModeEntry,
                epoch: 100,
            },
            5,
        );
        assert_eq!((first, second), (0, 1));
        assert_eq!(recorder.latest().map(|r| r.at_ms), Some(5));
        assert_eq!(recorder.next_id(), 2);
    }

    #[test]
    fn drain_cursor_skips_already_seen_records() {
        let mut recorder = TelemetryRecorder::<4>::new();
        for at in 0..3 {
            recorder.record(TelemetryEventKind::Woke(WakeCause::Signal(WakeSignal::Tick)), at);
        }
        let cursor = recorder.next_id();
        recorder.record(TelemetryEventKind::BacklightOn, 10);
        recorder.record(TelemetryEventKind::BacklightOff, 20);

        let fresh: heapless::Vec<_, 4> = recorder.since(cursor).map(|r| r.event).collect();
        assert_eq!(
            fresh.as_slice(),
            &[TelemetryEventKind::BacklightOn, TelemetryEventKind::BacklightOff]
        );
    }

    #[test]
    fn ring_keeps_only_newest_records() {
        let mut recorder = TelemetryRecorder::<2>::new();
        recorder.record(TelemetryEventKind::SwitchUnmasked, 0);
        recorder.record(TelemetryEventKind::BacklightOn, 1);
        recorder.record(TelemetryEventKind::BacklightOff, 2);

        assert_eq!(recorder.len(), 2);
        let ids: heapless::Vec<_, 2> = recorder.oldest_first().map(|r| r.id).collect();
        assert_eq!(ids.as_slice(), &[1, 2]);
        assert_eq!(
            recorder.count(|event| matches!(event, TelemetryEventKind::SwitchUnmasked)),
            0
        );
    }
}
