//! Drains the controller's telemetry ring to the log sink.
//!
//! The controller records into its own ring; after every loop iteration the
//! firmware forwards the records it has not seen yet to defmt on target and to
//! stdout on the host. Records overwritten before they were drained are
//! counted and reported once.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::fmt;

use logger_core::telemetry::{EventId, TelemetryRecord, TelemetryRecorder};

/// Result of one drain pass.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DrainSummary {
    pub emitted: usize,
    /// Records lost to ring wrap-around since the previous pass.
    pub dropped: u32,
}

/// Cursor over the telemetry ring.
pub struct TelemetryDrain {
    cursor: EventId,
}

impl TelemetryDrain {
    pub const fn new() -> Self {
        Self { cursor: 0 }
    }

    /// Emits every record at or after the cursor and advances it.
    pub fn drain<const N: usize>(&mut self, recorder: &TelemetryRecorder<N>) -> DrainSummary {
        self.drain_with(recorder, emit_record)
    }

    fn drain_with<const N: usize>(
        &mut self,
        recorder: &TelemetryRecorder<N>,
        mut sink: impl FnMut(&TelemetryRecord),
    ) -> DrainSummary {
        let mut summary = DrainSummary::default();
        if let Some(oldest) = recorder.oldest_first().next() {
            let behind = oldest.id.wrapping_sub(self.cursor);
            if behind != 0 && behind < 1 << 31 {
                summary.dropped = behind;
                emit_dropped(behind);
            }
        }

        for record in recorder.since(self.cursor) {
            sink(record);
            summary.emitted += 1;
        }
        self.cursor = recorder.next_id();
        summary
    }
}

impl Default for TelemetryDrain {
    fn default() -> Self {
        Self::new()
    }
}

fn emit_record(record: &TelemetryRecord) {
    emit_line(&format_args!("telemetry t={}ms {}", record.at_ms, record.event));
}

#[cfg(target_os = "none")]
pub fn emit_line(message: &dyn fmt::Display) {
    defmt::info!("{}", defmt::Display2Format(message));
}

#[cfg(not(target_os = "none"))]
pub fn emit_line(message: &dyn fmt::Display) {
    println!("{message}");
}

#[cfg(target_os = "none")]
fn emit_dropped(count: u32) {
    defmt::warn!("telemetry: {} records overwritten before drain", count);
}

#[cfg(not(target_os = "none"))]
fn emit_dropped(count: u32) {
    println!("telemetry: {count} records overwritten before drain");
}
