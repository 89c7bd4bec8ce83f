//! Simulated board for the emulator.
//!
//! One [`World`] holds everything the firmware would get from hardware: the
//! DS3231 registers that matter (epoch, alarm latch, output selection), the
//! wake-capable pin levels, the serial line and the backlight. Edges go
//! through the same [`EdgeDecoder`] the firmware uses, so masking and tick
//! polarity behave as on the board.
//!
//! Awake milliseconds only advance while the loop is awake; the clock's
//! seconds always advance.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use logger_core::controller::{Board, Presenter, SampleContext};
use logger_core::mode::DeviceMode;
use logger_core::sleep::{SleepPrimitive, SleepQuantum};
use logger_core::time_source::{ClockCapability, ClockKind, ClockOutput, Epoch};
use logger_core::wake::{EdgeDecoder, PinLevels, SharedMode, WakeFlags, WakeSignal, WakeSignalSet};

/// Simulated DS3231 state.
#[derive(Debug)]
pub struct RtcState {
    pub epoch: Epoch,
    pub alarm: Option<Epoch>,
    pub latched: bool,
    pub output: ClockOutput,
    /// Every bus transfer fails while set.
    pub failing: bool,
}

pub struct World<'a> {
    flags: &'a WakeFlags,
    shared_mode: &'a SharedMode,
    decoder: EdgeDecoder,
    levels: PinLevels,
    sources: WakeSignalSet,
    pub rtc: Option<RtcState>,
    /// Alarm interrupts latch in the chip but never reach the MCU.
    pub drop_alarm_irq: bool,
    pub awake_ms: u32,
    sub_ms: u32,
    /// Simulated wall time since boot, awake and asleep.
    pub wall_ms: u64,
    pub slept_secs: u64,
    serial: VecDeque<u8>,
    pub backlight: bool,
    console: Vec<String>,
}

impl<'a> World<'a> {
    pub fn new(
        flags: &'a WakeFlags,
        shared_mode: &'a SharedMode,
        rtc: Option<Epoch>,
        mode: DeviceMode,
    ) -> Self {
        let levels = PinLevels::default()
            .with_level(PinLevels::MODE_SWITCH, mode == DeviceMode::Clock)
            .with_level(PinLevels::TICK, true)
            .with_level(PinLevels::SERIAL_RX, true)
            .with_level(PinLevels::BUTTON, true);
        Self {
            flags,
            shared_mode,
            decoder: EdgeDecoder::new(levels),
            levels,
            sources: WakeSignalSet::EMPTY
                .with(WakeSignal::Button)
                .with(WakeSignal::Serial),
            rtc: rtc.map(|epoch| RtcState {
                epoch,
                alarm: None,
                latched: false,
                output: ClockOutput::SecondTick,
                failing: false,
            }),
            drop_alarm_irq: false,
            awake_ms: 0,
            sub_ms: 0,
            wall_ms: 0,
            slept_secs: 0,
            serial: VecDeque::new(),
            backlight: false,
            console: Vec::new(),
        }
    }

    fn drive(&mut self, line: u8, high: bool) -> WakeSignalSet {
        self.levels = self.levels.with_level(line, high);
        self.decoder.on_change(
            self.levels,
            self.shared_mode.get(),
            self.sources,
            self.flags,
        )
    }

    /// Moves a line without the edge reaching the decoder.
    fn drive_silently(&mut self, line: u8, high: bool) {
        self.levels = self.levels.with_level(line, high);
        self.decoder.resync(self.levels);
    }

    /// One clock second elapses. Returns the wake flags the edges raised.
    fn pass_second(&mut self) -> WakeSignalSet {
        let Some(rtc) = self.rtc.as_mut() else {
            return WakeSignalSet::EMPTY;
        };
        rtc.epoch = rtc.epoch.wrapping_add(1);
        let output = rtc.output;
        let alarm_hit = output == ClockOutput::AlarmInterrupt && rtc.alarm == Some(rtc.epoch);
        if alarm_hit {
            rtc.latched = true;
        }

        match output {
            ClockOutput::SecondTick => {
                let falling = self.drive(PinLevels::TICK, false);
                falling.union(self.drive(PinLevels::TICK, true))
            }
            ClockOutput::AlarmInterrupt if !alarm_hit => WakeSignalSet::EMPTY,
            ClockOutput::AlarmInterrupt if self.drop_alarm_irq => {
                self.drive_silently(PinLevels::TICK, false);
                WakeSignalSet::EMPTY
            }
            ClockOutput::AlarmInterrupt => self.drive(PinLevels::TICK, false),
        }
    }

    /// Spends awake time, rolling clock seconds as they complete.
    pub fn spend_awake(&mut self, ms: u32) {
        self.awake_ms = self.awake_ms.wrapping_add(ms);
        self.wall_ms += u64::from(ms);
        self.sub_ms += ms;
        while self.sub_ms >= 1_000 {
            self.sub_ms -= 1_000;
            self.pass_second();
        }
    }

    /// Sleeps for up to `secs` whole seconds, stopping at the first wake edge.
    fn sleep_seconds(&mut self, secs: u32) {
        for _ in 0..secs {
            self.wall_ms += 1_000;
            self.slept_secs += 1;
            if !self.pass_second().is_empty() {
                break;
            }
        }
    }

    pub fn set_switch(&mut self, mode: DeviceMode) -> WakeSignalSet {
        self.drive(PinLevels::MODE_SWITCH, mode == DeviceMode::Clock)
    }

    pub fn press_button(&mut self) -> WakeSignalSet {
        let pressed = self.drive(PinLevels::BUTTON, false);
        pressed.union(self.drive(PinLevels::BUTTON, true))
    }

    pub fn receive_serial(&mut self, bytes: &[u8]) -> WakeSignalSet {
        self.serial.extend(bytes.iter().copied());
        let start = self.drive(PinLevels::SERIAL_RX, false);
        start.union(self.drive(PinLevels::SERIAL_RX, true))
    }

    pub fn mode_switch_level(&self) -> DeviceMode {
        DeviceMode::from_switch_level(self.levels.is_high(PinLevels::MODE_SWITCH))
    }

    pub fn take_console(&mut self) -> Vec<String> {
        std::mem::take(&mut self.console)
    }

    fn say(&mut self, line: impl fmt::Display) {
        self.console.push(line.to_string());
    }
}

pub type SharedWorld<'a> = Rc<RefCell<World<'a>>>;

/// Bus failure reported by the simulated clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusError;

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("simulated bus error")
    }
}

pub struct SimClock<'a>(pub SharedWorld<'a>);

impl SimClock<'_> {
    fn with_rtc<T>(&self, op: impl FnOnce(&mut RtcState) -> T) -> Result<T, BusError> {
        let mut world = self.0.borrow_mut();
        match world.rtc.as_mut() {
            Some(rtc) if !rtc.failing => Ok(op(rtc)),
            _ => Err(BusError),
        }
    }
}

impl ClockCapability for SimClock<'_> {
    type Error = BusError;

    fn now(&mut self) -> Result<Epoch, BusError> {
        self.with_rtc(|rtc| rtc.epoch)
    }

    fn arm_alarm(&mut self, epoch: Epoch) -> Result<(), BusError> {
        self.with_rtc(|rtc| {
            rtc.output = ClockOutput::AlarmInterrupt;
            rtc.latched = false;
            rtc.alarm = Some(epoch);
        })?;
        self.0.borrow_mut().drive_silently(PinLevels::TICK, true);
        Ok(())
    }

    fn alarm_fired(&mut self) -> Result<bool, BusError> {
        self.with_rtc(|rtc| rtc.latched)
    }

    fn clear_alarm(&mut self) -> Result<(), BusError> {
        self.with_rtc(|rtc| rtc.latched = false)?;
        // The open-drain output releases; a rising edge is not a logger wake.
        self.0.borrow_mut().drive(PinLevels::TICK, true);
        Ok(())
    }

    fn select_output(&mut self, output: ClockOutput) -> Result<(), BusError> {
        self.with_rtc(|rtc| {
            rtc.output = output;
            if output == ClockOutput::SecondTick {
                rtc.alarm = None;
                rtc.latched = false;
            }
        })
    }
}

pub struct SimBoard<'a>(pub SharedWorld<'a>);

impl Board for SimBoard<'_> {
    fn millis(&mut self) -> u32 {
        self.0.borrow().awake_ms
    }

    #[allow(clippy::cast_possible_truncation)]
    fn uptime_ms(&mut self) -> u32 {
        self.0.borrow().wall_ms as u32
    }

    fn mode_input(&mut self) -> DeviceMode {
        self.0.borrow().mode_switch_level()
    }

    fn button_held(&mut self) -> bool {
        !self.0.borrow().levels.is_high(PinLevels::BUTTON)
    }

    fn serial_pending(&mut self) -> bool {
        !self.0.borrow().serial.is_empty()
    }

    fn service_serial(&mut self) {
        let mut world = self.0.borrow_mut();
        if world.serial.is_empty() {
            return;
        }
        let bytes: Vec<u8> = world.serial.drain(..).collect();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        world.say(format_args!("serial: {} bytes {:?}", bytes.len(), text.trim_end()));
    }

    fn mask_mode_switch(&mut self, masked: bool) {
        let mut world = self.0.borrow_mut();
        world.sources = if masked {
            world.sources.without(WakeSignal::ModeSwitch)
        } else {
            world.sources.with(WakeSignal::ModeSwitch)
        };
    }

    fn enable_tick(&mut self) {
        let mut world = self.0.borrow_mut();
        world.sources = world.sources.with(WakeSignal::Tick);
        let levels = world.levels;
        world.decoder.resync(levels);
    }

    fn set_backlight(&mut self, on: bool) {
        self.0.borrow_mut().backlight = on;
    }
}

pub struct SimPresenter<'a>(pub SharedWorld<'a>);

impl Presenter for SimPresenter<'_> {
    fn announce_mode(&mut self, mode: DeviceMode, clock: ClockKind) {
        let clock = match clock {
            ClockKind::Hardware => "rtc",
            ClockKind::Software => "no-rtc",
        };
        self.0
            .borrow_mut()
            .say(format_args!("display: {} mode ({clock})", mode.label()));
    }

    fn take_sample(&mut self, sample: &SampleContext) {
        self.0.borrow_mut().say(format_args!(
            "display: sample {} epoch={} elapsed={}s",
            sample.trigger.label(),
            sample.epoch,
            sample.elapsed_secs
        ));
    }

    fn show_clock(&mut self, now: Epoch, _clock: ClockKind) {
        self.0.borrow_mut().say(format_args!("display: clock {now}"));
    }
}

pub struct SimSleep<'a>(pub SharedWorld<'a>);

impl SleepPrimitive for SimSleep<'_> {
    async fn suspend(&mut self, quantum: SleepQuantum) {
        self.0.borrow_mut().sleep_seconds(quantum.secs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world<'a>(flags: &'a WakeFlags, mode: &'a SharedMode) -> World<'a> {
        World::new(flags, mode, Some(100), DeviceMode::Logger)
    }

    #[test]
    fn second_tick_raises_only_when_enabled() {
        let flags = WakeFlags::new();
        let mode = SharedMode::new(DeviceMode::Clock);
        let mut world = world(&flags, &mode);

        world.spend_awake(1_000);
        assert!(!flags.is_raised(WakeSignal::Tick));

        world.sources = world.sources.with(WakeSignal::Tick);
        world.spend_awake(1_000);
        assert!(flags.take(WakeSignal::Tick));
        assert_eq!(world.rtc.as_ref().map(|rtc| rtc.epoch), Some(102));
    }

    #[test]
    fn dropped_alarm_latches_without_a_wake() {
        let flags = WakeFlags::new();
        let mode = SharedMode::new(DeviceMode::Logger);
        let mut world = world(&flags, &mode);
        world.sources = world.sources.with(WakeSignal::Tick);
        if let Some(rtc) = world.rtc.as_mut() {
            rtc.output = ClockOutput::AlarmInterrupt;
            rtc.alarm = Some(103);
        }
        world.drop_alarm_irq = true;

        world.sleep_seconds(8);
        assert_eq!(world.slept_secs, 8);
        assert!(world.rtc.as_ref().is_some_and(|rtc| rtc.latched));
        assert!(!flags.is_raised(WakeSignal::Tick));
    }

    #[test]
    fn sleep_stops_at_the_alarm_edge() {
        let flags = WakeFlags::new();
        let mode = SharedMode::new(DeviceMode::Logger);
        let mut world = world(&flags, &mode);
        world.sources = world.sources.with(WakeSignal::Tick);
        if let Some(rtc) = world.rtc.as_mut() {
            rtc.output = ClockOutput::AlarmInterrupt;
            rtc.alarm = Some(103);
        }

        world.sleep_seconds(8);
        assert_eq!(world.slept_secs, 3);
        assert!(flags.take(WakeSignal::Tick));
    }

    #[test]
    fn masked_switch_does_not_raise() {
        let flags = WakeFlags::new();
        let mode = SharedMode::new(DeviceMode::Logger);
        let mut world = world(&flags, &mode);

        assert!(world.set_switch(DeviceMode::Clock).is_empty());
        world.sources = world.sources.with(WakeSignal::ModeSwitch);
        assert!(world.set_switch(DeviceMode::Logger).contains(WakeSignal::ModeSwitch));
    }
}
