//! Device context object and the main loop iteration.
//!
//! [`DeviceController`] owns every piece of mutable device state: the time
//! source, the alarm scheduler, the mode state machine, the backlight and
//! keep-awake bookkeeping. Edge handlers only share the [`WakeFlags`] and the
//! published [`SharedMode`]. Each call to [`DeviceController::run_once`]
//! performs one loop iteration in a fixed order:
//!
//! 1. mode debounce and transition,
//! 2. switch mask maintenance,
//! 3. auxiliary button,
//! 4. keep-awake bookkeeping,
//! 5. the active mode's update (alarm servicing or clock refresh),
//! 6. sleep, unless the keep-awake window is open.

use crate::awake::{Backlight, ButtonDebounce, KeepAwake};
use crate::config::DeviceConfig;
use crate::mode::{DeviceMode, MaskUpdate, ModeStateMachine, ModeTransition};
use crate::scheduler::{AlarmScheduler, SoftwareCadence};
use crate::sleep::{
    CountdownReport, SleepCoordinator, SleepPrimitive, SleepQuantum, WakeCause, WakeReport,
};
use crate::telemetry::{SampleTrigger, TelemetryEventKind, TelemetryRecorder};
use crate::time_source::{ClockCapability, ClockKind, ClockOutput, Epoch, TimeSource};
use crate::wake::{SharedMode, WakeFlags, WakeSignal, WakeSignalSet};

/// Board I/O the loop needs besides the clock.
pub trait Board {
    /// Awake-time milliseconds. May stand still while the CPU is suspended;
    /// wraps at `u32::MAX`.
    fn millis(&mut self) -> u32;

    /// Milliseconds since boot including time spent suspended; wraps at
    /// `u32::MAX`. Mode debounce, the re-entry guard and the switch mask run
    /// on this base.
    fn uptime_ms(&mut self) -> u32;

    /// Current raw position of the mode slide switch.
    fn mode_input(&mut self) -> DeviceMode;

    /// `true` while the auxiliary button is held down.
    fn button_held(&mut self) -> bool;

    /// `true` when serial input is waiting.
    fn serial_pending(&mut self) -> bool;

    /// Handles whatever arrived on the serial line.
    fn service_serial(&mut self);

    /// Masks or unmasks the mode switch edge source.
    fn mask_mode_switch(&mut self, masked: bool);

    /// Enables the clock tick edge source and re-baselines the edge decoder.
    fn enable_tick(&mut self);

    fn set_backlight(&mut self, on: bool);
}

/// Information handed to the sensor/display side for each sample.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SampleContext {
    pub trigger: SampleTrigger,
    pub epoch: Epoch,
    /// Seconds since the logger's elapsed-display anchor.
    pub elapsed_secs: u32,
    pub clock: ClockKind,
}

/// Sensor acquisition and display, outside the scheduling core.
pub trait Presenter {
    fn announce_mode(&mut self, mode: DeviceMode, clock: ClockKind);

    /// Acquires and shows one sample. Sensor failures are the presenter's
    /// concern; the attempt counts as serviced either way.
    fn take_sample(&mut self, sample: &SampleContext);

    /// Shows the time in clock mode. Called at most once per distinct second.
    fn show_clock(&mut self, now: Epoch, clock: ClockKind);
}

/// How the iteration ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Rest {
    /// The keep-awake window was open; no sleep.
    StayedAwake,
    /// Event-wait with the hardware clock.
    Woke(WakeReport),
    /// Software-fallback countdown in logger mode.
    Countdown(CountdownReport),
    /// One second quantum in clock mode without a hardware clock.
    SecondQuantum,
    /// Software fallback had no time left to sleep.
    NoSleep,
}

/// Summary of one loop iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Iteration {
    pub mode: DeviceMode,
    pub samples: u8,
    pub rest: Rest,
}

/// Owns all device state and runs the control loop.
pub struct DeviceController<'a, C, B, P, S> {
    config: DeviceConfig,
    flags: &'a WakeFlags,
    shared_mode: &'a SharedMode,
    time: TimeSource<C>,
    scheduler: AlarmScheduler,
    cadence: SoftwareCadence,
    mode: ModeStateMachine,
    backlight: Backlight,
    button: ButtonDebounce,
    keep_awake: KeepAwake,
    last_clock_second: Option<Epoch>,
    /// Awake milliseconds already credited to the software clock.
    soft_credit_ms: u32,
    reported_read_failures: u32,
    telemetry: TelemetryRecorder,
    board: B,
    presenter: P,
    sleeper: S,
}

impl<'a, C, B, P, S> DeviceController<'a, C, B, P, S>
where
    C: ClockCapability,
    B: Board,
    P: Presenter,
    S: SleepPrimitive,
{
    /// Builds the controller and enters the mode selected by the switch.
    pub fn start(
        config: DeviceConfig,
        time: TimeSource<C>,
        flags: &'a WakeFlags,
        shared_mode: &'a SharedMode,
        mut board: B,
        presenter: P,
        sleeper: S,
    ) -> Self {
        let now_ms = board.millis();
        let uptime_ms = board.uptime_ms();
        let initial = board.mode_input();
        let mut controller = Self {
            config,
            flags,
            shared_mode,
            time,
            scheduler: AlarmScheduler::new(config.scheduler),
            cadence: SoftwareCadence::new(config.scheduler.interval()),
            mode: ModeStateMachine::new(config.mode, initial, uptime_ms),
            backlight: Backlight::new(),
            button: ButtonDebounce::new(),
            keep_awake: KeepAwake::new(),
            last_clock_second: None,
            soft_credit_ms: now_ms,
            reported_read_failures: 0,
            telemetry: TelemetryRecorder::new(),
            board,
            presenter,
            sleeper,
        };
        controller.board.set_backlight(false);
        controller.enter_mode(initial, now_ms);
        controller
    }

    /// Runs one loop iteration.
    pub async fn run_once(&mut self) -> Iteration {
        let now_ms = self.board.millis();
        let uptime_ms = self.board.uptime_ms();

        self.credit_awake_seconds(now_ms);
        self.update_mode(uptime_ms, now_ms);
        if self.mode.maintain_mask(uptime_ms) == MaskUpdate::Release {
            self.board.mask_mode_switch(false);
            self.log(TelemetryEventKind::SwitchUnmasked);
        }
        self.handle_button(now_ms);
        self.update_keep_awake(now_ms);

        let mode = self.mode.active_mode();
        let (samples, rest) = match (mode, self.time.kind()) {
            (DeviceMode::Clock, _) => (0, self.run_clock().await),
            (DeviceMode::Logger, ClockKind::Hardware) => self.run_logger().await,
            (DeviceMode::Logger, ClockKind::Software) => self.run_logger_fallback().await,
        };

        self.note_clock_failures();
        Iteration {
            mode,
            samples,
            rest,
        }
    }

    fn update_mode(&mut self, uptime_ms: u32, now_ms: u32) {
        let raw = self.board.mode_input();
        let evaluation = self.mode.evaluate(raw, uptime_ms, self.flags);
        match evaluation.transition {
            ModeTransition::Entered(mode) => self.enter_mode(mode, now_ms),
            ModeTransition::Discarded => {
                self.log(TelemetryEventKind::TransitionDiscarded(evaluation.stable_mode));
            }
            // Stay up until the new level promotes or reverts.
            ModeTransition::Debouncing => {
                self.keep_awake.extend(now_ms, self.config.mode.debounce);
            }
            ModeTransition::None => {}
        }
    }

    /// Advances the software clock by the whole seconds spent awake, which
    /// completed sleep quanta do not cover.
    fn credit_awake_seconds(&mut self, now_ms: u32) {
        if self.time.has_hardware_clock() {
            return;
        }
        let secs = now_ms.wrapping_sub(self.soft_credit_ms) / 1_000;
        if secs > 0 {
            self.time.advance_soft(secs);
            self.soft_credit_ms = self.soft_credit_ms.wrapping_add(secs * 1_000);
        }
    }

    fn enter_mode(&mut self, mode: DeviceMode, now_ms: u32) {
        self.board.mask_mode_switch(true);
        self.shared_mode.set(mode);
        self.log(TelemetryEventKind::ModeEntered(mode));

        let clock = self.time.kind();
        match mode {
            DeviceMode::Logger => {
                self.board.enable_tick();
                self.flags.take(WakeSignal::Tick);
                self.presenter.announce_mode(mode, clock);

                if self.time.has_hardware_clock() {
                    let now = self.time.now();
                    self.scheduler.init(&mut self.time, now);
                    self.log_schedule();
                    self.sample(SampleTrigger::ModeEntry, now);
                    self.scheduler.mark_sample(now);
                } else {
                    self.cadence.start(now_ms);
                    let now = self.time.now();
                    self.sample(SampleTrigger::ModeEntry, now);
                    self.cadence.mark_sample(now_ms);
                }
            }
            DeviceMode::Clock => {
                self.scheduler.reset();
                self.time.select_output(ClockOutput::SecondTick);
                self.board.enable_tick();
                self.flags.take(WakeSignal::Tick);
                self.presenter.announce_mode(mode, clock);
                self.last_clock_second = None;
                self.keep_awake
                    .extend(now_ms, self.config.awake.clock_entry_keep_awake);
            }
        }
    }

    fn handle_button(&mut self, now_ms: u32) {
        let flagged = self.flags.take(WakeSignal::Button);
        if !(flagged || self.board.button_held()) {
            return;
        }
        if self.button.accept(now_ms, self.config.awake.button_debounce) {
            let now = self.time.now();
            self.backlight.turn_on(now);
            self.board.set_backlight(true);
            self.log(TelemetryEventKind::BacklightOn);
        }
    }

    fn update_keep_awake(&mut self, now_ms: u32) {
        if self.backlight.is_active() {
            self.keep_awake
                .extend(now_ms, self.config.awake.backlight_keep_awake);
        }
        let flagged = self.flags.take(WakeSignal::Serial);
        if flagged || self.board.serial_pending() {
            self.keep_awake
                .extend(now_ms, self.config.awake.serial_keep_awake);
            self.board.service_serial();
        }
    }

    fn maintain_backlight(&mut self) {
        let now = self.time.now();
        if self
            .backlight
            .maintain(now, self.config.awake.backlight_secs)
        {
            self.board.set_backlight(false);
            self.log(TelemetryEventKind::BacklightOff);
        }
    }

    fn awake(&mut self) -> bool {
        let now_ms = self.board.millis();
        self.keep_awake.is_active(now_ms)
    }

    async fn run_clock(&mut self) -> Rest {
        self.flags.take(WakeSignal::Tick);
        if self.awake() {
            self.board.service_serial();
        }

        let now = self.time.now();
        if self.last_clock_second != Some(now) {
            self.last_clock_second = Some(now);
            self.presenter.show_clock(now, self.time.kind());
        }
        self.maintain_backlight();

        if self.awake() {
            return Rest::StayedAwake;
        }

        if self.time.has_hardware_clock() {
            let coordinator = SleepCoordinator::new(self.flags);
            let report = coordinator
                .sleep_until_signal(&mut self.sleeper, WakeSignalSet::ALL)
                .await;
            self.log(TelemetryEventKind::Woke(report.cause));
            Rest::Woke(report)
        } else {
            self.sleeper.suspend(SleepQuantum::S1).await;
            self.time.advance_soft(SleepQuantum::S1.secs());
            Rest::SecondQuantum
        }
    }

    async fn run_logger(&mut self) -> (u8, Rest) {
        let mut samples = 0;
        self.flags.take(WakeSignal::Tick);

        let now = self.time.now();
        if self.scheduler.should_fire(&mut self.time, now) {
            self.scheduler.advance_after_fire(&mut self.time, now);
            self.log_schedule();
            self.sample(SampleTrigger::Alarm, now);
            self.scheduler.mark_sample(now);
            samples += 1;
        }

        if let Some(realignment) = self.scheduler.sanity(&mut self.time, now) {
            self.log(TelemetryEventKind::SanityRealigned {
                previous: realignment.previous,
                next: realignment.next,
            });
            self.log_schedule();
        }

        if self.scheduler.failsafe_check(&mut self.time, now) {
            self.log(TelemetryEventKind::FailsafeTriggered { at: now });
            self.log_schedule();
            self.sample(SampleTrigger::Failsafe, now);
            self.scheduler.mark_sample(now);
            samples += 1;
        }

        self.maintain_backlight();
        if self.awake() {
            self.board.service_serial();
            return (samples, Rest::StayedAwake);
        }

        let coordinator = SleepCoordinator::new(self.flags);
        let time = &mut self.time;
        let scheduler = &mut self.scheduler;
        let mut polled = now;
        let report = coordinator
            .sleep_until_signal_or_failsafe(&mut self.sleeper, WakeSignalSet::ALL, || {
                polled = time.now();
                scheduler.failsafe_check(&mut *time, polled)
            })
            .await;

        self.log(TelemetryEventKind::Woke(report.cause));
        if report.cause == WakeCause::Failsafe {
            self.log(TelemetryEventKind::FailsafeTriggered { at: polled });
            self.log_schedule();
            self.sample(SampleTrigger::Failsafe, polled);
            self.scheduler.mark_sample(polled);
            samples += 1;
        }
        (samples, Rest::Woke(report))
    }

    async fn run_logger_fallback(&mut self) -> (u8, Rest) {
        let mut samples = 0;
        let now_ms = self.board.millis();
        if self.cadence.is_due(now_ms) {
            let now = self.time.now();
            self.sample(SampleTrigger::Cadence, now);
            self.cadence.mark_sample(self.board.millis());
            samples += 1;
        }

        self.maintain_backlight();
        if self.awake() {
            return (samples, Rest::StayedAwake);
        }

        let remaining = self.cadence.remaining(self.board.millis());
        if remaining == 0 {
            return (samples, Rest::NoSleep);
        }

        let coordinator = SleepCoordinator::new(self.flags);
        let report = coordinator
            .sleep_countdown(&mut self.sleeper, remaining, WakeSignalSet::ALL)
            .await;
        self.cadence
            .credit_sleep(report.slept_secs, report.completed);
        self.time.advance_soft(report.slept_secs);
        self.log(TelemetryEventKind::Woke(report.cause()));
        (samples, Rest::Countdown(report))
    }

    fn sample(&mut self, trigger: SampleTrigger, epoch: Epoch) {
        let elapsed_secs = if self.time.has_hardware_clock() {
            self.scheduler.elapsed_since_base(epoch)
        } else {
            let now_ms = self.board.millis();
            self.cadence.elapsed_in_mode(now_ms)
        };
        self.presenter.take_sample(&SampleContext {
            trigger,
            epoch,
            elapsed_secs,
            clock: self.time.kind(),
        });
        self.log(TelemetryEventKind::SampleTaken { trigger, epoch });
    }

    fn log_schedule(&mut self) {
        if self.scheduler.next_epoch() != 0 {
            self.log(TelemetryEventKind::AlarmScheduled {
                next: self.scheduler.next_epoch(),
                armed: self.scheduler.alarm_armed(),
            });
        }
    }

    fn note_clock_failures(&mut self) {
        let total = self.time.read_failures();
        if total != self.reported_read_failures {
            self.reported_read_failures = total;
            self.log(TelemetryEventKind::ClockReadFailed { total });
        }
    }

    fn log(&mut self, event: TelemetryEventKind) {
        let at_ms = self.board.millis();
        self.telemetry.record(event, at_ms);
    }

    pub const fn active_mode(&self) -> DeviceMode {
        self.mode.active_mode()
    }

    pub const fn scheduler(&self) -> &AlarmScheduler {
        &self.scheduler
    }

    pub const fn mode_machine(&self) -> &ModeStateMachine {
        &self.mode
    }

    pub const fn time_source(&self) -> &TimeSource<C> {
        &self.time
    }

    pub fn time_source_mut(&mut self) -> &mut TimeSource<C> {
        &mut self.time
    }

    pub const fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    pub const fn backlight(&self) -> &Backlight {
        &self.backlight
    }

    pub const fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub const fn presenter(&self) -> &P {
        &self.presenter
    }

    pub const fn sleeper(&self) -> &S {
        &self.sleeper
    }
}
