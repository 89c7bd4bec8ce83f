//! Clock capability abstraction shared by the scheduler, sleep coordinator and
//! controller.
//!
//! The board either has a battery-backed hardware clock with a one-shot alarm
//! (precise epoch seconds) or it does not, in which case a coarse software
//! counter advanced by completed sleep quanta stands in. The choice is made once
//! at start-up by [`TimeSource::detect`]; callers never branch on the hardware
//! themselves.

/// Seconds since a fixed reference instant.
pub type Epoch = u32;

/// Half the epoch word; wrapped differences at or above this are "in the past".
const HALF_RANGE: u32 = 1 << 31;

/// Returns `true` when `target` has been reached at `now`, tolerating rollover.
#[inline]
pub const fn is_due(now: Epoch, target: Epoch) -> bool {
    now.wrapping_sub(target) < HALF_RANGE
}

/// Wrapped distance from `earlier` to `later`.
#[inline]
pub const fn seconds_between(earlier: Epoch, later: Epoch) -> u32 {
    later.wrapping_sub(earlier)
}

/// Output routed to the hardware clock's interrupt pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClockOutput {
    /// 1 Hz square wave used as the clock-mode display tick.
    SecondTick,
    /// Active-low alarm interrupt used by the logger.
    AlarmInterrupt,
}

/// Driver surface for a battery-backed hardware clock.
pub trait ClockCapability {
    /// Transport-specific failure (bus errors, NAKs).
    type Error;

    /// Reads the current epoch.
    fn now(&mut self) -> Result<Epoch, Self::Error>;

    /// Programs the one-shot alarm for `epoch`, routing the pin to the alarm.
    fn arm_alarm(&mut self, epoch: Epoch) -> Result<(), Self::Error>;

    /// Returns `true` when the alarm latched since it was last cleared.
    fn alarm_fired(&mut self) -> Result<bool, Self::Error>;

    /// Clears the latched alarm flag.
    fn clear_alarm(&mut self) -> Result<(), Self::Error>;

    /// Selects what the interrupt pin reports.
    fn select_output(&mut self, output: ClockOutput) -> Result<(), Self::Error>;
}

/// Alarm surface consumed by the scheduler.
pub trait AlarmPort {
    /// `true` when a hardware alarm exists at all.
    fn has_hardware_alarm(&self) -> bool;

    /// Arms the alarm; returns `false` when the request could not be applied.
    fn arm(&mut self, epoch: Epoch) -> bool;

    /// Reports whether the alarm latched.
    fn fired(&mut self) -> bool;

    /// Clears the latched alarm.
    fn clear(&mut self);
}

/// Which time base backs the [`TimeSource`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClockKind {
    Hardware,
    Software,
}

/// Hardware clock wrapper that caches the last good reading.
pub struct HardwareClock<C> {
    driver: C,
    last_epoch: Epoch,
    read_failures: u32,
    bus_failures: u32,
}

impl<C: ClockCapability> HardwareClock<C> {
    pub const fn new(driver: C) -> Self {
        Self {
            driver,
            last_epoch: 0,
            read_failures: 0,
            bus_failures: 0,
        }
    }

    fn now(&mut self) -> Epoch {
        match self.driver.now() {
            Ok(epoch) => {
                self.last_epoch = epoch;
                epoch
            }
            Err(_) => {
                self.read_failures = self.read_failures.saturating_add(1);
                self.last_epoch
            }
        }
    }

    fn note<T>(&mut self, result: Result<T, C::Error>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(_) => {
                self.bus_failures = self.bus_failures.saturating_add(1);
                None
            }
        }
    }
}

/// Coarse seconds counter advanced by completed sleep quanta.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SoftSeconds {
    seconds: u32,
}

impl SoftSeconds {
    pub const fn new() -> Self {
        Self { seconds: 0 }
    }

    pub const fn get(&self) -> u32 {
        self.seconds
    }

    pub fn advance(&mut self, seconds: u32) {
        self.seconds = self.seconds.wrapping_add(seconds);
    }
}

/// Capability-tagged time base, selected once at start-up.
pub enum TimeSource<C> {
    Hardware(HardwareClock<C>),
    Software(SoftSeconds),
}

impl<C: ClockCapability> TimeSource<C> {
    /// Uses the hardware clock when one was detected, otherwise the software
    /// counter.
    pub fn detect(driver: Option<C>) -> Self {
        match driver {
            Some(driver) => Self::Hardware(HardwareClock::new(driver)),
            None => Self::Software(SoftSeconds::new()),
        }
    }

    pub const fn kind(&self) -> ClockKind {
        match self {
            Self::Hardware(_) => ClockKind::Hardware,
            Self::Software(_) => ClockKind::Software,
        }
    }

    pub const fn has_hardware_clock(&self) -> bool {
        matches!(self, Self::Hardware(_))
    }

    /// Current seconds. A failed hardware read returns the previous reading.
    pub fn now(&mut self) -> Epoch {
        match self {
            Self::Hardware(clock) => clock.now(),
            Self::Software(counter) => counter.get(),
        }
    }

    /// Credits slept seconds to the software counter; the hardware clock keeps
    /// its own time.
    pub fn advance_soft(&mut self, seconds: u32) {
        if let Self::Software(counter) = self {
            counter.advance(seconds);
        }
    }

    /// Routes the hardware clock's interrupt pin.
    pub fn select_output(&mut self, output: ClockOutput) -> bool {
        match self {
            Self::Hardware(clock) => {
                let result = clock.driver.select_output(output);
                clock.note(result).is_some()
            }
            Self::Software(_) => false,
        }
    }

    /// Number of failed epoch reads since start-up.
    pub fn read_failures(&self) -> u32 {
        match self {
            Self::Hardware(clock) => clock.read_failures,
            Self::Software(_) => 0,
        }
    }

    /// Number of failed alarm/output register accesses since start-up.
    pub fn bus_failures(&self) -> u32 {
        match self {
            Self::Hardware(clock) => clock.bus_failures,
            Self::Software(_) => 0,
        }
    }

    /// Provides access to the wrapped driver.
    pub fn driver(&self) -> Option<&C> {
        match self {
            Self::Hardware(clock) => Some(&clock.driver),
            Self::Software(_) => None,
        }
    }

    /// Provides mutable access to the wrapped driver.
    pub fn driver_mut(&mut self) -> Option<&mut C> {
        match self {
            Self::Hardware(clock) => Some(&mut clock.driver),
            Self::Software(_) => None,
        }
    }
}

impl<C: ClockCapability> AlarmPort for TimeSource<C> {
    fn has_hardware_alarm(&self) -> bool {
        self.has_hardware_clock()
    }

    fn arm(&mut self, epoch: Epoch) -> bool {
        match self {
            Self::Hardware(clock) => {
                let result = clock.driver.arm_alarm(epoch);
                clock.note(result).is_some()
            }
            Self::Software(_) => false,
        }
    }

    fn fired(&mut self) -> bool {
        match self {
            Self::Hardware(clock) => {
                let result = clock.driver.alarm_fired();
                clock.note(result).unwrap_or(false)
            }
            Self::Software(_) => false,
        }
    }

    fn clear(&mut self) {
        if let Self::Hardware(clock) = self {
            let result = clock.driver.clear_alarm();
            clock.note(result);
        }
    }
}

/// Clock driver used when the hardware clock is absent; never constructed.
#[derive(Copy, Clone, Debug)]
pub enum NoClock {}

impl ClockCapability for NoClock {
    type Error = ();

    fn now(&mut self) -> Result<Epoch, Self::Error> {
        match *self {}
    }

    fn arm_alarm(&mut self, _: Epoch) -> Result<(), Self::Error> {
        match *self {}
    }

    fn alarm_fired(&mut self) -> Result<bool, Self::Error> {
        match *self {}
    }

    fn clear_alarm(&mut self) -> Result<(), Self::Error> {
        match *self {}
    }

    fn select_output(&mut self, _: ClockOutput) -> Result<(), Self::Error> {
        match *self {}
    }
}
