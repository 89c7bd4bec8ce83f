//! Build-time timing configuration for the scheduler, mode switch, and
//! keep-awake windows.
//!
//! The defaults mirror the values the board ships with: a 30 s logger cadence on
//! a wall-clock grid, a 90 s look-ahead bound, a 120 s silence failsafe, and the
//! slide-switch debounce/guard/suppression windows. The grouped config structs
//! validate the relations the scheduler relies on so an inconsistent set of
//! constants is rejected at compile time when used in a `const` context.

use core::fmt;
use core::time::Duration;

/// Logger sample period on the wall-clock grid (seconds).
pub const SAMPLE_INTERVAL_SECS: u32 = 30;
/// Largest distance the next alarm may sit ahead of "now" before it is treated
/// as desynchronized (seconds).
pub const ALARM_MAX_AHEAD_SECS: u32 = 90;
/// Silence window after which the failsafe forces a reschedule (seconds).
pub const ALARM_FAILSAFE_SECS: u32 = 120;

/// The raw mode input must hold a new level this long before it becomes stable.
pub const MODE_DEBOUNCE: Duration = Duration::from_millis(80);
/// Minimum spacing between two honoured mode entries.
pub const MODE_REENTRY_GUARD: Duration = Duration::from_millis(300);
/// How long the mode switch edge source stays masked after a mode entry.
pub const MODE_SWITCH_SUPPRESS: Duration = Duration::from_millis(120);

/// Backlight auto-off delay (seconds of clock time).
pub const BACKLIGHT_DURATION_SECS: u32 = 10;
/// Minimum spacing between two accepted backlight button presses.
pub const BUTTON_DEBOUNCE: Duration = Duration::from_millis(150);
/// Awake extension granted by serial activity.
pub const SERIAL_KEEP_AWAKE: Duration = Duration::from_millis(1_200);
/// Awake extension granted while the backlight is lit.
pub const BACKLIGHT_KEEP_AWAKE: Duration = Duration::from_millis(1_500);
/// Awake window after entering clock mode so the first tick is observed.
pub const CLOCK_ENTRY_KEEP_AWAKE: Duration = Duration::from_millis(1_200);

/// Invalid combinations of timing constants.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    /// The sampling interval must be non-zero.
    ZeroInterval,
    /// The failsafe window must exceed the sampling interval.
    FailsafeNotAboveInterval { failsafe: u32, interval: u32 },
    /// The look-ahead bound must allow at least one full interval.
    LookAheadBelowInterval { max_ahead: u32, interval: u32 },
    /// The switch suppression window must be shorter than the re-entry guard.
    SuppressNotBelowGuard,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroInterval => f.write_str("sample interval must be non-zero"),
            ConfigError::FailsafeNotAboveInterval { failsafe, interval } => write!(
                f,
                "failsafe window {failsafe}s must exceed sample interval {interval}s"
            ),
            ConfigError::LookAheadBelowInterval {
                max_ahead,
                interval,
            } => write!(
                f,
                "look-ahead bound {max_ahead}s is shorter than sample interval {interval}s"
            ),
            ConfigError::SuppressNotBelowGuard => {
                f.write_str("switch suppression must be shorter than the re-entry guard")
            }
        }
    }
}

/// Alarm grid and recovery bounds used by [`AlarmScheduler`](crate::scheduler::AlarmScheduler).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SchedulerConfig {
    interval: u32,
    max_ahead: u32,
    failsafe: Option<u32>,
}

impl SchedulerConfig {
    /// Shipping configuration.
    pub const DEFAULT: Self = match Self::new(
        SAMPLE_INTERVAL_SECS,
        ALARM_MAX_AHEAD_SECS,
        ALARM_FAILSAFE_SECS,
    ) {
        Ok(config) => config,
        Err(_) => panic!("default scheduler constants are inconsistent"),
    };

    /// Validates and builds a scheduler configuration.
    pub const fn new(interval: u32, max_ahead: u32, failsafe: u32) -> Result<Self, ConfigError> {
        if interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if failsafe <= interval {
            return Err(ConfigError::FailsafeNotAboveInterval { failsafe, interval });
        }
        if max_ahead < interval {
            return Err(ConfigError::LookAheadBelowInterval {
                max_ahead,
                interval,
            });
        }
        Ok(Self {
            interval,
            max_ahead,
            failsafe: Some(failsafe),
        })
    }

    /// Same grid and look-ahead, with the silence failsafe disabled.
    #[must_use]
    pub const fn without_failsafe(self) -> Self {
        Self {
            failsafe: None,
            ..self
        }
    }

    /// Sampling interval `I` in seconds.
    pub const fn interval(&self) -> u32 {
        self.interval
    }

    /// Look-ahead bound `A` in seconds.
    pub const fn max_ahead(&self) -> u32 {
        self.max_ahead
    }

    /// Failsafe silence window `F` in seconds, if the failsafe is enabled.
    pub const fn failsafe(&self) -> Option<u32> {
        self.failsafe
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Debounce, guard, and suppression windows for the mode switch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ModeTiming {
    pub debounce: Duration,
    pub reentry_guard: Duration,
    pub suppress: Duration,
}

impl ModeTiming {
    /// Shipping configuration.
    pub const DEFAULT: Self =
        match Self::new(MODE_DEBOUNCE, MODE_REENTRY_GUARD, MODE_SWITCH_SUPPRESS) {
            Ok(timing) => timing,
            Err(_) => panic!("default mode timing constants are inconsistent"),
        };

    /// Validates and builds the mode timing windows.
    pub const fn new(
        debounce: Duration,
        reentry_guard: Duration,
        suppress: Duration,
    ) -> Result<Self, ConfigError> {
        if suppress.as_millis() >= reentry_guard.as_millis() {
            return Err(ConfigError::SuppressNotBelowGuard);
        }
        Ok(Self {
            debounce,
            reentry_guard,
            suppress,
        })
    }

    pub const fn debounce_ms(&self) -> u32 {
        millis(self.debounce)
    }

    pub const fn reentry_guard_ms(&self) -> u32 {
        millis(self.reentry_guard)
    }

    pub const fn suppress_ms(&self) -> u32 {
        millis(self.suppress)
    }
}

impl Default for ModeTiming {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Backlight and keep-awake windows.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AwakeTiming {
    pub backlight_secs: u32,
    pub button_debounce: Duration,
    pub serial_keep_awake: Duration,
    pub backlight_keep_awake: Duration,
    pub clock_entry_keep_awake: Duration,
}

impl AwakeTiming {
    /// Shipping configuration.
    pub const DEFAULT: Self = Self {
        backlight_secs: BACKLIGHT_DURATION_SECS,
        button_debounce: BUTTON_DEBOUNCE,
        serial_keep_awake: SERIAL_KEEP_AWAKE,
        backlight_keep_awake: BACKLIGHT_KEEP_AWAKE,
        clock_entry_keep_awake: CLOCK_ENTRY_KEEP_AWAKE,
    };
}

impl Default for AwakeTiming {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Complete device configuration handed to the controller.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceConfig {
    pub scheduler: SchedulerConfig,
    pub mode: ModeTiming,
    pub awake: AwakeTiming,
}

impl DeviceConfig {
    pub const DEFAULT: Self = Self {
        scheduler: SchedulerConfig::DEFAULT,
        mode: ModeTiming::DEFAULT,
        awake: AwakeTiming::DEFAULT,
    };
}

/// Converts a window to whole milliseconds, saturating at `u32::MAX`.
#[allow(clippy::cast_possible_truncation)]
pub const fn millis(duration: Duration) -> u32 {
    let ms = duration.as_millis();
    if ms > u32::MAX as u128 {
        u32::MAX
    } else {
        ms as u32
    }
}
