//! Board adapters that implement the `logger-core` traits on the STM32G0.
//!
//! Edge inputs are owned by the edge task; the board only reads the levels it
//! publishes and toggles which edge sources may raise wake flags.

#![cfg(target_os = "none")]

pub mod sleep;

use embassy_stm32::gpio::{Level, Output};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::mode::Blocking;
use embassy_time::Instant;
use logger_core::controller::Board;
use logger_core::mode::DeviceMode;
use logger_core::wake::{PinLevels, WakeSignal, WakeSignalSet};
use portable_atomic::Ordering;

use crate::rtc::RegisterBus;
use crate::runtime::{EDGE_SOURCES, PIN_LEVELS, RESYNC_TICK, SERIAL_PIPE, SLEPT_MS};

/// Blocking I2C peripheral carrying the DS3231.
pub struct I2cBus<'d>(pub I2c<'d, Blocking>);

impl RegisterBus for I2cBus<'_> {
    type Error = i2c::Error;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        self.0.blocking_write(address, bytes)
    }

    fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.0.blocking_write_read(address, bytes, buffer)
    }
}

/// Milliseconds the CPU spent awake since boot.
#[allow(clippy::cast_possible_truncation)]
pub fn awake_millis() -> u32 {
    let uptime = Instant::now().as_millis() as u32;
    uptime.wrapping_sub(SLEPT_MS.load(Ordering::Acquire))
}

pub struct FirmwareBoard<'d> {
    backlight: Output<'d>,
}

impl<'d> FirmwareBoard<'d> {
    pub fn new(backlight: Output<'d>) -> Self {
        Self { backlight }
    }

    fn levels() -> PinLevels {
        PinLevels::from_bits(PIN_LEVELS.load(Ordering::Acquire))
    }

    fn update_sources(update: impl Fn(WakeSignalSet) -> WakeSignalSet) {
        // Only the control task writes the source mask.
        let current = WakeSignalSet::from_bits(EDGE_SOURCES.load(Ordering::Acquire));
        EDGE_SOURCES.store(update(current).bits(), Ordering::Release);
    }
}

impl Board for FirmwareBoard<'_> {
    fn millis(&mut self) -> u32 {
        awake_millis()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn uptime_ms(&mut self) -> u32 {
        Instant::now().as_millis() as u32
    }

    fn mode_input(&mut self) -> DeviceMode {
        DeviceMode::from_switch_level(Self::levels().is_high(PinLevels::MODE_SWITCH))
    }

    fn button_held(&mut self) -> bool {
        // Active low with pull-up.
        !Self::levels().is_high(PinLevels::BUTTON)
    }

    fn serial_pending(&mut self) -> bool {
        !SERIAL_PIPE.is_empty()
    }

    fn service_serial(&mut self) {
        let mut buffer = [0u8; 32];
        let mut total = 0usize;
        while let Ok(count) = SERIAL_PIPE.try_read(&mut buffer) {
            total += count;
        }
        if total > 0 {
            defmt::debug!("serial: {} bytes", total);
        }
    }

    fn mask_mode_switch(&mut self, masked: bool) {
        Self::update_sources(|sources| {
            if masked {
                sources.without(WakeSignal::ModeSwitch)
            } else {
                sources.with(WakeSignal::ModeSwitch)
            }
        });
    }

    fn enable_tick(&mut self) {
        RESYNC_TICK.store(true, Ordering::Release);
        Self::update_sources(|sources| sources.with(WakeSignal::Tick));
    }

    fn set_backlight(&mut self, on: bool) {
        self.backlight.set_level(Level::from(on));
    }
}
