use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, Pull, Speed};
use embassy_stm32::i2c::{self, I2c};
use embassy_stm32::time::Hertz;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::Pipe;
use embassy_sync::signal::Signal;
use logger_core::config::DeviceConfig;
use logger_core::controller::DeviceController;
use logger_core::mode::DeviceMode;
use logger_core::time_source::TimeSource;
use logger_core::wake::{SharedMode, WakeFlags, WakeSignal, WakeSignalSet};
use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use crate::hw::sleep::TimerSleep;
use crate::hw::{FirmwareBoard, I2cBus};
use crate::presenter::LogPresenter;
use crate::rtc::Ds3231;

mod control_task;
mod edge_task;
mod serial_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Ends a sleep quantum early.
pub(crate) type WakeNotifier = Signal<CriticalSectionRawMutex, ()>;

pub(crate) const SERIAL_PIPE_DEPTH: usize = 64;

pub(crate) static WAKE_FLAGS: WakeFlags = WakeFlags::new();
pub(crate) static SHARED_MODE: SharedMode = SharedMode::new(DeviceMode::Clock);
pub(crate) static WAKE: WakeNotifier = Signal::new();

/// Last levels sampled by the edge task, as `PinLevels` bits.
pub(crate) static PIN_LEVELS: AtomicU8 = AtomicU8::new(0);
/// Edge sources allowed to raise wake flags, as [`WakeSignalSet`] bits.
pub(crate) static EDGE_SOURCES: AtomicU8 = AtomicU8::new(
    WakeSignalSet::EMPTY
        .with(WakeSignal::Button)
        .with(WakeSignal::Serial)
        .bits(),
);
/// Set when the tick output was reconfigured; the edge task re-baselines.
pub(crate) static RESYNC_TICK: AtomicBool = AtomicBool::new(false);
/// Milliseconds spent suspended since boot.
pub(crate) static SLEPT_MS: AtomicU32 = AtomicU32::new(0);
pub(crate) static SERIAL_PIPE: Pipe<CriticalSectionRawMutex, SERIAL_PIPE_DEPTH> = Pipe::new();

const RTC_BUS_FREQUENCY: Hertz = Hertz(100_000);

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA4,
        PA5,
        PB0,
        PB1,
        PB6,
        PB7,
        EXTI0,
        EXTI1,
        EXTI4,
        I2C1,
        USART5,
        ..
    } = hal::init(config);

    // Mode switch high selects clock mode; the RTC output and the button are
    // open-drain and active low.
    let switch = ExtiInput::new(PA0, EXTI0, Pull::Up);
    let tick = ExtiInput::new(PA1, EXTI1, Pull::Up);
    let button = ExtiInput::new(PA4, EXTI4, Pull::Up);
    let levels = edge_task::sample(&switch, &tick, &button);
    PIN_LEVELS.store(levels.bits(), Ordering::Release);

    let mut i2c_config = i2c::Config::default();
    i2c_config.frequency = RTC_BUS_FREQUENCY;
    let bus = I2cBus(I2c::new_blocking(I2C1, PB6, PB7, i2c_config));
    let time = match Ds3231::probe(bus) {
        Ok((rtc, report)) => {
            if report.lost_power {
                defmt::warn!("rtc: oscillator stopped, time is not trustworthy");
            }
            TimeSource::detect(Some(rtc))
        }
        Err((_, err)) => {
            defmt::warn!("rtc: not detected ({})", defmt::Display2Format(&err));
            TimeSource::detect(None)
        }
    };

    let board = FirmwareBoard::new(Output::new(PA5, Level::Low, Speed::Low));
    let controller = DeviceController::start(
        DeviceConfig::DEFAULT,
        time,
        &WAKE_FLAGS,
        &SHARED_MODE,
        board,
        LogPresenter,
        TimerSleep::new(&WAKE),
    );

    spawner
        .spawn(edge_task::run(switch, tick, button, levels))
        .expect("failed to spawn edge task");
    spawner
        .spawn(serial_task::run(USART5, PB0, PB1))
        .expect("failed to spawn serial task");
    spawner
        .spawn(control_task::run(controller))
        .expect("failed to spawn control task");

    core::future::pending::<()>().await;
}

/// Ends any sleep in progress once something was raised.
pub(crate) fn notify(raised: WakeSignalSet) {
    if !raised.is_empty() {
        WAKE.signal(());
    }
}
