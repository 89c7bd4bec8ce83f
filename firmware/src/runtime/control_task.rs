use embassy_time::{Duration, Timer};
use logger_core::controller::{DeviceController, Rest};

use crate::hw::sleep::TimerSleep;
use crate::hw::{FirmwareBoard, I2cBus};
use crate::presenter::LogPresenter;
use crate::rtc::Ds3231;
use crate::telemetry::TelemetryDrain;

/// Pause between iterations while the keep-awake window is open.
const AWAKE_POLL: Duration = Duration::from_millis(5);

pub type FirmwareController = DeviceController<
    'static,
    Ds3231<I2cBus<'static>>,
    FirmwareBoard<'static>,
    LogPresenter,
    TimerSleep,
>;

#[embassy_executor::task]
pub async fn run(mut controller: FirmwareController) -> ! {
    let mut drain = TelemetryDrain::new();
    drain.drain(controller.telemetry());

    loop {
        let iteration = controller.run_once().await;
        drain.drain(controller.telemetry());

        if matches!(iteration.rest, Rest::StayedAwake | Rest::NoSleep) {
            Timer::after(AWAKE_POLL).await;
        }
    }
}
