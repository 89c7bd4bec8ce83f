use embassy_futures::select::select3;
use embassy_stm32::exti::ExtiInput;
use logger_core::wake::{EdgeDecoder, PinLevels, WakeSignalSet};
use portable_atomic::Ordering;

use super::{EDGE_SOURCES, PIN_LEVELS, RESYNC_TICK, SHARED_MODE, WAKE_FLAGS, notify};

pub fn sample(switch: &ExtiInput<'_>, tick: &ExtiInput<'_>, button: &ExtiInput<'_>) -> PinLevels {
    PinLevels::default()
        .with_level(PinLevels::MODE_SWITCH, switch.is_high())
        .with_level(PinLevels::TICK, tick.is_high())
        .with_level(PinLevels::BUTTON, button.is_high())
}

/// Pin-change handler for the mode switch, the clock output and the button.
#[embassy_executor::task]
pub async fn run(
    mut switch: ExtiInput<'static>,
    mut tick: ExtiInput<'static>,
    mut button: ExtiInput<'static>,
    initial: PinLevels,
) -> ! {
    let mut decoder = EdgeDecoder::new(initial);
    loop {
        select3(
            switch.wait_for_any_edge(),
            tick.wait_for_any_edge(),
            button.wait_for_any_edge(),
        )
        .await;

        let levels = sample(&switch, &tick, &button);
        if RESYNC_TICK.swap(false, Ordering::AcqRel) {
            let last = decoder.last();
            decoder.resync(last.with_level(PinLevels::TICK, levels.is_high(PinLevels::TICK)));
        }

        let enabled = WakeSignalSet::from_bits(EDGE_SOURCES.load(Ordering::Acquire));
        let raised = decoder.on_change(levels, SHARED_MODE.get(), enabled, &WAKE_FLAGS);
        PIN_LEVELS.store(levels.bits(), Ordering::Release);
        notify(raised);
    }
}
