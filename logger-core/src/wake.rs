//! Latched wake reasons shared between edge handlers and the main loop.
//!
//! Edge handlers only ever *raise* flags; the main loop *takes* (test-and-clear)
//! exactly the flag it is about to act on. Both operations are single atomic
//! read-modify-writes on one byte, so a flag raised while the loop is handling
//! another one is never lost.

use portable_atomic::{AtomicU8, Ordering};

use crate::mode::DeviceMode;

/// Individual wake reasons.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WakeSignal {
    /// Hardware clock edge: 1 Hz tick in clock mode, alarm in logger mode.
    Tick,
    /// Mode slide switch edge, or a debounced mode promotion.
    ModeSwitch,
    /// Auxiliary (backlight) button press.
    Button,
    /// Activity on the serial receive line.
    Serial,
}

impl WakeSignal {
    /// Every signal, in reporting priority order.
    pub const ALL: [WakeSignal; 4] = [
        WakeSignal::Tick,
        WakeSignal::ModeSwitch,
        WakeSignal::Button,
        WakeSignal::Serial,
    ];

    const fn bit(self) -> u8 {
        match self {
            WakeSignal::Tick => 1 << 0,
            WakeSignal::ModeSwitch => 1 << 1,
            WakeSignal::Button => 1 << 2,
            WakeSignal::Serial => 1 << 3,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            WakeSignal::Tick => "tick",
            WakeSignal::ModeSwitch => "mode-switch",
            WakeSignal::Button => "button",
            WakeSignal::Serial => "serial",
        }
    }
}

/// Value-type set of wake signals.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WakeSignalSet(u8);

impl WakeSignalSet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(0x0F);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn single(signal: WakeSignal) -> Self {
        Self(signal.bit())
    }

    #[must_use]
    pub const fn with(self, signal: WakeSignal) -> Self {
        Self(self.0 | signal.bit())
    }

    #[must_use]
    pub const fn without(self, signal: WakeSignal) -> Self {
        Self(self.0 & !signal.bit())
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn contains(self, signal: WakeSignal) -> bool {
        self.0 & signal.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Highest-priority signal present, if any.
    pub fn primary(self) -> Option<WakeSignal> {
        WakeSignal::ALL
            .into_iter()
            .find(|signal| self.contains(*signal))
    }

    pub fn iter(self) -> impl Iterator<Item = WakeSignal> {
        WakeSignal::ALL
            .into_iter()
            .filter(move |signal| self.contains(*signal))
    }
}

impl From<WakeSignal> for WakeSignalSet {
    fn from(signal: WakeSignal) -> Self {
        Self::single(signal)
    }
}

/// Interrupt-safe latched flag set.
pub struct WakeFlags {
    bits: AtomicU8,
}

impl WakeFlags {
    pub const fn new() -> Self {
        Self {
            bits: AtomicU8::new(0),
        }
    }

    /// Producer side: latches `signal`. Idempotent.
    pub fn raise(&self, signal: WakeSignal) {
        self.bits.fetch_or(signal.bit(), Ordering::AcqRel);
    }

    /// Consumer side: clears `signal` and reports whether it was set.
    pub fn take(&self, signal: WakeSignal) -> bool {
        let previous = self.bits.fetch_and(!signal.bit(), Ordering::AcqRel);
        previous & signal.bit() != 0
    }

    /// Clears exactly the signals in `consumed`, leaving any others latched.
    pub fn clear(&self, consumed: WakeSignalSet) {
        self.bits.fetch_and(!consumed.bits(), Ordering::AcqRel);
    }

    pub fn is_raised(&self, signal: WakeSignal) -> bool {
        self.bits.load(Ordering::Acquire) & signal.bit() != 0
    }

    /// Current latched set without clearing anything.
    pub fn snapshot(&self) -> WakeSignalSet {
        WakeSignalSet::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Latched signals restricted to `relevant`.
    pub fn pending(&self, relevant: WakeSignalSet) -> WakeSignalSet {
        self.snapshot().intersection(relevant)
    }
}

impl Default for WakeFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Operating mode published to edge handlers, which decode the tick polarity
/// from it.
pub struct SharedMode {
    raw: AtomicU8,
}

impl SharedMode {
    pub const fn new(mode: DeviceMode) -> Self {
        Self {
            raw: AtomicU8::new(mode.as_raw()),
        }
    }

    pub fn set(&self, mode: DeviceMode) {
        self.raw.store(mode.as_raw(), Ordering::Release);
    }

    pub fn get(&self) -> DeviceMode {
        DeviceMode::from_raw(self.raw.load(Ordering::Acquire))
    }
}

/// Logical levels of the wake-capable input lines, sampled together.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PinLevels(u8);

impl PinLevels {
    pub const MODE_SWITCH: u8 = 1 << 0;
    pub const TICK: u8 = 1 << 1;
    pub const SERIAL_RX: u8 = 1 << 2;
    pub const BUTTON: u8 = 1 << 3;

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_high(self, line: u8) -> bool {
        self.0 & line != 0
    }

    #[must_use]
    pub const fn with_level(self, line: u8, high: bool) -> Self {
        if high {
            Self(self.0 | line)
        } else {
            Self(self.0 & !line)
        }
    }
}

/// Tick edge that signals a wake in `mode`: the 1 Hz square wave counts on its
/// rising edge, the active-low alarm on its falling edge.
pub const fn tick_wakes_on_rising(mode: DeviceMode) -> bool {
    matches!(mode, DeviceMode::Clock)
}

/// Pin-change decoder owned by the edge handler.
///
/// Only the handler updates `last`; the main loop asks for a [`resync`] after
/// reconfiguring the tick source so a level change caused by the switch-over is
/// not reported as an edge.
///
/// [`resync`]: EdgeDecoder::resync
pub struct EdgeDecoder {
    last: PinLevels,
}

impl EdgeDecoder {
    pub const fn new(initial: PinLevels) -> Self {
        Self { last: initial }
    }

    pub fn resync(&mut self, levels: PinLevels) {
        self.last = levels;
    }

    pub const fn last(&self) -> PinLevels {
        self.last
    }

    /// Compares `now` against the previous sample and raises the resulting
    /// wake flags. Returns the set that was raised.
    pub fn on_change(
        &mut self,
        now: PinLevels,
        mode: DeviceMode,
        enabled: WakeSignalSet,
        flags: &WakeFlags,
    ) -> WakeSignalSet {
        let changed = now.bits() ^ self.last.bits();
        self.last = now;

        let mut raised = WakeSignalSet::EMPTY;
        if changed & PinLevels::MODE_SWITCH != 0 {
            raised = raised.with(WakeSignal::ModeSwitch);
        }
        if changed & PinLevels::TICK != 0 {
            let rising = now.is_high(PinLevels::TICK);
            if rising == tick_wakes_on_rising(mode) {
                raised = raised.with(WakeSignal::Tick);
            }
        }
        if changed & PinLevels::SERIAL_RX != 0 {
            raised = raised.with(WakeSignal::Serial);
        }
        if changed & PinLevels::BUTTON != 0 && !now.is_high(PinLevels::BUTTON) {
            raised = raised.with(WakeSignal::Button);
        }

        let raised = raised.intersection(enabled);
        for signal in raised.iter() {
            flags.raise(signal);
        }
        raised
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_only_the_consumed_flag() {
        let flags = WakeFlags::new();
        flags.raise(WakeSignal::Tick);
        flags.raise(WakeSignal::Serial);

        assert!(flags.take(WakeSignal::Tick));
        assert!(!flags.take(WakeSignal::Tick));
        assert!(flags.is_raised(WakeSignal::Serial));
    }

    #[test]
    fn raise_between_snapshot_and_clear_survives() {
        let flags = WakeFlags::new();
        flags.raise(WakeSignal::Button);
        let observed = flags.snapshot();

        // Edge handler fires before the loop clears what it observed.
        flags.raise(WakeSignal::Tick);
        flags.clear(observed);

        assert_eq!(flags.snapshot(), WakeSignalSet::single(WakeSignal::Tick));
    }

    #[test]
    fn primary_signal_follows_priority() {
        let set = WakeSignalSet::EMPTY
            .with(WakeSignal::Serial)
            .with(WakeSignal::ModeSwitch);
        assert_eq!(set.primary(), Some(WakeSignal::ModeSwitch));
        assert_eq!(WakeSignalSet::EMPTY.primary(), None);
    }

    #[test]
    fn tick_polarity_depends_on_mode() {
        let flags = WakeFlags::new();
        let mut decoder = EdgeDecoder::new(PinLevels::from_bits(PinLevels::TICK));

        // Falling edge: alarm in logger mode.
        let low = PinLevels::from_bits(0);
        let raised = decoder.on_change(low, DeviceMode::Logger, WakeSignalSet::ALL, &flags);
        assert_eq!(raised, WakeSignalSet::single(WakeSignal::Tick));
        assert!(flags.take(WakeSignal::Tick));

        // Rising edge is ignored in logger mode ...
        let high = PinLevels::from_bits(PinLevels::TICK);
        let raised = decoder.on_change(high, DeviceMode::Logger, WakeSignalSet::ALL, &flags);
        assert!(raised.is_empty());

        // ... but is the 1 Hz tick in clock mode.
        decoder.resync(low);
        let raised = decoder.on_change(high, DeviceMode::Clock, WakeSignalSet::ALL, &flags);
        assert!(raised.contains(WakeSignal::Tick));
    }

    #[test]
    fn button_wakes_on_press_only_and_masked_switch_is_ignored() {
        let flags = WakeFlags::new();
        let idle = PinLevels::from_bits(PinLevels::BUTTON);
        let mut decoder = EdgeDecoder::new(idle);

        let pressed = idle
            .with_level(PinLevels::BUTTON, false)
            .with_level(PinLevels::MODE_SWITCH, true);
        let enabled = WakeSignalSet::ALL.without(WakeSignal::ModeSwitch);
        let raised = decoder.on_change(pressed, DeviceMode::Clock, enabled, &flags);
        assert_eq!(raised, WakeSignalSet::single(WakeSignal::Button));

        let raised = decoder.on_change(idle, DeviceMode::Clock, WakeSignalSet::ALL, &flags);
        assert_eq!(raised, WakeSignalSet::single(WakeSignal::ModeSwitch));
    }

    #[test]
    fn shared_mode_round_trips() {
        let shared = SharedMode::new(DeviceMode::Logger);
        assert_eq!(shared.get(), DeviceMode::Logger);
        shared.set(DeviceMode::Clock);
        assert_eq!(shared.get(), DeviceMode::Clock);
    }
}
