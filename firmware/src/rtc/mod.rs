//! DS3231 real-time clock support.
//!
//! The register helpers (BCD, calendar/epoch conversion) are pure so they can
//! be exercised on the host. [`Ds3231`] talks to the chip through the small
//! [`RegisterBus`] trait; the target build implements it for the embassy I2C
//! peripheral in `hw`.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use core::fmt;

use logger_core::time_source::{ClockCapability, ClockOutput, Epoch};

/// 7-bit bus address of the DS3231.
pub const DS3231_ADDRESS: u8 = 0x68;

const REG_SECONDS: u8 = 0x00;
const REG_ALARM1_SECONDS: u8 = 0x07;
const REG_CONTROL: u8 = 0x0E;
const REG_STATUS: u8 = 0x0F;

const CONTROL_INTCN: u8 = 1 << 2;
const CONTROL_A2IE: u8 = 1 << 1;
const CONTROL_A1IE: u8 = 1 << 0;
const CONTROL_RATE_SELECT: u8 = 0b0001_1000;

const STATUS_OSF: u8 = 1 << 7;
const STATUS_A2F: u8 = 1 << 1;
const STATUS_A1F: u8 = 1 << 0;

const SECONDS_PER_DAY: u32 = 86_400;
/// Days from 1600-03-01 to 1970-01-01.
const DAYS_FROM_1600_03_01: u32 = 135_080;
const FIRST_YEAR: u16 = 2000;
const LAST_YEAR: u16 = 2099;

/// Register-level access to the clock chip.
pub trait RegisterBus {
    type Error;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Self::Error>;

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8])
    -> Result<(), Self::Error>;
}

/// Failures reported by the DS3231 driver.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RtcError<E> {
    /// The bus transfer failed.
    Bus(E),
    /// The registers held a value that is not a valid calendar time.
    InvalidTime,
    /// The epoch lies outside the chip's 2000-2099 calendar.
    OutOfRange(Epoch),
}

impl<E: fmt::Debug> fmt::Display for RtcError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtcError::Bus(err) => write!(f, "bus error: {err:?}"),
            RtcError::InvalidTime => f.write_str("clock registers hold an invalid time"),
            RtcError::OutOfRange(epoch) => write!(f, "epoch {epoch} outside 2000-2099"),
        }
    }
}

/// Broken-down UTC time as kept by the chip.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CalendarTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl CalendarTime {
    /// Splits a Unix epoch. `None` before 2000 or after 2099.
    pub fn from_epoch(epoch: Epoch) -> Option<Self> {
        let days = epoch / SECONDS_PER_DAY;
        let rem = epoch % SECONDS_PER_DAY;

        // Civil-from-days over 400-year eras counted from 1600-03-01.
        let shifted = days + DAYS_FROM_1600_03_01;
        let era = shifted / 146_097;
        let doe = shifted % 146_097;
        let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = doy - (153 * mp + 2) / 5 + 1;
        let month = if mp < 10 { mp + 3 } else { mp - 9 };
        let year = 1_600 + era * 400 + yoe + u32::from(month <= 2);

        let year = u16::try_from(year).ok()?;
        if !(FIRST_YEAR..=LAST_YEAR).contains(&year) {
            return None;
        }
        Some(Self {
            year,
            month: narrow(month)?,
            day: narrow(day)?,
            hour: narrow(rem / 3_600)?,
            minute: narrow(rem % 3_600 / 60)?,
            second: narrow(rem % 60)?,
        })
    }

    /// Joins the fields back into a Unix epoch. `None` for invalid fields.
    pub fn to_epoch(&self) -> Option<Epoch> {
        if !(FIRST_YEAR..=LAST_YEAR).contains(&self.year)
            || !(1..=12).contains(&self.month)
            || self.day == 0
            || self.day > days_in_month(self.year, self.month)
            || self.hour > 23
            || self.minute > 59
            || self.second > 59
        {
            return None;
        }

        let month = u32::from(self.month);
        let (year, month) = if month <= 2 {
            (u32::from(self.year) - 1, month + 9)
        } else {
            (u32::from(self.year), month - 3)
        };
        let yoe = year - 1_600;
        let era = yoe / 400;
        let yoe = yoe % 400;
        let doy = (153 * month + 2) / 5 + u32::from(self.day) - 1;
        let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
        let days = era * 146_097 + doe - DAYS_FROM_1600_03_01;

        Some(
            days * SECONDS_PER_DAY
                + u32::from(self.hour) * 3_600
                + u32::from(self.minute) * 60
                + u32::from(self.second),
        )
    }

    /// Day of week, 1 = Monday.
    pub fn weekday(&self) -> u8 {
        let days = self.to_epoch().map_or(0, |epoch| epoch / SECONDS_PER_DAY);
        // 1970-01-01 was a Thursday.
        narrow((days + 3) % 7 + 1).unwrap_or(1)
    }
}

fn narrow(value: u32) -> Option<u8> {
    u8::try_from(value).ok()
}

const fn is_leap(year: u16) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

const fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        2 if is_leap(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

pub const fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Decodes a BCD byte, rejecting nibbles above 9.
pub const fn from_bcd(value: u8) -> Option<u8> {
    let high = value >> 4;
    let low = value & 0x0F;
    if high > 9 || low > 9 {
        None
    } else {
        Some(high * 10 + low)
    }
}

/// Encodes the seven timekeeping registers starting at `0x00`.
pub fn encode_time(time: &CalendarTime) -> [u8; 7] {
    let century = u8::try_from(time.year - FIRST_YEAR).unwrap_or(0);
    [
        to_bcd(time.second),
        to_bcd(time.minute),
        to_bcd(time.hour),
        time.weekday(),
        to_bcd(time.day),
        to_bcd(time.month),
        to_bcd(century),
    ]
}

/// Decodes the seven timekeeping registers. 12-hour mode is honoured.
pub fn decode_time(registers: &[u8; 7]) -> Option<CalendarTime> {
    let hours = registers[2];
    let hour = if hours & 0x40 != 0 {
        let base = from_bcd(hours & 0x1F)? % 12;
        if hours & 0x20 != 0 { base + 12 } else { base }
    } else {
        from_bcd(hours & 0x3F)?
    };

    Some(CalendarTime {
        year: FIRST_YEAR + u16::from(from_bcd(registers[6])?),
        month: from_bcd(registers[5] & 0x1F)?,
        day: from_bcd(registers[4] & 0x3F)?,
        hour,
        minute: from_bcd(registers[1] & 0x7F)?,
        second: from_bcd(registers[0] & 0x7F)?,
    })
}

/// Alarm 1 registers matching date, hours, minutes and seconds.
pub fn encode_alarm1(time: &CalendarTime) -> [u8; 4] {
    [
        to_bcd(time.second),
        to_bcd(time.minute),
        to_bcd(time.hour),
        to_bcd(time.day),
    ]
}

/// Control register value that routes the pin to the given output.
pub const fn control_for(current: u8, output: ClockOutput) -> u8 {
    match output {
        // INTCN low with RS1/RS2 low selects the 1 Hz square wave.
        ClockOutput::SecondTick => current & !(CONTROL_INTCN | CONTROL_RATE_SELECT | CONTROL_A1IE),
        ClockOutput::AlarmInterrupt => (current | CONTROL_INTCN | CONTROL_A1IE) & !CONTROL_A2IE,
    }
}

/// DS3231 driver implementing the controller's clock capability.
pub struct Ds3231<B> {
    bus: B,
}

impl<B: RegisterBus> Ds3231<B> {
    /// Reads the status register to confirm the chip answers. Returns the bus
    /// back on failure so the caller can run without a hardware clock.
    pub fn probe(mut bus: B) -> Result<(Self, ProbeReport), (B, RtcError<B::Error>)> {
        let mut status = [0u8];
        match bus.write_read(DS3231_ADDRESS, &[REG_STATUS], &mut status) {
            Ok(()) => Ok((
                Self { bus },
                ProbeReport {
                    lost_power: status[0] & STATUS_OSF != 0,
                },
            )),
            Err(err) => Err((bus, RtcError::Bus(err))),
        }
    }

    /// Sets the clock and clears the oscillator-stop flag.
    pub fn set_epoch(&mut self, epoch: Epoch) -> Result<(), RtcError<B::Error>> {
        let time = CalendarTime::from_epoch(epoch).ok_or(RtcError::OutOfRange(epoch))?;
        let registers = encode_time(&time);
        let mut frame = [0u8; 8];
        frame[0] = REG_SECONDS;
        frame[1..].copy_from_slice(&registers);
        self.bus
            .write(DS3231_ADDRESS, &frame)
            .map_err(RtcError::Bus)?;
        self.update_register(REG_STATUS, |status| status & !STATUS_OSF)
    }

    pub fn release(self) -> B {
        self.bus
    }

    fn read_register(&mut self, register: u8) -> Result<u8, RtcError<B::Error>> {
        let mut value = [0u8];
        self.bus
            .write_read(DS3231_ADDRESS, &[register], &mut value)
            .map_err(RtcError::Bus)?;
        Ok(value[0])
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), RtcError<B::Error>> {
        self.bus
            .write(DS3231_ADDRESS, &[register, value])
            .map_err(RtcError::Bus)
    }

    fn update_register(
        &mut self,
        register: u8,
        update: impl FnOnce(u8) -> u8,
    ) -> Result<(), RtcError<B::Error>> {
        let current = self.read_register(register)?;
        let next = update(current);
        if next == current {
            return Ok(());
        }
        self.write_register(register, next)
    }
}

/// What [`Ds3231::probe`] learned about the chip.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProbeReport {
    /// The oscillator stopped at some point; the time is not trustworthy.
    pub lost_power: bool,
}

impl<B: RegisterBus> ClockCapability for Ds3231<B> {
    type Error = RtcError<B::Error>;

    fn now(&mut self) -> Result<Epoch, Self::Error> {
        let mut registers = [0u8; 7];
        self.bus
            .write_read(DS3231_ADDRESS, &[REG_SECONDS], &mut registers)
            .map_err(RtcError::Bus)?;
        decode_time(&registers)
            .and_then(|time| CalendarTime::to_epoch(&time))
            .ok_or(RtcError::InvalidTime)
    }

    fn arm_alarm(&mut self, epoch: Epoch) -> Result<(), Self::Error> {
        let time = CalendarTime::from_epoch(epoch).ok_or(RtcError::OutOfRange(epoch))?;
        self.select_output(ClockOutput::AlarmInterrupt)?;
        self.update_register(REG_STATUS, |status| status & !(STATUS_A1F | STATUS_A2F))?;

        let alarm = encode_alarm1(&time);
        let mut frame = [0u8; 5];
        frame[0] = REG_ALARM1_SECONDS;
        frame[1..].copy_from_slice(&alarm);
        self.bus
            .write(DS3231_ADDRESS, &frame)
            .map_err(RtcError::Bus)
    }

    fn alarm_fired(&mut self) -> Result<bool, Self::Error> {
        Ok(self.read_register(REG_STATUS)? & STATUS_A1F != 0)
    }

    fn clear_alarm(&mut self) -> Result<(), Self::Error> {
        self.update_register(REG_STATUS, |status| status & !STATUS_A1F)
    }

    fn select_output(&mut self, output: ClockOutput) -> Result<(), Self::Error> {
        if output == ClockOutput::SecondTick {
            self.update_register(REG_STATUS, |status| status & !(STATUS_A1F | STATUS_A2F))?;
        }
        self.update_register(REG_CONTROL, |control| control_for(control, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakeBus {
        registers: [u8; 0x13],
        offline: bool,
    }

    impl RegisterBus for FakeBus {
        type Error = ();

        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), ()> {
            if self.offline || address != DS3231_ADDRESS {
                return Err(());
            }
            let start = usize::from(bytes[0]);
            self.registers[start..start + bytes.len() - 1].copy_from_slice(&bytes[1..]);
            Ok(())
        }

        fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), ()> {
            if self.offline || address != DS3231_ADDRESS {
                return Err(());
            }
            let start = usize::from(bytes[0]);
            buffer.copy_from_slice(&self.registers[start..start + buffer.len()]);
            Ok(())
        }
    }

    // 2024-02-29 13:45:30 UTC
    const LEAP_DAY: Epoch = 1_709_214_330;

    #[test]
    fn calendar_conversion_matches_known_instants() {
        let time = CalendarTime::from_epoch(LEAP_DAY).unwrap();
        assert_eq!(
            time,
            CalendarTime {
                year: 2024,
                month: 2,
                day: 29,
                hour: 13,
                minute: 45,
                second: 30,
            }
        );
        assert_eq!(time.to_epoch(), Some(LEAP_DAY));
        assert_eq!(time.weekday(), 4);

        let millennium = CalendarTime::from_epoch(946_684_800).unwrap();
        assert_eq!((millennium.year, millennium.month, millennium.day), (2000, 1, 1));
        assert_eq!(CalendarTime::from_epoch(946_684_799), None);
    }

    #[test]
    fn every_day_boundary_survives_conversion() {
        let mut epoch = 946_684_800;
        while epoch < 4_102_444_800 {
            let time = CalendarTime::from_epoch(epoch).unwrap();
            assert_eq!(time.to_epoch(), Some(epoch));
            epoch += SECONDS_PER_DAY - 1;
        }
        assert_eq!(CalendarTime::from_epoch(4_102_444_800), None);
    }

    #[test]
    fn invalid_fields_are_rejected() {
        let mut time = CalendarTime::from_epoch(LEAP_DAY).unwrap();
        time.year = 2023;
        assert_eq!(time.to_epoch(), None);
        time.year = 2024;
        time.hour = 24;
        assert_eq!(time.to_epoch(), None);
    }

    #[test]
    fn bcd_round_trips_and_rejects_bad_nibbles() {
        assert_eq!(to_bcd(59), 0x59);
        assert_eq!(from_bcd(0x59), Some(59));
        assert_eq!(from_bcd(0x5A), None);
    }

    #[test]
    fn twelve_hour_registers_decode() {
        let mut registers = encode_time(&CalendarTime::from_epoch(LEAP_DAY).unwrap());
        // 1 PM in 12-hour mode.
        registers[2] = 0x40 | 0x20 | 0x01;
        assert_eq!(decode_time(&registers).map(|t| t.hour), Some(13));
    }

    #[test]
    fn driver_reads_back_what_it_set() {
        let (mut rtc, report) = Ds3231::probe(FakeBus::default()).ok().unwrap();
        assert!(!report.lost_power);
        rtc.set_epoch(LEAP_DAY).unwrap();
        assert_eq!(rtc.now(), Ok(LEAP_DAY));
    }

    #[test]
    fn arming_selects_interrupt_output_and_clears_latches() {
        let (mut rtc, _) = Ds3231::probe(FakeBus::default()).ok().unwrap();
        rtc.bus.registers[usize::from(REG_STATUS)] = STATUS_A1F | STATUS_A2F;

        rtc.arm_alarm(LEAP_DAY + 30).unwrap();
        let bus = rtc.release();
        assert_eq!(bus.registers[usize::from(REG_STATUS)] & (STATUS_A1F | STATUS_A2F), 0);
        let control = bus.registers[usize::from(REG_CONTROL)];
        assert_eq!(control & (CONTROL_INTCN | CONTROL_A1IE), CONTROL_INTCN | CONTROL_A1IE);
        assert_eq!(&bus.registers[7..11], &[0x00, 0x46, 0x13, 0x29]);
    }

    #[test]
    fn second_tick_clears_interrupt_mode() {
        let mut bus = FakeBus::default();
        bus.registers[usize::from(REG_CONTROL)] = CONTROL_INTCN | CONTROL_A1IE | 0x18;
        bus.registers[usize::from(REG_STATUS)] = STATUS_A1F;
        let (mut rtc, _) = Ds3231::probe(bus).ok().unwrap();

        rtc.select_output(ClockOutput::SecondTick).unwrap();
        assert_eq!(rtc.alarm_fired(), Ok(false));
        assert_eq!(rtc.release().registers[usize::from(REG_CONTROL)], 0);
    }

    #[test]
    fn probe_hands_back_an_unresponsive_bus() {
        let bus = FakeBus {
            offline: true,
            ..FakeBus::default()
        };
        let (bus, err) = Ds3231::probe(bus).err().unwrap();
        assert!(bus.offline);
        assert_eq!(err, RtcError::Bus(()));
    }
}
