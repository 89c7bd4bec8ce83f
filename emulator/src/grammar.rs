//! Command grammar for the emulator REPL.
//!
//! Commands are a keyword followed by at most a couple of arguments, so the
//! parser works directly on the line with `winnow` combinators.

use core::time::Duration;

use logger_core::mode::DeviceMode;
use logger_core::time_source::Epoch;
use winnow::ascii::{dec_int, dec_uint, space1};
use winnow::combinator::{alt, dispatch, empty, fail, opt, preceded};
use winnow::error::{ContextError, ParseError, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{rest, take_while};

pub type GrammarError<'a> = ParseError<&'a str, ContextError>;

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// Run this many loop iterations.
    Step(u32),
    /// Run iterations until this much simulated time has passed.
    Run(Duration),
    /// Move the mode slide switch.
    Switch(DeviceMode),
    /// Press and release the auxiliary button.
    Button,
    /// Deliver bytes on the serial line.
    Serial(&'a str),
    /// Set the hardware clock.
    SetTime(Epoch),
    /// Shift the hardware clock by a signed number of seconds.
    Jump(i64),
    /// Stop or resume delivering alarm interrupts.
    DropAlarms(bool),
    /// Make every clock bus transfer fail.
    RtcFail(bool),
    Status,
    Help(Option<&'a str>),
}

/// `(keyword, usage)` pairs shown by `help`.
pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("step", "step [count]               - run loop iterations (default 1)"),
    ("run", "run <n>(ms|s|m|h)          - run until simulated time has passed"),
    ("switch", "switch <clock|logger>      - move the mode switch"),
    ("button", "button                     - press the auxiliary button"),
    ("serial", "serial <text>              - send text on the serial line"),
    ("set-time", "set-time <epoch>           - set the hardware clock"),
    ("jump", "jump <+/-seconds>          - shift the hardware clock"),
    ("drop-alarms", "drop-alarms <on|off>       - lose alarm interrupts"),
    ("rtc-fail", "rtc-fail <on|off>          - fail clock bus transfers"),
    ("status", "status                     - show controller state"),
    ("help", "help [topic]               - show help for a command"),
];

/// Parses one REPL line.
pub fn parse(line: &str) -> Result<Command<'_>, GrammarError<'_>> {
    command.parse(line.trim())
}

fn keyword<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '-')
        .context(StrContext::Label("command"))
        .parse_next(input)
}

fn command<'a>(input: &mut &'a str) -> ModalResult<Command<'a>> {
    dispatch! {keyword;
        "step" => opt(preceded(space1, dec_uint)).map(|count| Command::Step(count.unwrap_or(1))),
        "run" => preceded(space1, duration).map(Command::Run),
        "switch" => preceded(space1, mode).map(Command::Switch),
        "button" => empty.value(Command::Button),
        "serial" => preceded(space1, rest).map(Command::Serial),
        "set-time" => preceded(space1, dec_uint).map(Command::SetTime),
        "jump" => preceded(space1, dec_int).map(Command::Jump),
        "drop-alarms" => preceded(space1, on_off).map(Command::DropAlarms),
        "rtc-fail" => preceded(space1, on_off).map(Command::RtcFail),
        "status" => empty.value(Command::Status),
        "help" => opt(preceded(space1, keyword)).map(Command::Help),
        _ => fail.context(StrContext::Label("command")),
    }
    .parse_next(input)
}

fn duration(input: &mut &str) -> ModalResult<Duration> {
    let amount: u64 = dec_uint.parse_next(input)?;
    alt((
        "ms".value(Duration::from_millis(amount)),
        "s".value(Duration::from_secs(amount)),
        "m".value(Duration::from_secs(amount.saturating_mul(60))),
        "h".value(Duration::from_secs(amount.saturating_mul(3_600))),
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "unit ms, s, m or h",
    )))
    .parse_next(input)
}

fn mode(input: &mut &str) -> ModalResult<DeviceMode> {
    alt(("clock".value(DeviceMode::Clock), "logger".value(DeviceMode::Logger)))
        .context(StrContext::Expected(StrContextValue::Description(
            "clock or logger",
        )))
        .parse_next(input)
}

fn on_off(input: &mut &str) -> ModalResult<bool> {
    alt(("on".value(true), "off".value(false)))
        .context(StrContext::Expected(StrContextValue::Description("on or off")))
        .parse_next(input)
}
