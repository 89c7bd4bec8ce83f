mod grammar;
mod session;
mod world;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use logger_core::mode::DeviceMode;
use logger_core::wake::{SharedMode, WakeFlags};
use session::{Session, SessionOptions};

const USAGE: &str = "Usage: logger-emulator [--no-rtc] [--epoch <secs>] [--mode <clock|logger>] \
                     [--transcript <path>] [--quiet]";

fn main() -> io::Result<()> {
    let options = parse_options(env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let flags = WakeFlags::new();
    let shared_mode = SharedMode::new(options.mode);
    let mut session = Session::new(&options, &flags, &shared_mode)?;

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut line = String::new();

    writeln!(
        writer,
        "Clock Logger Emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    for response in session.boot_output()? {
        writeln!(writer, "{response}")?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        for response in session.handle_command(trimmed)? {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options(mut args: impl Iterator<Item = String>) -> Result<SessionOptions, String> {
    let mut options = SessionOptions::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--no-rtc" => options.rtc_epoch = None,
            "--quiet" => options.show_telemetry = false,
            "--epoch" => {
                let value = expect_value(&mut args, &arg)?;
                let epoch = value
                    .parse()
                    .map_err(|err| format!("Invalid epoch `{value}`: {err}"))?;
                options.rtc_epoch = Some(epoch);
            }
            "--mode" => {
                options.mode = match expect_value(&mut args, &arg)?.as_str() {
                    "clock" => DeviceMode::Clock,
                    "logger" => DeviceMode::Logger,
                    other => return Err(format!("Unknown mode `{other}`")),
                };
            }
            "--transcript" => {
                options.transcript = Some(PathBuf::from(expect_value(&mut args, &arg)?));
            }
            other => return Err(format!("Unexpected argument `{other}`")),
        }
    }
    Ok(options)
}

fn expect_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    args.next()
        .ok_or_else(|| format!("Expected value after {flag}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<SessionOptions, String> {
        parse_options(args.iter().map(ToString::to_string))
    }

    #[test]
    fn defaults_boot_clock_mode_with_a_clock() {
        let options = parse(&[]).unwrap();
        assert_eq!(options, SessionOptions::default());
        assert_eq!(options.mode, DeviceMode::Clock);
        assert!(options.rtc_epoch.is_some());
    }

    #[test]
    fn flags_override_defaults() {
        let options = parse(&["--epoch", "42", "--mode", "logger", "--quiet"]).unwrap();
        assert_eq!(options.rtc_epoch, Some(42));
        assert_eq!(options.mode, DeviceMode::Logger);
        assert!(!options.show_telemetry);

        let options = parse(&["--epoch", "42", "--no-rtc"]).unwrap();
        assert_eq!(options.rtc_epoch, None);
    }

    #[test]
    fn bad_arguments_are_reported() {
        assert!(parse(&["--mode"]).is_err());
        assert!(parse(&["--mode", "sideways"]).is_err());
        assert!(parse(&["--epoch", "soon"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }
}
