use std::cell::RefCell;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use embassy_futures::block_on;
use logger_core::config::DeviceConfig;
use logger_core::controller::{DeviceController, Iteration, Rest};
use logger_core::mode::DeviceMode;
use logger_core::telemetry::EventId;
use logger_core::time_source::{ClockKind, Epoch, TimeSource};
use logger_core::wake::{SharedMode, WakeFlags, WakeSignal, WakeSignalSet};

use crate::grammar::{self, Command, HELP_TOPICS};
use crate::world::{SharedWorld, SimBoard, SimClock, SimPresenter, SimSleep, World};

/// Awake time each iteration costs, matching the firmware's poll delay.
pub const LOOP_COST_MS: u32 = 5;

/// Upper bound on iterations a single `run` may take.
const RUN_ITERATION_LIMIT: u32 = 200_000;

/// Start-up choices for a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionOptions {
    /// Initial hardware clock epoch, `None` to boot without one.
    pub rtc_epoch: Option<Epoch>,
    pub mode: DeviceMode,
    pub transcript: Option<PathBuf>,
    /// Print telemetry records after each command.
    pub show_telemetry: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            rtc_epoch: Some(1_700_000_000),
            mode: DeviceMode::Clock,
            transcript: None,
            show_telemetry: true,
        }
    }
}

type Controller<'a> =
    DeviceController<'a, SimClock<'a>, SimBoard<'a>, SimPresenter<'a>, SimSleep<'a>>;

pub struct Session<'a> {
    controller: Controller<'a>,
    world: SharedWorld<'a>,
    cursor: EventId,
    iterations: u64,
    show_telemetry: bool,
    transcript: Option<TranscriptLogger>,
}

impl<'a> Session<'a> {
    pub fn new(
        options: &SessionOptions,
        flags: &'a WakeFlags,
        shared_mode: &'a SharedMode,
    ) -> io::Result<Self> {
        let world = Rc::new(RefCell::new(World::new(
            flags,
            shared_mode,
            options.rtc_epoch,
            options.mode,
        )));
        let clock = options.rtc_epoch.map(|_| SimClock(world.clone()));
        let controller = DeviceController::start(
            DeviceConfig::DEFAULT,
            TimeSource::detect(clock),
            flags,
            shared_mode,
            SimBoard(world.clone()),
            SimPresenter(world.clone()),
            SimSleep(world.clone()),
        );
        let transcript = options
            .transcript
            .as_deref()
            .map(TranscriptLogger::new)
            .transpose()?;

        Ok(Self {
            controller,
            world,
            cursor: 0,
            iterations: 0,
            show_telemetry: options.show_telemetry,
            transcript,
        })
    }

    /// Output produced while booting.
    pub fn boot_output(&mut self) -> io::Result<Vec<String>> {
        let lines = self.collect_output();
        self.record(&lines)?;
        Ok(lines)
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append(&format!("> {trimmed}"))?;
        }

        let lines = match grammar::parse(trimmed) {
            Ok(command) => self.execute(command),
            Err(err) => vec![format!("ERR syntax {}", err.inner())],
        };
        self.record(&lines)?;
        Ok(lines)
    }

    fn execute(&mut self, command: Command<'_>) -> Vec<String> {
        let mut lines = Vec::new();
        match command {
            Command::Step(count) => {
                for _ in 0..count {
                    let iteration = self.step();
                    lines.extend(self.collect_output());
                    lines.push(describe_iteration(&iteration));
                }
            }
            Command::Run(duration) => {
                let (steps, samples) = self.run_for(duration);
                lines.extend(self.collect_output());
                lines.push(format!("ran {steps} iterations, {samples} samples"));
            }
            Command::Switch(mode) => {
                let raised = self.world.borrow_mut().set_switch(mode);
                lines.push(format!("switch -> {}{}", mode.label(), describe_raised(raised)));
            }
            Command::Button => {
                let raised = self.world.borrow_mut().press_button();
                lines.push(format!("button pressed{}", describe_raised(raised)));
            }
            Command::Serial(text) => {
                let mut bytes = text.as_bytes().to_vec();
                bytes.push(b'\n');
                let raised = self.world.borrow_mut().receive_serial(&bytes);
                lines.push(format!("serial {} bytes{}", bytes.len(), describe_raised(raised)));
            }
            Command::SetTime(epoch) => lines.push(self.adjust_clock(|_| epoch)),
            Command::Jump(delta) => lines.push(self.adjust_clock(|now| shift_epoch(now, delta))),
            Command::DropAlarms(on) => {
                self.world.borrow_mut().drop_alarm_irq = on;
                lines.push(format!("alarm interrupts {}", if on { "dropped" } else { "delivered" }));
            }
            Command::RtcFail(on) => {
                let mut world = self.world.borrow_mut();
                match world.rtc.as_mut() {
                    Some(rtc) => {
                        rtc.failing = on;
                        lines.push(format!("rtc bus {}", if on { "failing" } else { "healthy" }));
                    }
                    None => lines.push("ERR no hardware clock".to_string()),
                }
            }
            Command::Status => lines.extend(self.status()),
            Command::Help(topic) => lines.extend(help(topic)),
        }
        lines
    }

    /// Spends one loop's worth of awake time and runs an iteration.
    pub fn step(&mut self) -> Iteration {
        self.world.borrow_mut().spend_awake(LOOP_COST_MS);
        self.iterations += 1;
        block_on(self.controller.run_once())
    }

    /// Steps until `duration` of simulated time has passed. Returns the number
    /// of iterations and samples.
    pub fn run_for(&mut self, duration: Duration) -> (u32, u32) {
        let target_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let start = self.world.borrow().wall_ms;
        let mut steps = 0;
        let mut samples = 0;
        while self.world.borrow().wall_ms.saturating_sub(start) < target_ms
            && steps < RUN_ITERATION_LIMIT
        {
            samples += u32::from(self.step().samples);
            steps += 1;
        }
        (steps, samples)
    }

    fn adjust_clock(&mut self, update: impl FnOnce(Epoch) -> Epoch) -> String {
        let mut world = self.world.borrow_mut();
        match world.rtc.as_mut() {
            Some(rtc) => {
                let previous = rtc.epoch;
                rtc.epoch = update(previous);
                format!("rtc {previous} -> {}", rtc.epoch)
            }
            None => "ERR no hardware clock".to_string(),
        }
    }

    fn status(&self) -> Vec<String> {
        let world = self.world.borrow();
        let scheduler = self.controller.scheduler();
        let machine = self.controller.mode_machine();
        let time = self.controller.time_source();
        let clock = match time.kind() {
            ClockKind::Hardware => "rtc",
            ClockKind::Software => "software",
        };

        let mut lines = vec![
            format!(
                "mode={} stable={} masked={} switch={}",
                machine.active_mode().label(),
                machine.stable_mode().label(),
                machine.switch_masked(),
                world.mode_switch_level().label()
            ),
            format!(
                "clock={clock} read-failures={} bus-failures={}",
                time.read_failures(),
                time.bus_failures()
            ),
            format!(
                "next={} base={} last-serviced={} armed={}",
                scheduler.next_epoch(),
                scheduler.base_epoch(),
                scheduler.last_serviced_epoch(),
                scheduler.alarm_armed()
            ),
            format!(
                "awake-ms={} wall={}s slept={}s iterations={} backlight={}",
                world.awake_ms,
                world.wall_ms / 1_000,
                world.slept_secs,
                self.iterations,
                world.backlight
            ),
        ];
        if let Some(rtc) = world.rtc.as_ref() {
            lines.push(format!(
                "rtc epoch={} alarm={:?} latched={} output={:?} drop-irq={}",
                rtc.epoch, rtc.alarm, rtc.latched, rtc.output, world.drop_alarm_irq
            ));
        }
        lines
    }

    /// Presenter output and, when enabled, new telemetry records.
    fn collect_output(&mut self) -> Vec<String> {
        let mut lines = self.world.borrow_mut().take_console();
        let telemetry = self.controller.telemetry();
        if self.show_telemetry {
            lines.extend(
                telemetry
                    .since(self.cursor)
                    .map(|record| format!("[{:>8}ms] {}", record.at_ms, record.event)),
            );
        }
        self.cursor = telemetry.next_id();
        lines
    }

    fn record(&mut self, lines: &[String]) -> io::Result<()> {
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append(line)?;
            }
            transcript.flush()?;
        }
        Ok(())
    }

    pub fn controller(&self) -> &Controller<'a> {
        &self.controller
    }

    pub fn world(&self) -> &SharedWorld<'a> {
        &self.world
    }
}

fn shift_epoch(epoch: Epoch, delta: i64) -> Epoch {
    let magnitude = u32::try_from(delta.unsigned_abs()).unwrap_or(u32::MAX);
    if delta < 0 {
        epoch.wrapping_sub(magnitude)
    } else {
        epoch.wrapping_add(magnitude)
    }
}

fn describe_raised(raised: WakeSignalSet) -> String {
    if raised.is_empty() {
        " (no wake)".to_string()
    } else {
        let labels: Vec<&str> = raised.iter().map(WakeSignal::label).collect();
        format!(" (woke: {})", labels.join(", "))
    }
}

fn describe_iteration(iteration: &Iteration) -> String {
    let rest = match iteration.rest {
        Rest::StayedAwake => "stayed awake".to_string(),
        Rest::Woke(report) => format!("slept {} quanta, woke {:?}", report.quanta, report.cause),
        Rest::Countdown(report) => format!(
            "countdown slept {}s{}",
            report.slept_secs,
            if report.completed { "" } else { " (interrupted)" }
        ),
        Rest::SecondQuantum => "slept 1s".to_string(),
        Rest::NoSleep => "no sleep".to_string(),
    };
    format!(
        "iteration mode={} samples={} {rest}",
        iteration.mode.label(),
        iteration.samples
    )
}

fn help(topic: Option<&str>) -> Vec<String> {
    match topic {
        Some(topic) => match HELP_TOPICS.iter().find(|(name, _)| *name == topic) {
            Some((_, usage)) => vec![(*usage).to_string()],
            None => vec![format!("ERR unknown help topic `{topic}`")],
        },
        None => HELP_TOPICS
            .iter()
            .map(|(_, usage)| (*usage).to_string())
            .collect(),
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    fn append(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{line}")
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
