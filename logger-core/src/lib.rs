#![no_std]

// Time and wake scheduling for the dual-mode clock / environmental logger.
//
// Everything here is portable between the MCU firmware and the host emulator:
// hardware access goes through the collaborator traits in `time_source`,
// `sleep` and `controller`, and no module touches the standard library.

pub mod awake;
pub mod config;
pub mod controller;
pub mod mode;
pub mod scheduler;
pub mod sleep;
pub mod telemetry;
pub mod time_source;
pub mod wake;
