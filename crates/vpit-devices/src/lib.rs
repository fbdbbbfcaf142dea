#![forbid(unsafe_code)]

pub mod config;
pub mod control;
pub mod i8253;
pub mod vm;

pub use config::{ConfigError, VmConfig};
pub use i8253::{BytePhase, CounterState, I8253};
pub use vm::{IoDirection, PortIoExit, SharedVm, Vm};

/// Events the VM monitor schedules on its host timer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceTimer {
    PitCounter(usize),
}
