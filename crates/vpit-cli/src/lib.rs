#![forbid(unsafe_code)]

pub mod runner;

pub use runner::{run_realtime, run_virtual, CountSample, RunReport, Scenario, TokioClock};
