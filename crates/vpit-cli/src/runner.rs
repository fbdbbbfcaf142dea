//! Drivers that run a scripted guest against a [`Vm`].
//!
//! The guest programs channel 0 once and then, every `latch_every` interrupts, latches and reads
//! back the current count the way an OS calibrating its clock would. Two drivers share that
//! script: [`run_virtual`] jumps a fake clock straight to each deadline, [`run_realtime`] sleeps
//! on a tokio timer until the host clock reaches it.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};
use vpit_devices::control::{TIMER_16BIT, TIMER_CNTR0, TIMER_CTRL, TIMER_FREQ_HZ};
use vpit_devices::i8253::period_ns;
use vpit_devices::{Vm, VmConfig};
use vpit_time::{FakeHostClock, HostClock, RecordingInterruptSink, NANOS_PER_SEC};

/// What the scripted guest does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    /// Reload value written to channel 0. Zero means 65536.
    pub divisor: u16,
    /// Operating mode, 0 through 5. Only mode 0 keeps interrupting after the first expiry.
    pub mode: u8,
    pub duration: Duration,
    /// Latch and read back the count after every N-th interrupt. Zero disables sampling.
    pub latch_every: u64,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            // ~100 Hz
            divisor: 11_932,
            mode: 0,
            duration: Duration::from_secs(1),
            latch_every: 0,
        }
    }
}

impl Scenario {
    pub fn control_word(&self) -> u8 {
        // Channel 0, LSB then MSB, binary.
        TIMER_16BIT | ((self.mode & 0x7) << 1)
    }

    pub fn period_ns(&self) -> u64 {
        period_ns(self.divisor)
    }

    /// Nominal interrupt rate of the programmed counter.
    pub fn frequency_hz(&self) -> f64 {
        let ticks = if self.divisor == 0 {
            65_536.0
        } else {
            f64::from(self.divisor)
        };
        TIMER_FREQ_HZ as f64 / ticks
    }

    fn duration_ns(&self) -> u64 {
        u64::try_from(self.duration.as_nanos()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CountSample {
    pub at_ns: u64,
    pub count: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub vm_id: u32,
    pub interrupts: u64,
    pub elapsed_ns: u64,
    pub samples: Vec<CountSample>,
    /// Raw device snapshot taken when the run ended.
    #[serde(skip)]
    pub snapshot: Vec<u8>,
}

fn program<C: HostClock + Clone>(vm: &mut Vm<C, RecordingInterruptSink>, scenario: &Scenario) {
    let [lo, hi] = scenario.divisor.to_le_bytes();
    vm.io_out(TIMER_CTRL, scenario.control_word());
    vm.io_out(TIMER_CNTR0, lo);
    vm.io_out(TIMER_CNTR0, hi);
    info!(
        "guest programmed channel 0: mode {}, divisor {} ({:.3} Hz)",
        scenario.mode,
        scenario.divisor,
        scenario.frequency_hz()
    );
}

/// Delivers due expiries and takes a count sample when the script asks for one.
fn step<C: HostClock + Clone>(
    vm: &mut Vm<C, RecordingInterruptSink>,
    scenario: &Scenario,
    report: &mut RunReport,
) {
    for _ in 0..vm.poll() {
        report.interrupts += 1;
        if scenario.latch_every != 0 && report.interrupts % scenario.latch_every == 0 {
            vm.io_out(TIMER_CTRL, 0x00);
            let hi = vm.io_in(TIMER_CNTR0);
            let lo = vm.io_in(TIMER_CNTR0);
            let sample = CountSample {
                at_ns: vm.clock().now_ns(),
                count: u16::from_be_bytes([hi, lo]),
            };
            debug!("latched count {} at {}ns", sample.count, sample.at_ns);
            report.samples.push(sample);
        }
    }
}

fn finish<C: HostClock + Clone>(
    vm: &Vm<C, RecordingInterruptSink>,
    mut report: RunReport,
) -> RunReport {
    report.vm_id = vm.config().vm_id;
    report.elapsed_ns = vm.clock().now_ns();
    report.snapshot = vm.save_state();
    info!(
        "run finished: {} interrupt(s) in {:.3}s",
        report.interrupts,
        report.elapsed_ns as f64 / NANOS_PER_SEC as f64
    );
    report
}

/// Runs the scenario in virtual time. Deterministic: the clock only moves to the next deadline.
pub fn run_virtual(config: VmConfig, scenario: &Scenario) -> Result<RunReport> {
    let clock = FakeHostClock::new();
    let mut vm = Vm::new(config, clock.clone(), RecordingInterruptSink::new())
        .context("failed to create vm")?;
    program(&mut vm, scenario);

    let end_ns = scenario.duration_ns();
    let mut report = RunReport::default();
    while let Some(deadline_ns) = vm.next_deadline_ns() {
        if deadline_ns > end_ns {
            break;
        }
        clock.set_now_ns(deadline_ns);
        step(&mut vm, scenario, &mut report);
    }
    clock.set_now_ns(end_ns);

    Ok(finish(&vm, report))
}

/// Host clock backed by the tokio timer, so tests can pause and auto-advance it.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    epoch: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }

    pub fn instant_at(&self, ns: u64) -> tokio::time::Instant {
        self.epoch + Duration::from_nanos(ns)
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for TokioClock {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Runs the scenario against the host clock, sleeping until each deadline.
pub async fn run_realtime(config: VmConfig, scenario: &Scenario) -> Result<RunReport> {
    let clock = TokioClock::new();
    let mut vm = Vm::new(config, clock, RecordingInterruptSink::new())
        .context("failed to create vm")?;
    program(&mut vm, scenario);

    let end_ns = scenario.duration_ns();
    let mut report = RunReport::default();
    loop {
        let wake_ns = match vm.next_deadline_ns() {
            Some(deadline_ns) if deadline_ns <= end_ns => deadline_ns,
            _ => break,
        };
        tokio::time::sleep_until(clock.instant_at(wake_ns)).await;
        step(&mut vm, scenario, &mut report);
    }
    tokio::time::sleep_until(clock.instant_at(end_ns)).await;

    Ok(finish(&vm, report))
}
