//! Per-VM monitor context hosting the timer.
//!
//! A [`Vm`] owns everything the PIT needs for one guest: its clock, the host timer queue, the
//! interrupt sink and the device itself. A single-threaded event loop can use it directly. A
//! host that services vCPU exits on several threads must go through [`SharedVm`], which
//! serializes port dispatch and timer expiry behind one lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use vpit_io_snapshot::state::{IoSnapshot, SnapshotResult};
use vpit_time::{HostClock, InterruptSink, TimerQueue};

use crate::config::{ConfigError, VmConfig};
use crate::i8253::I8253;
use crate::DeviceTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    In,
    Out,
}

/// A trapped port I/O instruction. For `In`, the handler fills `data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortIoExit {
    pub vcpu_id: u32,
    pub port: u16,
    /// Access width in bytes (1, 2 or 4).
    pub size: u8,
    pub direction: IoDirection,
    pub data: u32,
}

impl PortIoExit {
    pub fn input(vcpu_id: u32, port: u16, size: u8) -> Self {
        Self {
            vcpu_id,
            port,
            size,
            direction: IoDirection::In,
            data: 0,
        }
    }

    pub fn output(vcpu_id: u32, port: u16, size: u8, data: u32) -> Self {
        Self {
            vcpu_id,
            port,
            size,
            direction: IoDirection::Out,
            data,
        }
    }

    fn open_bus(&self) -> u32 {
        match self.size {
            1 => 0xFF,
            2 => 0xFFFF,
            _ => 0xFFFF_FFFF,
        }
    }
}

#[derive(Debug)]
pub struct Vm<C, S> {
    config: VmConfig,
    clock: C,
    timers: TimerQueue<DeviceTimer>,
    pit: I8253<C>,
    sink: S,
    paused: bool,
}

impl<C: HostClock + Clone, S: InterruptSink> Vm<C, S> {
    pub fn new(config: VmConfig, clock: C, sink: S) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut timers = TimerQueue::new();
        let mut pit = I8253::new(config.vm_id, clock.clone());
        pit.power_on(&mut timers);
        info!(
            "vm {} ({}): i8253 initialised with {} vcpu(s)",
            config.vm_id, config.name, config.vcpus
        );

        Ok(Self {
            config,
            clock,
            timers,
            pit,
            sink,
            paused: false,
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn pit(&self) -> &I8253<C> {
        &self.pit
    }

    pub fn timers(&self) -> &TimerQueue<DeviceTimer> {
        &self.timers
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Dispatches a trapped port access. Returns the IRQ to inject synchronously, which is
    /// always `None`: the timer interrupt is delivered from [`Self::poll`].
    pub fn io_exit(&mut self, exit: &mut PortIoExit) -> Option<u8> {
        if I8253::<C>::handles_port(exit.port) {
            return self.pit.io_exit(exit, &mut self.timers);
        }

        debug!(
            "vm {}: vcpu {} accessed unclaimed port {:#x}",
            self.config.vm_id, exit.vcpu_id, exit.port
        );
        if exit.direction == IoDirection::In {
            exit.data = exit.open_bus();
        }
        None
    }

    pub fn io_in(&mut self, port: u16) -> u8 {
        let mut exit = PortIoExit::input(0, port, 1);
        self.io_exit(&mut exit);
        exit.data as u8
    }

    pub fn io_out(&mut self, port: u16, value: u8) {
        let mut exit = PortIoExit::output(0, port, 1, u32::from(value));
        self.io_exit(&mut exit);
    }

    pub fn next_deadline_ns(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Runs every timer that is due at the current host time. Returns the number of expiries
    /// delivered to devices.
    pub fn poll(&mut self) -> usize {
        let now_ns = self.clock.now_ns();
        let mut fired = 0;
        while let Some(ev) = self.timers.pop_due(now_ns) {
            match ev.event {
                DeviceTimer::PitCounter(channel) => {
                    if self.pit.fire(
                        channel,
                        ev.id,
                        ev.deadline_ns,
                        &mut self.timers,
                        &mut self.sink,
                    ) {
                        fired += 1;
                    }
                }
            }
        }
        fired
    }

    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.pit.pause(&mut self.timers);
        self.paused = true;
        info!("vm {}: timers paused", self.config.vm_id);
    }

    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.pit.resume(&mut self.timers);
        self.paused = false;
        info!("vm {}: timers resumed", self.config.vm_id);
    }

    pub fn save_state(&self) -> Vec<u8> {
        self.pit.save_state()
    }

    /// Restores the timer from a snapshot and, unless the VM is paused, re-arms it.
    pub fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        self.pit.pause(&mut self.timers);
        let result = self.pit.load_state(bytes);
        if !self.paused {
            self.pit.resume(&mut self.timers);
        }
        result
    }
}

/// A [`Vm`] shared between vCPU threads and a timer thread.
#[derive(Debug)]
pub struct SharedVm<C, S> {
    inner: Arc<Mutex<Vm<C, S>>>,
}

impl<C, S> Clone for SharedVm<C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: HostClock + Clone, S: InterruptSink> SharedVm<C, S> {
    pub fn new(vm: Vm<C, S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(vm)),
        }
    }

    /// Locks the VM. A panic on another thread does not make the timer state unusable.
    pub fn lock(&self) -> MutexGuard<'_, Vm<C, S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn io_exit(&self, exit: &mut PortIoExit) -> Option<u8> {
        self.lock().io_exit(exit)
    }

    pub fn poll(&self) -> usize {
        self.lock().poll()
    }

    pub fn next_deadline_ns(&self) -> Option<u64> {
        self.lock().next_deadline_ns()
    }
}
