//! Virtual i8253/8254 programmable interval timer.
//!
//! The counters are not ticked one by one. Programming channel 0 arms a host one-shot timer for
//! the full count; when it expires the VM monitor calls [`I8253::fire`], which asserts IRQ 0 and,
//! in interrupt-on-terminal-count mode, re-arms for another full count. Guest reads of the current count are simulated from the host time
//! elapsed since the counter was last reset.
//!
//! Channels 1 and 2 exist so their ports decode, but they are not wired to anything: accesses are
//! logged and otherwise ignored. Unsupported guest behaviour never faults the guest.

use tracing::{debug, trace, warn};
use vpit_io_snapshot::state::codec::{Decoder, Encoder};
use vpit_io_snapshot::state::{
    IoSnapshot, SnapshotError, SnapshotReader, SnapshotResult, SnapshotVersion, SnapshotWriter,
};
use vpit_time::{HostClock, InterruptSink, OneShotTimer, TimerId, TimerQueue};

use crate::control::{
    AccessMode, ControlWord, PitMode, ReadbackChannels, MAX_COUNT_TICKS, NS_PER_TICK,
    TIMER_16BIT, TIMER_CNTR0, TIMER_CNTR2, TIMER_CTRL,
};
use crate::vm::{IoDirection, PortIoExit};
use crate::DeviceTimer;

pub const PIT_CHANNELS: usize = 3;

/// The only counter wired to an interrupt line.
const WIRED_CHANNEL: usize = 0;
const PIT_IRQ: u8 = 0;
const PIT_IRQ_VCPU: u32 = 0;
const POWER_ON_COUNT: u16 = 0xFFFF;

/// Relative deadline for a counter programmed with `start`.
pub fn period_ns(start: u16) -> u64 {
    let ticks = match start {
        0 => MAX_COUNT_TICKS,
        v => u64::from(v),
    };
    ticks * NS_PER_TICK
}

/// Which half of a two-byte data port access comes next.
///
/// For writes, `First` expects the low byte. For reads, `First` returns the high byte of the
/// output latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BytePhase {
    #[default]
    First,
    Second,
}

impl BytePhase {
    fn toggled(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }
}

#[derive(Debug, Clone)]
struct Counter {
    start: u16,
    mode: PitMode,
    /// Mode field as the guest wrote it, aliases included.
    mode_bits: u8,
    ilatch: u16,
    olatch: u16,
    last_w: BytePhase,
    last_r: BytePhase,
    rbs: bool,
    baseline_ns: u64,
    /// Count time accumulated before `baseline_ns` (across a pause or a restore).
    carry_ns: u64,
    in_use: bool,
    expired: bool,
    timer: OneShotTimer,
}

impl Counter {
    fn new(baseline_ns: u64) -> Self {
        Self {
            start: POWER_ON_COUNT,
            mode: PitMode::InterruptOnTerminalCount,
            mode_bits: 0,
            ilatch: 0,
            olatch: 0,
            last_w: BytePhase::First,
            last_r: BytePhase::First,
            rbs: false,
            baseline_ns,
            carry_ns: 0,
            in_use: false,
            expired: false,
            timer: OneShotTimer::new(),
        }
    }

    /// Host time the counter has been counting down since its last reload.
    fn elapsed_ns(&self, now_ns: u64) -> u64 {
        now_ns
            .saturating_sub(self.baseline_ns)
            .saturating_add(self.carry_ns)
    }

    /// Count the real chip would hold now, had every tick been emulated.
    fn current_count(&self, now_ns: u64) -> u16 {
        if self.start == 0 {
            return 0;
        }
        let elapsed_ticks = self.elapsed_ns(now_ns) / NS_PER_TICK;
        let start = u64::from(self.start);
        (start - elapsed_ticks % start) as u16
    }

    /// Reloads the count at `now_ns`.
    fn rebase(&mut self, now_ns: u64) {
        self.baseline_ns = now_ns;
        self.carry_ns = 0;
    }

    fn status_byte(&self) -> u8 {
        (self.mode_bits << 1) | TIMER_16BIT
    }
}

/// Read-only view of one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    pub start: u16,
    pub mode: PitMode,
    pub mode_bits: u8,
    pub ilatch: u16,
    pub olatch: u16,
    pub write_phase: BytePhase,
    pub read_phase: BytePhase,
    pub status_pending: bool,
    pub baseline_ns: u64,
    pub in_use: bool,
    pub expired: bool,
    pub armed: bool,
}

#[derive(Debug)]
pub struct I8253<C> {
    clock: C,
    vm_id: u32,
    counters: [Counter; PIT_CHANNELS],
}

impl<C: HostClock> I8253<C> {
    pub fn new(vm_id: u32, clock: C) -> Self {
        let now_ns = clock.now_ns();
        Self {
            clock,
            vm_id,
            counters: std::array::from_fn(|_| Counter::new(now_ns)),
        }
    }

    pub fn vm_id(&self) -> u32 {
        self.vm_id
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn handles_port(port: u16) -> bool {
        (TIMER_CNTR0..=TIMER_CTRL).contains(&port)
    }

    pub fn counter(&self, channel: usize) -> Option<CounterState> {
        let c = self.counters.get(channel)?;
        Some(CounterState {
            start: c.start,
            mode: c.mode,
            mode_bits: c.mode_bits,
            ilatch: c.ilatch,
            olatch: c.olatch,
            write_phase: c.last_w,
            read_phase: c.last_r,
            status_pending: c.rbs,
            baseline_ns: c.baseline_ns,
            in_use: c.in_use,
            expired: c.expired,
            armed: c.timer.is_armed(),
        })
    }

    /// Starts channel 0 with its power-on count, as the BIOS would find it.
    pub fn power_on(&mut self, timers: &mut TimerQueue<DeviceTimer>) {
        self.reset(WIRED_CHANNEL, timers);
    }

    /// Handles a trapped `IN`/`OUT` to one of the PIT ports.
    ///
    /// Never requests a synchronous interrupt: the timer interrupt is only raised from
    /// [`Self::fire`].
    pub fn io_exit(
        &mut self,
        exit: &mut PortIoExit,
        timers: &mut TimerQueue<DeviceTimer>,
    ) -> Option<u8> {
        match exit.direction {
            IoDirection::In => exit.data = u32::from(self.port_read(exit.port)),
            IoDirection::Out => self.port_write(exit.port, exit.data as u8, timers),
        }
        None
    }

    pub fn port_read(&mut self, port: u16) -> u8 {
        match port {
            TIMER_CTRL => {
                warn!("i8253: read from control port unsupported");
                0
            }
            TIMER_CNTR0..=TIMER_CNTR2 => self.read_data(usize::from(port - TIMER_CNTR0)),
            _ => {
                warn!("i8253: read from unhandled port {port:#x}");
                0
            }
        }
    }

    pub fn port_write(&mut self, port: u16, value: u8, timers: &mut TimerQueue<DeviceTimer>) {
        match port {
            TIMER_CTRL => self.write_control(value),
            TIMER_CNTR0..=TIMER_CNTR2 => {
                self.write_data(usize::from(port - TIMER_CNTR0), value, timers)
            }
            _ => warn!("i8253: write {value:#04x} to unhandled port {port:#x}"),
        }
    }

    fn write_control(&mut self, value: u8) {
        match ControlWord::decode(value) {
            ControlWord::ReadBack {
                channels,
                status,
                count,
            } => self.readback(channels, status, count),
            ControlWord::Latch { channel } => self.latch(channel),
            ControlWord::SetMode {
                channel,
                access,
                mode,
                bcd,
            } => {
                if channel != WIRED_CHANNEL {
                    warn!("i8253: unsupported counter {channel} selected (control {value:#04x})");
                    return;
                }
                if access != AccessMode::LsbThenMsb {
                    warn!("i8253: unsupported counter {channel} rw mode {access:?} selected");
                    return;
                }
                if bcd {
                    debug!("i8253: BCD counting requested, counting in binary");
                }
                let counter = &mut self.counters[channel];
                counter.mode = mode;
                counter.mode_bits = (value >> 1) & 0b111;
            }
        }
    }

    /// Read-back command: request status and/or count snapshots without touching the byte
    /// sequencing of the data ports.
    pub fn readback(&mut self, channels: ReadbackChannels, status: bool, count: bool) {
        let now_ns = self.clock.now_ns();
        for (channel, counter) in self.counters.iter_mut().enumerate() {
            if !channels.contains_channel(channel) {
                continue;
            }
            if channel != WIRED_CHANNEL {
                warn!("i8253: readback of unsupported counter {channel}");
                continue;
            }
            if status {
                counter.rbs = true;
            }
            if count {
                counter.olatch = counter.current_count(now_ns);
            }
        }
    }

    pub fn latch(&mut self, channel: usize) {
        if channel != WIRED_CHANNEL {
            warn!("i8253: latch of unsupported counter {channel}");
            return;
        }
        let now_ns = self.clock.now_ns();
        let counter = &mut self.counters[channel];
        counter.olatch = counter.current_count(now_ns);
    }

    fn write_data(&mut self, channel: usize, value: u8, timers: &mut TimerQueue<DeviceTimer>) {
        if channel != WIRED_CHANNEL {
            warn!("i8253: write {value:#04x} to unsupported counter {channel} ignored");
            return;
        }

        let counter = &mut self.counters[channel];
        match counter.last_w {
            BytePhase::First => {
                counter.ilatch = u16::from(value);
            }
            BytePhase::Second => {
                counter.ilatch |= u16::from(value) << 8;
                counter.start = counter.ilatch;
            }
        }
        counter.last_w = counter.last_w.toggled();

        if counter.last_w == BytePhase::First {
            debug!(
                "i8253: counter {channel} reset, mode={:?}, start={}",
                counter.mode, counter.start
            );
            self.reset(channel, timers);
        }
    }

    fn read_data(&mut self, channel: usize) -> u8 {
        if channel != WIRED_CHANNEL {
            warn!("i8253: read from unsupported counter {channel}");
            return 0;
        }

        let counter = &mut self.counters[channel];
        if counter.rbs {
            counter.rbs = false;
            return counter.status_byte();
        }

        let data = match counter.last_r {
            BytePhase::First => (counter.olatch >> 8) as u8,
            BytePhase::Second => counter.olatch as u8,
        };
        counter.last_r = counter.last_r.toggled();
        data
    }

    /// Restarts `channel` from its programmed count and arms its expiry.
    pub fn reset(&mut self, channel: usize, timers: &mut TimerQueue<DeviceTimer>) {
        if channel != WIRED_CHANNEL {
            warn!("i8253: reset of unwired counter {channel} ignored");
            return;
        }

        let now_ns = self.clock.now_ns();
        let counter = &mut self.counters[channel];
        counter.rebase(now_ns);
        counter.in_use = true;
        counter.expired = false;
        let after_ns = period_ns(counter.start);
        counter
            .timer
            .arm(timers, now_ns, after_ns, DeviceTimer::PitCounter(channel));
    }

    /// Expiry handler for a counter's host timer.
    ///
    /// Returns `false` if the event was stale (the counter has since been reprogrammed,
    /// paused or restored) and nothing happened.
    pub fn fire(
        &mut self,
        channel: usize,
        id: TimerId,
        deadline_ns: u64,
        timers: &mut TimerQueue<DeviceTimer>,
        sink: &mut impl InterruptSink,
    ) -> bool {
        let Some(counter) = self.counters.get_mut(channel) else {
            return false;
        };
        if !counter.timer.expire(id) {
            trace!("i8253: dropping stale expiry for counter {channel}");
            return false;
        }

        sink.assert_irq(self.vm_id, PIT_IRQ_VCPU, PIT_IRQ);

        if counter.mode.rearms_on_fire() {
            // Reload from now: a late expiry delays the next one instead of shortening it.
            let now_ns = self.clock.now_ns();
            counter.rebase(now_ns);
            let after_ns = period_ns(counter.start);
            counter
                .timer
                .arm(timers, now_ns, after_ns, DeviceTimer::PitCounter(channel));
            trace!(
                "i8253: counter {channel} fired {}ns late, next expiry in {after_ns}ns",
                now_ns.saturating_sub(deadline_ns)
            );
        } else {
            counter.expired = true;
            trace!("i8253: counter {channel} reached terminal count");
        }
        true
    }

    /// Cancels every pending expiry, e.g. while the VM is paused. Running counters keep the
    /// time they have already counted.
    pub fn pause(&mut self, timers: &mut TimerQueue<DeviceTimer>) {
        let now_ns = self.clock.now_ns();
        for counter in &mut self.counters {
            if counter.timer.is_armed() {
                counter.timer.cancel(timers);
                counter.carry_ns = counter.elapsed_ns(now_ns) % period_ns(counter.start);
                counter.baseline_ns = now_ns;
            }
        }
    }

    /// Re-arms every running counter for the rest of its current period, counted from now.
    pub fn resume(&mut self, timers: &mut TimerQueue<DeviceTimer>) {
        let now_ns = self.clock.now_ns();
        for (channel, counter) in self.counters.iter_mut().enumerate() {
            if !counter.in_use || counter.expired || counter.timer.is_armed() {
                continue;
            }
            let period = period_ns(counter.start);
            counter.carry_ns %= period;
            counter.baseline_ns = now_ns;
            let after_ns = period - counter.carry_ns;
            counter
                .timer
                .arm(timers, now_ns, after_ns, DeviceTimer::PitCounter(channel));
        }
    }
}

impl<C: HostClock> IoSnapshot for I8253<C> {
    const DEVICE_ID: [u8; 4] = *b"PIT0";
    const DEVICE_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);

    fn save_state(&self) -> Vec<u8> {
        const TAG_COUNTERS: u16 = 1;

        let now_ns = self.clock.now_ns();
        let mut enc = Encoder::new().u32(PIT_CHANNELS as u32);
        for c in &self.counters {
            enc = enc
                .u16(c.start)
                .u8(c.mode_bits)
                .u16(c.ilatch)
                .u16(c.olatch)
                .bool(c.last_w == BytePhase::Second)
                .bool(c.last_r == BytePhase::Second)
                .bool(c.rbs)
                .bool(c.in_use)
                .bool(c.expired)
                // Position within the current period, independent of the host clock.
                .u64(c.elapsed_ns(now_ns) % period_ns(c.start));
        }

        let mut w = SnapshotWriter::new(Self::DEVICE_ID, Self::DEVICE_VERSION);
        w.field_bytes(TAG_COUNTERS, enc.finish());
        w.finish()
    }

    /// Restores counter state. Expiries are not re-armed here; call [`I8253::resume`] once the
    /// VM is ready to run.
    fn load_state(&mut self, bytes: &[u8]) -> SnapshotResult<()> {
        const TAG_COUNTERS: u16 = 1;

        let r = SnapshotReader::parse(bytes, Self::DEVICE_ID)?;
        r.ensure_device_major(Self::DEVICE_VERSION.major)?;

        let now_ns = self.clock.now_ns();
        let mut counters: [Counter; PIT_CHANNELS] = std::array::from_fn(|_| Counter::new(now_ns));

        if let Some(buf) = r.bytes(TAG_COUNTERS) {
            let phase = |second: bool| {
                if second {
                    BytePhase::Second
                } else {
                    BytePhase::First
                }
            };

            let mut d = Decoder::new(buf);
            let count = d.u32()? as usize;
            if count > PIT_CHANNELS {
                return Err(SnapshotError::InvalidFieldEncoding("pit channel count"));
            }
            for counter in counters.iter_mut().take(count) {
                counter.start = d.u16()?;
                let mode = d.u8()?;
                if mode > 0b111 {
                    return Err(SnapshotError::InvalidFieldEncoding("pit mode"));
                }
                counter.mode = PitMode::from_bits(mode);
                counter.mode_bits = mode;
                counter.ilatch = d.u16()?;
                counter.olatch = d.u16()?;
                counter.last_w = phase(d.bool()?);
                counter.last_r = phase(d.bool()?);
                counter.rbs = d.bool()?;
                counter.in_use = d.bool()?;
                counter.expired = d.bool()?;
                counter.baseline_ns = now_ns;
                counter.carry_ns = d.u64()?;
            }
            d.finish()?;
        }

        // Dropping the old counters orphans their queued expiries; `fire` ignores them.
        self.counters = counters;
        Ok(())
    }
}
