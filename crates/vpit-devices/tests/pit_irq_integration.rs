use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use vpit_devices::control::{NS_PER_TICK, TIMER_CNTR0, TIMER_CTRL};
use vpit_devices::{Vm, VmConfig, I8253};
use vpit_io_snapshot::state::codec::Encoder;
use vpit_io_snapshot::state::{IoSnapshot, SnapshotError, SnapshotWriter};
use vpit_time::{FakeHostClock, HostClock, InterruptSink};

/// Counts IRQ 0 assertions for one VM and rejects anything else.
struct Irq0Counter {
    vm_id: u32,
    seen: Arc<AtomicU64>,
}

impl InterruptSink for Irq0Counter {
    fn assert_irq(&mut self, vm_id: u32, vcpu_id: u32, irq: u8) {
        assert_eq!((vm_id, vcpu_id, irq), (self.vm_id, 0, 0));
        self.seen.fetch_add(1, Ordering::Relaxed);
    }
}

fn program_mode0<C: HostClock + Clone, S: InterruptSink>(
    vm: &mut Vm<C, S>,
    divisor: u16,
) {
    vm.io_out(TIMER_CTRL, 0x30);
    vm.io_out(TIMER_CNTR0, (divisor & 0x00FF) as u8);
    vm.io_out(TIMER_CNTR0, (divisor >> 8) as u8);
}

#[test]
fn irq0_reaches_a_boxed_sink() {
    let clock = FakeHostClock::new();
    let seen = Arc::new(AtomicU64::new(0));
    let sink: Box<dyn InterruptSink> = Box::new(Irq0Counter {
        vm_id: 5,
        seen: Arc::clone(&seen),
    });
    let config = VmConfig {
        vm_id: 5,
        ..VmConfig::default()
    };
    let mut vm = Vm::new(config, clock.clone(), sink).unwrap();

    program_mode0(&mut vm, 3);
    for _ in 0..3 {
        clock.advance_ns(3 * NS_PER_TICK);
        vm.poll();
    }
    assert_eq!(seen.load(Ordering::Relaxed), 3);
}

#[test]
fn irq0_pacing_survives_a_single_large_host_stall() {
    let clock = FakeHostClock::new();
    let seen = Arc::new(AtomicU64::new(0));
    let mut vm = Vm::new(
        VmConfig::default(),
        clock.clone(),
        Irq0Counter {
            vm_id: 1,
            seen: Arc::clone(&seen),
        },
    )
    .unwrap();

    program_mode0(&mut vm, 10);
    // One expiry per poll, however far behind the host is.
    clock.advance_ns(1_000 * NS_PER_TICK);
    assert_eq!(vm.poll(), 1);
    assert_eq!(vm.next_deadline_ns(), Some(1_010 * NS_PER_TICK));
    assert_eq!(seen.load(Ordering::Relaxed), 1);
}

#[test]
fn snapshot_for_another_device_is_rejected() {
    let mut w = SnapshotWriter::new(*b"HPET", I8253::<FakeHostClock>::DEVICE_VERSION);
    w.field_u32(1, 0);
    let bytes = w.finish();

    let mut pit = I8253::new(1, FakeHostClock::new());
    let err = pit.load_state(&bytes).unwrap_err();
    assert!(matches!(err, SnapshotError::DeviceIdMismatch { .. }), "{err:?}");
}

#[test]
fn snapshot_with_invalid_mode_is_rejected() {
    const TAG_COUNTERS: u16 = 1;

    let counters = Encoder::new()
        .u32(1)
        .u16(100)
        .u8(0xFF)
        .u16(0)
        .u16(0)
        .bool(false)
        .bool(false)
        .bool(false)
        .bool(true)
        .bool(false)
        .u64(0)
        .finish();
    let mut w = SnapshotWriter::new(
        I8253::<FakeHostClock>::DEVICE_ID,
        I8253::<FakeHostClock>::DEVICE_VERSION,
    );
    w.field_bytes(TAG_COUNTERS, counters);
    let bytes = w.finish();

    let mut pit = I8253::new(1, FakeHostClock::new());
    let err = pit.load_state(&bytes).unwrap_err();
    assert_eq!(err, SnapshotError::InvalidFieldEncoding("pit mode"));
}
