use std::thread;

use vpit_devices::control::{NS_PER_TICK, TIMER_CNTR0, TIMER_CTRL};
use vpit_devices::{PortIoExit, SharedVm, Vm, VmConfig};
use vpit_time::{FakeHostClock, HostClock, RecordingInterruptSink};

const START: u16 = 500;
const EXPIRIES: u64 = 100;
const VCPUS: u32 = 4;

#[test]
fn vcpu_exits_and_timer_expiry_are_serialized() {
    let clock = FakeHostClock::new();
    let config = VmConfig {
        vm_id: 9,
        name: "smp".to_string(),
        vcpus: VCPUS,
    };
    let mut vm = Vm::new(config, clock.clone(), RecordingInterruptSink::new()).unwrap();
    vm.io_out(TIMER_CTRL, 0x30);
    vm.io_out(TIMER_CNTR0, START as u8);
    vm.io_out(TIMER_CNTR0, (START >> 8) as u8);
    let shared = SharedVm::new(vm);

    let timer = {
        let shared = shared.clone();
        let clock = clock.clone();
        thread::spawn(move || {
            for _ in 0..EXPIRIES {
                // Advance under the lock so vCPUs never observe a half-delivered expiry.
                let mut vm = shared.lock();
                clock.advance_ns(u64::from(START) * NS_PER_TICK);
                vm.poll();
            }
        })
    };

    let vcpus: Vec<_> = (0..VCPUS)
        .map(|vcpu_id| {
            let shared = shared.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    // A latch followed by its two reads is one guest critical section.
                    let mut vm = shared.lock();
                    let mut latch = PortIoExit::output(vcpu_id, TIMER_CTRL, 1, 0x00);
                    assert_eq!(vm.io_exit(&mut latch), None);
                    let mut hi = PortIoExit::input(vcpu_id, TIMER_CNTR0, 1);
                    let mut lo = PortIoExit::input(vcpu_id, TIMER_CNTR0, 1);
                    vm.io_exit(&mut hi);
                    vm.io_exit(&mut lo);
                    let count = (hi.data << 8) | lo.data;
                    assert!(count >= 1 && count <= u32::from(START), "count {count}");
                }
            })
        })
        .collect();

    timer.join().unwrap();
    for vcpu in vcpus {
        vcpu.join().unwrap();
    }

    let vm = shared.lock();
    assert_eq!(vm.sink().count() as u64, EXPIRIES);
    assert!(vm.sink().asserted().iter().all(|a| a.vm_id == 9 && a.vcpu_id == 0 && a.irq == 0));
    assert_eq!(
        vm.next_deadline_ns(),
        Some(clock.now_ns() + u64::from(START) * NS_PER_TICK)
    );
}

#[test]
fn shared_vm_helpers_take_the_lock() {
    let clock = FakeHostClock::new();
    let vm = Vm::new(VmConfig::default(), clock.clone(), RecordingInterruptSink::new()).unwrap();
    let shared = SharedVm::new(vm);

    let deadline = shared.next_deadline_ns().unwrap();
    clock.set_now_ns(deadline);
    assert_eq!(clock.now_ns(), deadline);
    assert_eq!(shared.poll(), 1);

    let mut exit = PortIoExit::input(0, TIMER_CTRL, 1);
    assert_eq!(shared.io_exit(&mut exit), None);
    assert_eq!(exit.data, 0);
}
