/// Entry point into the VM monitor's virtual interrupt controller.
///
/// Timer devices only ever *assert* lines from their expiry handlers; acknowledging and
/// lowering the line is the interrupt controller's business.
pub trait InterruptSink {
    fn assert_irq(&mut self, vm_id: u32, vcpu_id: u32, irq: u8);
}

impl<S: InterruptSink + ?Sized> InterruptSink for &mut S {
    fn assert_irq(&mut self, vm_id: u32, vcpu_id: u32, irq: u8) {
        (**self).assert_irq(vm_id, vcpu_id, irq);
    }
}

impl<S: InterruptSink + ?Sized> InterruptSink for Box<S> {
    fn assert_irq(&mut self, vm_id: u32, vcpu_id: u32, irq: u8) {
        (**self).assert_irq(vm_id, vcpu_id, irq);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqAssertion {
    pub vm_id: u32,
    pub vcpu_id: u32,
    pub irq: u8,
}

/// Sink that records every assertion, for tests and for the CLI's statistics.
#[derive(Debug, Default, Clone)]
pub struct RecordingInterruptSink {
    asserted: Vec<IrqAssertion>,
}

impl RecordingInterruptSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asserted(&self) -> &[IrqAssertion] {
        &self.asserted
    }

    pub fn count(&self) -> usize {
        self.asserted.len()
    }

    pub fn take(&mut self) -> Vec<IrqAssertion> {
        std::mem::take(&mut self.asserted)
    }
}

impl InterruptSink for RecordingInterruptSink {
    fn assert_irq(&mut self, vm_id: u32, vcpu_id: u32, irq: u8) {
        self.asserted.push(IrqAssertion { vm_id, vcpu_id, irq });
    }
}
