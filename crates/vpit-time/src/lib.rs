//! Host-side time and timer scheduling primitives consumed by emulated timer devices.
//!
//! Devices never sleep or spawn threads. They read the current time from a [`HostClock`] and
//! request wake-ups by arming a [`OneShotTimer`] against a [`TimerQueue`]. The VM monitor drains
//! due events from the queue (see [`TimerQueue::pop_due`]) and routes each one back to the
//! device that armed it. Production code derives time from a monotonic host clock, while unit
//! tests can drive everything deterministically through [`FakeHostClock`].

#![forbid(unsafe_code)]

mod clock;
mod interrupt;
mod oneshot;
mod timer_queue;

pub use clock::{FakeHostClock, HostClock, StdHostClock};
pub use interrupt::{InterruptSink, IrqAssertion, RecordingInterruptSink};
pub use oneshot::OneShotTimer;
pub use timer_queue::{TimerEvent, TimerId, TimerQueue};

pub const NANOS_PER_SEC: u64 = 1_000_000_000;
