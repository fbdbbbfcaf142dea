//! i8253/8254 port map, timing constants and control-word decoding.
//!
//! All knowledge of the hardware bit layout lives here; the emulator only ever sees a decoded
//! [`ControlWord`].

use bitflags::bitflags;
use vpit_time::NANOS_PER_SEC;

pub const TIMER_CNTR0: u16 = 0x40;
pub const TIMER_CNTR1: u16 = 0x41;
pub const TIMER_CNTR2: u16 = 0x42;
pub const TIMER_CTRL: u16 = 0x43;

/// Input clock of the legacy PC timer.
pub const TIMER_FREQ_HZ: u64 = 1_193_182;

/// Nanoseconds per counter tick, truncated the same way the virtual hardware defines it.
pub const NS_PER_TICK: u64 = NANOS_PER_SEC / TIMER_FREQ_HZ;

/// A programmed count of zero means the full 16-bit range.
pub const MAX_COUNT_TICKS: u64 = 0x1_0000;

/// Access-mode bits for "LSB then MSB"; also reported in the readback status byte.
pub const TIMER_16BIT: u8 = 0x30;

/// Readback command: count readback is requested when this bit is *clear*.
pub const TIMER_RB_COUNT: u8 = 0x20;
/// Readback command: status readback is requested when this bit is *clear*.
pub const TIMER_RB_STATUS: u8 = 0x10;

const _: () = assert!(NS_PER_TICK == 838);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Latch,
    LsbOnly,
    MsbOnly,
    LsbThenMsb,
}

impl AccessMode {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Latch,
            0b01 => Self::LsbOnly,
            0b10 => Self::MsbOnly,
            _ => Self::LsbThenMsb,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PitMode {
    InterruptOnTerminalCount = 0,
    HardwareOneShot = 1,
    RateGenerator = 2,
    SquareWave = 3,
    SoftwareStrobe = 4,
    HardwareStrobe = 5,
}

impl PitMode {
    /// Decodes the 3-bit mode field. Modes 6 and 7 are aliases of 2 and 3 on real parts.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0 => Self::InterruptOnTerminalCount,
            1 => Self::HardwareOneShot,
            2 | 6 => Self::RateGenerator,
            3 | 7 => Self::SquareWave,
            4 => Self::SoftwareStrobe,
            _ => Self::HardwareStrobe,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Whether the emulated counter reloads and interrupts again after reaching terminal count.
    ///
    /// Interrupt-on-terminal-count is the one mode emulated in full, as a free-running
    /// generator. The other modes are accepted but stop after their first interrupt.
    pub fn rearms_on_fire(self) -> bool {
        matches!(self, Self::InterruptOnTerminalCount)
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ReadbackChannels: u8 {
        const CH0 = 1 << 1;
        const CH1 = 1 << 2;
        const CH2 = 1 << 3;
    }
}

impl ReadbackChannels {
    pub fn contains_channel(self, channel: usize) -> bool {
        match channel {
            0 => self.contains(Self::CH0),
            1 => self.contains(Self::CH1),
            2 => self.contains(Self::CH2),
            _ => false,
        }
    }
}

/// A byte written to the control port, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlWord {
    /// Channel select `11`: snapshot status and/or count for a set of channels.
    ReadBack {
        channels: ReadbackChannels,
        status: bool,
        count: bool,
    },
    /// Access mode `00`: latch the current count of one channel.
    Latch { channel: usize },
    /// Any other access mode: program a channel.
    SetMode {
        channel: usize,
        access: AccessMode,
        mode: PitMode,
        bcd: bool,
    },
}

impl ControlWord {
    pub fn decode(byte: u8) -> Self {
        let channel = usize::from(byte >> 6);
        if channel == 3 {
            return Self::ReadBack {
                channels: ReadbackChannels::from_bits_truncate(byte),
                status: byte & TIMER_RB_STATUS == 0,
                count: byte & TIMER_RB_COUNT == 0,
            };
        }

        match AccessMode::from_bits(byte >> 4) {
            AccessMode::Latch => Self::Latch { channel },
            access => Self::SetMode {
                channel,
                access,
                mode: PitMode::from_bits(byte >> 1),
                bcd: byte & 1 != 0,
            },
        }
    }
}
