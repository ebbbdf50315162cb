//! Narrow contracts between the kernel core and the board it runs on.
//!
//! The core never touches a register directly. Everything it needs from the
//! outside world (stack memory, console, GPIO, SPI, the delay timer, flash and
//! the MPU) goes through [`Platform`], so the same process and scheduling
//! logic runs on the TM4C123 and on a host-side mock.

use core::fmt;

use crate::memory::mpu::MpuRegion;

/// Raw access to the RAM backing process stack pages.
///
/// Addresses are physical. The kernel only passes addresses it has already
/// checked against a page or region it owns.
pub trait StackMemory {
    fn read_word(&self, addr: u32) -> u32;
    fn write_word(&mut self, addr: u32, value: u32);
    fn read_bytes(&self, addr: u32, buf: &mut [u8]);
    fn write_bytes(&mut self, addr: u32, bytes: &[u8]);

    /// Copy `len` bytes from `src` to `dst`. The ranges never overlap.
    fn copy_bytes(&mut self, dst: u32, src: u32, len: u32);
}

/// Peripheral primitives consumed by the syscall layer and the scheduler.
pub trait Platform: StackMemory {
    fn console_write(&mut self, bytes: &[u8]) -> Result<(), DeviceError>;

    fn gpio_set(&mut self, port: GpioPort, pin: u8, on: bool) -> Result<(), DeviceError>;

    /// Full-duplex exchange of one byte. `direction` tells the driver which
    /// half of the exchange the caller cares about.
    fn spi_transfer(&mut self, direction: SpiDirection, byte: u8) -> Result<u8, DeviceError>;

    /// Arm the one-shot delay timer.
    fn timer_start(&mut self, delay_ms: u32);

    fn timer_expired(&mut self) -> bool;

    /// Program `src` into flash starting at `flash_address`, preserving the
    /// rest of every block touched.
    fn persist_write(&mut self, src: &[u8], flash_address: u32) -> Result<(), DeviceError>;

    /// Replace the user-writable stack region of the protection unit.
    fn protect_stack(&mut self, region: MpuRegion);

    /// Address of the user-executable stub that turns a return from a process
    /// entry point into `exit(r0)`.
    fn exit_trampoline(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    Busy,
    Timeout,
    InvalidArgument,
    /// The flash controller reported a programming or erase error.
    Flash,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Busy => write!(f, "device busy"),
            DeviceError::Timeout => write!(f, "device timed out"),
            DeviceError::InvalidArgument => write!(f, "invalid device argument"),
            DeviceError::Flash => write!(f, "flash controller error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioPort {
    A = 0,
    B,
    C,
    D,
    E,
    F,
}

impl TryFrom<u32> for GpioPort {
    type Error = u32;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Ok(match raw {
            0 => GpioPort::A,
            1 => GpioPort::B,
            2 => GpioPort::C,
            3 => GpioPort::D,
            4 => GpioPort::E,
            5 => GpioPort::F,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiDirection {
    Transmit = 0,
    Receive,
}

impl TryFrom<u32> for SpiDirection {
    type Error = u32;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(SpiDirection::Transmit),
            1 => Ok(SpiDirection::Receive),
            other => Err(other),
        }
    }
}

/// The on-board RGB LED. Each colour is one pin on port F.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedColour {
    Red = 0,
    Green,
    Blue,
}

impl LedColour {
    pub const PORT: GpioPort = GpioPort::F;

    pub fn pin(self) -> u8 {
        match self {
            LedColour::Red => 1,
            LedColour::Blue => 2,
            LedColour::Green => 3,
        }
    }
}

impl TryFrom<u32> for LedColour {
    type Error = u32;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(LedColour::Red),
            1 => Ok(LedColour::Green),
            2 => Ok(LedColour::Blue),
            other => Err(other),
        }
    }
}
