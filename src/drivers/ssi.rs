use bit_field::BitField;

use super::{enable_clock, gpio, poll_until, reg, RCGCSSI};
use crate::hal::{DeviceError, GpioPort};

const SSI0_BASE: u32 = 0x4000_8000;

const CR0: u32 = 0x000;
const CR1: u32 = 0x004;
const DR: u32 = 0x008;
const SR: u32 = 0x00C;
const CPSR: u32 = 0x010;
const CC: u32 = 0xFC8;

const SR_TNF: usize = 1;
const SR_RNE: usize = 2;
const CR1_SSE: usize = 1;

const POLL_LIMIT: u32 = 100_000;

/// SSI0 as a Freescale SPI master on PA2-PA5.
pub struct Ssi {
    base: u32,
}

impl Ssi {
    pub const fn ssi0() -> Ssi {
        Ssi { base: SSI0_BASE }
    }

    /// `data_size` is the DSS field (bits per frame minus one), `prescale`
    /// the even clock divider and `serial_clock_rate` the SCR field.
    pub fn init_master(&mut self, data_size: u32, prescale: u32, serial_clock_rate: u32) -> Result<(), DeviceError> {
        if prescale < 2 || prescale % 2 != 0 || !(3..=15).contains(&data_size) {
            return Err(DeviceError::InvalidArgument);
        }
        enable_clock(RCGCSSI, 0);
        gpio::configure_alternate(GpioPort::A, 0b0011_1100, 2);

        unsafe {
            let cr1 = reg(self.base + CR1);
            cr1.write(0);
            reg(self.base + CC).write(0);
            reg(self.base + CPSR).write(prescale);
            let mut cr0 = 0u32;
            cr0.set_bits(0..4, data_size);
            cr0.set_bits(8..16, serial_clock_rate);
            reg(self.base + CR0).write(cr0);
            cr1.update(|value| {
                value.set_bit(CR1_SSE, true);
            });
        }
        Ok(())
    }

    /// Clock one frame out and the simultaneous frame in.
    pub fn transfer(&mut self, byte: u8) -> Result<u8, DeviceError> {
        let sr = unsafe { reg(self.base + SR) };
        if !poll_until(POLL_LIMIT, || sr.read().get_bit(SR_TNF)) {
            return Err(DeviceError::Busy);
        }
        unsafe { reg(self.base + DR).write(byte as u32) };
        if !poll_until(POLL_LIMIT, || sr.read().get_bit(SR_RNE)) {
            return Err(DeviceError::Timeout);
        }
        Ok(unsafe { reg(self.base + DR).read() } as u8)
    }
}
