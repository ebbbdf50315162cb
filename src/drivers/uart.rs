use bit_field::BitField;

use super::{enable_clock, gpio, reg, RCGCUART};
use crate::hal::GpioPort;

const UART1_BASE: u32 = 0x4000_D000;

const DR: u32 = 0x000;
const FR: u32 = 0x018;
const IBRD: u32 = 0x024;
const FBRD: u32 = 0x028;
const LCRH: u32 = 0x02C;
const CTL: u32 = 0x030;
const CC: u32 = 0xFC8;

const FR_TXFF: usize = 5;
const LCRH_FEN: u32 = 1 << 4;
const LCRH_WLEN_8: u32 = 0b11 << 5;
const CTL_UARTEN: u32 = 1 << 0;
const CTL_TXE: u32 = 1 << 8;
const CTL_RXE: u32 = 1 << 9;

/// Polled 8N1 UART.
pub struct Uart {
    base: u32,
}

impl Uart {
    /// UART1 on PB0 (RX) and PB1 (TX).
    pub const fn uart1() -> Uart {
        Uart { base: UART1_BASE }
    }

    pub fn init(&mut self, clock_hz: u32, baud: u32) {
        enable_clock(RCGCUART, 1);
        gpio::configure_alternate(GpioPort::B, 0b11, 1);

        let (ibrd, fbrd) = divisors(clock_hz, baud);
        unsafe {
            reg(self.base + CTL).write(0);
            reg(self.base + IBRD).write(ibrd);
            reg(self.base + FBRD).write(fbrd);
            reg(self.base + LCRH).write(LCRH_WLEN_8 | LCRH_FEN);
            reg(self.base + CC).write(0);
            reg(self.base + CTL).write(CTL_UARTEN | CTL_TXE | CTL_RXE);
        }
    }

    fn wait_for_tx_space(&mut self) {
        let fr = unsafe { reg(self.base + FR) };
        while fr.read().get_bit(FR_TXFF) {}
    }

    pub fn send(&mut self, data: u8) {
        self.wait_for_tx_space();
        unsafe { reg(self.base + DR).write(data as u32) };
    }
}

impl core::fmt::Write for Uart {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            self.send(byte);
        }
        Ok(())
    }
}

/// Integer and 6-bit fractional baud divisors for a 16x oversampled UART,
/// rounded to nearest.
fn divisors(clock_hz: u32, baud: u32) -> (u32, u32) {
    let scaled = (clock_hz as u64 * 8 / baud as u64 + 1) / 2;
    ((scaled / 64) as u32, (scaled % 64) as u32)
}
