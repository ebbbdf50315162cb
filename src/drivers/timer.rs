use bit_field::BitField;

use super::{enable_clock, reg, RCGCTIMER};

const TIMER0_BASE: u32 = 0x4003_0000;

const CFG: u32 = 0x000;
const TAMR: u32 = 0x004;
const CTL: u32 = 0x00C;
const RIS: u32 = 0x01C;
const ICR: u32 = 0x024;
const TAILR: u32 = 0x028;

const CFG_32_BIT: u32 = 0;
const TAMR_ONE_SHOT: u32 = 0x1;
const CTL_TAEN: usize = 0;
const RIS_TATORIS: usize = 0;

/// General-purpose timer A of Timer0 in 32-bit one-shot mode.
pub struct OneShot {
    base: u32,
    ticks_per_ms: u32,
}

impl OneShot {
    pub fn timer0(clock_hz: u32) -> OneShot {
        enable_clock(RCGCTIMER, 0);
        OneShot {
            base: TIMER0_BASE,
            ticks_per_ms: clock_hz / 1000,
        }
    }

    pub fn start(&mut self, delay_ms: u32) {
        let load = delay_ms.saturating_mul(self.ticks_per_ms).max(1) - 1;
        unsafe {
            let ctl = reg(self.base + CTL);
            ctl.update(|value| {
                value.set_bit(CTL_TAEN, false);
            });
            reg(self.base + CFG).write(CFG_32_BIT);
            reg(self.base + TAMR).write(TAMR_ONE_SHOT);
            reg(self.base + TAILR).write(load);
            reg(self.base + ICR).write(1 << RIS_TATORIS);
            ctl.update(|value| {
                value.set_bit(CTL_TAEN, true);
            });
        }
    }

    pub fn expired(&mut self) -> bool {
        unsafe { reg(self.base + RIS).read().get_bit(RIS_TATORIS) }
    }
}
