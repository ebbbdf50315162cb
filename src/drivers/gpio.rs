use bit_field::BitField;

use super::{enable_clock, reg, RCGCGPIO};
use crate::hal::GpioPort;

const DIR: u32 = 0x400;
const AFSEL: u32 = 0x420;
const DEN: u32 = 0x51C;
const LOCK: u32 = 0x520;
const CR: u32 = 0x524;
const AMSEL: u32 = 0x528;
const PCTL: u32 = 0x52C;

const UNLOCK_KEY: u32 = 0x4C4F_434B;

fn base(port: GpioPort) -> u32 {
    match port {
        GpioPort::A => 0x4000_4000,
        GpioPort::B => 0x4000_5000,
        GpioPort::C => 0x4000_6000,
        GpioPort::D => 0x4000_7000,
        GpioPort::E => 0x4002_4000,
        GpioPort::F => 0x4002_5000,
    }
}

fn set_bits(port: GpioPort, offset: u32, mask: u8, on: bool) {
    let register = unsafe { reg(base(port) + offset) };
    register.update(|value| {
        if on {
            *value |= mask as u32;
        } else {
            *value &= !(mask as u32);
        }
    });
}

/// PF0 and PD7 are NMI-capable and have to be unlocked before their
/// function can change.
fn unlock(port: GpioPort, pin: u8) {
    let locked = matches!((port, pin), (GpioPort::F, 0) | (GpioPort::D, 7));
    if locked {
        unsafe {
            reg(base(port) + LOCK).write(UNLOCK_KEY);
            reg(base(port) + CR).update(|value| {
                value.set_bit(pin as usize, true);
            });
        }
    }
}

pub fn enable_port(port: GpioPort) {
    enable_clock(RCGCGPIO, port as usize);
}

/// Plain digital output on every pin in `mask`.
pub fn configure_output(port: GpioPort, mask: u8) {
    enable_port(port);
    for pin in (0..8).filter(|pin| mask.get_bit(*pin)) {
        unlock(port, pin as u8);
    }
    set_bits(port, AMSEL, mask, false);
    set_bits(port, AFSEL, mask, false);
    set_bits(port, DIR, mask, true);
    set_bits(port, DEN, mask, true);
}

/// Hand the pins in `mask` to the peripheral selected by `function`.
pub fn configure_alternate(port: GpioPort, mask: u8, function: u32) {
    enable_port(port);
    set_bits(port, AMSEL, mask, false);
    set_bits(port, AFSEL, mask, true);
    set_bits(port, DEN, mask, true);
    let pctl = unsafe { reg(base(port) + PCTL) };
    pctl.update(|value| {
        for pin in (0..8).filter(|pin| mask.get_bit(*pin)) {
            value.set_bits(pin * 4..pin * 4 + 4, function);
        }
    });
}

pub fn is_output(port: GpioPort, pin: u8) -> bool {
    enable_port(port);
    unsafe { reg(base(port) + DIR).read().get_bit(pin as usize) }
}

/// Drive one pin through the masked data window, leaving the others alone.
pub fn write(port: GpioPort, pin: u8, on: bool) {
    let mask = 1u32 << pin;
    let data = unsafe { reg(base(port) + (mask << 2)) };
    data.write(if on { mask } else { 0 });
}
