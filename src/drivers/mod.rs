//! Register-level drivers for the TM4C123 peripherals the kernel uses.

pub mod board;
pub mod flash;
pub mod gpio;
pub mod ssi;
pub mod timer;
pub mod uart;

use bit_field::BitField;
use volatile::Volatile;

// ──────────────────────────────────────────────────────────────
//  System control clock gates
// ──────────────────────────────────────────────────────────────

const SYSCTL_BASE: u32 = 0x400F_E000;
pub(crate) const RCGCTIMER: u32 = SYSCTL_BASE + 0x604;
pub(crate) const RCGCGPIO: u32 = SYSCTL_BASE + 0x608;
pub(crate) const RCGCUART: u32 = SYSCTL_BASE + 0x618;
pub(crate) const RCGCSSI: u32 = SYSCTL_BASE + 0x61C;

/// The 32-bit peripheral register at `addr`.
///
/// # Safety
/// `addr` must be a mapped peripheral register and nothing else may hold a
/// reference to it for the returned lifetime.
pub(crate) unsafe fn reg(addr: u32) -> &'static mut Volatile<u32> {
    &mut *(addr as *mut Volatile<u32>)
}

/// Turn on the clock of one peripheral instance and wait for it to settle.
pub(crate) fn enable_clock(gate: u32, bit: usize) {
    let rcgc = unsafe { reg(gate) };
    if rcgc.read().get_bit(bit) {
        return;
    }
    rcgc.update(|value| {
        value.set_bit(bit, true);
    });
    // The first access after enabling a gate needs a few cycles.
    let _ = rcgc.read();
    let _ = rcgc.read();
}

/// Spin until `done` or `limit` polls pass. Returns whether `done` happened.
pub(crate) fn poll_until(limit: u32, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..limit {
        if done() {
            return true;
        }
    }
    done()
}
