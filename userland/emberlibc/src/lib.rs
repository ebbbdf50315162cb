//! Syscall wrappers for programs running on EmberOS.
//!
//! Every call is `svc 0` with the syscall number in r0 and up to three
//! arguments in r1-r3. The result comes back in r0.

#![no_std]

use core::arch::asm;

pub const SYS_FORK: u32 = 0;
pub const SYS_WAIT: u32 = 1;
pub const SYS_EXIT: u32 = 2;
pub const SYS_WRITE: u32 = 3;
pub const SYS_LED: u32 = 4;
pub const SYS_YIELD: u32 = 5;
pub const SYS_SPI: u32 = 6;
pub const SYS_GPIO: u32 = 7;
pub const SYS_DELAY: u32 = 8;

pub const SUCCESS: u32 = 0;
pub const FAILURE: u32 = u32::MAX;

/// What a freshly forked child sees as the result of `fork`.
pub const NULLPID: u32 = 25;

pub const EXIT_SUCCESS: u32 = 0;
pub const EXIT_FAILURE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Led {
    Red = 0,
    Green = 1,
    Blue = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Port {
    A = 0,
    B = 1,
    C = 2,
    D = 3,
    E = 4,
    F = 5,
}

#[inline(always)]
fn syscall(number: u32, a: u32, b: u32, c: u32) -> u32 {
    let ret: u32;
    unsafe {
        asm!(
            "svc 0",
            inlateout("r0") number => ret,
            in("r1") a,
            in("r2") b,
            in("r3") c,
            options(nostack),
        );
    }
    ret
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    Parent(u32),
    Child,
}

/// `None` when the kernel had no free slot or stack page.
pub fn fork() -> Option<Fork> {
    match syscall(SYS_FORK, 0, 0, 0) {
        0 => None,
        NULLPID => Some(Fork::Child),
        pid => Some(Fork::Parent(pid)),
    }
}

/// Block until `pid` exits. Returns at once if it already has.
pub fn wait(pid: u32) -> Result<(), ()> {
    match syscall(SYS_WAIT, pid, 0, 0) {
        SUCCESS => Ok(()),
        _ => Err(()),
    }
}

pub fn exit(code: u32) -> ! {
    syscall(SYS_EXIT, code, 0, 0);
    loop {}
}

pub fn write(bytes: &[u8]) -> Result<(), ()> {
    match syscall(SYS_WRITE, bytes.as_ptr() as u32, bytes.len() as u32, 0) {
        SUCCESS => Ok(()),
        _ => Err(()),
    }
}

pub fn print(s: &str) {
    for chunk in s.as_bytes().chunks(128) {
        let _ = write(chunk);
    }
}

pub fn led(colour: Led, on: bool) {
    syscall(SYS_LED, colour as u32, on as u32, 0);
}

pub fn yield_now() {
    syscall(SYS_YIELD, 0, 0, 0);
}

pub fn spi_send(byte: &u8) -> Result<(), ()> {
    match syscall(SYS_SPI, 0, byte as *const u8 as u32, 0) {
        SUCCESS => Ok(()),
        _ => Err(()),
    }
}

pub fn spi_receive(byte: &mut u8) -> Result<(), ()> {
    match syscall(SYS_SPI, 1, byte as *mut u8 as u32, 0) {
        SUCCESS => Ok(()),
        _ => Err(()),
    }
}

pub fn gpio(port: Port, pin: u8, on: bool) -> Result<(), ()> {
    match syscall(SYS_GPIO, port as u32, pin as u32, on as u32) {
        SUCCESS => Ok(()),
        _ => Err(()),
    }
}

pub fn delay(ms: u32) {
    syscall(SYS_DELAY, ms, 0, 0);
}
