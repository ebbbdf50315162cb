//! Demo programs. The boot code passes one of the `*_main` symbols to the
//! kernel as the init entry point.

#![no_std]

use emberlibc::{Fork, Led, EXIT_FAILURE, EXIT_SUCCESS};

const CHILDREN: u32 = 4;

/// Forks a few children that blink the LED in turn, waits for each, and
/// reports how they went.
#[no_mangle]
pub extern "C" fn forktest_main() -> u32 {
    emberlibc::print("forktest: starting\n");

    for n in 0..CHILDREN {
        match emberlibc::fork() {
            Some(Fork::Child) => child(n),
            Some(Fork::Parent(pid)) => {
                if emberlibc::wait(pid).is_err() {
                    emberlibc::print("forktest: wait failed\n");
                    return EXIT_FAILURE;
                }
            }
            None => {
                emberlibc::print("forktest: fork failed\n");
                return EXIT_FAILURE;
            }
        }
    }

    emberlibc::print("forktest: ok\n");
    EXIT_SUCCESS
}

fn child(n: u32) -> ! {
    let colour = match n % 3 {
        0 => Led::Red,
        1 => Led::Green,
        _ => Led::Blue,
    };
    emberlibc::led(colour, true);
    emberlibc::delay(200);
    emberlibc::led(colour, false);
    emberlibc::exit(EXIT_SUCCESS)
}

/// Recurses until it runs off the bottom of its stack page. The kernel
/// should kill only this process.
#[no_mangle]
pub extern "C" fn stack_overflow_main() -> u32 {
    match emberlibc::fork() {
        Some(Fork::Child) => {
            emberlibc::print("stack_overflow: recursing\n");
            emberlibc::exit(recurse(0))
        }
        Some(Fork::Parent(pid)) => {
            let _ = emberlibc::wait(pid);
            emberlibc::print("stack_overflow: parent survived\n");
            EXIT_SUCCESS
        }
        None => EXIT_FAILURE,
    }
}

#[inline(never)]
#[allow(unconditional_recursion)]
fn recurse(depth: u32) -> u32 {
    let pad = [depth; 16];
    core::hint::black_box(&pad);
    recurse(depth + 1) + pad[15]
}

/// Writes to an address outside its own page.
#[no_mangle]
pub extern "C" fn seg_fault_main() -> u32 {
    match emberlibc::fork() {
        Some(Fork::Child) => {
            emberlibc::print("seg_fault: writing to kernel memory\n");
            unsafe { core::ptr::write_volatile(0x2000_0000 as *mut u32, 0xDEAD_BEEF) };
            emberlibc::exit(EXIT_SUCCESS)
        }
        Some(Fork::Parent(pid)) => {
            let _ = emberlibc::wait(pid);
            emberlibc::print("seg_fault: parent survived\n");
            EXIT_SUCCESS
        }
        None => EXIT_FAILURE,
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    emberlibc::exit(EXIT_FAILURE)
}
