#![cfg_attr(all(not(test), target_os = "none"), no_std)]

pub mod config;
pub mod hal;
pub mod serial;
pub mod interrupts;
pub mod kernel;
pub mod memory;
pub mod scheduler;
pub mod syscalls;
#[cfg(target_arch = "arm")]
pub mod drivers;

pub use config::{BootInfo, KernelConfig};
pub use kernel::{Dispatch, HaltRecord, Kernel, KernelFault};

/// Entry from the reset code, on the main stack with interrupts enabled.
///
/// `kernel_pages` is how many stack pages the kernel image and boot stack
/// already occupy; `data_start..data_end` is the section user programs may
/// write.
#[cfg(target_arch = "arm")]
#[no_mangle]
pub extern "C" fn kernel_main(kernel_pages: u32, init_entry: u32, data_start: u32, data_end: u32) -> ! {
    use memory::mpu::{self, MpuRegion};

    let boot = BootInfo {
        kernel_pages,
        init_entry,
        data_start,
        data_end,
    };
    let config = KernelConfig::default();

    serial::init();
    log_info!("EmberOS kernel started.");

    // Runs once, before anything else can reach the core peripherals.
    let mut cp = unsafe { cortex_m::Peripherals::steal() };
    cortex_m::interrupt::free(|_| {
        interrupts::init(&mut cp.SCB, &mut cp.SYST);

        if config.memory_protection {
            let data = match MpuRegion::user_data(&boot) {
                Ok(data) => data,
                Err(err) => panic!("cannot protect user data: {}", err),
            };
            mpu::enable(&cp.MPU, &[MpuRegion::background(), data]);
            log_info!("MPU enabled, user data at {:#010x}..{:#010x}.", data.base(), data.base() as u64 + data.size());
        }

        let board = drivers::board::Tm4c123::init();
        let mut kernel = Kernel::new(board, config, &boot).expect("stack page table");
        if let Some(record) = kernel.previous_halt() {
            log_warn!("Previous boot halted: {}", record);
            if let Err(err) = kernel.clear_halt_record() {
                log_error!("Failed to clear the halt record: {}", err);
            }
        }
        kernel.spawn("init", boot.init_entry).expect("cannot spawn init");
        *interrupts::handlers::KERNEL.lock() = Some(kernel);
    });

    println!("EmberOS is successfully running!");
    interrupts::handlers::launch()
}

#[cfg(all(target_arch = "arm", target_os = "none"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    println!("{}", info);
    log_error!("{}", info);
    loop {
        cortex_m::asm::wfi();
    }
}
