//! Compile-time limits and the boot-time information handed over by the
//! reset code.

/// Capacity of the process table.
pub const MAX_PROC: usize = 24;

/// A pid no live process ever has. Returned to the child by `fork`.
pub const NULLPID: u32 = MAX_PROC as u32 + 1;

pub const EXIT_SUCCESS: u32 = 0;
pub const EXIT_FAILURE: u32 = 1;

/// Size of one stack page. Every process owns exactly one.
pub const STACK_SIZE: u32 = 0x400;

pub const SRAM_BASE: u32 = 0x2000_0000;
pub const SRAM_END: u32 = 0x2000_8000;
pub const SRAM_PAGES: usize = ((SRAM_END - SRAM_BASE) / STACK_SIZE) as usize;

pub const FLASH_BASE: u32 = 0x0000_0000;
pub const FLASH_END: u32 = 0x0004_0000;
/// Erase granularity of the flash controller.
pub const FLASH_BLOCK_SIZE: u32 = 0x400;
/// Last flash block. Holds the reason for the most recent kernel halt.
pub const HALT_RECORD_ADDR: u32 = FLASH_END - FLASH_BLOCK_SIZE;

/// Bytes kept from a process name, the rest is truncated.
pub const NAME_LEN: usize = 16;

/// Longest buffer a single `write` syscall forwards to the console.
pub const MAX_WRITE: usize = 128;

pub const SYSCLK_HZ: u32 = 16_000_000;
pub const TICK_MS: u32 = 10;
pub const CONSOLE_BAUD: u32 = 115_200;

// The MPU can only describe power-of-two regions aligned to their size.
const _: () = assert!(STACK_SIZE.is_power_of_two() && STACK_SIZE >= 64);
const _: () = assert!(SRAM_BASE % STACK_SIZE == 0);
const _: () = assert!(MAX_PROC < u8::MAX as usize);

/// What the reset code knows that the kernel cannot compute by itself.
#[derive(Debug, Clone, Copy)]
pub struct BootInfo {
    /// Stack pages already consumed by the kernel image and boot stack.
    pub kernel_pages: u32,
    /// Entry point of the first user program.
    pub init_entry: u32,
    /// Start of the data section user programs are allowed to write.
    pub data_start: u32,
    /// End (exclusive) of that data section.
    pub data_end: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Reprogram the MPU stack region whenever a process is switched in.
    pub memory_protection: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            memory_protection: cfg!(feature = "mpu"),
        }
    }
}
