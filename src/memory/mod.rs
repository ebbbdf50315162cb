pub mod mpu;
pub mod stack_pages;

use core::fmt;

use crate::config::{BootInfo, FLASH_BASE, FLASH_END, MAX_PROC, SRAM_PAGES};
pub use stack_pages::{PageIndex, StackPages};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// Every stack page is in use.
    Exhausted,
    /// The kernel claims more pages than SRAM holds.
    KernelTooLarge { pages: usize },
    /// An MPU region must be a power of two of at least 32 bytes.
    BadRegionSize(u32),
    BadRegionNumber(u8),
    /// The writable user data region reaches into process stack pages.
    DataOverlapsStacks { end: u64, first_stack: u32 },
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::Exhausted => write!(f, "no free stack page"),
            MemoryError::KernelTooLarge { pages } => {
                write!(f, "kernel uses {} pages but SRAM only has {}", pages, SRAM_PAGES)
            }
            MemoryError::BadRegionSize(size) => write!(f, "invalid MPU region size {:#x}", size),
            MemoryError::BadRegionNumber(n) => write!(f, "invalid MPU region number {}", n),
            MemoryError::DataOverlapsStacks { end, first_stack } => write!(
                f,
                "user data region ends at {:#x}, past the first stack page at {:#010x}",
                end, first_stack
            ),
        }
    }
}

/// Build the stack-page table, reserving what the boot stack already uses.
pub fn init(boot: &BootInfo) -> Result<StackPages, MemoryError> {
    let pages = StackPages::new(boot.kernel_pages as usize)?;
    crate::log_info!(
        "Stack pages: {} reserved by the kernel, {} free.",
        pages.reserved(),
        pages.free_count()
    );
    if MAX_PROC > pages.free_count() {
        crate::log_warn!(
            "MAX_PROC is {} but only {} stack pages are free.",
            MAX_PROC,
            pages.free_count()
        );
    }
    Ok(pages)
}

/// True when `[addr, addr + len)` lies entirely in flash.
pub fn in_flash(addr: u32, len: u32) -> bool {
    match addr.checked_add(len) {
        Some(end) => addr >= FLASH_BASE && end <= FLASH_END,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_ranges() {
        assert!(in_flash(0x100, 16));
        assert!(in_flash(FLASH_END - 4, 4));
        assert!(!in_flash(FLASH_END - 4, 8));
        assert!(!in_flash(u32::MAX - 2, 8));
    }
}
