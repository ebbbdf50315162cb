use bit_field::BitField;
use core::fmt;

use super::MemoryError;
use crate::config::{SRAM_BASE, SRAM_PAGES, STACK_SIZE};

const WORD_BITS: usize = 32;
const BITMAP_WORDS: usize = (SRAM_PAGES + WORD_BITS - 1) / WORD_BITS;

/// Index of one stack page. Page `i` covers
/// `[SRAM_BASE + i * STACK_SIZE, SRAM_BASE + (i + 1) * STACK_SIZE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageIndex(u8);

impl PageIndex {
    pub fn new(index: usize) -> Option<Self> {
        (index < SRAM_PAGES).then(|| PageIndex(index as u8))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Lowest address of the page.
    pub fn base(self) -> u32 {
        SRAM_BASE + self.0 as u32 * STACK_SIZE
    }

    /// Initial stack pointer: one past the highest word (full-descending).
    pub fn top(self) -> u32 {
        self.base() + STACK_SIZE
    }

    pub fn contains(self, addr: u32) -> bool {
        addr >= self.base() && addr < self.top()
    }

    /// True when `[addr, addr + len)` lies entirely inside the page.
    pub fn contains_range(self, addr: u32, len: u32) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.base() && end <= self.top(),
            None => false,
        }
    }

    pub fn containing(addr: u32) -> Option<Self> {
        let offset = addr.checked_sub(SRAM_BASE)?;
        Self::new((offset / STACK_SIZE) as usize)
    }
}

impl fmt::Display for PageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} [{:#010x}..{:#010x})", self.0, self.base(), self.top())
    }
}

/// One bit per SRAM page. The first `reserved` pages belong to the kernel
/// for the whole uptime and are never handed out.
pub struct StackPages {
    used: [u32; BITMAP_WORDS],
    reserved: usize,
}

impl StackPages {
    pub fn new(kernel_pages: usize) -> Result<Self, MemoryError> {
        if kernel_pages > SRAM_PAGES {
            return Err(MemoryError::KernelTooLarge { pages: kernel_pages });
        }
        let mut pages = StackPages {
            used: [0; BITMAP_WORDS],
            reserved: kernel_pages,
        };
        for page in 0..kernel_pages {
            pages.mark(page, true);
        }
        Ok(pages)
    }

    /// Hand out the lowest free page above the kernel's reservation.
    pub fn allocate(&mut self) -> Result<PageIndex, MemoryError> {
        let page = (self.reserved..SRAM_PAGES)
            .find(|&page| !self.is_used(page))
            .ok_or(MemoryError::Exhausted)?;
        self.mark(page, true);
        Ok(PageIndex(page as u8))
    }

    /// Clear the usage bit. The caller guarantees nothing references the page
    /// any more. Kernel pages are never released.
    pub fn free(&mut self, page: PageIndex) {
        if page.index() < self.reserved {
            crate::log_error!("Refusing to free kernel {}", page);
            return;
        }
        self.mark(page.index(), false);
    }

    pub fn is_used(&self, page: usize) -> bool {
        self.used[page / WORD_BITS].get_bit(page % WORD_BITS)
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Pages currently handed out to processes.
    pub fn allocated_count(&self) -> usize {
        (self.reserved..SRAM_PAGES).filter(|&page| self.is_used(page)).count()
    }

    pub fn free_count(&self) -> usize {
        SRAM_PAGES - self.reserved - self.allocated_count()
    }

    fn mark(&mut self, page: usize, used: bool) {
        self.used[page / WORD_BITS].set_bit(page % WORD_BITS, used);
    }
}
