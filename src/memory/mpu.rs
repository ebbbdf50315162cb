//! ARMv7-M MPU region encoding.
//!
//! Three regions are used. A background region spans the whole address
//! space (privileged read/write, unprivileged read-only), a second one opens
//! the user data section for writing, and the highest-numbered region is
//! moved to the stack page of whichever process is switched in. Higher
//! region numbers win where regions overlap.

use bit_field::BitField;
use bitflags::bitflags;

use super::{MemoryError, PageIndex};
use crate::config::{BootInfo, SRAM_BASE, SRAM_END, STACK_SIZE};

pub const BACKGROUND_REGION: u8 = 5;
pub const DATA_REGION: u8 = 6;
pub const STACK_REGION: u8 = 7;
const REGION_COUNT: u8 = 8;

const RBAR_VALID: usize = 4;
const RASR_SIZE: core::ops::Range<usize> = 1..6;
const RASR_AP: core::ops::Range<usize> = 24..27;

bitflags! {
    /// Single-bit attributes of the RASR register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegionAttributes: u32 {
        const ENABLE = 1 << 0;
        const BUFFERABLE = 1 << 16;
        const CACHEABLE = 1 << 17;
        const SHAREABLE = 1 << 18;
        const EXECUTE_NEVER = 1 << 28;
    }
}

/// RASR.AP encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPermission {
    NoAccess = 0b000,
    PrivilegedOnly = 0b001,
    UserReadOnly = 0b010,
    FullAccess = 0b011,
}

/// Ready-to-write RBAR/RASR pair for one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpuRegion {
    pub number: u8,
    pub rbar: u32,
    pub rasr: u32,
}

impl MpuRegion {
    /// `size` must be a power of two of at least 32 bytes and `base` must be
    /// aligned to it.
    pub fn new(
        number: u8,
        base: u32,
        size: u64,
        access: AccessPermission,
        attributes: RegionAttributes,
    ) -> Result<Self, MemoryError> {
        if number >= REGION_COUNT {
            return Err(MemoryError::BadRegionNumber(number));
        }
        let size_field = size_field(size)?;
        if base as u64 % size != 0 {
            return Err(MemoryError::BadRegionSize(size as u32));
        }

        let mut rbar = base;
        rbar.set_bits(0..4, number as u32);
        rbar.set_bit(RBAR_VALID, true);

        let mut rasr = (attributes | RegionAttributes::ENABLE).bits();
        rasr.set_bits(RASR_SIZE, size_field);
        rasr.set_bits(RASR_AP, access as u32);

        Ok(MpuRegion { number, rbar, rasr })
    }

    /// Read/write access to exactly one stack page.
    pub fn stack_page(page: PageIndex) -> Self {
        let mut rbar = page.base();
        rbar.set_bits(0..4, STACK_REGION as u32);
        rbar.set_bit(RBAR_VALID, true);

        let attributes = RegionAttributes::ENABLE
            | RegionAttributes::CACHEABLE
            | RegionAttributes::SHAREABLE
            | RegionAttributes::EXECUTE_NEVER;
        let mut rasr = attributes.bits();
        rasr.set_bits(RASR_SIZE, STACK_SIZE.trailing_zeros() - 1);
        rasr.set_bits(RASR_AP, AccessPermission::FullAccess as u32);

        MpuRegion { number: STACK_REGION, rbar, rasr }
    }

    /// The whole 4 GiB map: kernel read/write, user read-only.
    pub fn background() -> Self {
        // 4 GiB always satisfies the size and alignment checks.
        let mut rasr = RegionAttributes::ENABLE.bits();
        rasr.set_bits(RASR_SIZE, 31);
        rasr.set_bits(RASR_AP, AccessPermission::UserReadOnly as u32);
        let mut rbar = 0u32;
        rbar.set_bits(0..4, BACKGROUND_REGION as u32);
        rbar.set_bit(RBAR_VALID, true);
        MpuRegion { number: BACKGROUND_REGION, rbar, rasr }
    }

    /// Smallest aligned power-of-two region covering `[start, end)`.
    pub fn covering(number: u8, start: u32, end: u32) -> Result<Self, MemoryError> {
        let len = end.saturating_sub(start).max(32) as u64;
        let mut size = len.next_power_of_two();
        let mut base = start as u64 & !(size - 1);
        while base + size < end as u64 {
            size *= 2;
            base = start as u64 & !(size - 1);
        }
        MpuRegion::new(
            number,
            base as u32,
            size,
            AccessPermission::FullAccess,
            RegionAttributes::CACHEABLE | RegionAttributes::SHAREABLE | RegionAttributes::EXECUTE_NEVER,
        )
    }

    /// Writable region for the user data section described by `boot`. The
    /// rounding to a power of two must stay clear of every page that can
    /// become a process stack.
    pub fn user_data(boot: &BootInfo) -> Result<Self, MemoryError> {
        let region = MpuRegion::covering(DATA_REGION, boot.data_start, boot.data_end)?;
        let first_stack = SRAM_BASE + boot.kernel_pages * STACK_SIZE;
        let end = region.base() as u64 + region.size();
        if (region.base() as u64) < SRAM_END as u64 && end > first_stack as u64 {
            return Err(MemoryError::DataOverlapsStacks { end, first_stack });
        }
        Ok(region)
    }

    pub fn size(&self) -> u64 {
        1u64 << (self.rasr.get_bits(RASR_SIZE) + 1)
    }

    pub fn base(&self) -> u32 {
        self.rbar & !0x1F
    }

    #[cfg(target_arch = "arm")]
    pub fn apply(&self, mpu: &cortex_m::peripheral::mpu::RegisterBlock) {
        // RBAR carries VALID and the region number, so RNR is set implicitly.
        unsafe {
            mpu.rbar.write(self.rbar);
            mpu.rasr.write(self.rasr);
        }
    }
}

fn size_field(size: u64) -> Result<u32, MemoryError> {
    if size < 32 || !size.is_power_of_two() || size > 1 << 32 {
        return Err(MemoryError::BadRegionSize(size as u32));
    }
    Ok(size.trailing_zeros() - 1)
}

/// Turn the MPU on. The background region covers everything, so the default
/// privileged map is left disabled.
#[cfg(target_arch = "arm")]
pub fn enable(mpu: &cortex_m::peripheral::mpu::RegisterBlock, regions: &[MpuRegion]) {
    for region in regions {
        region.apply(mpu);
    }
    unsafe { mpu.ctrl.write(1) };
    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_page_region_encoding() {
        let page = PageIndex::new(5).unwrap();
        let region = MpuRegion::stack_page(page);
        assert_eq!(region.number, STACK_REGION);
        assert_eq!(region.base(), SRAM_BASE + 5 * STACK_SIZE);
        assert_eq!(region.rbar & 0x1F, 0x10 | STACK_REGION as u32);
        assert_eq!(region.size(), STACK_SIZE as u64);
        assert_eq!(region.rasr.get_bits(RASR_AP), AccessPermission::FullAccess as u32);
        assert!(RegionAttributes::from_bits_truncate(region.rasr).contains(
            RegionAttributes::ENABLE | RegionAttributes::EXECUTE_NEVER
        ));
    }

    #[test]
    fn stack_page_matches_generic_constructor() {
        let page = PageIndex::new(9).unwrap();
        let generic = MpuRegion::new(
            STACK_REGION,
            page.base(),
            STACK_SIZE as u64,
            AccessPermission::FullAccess,
            RegionAttributes::CACHEABLE | RegionAttributes::SHAREABLE | RegionAttributes::EXECUTE_NEVER,
        )
        .unwrap();
        assert_eq!(generic, MpuRegion::stack_page(page));
    }

    #[test]
    fn background_spans_everything() {
        let region = MpuRegion::background();
        assert_eq!(region.size(), 1 << 32);
        assert_eq!(region.base(), 0);
        assert_eq!(region.rasr.get_bits(RASR_AP), AccessPermission::UserReadOnly as u32);
    }

    #[test]
    fn rejects_bad_geometry() {
        let flags = RegionAttributes::empty();
        assert_eq!(
            MpuRegion::new(1, 0, 48, AccessPermission::FullAccess, flags),
            Err(MemoryError::BadRegionSize(48))
        );
        assert_eq!(
            MpuRegion::new(1, 0x100, 0x400, AccessPermission::FullAccess, flags),
            Err(MemoryError::BadRegionSize(0x400))
        );
        assert_eq!(
            MpuRegion::new(8, 0, 0x400, AccessPermission::FullAccess, flags),
            Err(MemoryError::BadRegionNumber(8))
        );
    }

    #[test]
    fn covering_region_contains_range() {
        let region = MpuRegion::covering(DATA_REGION, 0x2000_0130, 0x2000_0690).unwrap();
        let end = region.base() as u64 + region.size();
        assert!(region.base() <= 0x2000_0130);
        assert!(end >= 0x2000_0690);
        assert_eq!(region.base() as u64 % region.size(), 0);
    }

    fn boot(kernel_pages: u32, data_start: u32, data_end: u32) -> BootInfo {
        BootInfo { kernel_pages, init_entry: 0x1001, data_start, data_end }
    }

    #[test]
    fn user_data_rounded_into_stack_pages_is_rejected() {
        // 0x1100 bytes round up to 0x2000, covering pages 0-7.
        let err = MpuRegion::user_data(&boot(5, 0x2000_0000, 0x2000_1100)).unwrap_err();
        assert_eq!(
            err,
            MemoryError::DataOverlapsStacks { end: 0x2000_2000, first_stack: 0x2000_1400 }
        );
    }

    #[test]
    fn user_data_inside_kernel_pages_is_accepted() {
        let region = MpuRegion::user_data(&boot(8, 0x2000_0000, 0x2000_1100)).unwrap();
        assert_eq!(region.number, DATA_REGION);
        assert_eq!(region.base() as u64 + region.size(), 0x2000_2000);
        let first = PageIndex::new(8).unwrap();
        assert!(region.base() as u64 + region.size() <= first.base() as u64);
    }
}
