//! Flash controller: erase-and-rewrite of whole 1 KiB blocks.

use bit_field::BitField;

use super::{poll_until, reg};
use crate::config::FLASH_BLOCK_SIZE;
use crate::hal::DeviceError;
use crate::memory;

const FLASH_CTRL_BASE: u32 = 0x400F_D000;
const FMA: u32 = FLASH_CTRL_BASE + 0x000;
const FMD: u32 = FLASH_CTRL_BASE + 0x004;
const FMC: u32 = FLASH_CTRL_BASE + 0x008;
const FCRIS: u32 = FLASH_CTRL_BASE + 0x00C;
const FCMISC: u32 = FLASH_CTRL_BASE + 0x014;

const FMC_WRKEY: u32 = 0xA442_0000;
const FMC_WRITE: usize = 0;
const FMC_ERASE: usize = 1;
const FCRIS_ARIS: usize = 0;

const BLOCK_WORDS: usize = (FLASH_BLOCK_SIZE / 4) as usize;
const POLL_LIMIT: u32 = 1_000_000;

/// Program `src` at `address`. Every block the range touches is read,
/// patched, erased and written back, so bytes around the range survive.
pub fn write(src: &[u8], address: u32) -> Result<(), DeviceError> {
    if src.is_empty() || !memory::in_flash(address, src.len() as u32) {
        return Err(DeviceError::InvalidArgument);
    }

    let end = address + src.len() as u32;
    let mut block = address & !(FLASH_BLOCK_SIZE - 1);
    while block < end {
        let mut words = [0u32; BLOCK_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = unsafe { core::ptr::read_volatile((block + i as u32 * 4) as *const u32) };
        }

        let bytes = unsafe {
            core::slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, FLASH_BLOCK_SIZE as usize)
        };
        let from = address.max(block);
        let to = end.min(block + FLASH_BLOCK_SIZE);
        let src_range = (from - address) as usize..(to - address) as usize;
        let dst_range = (from - block) as usize..(to - block) as usize;
        bytes[dst_range].copy_from_slice(&src[src_range]);

        erase_block(block)?;
        for (i, word) in words.iter().enumerate() {
            program_word(block + i as u32 * 4, *word)?;
        }
        block += FLASH_BLOCK_SIZE;
    }
    Ok(())
}

fn erase_block(address: u32) -> Result<(), DeviceError> {
    unsafe { reg(FMA).write(address) };
    start_and_wait(FMC_ERASE)
}

fn program_word(address: u32, value: u32) -> Result<(), DeviceError> {
    unsafe {
        reg(FMA).write(address);
        reg(FMD).write(value);
    }
    start_and_wait(FMC_WRITE)
}

fn start_and_wait(command: usize) -> Result<(), DeviceError> {
    let fmc = unsafe { reg(FMC) };
    fmc.write(FMC_WRKEY | 1 << command);
    if !poll_until(POLL_LIMIT, || !fmc.read().get_bit(command)) {
        return Err(DeviceError::Timeout);
    }

    // Access violations (e.g. a protected block) are only visible here.
    let status = unsafe { reg(FCRIS).read() };
    unsafe { reg(FCMISC).write(status) };
    if status.get_bit(FCRIS_ARIS) {
        return Err(DeviceError::Flash);
    }
    Ok(())
}
