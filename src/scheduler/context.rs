//! Saved register state of a process that is not running.
//!
//! A suspended process's registers live on its own stack. Reading upward from
//! the saved stack pointer:
//!
//! ```text
//! sp + 0x00  r4 r5 r6 r7 r8 r9 r10 r11      pushed by the trap entry
//! sp + 0x20  r0 r1 r2 r3 r12 lr pc xpsr    pushed by the hardware
//! sp + 0x40  caller's stack
//! ```
//!
//! A process that has never run has no such frame yet. It carries a
//! [`ColdStart`] until the scheduler first picks it, which is when the frame
//! is fabricated and a [`SavedContext`] exists for the first time.

use crate::hal::StackMemory;

pub const SOFTWARE_FRAME_BYTES: u32 = 8 * 4;
pub const HARDWARE_FRAME_BYTES: u32 = 8 * 4;
pub const SWITCH_FRAME_BYTES: u32 = SOFTWARE_FRAME_BYTES + HARDWARE_FRAME_BYTES;

/// xPSR with only the Thumb bit set.
pub const XPSR_THUMB: u32 = 1 << 24;

/// Registers stacked by the CPU on exception entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// Word offsets from the saved stack pointer.
pub mod slot {
    pub const R7: u32 = 3;
    pub const R0: u32 = 8;
    pub const LR: u32 = 13;
    pub const PC: u32 = 14;
    pub const XPSR: u32 = 15;
}

/// Where a process's registers are right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// Unused slot, or a process that just exited.
    Empty,
    /// Reserved but never run.
    Cold(ColdStart),
    /// Suspended by a trap; registers are on its stack.
    Saved(SavedContext),
    /// Running; the true state is in the CPU.
    Live,
}

/// Everything needed to fabricate the first frame of a new process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColdStart {
    entry: u32,
}

impl ColdStart {
    pub fn new(entry: u32) -> Self {
        ColdStart { entry }
    }

    pub fn entry(&self) -> u32 {
        self.entry
    }

    /// Write a frame below `stack_top` that the trap exit path can pop as if
    /// the process had been suspended right before its first instruction.
    /// Returning from the entry point lands in `exit_trampoline`.
    pub fn build<M: StackMemory>(self, stack_top: u32, mem: &mut M, exit_trampoline: u32) -> SavedContext {
        let sp = stack_top - SWITCH_FRAME_BYTES;
        for word in 0..slot::R0 {
            mem.write_word(sp + word * 4, 0);
        }
        let frame = ExceptionFrame {
            lr: exit_trampoline | 1,
            // The hardware frame holds the pc without the Thumb bit.
            pc: self.entry & !1,
            xpsr: XPSR_THUMB,
            ..ExceptionFrame::default()
        };
        write_frame(mem, sp + SOFTWARE_FRAME_BYTES, &frame);
        SavedContext { sp }
    }
}

/// Stack pointer captured at the last suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedContext {
    sp: u32,
}

impl SavedContext {
    pub fn capture(sp: u32) -> Self {
        SavedContext { sp }
    }

    pub fn sp(&self) -> u32 {
        self.sp
    }

    pub fn word_address(&self, word: u32) -> u32 {
        self.sp + word * 4
    }

    pub fn read_frame<M: StackMemory>(&self, mem: &M) -> ExceptionFrame {
        let base = self.sp + SOFTWARE_FRAME_BYTES;
        let word = |i: u32| mem.read_word(base + i * 4);
        ExceptionFrame {
            r0: word(0),
            r1: word(1),
            r2: word(2),
            r3: word(3),
            r12: word(4),
            lr: word(5),
            pc: word(6),
            xpsr: word(7),
        }
    }

    /// Value the process sees in r0 when it resumes.
    pub fn set_return<M: StackMemory>(&self, mem: &mut M, value: u32) {
        mem.write_word(self.word_address(slot::R0), value);
    }
}

fn write_frame<M: StackMemory>(mem: &mut M, addr: u32, frame: &ExceptionFrame) {
    let words = [
        frame.r0, frame.r1, frame.r2, frame.r3, frame.r12, frame.lr, frame.pc, frame.xpsr,
    ];
    for (i, word) in words.iter().enumerate() {
        mem.write_word(addr + i as u32 * 4, *word);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ram {
        base: u32,
        words: [u32; 64],
    }

    impl StackMemory for Ram {
        fn read_word(&self, addr: u32) -> u32 {
            self.words[((addr - self.base) / 4) as usize]
        }
        fn write_word(&mut self, addr: u32, value: u32) {
            self.words[((addr - self.base) / 4) as usize] = value;
        }
        fn read_bytes(&self, _addr: u32, _buf: &mut [u8]) {}
        fn write_bytes(&mut self, _addr: u32, _bytes: &[u8]) {}
        fn copy_bytes(&mut self, _dst: u32, _src: u32, _len: u32) {}
    }

    #[test]
    fn cold_start_frame_layout() {
        let mut ram = Ram { base: 0x2000_0000, words: [0xAAAA_AAAA; 64] };
        let top = 0x2000_0100;
        let saved = ColdStart::new(0x0000_0801).build(top, &mut ram, 0x0000_0400);

        assert_eq!(saved.sp(), top - SWITCH_FRAME_BYTES);
        let frame = saved.read_frame(&ram);
        assert_eq!(frame.pc, 0x0000_0800);
        assert_eq!(frame.lr, 0x0000_0401);
        assert_eq!(frame.xpsr, XPSR_THUMB);
        assert_eq!(frame.r0, 0);
        assert_eq!(ram.read_word(saved.word_address(slot::R7)), 0);
    }

    #[test]
    fn return_value_lands_in_r0() {
        let mut ram = Ram { base: 0x2000_0000, words: [0; 64] };
        let saved = SavedContext::capture(0x2000_0040);
        saved.set_return(&mut ram, 7);
        assert_eq!(saved.read_frame(&ram).r0, 7);
    }
}
