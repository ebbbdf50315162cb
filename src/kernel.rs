//! The kernel object: process table, scheduler cursor and board, driven by
//! one trap event at a time.

use core::fmt;

use crate::config::{BootInfo, KernelConfig, HALT_RECORD_ADDR, MAX_PROC};
use crate::hal::{DeviceError, Platform};
use crate::interrupts::{FaultReport, TrapEvent};
use crate::memory::mpu::MpuRegion;
use crate::memory::{self, MemoryError};
use crate::scheduler::context::{Context, SavedContext};
use crate::scheduler::{Pcb, Pid, ProcError, ProcessState, ProcessTable, RoundRobin};
use crate::syscalls::{Outcome, SUCCESS};

/// What the trap exit path does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Restore the process whose saved registers start at `sp`.
    Resume { pid: Pid, sp: u32 },
    /// Nothing is runnable.
    Idle,
    /// The kernel cannot continue.
    Halt(KernelFault),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelFault {
    /// A fault raised by privileged code.
    Privileged(FaultReport),
    /// A fault with no process to blame.
    Unattributed(FaultReport),
    /// `svc` executed while no process was current.
    StraySyscall(u32),
    /// A runnable slot with no saved registers.
    NoContext(usize),
    Corrupt(ProcError),
}

impl fmt::Display for KernelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelFault::Privileged(report) => write!(f, "{} in privileged code", report),
            KernelFault::Unattributed(report) => write!(f, "{} with no current process", report),
            KernelFault::StraySyscall(number) => {
                write!(f, "syscall {} with no current process", number)
            }
            KernelFault::NoContext(slot) => write!(f, "slot {} has no saved context", slot),
            KernelFault::Corrupt(err) => write!(f, "process table corrupt: {}", err),
        }
    }
}

const HALT_MAGIC: u32 = 0x454D_4254;
const HALT_RECORD_WORDS: usize = 4;

/// A kernel halt as kept in flash across a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaltRecord {
    pub reason: u32,
    /// Fault status bits, syscall number, slot or pid depending on `reason`.
    pub detail: u32,
    /// Process current at the halt, 0 if none.
    pub pid: u32,
}

impl HaltRecord {
    pub fn new(fault: &KernelFault, current: Option<Pid>) -> Self {
        let (reason, detail) = match fault {
            KernelFault::Privileged(report) => (1, report.status.bits()),
            KernelFault::Unattributed(report) => (2, report.status.bits()),
            KernelFault::StraySyscall(number) => (3, *number),
            KernelFault::NoContext(slot) => (4, *slot as u32),
            KernelFault::Corrupt(ProcError::NotFound(pid))
            | KernelFault::Corrupt(ProcError::InvalidState { pid, .. }) => (5, pid.as_u32()),
            KernelFault::Corrupt(_) => (5, 0),
        };
        HaltRecord {
            reason,
            detail,
            pid: current.map_or(0, Pid::as_u32),
        }
    }

    fn to_bytes(self) -> [u8; HALT_RECORD_WORDS * 4] {
        let mut bytes = [0; HALT_RECORD_WORDS * 4];
        let words = [HALT_MAGIC, self.reason, self.detail, self.pid];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

impl fmt::Display for HaltRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.reason {
            1 => "fault in privileged code",
            2 => "fault with no current process",
            3 => "stray syscall",
            4 => "missing saved context",
            5 => "corrupt process table",
            _ => "unknown reason",
        };
        write!(f, "{} ({:#010x}), PID {} current", reason, self.detail, self.pid)
    }
}

pub struct Kernel<P: Platform, const N: usize = MAX_PROC> {
    pub(crate) table: ProcessTable<N>,
    pub(crate) scheduler: RoundRobin,
    pub(crate) platform: P,
    pub(crate) config: KernelConfig,
    /// The first process spawned. Orphans are handed to it.
    pub(crate) root: Option<Pid>,
}

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// `N` may not exceed `MAX_PROC`, or the highest pid would collide with
    /// `NULLPID`.
    pub fn new(platform: P, config: KernelConfig, boot: &BootInfo) -> Result<Self, MemoryError> {
        const { assert!(N > 0 && N <= MAX_PROC, "process table capacity out of range") };

        let pages = memory::init(boot)?;
        if config.memory_protection {
            MpuRegion::user_data(boot)?;
        }
        Ok(Kernel {
            table: ProcessTable::new(pages),
            scheduler: RoundRobin::new(N),
            platform,
            config,
            root: None,
        })
    }

    /// Create a process that starts at `entry` the first time it is
    /// scheduled. The first process spawned becomes the root.
    pub fn spawn(&mut self, name: &str, entry: u32) -> Result<Pid, ProcError> {
        let pcb = self.table.reserve(name)?;
        let pid = pcb.pid.ok_or(ProcError::TableFull)?;
        pcb.parent = self.root;
        self.table.prepare(pid, entry)?;

        match self.root {
            Some(root) => self.table.by_pid_mut(root)?.num_children += 1,
            None => self.root = Some(pid),
        }
        crate::log_info!("Spawned process '{}' with PID {}.", name, pid);
        Ok(pid)
    }

    /// Pick the first process. Called once at boot, after which the kernel
    /// is only entered through [`handle`](Self::handle).
    pub fn start(&mut self) -> Dispatch {
        self.schedule()
    }

    /// Single kernel entry. `sp` is the trapping process's stack pointer
    /// after the trap entry pushed r4-r11. For faults nothing was pushed and
    /// `sp` only marks where r4-r11 would sit.
    pub fn handle(&mut self, event: TrapEvent, sp: u32) -> Dispatch {
        if let TrapEvent::Fault(report) = event {
            if report.privileged {
                return Dispatch::Halt(KernelFault::Privileged(report));
            }
        }

        let Some(pid) = self.table.current_pid() else {
            return match event {
                TrapEvent::Tick => self.schedule(),
                TrapEvent::Syscall { number, .. } => Dispatch::Halt(KernelFault::StraySyscall(number)),
                TrapEvent::Fault(report) => Dispatch::Halt(KernelFault::Unattributed(report)),
            };
        };
        match self.table.by_pid_mut(pid) {
            Ok(pcb) => pcb.context = Context::Saved(SavedContext::capture(sp)),
            Err(err) => return Dispatch::Halt(KernelFault::Corrupt(err)),
        }

        match event {
            TrapEvent::Tick => {
                self.preempt(pid);
                self.schedule()
            }
            TrapEvent::Syscall { number, args } => match self.syscall(pid, number, args) {
                Outcome::Return(value) => self.resume(pid, value),
                Outcome::Yield => {
                    SavedContext::capture(sp).set_return(&mut self.platform, SUCCESS);
                    self.preempt(pid);
                    self.schedule()
                }
                Outcome::Block | Outcome::Exited => self.schedule(),
            },
            TrapEvent::Fault(report) => self.fault(pid, report, sp),
        }
    }

    /// `RUNNING -> RUNNABLE`.
    fn preempt(&mut self, pid: Pid) {
        if let Ok(pcb) = self.table.by_pid_mut(pid) {
            if pcb.state == ProcessState::Running {
                pcb.state = ProcessState::Runnable;
            }
        }
    }

    /// Hand `value` back to the caller in r0 and return to it straight away.
    fn resume(&mut self, pid: Pid, value: u32) -> Dispatch {
        let pcb = match self.table.by_pid_mut(pid) {
            Ok(pcb) => pcb,
            Err(err) => return Dispatch::Halt(KernelFault::Corrupt(err)),
        };
        let Context::Saved(saved) = pcb.context else {
            return Dispatch::Halt(KernelFault::NoContext(pid.slot()));
        };
        pcb.context = Context::Live;
        saved.set_return(&mut self.platform, value);
        Dispatch::Resume { pid, sp: saved.sp() }
    }

    /// Release `pid`'s slot and stack page. Surviving children move to the
    /// root process; the exiting process's parent loses one child.
    pub(crate) fn terminate(&mut self, pid: Pid, code: u32) -> Result<(), ProcError> {
        let pcb = self.table.by_pid(pid)?;
        let parent = pcb.parent();
        let children = pcb.num_children();
        crate::log_info!("Process {} ({}) exited with code {}.", pid, pcb.name(), code);

        if self.root == Some(pid) {
            self.root = None;
        }
        if children != 0 {
            crate::log_warn!("Process {} exited with {} children.", pid, children);
            self.reparent_children(pid);
        }
        if let Some(parent) = parent {
            if let Ok(parent) = self.table.by_pid_mut(parent) {
                parent.num_children = parent.num_children.saturating_sub(1);
            }
        }

        self.table.retire(pid)?;
        if self.table.current_pid() == Some(pid) {
            self.table.set_current(None);
        }
        Ok(())
    }

    fn reparent_children(&mut self, pid: Pid) {
        let adopter = self.root.filter(|&root| root != pid);
        let mut adopted = 0;
        for slot in 0..N {
            let pcb = self.table.slot_mut(slot);
            if !pcb.is_unused() && pcb.parent == Some(pid) {
                pcb.parent = adopter;
                adopted += 1;
            }
        }
        let Some(root) = adopter else {
            crate::log_warn!("{} orphans left without a parent.", adopted);
            return;
        };
        if let Ok(pcb) = self.table.by_pid_mut(root) {
            pcb.num_children += adopted;
            crate::log_warn!("{} orphans reparented to PID {}.", adopted, root);
        }
    }

    pub fn table(&self) -> &ProcessTable<N> {
        &self.table
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn root(&self) -> Option<Pid> {
        self.root
    }

    /// Live processes, in slot order.
    pub fn processes(&self) -> impl Iterator<Item = &Pcb> {
        self.table.iter()
    }

    /// Keep `fault` in flash so the next boot can report it.
    pub fn record_halt(&mut self, fault: &KernelFault) -> Result<(), DeviceError> {
        let record = HaltRecord::new(fault, self.table.current_pid());
        self.platform.persist_write(&record.to_bytes(), HALT_RECORD_ADDR)
    }

    /// The halt recorded by an earlier boot, if any.
    pub fn previous_halt(&self) -> Option<HaltRecord> {
        let word = |i: u32| self.platform.read_word(HALT_RECORD_ADDR + i * 4);
        (word(0) == HALT_MAGIC).then(|| HaltRecord {
            reason: word(1),
            detail: word(2),
            pid: word(3),
        })
    }

    pub fn clear_halt_record(&mut self) -> Result<(), DeviceError> {
        self.platform
            .persist_write(&[0xFF; HALT_RECORD_WORDS * 4], HALT_RECORD_ADDR)
    }

    /// Print the process table to the console.
    pub fn dump(&self) {
        crate::println!("PID  STATE     PARENT CHILDREN NAME");
        for pcb in self.processes() {
            crate::println!(
                "{:<4} {:<9} {:<6} {:<8} {}",
                pcb.pid().map_or(0, Pid::as_u32),
                pcb.state(),
                pcb.parent().map_or(0, Pid::as_u32),
                pcb.num_children(),
                pcb.name()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halt_record_layout() {
        let pid = Pid::from_slot(2);
        let record = HaltRecord::new(&KernelFault::StraySyscall(7), Some(pid));
        assert_eq!(record, HaltRecord { reason: 3, detail: 7, pid: 3 });

        let bytes = record.to_bytes();
        assert_eq!(bytes[..4], HALT_MAGIC.to_le_bytes());
        assert_eq!(bytes[4..8], 3u32.to_le_bytes());
        assert_eq!(bytes[12..], 3u32.to_le_bytes());
    }

    #[test]
    fn corrupt_table_records_the_pid_involved() {
        let pid = Pid::from_slot(5);
        let record = HaltRecord::new(&KernelFault::Corrupt(ProcError::NotFound(pid)), None);
        assert_eq!((record.reason, record.detail, record.pid), (5, 6, 0));
        let record = HaltRecord::new(&KernelFault::Corrupt(ProcError::TableFull), None);
        assert_eq!(record.detail, 0);
        assert_eq!(record.to_string(), "corrupt process table (0x00000000), PID 0 current");
    }
}
