//! The process table and the lifecycle operations that keep a slot's state
//! and its stack page in step.

use core::fmt;

use super::context::{ColdStart, Context, SavedContext};
use super::process::{Pcb, Pid, ProcessState};
use crate::hal::StackMemory;
use crate::memory::{MemoryError, StackPages};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
    /// No unused slot.
    TableFull,
    /// A slot was free but no stack page was.
    OutOfPages,
    NotFound(Pid),
    /// The slot is not in the state the operation needs.
    InvalidState { pid: Pid, state: ProcessState },
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcError::TableFull => write!(f, "process table is full"),
            ProcError::OutOfPages => write!(f, "no free stack page"),
            ProcError::NotFound(pid) => write!(f, "no process with pid {}", pid),
            ProcError::InvalidState { pid, state } => {
                write!(f, "process {} is {}", pid, state)
            }
        }
    }
}

impl From<MemoryError> for ProcError {
    fn from(_: MemoryError) -> Self {
        ProcError::OutOfPages
    }
}

/// Fixed arena of PCBs. The slot index is the identity of a process.
pub struct ProcessTable<const N: usize> {
    procs: [Pcb; N],
    pages: StackPages,
    current: Option<Pid>,
}

impl<const N: usize> ProcessTable<N> {
    pub fn new(pages: StackPages) -> Self {
        ProcessTable {
            procs: [const { Pcb::empty() }; N],
            pages,
            current: None,
        }
    }

    /// Claim the first unused slot together with a stack page. On page
    /// exhaustion the slot is left untouched.
    pub fn reserve(&mut self, name: &str) -> Result<&mut Pcb, ProcError> {
        let slot = self
            .procs
            .iter()
            .position(Pcb::is_unused)
            .ok_or(ProcError::TableFull)?;
        let page = self.pages.allocate()?;

        let pcb = &mut self.procs[slot];
        pcb.pid = Some(Pid::from_slot(slot));
        pcb.state = ProcessState::Reserved;
        pcb.context = Context::Empty;
        pcb.page = Some(page);
        pcb.parent = None;
        pcb.num_children = 0;
        pcb.wait_target = None;
        pcb.generation = pcb.generation.wrapping_add(1);
        pcb.set_name(name);
        Ok(pcb)
    }

    /// Record where a reserved process starts. Its frame is only built when
    /// the scheduler first picks it.
    pub fn prepare(&mut self, pid: Pid, entry: u32) -> Result<(), ProcError> {
        let pcb = self.expect_state(pid, ProcessState::Reserved)?;
        pcb.context = Context::Cold(ColdStart::new(entry));
        Ok(())
    }

    /// `RESERVED -> EMBRYO -> RUNNABLE`: fabricate the first frame at the top
    /// of the process's page.
    pub fn materialize<M: StackMemory>(
        &mut self,
        pid: Pid,
        mem: &mut M,
        exit_trampoline: u32,
    ) -> Result<(), ProcError> {
        let pcb = self.expect_state(pid, ProcessState::Reserved)?;
        let (Context::Cold(cold), Some(page)) = (pcb.context, pcb.page) else {
            return Err(ProcError::InvalidState { pid, state: pcb.state });
        };
        pcb.state = ProcessState::Embryo;
        pcb.context = Context::Saved(cold.build(page.top(), mem, exit_trampoline));
        pcb.state = ProcessState::Runnable;
        Ok(())
    }

    /// `RESERVED -> RUNNABLE` for a process whose frame was copied rather
    /// than fabricated.
    pub fn adopt(&mut self, pid: Pid, context: SavedContext) -> Result<(), ProcError> {
        let pcb = self.expect_state(pid, ProcessState::Reserved)?;
        pcb.context = Context::Saved(context);
        pcb.state = ProcessState::Runnable;
        Ok(())
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.current
    }

    pub fn current(&self) -> Option<&Pcb> {
        self.current.and_then(|pid| self.by_pid(pid).ok())
    }

    pub(crate) fn set_current(&mut self, pid: Option<Pid>) {
        self.current = pid;
    }

    /// Look up a live process. A pid whose slot has been released is not
    /// found even though the slot itself still exists.
    pub fn by_pid(&self, pid: Pid) -> Result<&Pcb, ProcError> {
        self.procs
            .get(pid.slot())
            .filter(|pcb| !pcb.is_unused() && pcb.pid == Some(pid))
            .ok_or(ProcError::NotFound(pid))
    }

    pub(crate) fn by_pid_mut(&mut self, pid: Pid) -> Result<&mut Pcb, ProcError> {
        self.procs
            .get_mut(pid.slot())
            .filter(|pcb| !pcb.is_unused() && pcb.pid == Some(pid))
            .ok_or(ProcError::NotFound(pid))
    }

    /// Decode a raw pid against this table's capacity.
    pub fn pid_in_range(&self, raw: u32) -> Option<Pid> {
        Pid::from_raw(raw).filter(|pid| pid.slot() < N)
    }

    pub fn slot(&self, index: usize) -> &Pcb {
        &self.procs[index]
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Pcb {
        &mut self.procs[index]
    }

    /// `* -> UNUSED`: release the stack page and forget the identity.
    /// Parent and child bookkeeping is the caller's job.
    pub fn retire(&mut self, pid: Pid) -> Result<(), ProcError> {
        let pcb = self.by_pid_mut(pid)?;
        let page = pcb.page.take();
        pcb.pid = None;
        pcb.state = ProcessState::Unused;
        pcb.context = Context::Empty;
        pcb.parent = None;
        pcb.num_children = 0;
        pcb.wait_target = None;
        pcb.name.clear();
        if let Some(page) = page {
            self.pages.free(page);
        }
        Ok(())
    }

    pub fn pages(&self) -> &StackPages {
        &self.pages
    }

    /// Live processes in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.procs.iter().filter(|pcb| !pcb.is_unused())
    }

    pub fn live_count(&self) -> usize {
        self.iter().count()
    }

    pub fn capacity(&self) -> usize {
        N
    }

    fn expect_state(&mut self, pid: Pid, state: ProcessState) -> Result<&mut Pcb, ProcError> {
        let pcb = self.by_pid_mut(pid)?;
        if pcb.state != state {
            return Err(ProcError::InvalidState { pid, state: pcb.state });
        }
        Ok(pcb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SRAM_PAGES, STACK_SIZE};
    use crate::scheduler::context::SWITCH_FRAME_BYTES;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Ram(HashMap<u32, u32>);

    impl StackMemory for Ram {
        fn read_word(&self, addr: u32) -> u32 {
            self.0.get(&addr).copied().unwrap_or(0)
        }
        fn write_word(&mut self, addr: u32, value: u32) {
            self.0.insert(addr, value);
        }
        fn read_bytes(&self, _addr: u32, _buf: &mut [u8]) {}
        fn write_bytes(&mut self, _addr: u32, _bytes: &[u8]) {}
        fn copy_bytes(&mut self, _dst: u32, _src: u32, _len: u32) {}
    }

    fn table<const N: usize>(kernel_pages: usize) -> ProcessTable<N> {
        ProcessTable::new(StackPages::new(kernel_pages).unwrap())
    }

    #[test]
    fn fifth_reserve_on_four_slots_fails() {
        let mut table = table::<4>(2);
        for _ in 0..4 {
            table.reserve("p").unwrap();
        }
        assert_eq!(table.reserve("p").err(), Some(ProcError::TableFull));
        assert_eq!(table.pages().allocated_count(), 4);
    }

    #[test]
    fn released_slot_and_page_are_reused() {
        let mut table = table::<4>(2);
        let pids: Vec<Pid> = (0..4).map(|_| table.reserve("p").unwrap().pid().unwrap()).collect();
        let freed_page = table.by_pid(pids[1]).unwrap().page().unwrap();

        table.retire(pids[1]).unwrap();
        let pcb = table.reserve("again").unwrap();
        assert_eq!(pcb.pid(), Some(pids[1]));
        assert_eq!(pcb.page(), Some(freed_page));
    }

    #[test]
    fn page_exhaustion_leaves_slot_unused() {
        let mut table = table::<4>(SRAM_PAGES - 1);
        table.reserve("only").unwrap();
        assert_eq!(table.reserve("none").err(), Some(ProcError::OutOfPages));
        assert!(table.slot(1).is_unused());
        assert_eq!(table.live_count(), 1);
    }

    #[test]
    fn retired_pid_is_not_found() {
        let mut table = table::<4>(2);
        let pid = table.reserve("gone").unwrap().pid().unwrap();
        table.retire(pid).unwrap();
        assert_eq!(table.by_pid(pid).err(), Some(ProcError::NotFound(pid)));
        assert_eq!(table.retire(pid), Err(ProcError::NotFound(pid)));
        assert_eq!(table.pages().allocated_count(), 0);
    }

    #[test]
    fn generation_changes_on_reuse() {
        let mut table = table::<2>(2);
        let first = table.reserve("a").unwrap().generation();
        let pid = table.slot(0).pid().unwrap();
        table.retire(pid).unwrap();
        let second = table.reserve("b").unwrap().generation();
        assert_ne!(first, second);
    }

    #[test]
    fn materialize_builds_frame_at_page_top() {
        let mut table = table::<2>(2);
        let mut ram = Ram::default();
        let pid = table.reserve("init").unwrap().pid().unwrap();
        table.prepare(pid, 0x801).unwrap();
        table.materialize(pid, &mut ram, 0x401).unwrap();

        let pcb = table.by_pid(pid).unwrap();
        assert_eq!(pcb.state(), ProcessState::Runnable);
        let Context::Saved(saved) = pcb.context() else { panic!("no saved context") };
        let top = pcb.page().unwrap().top();
        assert_eq!(saved.sp(), top - SWITCH_FRAME_BYTES);
        assert!(saved.sp() > top - STACK_SIZE);
        assert_eq!(saved.read_frame(&ram).pc, 0x800);
    }

    #[test]
    fn materialize_requires_reserved_cold_process() {
        let mut table = table::<2>(2);
        let mut ram = Ram::default();
        let pid = table.reserve("init").unwrap().pid().unwrap();
        assert!(matches!(
            table.materialize(pid, &mut ram, 0),
            Err(ProcError::InvalidState { .. })
        ));
        table.prepare(pid, 0x801).unwrap();
        table.materialize(pid, &mut ram, 0).unwrap();
        assert!(matches!(
            table.materialize(pid, &mut ram, 0),
            Err(ProcError::InvalidState { state: ProcessState::Runnable, .. })
        ));
    }

    #[test]
    fn pid_range_follows_capacity() {
        let table = table::<4>(2);
        assert!(table.pid_in_range(4).is_some());
        assert!(table.pid_in_range(5).is_none());
        assert!(table.pid_in_range(0).is_none());
    }
}
