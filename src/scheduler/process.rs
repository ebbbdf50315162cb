use core::fmt;
use heapless::String;

use super::context::Context;
use crate::config::{MAX_PROC, NAME_LEN};
use crate::memory::PageIndex;

/// Process identifier.
///
/// A pid is the table slot plus one. Slot lookups are O(1) and pid 0 stays
/// free to act as the `fork` failure sentinel. The same pid comes back when a
/// slot is reused, so a pid held across an exit must be re-checked with
/// `ProcessTable::by_pid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Pid(u8);

impl Pid {
    pub fn from_slot(slot: usize) -> Self {
        debug_assert!(slot < MAX_PROC);
        Pid(slot as u8 + 1)
    }

    /// Decode a pid coming from user space. Zero and anything past the
    /// table are rejected.
    pub fn from_raw(raw: u32) -> Option<Self> {
        (1..=MAX_PROC as u32).contains(&raw).then(|| Pid(raw as u8))
    }

    pub fn slot(self) -> usize {
        self.0 as usize - 1
    }

    pub fn as_u32(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Unused,
    /// Slot and stack page taken, context not built yet.
    Reserved,
    /// Initial frame being written.
    Embryo,
    Runnable,
    Running,
    /// Blocked until `wait_target` exits.
    Waiting,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Unused => "unused",
            ProcessState::Reserved => "reserved",
            ProcessState::Embryo => "embryo",
            ProcessState::Runnable => "runnable",
            ProcessState::Running => "running",
            ProcessState::Waiting => "waiting",
        };
        f.pad(name)
    }
}

/// The process a waiter is blocked on. The generation pins the identity so
/// that a recycled slot with the same pid does not keep the waiter blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTarget {
    pub pid: Pid,
    pub generation: u32,
}

pub type ProcessName = String<NAME_LEN>;

/// Process control block.
pub struct Pcb {
    pub(crate) pid: Option<Pid>,
    pub(crate) state: ProcessState,
    pub(crate) context: Context,
    pub(crate) page: Option<PageIndex>,
    pub(crate) parent: Option<Pid>,
    pub(crate) num_children: u32,
    pub(crate) wait_target: Option<WaitTarget>,
    pub(crate) name: ProcessName,
    /// Bumped every time the slot is reserved.
    pub(crate) generation: u32,
}

impl Pcb {
    pub const fn empty() -> Self {
        Pcb {
            pid: None,
            state: ProcessState::Unused,
            context: Context::Empty,
            page: None,
            parent: None,
            num_children: 0,
            wait_target: None,
            name: String::new(),
            generation: 0,
        }
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn page(&self) -> Option<PageIndex> {
        self.page
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn num_children(&self) -> u32 {
        self.num_children
    }

    pub fn wait_target(&self) -> Option<WaitTarget> {
        self.wait_target
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn is_unused(&self) -> bool {
        self.state == ProcessState::Unused
    }

    /// Copy as much of `name` as fits, never splitting a character.
    pub(crate) fn set_name(&mut self, name: &str) {
        self.name.clear();
        for c in name.chars() {
            if self.name.push(c).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_slot_mapping() {
        let pid = Pid::from_slot(0);
        assert_eq!(pid.as_u32(), 1);
        assert_eq!(pid.slot(), 0);
        assert_eq!(Pid::from_raw(MAX_PROC as u32), Some(Pid::from_slot(MAX_PROC - 1)));
    }

    #[test]
    fn raw_pid_bounds() {
        assert_eq!(Pid::from_raw(0), None);
        assert_eq!(Pid::from_raw(crate::config::NULLPID), None);
        assert_eq!(Pid::from_raw(u32::MAX), None);
    }

    #[test]
    fn names_are_truncated() {
        let mut pcb = Pcb::empty();
        pcb.set_name("a-process-name-longer-than-sixteen");
        assert_eq!(pcb.name(), "a-process-name-l");
        pcb.set_name("init");
        assert_eq!(pcb.name(), "init");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut pcb = Pcb::empty();
        pcb.set_name("ééééééééé");
        assert_eq!(pcb.name(), "éééééééé");
    }
}
