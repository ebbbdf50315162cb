//! Turning hardware faults into process lifecycle actions.

use bitflags::bitflags;
use core::fmt;

use super::FaultReport;
use crate::config::{EXIT_FAILURE, STACK_SIZE};
use crate::hal::Platform;
use crate::kernel::{Dispatch, Kernel, KernelFault};
use crate::memory::PageIndex;
use crate::scheduler::context::{
    SavedContext, HARDWARE_FRAME_BYTES, SOFTWARE_FRAME_BYTES, SWITCH_FRAME_BYTES,
};
use crate::scheduler::Pid;

bitflags! {
    /// Configurable Fault Status Register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultStatus: u32 {
        // MemManage
        const IACCVIOL = 1 << 0;
        const DACCVIOL = 1 << 1;
        const MUNSTKERR = 1 << 3;
        const MSTKERR = 1 << 4;
        const MLSPERR = 1 << 5;
        const MMARVALID = 1 << 7;
        // BusFault
        const IBUSERR = 1 << 8;
        const PRECISERR = 1 << 9;
        const IMPRECISERR = 1 << 10;
        const UNSTKERR = 1 << 11;
        const STKERR = 1 << 12;
        const LSPERR = 1 << 13;
        const BFARVALID = 1 << 15;
        // UsageFault
        const UNDEFINSTR = 1 << 16;
        const INVSTATE = 1 << 17;
        const INVPC = 1 << 18;
        const NOCP = 1 << 19;
        const UNALIGNED = 1 << 24;
        const DIVBYZERO = 1 << 25;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    StackOverflow,
    Segmentation,
    DivideByZero,
    IllegalInstruction,
    Unaligned,
    BusError,
    Unknown,
}

impl fmt::Display for FaultClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultClass::StackOverflow => "stack overflow",
            FaultClass::Segmentation => "segmentation fault",
            FaultClass::DivideByZero => "division by zero",
            FaultClass::IllegalInstruction => "illegal instruction",
            FaultClass::Unaligned => "unaligned access",
            FaultClass::BusError => "bus error",
            FaultClass::Unknown => "unknown fault",
        };
        f.write_str(name)
    }
}

/// Decide what a fault means for the process owning `page`, whose stack
/// pointer was `sp` when it trapped.
///
/// Running off the bottom of the page shows up either as a stacking error
/// (the exception frame itself did not fit) or as an access just below the
/// page while the stack pointer is near its bottom. Usage faults name the
/// offending instruction exactly and are trusted over the stack pointer.
pub fn classify(report: &FaultReport, page: Option<PageIndex>, sp: u32) -> FaultClass {
    let status = report.status;
    if status.intersects(FaultStatus::MSTKERR | FaultStatus::STKERR) {
        return FaultClass::StackOverflow;
    }
    if status.contains(FaultStatus::DIVBYZERO) {
        return FaultClass::DivideByZero;
    }
    if status.intersects(
        FaultStatus::UNDEFINSTR | FaultStatus::INVSTATE | FaultStatus::INVPC | FaultStatus::NOCP,
    ) {
        return FaultClass::IllegalInstruction;
    }
    if status.contains(FaultStatus::UNALIGNED) {
        return FaultClass::Unaligned;
    }

    if let Some(page) = page {
        let guard = page.base().saturating_sub(STACK_SIZE)..page.base();
        let below_page = report.address.is_some_and(|addr| guard.contains(&addr));
        if below_page || sp < page.base() + SWITCH_FRAME_BYTES {
            return FaultClass::StackOverflow;
        }
    }

    if status.intersects(FaultStatus::IACCVIOL | FaultStatus::DACCVIOL | FaultStatus::MUNSTKERR) {
        FaultClass::Segmentation
    } else if status.intersects(
        FaultStatus::IBUSERR
            | FaultStatus::PRECISERR
            | FaultStatus::IMPRECISERR
            | FaultStatus::UNSTKERR
            | FaultStatus::LSPERR
            | FaultStatus::MLSPERR,
    ) {
        FaultClass::BusError
    } else {
        FaultClass::Unknown
    }
}

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// A user process faulted: report it, retire it as if it had called
    /// `exit(EXIT_FAILURE)`, and run someone else.
    pub(crate) fn fault(&mut self, pid: Pid, report: FaultReport, sp: u32) -> Dispatch {
        let (page, class) = match self.table.by_pid(pid) {
            Ok(pcb) => (pcb.page(), classify(&report, pcb.page(), sp)),
            Err(err) => return Dispatch::Halt(KernelFault::Corrupt(err)),
        };

        // The hardware frame is only there if stacking it did not fault.
        // r4-r11 were never stored for a fault.
        let pc = page
            .filter(|page| page.contains_range(sp + SOFTWARE_FRAME_BYTES, HARDWARE_FRAME_BYTES))
            .map(|_| SavedContext::capture(sp).read_frame(&self.platform).pc);
        match (report.address, pc) {
            (Some(address), Some(pc)) => {
                crate::log_error!(
                    "Process {}: {} accessing {:#010x} at pc {:#010x}.",
                    pid, class, address, pc
                );
            }
            (Some(address), None) => {
                crate::log_error!("Process {}: {} accessing {:#010x}.", pid, class, address);
            }
            (None, Some(pc)) => {
                crate::log_error!("Process {}: {} at pc {:#010x}.", pid, class, pc);
            }
            (None, None) => {
                crate::log_error!("Process {}: {}.", pid, class);
            }
        }

        if let Err(err) = self.terminate(pid, EXIT_FAILURE) {
            return Dispatch::Halt(KernelFault::Corrupt(err));
        }
        self.schedule()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupts::FaultKind;

    fn report(kind: FaultKind, status: FaultStatus, address: Option<u32>) -> FaultReport {
        FaultReport { kind, status, address, privileged: false }
    }

    fn page() -> PageIndex {
        PageIndex::new(10).unwrap()
    }

    fn mid_sp() -> u32 {
        page().base() + STACK_SIZE / 2
    }

    #[test]
    fn stacking_error_is_overflow() {
        let r = report(FaultKind::MemManage, FaultStatus::MSTKERR, None);
        assert_eq!(classify(&r, Some(page()), mid_sp()), FaultClass::StackOverflow);
    }

    #[test]
    fn access_just_below_page_is_overflow() {
        let addr = page().base() - 8;
        let r = report(
            FaultKind::MemManage,
            FaultStatus::DACCVIOL | FaultStatus::MMARVALID,
            Some(addr),
        );
        assert_eq!(classify(&r, Some(page()), mid_sp()), FaultClass::StackOverflow);
    }

    #[test]
    fn access_to_foreign_page_is_segmentation() {
        let addr = page().top() + 0x100;
        let r = report(
            FaultKind::MemManage,
            FaultStatus::DACCVIOL | FaultStatus::MMARVALID,
            Some(addr),
        );
        assert_eq!(classify(&r, Some(page()), mid_sp()), FaultClass::Segmentation);
    }

    #[test]
    fn usage_faults() {
        let div = report(FaultKind::Usage, FaultStatus::DIVBYZERO, None);
        assert_eq!(classify(&div, Some(page()), mid_sp()), FaultClass::DivideByZero);
        let undef = report(FaultKind::Usage, FaultStatus::UNDEFINSTR, None);
        assert_eq!(classify(&undef, Some(page()), mid_sp()), FaultClass::IllegalInstruction);
        let unaligned = report(FaultKind::Usage, FaultStatus::UNALIGNED, None);
        assert_eq!(classify(&unaligned, Some(page()), mid_sp()), FaultClass::Unaligned);
    }

    #[test]
    fn exhausted_stack_pointer_is_overflow() {
        let r = report(FaultKind::Hard, FaultStatus::empty(), None);
        assert_eq!(classify(&r, Some(page()), page().base() + 16), FaultClass::StackOverflow);
        assert_eq!(classify(&r, Some(page()), mid_sp()), FaultClass::Unknown);
    }

    #[test]
    fn bus_errors() {
        let r = report(FaultKind::Bus, FaultStatus::PRECISERR | FaultStatus::BFARVALID, Some(0x4000_0000));
        assert_eq!(classify(&r, Some(page()), mid_sp()), FaultClass::BusError);
    }

    #[test]
    fn usage_faults_on_a_deep_stack_keep_their_class() {
        let deep = page().base() + 16;
        let div = report(FaultKind::Usage, FaultStatus::DIVBYZERO, None);
        assert_eq!(classify(&div, Some(page()), deep), FaultClass::DivideByZero);
        let undef = report(FaultKind::Usage, FaultStatus::UNDEFINSTR, None);
        assert_eq!(classify(&undef, Some(page()), deep), FaultClass::IllegalInstruction);
        let stacking = report(FaultKind::MemManage, FaultStatus::MSTKERR, None);
        assert_eq!(classify(&stacking, Some(page()), deep), FaultClass::StackOverflow);
    }
}
