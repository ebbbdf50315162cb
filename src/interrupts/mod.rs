pub mod faults;
#[cfg(target_arch = "arm")]
pub mod handlers;

use core::fmt;

pub use faults::{FaultClass, FaultStatus};

/// Why the kernel was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapEvent {
    /// Periodic timer.
    Tick,
    /// `svc 0` with the syscall number in r0 and arguments in r1-r3.
    Syscall { number: u32, args: [u32; 3] },
    Fault(FaultReport),
}

/// The exception that reported a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    MemManage,
    Bus,
    Usage,
    Hard,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultKind::MemManage => "memory management fault",
            FaultKind::Bus => "bus fault",
            FaultKind::Usage => "usage fault",
            FaultKind::Hard => "hard fault",
        };
        f.write_str(name)
    }
}

/// Everything the hardware said about a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultReport {
    pub kind: FaultKind,
    pub status: FaultStatus,
    /// Faulting data address, when the status marks it valid.
    pub address: Option<u32>,
    /// Raised while privileged code was executing.
    pub privileged: bool,
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (CFSR {:#010x}", self.kind, self.status.bits())?;
        if let Some(address) = self.address {
            write!(f, ", address {:#010x}", address)?;
        }
        write!(f, ")")
    }
}

/// Exception priorities, fault enables and the system tick.
///
/// SVCall and SysTick share a priority so neither preempts the other. The
/// configurable faults sit above both so a fault inside the kernel is taken
/// immediately and halts.
#[cfg(target_arch = "arm")]
pub fn init(scb: &mut cortex_m::peripheral::SCB, syst: &mut cortex_m::peripheral::SYST) {
    use cortex_m::peripheral::scb::SystemHandler;
    use cortex_m::peripheral::syst::SystClkSource;

    const KERNEL_PRIORITY: u8 = 0xE0;
    const FAULT_PRIORITY: u8 = 0x20;
    const SHCSR_FAULT_ENABLES: u32 = 0b111 << 16;
    const CCR_DIV_0_TRP: u32 = 1 << 4;

    unsafe {
        scb.set_priority(SystemHandler::SVCall, KERNEL_PRIORITY);
        scb.set_priority(SystemHandler::SysTick, KERNEL_PRIORITY);
        scb.set_priority(SystemHandler::MemoryManagement, FAULT_PRIORITY);
        scb.set_priority(SystemHandler::BusFault, FAULT_PRIORITY);
        scb.set_priority(SystemHandler::UsageFault, FAULT_PRIORITY);
        scb.shcsr.modify(|shcsr| shcsr | SHCSR_FAULT_ENABLES);
        scb.ccr.modify(|ccr| ccr | CCR_DIV_0_TRP);
    }

    let reload = crate::config::SYSCLK_HZ / 1000 * crate::config::TICK_MS - 1;
    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(reload);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();

    crate::log_info!("Exceptions configured, {} ms tick.", crate::config::TICK_MS);
}
