//! Exception entry points and the glue between them and [`Kernel::handle`].
//!
//! The boot code's vector table points SVCall, SysTick and the four fault
//! vectors at the `ember_*` handlers below. Each one tags the trap source in
//! r2 and falls into a common stub that saves r4-r11 on the process stack
//! (SVCall and SysTick only), calls into Rust, and restores r4-r11 from
//! whichever stack the kernel picked.

use core::arch::naked_asm;

use cortex_m::peripheral::SCB;
use cortex_m::register::control::{self, Npriv, Spsel};
use lazy_static::lazy_static;
use spin::Mutex;

use super::{FaultKind, FaultReport, FaultStatus, TrapEvent};
use crate::drivers::board::Tm4c123;
use crate::kernel::{Dispatch, Kernel, KernelFault};
use crate::scheduler::context::{ColdStart, ExceptionFrame, SOFTWARE_FRAME_BYTES};
use crate::syscalls::SYS_EXIT;

const SOURCE_SVCALL: u32 = 0;
const SOURCE_SYSTICK: u32 = 1;
const SOURCE_MEMMANAGE: u32 = 2;
const SOURCE_BUSFAULT: u32 = 3;
const SOURCE_USAGEFAULT: u32 = 4;
const SOURCE_HARDFAULT: u32 = 5;

/// EXC_RETURN bit set when the trapped context was using the process stack.
const EXC_RETURN_PSP: u32 = 1 << 2;

const IDLE_STACK_WORDS: usize = 64;

#[repr(C, align(8))]
struct IdleStack([u32; IDLE_STACK_WORDS]);

static mut IDLE_STACK: IdleStack = IdleStack([0; IDLE_STACK_WORDS]);

lazy_static! {
    pub static ref KERNEL: Mutex<Option<Kernel<Tm4c123>>> = Mutex::new(None);
}

// ──────────────────────────────────────────────────────────────
//  Vectors
// ──────────────────────────────────────────────────────────────

#[unsafe(naked)]
#[no_mangle]
pub extern "C" fn ember_svcall() {
    naked_asm!("movs r2, #{source}", "b {common}", source = const SOURCE_SVCALL, common = sym trap_common);
}

#[unsafe(naked)]
#[no_mangle]
pub extern "C" fn ember_systick() {
    naked_asm!("movs r2, #{source}", "b {common}", source = const SOURCE_SYSTICK, common = sym trap_common);
}

#[unsafe(naked)]
#[no_mangle]
pub extern "C" fn ember_memmanage() {
    naked_asm!("movs r2, #{source}", "b {common}", source = const SOURCE_MEMMANAGE, common = sym trap_common);
}

#[unsafe(naked)]
#[no_mangle]
pub extern "C" fn ember_busfault() {
    naked_asm!("movs r2, #{source}", "b {common}", source = const SOURCE_BUSFAULT, common = sym trap_common);
}

#[unsafe(naked)]
#[no_mangle]
pub extern "C" fn ember_usagefault() {
    naked_asm!("movs r2, #{source}", "b {common}", source = const SOURCE_USAGEFAULT, common = sym trap_common);
}

#[unsafe(naked)]
#[no_mangle]
pub extern "C" fn ember_hardfault() {
    naked_asm!("movs r2, #{source}", "b {common}", source = const SOURCE_HARDFAULT, common = sym trap_common);
}

/// r0 = process stack pointer, r1 = EXC_RETURN, r2 = source.
/// Always returns to thread mode on the process stack without FP state.
///
/// Fault sources never store r4-r11: the process stack may already be past
/// its page, and a faulting process is never resumed. r0 still points where
/// they would have gone so the kernel sees one frame layout.
#[unsafe(naked)]
unsafe extern "C" fn trap_common() {
    naked_asm!(
        "mrs r0, psp",
        "cmp r2, #{first_fault}",
        "bhs 2f",
        "stmdb r0!, {{r4-r11}}",
        "b 3f",
        "2:",
        "sub r0, r0, #{software}",
        "3:",
        "mov r1, lr",
        "bl {entry}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "mvn lr, #2",
        "bx lr",
        first_fault = const SOURCE_MEMMANAGE,
        software = const SOFTWARE_FRAME_BYTES,
        entry = sym trap_entry,
    );
}

/// Lands here when a process's entry function returns. r0 holds its return
/// value, which becomes the exit code.
#[unsafe(naked)]
#[no_mangle]
pub extern "C" fn ember_exit_trampoline() {
    naked_asm!(
        "mov r1, r0",
        "movs r0, #{exit}",
        "svc 0",
        "b .",
        exit = const SYS_EXIT,
    );
}

// ──────────────────────────────────────────────────────────────
//  Rust side
// ──────────────────────────────────────────────────────────────

extern "C" fn trap_entry(sp: u32, exc_return: u32, source: u32) -> u32 {
    let event = match source {
        SOURCE_SVCALL => {
            let frame = unsafe {
                core::ptr::read_volatile((sp + SOFTWARE_FRAME_BYTES) as *const ExceptionFrame)
            };
            TrapEvent::Syscall {
                number: frame.r0,
                args: [frame.r1, frame.r2, frame.r3],
            }
        }
        SOURCE_SYSTICK => TrapEvent::Tick,
        _ => TrapEvent::Fault(read_fault(source, from_privileged(exc_return))),
    };

    // A privileged fault may have struck with the kernel lock held.
    if let TrapEvent::Fault(report) = event {
        if report.privileged {
            crate::log_error!("EXCEPTION: {}", report);
            let fault = KernelFault::Privileged(report);
            // Only recorded when the fault did not strike inside the kernel.
            if let Some(mut guard) = KERNEL.try_lock() {
                if let Some(kernel) = guard.as_mut() {
                    persist_halt(kernel, &fault);
                }
            }
            panic!("{}", fault);
        }
    }

    let Some(mut guard) = KERNEL.try_lock() else {
        panic!("kernel re-entered from trap source {}", source);
    };
    let Some(kernel) = guard.as_mut() else {
        panic!("trap source {} before the kernel started", source);
    };

    match kernel.handle(event, sp) {
        Dispatch::Resume { sp, .. } => {
            set_thread_privilege(Npriv::Unprivileged);
            sp
        }
        Dispatch::Idle => {
            set_thread_privilege(Npriv::Privileged);
            let entry = idle_loop as usize as u32;
            ColdStart::new(entry).build(idle_stack_top(), kernel.platform_mut(), entry).sp()
        }
        Dispatch::Halt(fault) => {
            crate::log_error!("Kernel halted: {}", fault);
            kernel.dump();
            persist_halt(kernel, &fault);
            panic!("{}", fault);
        }
    }
}

fn persist_halt(kernel: &mut Kernel<Tm4c123>, fault: &KernelFault) {
    if let Err(err) = kernel.record_halt(fault) {
        crate::log_error!("Failed to record the halt: {}", err);
    }
}

fn from_privileged(exc_return: u32) -> bool {
    exc_return & EXC_RETURN_PSP == 0 || control::read().npriv() == Npriv::Privileged
}

fn read_fault(source: u32, privileged: bool) -> FaultReport {
    let scb = unsafe { &*SCB::PTR };
    let cfsr = scb.cfsr.read();
    let status = FaultStatus::from_bits_truncate(cfsr);
    let address = if status.contains(FaultStatus::MMARVALID) {
        Some(scb.mmfar.read())
    } else if status.contains(FaultStatus::BFARVALID) {
        Some(scb.bfar.read())
    } else {
        None
    };

    // Status bits are write-one-to-clear.
    unsafe {
        scb.cfsr.write(cfsr);
        if source == SOURCE_HARDFAULT {
            scb.hfsr.write(scb.hfsr.read());
        }
    }

    let kind = match source {
        SOURCE_MEMMANAGE => FaultKind::MemManage,
        SOURCE_BUSFAULT => FaultKind::Bus,
        SOURCE_USAGEFAULT => FaultKind::Usage,
        _ => FaultKind::Hard,
    };
    FaultReport { kind, status, address, privileged }
}

fn set_thread_privilege(level: Npriv) {
    let mut ctrl = control::read();
    ctrl.set_npriv(level);
    unsafe { control::write(ctrl) };
    cortex_m::asm::isb();
}

fn idle_stack_top() -> u32 {
    let base = unsafe { core::ptr::addr_of_mut!(IDLE_STACK) } as u32;
    base + (IDLE_STACK_WORDS * 4) as u32
}

extern "C" fn idle_loop() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Leave the boot stack: thread mode moves onto the idle stack and waits for
/// the first tick, which is pended right away so init runs at once.
pub fn launch() -> ! {
    unsafe { cortex_m::register::psp::write(idle_stack_top()) };
    let mut ctrl = control::read();
    ctrl.set_spsel(Spsel::Psp);
    unsafe { control::write(ctrl) };
    cortex_m::asm::isb();

    SCB::set_pendst();
    idle_loop()
}
