pub mod context;
pub mod process;
pub mod table;

use context::Context;
pub use process::{Pcb, Pid, ProcessState, WaitTarget};
pub use table::{ProcError, ProcessTable};

use crate::hal::Platform;
use crate::kernel::{Dispatch, Kernel, KernelFault};
use crate::memory::mpu::MpuRegion;
use crate::syscalls::SUCCESS;

/// Round-robin position over the table slots.
#[derive(Debug, Clone, Copy)]
pub struct RoundRobin {
    cursor: usize,
}

impl RoundRobin {
    /// The first call to [`advance`](Self::advance) lands on slot 0.
    pub fn new(capacity: usize) -> Self {
        RoundRobin {
            cursor: capacity.saturating_sub(1),
        }
    }

    pub fn advance(&mut self, capacity: usize) -> usize {
        self.cursor = (self.cursor + 1) % capacity;
        self.cursor
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// Pick the next process to run.
    ///
    /// The scan visits each slot at most once, so it terminates even when
    /// nothing is runnable; in that case the core idles until the next tick
    /// calls in again. The previous process's registers must already be
    /// saved.
    pub(crate) fn schedule(&mut self) -> Dispatch {
        let trampoline = self.platform.exit_trampoline();
        for _ in 0..N {
            let slot = self.scheduler.advance(N);
            self.release_waiter(slot);

            let pcb = self.table.slot(slot);
            let Some(pid) = pcb.pid() else { continue };
            match pcb.state() {
                ProcessState::Reserved => {
                    if let Err(err) = self.table.materialize(pid, &mut self.platform, trampoline) {
                        return Dispatch::Halt(KernelFault::Corrupt(err));
                    }
                }
                ProcessState::Runnable => {}
                _ => continue,
            }
            return self.switch_to(slot);
        }

        self.table.set_current(None);
        Dispatch::Idle
    }

    fn switch_to(&mut self, slot: usize) -> Dispatch {
        let pcb = self.table.slot_mut(slot);
        let (Some(pid), Some(page), Context::Saved(saved)) = (pcb.pid, pcb.page, pcb.context) else {
            return Dispatch::Halt(KernelFault::NoContext(slot));
        };
        pcb.state = ProcessState::Running;
        pcb.context = Context::Live;
        self.table.set_current(Some(pid));

        if self.config.memory_protection {
            self.platform.protect_stack(MpuRegion::stack_page(page));
        }
        Dispatch::Resume { pid, sp: saved.sp() }
    }

    /// `WAITING -> RUNNABLE` once the awaited process is gone. A slot that
    /// was recycled in the meantime counts as gone.
    fn release_waiter(&mut self, slot: usize) {
        let pcb = self.table.slot(slot);
        if pcb.state() != ProcessState::Waiting {
            return;
        }
        let released = match pcb.wait_target() {
            Some(target) => match self.table.by_pid(target.pid) {
                Ok(awaited) => awaited.generation() != target.generation,
                Err(_) => true,
            },
            None => true,
        };
        if !released {
            return;
        }

        let pcb = self.table.slot_mut(slot);
        pcb.state = ProcessState::Runnable;
        pcb.wait_target = None;
        if let Context::Saved(saved) = pcb.context {
            saved.set_return(&mut self.platform, SUCCESS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_pick_is_slot_zero() {
        let mut rr = RoundRobin::new(4);
        assert_eq!(rr.advance(4), 0);
        assert_eq!(rr.advance(4), 1);
    }

    #[test]
    fn cursor_wraps() {
        let mut rr = RoundRobin::new(3);
        let visited: Vec<usize> = (0..7).map(|_| rr.advance(3)).collect();
        assert_eq!(visited, [0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(rr.cursor(), 0);
    }
}
