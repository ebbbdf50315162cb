use core::fmt;

use crate::config::{MAX_WRITE, NULLPID};
use crate::hal::{DeviceError, GpioPort, LedColour, Platform, SpiDirection};
use crate::kernel::Kernel;
use crate::memory::{self, PageIndex};
use crate::scheduler::context::{slot, Context, SavedContext};
use crate::scheduler::{Pid, ProcError, ProcessState, WaitTarget};

/// Syscall numbers (passed in r0 by `svc 0`).
pub const SYS_FORK: u32 = 0;
pub const SYS_WAIT: u32 = 1;
pub const SYS_EXIT: u32 = 2;
pub const SYS_WRITE: u32 = 3;
pub const SYS_LED: u32 = 4;
pub const SYS_YIELD: u32 = 5;
pub const SYS_SPI: u32 = 6;
pub const SYS_GPIO: u32 = 7;
pub const SYS_DELAY: u32 = 8;

pub const SUCCESS: u32 = 0;
pub const FAILURE: u32 = u32::MAX;
/// What `fork` returns to a parent when no child could be created.
pub const FORK_FAILED: u32 = 0;

const GPIO_PINS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Syscall {
    Fork = SYS_FORK,
    Wait = SYS_WAIT,
    Exit = SYS_EXIT,
    Write = SYS_WRITE,
    Led = SYS_LED,
    Yield = SYS_YIELD,
    Spi = SYS_SPI,
    Gpio = SYS_GPIO,
    Delay = SYS_DELAY,
}

impl TryFrom<u32> for Syscall {
    type Error = SyscallError;

    fn try_from(number: u32) -> Result<Self, Self::Error> {
        Ok(match number {
            SYS_FORK => Syscall::Fork,
            SYS_WAIT => Syscall::Wait,
            SYS_EXIT => Syscall::Exit,
            SYS_WRITE => Syscall::Write,
            SYS_LED => Syscall::Led,
            SYS_YIELD => Syscall::Yield,
            SYS_SPI => Syscall::Spi,
            SYS_GPIO => Syscall::Gpio,
            SYS_DELAY => Syscall::Delay,
            other => return Err(SyscallError::Unknown(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    Unknown(u32),
    InvalidPid(u32),
    WaitOnSelf,
    /// A user buffer outside the caller's stack page and flash.
    BadAddress(u32),
    BadArgument(u32),
    /// The caller's stack pointer is outside its own page.
    StackOverflow,
    Process(ProcError),
    Device(DeviceError),
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyscallError::Unknown(number) => write!(f, "unknown syscall {}", number),
            SyscallError::InvalidPid(raw) => write!(f, "invalid pid {}", raw),
            SyscallError::WaitOnSelf => write!(f, "a process cannot wait on itself"),
            SyscallError::BadAddress(addr) => write!(f, "bad user address {:#010x}", addr),
            SyscallError::BadArgument(arg) => write!(f, "bad argument {}", arg),
            SyscallError::StackOverflow => write!(f, "stack does not fit in one page"),
            SyscallError::Process(err) => write!(f, "{}", err),
            SyscallError::Device(err) => write!(f, "{}", err),
        }
    }
}

impl From<ProcError> for SyscallError {
    fn from(err: ProcError) -> Self {
        SyscallError::Process(err)
    }
}

impl From<DeviceError> for SyscallError {
    fn from(err: DeviceError) -> Self {
        SyscallError::Device(err)
    }
}

/// What happens to the caller once a syscall is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Resume the caller with this value in r0.
    Return(u32),
    /// Caller stays runnable but gives up the CPU.
    Yield,
    /// Caller is waiting; run someone else.
    Block,
    /// Caller no longer exists.
    Exited,
}

impl<P: Platform, const N: usize> Kernel<P, N> {
    /// Central syscall dispatcher, called from the `svc` trap with the
    /// caller's registers already saved.
    pub(crate) fn syscall(&mut self, caller: Pid, number: u32, args: [u32; 3]) -> Outcome {
        let [a0, a1, a2] = args;
        let call = match Syscall::try_from(number) {
            Ok(call) => call,
            Err(err) => {
                crate::log_warn!("syscall: {} from PID {}", err, caller);
                return Outcome::Return(FAILURE);
            }
        };

        let result = match call {
            Syscall::Fork => self.sys_fork(caller),
            Syscall::Wait => self.sys_wait(caller, a0),
            Syscall::Exit => self.sys_exit(caller, a0),
            Syscall::Write => self.sys_write(caller, a0, a1),
            Syscall::Led => self.sys_led(a0, a1),
            Syscall::Yield => Ok(Outcome::Yield),
            Syscall::Spi => self.sys_spi(caller, a0, a1),
            Syscall::Gpio => self.sys_gpio(a0, a1, a2),
            Syscall::Delay => self.sys_delay(a0),
        };
        match result {
            Ok(outcome) => outcome,
            Err(err) => {
                crate::log_warn!("syscall: {:?} from PID {} failed: {}", call, caller, err);
                Outcome::Return(if call == Syscall::Fork { FORK_FAILED } else { FAILURE })
            }
        }
    }

    /// Duplicate the caller. The child gets a copy of the used part of the
    /// parent's stack at the same offset inside its own page, and resumes
    /// from the same instruction with `NULLPID` in r0.
    fn sys_fork(&mut self, parent: Pid) -> Result<Outcome, SyscallError> {
        let pcb = self.table.by_pid(parent)?;
        let (Context::Saved(saved), Some(parent_page)) = (*pcb.context(), pcb.page()) else {
            return Err(ProcError::InvalidState { pid: parent, state: pcb.state() }.into());
        };
        let sp = saved.sp();
        let used = parent_page.top().wrapping_sub(sp);
        if !parent_page.contains_range(sp, used) {
            return Err(SyscallError::StackOverflow);
        }
        let name = pcb.name.clone();

        // Nothing is allocated before this point, and nothing after it fails.
        let child = self.table.reserve(&name)?;
        let (Some(child_pid), Some(child_page)) = (child.pid(), child.page()) else {
            return Err(ProcError::TableFull.into());
        };
        child.parent = Some(parent);

        let child_sp = child_page.base() + (sp - parent_page.base());
        self.platform.copy_bytes(child_sp, sp, used);
        let child_ctx = SavedContext::capture(child_sp);
        relocate_frame_pointer(&mut self.platform, &child_ctx, parent_page, child_page);
        child_ctx.set_return(&mut self.platform, NULLPID);
        self.table.adopt(child_pid, child_ctx)?;
        self.table.by_pid_mut(parent)?.num_children += 1;

        Ok(Outcome::Return(child_pid.as_u32()))
    }

    /// Block until `raw` has exited. Returns at once if it already has.
    fn sys_wait(&mut self, caller: Pid, raw: u32) -> Result<Outcome, SyscallError> {
        let target = self.table.pid_in_range(raw).ok_or(SyscallError::InvalidPid(raw))?;
        if target == caller {
            return Err(SyscallError::WaitOnSelf);
        }
        let generation = match self.table.by_pid(target) {
            Ok(pcb) => pcb.generation(),
            Err(_) => return Ok(Outcome::Return(SUCCESS)),
        };

        let pcb = self.table.by_pid_mut(caller)?;
        pcb.state = ProcessState::Waiting;
        pcb.wait_target = Some(WaitTarget { pid: target, generation });
        Ok(Outcome::Block)
    }

    fn sys_exit(&mut self, caller: Pid, code: u32) -> Result<Outcome, SyscallError> {
        self.terminate(caller, code)?;
        Ok(Outcome::Exited)
    }

    fn sys_write(&mut self, caller: Pid, ptr: u32, len: u32) -> Result<Outcome, SyscallError> {
        if len as usize > MAX_WRITE {
            return Err(SyscallError::BadArgument(len));
        }
        self.check_user_buffer(caller, ptr, len, true)?;

        let mut buf = [0u8; MAX_WRITE];
        let buf = &mut buf[..len as usize];
        self.platform.read_bytes(ptr, buf);
        self.platform.console_write(buf)?;
        Ok(Outcome::Return(SUCCESS))
    }

    fn sys_led(&mut self, colour: u32, on: u32) -> Result<Outcome, SyscallError> {
        let colour = LedColour::try_from(colour).map_err(SyscallError::BadArgument)?;
        self.platform.gpio_set(LedColour::PORT, colour.pin(), on != 0)?;
        Ok(Outcome::Return(SUCCESS))
    }

    /// Direction 0 sends the byte at `ptr`, direction 1 stores the received
    /// byte there.
    fn sys_spi(&mut self, caller: Pid, direction: u32, ptr: u32) -> Result<Outcome, SyscallError> {
        let direction = SpiDirection::try_from(direction).map_err(SyscallError::BadArgument)?;
        let mut byte = [0u8; 1];
        match direction {
            SpiDirection::Transmit => {
                self.check_user_buffer(caller, ptr, 1, true)?;
                self.platform.read_bytes(ptr, &mut byte);
                self.platform.spi_transfer(direction, byte[0])?;
            }
            SpiDirection::Receive => {
                self.check_user_buffer(caller, ptr, 1, false)?;
                byte[0] = self.platform.spi_transfer(direction, 0xFF)?;
                self.platform.write_bytes(ptr, &byte);
            }
        }
        Ok(Outcome::Return(SUCCESS))
    }

    fn sys_gpio(&mut self, port: u32, pin: u32, state: u32) -> Result<Outcome, SyscallError> {
        let port = GpioPort::try_from(port).map_err(SyscallError::BadArgument)?;
        if pin >= GPIO_PINS {
            return Err(SyscallError::BadArgument(pin));
        }
        self.platform.gpio_set(port, pin as u8, state != 0)?;
        Ok(Outcome::Return(SUCCESS))
    }

    /// Busy-waits on the one-shot timer with the kernel held.
    fn sys_delay(&mut self, delay_ms: u32) -> Result<Outcome, SyscallError> {
        self.platform.timer_start(delay_ms);
        while !self.platform.timer_expired() {
            core::hint::spin_loop();
        }
        Ok(Outcome::Return(SUCCESS))
    }

    /// User buffers must lie in the caller's own stack page, or in flash
    /// when the kernel only reads them.
    fn check_user_buffer(&self, caller: Pid, ptr: u32, len: u32, read_only: bool) -> Result<(), SyscallError> {
        let page = self.table.by_pid(caller)?.page();
        let in_page = page.is_some_and(|page| page.contains_range(ptr, len));
        if in_page || (read_only && memory::in_flash(ptr, len)) {
            Ok(())
        } else {
            Err(SyscallError::BadAddress(ptr))
        }
    }
}

/// Rebase a saved r7 that points into the parent's page so the child's
/// frame pointer walks its own copy.
fn relocate_frame_pointer<M: crate::hal::StackMemory>(
    mem: &mut M,
    ctx: &SavedContext,
    from: PageIndex,
    to: PageIndex,
) {
    let addr = ctx.word_address(slot::R7);
    let r7 = mem.read_word(addr);
    if from.contains(r7) || r7 == from.top() {
        mem.write_word(addr, r7 - from.base() + to.base());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_numbers_are_stable() {
        assert_eq!(Syscall::Fork as u32, 0);
        assert_eq!(Syscall::Delay as u32, 8);
        for number in 0..=8 {
            assert_eq!(Syscall::try_from(number).unwrap() as u32, number);
        }
    }

    #[test]
    fn unknown_numbers_are_rejected() {
        assert_eq!(Syscall::try_from(9), Err(SyscallError::Unknown(9)));
        assert_eq!(Syscall::try_from(u32::MAX), Err(SyscallError::Unknown(u32::MAX)));
    }

    #[test]
    fn error_messages() {
        assert_eq!(SyscallError::WaitOnSelf.to_string(), "a process cannot wait on itself");
        assert_eq!(
            SyscallError::Process(ProcError::OutOfPages).to_string(),
            "no free stack page"
        );
    }
}
