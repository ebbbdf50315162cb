//! The TM4C123 LaunchPad as a [`Platform`].

use super::{flash, gpio, ssi::Ssi, timer::OneShot};
use crate::config::SYSCLK_HZ;
use crate::hal::{DeviceError, GpioPort, LedColour, Platform, SpiDirection, StackMemory};
use crate::memory::mpu::MpuRegion;

pub struct Tm4c123 {
    ssi: Option<Ssi>,
    timer: OneShot,
}

impl Tm4c123 {
    /// Bring up the LEDs, the SPI master and the delay timer. The console is
    /// brought up separately by `serial::init`.
    pub fn init() -> Self {
        let leds = [LedColour::Red, LedColour::Green, LedColour::Blue];
        let mask = leds.iter().fold(0u8, |mask, led| mask | 1 << led.pin());
        gpio::configure_output(LedColour::PORT, mask);

        let mut ssi = Ssi::ssi0();
        let ssi = match ssi.init_master(0x7, 2, 0) {
            Ok(()) => Some(ssi),
            Err(err) => {
                crate::log_error!("Failed to start SSI0: {}", err);
                None
            }
        };

        crate::log_info!("Board initialized.");
        Tm4c123 {
            ssi,
            timer: OneShot::timer0(SYSCLK_HZ),
        }
    }
}

impl StackMemory for Tm4c123 {
    fn read_word(&self, addr: u32) -> u32 {
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
    }

    fn read_bytes(&self, addr: u32, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { core::ptr::read_volatile((addr as usize + i) as *const u8) };
        }
    }

    fn write_bytes(&mut self, addr: u32, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            unsafe { core::ptr::write_volatile((addr as usize + i) as *mut u8, *byte) };
        }
    }

    fn copy_bytes(&mut self, dst: u32, src: u32, len: u32) {
        unsafe {
            core::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, len as usize);
        }
    }
}

impl Platform for Tm4c123 {
    fn console_write(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        crate::serial::write_bytes(bytes);
        Ok(())
    }

    fn gpio_set(&mut self, port: GpioPort, pin: u8, on: bool) -> Result<(), DeviceError> {
        if pin > 7 {
            return Err(DeviceError::InvalidArgument);
        }
        if !gpio::is_output(port, pin) {
            gpio::configure_output(port, 1 << pin);
        }
        gpio::write(port, pin, on);
        Ok(())
    }

    fn spi_transfer(&mut self, _direction: SpiDirection, byte: u8) -> Result<u8, DeviceError> {
        self.ssi.as_mut().ok_or(DeviceError::Busy)?.transfer(byte)
    }

    fn timer_start(&mut self, delay_ms: u32) {
        self.timer.start(delay_ms);
    }

    fn timer_expired(&mut self) -> bool {
        self.timer.expired()
    }

    fn persist_write(&mut self, src: &[u8], flash_address: u32) -> Result<(), DeviceError> {
        flash::write(src, flash_address)
    }

    fn protect_stack(&mut self, region: MpuRegion) {
        let mpu = unsafe { &*cortex_m::peripheral::MPU::PTR };
        region.apply(mpu);
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn exit_trampoline(&self) -> u32 {
        crate::interrupts::handlers::ember_exit_trampoline as usize as u32
    }
}
