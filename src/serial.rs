#[cfg(target_arch = "arm")]
use lazy_static::lazy_static;
#[cfg(target_arch = "arm")]
use spin::Mutex;

#[cfg(target_arch = "arm")]
use crate::drivers::uart::Uart;

#[cfg(target_arch = "arm")]
lazy_static! {
    pub static ref SERIAL1: Mutex<Uart> = {
        let mut uart = Uart::uart1();
        uart.init(crate::config::SYSCLK_HZ, crate::config::CONSOLE_BAUD);
        Mutex::new(uart)
    };
}

#[doc(hidden)]
pub fn _print(args: ::core::fmt::Arguments) {
    #[cfg(target_arch = "arm")]
    {
        use core::fmt::Write;
        SERIAL1.lock().write_fmt(args).expect("Printing to serial failed");
    }
    #[cfg(all(test, not(target_arch = "arm")))]
    {
        std::print!("{}", args);
    }
    #[cfg(not(any(test, target_arch = "arm")))]
    {
        let _ = args;
    }
}

/// Write raw bytes to the console, bypassing formatting.
#[cfg(target_arch = "arm")]
pub fn write_bytes(bytes: &[u8]) {
    let mut uart = SERIAL1.lock();
    for &byte in bytes {
        uart.send(byte);
    }
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => {
        $crate::serial::_print(format_args!("\r\n"))
    };
    ($($arg:tt)*) => {{
        $crate::serial::_print(format_args!($($arg)*));
        $crate::serial::_print(format_args!("\r\n"));
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("[INFO] "));
        $crate::serial::_print(format_args!($($arg)*));
        $crate::serial::_print(format_args!("\r\n"));
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("[WARN] "));
        $crate::serial::_print(format_args!($($arg)*));
        $crate::serial::_print(format_args!("\r\n"));
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!("[ERROR] "));
        $crate::serial::_print(format_args!($($arg)*));
        $crate::serial::_print(format_args!("\r\n"));
    };
}

#[cfg(target_arch = "arm")]
pub fn init() {
    let _ = SERIAL1.lock();
}
