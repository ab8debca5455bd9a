//! Guest print utilities.

use core::fmt::Write;
use spin_lock::SpinLock;

static CONSOLE: SpinLock<Option<&'static mut (dyn Write + Send)>> = SpinLock::new(None);

/// Install the device every print goes to.
///
/// Until a console is installed, output is dropped.
pub fn set_console(console: &'static mut (dyn Write + Send)) {
    *CONSOLE.lock() = Some(console);
}

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    match CONSOLE.lock().as_mut() {
        Some(console) => {
            let _ = console.write_fmt(fmt);
        }
        None => {
            #[cfg(test)]
            std::print!("{}", fmt);
        }
    }
}

/// [`Write`] sink forwarding to the console.
pub struct Stdout;

impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        _print(format_args!("{}", s));
        Ok(())
    }
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the console.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the console.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// Display an information message.
///
/// Use the format! syntax to write data to the console.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ($crate::kprint::_print(
            format_args!(
                "[INFO] {}\n",
                format_args!($($arg)*)
            )
        )
    );
}

/// Display a warning message.
///
/// Use the format! syntax to write data to the console.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => ($crate::kprint::_print(
            format_args!(
                "[WARNING] {}\n",
                format_args!($($arg)*)
            )
        )
    );
}

/// Print msg if debug build
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::kprint::_print(
                format_args!(
                    "[DEBUG] {}\n",
                    format_args!($($arg)*)
                )
            )
        }
    }
}
