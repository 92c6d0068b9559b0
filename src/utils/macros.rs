/*
 * Kernel Utility Macros
 *
 * print!/serial_println! for formatted output on the UART console. These
 * are the kernel's replacement for the standard library macros that are
 * not available in no_std; the logger and the shell are built on them.
 */

/// Prints formatted text to the serial console using the `Writer` struct.
///
/// Same syntax as the standard `print!` macro.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ({
        use core::fmt::Write;
        let _ = $crate::utils::writer::Writer::new().write_fmt(format_args!($($arg)*));
    });
}

/// Prints a formatted string followed by a new line to the serial console.
#[macro_export]
macro_rules! serial_println {
    () => ($crate::print!("\n"));
    ($fmt:expr) => ($crate::print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::print!(concat!($fmt, "\n"), $($arg)*));
}
