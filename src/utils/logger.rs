/*
 * Kernel Logger
 *
 * Implements the `log` crate facade over the serial console. Every module
 * logs through `log::info!` and friends; this is the single sink.
 */

use log::{Level, LevelFilter, Metadata, Record};

use crate::serial_println;

/// Logger implementation writing to the UART console.
struct KernelLogger;

impl log::Log for KernelLogger {
    /// Checks if the given log level is enabled.
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    /// Logs the record by printing it to the console.
    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            serial_println!("[{}] {}", record.level(), record.args());
        }
    }

    /// Flushes the logger (no-op, the console is unbuffered).
    fn flush(&self) {}
}

/// The logger instance used for logging.
static LOGGER: KernelLogger = KernelLogger;

/// Initializes the logger.
///
/// # Panics
///
/// Panics if a logger was already installed; that only happens on a
/// broken boot path.
pub fn init() {
    let result = log::set_logger(&LOGGER).map(|()| log::set_max_level(LevelFilter::Info));
    match result {
        Ok(_) => serial_println!("Logger initialized"),
        Err(err) => panic!("Error initializing logger: {}", err),
    }
}
