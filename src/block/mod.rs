/*
 * Block Device Abstraction Layer
 *
 * Sector-addressed storage behind a trait, plus a small registry mapping
 * stable names ("sd0") to driver instances. The filesystem layer consumes
 * this interface; it never sees a controller register.
 *
 * The registry is write-once at boot and read-many afterwards. Lookup is a
 * linear scan - the table holds a handful of entries at most.
 */

use heapless::Vec;
use spin::Mutex;

/// Every block device on this kernel moves data in 512-byte sectors.
pub const SECTOR_SIZE: usize = 512;

/// How many block devices the registry can hold.
pub const MAX_BLOCK_DEVICES: usize = 4;

/// Errors surfaced by block device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// An argument was rejected (bad buffer size, device not initialized).
    Invalid,
    /// The device reported a hard failure.
    Device,
    /// A bounded wait on the device expired.
    Timeout,
}

/// Sector-addressed storage device.
///
/// Implementations are registered once at boot and live for the lifetime
/// of the kernel. `read`/`write` move whole sectors; partial-sector access
/// is the caller's problem.
pub trait BlockDevice: Sync {
    /// Stable name the registry indexes by.
    fn name(&self) -> &str;

    /// Read `count` sectors starting at `lba` into `buf`.
    ///
    /// `buf` must hold at least `count * SECTOR_SIZE` bytes.
    fn read(&self, lba: u32, count: u32, buf: &mut [u8]) -> Result<(), BlockError>;

    /// Write `count` sectors starting at `lba` from `buf`.
    fn write(&self, lba: u32, count: u32, buf: &[u8]) -> Result<(), BlockError>;

    /// Total sectors on the device.
    fn sector_count(&self) -> u32;
}

static DEVICES: Mutex<Vec<&'static dyn BlockDevice, MAX_BLOCK_DEVICES>> = Mutex::new(Vec::new());

/// Add a device to the registry.
///
/// Overflow is logged and the device discarded; nothing in the kernel
/// registers devices after boot, so hitting the cap means the capacity
/// constant is simply too small.
pub fn register(dev: &'static dyn BlockDevice) {
    let mut devices = DEVICES.lock();
    match devices.push(dev) {
        Ok(()) => log::info!("block: registered {}", dev.name()),
        Err(_) => log::warn!("block: registry full, dropping {}", dev.name()),
    }
}

/// Look up a device by name.
pub fn get(name: &str) -> Option<&'static dyn BlockDevice> {
    DEVICES.lock().iter().copied().find(|d| d.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDisk {
        name: &'static str,
    }

    impl BlockDevice for FakeDisk {
        fn name(&self) -> &str {
            self.name
        }
        fn read(&self, _lba: u32, _count: u32, _buf: &mut [u8]) -> Result<(), BlockError> {
            Ok(())
        }
        fn write(&self, _lba: u32, _count: u32, _buf: &[u8]) -> Result<(), BlockError> {
            Ok(())
        }
        fn sector_count(&self) -> u32 {
            16
        }
    }

    static DISK_A: FakeDisk = FakeDisk { name: "fake0" };
    static DISK_B: FakeDisk = FakeDisk { name: "fake1" };

    /// Serializes access to the shared `DEVICES` registry across tests in
    /// this module; the default test harness runs tests on separate
    /// threads, and these tests mutate shared global state.
    fn tests_run_one_at_a_time() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
        LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn register_and_lookup() {
        let _guard = tests_run_one_at_a_time();
        DEVICES.lock().clear();
        register(&DISK_A);
        register(&DISK_B);

        let found = get("fake1").expect("registered device should resolve");
        assert_eq!(found.name(), "fake1");
        assert_eq!(found.sector_count(), 16);
        assert!(get("nvme0").is_none());
    }

    #[test]
    fn overflow_is_discarded() {
        let _guard = tests_run_one_at_a_time();
        DEVICES.lock().clear();
        for _ in 0..MAX_BLOCK_DEVICES {
            register(&DISK_A);
        }
        register(&DISK_B);
        assert_eq!(DEVICES.lock().len(), MAX_BLOCK_DEVICES);
        assert!(get("fake1").is_none());
    }
}
