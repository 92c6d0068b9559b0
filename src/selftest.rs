/*
 * Kernel Scenario Tests
 *
 * On-target test suite exercising the scheduler, the sync primitives and
 * the SD card end to end. Started from the shell with `selftest`: a
 * driver task runs the single-task scenarios inline, then spawns helper
 * pairs for the ones that need real concurrency.
 *
 * Task slots are not recycled, so the suite is sized to fit the table
 * once: the driver plus four helpers. Run it on a fresh boot.
 *
 * Results are reported through the log; every scenario prints either an
 * `ok:` or a `FAILED:` line.
 */

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::block::{self, SECTOR_SIZE};
use crate::drivers::timer;
use crate::scheduler;
use crate::sync::{Mutex, Semaphore};

/// Scratch sector for the write/read round trip, far away from anything a
/// filesystem on a small card is likely to use.
const SCRATCH_LBA: u32 = 4096;

static PRODUCED: AtomicU32 = AtomicU32::new(0);
static CONSUMED: AtomicU32 = AtomicU32::new(0);
static HANDOFF: Semaphore = Semaphore::new("selftest-pc", 0, 1);

static LOCK_A: Mutex = Mutex::new("selftest-a");
static LOCK_B: Mutex = Mutex::new("selftest-b");
static A_HOLDS: AtomicBool = AtomicBool::new(false);
static B_HOLDS: AtomicBool = AtomicBool::new(false);

/// Spawn the suite. Called from the shell.
pub fn spawn_all() {
    match scheduler::spawn("selftest", selftest_task, 0) {
        Ok(_) => log::info!("selftest: started"),
        Err(err) => log::error!("selftest: cannot start ({:?})", err),
    }
}

fn selftest_task() {
    sleep_precision();
    sd_mbr_signature();
    sd_write_read_restore();

    // The concurrent scenarios run in helper tasks and report when done.
    let crossed = scheduler::spawn("st-lock-a", try_lock_task_a, 0).is_ok()
        && scheduler::spawn("st-lock-b", try_lock_task_b, 0).is_ok();
    let handed = scheduler::spawn("st-producer", producer_task, 0).is_ok()
        && scheduler::spawn("st-consumer", consumer_task, 0).is_ok();
    if !(crossed && handed) {
        log::error!("FAILED: selftest helpers did not all spawn");
    }
}

/// Sleeping for d ticks may not resume before tick T0 + d.
fn sleep_precision() {
    let before = timer::ticks();
    scheduler::sleep(5);
    let after = timer::ticks();
    if after.wrapping_sub(before) >= 5 {
        log::info!("ok: sleep(5) resumed after {} ticks", after.wrapping_sub(before));
    } else {
        log::error!("FAILED: sleep(5) resumed after {} ticks", after.wrapping_sub(before));
    }
}

/// Sector 0 of a formatted card ends in the MBR signature.
fn sd_mbr_signature() {
    let Some(dev) = block::get("sd0") else {
        log::warn!("selftest: sd0 not registered, skipping SD scenarios");
        return;
    };
    if dev.sector_count() == 0 {
        log::error!("FAILED: sd0 reports zero sectors");
        return;
    }
    let mut sector = [0u8; SECTOR_SIZE];
    match dev.read(0, 1, &mut sector) {
        Ok(()) if sector[510] == 0x55 && sector[511] == 0xAA => {
            log::info!("ok: MBR signature present, {} sectors", dev.sector_count());
        }
        Ok(()) => log::error!(
            "FAILED: MBR signature is {:02X} {:02X}",
            sector[510],
            sector[511]
        ),
        Err(err) => log::error!("FAILED: MBR read ({:?})", err),
    }
}

/// Write a known pattern, read it back, then put the original bytes back.
fn sd_write_read_restore() {
    let Some(dev) = block::get("sd0") else {
        return;
    };

    let mut original = [0u8; SECTOR_SIZE];
    if let Err(err) = dev.read(SCRATCH_LBA, 1, &mut original) {
        log::error!("FAILED: scratch sector read ({:?})", err);
        return;
    }

    let mut pattern = [0u8; SECTOR_SIZE];
    for (i, byte) in pattern.iter_mut().enumerate() {
        *byte = i as u8;
    }

    let round_trip = dev
        .write(SCRATCH_LBA, 1, &pattern)
        .and_then(|()| {
            let mut readback = [0u8; SECTOR_SIZE];
            dev.read(SCRATCH_LBA, 1, &mut readback)?;
            Ok(readback == pattern)
        });

    // Always try to restore, even after a failed compare.
    if let Err(err) = dev.write(SCRATCH_LBA, 1, &original) {
        log::error!("FAILED: scratch sector restore ({:?})", err);
    }

    match round_trip {
        Ok(true) => log::info!("ok: sector {} write/read round trip", SCRATCH_LBA),
        Ok(false) => log::error!("FAILED: sector {} read back differs", SCRATCH_LBA),
        Err(err) => log::error!("FAILED: sector {} round trip ({:?})", SCRATCH_LBA, err),
    }
}

/// Half of the crossed try-lock scenario: hold A, try B without blocking.
fn try_lock_task_a() {
    LOCK_A.lock();
    A_HOLDS.store(true, Ordering::SeqCst);
    while !B_HOLDS.load(Ordering::SeqCst) {
        scheduler::yield_now();
    }
    let acquired = LOCK_B.try_lock();
    if acquired {
        LOCK_B.unlock();
        log::error!("FAILED: try_lock(B) succeeded while B held it");
    } else {
        log::info!("ok: try_lock(B) refused, no deadlock");
    }
    LOCK_A.unlock();
}

fn try_lock_task_b() {
    LOCK_B.lock();
    B_HOLDS.store(true, Ordering::SeqCst);
    while !A_HOLDS.load(Ordering::SeqCst) {
        scheduler::yield_now();
    }
    let acquired = LOCK_A.try_lock();
    if acquired {
        LOCK_A.unlock();
        log::error!("FAILED: try_lock(A) succeeded while A held it");
    } else {
        log::info!("ok: try_lock(A) refused, no deadlock");
    }
    LOCK_B.unlock();
}

/// Producer half of the semaphore hand-off: 100 signals, yielding after
/// each so the consumer drains the single permit in between.
fn producer_task() {
    for _ in 0..100 {
        HANDOFF.signal();
        PRODUCED.fetch_add(1, Ordering::SeqCst);
        scheduler::yield_now();
    }
}

fn consumer_task() {
    for _ in 0..100 {
        HANDOFF.wait();
        CONSUMED.fetch_add(1, Ordering::SeqCst);
    }
    let consumed = CONSUMED.load(Ordering::SeqCst);
    let leftover = HANDOFF.count();
    if consumed == 100 && leftover == 0 {
        log::info!("ok: 100 semaphore hand-offs, count drained");
    } else {
        log::error!(
            "FAILED: consumed {} of {}, {} left on the semaphore",
            consumed,
            PRODUCED.load(Ordering::SeqCst),
            leftover
        );
    }
}
