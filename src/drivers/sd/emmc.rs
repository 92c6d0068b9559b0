/*
 * EMMC Host Controller Driver
 *
 * SD card access through the BCM283x EMMC (Arasan) host at peripheral
 * +0x300000. The driver brings a freshly powered card through the SD
 * initialization state machine into its Transfer state - 4-bit bus,
 * 25 MHz clock, 512-byte blocks - and then moves single sectors with
 * CMD17/CMD24, draining and filling the data FIFO under the controller's
 * read-available / write-available backpressure bits.
 *
 * Card power is owned by the firmware: the slot must be switched on over
 * the mailbox before the controller will talk to anything.
 *
 * Driver state after init is three words - the card's RCA, its
 * high-capacity flag (SDHC addresses by LBA, SDSC by byte), and the total
 * sector count parsed out of the CSD. Each read/write is otherwise
 * stateless; serializing access to the controller is the caller's job.
 */

use bitflags::bitflags;
use spin::Mutex;

use crate::block::SECTOR_SIZE;
use crate::drivers::{PERIPHERAL_BASE, gpio, mailbox, timer};
use crate::io::{Io, Mmio};

const EMMC_BASE: usize = PERIPHERAL_BASE + 0x30_0000;

bitflags! {
    /// STATUS register fields
    #[derive(Clone, Copy)]
    struct Status: u32 {
        /// Command line is busy with the previous command.
        const CMD_INHIBIT = 1 << 0;
        /// Data lines are busy with the previous transfer.
        const DAT_INHIBIT = 1 << 1;
        /// At least one word can be pushed into the write FIFO.
        const WRITE_AVAILABLE = 1 << 10;
        /// At least one word is waiting in the read FIFO.
        const READ_AVAILABLE = 1 << 11;
    }
}

bitflags! {
    /// INTERRUPT register fields (write-one-to-clear)
    struct Interrupt: u32 {
        const CMD_DONE = 1 << 0;
        const DATA_DONE = 1 << 1;
        const WRITE_READY = 1 << 4;
        const READ_READY = 1 << 5;
        const ERR = 1 << 15;
        const CMD_TIMEOUT = 1 << 16;
        const DATA_TIMEOUT = 1 << 20;
    }
}

impl Interrupt {
    /// Every error bit lives in the top half of the register.
    const ERROR_MASK: u32 = 0xFFFF_0000;
    /// All status and error bits this driver ever looks at.
    const ALL_MASK: u32 = 0xFFFF_003F;
}

bitflags! {
    /// CONTROL1 register fields
    struct Control1: u32 {
        /// Internal clock enable.
        const CLK_INTLEN = 1 << 0;
        /// Internal clock stable (read-only).
        const CLK_STABLE = 1 << 1;
        /// SD clock enable.
        const CLK_EN = 1 << 2;
        /// Soft reset of the whole host circuit; self-clearing.
        const SRST_HC = 1 << 24;
    }
}

/// Data timeout unit exponent, maximum setting.
const TOUNIT_MAX: u32 = 0x0E << 16;

/// CONTROL0 bit enabling the 4-bit data bus on the host side.
const HCTL_DWIDTH_4BIT: u32 = 1 << 1;

// Response/transfer flags in the CMDTM register.
const RSPNS_48: u32 = 2 << 16;
const RSPNS_136: u32 = 1 << 16;
const RSPNS_48_BUSY: u32 = 3 << 16;
const IS_DATA: u32 = 1 << 21;
const DAT_DIR_CARD_TO_HOST: u32 = 1 << 4;

// SD command opcodes.
const CMD_GO_IDLE: u32 = 0;
const CMD_ALL_SEND_CID: u32 = 2;
const CMD_SEND_REL_ADDR: u32 = 3;
const ACMD_SET_BUS_WIDTH: u32 = 6;
const CMD_SELECT_CARD: u32 = 7;
const CMD_SEND_IF_COND: u32 = 8;
const CMD_SEND_CSD: u32 = 9;
const CMD_SET_BLOCKLEN: u32 = 16;
const CMD_READ_SINGLE: u32 = 17;
const CMD_WRITE_SINGLE: u32 = 24;
const ACMD_SEND_OP_COND: u32 = 41;
const CMD_APP_CMD: u32 = 55;

/// Clock targets for the two phases of the state machine.
const CLOCK_INIT_HZ: u32 = 400_000;
const CLOCK_OPERATING_HZ: u32 = 25_000_000;

/// Fallback EMMC base clock when the firmware query fails.
const CLOCK_BASE_DEFAULT_HZ: u32 = 41_666_666;

/// Errors from the EMMC driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    /// A bounded wait on the controller or the card expired.
    Timeout,
    /// The controller latched an error bit or the card misbehaved.
    Device,
    /// Operation attempted before a successful `init`.
    NotReady,
}

/// What `init` learned about the card.
#[derive(Debug, Clone, Copy)]
struct CardInfo {
    /// Relative card address, kept left-shifted in the upper halfword the
    /// way the argument register wants it.
    rca: u32,
    /// SDHC/SDXC: addresses are LBAs instead of byte offsets.
    high_capacity: bool,
    /// Total 512-byte sectors.
    sectors: u32,
}

static CARD: Mutex<Option<CardInfo>> = Mutex::new(None);

/// The EMMC register block.
struct EmmcRegs {
    blksizecnt: Mmio<u32>,
    arg1: Mmio<u32>,
    cmdtm: Mmio<u32>,
    resp0: Mmio<u32>,
    resp1: Mmio<u32>,
    resp2: Mmio<u32>,
    resp3: Mmio<u32>,
    data: Mmio<u32>,
    status: Mmio<u32>,
    control0: Mmio<u32>,
    control1: Mmio<u32>,
    interrupt: Mmio<u32>,
    irpt_mask: Mmio<u32>,
    irpt_en: Mmio<u32>,
    slotisr_ver: Mmio<u32>,
}

impl EmmcRegs {
    const fn new(base: usize) -> Self {
        EmmcRegs {
            blksizecnt: Mmio::new(base + 0x04),
            arg1: Mmio::new(base + 0x08),
            cmdtm: Mmio::new(base + 0x0C),
            resp0: Mmio::new(base + 0x10),
            resp1: Mmio::new(base + 0x14),
            resp2: Mmio::new(base + 0x18),
            resp3: Mmio::new(base + 0x1C),
            data: Mmio::new(base + 0x20),
            status: Mmio::new(base + 0x24),
            control0: Mmio::new(base + 0x28),
            control1: Mmio::new(base + 0x2C),
            interrupt: Mmio::new(base + 0x30),
            irpt_mask: Mmio::new(base + 0x34),
            irpt_en: Mmio::new(base + 0x38),
            slotisr_ver: Mmio::new(base + 0xFC),
        }
    }

    fn status(&self) -> Status {
        Status::from_bits_truncate(self.status.read())
    }
}

/// Encode a CMDTM word: opcode in the top byte, response/transfer flags
/// below it.
fn cmd_word(opcode: u32, flags: u32) -> u32 {
    (opcode << 24) | flags
}

/// Ten-bit "divided clock" divider packed into its CONTROL1 fields:
/// low eight bits at [15:8], top two at [7:6].
fn divider_bits(div: u32) -> u32 {
    ((div & 0xFF) << 8) | (((div >> 8) & 0x3) << 6)
}

/// Pick the divider for `target` Hz off a `base` Hz input clock, clamped
/// to the field's range.
fn clock_divider(base: u32, target: u32) -> u32 {
    (base / target).clamp(2, 0x3FF)
}

/// Decode total 512-byte sectors from the four CSD response words
/// (`csd[3]` holds bits 127:96).
///
/// CSD v2 (SDHC/SDXC): C_SIZE at [69:48], capacity (C_SIZE + 1) * 512 KiB.
/// CSD v1 (SDSC): C_SIZE [73:62], C_SIZE_MULT [49:47], READ_BL_LEN [83:80],
/// capacity (C_SIZE + 1) * 2^(C_SIZE_MULT + 2) * 2^READ_BL_LEN bytes.
fn capacity_from_csd(csd: [u32; 4]) -> Option<u32> {
    match (csd[3] >> 30) & 0x3 {
        1 => {
            let c_size = ((csd[2] & 0x3F) << 16) | ((csd[1] >> 16) & 0xFFFF);
            Some((c_size + 1) * 1024)
        }
        0 => {
            let read_bl_len = (csd[2] >> 16) & 0xF;
            let c_size = ((csd[2] & 0x3FF) << 2) | (csd[1] >> 30);
            let c_size_mult = (csd[1] >> 15) & 0x7;
            let bytes = ((c_size as u64) + 1) << (c_size_mult + 2 + read_bl_len);
            Some((bytes >> 9) as u32)
        }
        _ => None,
    }
}

/// Wait for the command line to go idle.
fn wait_cmd_line(regs: &EmmcRegs) -> Result<(), SdError> {
    let mut timeout = 1_000_000;
    while regs.status().contains(Status::CMD_INHIBIT) {
        if timeout == 0 {
            return Err(SdError::Timeout);
        }
        timeout -= 1;
        timer::delay_us(1);
    }
    Ok(())
}

/// Issue one command and wait for completion.
///
/// Clears stale interrupt status first; on failure the latched error bits
/// are cleared before returning, per the driver's invariant.
fn send_command(regs: &mut EmmcRegs, opcode: u32, flags: u32, arg: u32) -> Result<(), SdError> {
    wait_cmd_line(regs)?;

    regs.interrupt.write(Interrupt::ALL_MASK);
    regs.arg1.write(arg);
    regs.cmdtm.write(cmd_word(opcode, flags));

    let mut timeout = 1_000_000;
    loop {
        let irq = regs.interrupt.read();
        if irq & (Interrupt::CMD_DONE.bits() | Interrupt::ERROR_MASK) != 0 {
            if irq & Interrupt::ERROR_MASK != 0 {
                regs.interrupt.write(irq);
                return Err(SdError::Device);
            }
            regs.interrupt.write(Interrupt::CMD_DONE.bits());
            return Ok(());
        }
        if timeout == 0 {
            return Err(SdError::Timeout);
        }
        timeout -= 1;
        timer::delay_us(1);
    }
}

/// Issue an application command: CMD55 with the card's RCA, then the
/// ACMD itself.
fn send_app_command(
    regs: &mut EmmcRegs,
    rca: u32,
    opcode: u32,
    flags: u32,
    arg: u32,
) -> Result<(), SdError> {
    send_command(regs, CMD_APP_CMD, RSPNS_48, rca)?;
    send_command(regs, opcode, flags, arg)
}

/// Route GPIO 48-53 to the EMMC (ALT3) with pull-ups on the bus lines.
fn pinmux_setup() {
    for pin in 48..=53 {
        gpio::set_function(pin, gpio::PinFunction::Alt3);
    }
    let bus_pins: u64 = 0x3F << 48;
    gpio::set_pull(bus_pins, gpio::Pull::Up);
}

/// Reprogram the SD clock for `target` Hz.
///
/// The clock is disabled around the divider change and the function waits
/// for the "stable" bit before returning.
fn set_clock(regs: &mut EmmcRegs, target: u32) -> Result<(), SdError> {
    let base = mailbox::get_clock_rate(mailbox::CLOCK_EMMC).unwrap_or(CLOCK_BASE_DEFAULT_HZ);
    let div = clock_divider(base, target);
    log::debug!("sd: base clock {} Hz, divider {}", base, div);

    let mut ctrl1 = regs.control1.read();
    ctrl1 &= !Control1::CLK_EN.bits();
    regs.control1.write(ctrl1);
    timer::delay_ms(10);

    ctrl1 = regs.control1.read();
    ctrl1 &= !0xFFE0;
    ctrl1 |= divider_bits(div);
    regs.control1.write(ctrl1);
    timer::delay_ms(10);

    regs.control1.write(ctrl1 | Control1::CLK_EN.bits());

    let mut timeout = 10_000;
    while !Control1::from_bits_truncate(regs.control1.read()).contains(Control1::CLK_STABLE) {
        if timeout == 0 {
            log::error!("sd: clock failed to stabilize");
            return Err(SdError::Timeout);
        }
        timeout -= 1;
        timer::delay_us(10);
    }
    Ok(())
}

/// Bring the card from power-on to its Transfer state.
///
/// Every step can fail; the first failure aborts initialization and is
/// reported to the caller. On success the driver records the RCA, the
/// capacity class and the sector count, and read/write become usable.
pub fn init() -> Result<(), SdError> {
    let mut regs = EmmcRegs::new(EMMC_BASE);

    log::info!("sd: initializing (EMMC host)");

    // The firmware must power the slot before the controller sees a card.
    match mailbox::set_power_state(mailbox::POWER_DEVICE_SD, true) {
        Ok(state) => log::debug!("sd: power state {:#x}", state),
        Err(_) => {
            log::error!("sd: card power-on refused by firmware");
            return Err(SdError::Device);
        }
    }
    timer::delay_ms(100);

    pinmux_setup();

    let version = (regs.slotisr_ver.read() >> 16) & 0xFF;
    log::debug!("sd: host spec version {:#x}", version);

    // Soft-reset the host and wait for the bit to self-clear.
    regs.control0.write(0);
    regs.control1.write(Control1::SRST_HC.bits());
    let mut timeout = 10_000;
    while Control1::from_bits_truncate(regs.control1.read()).contains(Control1::SRST_HC) {
        if timeout == 0 {
            log::error!("sd: controller reset timed out");
            return Err(SdError::Timeout);
        }
        timeout -= 1;
        timer::delay_us(10);
    }

    // Timeout unit, internal clock, and the 400 kHz identification clock.
    regs.control1.write(Control1::CLK_INTLEN.bits() | TOUNIT_MAX);
    timer::delay_ms(10);
    set_clock(&mut regs, CLOCK_INIT_HZ)?;

    // Status reporting on, interrupt line off: the driver polls.
    regs.irpt_en.write(0);
    regs.irpt_mask.write(Interrupt::ALL_MASK);
    regs.interrupt.write(Interrupt::ALL_MASK);
    timer::delay_ms(100);

    // CMD0: no response, the card just drops to idle.
    regs.arg1.write(0);
    regs.cmdtm.write(cmd_word(CMD_GO_IDLE, 0));
    timer::delay_ms(50);
    regs.interrupt.write(Interrupt::ALL_MASK);

    // CMD8: a v2 card echoes the check pattern; a v1 card fails.
    let mut v2_card = false;
    if send_command(&mut regs, CMD_SEND_IF_COND, RSPNS_48, 0x1AA).is_ok() {
        let resp = regs.resp0.read();
        if resp & 0xFFF == 0x1AA {
            v2_card = true;
        }
    }
    log::debug!("sd: interface condition, v2={}", v2_card);

    // ACMD41 until the card reports ready. HCS is only legal for v2.
    let acmd41_arg = if v2_card { 0x40FF_8000 } else { 0x00FF_8000 };
    let mut ocr = 0;
    let mut retries = 100;
    loop {
        if send_app_command(&mut regs, 0, ACMD_SEND_OP_COND, RSPNS_48, acmd41_arg).is_ok() {
            ocr = regs.resp0.read();
            if ocr & 0x8000_0000 != 0 {
                break;
            }
        }
        if retries == 0 {
            log::error!("sd: card never became ready (ACMD41)");
            return Err(SdError::Timeout);
        }
        retries -= 1;
        timer::delay_ms(50);
    }
    let high_capacity = ocr & 0x4000_0000 != 0;
    log::info!(
        "sd: card ready, {}",
        if high_capacity { "SDHC" } else { "SDSC" }
    );

    // CMD2/CMD3: identification, then the relative address used from here
    // on. The RCA sits in the upper halfword of the response and stays
    // shifted - the argument register wants it that way.
    send_command(&mut regs, CMD_ALL_SEND_CID, RSPNS_136, 0)?;
    send_command(&mut regs, CMD_SEND_REL_ADDR, RSPNS_48, 0)?;
    let rca = regs.resp0.read() & 0xFFFF_0000;
    log::debug!("sd: rca {:#010x}", rca);

    // CMD9: capacity lives in the CSD.
    send_command(&mut regs, CMD_SEND_CSD, RSPNS_136, rca)?;
    let csd = [
        regs.resp0.read(),
        regs.resp1.read(),
        regs.resp2.read(),
        regs.resp3.read(),
    ];
    let sectors = match capacity_from_csd(csd) {
        Some(n) => n,
        None => {
            log::error!("sd: unrecognized CSD structure");
            return Err(SdError::Device);
        }
    };
    log::info!("sd: {} sectors", sectors);

    // CMD7: select the card (R1b, the card holds busy while switching).
    send_command(&mut regs, CMD_SELECT_CARD, RSPNS_48_BUSY, rca)?;

    // ACMD6 + host control: 4-bit data bus on both ends.
    send_app_command(&mut regs, rca, ACMD_SET_BUS_WIDTH, RSPNS_48, 2)?;
    let ctrl0 = regs.control0.read();
    regs.control0.write(ctrl0 | HCTL_DWIDTH_4BIT);

    // Standard-capacity cards default to CSD-derived block lengths; pin
    // them to 512. High-capacity cards are fixed at 512 already.
    if !high_capacity {
        send_command(&mut regs, CMD_SET_BLOCKLEN, RSPNS_48, SECTOR_SIZE as u32)?;
    }

    // Identification is done: full-speed clock and the block size the
    // data engine will use.
    set_clock(&mut regs, CLOCK_OPERATING_HZ)?;
    regs.blksizecnt.write(SECTOR_SIZE as u32);

    *CARD.lock() = Some(CardInfo {
        rca,
        high_capacity,
        sectors,
    });
    log::info!("sd: ready");
    Ok(())
}

/// Total sectors reported by the card, zero before `init` succeeds.
pub fn sector_count() -> u32 {
    (*CARD.lock()).map(|c| c.sectors).unwrap_or(0)
}

/// Wait for the data lines to go idle before starting a transfer.
fn wait_data_line(regs: &EmmcRegs) -> Result<(), SdError> {
    let mut timeout = 100_000;
    while regs.status().contains(Status::DAT_INHIBIT) {
        if timeout == 0 {
            return Err(SdError::Timeout);
        }
        timeout -= 1;
        timer::delay_us(1);
    }
    Ok(())
}

/// Wait until the FIFO has the given readiness bit, failing on any latched
/// error.
fn wait_fifo(regs: &mut EmmcRegs, ready: Status) -> Result<(), SdError> {
    let mut timeout = 100_000;
    loop {
        let irq = regs.interrupt.read();
        if irq & Interrupt::ERROR_MASK != 0 {
            regs.interrupt.write(irq);
            return Err(SdError::Device);
        }
        if regs.status().contains(ready) {
            return Ok(());
        }
        if timeout == 0 {
            return Err(SdError::Timeout);
        }
        timeout -= 1;
        timer::delay_us(1);
    }
}

/// Wait for the block-complete interrupt and acknowledge it.
fn wait_data_done(regs: &mut EmmcRegs) -> Result<(), SdError> {
    let mut timeout = 1_000_000;
    loop {
        let irq = regs.interrupt.read();
        if irq & Interrupt::ERROR_MASK != 0 {
            regs.interrupt.write(irq);
            return Err(SdError::Device);
        }
        if irq & Interrupt::DATA_DONE.bits() != 0 {
            regs.interrupt.write(Interrupt::DATA_DONE.bits());
            return Ok(());
        }
        if timeout == 0 {
            return Err(SdError::Timeout);
        }
        timeout -= 1;
        timer::delay_us(1);
    }
}

/// Start a single-block transfer command for block `blk` of the request.
fn start_block(
    regs: &mut EmmcRegs,
    opcode: u32,
    dir_flags: u32,
    base_addr: u32,
    blk: u32,
    high_capacity: bool,
) -> Result<(), SdError> {
    wait_data_line(regs)?;

    regs.blksizecnt.write((1 << 16) | SECTOR_SIZE as u32);
    let arg = base_addr + if high_capacity { blk } else { blk * SECTOR_SIZE as u32 };
    send_command(regs, opcode, RSPNS_48 | IS_DATA | dir_flags, arg)
}

/// Read `count` sectors starting at `lba`.
///
/// Multi-sector requests are a loop of single-block CMD17 transfers; each
/// block is drained from the FIFO 128 words at a time as the controller
/// signals read-available.
pub fn read(lba: u32, count: u32, buf: &mut [u8]) -> Result<(), SdError> {
    let card = (*CARD.lock()).ok_or(SdError::NotReady)?;
    let mut regs = EmmcRegs::new(EMMC_BASE);
    let base_addr = if card.high_capacity {
        lba
    } else {
        lba * SECTOR_SIZE as u32
    };

    for blk in 0..count {
        start_block(
            &mut regs,
            CMD_READ_SINGLE,
            DAT_DIR_CARD_TO_HOST,
            base_addr,
            blk,
            card.high_capacity,
        )?;

        let sector = &mut buf[blk as usize * SECTOR_SIZE..(blk as usize + 1) * SECTOR_SIZE];
        for word in sector.chunks_exact_mut(4) {
            wait_fifo(&mut regs, Status::READ_AVAILABLE)?;
            word.copy_from_slice(&regs.data.read().to_le_bytes());
        }

        wait_data_done(&mut regs)?;
    }
    Ok(())
}

/// Write `count` sectors starting at `lba`.
///
/// Symmetric to `read`: single-block CMD24 transfers, pushing words only
/// while the FIFO advertises room.
pub fn write(lba: u32, count: u32, buf: &[u8]) -> Result<(), SdError> {
    let card = (*CARD.lock()).ok_or(SdError::NotReady)?;
    let mut regs = EmmcRegs::new(EMMC_BASE);
    let base_addr = if card.high_capacity {
        lba
    } else {
        lba * SECTOR_SIZE as u32
    };

    for blk in 0..count {
        start_block(
            &mut regs,
            CMD_WRITE_SINGLE,
            0,
            base_addr,
            blk,
            card.high_capacity,
        )?;

        let sector = &buf[blk as usize * SECTOR_SIZE..(blk as usize + 1) * SECTOR_SIZE];
        for word in sector.chunks_exact(4) {
            wait_fifo(&mut regs, Status::WRITE_AVAILABLE)?;
            regs.data
                .write(u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
        }

        wait_data_done(&mut regs)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_word_encoding() {
        assert_eq!(cmd_word(CMD_GO_IDLE, 0), 0);
        assert_eq!(cmd_word(CMD_SEND_IF_COND, RSPNS_48), 0x0802_0000);
        assert_eq!(
            cmd_word(CMD_READ_SINGLE, RSPNS_48 | IS_DATA | DAT_DIR_CARD_TO_HOST),
            0x1122_0010
        );
        assert_eq!(
            cmd_word(CMD_WRITE_SINGLE, RSPNS_48 | IS_DATA),
            0x1822_0000
        );
    }

    #[test]
    fn divider_selection() {
        // 41.666 MHz base down to the 400 kHz identification clock.
        assert_eq!(clock_divider(41_666_666, 400_000), 104);
        // Full speed asks for less than the minimum divider.
        assert_eq!(clock_divider(41_666_666, 25_000_000), 2);
        // Absurd target clamps at the field maximum.
        assert_eq!(clock_divider(500_000_000, 400), 0x3FF);
    }

    #[test]
    fn divider_field_packing() {
        assert_eq!(divider_bits(104), 104 << 8);
        // A ten-bit divider splits across the two fields.
        assert_eq!(divider_bits(0x3FF), (0xFF << 8) | (0x3 << 6));
    }

    #[test]
    fn csd_v2_capacity() {
        // C_SIZE = 0x3B37 (15159) -> (15159 + 1) * 1024 sectors (~7.7 GB).
        let c_size: u32 = 0x3B37;
        let csd = [0, (c_size & 0xFFFF) << 16, (c_size >> 16) & 0x3F, 1 << 30];
        assert_eq!(capacity_from_csd(csd), Some((c_size + 1) * 1024));
    }

    #[test]
    fn csd_v1_capacity() {
        // READ_BL_LEN = 9 (512 B), C_SIZE = 4095, C_SIZE_MULT = 7:
        // (4095 + 1) * 2^(7+2) * 2^9 bytes = 1 GiB = 2,097,152 sectors.
        let read_bl_len: u32 = 9;
        let c_size: u32 = 4095;
        let c_size_mult: u32 = 7;
        let csd = [
            0,
            ((c_size & 0x3) << 30) | (c_size_mult << 15),
            (read_bl_len << 16) | (c_size >> 2),
            0, // CSD_STRUCTURE = 0
        ];
        assert_eq!(capacity_from_csd(csd), Some(2_097_152));
    }

    #[test]
    fn csd_reserved_structure_rejected() {
        assert_eq!(capacity_from_csd([0, 0, 0, 0x2 << 30]), None);
    }
}
