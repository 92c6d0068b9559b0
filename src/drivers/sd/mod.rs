/*
 * SD Card Block Device
 *
 * Glue between the EMMC host driver and the block layer: one static
 * device instance named "sd0" that validates buffer sizes and translates
 * driver errors into block-layer errors.
 */

use crate::block::{self, BlockDevice, BlockError, SECTOR_SIZE};

pub mod emmc;

pub use emmc::SdError;

impl From<SdError> for BlockError {
    fn from(err: SdError) -> Self {
        match err {
            SdError::Timeout => BlockError::Timeout,
            SdError::Device => BlockError::Device,
            SdError::NotReady => BlockError::Invalid,
        }
    }
}

/// The SD card presented as a block device.
pub struct SdBlockDevice;

/// Single driver instance backing the "sd0" registry entry.
pub static SD_BLOCK_DEVICE: SdBlockDevice = SdBlockDevice;

impl BlockDevice for SdBlockDevice {
    fn name(&self) -> &str {
        "sd0"
    }

    fn read(&self, lba: u32, count: u32, buf: &mut [u8]) -> Result<(), BlockError> {
        if buf.len() < count as usize * SECTOR_SIZE {
            return Err(BlockError::Invalid);
        }
        emmc::read(lba, count, buf)?;
        Ok(())
    }

    fn write(&self, lba: u32, count: u32, buf: &[u8]) -> Result<(), BlockError> {
        if buf.len() < count as usize * SECTOR_SIZE {
            return Err(BlockError::Invalid);
        }
        emmc::write(lba, count, buf)?;
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        emmc::sector_count()
    }
}

/// Initialize the card and publish it in the block registry.
///
/// A failed initialization is reported but leaves the kernel running; the
/// device simply never appears in the registry.
pub fn init() -> Result<(), SdError> {
    emmc::init()?;
    block::register(&SD_BLOCK_DEVICE);
    Ok(())
}
