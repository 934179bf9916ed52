//! sdspi-diskio - Disk interface
//!
//! The drive-indexed entry points a FatFs-style filesystem layer expects
//! from its storage backend. Exactly one drive, number 0, is served.

use embedded_hal::blocking::delay::DelayUs;

use crate::block_device::{Block, BlockIdx};
use crate::sdmmc::transport::Transport;
use crate::sdmmc::{DiskStatus, Error, ErrorKind, SdCard};

#[cfg(feature = "log")]
use log::warn;

#[cfg(feature = "defmt-log")]
use defmt::warn;

/// All sectors are this long. Variable sector sizes are not supported.
pub const SECTOR_SIZE: u16 = 512;

const _: () = assert!(SECTOR_SIZE as usize == Block::LEN);

/// The number of a physical drive.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DriveIdx(pub u8);

/// Result codes of the disk interface.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DiskError {
    /// The transfer or query failed
    Error,
    /// The drive does not exist or is not initialised
    NotReady,
    /// The request code is not supported
    ParamError,
}

impl From<Error> for DiskError {
    fn from(e: Error) -> Self {
        match e.kind() {
            ErrorKind::NotReady => DiskError::NotReady,
            ErrorKind::ParamError => DiskError::ParamError,
            ErrorKind::ProtocolTimeout | ErrorKind::FramingError | ErrorKind::Transport => {
                DiskError::Error
            }
        }
    }
}

/// Transfers only ever report `Error` or `NotReady`. An empty buffer or a
/// sector the card cannot address is an `Error` here.
fn transfer_error(e: Error) -> DiskError {
    match DiskError::from(e) {
        DiskError::ParamError => DiskError::Error,
        other => other,
    }
}

/// Control requests, numbered as FatFs numbers them.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoctlRequest {
    /// Finish pending writes
    Sync,
    /// Number of sectors on the drive
    GetSectorCount,
    /// Size of a sector in bytes
    GetSectorSize,
    /// Erase block size in sectors
    GetBlockSize,
    /// Anything else
    Other(u8),
}

impl From<u8> for IoctlRequest {
    fn from(code: u8) -> Self {
        match code {
            0 => IoctlRequest::Sync,
            1 => IoctlRequest::GetSectorCount,
            2 => IoctlRequest::GetSectorSize,
            3 => IoctlRequest::GetBlockSize,
            other => IoctlRequest::Other(other),
        }
    }
}

/// What a successful control request produced.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoctlData {
    /// The request has no result
    None,
    /// Result of [`IoctlRequest::GetSectorCount`]
    SectorCount(u32),
    /// Result of [`IoctlRequest::GetSectorSize`]
    SectorSize(u16),
    /// Result of [`IoctlRequest::GetBlockSize`]
    BlockSize(u32),
}

/// The storage backend of a filesystem layer.
///
/// Callers must serialise access; the `&mut self` receivers take care of
/// that within one program.
pub trait DiskIo {
    /// The status of `drive`.
    fn status(&self, drive: DriveIdx) -> DiskStatus;
    /// Bring `drive` up.
    fn initialize(&mut self, drive: DriveIdx) -> DiskStatus;
    /// Read `blocks.len()` sectors starting at `sector`. Fails with
    /// `NotReady` or `Error`, never `ParamError`.
    fn read(&mut self, drive: DriveIdx, blocks: &mut [Block], sector: BlockIdx) -> Result<(), DiskError>;
    /// Write `blocks.len()` sectors starting at `sector`. Fails with
    /// `NotReady` or `Error`, never `ParamError`.
    fn write(&mut self, drive: DriveIdx, blocks: &[Block], sector: BlockIdx) -> Result<(), DiskError>;
    /// Miscellaneous drive control.
    fn ioctl(&mut self, drive: DriveIdx, request: IoctlRequest) -> Result<IoctlData, DiskError>;
}

/// A [`DiskIo`] serving one SD/MMC card as drive 0.
pub struct SdDisk<T, D>
where
    T: Transport,
    D: DelayUs<u32>,
{
    card: SdCard<T, D>,
}

impl<T, D> SdDisk<T, D>
where
    T: Transport,
    D: DelayUs<u32>,
{
    /// The only drive number served.
    pub const DRIVE: DriveIdx = DriveIdx(0);

    /// Serve `card` as drive 0.
    pub fn new(card: SdCard<T, D>) -> Self {
        SdDisk { card }
    }

    /// Borrow the underlying card driver.
    pub fn card(&mut self) -> &mut SdCard<T, D> {
        &mut self.card
    }

    /// Give the card driver back.
    pub fn free(self) -> SdCard<T, D> {
        self.card
    }

    fn check_drive(&self, drive: DriveIdx) -> Result<(), DiskError> {
        if drive == Self::DRIVE && self.card.status() == DiskStatus::Ready {
            Ok(())
        } else {
            Err(DiskError::NotReady)
        }
    }
}

impl<T, D> DiskIo for SdDisk<T, D>
where
    T: Transport,
    D: DelayUs<u32>,
{
    fn status(&self, drive: DriveIdx) -> DiskStatus {
        if drive != Self::DRIVE {
            return DiskStatus::Uninitialized;
        }
        self.card.status()
    }

    fn initialize(&mut self, drive: DriveIdx) -> DiskStatus {
        if drive != Self::DRIVE {
            warn!("no such drive: {:?}", drive);
            return DiskStatus::Uninitialized;
        }
        self.card.initialize()
    }

    fn read(&mut self, drive: DriveIdx, blocks: &mut [Block], sector: BlockIdx) -> Result<(), DiskError> {
        self.check_drive(drive)?;
        self.card.read_blocks(blocks, sector).map_err(transfer_error)
    }

    fn write(&mut self, drive: DriveIdx, blocks: &[Block], sector: BlockIdx) -> Result<(), DiskError> {
        self.check_drive(drive)?;
        self.card.write_blocks(blocks, sector).map_err(transfer_error)
    }

    fn ioctl(&mut self, drive: DriveIdx, request: IoctlRequest) -> Result<IoctlData, DiskError> {
        self.check_drive(drive)?;
        match request {
            IoctlRequest::Sync => {
                self.card.sync()?;
                Ok(IoctlData::None)
            }
            IoctlRequest::GetSectorCount => {
                let count = self.card.sector_count()?;
                Ok(IoctlData::SectorCount(count.0))
            }
            IoctlRequest::GetSectorSize => Ok(IoctlData::SectorSize(SECTOR_SIZE)),
            IoctlRequest::GetBlockSize => {
                let sectors = self.card.allocation_unit_sectors()?;
                Ok(IoctlData::BlockSize(sectors))
            }
            IoctlRequest::Other(code) => {
                warn!("unsupported ioctl: {}", code);
                Err(DiskError::ParamError)
            }
        }
    }
}
