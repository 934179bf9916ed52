//! # sdspi-diskio
//!
//! > An SD/MMC over SPI block device driver written in Embedded Rust
//!
//! This crate lets a microcontroller use an SD or MMC card as a 512-byte
//! sector device over SPI. It identifies MMC, SD v1 and SD v2 cards (byte or
//! block addressed), reads and writes single or multiple sectors, and decodes
//! the card's registers for geometry queries. It is `#![no_std]` and does not
//! use `alloc`.
//!
//! On top of the driver sits a FatFs-style disk interface ([`DiskIo`]) with
//! `status`, `initialize`, `read`, `write` and `ioctl` entry points, which is
//! what a filesystem layer plugs into.
//!
//! ```rust,ignore
//! let transport = sdspi_diskio::SpiTransport::new(spi, cs);
//! let card = sdspi_diskio::SdCard::new(transport, delay);
//! let mut disk = sdspi_diskio::SdDisk::new(card);
//! let drive = sdspi_diskio::DriveIdx(0);
//! if disk.initialize(drive) == sdspi_diskio::DiskStatus::Ready {
//!     let mut blocks = [sdspi_diskio::Block::new()];
//!     disk.read(drive, &mut blocks, sdspi_diskio::BlockIdx(0))?;
//!     let sectors = disk.ioctl(drive, sdspi_diskio::IoctlRequest::GetSectorCount)?;
//! }
//! ```
//!
//! ## Features
//!
//! * `defmt-log`: By turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************


#[macro_use]
mod structure;

pub mod block_device;
pub mod disk;
pub mod sdmmc;

pub use crate::block_device::{Block, BlockCount, BlockDevice, BlockIdx};
pub use crate::disk::{DiskError, DiskIo, DriveIdx, IoctlData, IoctlRequest, SdDisk, SECTOR_SIZE};
pub use crate::sdmmc::policy::RetryPolicy;
pub use crate::sdmmc::registers::{Cid, Csd, CsdV1, CsdV2, SdStatus};
pub use crate::sdmmc::transport::{SpiTransport, Transport, TransportError};
pub use crate::sdmmc::{CardType, DiskStatus, Error as SdMmcError, ErrorKind, SdCard};

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
