//! sdspi-diskio - SD/MMC Protocol
//!
//! Implements the SD/MMC protocol on some generic byte [`Transport`].
//!
//! This is currently optimised for readability and debugability, not
//! performance.

mod busy;
mod init;
pub mod policy;
pub mod proto;
pub mod registers;
pub mod transport;

use busy::CardSession;

use embedded_hal::blocking::delay::DelayUs;

use crate::block_device::{Block, BlockCount, BlockDevice, BlockIdx};
use policy::RetryPolicy;
use proto::*;
use registers::{Cid, Csd, SdStatus};
use transport::{Transport, TransportError};

#[cfg(feature = "log")]
use log::{debug, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};

/// The possible errors `SdCard` can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// We got an error from the SPI peripheral
    Transport,
    /// Couldn't set the chip select pin
    GpioError,
    /// The card has not been initialised
    NotReady,
    /// The card never answered the reset command
    CardNotFound,
    /// We didn't get a response when waiting for the card to not be busy
    TimeoutWaitNotBusy,
    /// We didn't get a valid response when executing this command
    TimeoutCommand(u8),
    /// The card never left the idle state while this application command was repeated
    TimeoutACommand(u8),
    /// We didn't get a data start token when reading data from the card
    TimeoutReadBuffer,
    /// We didn't get a data response after writing a block
    TimeoutWriteResponse,
    /// The card answered this command with an unexpected R1 response
    CommandError(u8, u8),
    /// The card rejected the voltage range or the check pattern of CMD8
    InterfaceConditionError,
    /// Something other than a data start token preceded a block
    BadDataToken(u8),
    /// The card did not accept a written block. Contains the data response.
    WriteRejected(u8),
    /// The operation is not supported by this type of card
    Unsupported,
    /// The block index does not fit the card's address space
    AddressOutOfRange,
    /// A bad argument was passed in (e.g. an empty block list)
    ParamError,
}

/// The broad classes of [`Error`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Never initialised, or the wrong drive
    NotReady,
    /// A bounded wait for a response, token or ready signal ran out
    ProtocolTimeout,
    /// The card sent something we did not expect
    FramingError,
    /// The request itself was bad
    ParamError,
    /// The SPI peripheral or the chip select pin failed
    Transport,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotReady => ErrorKind::NotReady,
            Error::CardNotFound
            | Error::TimeoutWaitNotBusy
            | Error::TimeoutCommand(_)
            | Error::TimeoutACommand(_)
            | Error::TimeoutReadBuffer
            | Error::TimeoutWriteResponse => ErrorKind::ProtocolTimeout,
            Error::CommandError(..)
            | Error::InterfaceConditionError
            | Error::BadDataToken(_)
            | Error::WriteRejected(_) => ErrorKind::FramingError,
            Error::Unsupported | Error::AddressOutOfRange | Error::ParamError => {
                ErrorKind::ParamError
            }
            Error::Transport | Error::GpioError => ErrorKind::Transport,
        }
    }

    /// Turn an unwanted R1 response to `command` into an error.
    pub(crate) fn from_response(command: Command, response: u8) -> Error {
        if is_valid_r1(response) {
            Error::CommandError(command.index(), response)
        } else if command == Command::GO_IDLE_STATE {
            Error::CardNotFound
        } else {
            Error::TimeoutCommand(command.index())
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Spi => Error::Transport,
            TransportError::ChipSelect => Error::GpioError,
        }
    }
}

bitflags::bitflags! {
    /// The kind of card found by [`SdCard::initialize`].
    #[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
    pub struct CardType: u8 {
        /// MultiMediaCard
        const MMC = 0x01;
        /// SD card, version 1
        const SD1 = 0x02;
        /// SD card, version 2 or later
        const SD2 = 0x04;
        /// Any SD card
        const SDC = Self::SD1.bits | Self::SD2.bits;
        /// Addressed by block rather than by byte (SDHC / SDXC)
        const BLOCK = 0x08;
    }
}

impl CardType {
    /// Turn a block index into the argument of a read or write command.
    pub fn address(self, block: BlockIdx) -> Result<u32, Error> {
        if self.contains(CardType::BLOCK) {
            Ok(block.0)
        } else {
            block
                .0
                .checked_mul(Block::LEN_U32)
                .ok_or(Error::AddressOutOfRange)
        }
    }
}

/// Whether a disk can be used.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DiskStatus {
    /// [`SdCard::initialize`] has not succeeded yet
    Uninitialized,
    /// The card is identified and ready for transfers
    Ready,
}

/// An SD or MMC card on a byte [`Transport`].
///
/// Nothing can be read or written until [`SdCard::initialize`] has
/// identified the card.
pub struct SdCard<T, D>
where
    T: Transport,
    D: DelayUs<u32>,
{
    transport: T,
    delay: D,
    policy: RetryPolicy,
    card_type: CardType,
    status: DiskStatus,
}

impl<T, D> SdCard<T, D>
where
    T: Transport,
    D: DelayUs<u32>,
{
    /// Create a new driver using the default retry bounds.
    pub fn new(transport: T, delay: D) -> Self {
        Self::with_policy(transport, delay, RetryPolicy::default())
    }

    /// Create a new driver with custom retry bounds.
    pub fn with_policy(transport: T, delay: D, policy: RetryPolicy) -> Self {
        SdCard {
            transport,
            delay,
            policy,
            card_type: CardType::empty(),
            status: DiskStatus::Uninitialized,
        }
    }

    /// Give the transport and the delay back.
    pub fn free(self) -> (T, D) {
        (self.transport, self.delay)
    }

    /// Get a temporary borrow on the underlying transport.
    pub fn transport<R, F>(&mut self, func: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        func(&mut self.transport)
    }

    /// The current disk status.
    pub fn status(&self) -> DiskStatus {
        self.status
    }

    /// The type of card found by the last successful initialisation.
    pub fn card_type(&self) -> Option<CardType> {
        match self.status {
            DiskStatus::Ready => Some(self.card_type),
            DiskStatus::Uninitialized => None,
        }
    }

    /// Identify the card and bring it out of idle.
    pub fn initialize(&mut self) -> DiskStatus {
        if let Err(e) = self.try_initialize() {
            warn!("card initialisation failed: {:?}", e);
        }
        self.status
    }

    /// Identify the card and bring it out of idle, reporting why it failed.
    pub fn try_initialize(&mut self) -> Result<CardType, Error> {
        debug!("initialising card with {:?}", self.policy);
        let result = {
            let mut card = self.session();
            init::identify(&mut card)
        };
        match result {
            Ok(card_type) => {
                debug!("card type: {:?}", card_type);
                self.card_type = card_type;
                self.status = DiskStatus::Ready;
                Ok(card_type)
            }
            Err(e) => {
                self.card_type = CardType::empty();
                self.status = DiskStatus::Uninitialized;
                Err(e)
            }
        }
    }

    fn session(&mut self) -> CardSession<'_, T, D> {
        CardSession::new(&mut self.transport, &mut self.delay, &self.policy)
    }

    fn ready_card(&self) -> Result<CardType, Error> {
        self.card_type().ok_or(Error::NotReady)
    }

    /// Run `f` against the card. The card is always released afterwards,
    /// even if `f` fails.
    fn with_card<F, R>(&mut self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut CardSession<T, D>) -> Result<R, Error>,
    {
        let mut card = self.session();
        f(&mut card)
    }

    /// Read one or more blocks, starting at the given block index.
    ///
    /// Either every block arrives or the whole read is an error.
    pub fn read_blocks(&mut self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Error> {
        let card_type = self.ready_card()?;
        if blocks.is_empty() {
            return Err(Error::ParamError);
        }
        let address = card_type.address(start_block_idx)?;
        self.with_card(|card| {
            let command = if blocks.len() > 1 {
                Command::READ_MULTIPLE_BLOCK
            } else {
                Command::READ_SINGLE_BLOCK
            };
            card.card_command_expect(command, address, R1_READY_STATE)?;

            let mut outcome = Ok(());
            for block in blocks.iter_mut() {
                if let Err(e) = card.receive_block(&mut block.contents) {
                    warn!("read of {:?} failed: {:?}", start_block_idx, e);
                    outcome = Err(e);
                    break;
                }
            }

            if command == Command::READ_MULTIPLE_BLOCK {
                card.card_command(Command::STOP_TRANSMISSION, 0)?;
            }
            outcome
        })
    }

    /// Write one or more blocks, starting at the given block index.
    ///
    /// Either every block is accepted or the whole write is an error.
    pub fn write_blocks(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Error> {
        let card_type = self.ready_card()?;
        if blocks.is_empty() {
            return Err(Error::ParamError);
        }
        let address = card_type.address(start_block_idx)?;
        self.with_card(|card| {
            if blocks.len() == 1 {
                card.card_command_expect(Command::WRITE_BLOCK, address, R1_READY_STATE)?;
                return card.transmit_block(DATA_START_BLOCK, &blocks[0].contents);
            }

            if card_type.intersects(CardType::SDC) {
                // Only a hint, the card may ignore it.
                card.card_command(Command::SET_WR_BLK_ERASE_COUNT, blocks.len() as u32)?;
            }
            card.card_command_expect(Command::WRITE_MULTIPLE_BLOCK, address, R1_READY_STATE)?;

            let mut outcome = Ok(());
            for block in blocks.iter() {
                if let Err(e) = card.transmit_block(WRITE_MULTIPLE_TOKEN, &block.contents) {
                    warn!("write of {:?} failed: {:?}", start_block_idx, e);
                    outcome = Err(e);
                    break;
                }
            }

            // A card that stays busy keeps the last block outstanding.
            match card.wait_ready() {
                Ok(()) => card.send(STOP_TRAN_TOKEN)?,
                Err(e) => outcome = outcome.and(Err(e)),
            }
            outcome
        })
    }

    /// Wait for the card to finish any internal write.
    pub fn sync(&mut self) -> Result<(), Error> {
        self.ready_card()?;
        self.with_card(|card| card.select())
    }

    /// Read the 'card specific data' block.
    pub fn read_csd(&mut self) -> Result<Csd, Error> {
        let card_type = self.ready_card()?;
        let data = self.read_register(Command::SEND_CSD)?;
        if card_type.contains(CardType::MMC) {
            // MMC CSD versions all share the legacy layout.
            Ok(Csd::legacy(data))
        } else {
            Ok(Csd::from_bytes(data))
        }
    }

    /// Read the 'card identification' block.
    pub fn read_cid(&mut self) -> Result<Cid, Error> {
        self.ready_card()?;
        let data = self.read_register(Command::SEND_CID)?;
        Ok(Cid { data })
    }

    fn read_register(&mut self, command: Command) -> Result<[u8; 16], Error> {
        self.with_card(|card| {
            card.card_command_expect(command, 0, R1_READY_STATE)?;
            let mut data = [0u8; 16];
            card.receive_block(&mut data)?;
            Ok(data)
        })
    }

    /// Read the first 16 bytes of the SD status register.
    pub fn read_sd_status(&mut self) -> Result<SdStatus, Error> {
        let card_type = self.ready_card()?;
        if !card_type.contains(CardType::SD2) {
            return Err(Error::Unsupported);
        }
        self.with_card(|card| {
            card.card_command_expect(Command::SD_STATUS, 0, R1_READY_STATE)?;
            // Second byte of the R2 response.
            card.receive()?;
            let mut status = SdStatus::default();
            card.receive_block(&mut status.data)?;
            card.skip(SdStatus::REGISTER_LEN - status.data.len())?;
            Ok(status)
        })
    }

    /// Determine how many 512-byte sectors this card holds.
    pub fn sector_count(&mut self) -> Result<BlockCount, Error> {
        let csd = self.read_csd()?;
        debug!("CSD: {:?}", csd);
        Ok(BlockCount(csd.card_capacity_blocks()))
    }

    /// Return the usable size of this card in bytes.
    pub fn card_size_bytes(&mut self) -> Result<u64, Error> {
        let csd = self.read_csd()?;
        Ok(csd.card_capacity_bytes())
    }

    /// The erase granularity of the card, in 512-byte sectors.
    pub fn allocation_unit_sectors(&mut self) -> Result<u32, Error> {
        let card_type = self.ready_card()?;
        if card_type.contains(CardType::SD2) {
            let status = self.read_sd_status()?;
            return Ok(status.allocation_unit_sectors());
        }
        match self.read_csd()? {
            Csd::V1(csd) if card_type.contains(CardType::MMC) => Ok(csd.mmc_erase_group_sectors()),
            csd => Ok(csd.erase_sector_sectors()),
        }
    }

    /// Can this card erase single blocks?
    pub fn erase_single_block_enabled(&mut self) -> Result<bool, Error> {
        let csd = self.read_csd()?;
        Ok(csd.erase_single_block_enabled())
    }

    /// Erase the blocks from `first_block` to `last_block`, inclusive.
    pub fn erase(&mut self, first_block: BlockIdx, last_block: BlockIdx) -> Result<(), Error> {
        let card_type = self.ready_card()?;
        if !card_type.intersects(CardType::SDC) {
            return Err(Error::Unsupported);
        }
        if last_block < first_block {
            return Err(Error::ParamError);
        }
        let first = card_type.address(first_block)?;
        let last = card_type.address(last_block)?;
        self.with_card(|card| {
            card.card_command_expect(Command::ERASE_WR_BLK_START, first, R1_READY_STATE)?;
            card.card_command_expect(Command::ERASE_WR_BLK_END, last, R1_READY_STATE)?;
            card.card_command_expect(Command::ERASE, 0, R1_READY_STATE)?;
            card.wait_ready()
        })
    }
}

impl<T, D> BlockDevice for SdCard<T, D>
where
    T: Transport,
    D: DelayUs<u32>,
{
    type Error = Error;

    fn read(&mut self, blocks: &mut [Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.read_blocks(blocks, start_block_idx)
    }

    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.write_blocks(blocks, start_block_idx)
    }

    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        self.sector_count()
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
