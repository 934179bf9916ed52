//! sdspi-diskio - Constants from the SD and MMC physical layer specifications.
//!
//! Only the subset needed to drive a card in SPI mode lives here.

/// A card command: a 6-bit index plus a marker saying whether the command
/// must be preceded by `APP_CMD` (an `ACMD`).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Command(u8);

/// Marks an application-specific command inside a [`Command`].
const APP_SPECIFIC_FLAG: u8 = 0x80;

impl Command {
    /// GO_IDLE_STATE - reset the card, entering SPI mode if CS is low
    pub const GO_IDLE_STATE: Command = Command(0);
    /// SEND_OP_COND - start MMC initialisation
    pub const SEND_OP_COND: Command = Command(1);
    /// SEND_IF_COND - verify the interface operating condition (SD v2)
    pub const SEND_IF_COND: Command = Command(8);
    /// SEND_CSD - read the Card Specific Data register
    pub const SEND_CSD: Command = Command(9);
    /// SEND_CID - read the Card Identification register
    pub const SEND_CID: Command = Command(10);
    /// STOP_TRANSMISSION - end a multiple block read
    pub const STOP_TRANSMISSION: Command = Command(12);
    /// SET_BLOCKLEN - set the block length of byte addressed cards
    pub const SET_BLOCKLEN: Command = Command(16);
    /// READ_SINGLE_BLOCK - read one data block
    pub const READ_SINGLE_BLOCK: Command = Command(17);
    /// READ_MULTIPLE_BLOCK - read data blocks until STOP_TRANSMISSION
    pub const READ_MULTIPLE_BLOCK: Command = Command(18);
    /// WRITE_BLOCK - write one data block
    pub const WRITE_BLOCK: Command = Command(24);
    /// WRITE_MULTIPLE_BLOCK - write data blocks until the stop token
    pub const WRITE_MULTIPLE_BLOCK: Command = Command(25);
    /// ERASE_WR_BLK_START - first block of an erase range
    pub const ERASE_WR_BLK_START: Command = Command(32);
    /// ERASE_WR_BLK_END - last block of an erase range
    pub const ERASE_WR_BLK_END: Command = Command(33);
    /// ERASE - erase the selected range
    pub const ERASE: Command = Command(38);
    /// APP_CMD - the next command is application specific
    pub const APP_CMD: Command = Command(55);
    /// READ_OCR - read the Operating Conditions Register
    pub const READ_OCR: Command = Command(58);
    /// SD_STATUS - read the 64 byte SD status register
    pub const SD_STATUS: Command = Command(APP_SPECIFIC_FLAG | 13);
    /// SET_WR_BLK_ERASE_COUNT - pre-erase blocks before a multiple block write
    pub const SET_WR_BLK_ERASE_COUNT: Command = Command(APP_SPECIFIC_FLAG | 23);
    /// SD_SEND_OP_COND - send host capacity support and start initialisation
    pub const SD_SEND_OP_COND: Command = Command(APP_SPECIFIC_FLAG | 41);

    /// The 6-bit command index, without the application-specific marker.
    pub const fn index(self) -> u8 {
        self.0 & 0x3F
    }

    /// Does this command need an `APP_CMD` in front of it?
    pub const fn is_app_specific(self) -> bool {
        (self.0 & APP_SPECIFIC_FLAG) != 0
    }

    /// The same command with the application-specific marker removed.
    pub const fn without_app_flag(self) -> Command {
        Command(self.0 & !APP_SPECIFIC_FLAG)
    }

    /// The last byte of the command frame.
    ///
    /// CMD0 and CMD8 are sent before the card is told to ignore CRCs, so they
    /// need a real CRC7. Everything else gets a dummy CRC with the stop bit.
    pub fn trailer(self) -> u8 {
        match self {
            Command::GO_IDLE_STATE => 0x95,
            Command::SEND_IF_COND => 0x87,
            _ => 0x01,
        }
    }

    /// Build the 6-byte frame sent over the wire.
    pub fn frame(self, arg: u32) -> [u8; 6] {
        let arg = arg.to_be_bytes();
        [
            0x40 | self.index(),
            arg[0],
            arg[1],
            arg[2],
            arg[3],
            self.trailer(),
        ]
    }
}

//==============================================================================

/// R1: card is ready, no errors
pub const R1_READY_STATE: u8 = 0x00;

/// R1: card is in the idle state
pub const R1_IDLE_STATE: u8 = 0x01;

/// R1: illegal command
pub const R1_ILLEGAL_COMMAND: u8 = 0x04;

/// R1 bytes always have the top bit clear.
pub const R1_INVALID_MASK: u8 = 0x80;

/// Is this byte a valid R1 response (error or not)?
pub const fn is_valid_r1(response: u8) -> bool {
    (response & R1_INVALID_MASK) == 0
}

/// The card holds MISO high when it has nothing to say.
pub const IDLE_BYTE: u8 = 0xFF;

/// Clocked out when we only want to clock in.
pub const FILLER_BYTE: u8 = 0xFF;

/// start data token for read or write single block
pub const DATA_START_BLOCK: u8 = 0xFE;

/// stop token for write multiple blocks
pub const STOP_TRAN_TOKEN: u8 = 0xFD;

/// start data token for write multiple blocks
pub const WRITE_MULTIPLE_TOKEN: u8 = 0xFC;

/// mask for data response tokens after a write block operation
pub const DATA_RES_MASK: u8 = 0x1F;

/// write data accepted token
pub const DATA_RES_ACCEPTED: u8 = 0x05;

/// write data rejected, CRC error
pub const DATA_RES_CRC_ERROR: u8 = 0x0B;

/// write data rejected, write error
pub const DATA_RES_WRITE_ERROR: u8 = 0x0D;

/// CMD8 argument: 2.7-3.6V supply plus the 0xAA check pattern
pub const IF_COND_ARG: u8 = 0xAA;

/// The full CMD8 argument.
pub const IF_COND_CHECK: u32 = 0x1AA;

/// ACMD41 argument: host supports high capacity cards
pub const HOST_CAPACITY_SUPPORT: u32 = 1 << 30;

/// OCR byte 0: card is high capacity (block addressed)
pub const OCR_CARD_CAPACITY_STATUS: u8 = 0x40;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reset_frame_carries_real_crc() {
        assert_eq!(
            Command::GO_IDLE_STATE.frame(0),
            [0x40, 0x00, 0x00, 0x00, 0x00, 0x95]
        );
        assert_eq!(
            Command::SEND_IF_COND.frame(IF_COND_CHECK),
            [0x48, 0x00, 0x00, 0x01, 0xAA, 0x87]
        );
    }

    #[test]
    fn argument_is_big_endian() {
        assert_eq!(
            Command::READ_SINGLE_BLOCK.frame(0x0012_3400),
            [0x51, 0x00, 0x12, 0x34, 0x00, 0x01]
        );
    }

    #[test]
    fn app_commands_strip_flag() {
        let acmd41 = Command::SD_SEND_OP_COND;
        assert!(acmd41.is_app_specific());
        assert_eq!(acmd41.index(), 41);
        assert!(!acmd41.without_app_flag().is_app_specific());
        assert_eq!(acmd41.frame(HOST_CAPACITY_SUPPORT)[0], 0x69);
        assert!(!Command::APP_CMD.is_app_specific());
    }

    #[test]
    fn r1_validity() {
        assert!(is_valid_r1(R1_READY_STATE));
        assert!(is_valid_r1(R1_ILLEGAL_COMMAND | R1_IDLE_STATE));
        assert!(!is_valid_r1(IDLE_BYTE));
    }
}
