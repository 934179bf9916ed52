//! sdspi-diskio - Card registers
//!
//! Decoders for the CSD, CID and SD status registers as laid out in the SD
//! and MMC physical layer specifications.

use crate::block_device::Block;

/// Card Specific Data, version 1 (SD standard capacity and every MMC)
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CsdV1 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// Card Specific Data, version 2 (SDHC and SDXC)
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct CsdV2 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// Card Specific Data
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Csd {
    /// A version 1 CSD
    V1(CsdV1),
    /// A version 2 CSD
    V2(CsdV2),
}

impl Csd {
    /// Pick the layout from the CSD_STRUCTURE bits of an SD card's CSD.
    pub fn from_bytes(data: [u8; 16]) -> Csd {
        match data[0] >> 6 {
            1 => Csd::V2(CsdV2 { data }),
            _ => Csd::V1(CsdV1 { data }),
        }
    }

    /// Decode with the version 1 layout, whatever CSD_STRUCTURE says.
    pub fn legacy(data: [u8; 16]) -> Csd {
        Csd::V1(CsdV1 { data })
    }

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        match self {
            Csd::V1(csd) => csd.card_capacity_bytes(),
            Csd::V2(csd) => csd.card_capacity_bytes(),
        }
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u32 {
        match self {
            Csd::V1(csd) => csd.card_capacity_blocks(),
            Csd::V2(csd) => csd.card_capacity_blocks(),
        }
    }

    /// Can single blocks be erased?
    pub fn erase_single_block_enabled(&self) -> bool {
        match self {
            Csd::V1(csd) => csd.erase_single_block_enabled(),
            Csd::V2(csd) => csd.erase_single_block_enabled(),
        }
    }

    /// Size of an SD erasable sector, in 512-byte blocks
    pub fn erase_sector_sectors(&self) -> u32 {
        match self {
            Csd::V1(csd) => csd.erase_sector_sectors(),
            Csd::V2(csd) => csd.erase_sector_sectors(),
        }
    }
}

impl CsdV1 {
    /// Create a new, empty, CSD
    pub fn new() -> CsdV1 {
        CsdV1::default()
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(data_read_access_time1, u8, 1, 0, 8);
    define_field!(data_read_access_time2, u8, 2, 0, 8);
    define_field!(max_data_transfer_rate, u8, 3, 0, 8);
    define_field!(card_command_classes, u16, [(4, 0, 8), (5, 4, 4)]);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(read_partial_blocks, bool, 6, 7);
    define_field!(dsr_implemented, bool, 6, 4);
    define_field!(device_size, u32, [(6, 0, 2), (7, 0, 8), (8, 6, 2)]);
    define_field!(device_size_multiplier, u8, [(9, 0, 2), (10, 7, 1)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);
    define_field!(erase_sector_size, u8, [(10, 0, 6), (11, 7, 1)]);
    define_field!(mmc_erase_group_size, u8, 10, 2, 5);
    define_field!(mmc_erase_group_multiplier, u8, [(10, 0, 2), (11, 5, 3)]);
    define_field!(write_protect_group_size, u8, 11, 0, 7);
    define_field!(write_block_length, u8, [(12, 0, 2), (13, 6, 2)]);
    define_field!(write_partial_blocks, bool, 13, 5);
    define_field!(copy_flag_set, bool, 14, 6);
    define_field!(crc, u8, 15, 1, 7);

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        let multiplier = self.device_size_multiplier() + self.read_block_length() + 2;
        (u64::from(self.device_size()) + 1) << multiplier
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u32 {
        (self.card_capacity_bytes() / u64::from(Block::LEN_U32)) as u32
    }

    /// Size of an SD erasable sector, in 512-byte blocks
    pub fn erase_sector_sectors(&self) -> u32 {
        let shift = self.write_block_length().saturating_sub(9);
        (u32::from(self.erase_sector_size()) + 1) << shift
    }

    /// Size of an MMC erase group, in 512-byte blocks
    pub fn mmc_erase_group_sectors(&self) -> u32 {
        (u32::from(self.mmc_erase_group_size()) + 1)
            * (u32::from(self.mmc_erase_group_multiplier()) + 1)
    }
}

impl CsdV2 {
    /// Create a new, empty, CSD
    pub fn new() -> CsdV2 {
        CsdV2::default()
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(data_read_access_time1, u8, 1, 0, 8);
    define_field!(max_data_transfer_rate, u8, 3, 0, 8);
    define_field!(card_command_classes, u16, [(4, 0, 8), (5, 4, 4)]);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);
    define_field!(erase_sector_size, u8, [(10, 0, 6), (11, 7, 1)]);
    define_field!(write_block_length, u8, [(12, 0, 2), (13, 6, 2)]);
    define_field!(crc, u8, 15, 1, 7);

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * 512 * 1024
    }

    /// Returns the card capacity in 512-byte blocks
    pub fn card_capacity_blocks(&self) -> u32 {
        let blocks = (u64::from(self.device_size()) + 1) << 10;
        if blocks > u64::from(u32::MAX) {
            u32::MAX
        } else {
            blocks as u32
        }
    }

    /// Size of an SD erasable sector, in 512-byte blocks
    pub fn erase_sector_sectors(&self) -> u32 {
        (u32::from(self.erase_sector_size()) + 1) << self.write_block_length().saturating_sub(9)
    }
}

/// Card Identification (SD layout)
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Cid {
    /// The 16-bytes of data in this Card Identification block
    pub data: [u8; 16],
}

impl Cid {
    define_field!(manufacturer_id, u8, 0, 0, 8);
    define_field!(oem_id, u16, [(1, 0, 8), (2, 0, 8)]);
    define_field!(product_revision, u8, 8, 0, 8);
    define_field!(serial_number, u32, [(9, 0, 8), (10, 0, 8), (11, 0, 8), (12, 0, 8)]);
    define_field!(manufacturing_month, u8, 14, 0, 4);
    define_field!(crc, u8, 15, 1, 7);

    /// The five character product name, if it is printable.
    pub fn product_name(&self) -> Option<&str> {
        core::str::from_utf8(&self.data[3..8]).ok()
    }

    /// The year the card was made.
    pub fn manufacturing_year(&self) -> u16 {
        let offset = (u16::from(self.data[13] & 0x0F) << 4) | u16::from(self.data[14] >> 4);
        2000 + offset
    }
}

/// The start of the 64-byte SD status register (ACMD13).
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SdStatus {
    /// The first 16 bytes of the register
    pub data: [u8; 16],
}

impl SdStatus {
    /// Length of the whole register on the wire
    pub const REGISTER_LEN: usize = 64;

    define_field!(bus_width, u8, 0, 6, 2);
    define_field!(secured_mode, bool, 0, 5);
    define_field!(sd_card_type, u16, [(2, 0, 8), (3, 0, 8)]);
    define_field!(size_of_protected_area, u32, [(4, 0, 8), (5, 0, 8), (6, 0, 8), (7, 0, 8)]);
    define_field!(speed_class, u8, 8, 0, 8);
    define_field!(allocation_unit_size, u8, 10, 4, 4);
    define_field!(erase_size, u16, [(11, 0, 8), (12, 0, 8)]);
    define_field!(erase_timeout, u8, 13, 2, 6);

    /// Allocation unit size in 512-byte blocks. AU_SIZE counts up from 16 KiB.
    pub fn allocation_unit_sectors(&self) -> u32 {
        16u32 << self.allocation_unit_size()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn csd_v1_sd() {
        let csd = Csd::from_bytes(hex!("00 26 00 32 5F 59 83 C8 AD DB CF FF D2 40 40 A5"));
        let v1 = match csd {
            Csd::V1(v1) => v1,
            Csd::V2(_) => panic!("wrong layout"),
        };
        assert_eq!(v1.csd_ver(), 0);
        assert_eq!(v1.card_command_classes(), 0x5f5);
        assert_eq!(v1.read_block_length(), 9);
        assert_eq!(v1.device_size(), 3874);
        assert_eq!(v1.device_size_multiplier(), 7);
        assert!(v1.erase_single_block_enabled());
        assert_eq!(v1.erase_sector_size(), 0x1F);
        assert_eq!(v1.write_block_length(), 9);
        assert_eq!(v1.crc(), 0x52);
        assert_eq!(csd.card_capacity_bytes(), 1_015_808_000);
        assert_eq!(csd.card_capacity_blocks(), 1_984_000);
        assert_eq!(csd.erase_sector_sectors(), 32);
    }

    #[test]
    fn csd_v1_with_1k_blocks() {
        let csd = Csd::from_bytes(hex!("00 7F 00 32 5B 5A 83 AF 7F FF CF 80 16 80 00 6F"));
        assert_eq!(csd.card_capacity_bytes(), 1_978_662_912);
        assert_eq!(csd.card_capacity_blocks(), 3_864_576);
        // WRITE_BL_LEN is 1024 bytes, so each erase sector is twice as long.
        assert_eq!(csd.erase_sector_sectors(), 64);
    }

    #[test]
    fn csd_v2_sdhc() {
        let csd = Csd::from_bytes(hex!("40 0E 00 32 5B 59 00 00 1D 69 7F 80 0A 40 00 8B"));
        let v2 = match csd {
            Csd::V2(v2) => v2,
            Csd::V1(_) => panic!("wrong layout"),
        };
        assert_eq!(v2.csd_ver(), 1);
        assert_eq!(v2.card_command_classes(), 0x5b5);
        assert_eq!(v2.device_size(), 7529);
        assert_eq!(csd.card_capacity_blocks(), 7_710_720);
        assert_eq!(csd.card_capacity_bytes(), 3_947_888_640);
        assert!(csd.erase_single_block_enabled());
        assert_eq!(csd.erase_sector_sectors(), 128);
    }

    #[test]
    fn csd_v2_device_size_in_bytes_8_and_9() {
        let csd = Csd::from_bytes(hex!("40 0E 00 32 5B 59 00 00 0A BE 7F 80 0A 40 00 01"));
        assert_eq!(csd.card_capacity_blocks(), (0x0ABE + 1) << 10);
        assert_eq!(csd.card_capacity_blocks(), 2_817_024);
    }

    #[test]
    fn csd_v2_sdxc_uses_all_22_bits() {
        let csd = Csd::from_bytes(hex!("40 0E 00 32 5B 59 00 01 DA BF 7F 80 0A 40 00 01"));
        assert_eq!(csd.card_capacity_blocks(), (0x01_DABF + 1) << 10);
    }

    #[test]
    fn mmc_erase_group() {
        let mut csd = CsdV1::new();
        csd.data[10] = 0x7C;
        csd.data[11] = 0xE0;
        assert_eq!(csd.mmc_erase_group_size(), 31);
        assert_eq!(csd.mmc_erase_group_multiplier(), 7);
        assert_eq!(csd.mmc_erase_group_sectors(), 256);

        // The top of ERASE_GRP_MULT lives in byte 10.
        csd.data[10] = 0x7F;
        assert_eq!(csd.mmc_erase_group_multiplier(), 31);
        assert_eq!(csd.mmc_erase_group_sectors(), 1024);
    }

    #[test]
    fn legacy_ignores_structure_bits() {
        let data = hex!("40 0E 00 32 5B 59 00 00 1D 69 7F 80 0A 40 00 8B");
        assert!(matches!(Csd::legacy(data), Csd::V1(_)));
        assert!(matches!(Csd::from_bytes(data), Csd::V2(_)));
    }

    #[test]
    fn cid() {
        let cid = Cid {
            data: hex!("03 53 44 53 55 30 38 47 80 12 34 56 78 00 C5 01"),
        };
        assert_eq!(cid.manufacturer_id(), 0x03);
        assert_eq!(cid.oem_id(), 0x5344);
        assert_eq!(cid.product_name(), Some("SU08G"));
        assert_eq!(cid.product_revision(), 0x80);
        assert_eq!(cid.serial_number(), 0x1234_5678);
        assert_eq!(cid.manufacturing_year(), 2012);
        assert_eq!(cid.manufacturing_month(), 5);
    }

    #[test]
    fn sd_status_allocation_unit() {
        let status = SdStatus {
            data: hex!("00 00 00 00 00 00 05 00 04 00 90 00 40 09 00 00"),
        };
        assert_eq!(status.sd_card_type(), 0);
        assert_eq!(status.size_of_protected_area(), 0x500);
        assert_eq!(status.speed_class(), 4);
        assert_eq!(status.allocation_unit_size(), 9);
        assert_eq!(status.allocation_unit_sectors(), 8192);
        assert_eq!(status.erase_size(), 0x0040);
        assert_eq!(status.erase_timeout(), 2);
    }
}
