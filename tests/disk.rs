use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

use sdspi_diskio::{
    DiskError, DiskIo, DiskStatus, DriveIdx, IoctlRequest, SdCard, SdDisk, SdMmcError,
    SpiTransport,
};

/// An SPI bus with nothing on it: MISO floats high.
struct EmptySocket {
    clocked: usize,
    broken: bool,
}

impl Transfer<u8> for EmptySocket {
    type Error = ();
    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], ()> {
        if self.broken {
            return Err(());
        }
        self.clocked += words.len();
        for w in words.iter_mut() {
            *w = 0xFF;
        }
        Ok(words)
    }
}

struct ChipSelect {
    high: bool,
    broken: bool,
}

impl OutputPin for ChipSelect {
    type Error = ();
    fn set_low(&mut self) -> Result<(), ()> {
        if self.broken {
            return Err(());
        }
        self.high = false;
        Ok(())
    }
    fn set_high(&mut self) -> Result<(), ()> {
        if self.broken {
            return Err(());
        }
        self.high = true;
        Ok(())
    }
}

struct Delay;

impl DelayUs<u32> for Delay {
    fn delay_us(&mut self, _us: u32) {}
}

fn card(spi_broken: bool, cs_broken: bool) -> SdCard<SpiTransport<EmptySocket, ChipSelect>, Delay> {
    let _ = env_logger::builder().is_test(true).try_init();
    let spi = EmptySocket {
        clocked: 0,
        broken: spi_broken,
    };
    let cs = ChipSelect {
        high: false,
        broken: cs_broken,
    };
    SdCard::new(SpiTransport::new(spi, cs), Delay)
}

#[test]
fn empty_socket() {
    let mut disk = SdDisk::new(card(false, false));
    assert_eq!(disk.initialize(DriveIdx(0)), DiskStatus::Uninitialized);
    assert_eq!(disk.card().try_initialize(), Err(SdMmcError::CardNotFound));
    assert_eq!(
        disk.ioctl(DriveIdx(0), IoctlRequest::GetSectorCount),
        Err(DiskError::NotReady)
    );

    let (transport, _) = disk.free().free();
    let (spi, cs) = transport.free();
    assert!(spi.clocked > 0);
    assert!(cs.high, "card left selected");
}

#[test]
fn bus_failures() {
    let mut spi_fault = card(true, false);
    assert_eq!(spi_fault.try_initialize(), Err(SdMmcError::Transport));
    assert_eq!(spi_fault.status(), DiskStatus::Uninitialized);

    let mut pin_fault = card(false, true);
    assert_eq!(pin_fault.try_initialize(), Err(SdMmcError::GpioError));
}

#[test]
fn ioctl_codes() {
    assert_eq!(IoctlRequest::from(0), IoctlRequest::Sync);
    assert_eq!(IoctlRequest::from(1), IoctlRequest::GetSectorCount);
    assert_eq!(IoctlRequest::from(2), IoctlRequest::GetSectorSize);
    assert_eq!(IoctlRequest::from(3), IoctlRequest::GetBlockSize);
    assert_eq!(IoctlRequest::from(4), IoctlRequest::Other(4));
}
