//! sdspi-diskio - Byte transport
//!
//! The driver only ever needs to swap single bytes with the card and to move
//! the chip select line. Anything that can do that can host a card.

use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

/// Failures reported by a [`Transport`].
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The SPI peripheral failed to exchange a byte
    Spi,
    /// The chip select line could not be driven
    ChipSelect,
}

/// A full-duplex, byte-at-a-time link to one card.
pub trait Transport {
    /// Clock `out` to the card and return the byte clocked in at the same time.
    fn exchange(&mut self, out: u8) -> Result<u8, TransportError>;

    /// Drive chip select active (low).
    fn assert_cs(&mut self) -> Result<(), TransportError>;

    /// Drive chip select inactive (high).
    fn deassert_cs(&mut self) -> Result<(), TransportError>;
}

impl<T> Transport for &mut T
where
    T: Transport,
{
    fn exchange(&mut self, out: u8) -> Result<u8, TransportError> {
        (*self).exchange(out)
    }

    fn assert_cs(&mut self) -> Result<(), TransportError> {
        (*self).assert_cs()
    }

    fn deassert_cs(&mut self) -> Result<(), TransportError> {
        (*self).deassert_cs()
    }
}

/// A [`Transport`] built from an `embedded-hal` SPI peripheral and a GPIO
/// used as chip select. Chip select has to be a plain GPIO so the driver can
/// clock bytes with it deasserted during power up.
pub struct SpiTransport<SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    spi: SPI,
    cs: CS,
}

impl<SPI, CS> SpiTransport<SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    /// Wrap an SPI peripheral and its chip select pin.
    pub fn new(spi: SPI, cs: CS) -> Self {
        SpiTransport { spi, cs }
    }

    /// Give the peripheral and the pin back.
    pub fn free(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI, CS> Transport for SpiTransport<SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    fn exchange(&mut self, out: u8) -> Result<u8, TransportError> {
        self.spi
            .transfer(&mut [out])
            .map(|b| b[0])
            .map_err(|_e| TransportError::Spi)
    }

    fn assert_cs(&mut self) -> Result<(), TransportError> {
        self.cs.set_low().map_err(|_| TransportError::ChipSelect)
    }

    fn deassert_cs(&mut self) -> Result<(), TransportError> {
        self.cs.set_high().map_err(|_| TransportError::ChipSelect)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Loops MOSI back to MISO and records every byte sent.
    #[derive(Default)]
    struct Loopback {
        sent: std::vec::Vec<u8>,
    }

    impl Transfer<u8> for Loopback {
        type Error = ();
        fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], ()> {
            self.sent.extend_from_slice(words);
            Ok(words)
        }
    }

    #[derive(Default)]
    struct Pin {
        high: bool,
        broken: bool,
    }

    impl OutputPin for Pin {
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

    #[test]
    fn exchanges_through_the_peripheral() {
        let mut transport = SpiTransport::new(Loopback::default(), Pin::default());
        assert_eq!(transport.exchange(0x5A), Ok(0x5A));
        transport.deassert_cs().unwrap();
        let (spi, cs) = transport.free();
        assert_eq!(spi.sent, [0x5A]);
        assert!(cs.high);
    }

    #[test]
    fn pin_failures_are_reported() {
        let pin = Pin {
            high: false,
            broken: true,
        };
        let mut transport = SpiTransport::new(Loopback::default(), pin);
        assert_eq!(transport.assert_cs(), Err(TransportError::ChipSelect));
    }
}
