use embedded_hal::blocking::delay::DelayUs;

use super::policy::RetryPolicy;
use super::proto::*;
use super::transport::Transport;
use super::Error;

#[cfg(feature = "log")]
use log::{trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{trace, warn};

/// One conversation with the card.
///
/// Owns the command framing and the block framing. The card is released
/// when the session is dropped, so every exit path of a driver operation
/// goes through exactly one final release.
pub(crate) struct CardSession<'a, T, D>
where
    T: Transport,
    D: DelayUs<u32>,
{
    transport: &'a mut T,
    delay: &'a mut D,
    policy: &'a RetryPolicy,
}

impl<'a, T, D> Drop for CardSession<'a, T, D>
where
    T: Transport,
    D: DelayUs<u32>,
{
    fn drop(&mut self) {
        self.release().ok();
    }
}

impl<'a, T, D> CardSession<'a, T, D>
where
    T: Transport,
    D: DelayUs<u32>,
{
    pub fn new(transport: &'a mut T, delay: &'a mut D, policy: &'a RetryPolicy) -> Self {
        CardSession {
            transport,
            delay,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.policy
    }

    pub fn pause(&mut self, us: u32) {
        self.delay.delay_us(us);
    }

    /// Send one byte and receive one byte.
    fn exchange(&mut self, out: u8) -> Result<u8, Error> {
        Ok(self.transport.exchange(out)?)
    }

    /// Receive a byte from the SD card by clocking out a filler byte.
    pub fn receive(&mut self) -> Result<u8, Error> {
        self.exchange(FILLER_BYTE)
    }

    /// Send a byte to the SD card, ignoring whatever comes back.
    pub fn send(&mut self, out: u8) -> Result<(), Error> {
        let _ = self.exchange(out)?;
        Ok(())
    }

    /// Fill `buffer` with bytes clocked in from the card.
    pub fn receive_into(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        for b in buffer.iter_mut() {
            *b = self.receive()?;
        }
        Ok(())
    }

    /// Clock in and throw away `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<(), Error> {
        for _ in 0..count {
            self.receive()?;
        }
        Ok(())
    }

    /// Power-up sequence: wait for the supply to settle, then give the card
    /// 80 clocks with chip select deasserted.
    pub fn power_up(&mut self) -> Result<(), Error> {
        let us = self.policy.power_up_delay_us;
        self.pause(us);
        self.transport.deassert_cs()?;
        self.skip(10)
    }

    /// Spin until the card returns 0xFF, or we spin too many times and
    /// timeout.
    pub fn wait_ready(&mut self) -> Result<(), Error> {
        for _ in 0..self.policy.ready_polls {
            if self.receive()? == IDLE_BYTE {
                return Ok(());
            }
            let us = self.policy.ready_poll_interval_us;
            self.pause(us);
        }
        Err(Error::TimeoutWaitNotBusy)
    }

    /// Assert chip select and wait for the card to be ready. A card that
    /// never gets ready stays selected until the session ends.
    pub fn select(&mut self) -> Result<(), Error> {
        self.transport.assert_cs()?;
        // Lets a card sharing the bus drive MISO.
        self.receive()?;
        self.wait_ready()
    }

    /// Deassert chip select. The trailing byte makes the card let go of MISO.
    pub fn release(&mut self) -> Result<(), Error> {
        self.transport.deassert_cs()?;
        self.receive()?;
        Ok(())
    }

    /// Perform a command and return its R1 response.
    ///
    /// Responses with the top bit set mean the card never answered.
    pub fn card_command(&mut self, command: Command, arg: u32) -> Result<u8, Error> {
        let mut command = command;
        if command.is_app_specific() {
            let response = self.card_command(Command::APP_CMD, 0)?;
            if response > R1_IDLE_STATE {
                return Ok(response);
            }
            command = command.without_app_flag();
        }

        // The card is mid-stream when we stop a read, so don't reselect it.
        if command != Command::STOP_TRANSMISSION {
            self.release()?;
            match self.select() {
                Ok(()) => {}
                Err(Error::TimeoutWaitNotBusy) => {
                    warn!("card not ready for CMD{}", command.index());
                    return Ok(IDLE_BYTE);
                }
                Err(e) => return Err(e),
            }
        }

        for b in command.frame(arg).iter() {
            self.send(*b)?;
        }

        // The card already preloaded a data byte, skip it.
        if command == Command::STOP_TRANSMISSION {
            self.receive()?;
        }

        let mut response = IDLE_BYTE;
        for _ in 0..self.policy.response_polls {
            response = self.receive()?;
            if is_valid_r1(response) {
                break;
            }
        }
        trace!("CMD{}({:#x}) -> {:#x}", command.index(), arg, response);
        Ok(response)
    }

    /// Perform a command and insist on a particular R1 response.
    pub fn card_command_expect(
        &mut self,
        command: Command,
        arg: u32,
        expected: u8,
    ) -> Result<(), Error> {
        let response = self.card_command(command, arg)?;
        if response == expected {
            Ok(())
        } else {
            Err(Error::from_response(command, response))
        }
    }

    /// Receive a data block. Always fills the given buffer, so make sure it's
    /// the right size. The CRC is clocked in and dropped.
    pub fn receive_block(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        let mut token = IDLE_BYTE;
        for _ in 0..self.policy.data_token_polls {
            token = self.receive()?;
            if token != IDLE_BYTE {
                break;
            }
            let us = self.policy.data_token_interval_us;
            self.pause(us);
        }
        match token {
            DATA_START_BLOCK => {}
            IDLE_BYTE => return Err(Error::TimeoutReadBuffer),
            other => return Err(Error::BadDataToken(other)),
        }

        self.receive_into(buffer)?;
        self.skip(2)
    }

    /// Send a data block behind `token` and wait for the card to accept it.
    /// A dummy CRC is sent; the card is not checking.
    pub fn transmit_block(&mut self, token: u8, buffer: &[u8]) -> Result<(), Error> {
        self.wait_ready()?;
        self.send(token)?;
        for &b in buffer.iter() {
            self.send(b)?;
        }
        self.send(FILLER_BYTE)?;
        self.send(FILLER_BYTE)?;

        for _ in 0..self.policy.write_response_polls {
            let response = self.receive()?;
            if response == IDLE_BYTE {
                continue;
            }
            if (response & DATA_RES_MASK) == DATA_RES_ACCEPTED {
                return Ok(());
            }
            warn!("card rejected data block: {:#x}", response);
            return Err(Error::WriteRejected(response));
        }
        Err(Error::TimeoutWriteResponse)
    }
}
