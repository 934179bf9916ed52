//! sdspi-diskio - Card identification
//!
//! Brings a card from power-on to a known [`CardType`].
//!
//! | State         | Event                                  | Next state          |
//! |---------------|----------------------------------------|---------------------|
//! | `PowerOn`     | CMD0 answered with idle                | `Idle`              |
//! | `PowerOn`     | anything else                          | `Failed`            |
//! | `Idle`        | CMD8 answered with idle                | `ProbeV2`           |
//! | `Idle`        | anything else (illegal command)        | `ProbeLegacy`       |
//! | `ProbeV2`     | R7 ok, ACMD41(HCS) ok, CMD58 ok        | `Ready(SD2[+BLOCK])`|
//! | `ProbeLegacy` | ACMD41 / CMD1 ok, CMD16 ok             | `Ready(SD1 or MMC)` |
//! | `Probe*`      | any check or retry budget fails        | `Failed`            |

use embedded_hal::blocking::delay::DelayUs;

use super::busy::CardSession;
use super::proto::*;
use super::transport::Transport;
use super::{CardType, Error};
use crate::block_device::Block;

#[cfg(feature = "log")]
use log::{debug, trace};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace};

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum InitState {
    PowerOn,
    Idle,
    ProbeV2,
    ProbeLegacy,
    Ready(CardType),
    Failed(Error),
}

/// Run the identification sequence to completion.
pub(crate) fn identify<T, D>(card: &mut CardSession<T, D>) -> Result<CardType, Error>
where
    T: Transport,
    D: DelayUs<u32>,
{
    let mut state = InitState::PowerOn;
    loop {
        trace!("init state: {:?}", state);
        state = match state {
            InitState::Ready(card_type) => return Ok(card_type),
            InitState::Failed(e) => return Err(e),
            pending => step(card, pending),
        };
    }
}

/// Make one transition. Every failure, transport errors included, lands in
/// `Failed`.
pub(crate) fn step<T, D>(card: &mut CardSession<T, D>, state: InitState) -> InitState
where
    T: Transport,
    D: DelayUs<u32>,
{
    let next = match state {
        InitState::PowerOn => reset(card),
        InitState::Idle => check_interface(card),
        InitState::ProbeV2 => probe_v2(card),
        InitState::ProbeLegacy => probe_legacy(card),
        settled => Ok(settled),
    };
    next.unwrap_or_else(InitState::Failed)
}

fn reset<T, D>(card: &mut CardSession<T, D>) -> Result<InitState, Error>
where
    T: Transport,
    D: DelayUs<u32>,
{
    card.power_up()?;
    card.card_command_expect(Command::GO_IDLE_STATE, 0, R1_IDLE_STATE)?;
    Ok(InitState::Idle)
}

fn check_interface<T, D>(card: &mut CardSession<T, D>) -> Result<InitState, Error>
where
    T: Transport,
    D: DelayUs<u32>,
{
    if card.card_command(Command::SEND_IF_COND, IF_COND_CHECK)? == R1_IDLE_STATE {
        Ok(InitState::ProbeV2)
    } else {
        Ok(InitState::ProbeLegacy)
    }
}

/// SD v2 or later. The rest of the R7 response is still waiting for us.
fn probe_v2<T, D>(card: &mut CardSession<T, D>) -> Result<InitState, Error>
where
    T: Transport,
    D: DelayUs<u32>,
{
    let mut r7 = [0u8; 4];
    card.receive_into(&mut r7)?;
    if r7[2] != 0x01 || r7[3] != IF_COND_ARG {
        debug!("CMD8 echo mismatch: {:?}", r7);
        return Err(Error::InterfaceConditionError);
    }

    wait_for_op_cond(card, Command::SD_SEND_OP_COND, HOST_CAPACITY_SUPPORT)?;

    card.card_command_expect(Command::READ_OCR, 0, R1_READY_STATE)?;
    let mut ocr = [0u8; 4];
    card.receive_into(&mut ocr)?;
    if (ocr[0] & OCR_CARD_CAPACITY_STATUS) != 0 {
        Ok(InitState::Ready(CardType::SD2 | CardType::BLOCK))
    } else {
        Ok(InitState::Ready(CardType::SD2))
    }
}

/// SD v1 or MMC. Both are byte addressed.
fn probe_legacy<T, D>(card: &mut CardSession<T, D>) -> Result<InitState, Error>
where
    T: Transport,
    D: DelayUs<u32>,
{
    let response = card.card_command(Command::SD_SEND_OP_COND, 0)?;
    let (card_type, command) = if response == R1_READY_STATE || response == R1_IDLE_STATE {
        (CardType::SD1, Command::SD_SEND_OP_COND)
    } else {
        (CardType::MMC, Command::SEND_OP_COND)
    };
    debug!("legacy card, trying {:?}", card_type);

    wait_for_op_cond(card, command, 0)?;
    card.card_command_expect(Command::SET_BLOCKLEN, Block::LEN_U32, R1_READY_STATE)?;
    Ok(InitState::Ready(card_type))
}

/// Repeat `command` until the card leaves the idle state.
fn wait_for_op_cond<T, D>(card: &mut CardSession<T, D>, command: Command, arg: u32) -> Result<(), Error>
where
    T: Transport,
    D: DelayUs<u32>,
{
    let attempts = card.policy().op_cond_attempts;
    let interval = card.policy().op_cond_interval_us;
    for _ in 0..attempts {
        if card.card_command(command, arg)? == R1_READY_STATE {
            return Ok(());
        }
        card.pause(interval);
    }
    if command.is_app_specific() {
        Err(Error::TimeoutACommand(command.index()))
    } else {
        Err(Error::TimeoutCommand(command.index()))
    }
}
