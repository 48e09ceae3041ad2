//! The seam between the protocol layer and a host controller.
//!
//! The SDIO host here is not a fixed-function controller. It is built from two
//! programmable bus state machines and one DMA channel:
//! - [`CmdChannel`] clocks the bus and shifts command/response frames on CMD.
//! - [`DataChannel`] shifts 4-bit data in or out on D0..D3.
//! - [`BlockDma`] moves words between memory and either channel's FIFO.
//!
//! A HAL implements all three plus the timing services from [`crate::sdmmc_os`]. Everything
//! protocol related (framing, CRCs, block sequencing) stays on this side of the seam.

use crate::sdmmc::SdmmcError;
use crate::sdmmc_os::{MonotonicClock, Sleep};

pub trait CmdChannel {
    /// Queue one word of a framed command for the state machine.
    fn sdmmc_cmd_put(&mut self, word: u32);

    /// Pop one response word. Only valid when [`Self::sdmmc_cmd_rx_level`] is nonzero.
    fn sdmmc_cmd_get(&mut self) -> u32;

    fn sdmmc_cmd_rx_level(&self) -> u32;

    fn sdmmc_cmd_tx_level(&self) -> u32;

    fn sdmmc_cmd_clear_fifos(&mut self);

    /// Drop whatever the state machine was doing and jump back to its idle entry point.
    /// Used to recover from a card that never answered.
    fn sdmmc_cmd_reset(&mut self);

    /// Program counter relative to the program entry, for diagnostics.
    fn sdmmc_cmd_pc(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    Receive,
    Transmit,
}

pub trait DataChannel {
    /// Load the state machine configuration for `direction`, seed its program counter and
    /// set D0..D3 to match: released for receive, driven for transmit.
    /// The state machine is left disabled.
    fn sdmmc_data_init(&mut self, direction: DataDirection);

    /// Restart the state machine and re-seed it at the entry of the `direction` program.
    /// Used between received blocks, the state machine must be disabled.
    fn sdmmc_data_restart(&mut self, direction: DataDirection);

    fn sdmmc_data_set_enabled(&mut self, enabled: bool);

    /// Turn D0..D3 back into inputs.
    fn sdmmc_data_release_pins(&mut self);

    fn sdmmc_data_put(&mut self, word: u32);

    fn sdmmc_data_get(&mut self) -> u32;

    fn sdmmc_data_rx_level(&self) -> u32;

    fn sdmmc_data_tx_level(&self) -> u32;

    /// True once the transmit state machine has shifted out everything queued and sits
    /// waiting for the next word.
    fn sdmmc_data_tx_drained(&self) -> bool;

    /// True while the card holds D0 low (programming or otherwise busy).
    fn sdmmc_data_line_busy(&self) -> bool;

    fn sdmmc_data_pc(&self) -> u32;
}

/// A one-shot DMA request. All transfers move 32-bit words.
#[derive(Debug, Clone, Copy)]
pub enum DmaRequest {
    /// Data receive FIFO into memory, byte swapped so memory ends up in wire order.
    DataRx { dst: *mut u32, words: u32 },
    /// Memory into the data transmit FIFO, byte swapped.
    DataTx { src: *const u32, words: u32 },
    /// Command receive FIFO into memory, for responses longer than the FIFO.
    CmdRx { dst: *mut u32, words: u32 },
}

pub trait BlockDma {
    /// Start `request` immediately.
    ///
    /// # Safety
    /// The memory named by the request must stay valid, and must not be touched other than
    /// through this channel, until the transfer completes or [`Self::sdmmc_dma_abort`] returns.
    unsafe fn sdmmc_dma_start(&mut self, request: DmaRequest);

    fn sdmmc_dma_busy(&self) -> bool;

    /// Abort the transfer and wait for the channel to go quiet.
    fn sdmmc_dma_abort(&mut self);

    /// Raw completion flag of the channel, set even when the interrupt is not serviced.
    fn sdmmc_dma_complete(&self) -> bool;

    /// Clear the completion flag.
    fn sdmmc_dma_ack(&mut self);

    /// Words still to go in the current transfer.
    fn sdmmc_dma_remaining(&self) -> u32;
}

pub trait SdmmcHardware: CmdChannel + DataChannel + BlockDma + MonotonicClock + Sleep {
    /// Bring the bus hardware up. Claiming the underlying resources happens only on the
    /// first call in the life of the process; later calls reload and reconfigure.
    fn sdmmc_init(&mut self) -> Result<(), SdmmcError>;

    /// True when the CPU is executing an exception or interrupt handler. Completion
    /// interrupts cannot be taken there.
    fn sdmmc_in_exception_context(&self) -> bool;
}
