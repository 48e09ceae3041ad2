//! PIO programs driving the SDIO bus, and their placement in instruction memory.
//!
//! Three programs share the 32 instruction slots of one PIO block:
//! - `cmd_clk` runs forever on the command state machine. It generates CLK through
//!   side-set, shifts command frames out on CMD and shifts responses back in.
//! - `data_rx` samples D0..D3 on the rising CLK edge after a start bit.
//! - `data_tx` drives D0..D3 on the falling CLK edge, one block per start token.
//!
//! Both data programs synchronize to CLK with `wait gpio`. That operand is an absolute
//! pin number, so it is bound to the configured CLK pin at load time.

use pio::{
    Instruction, InstructionOperands, JmpCondition, OutDestination, Program, SetDestination,
    SideSet, WaitSource, RP2040_MAX_PROGRAM_SIZE,
};
use sdmmc_protocol::sdmmc::SdmmcError;

pub type SdioProgram = Program<{ RP2040_MAX_PROGRAM_SIZE }>;

pub const INSTRUCTION_SLOTS: usize = 32;

/// Nibbles shifted in per received block: 512 data bytes and the 8-byte CRC trailer.
pub const DATA_RX_NIBBLES: u32 = 1040;

/// Nibbles shifted out per transmitted block: start token word, 512 data bytes,
/// the CRC trailer and the end token word.
pub const DATA_TX_NIBBLES: u32 = 1056;

/// Slot of the `out pins, 4` instruction within `data_tx`. The state machine stalls
/// there once everything queued has been sent.
pub const DATA_TX_OUT_SLOT: u8 = 5;

// Timing: 5 PIO cycles per SD clock, CLK low for 3 cycles and high for 2.
pub fn cmd_clk() -> SdioProgram {
    pio_proc::pio_asm!(
        ".side_set 1",
        "    mov osr, null       side 1 [1]",
        "wait_cmd:",
        "    mov y, !status      side 0 [2]",
        "    jmp !y wait_cmd     side 1 [1]",
        "    out null, 32        side 0 [2]",
        "    out x, 8            side 1 [1]",
        "    set pins, 1         side 0 [2]",
        "    set pindirs, 1      side 1 [1]",
        "send_cmd:",
        "    out pins, 1         side 0 [2]",
        "    jmp x-- send_cmd    side 1 [1]",
        "    set pindirs, 0      side 0 [2]",
        "    out x, 8            side 1 [1]",
        "    nop                 side 0 [2]",
        "    jmp !x resp_done    side 1 [1]",
        "wait_resp:",
        "    nop                 side 0 [2]",
        "    jmp pin wait_resp   side 1 [1]",
        "read_resp:",
        "    in pins, 1          side 0 [2]",
        "    jmp x-- read_resp   side 1 [1]",
        "resp_done:",
        "    push                side 0 [2]",
    )
    .program
}

// X counts nibbles down from Y, which the host preloads with DATA_RX_NIBBLES - 1.
pub fn data_rx() -> SdioProgram {
    pio_proc::pio_asm!(
        ".wrap_target",
        "    mov x, y",
        "    wait 0 pin 0",
        "    wait 1 gpio 0       [4]",
        "rx_data:",
        "    in pins, 4          [3]",
        "    jmp x-- rx_data",
        ".wrap",
    )
    .program
}

// Y holds DATA_TX_NIBBLES - 1. Each block waits for the card to release D0 first.
pub fn data_tx() -> SdioProgram {
    pio_proc::pio_asm!(
        ".wrap_target",
        "    mov x, y            [15]",
        "    wait 1 pin 0",
        "    set pindirs, 15",
        "    wait 0 gpio 0",
        "    wait 1 gpio 0       [1]",
        "tx_data:",
        "    out pins, 4         [3]",
        "    jmp x-- tx_data",
        "    set pindirs, 0      [31]",
        ".wrap",
    )
    .program
}

/// Where one program ended up in instruction memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub offset: u8,
    pub wrap_bottom: u8,
    pub wrap_top: u8,
}

impl Placement {
    const fn empty() -> Self {
        Placement {
            offset: 0,
            wrap_bottom: 0,
            wrap_top: 0,
        }
    }

    fn of(program: &SdioProgram, offset: u8) -> Self {
        Placement {
            offset,
            wrap_bottom: offset + program.wrap.target,
            wrap_top: offset + program.wrap.source,
        }
    }

    pub fn slot(&self, index: u8) -> u8 {
        self.offset + index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramLayout {
    pub cmd_clk: Placement,
    pub data_rx: Placement,
    pub data_tx: Placement,
}

impl ProgramLayout {
    pub const fn empty() -> Self {
        ProgramLayout {
            cmd_clk: Placement::empty(),
            data_rx: Placement::empty(),
            data_tx: Placement::empty(),
        }
    }
}

/// Fix up one instruction for execution at `offset`: jump targets move with the
/// program and `wait gpio` waits on the CLK pin.
pub fn relocate(word: u16, side_set: SideSet, offset: u8, clk_pin: u8) -> u16 {
    let Some(mut instruction) = Instruction::decode(word, side_set) else {
        return word;
    };

    match &mut instruction.operands {
        InstructionOperands::JMP { address, .. } => *address += offset,
        InstructionOperands::WAIT {
            source: WaitSource::GPIO,
            index,
            ..
        } => *index = clk_pin,
        _ => return word,
    }
    instruction.encode(side_set)
}

/// Lay the programs out bottom-up from slot 0 and hand every relocated word to
/// `write(slot, word)`.
pub fn load(clk_pin: u8, mut write: impl FnMut(usize, u16)) -> Result<ProgramLayout, SdmmcError> {
    let programs = [cmd_clk(), data_rx(), data_tx()];

    let total: usize = programs.iter().map(|p| p.code.len()).sum();
    if total > INSTRUCTION_SLOTS {
        log::warn!("SDIO programs need {} instruction slots", total);
        return Err(SdmmcError::EINVAL);
    }

    let mut placements = [Placement::empty(); 3];
    let mut next = 0usize;
    for (program, placement) in programs.iter().zip(placements.iter_mut()) {
        let offset = next as u8;
        for (i, word) in program.code.iter().enumerate() {
            write(next + i, relocate(*word, program.side_set, offset, clk_pin));
        }
        *placement = Placement::of(program, offset);
        next += program.code.len();
    }

    Ok(ProgramLayout {
        cmd_clk: placements[0],
        data_rx: placements[1],
        data_tx: placements[2],
    })
}

// Instructions forced into a state machine through SM_INSTR. Side-set and delay bits
// are left zero.
fn exec_encode(operands: InstructionOperands) -> u16 {
    Instruction {
        operands,
        delay: 0,
        side_set: None,
    }
    .encode(SideSet::new(false, 0, false))
}

pub fn exec_jmp(address: u8) -> u16 {
    exec_encode(InstructionOperands::JMP {
        condition: JmpCondition::Always,
        address,
    })
}

pub fn exec_set_pindirs(bits: u8) -> u16 {
    exec_encode(InstructionOperands::SET {
        destination: SetDestination::PINDIRS,
        data: bits,
    })
}

pub fn exec_set_pins(bits: u8) -> u16 {
    exec_encode(InstructionOperands::SET {
        destination: SetDestination::PINS,
        data: bits,
    })
}

pub fn exec_pull() -> u16 {
    exec_encode(InstructionOperands::PULL {
        if_empty: false,
        block: true,
    })
}

pub fn exec_out_y() -> u16 {
    exec_encode(InstructionOperands::OUT {
        destination: OutDestination::Y,
        bit_count: 32,
    })
}
