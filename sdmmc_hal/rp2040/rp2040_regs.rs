//! RP2040 register blocks used by the SDIO host.
//!
//! PIO and DMA are described with `tock-registers`. The remaining peripherals are only
//! touched at one or two words each and go through raw volatile accesses.

use core::ptr;

use tock_registers::{
    register_bitfields,
    registers::{ReadOnly, ReadWrite, WriteOnly},
};

pub const PIO0_BASE: usize = 0x5020_0000;
pub const PIO1_BASE: usize = 0x5030_0000;
pub const DMA_BASE: usize = 0x5000_0000;

const RESETS_BASE: usize = 0x4000_c000;
const IO_BANK0_BASE: usize = 0x4001_4000;
const PADS_BANK0_BASE: usize = 0x4001_c000;
const TIMER_BASE: usize = 0x4005_4000;
const SIO_BASE: usize = 0xd000_0000;
const PPB_BASE: usize = 0xe000_0000;

// Atomic set/clear aliases of APB and AHB-lite registers
const REG_ALIAS_SET: usize = 0x2000;
const REG_ALIAS_CLR: usize = 0x3000;

const RESETS_RESET: usize = 0x0;
const RESETS_RESET_DONE: usize = 0x8;
pub const RESET_DMA: u32 = 1 << 2;
pub const RESET_IO_BANK0: u32 = 1 << 5;
pub const RESET_PADS_BANK0: u32 = 1 << 8;
pub const RESET_PIO0: u32 = 1 << 10;
pub const RESET_PIO1: u32 = 1 << 11;
pub const RESET_TIMER: u32 = 1 << 21;

const TIMER_TIMERAWH: usize = 0x24;
const TIMER_TIMERAWL: usize = 0x28;

const SIO_GPIO_IN: usize = 0x004;

const PPB_ICSR: usize = 0xed04;
const ICSR_VECTACTIVE_MASK: u32 = 0x1ff;
const PPB_NVIC_ISER: usize = 0xe100;
const PPB_NVIC_ICPR: usize = 0xe280;
const PPB_NVIC_IPR0: usize = 0xe400;

pub const GPIO_FUNC_PIO0: u32 = 6;
pub const GPIO_FUNC_PIO1: u32 = 7;
const IO_GPIO_CTRL_FUNCSEL_MASK: u32 = 0x1f;

const PADS_GPIO_OD: u32 = 1 << 7;
const PADS_GPIO_IE: u32 = 1 << 6;
const PADS_GPIO_PUE: u32 = 1 << 3;
const PADS_GPIO_PDE: u32 = 1 << 2;

pub const DMA_IRQ_1: u32 = 12;

register_bitfields![u32,
    pub CTRL [
        SM_ENABLE OFFSET(0) NUMBITS(4) [],
        SM_RESTART OFFSET(4) NUMBITS(4) [],
        CLKDIV_RESTART OFFSET(8) NUMBITS(4) []
    ],
    pub FSTAT [
        RXFULL OFFSET(0) NUMBITS(4) [],
        RXEMPTY OFFSET(8) NUMBITS(4) [],
        TXFULL OFFSET(16) NUMBITS(4) [],
        TXEMPTY OFFSET(24) NUMBITS(4) []
    ],
    pub FDEBUG [
        RXSTALL OFFSET(0) NUMBITS(4) [],
        RXUNDER OFFSET(8) NUMBITS(4) [],
        TXOVER OFFSET(16) NUMBITS(4) [],
        TXSTALL OFFSET(24) NUMBITS(4) []
    ],
    pub SM_CLKDIV [
        FRAC OFFSET(8) NUMBITS(8) [],
        INT OFFSET(16) NUMBITS(16) []
    ],
    pub SM_EXECCTRL [
        STATUS_N OFFSET(0) NUMBITS(4) [],
        STATUS_SEL OFFSET(4) NUMBITS(1) [
            TxLevel = 0,
            RxLevel = 1
        ],
        WRAP_BOTTOM OFFSET(7) NUMBITS(5) [],
        WRAP_TOP OFFSET(12) NUMBITS(5) [],
        OUT_STICKY OFFSET(17) NUMBITS(1) [],
        INLINE_OUT_EN OFFSET(18) NUMBITS(1) [],
        OUT_EN_SEL OFFSET(19) NUMBITS(5) [],
        JMP_PIN OFFSET(24) NUMBITS(5) [],
        SIDE_PINDIR OFFSET(29) NUMBITS(1) [],
        SIDE_EN OFFSET(30) NUMBITS(1) [],
        EXEC_STALLED OFFSET(31) NUMBITS(1) []
    ],
    pub SM_SHIFTCTRL [
        AUTOPUSH OFFSET(16) NUMBITS(1) [],
        AUTOPULL OFFSET(17) NUMBITS(1) [],
        IN_SHIFTDIR OFFSET(18) NUMBITS(1) [
            Left = 0,
            Right = 1
        ],
        OUT_SHIFTDIR OFFSET(19) NUMBITS(1) [
            Left = 0,
            Right = 1
        ],
        // 0 encodes a threshold of 32
        PUSH_THRESH OFFSET(20) NUMBITS(5) [],
        PULL_THRESH OFFSET(25) NUMBITS(5) [],
        FJOIN_TX OFFSET(30) NUMBITS(1) [],
        FJOIN_RX OFFSET(31) NUMBITS(1) []
    ],
    pub SM_PINCTRL [
        OUT_BASE OFFSET(0) NUMBITS(5) [],
        SET_BASE OFFSET(5) NUMBITS(5) [],
        SIDESET_BASE OFFSET(10) NUMBITS(5) [],
        IN_BASE OFFSET(15) NUMBITS(5) [],
        OUT_COUNT OFFSET(20) NUMBITS(6) [],
        SET_COUNT OFFSET(26) NUMBITS(3) [],
        SIDESET_COUNT OFFSET(29) NUMBITS(3) []
    ],
    pub DMA_CTRL [
        EN OFFSET(0) NUMBITS(1) [],
        HIGH_PRIORITY OFFSET(1) NUMBITS(1) [],
        DATA_SIZE OFFSET(2) NUMBITS(2) [
            Byte = 0,
            HalfWord = 1,
            Word = 2
        ],
        INCR_READ OFFSET(4) NUMBITS(1) [],
        INCR_WRITE OFFSET(5) NUMBITS(1) [],
        RING_SIZE OFFSET(6) NUMBITS(4) [],
        RING_SEL OFFSET(10) NUMBITS(1) [],
        CHAIN_TO OFFSET(11) NUMBITS(4) [],
        TREQ_SEL OFFSET(15) NUMBITS(6) [],
        IRQ_QUIET OFFSET(21) NUMBITS(1) [],
        BSWAP OFFSET(22) NUMBITS(1) [],
        SNIFF_EN OFFSET(23) NUMBITS(1) [],
        BUSY OFFSET(24) NUMBITS(1) [],
        WRITE_ERROR OFFSET(29) NUMBITS(1) [],
        READ_ERROR OFFSET(30) NUMBITS(1) [],
        AHB_ERROR OFFSET(31) NUMBITS(1) []
    ]
];

tock_registers::register_structs! {
    pub PioStateMachine {
        (0x00 => pub clkdiv: ReadWrite<u32, SM_CLKDIV::Register>),
        (0x04 => pub execctrl: ReadWrite<u32, SM_EXECCTRL::Register>),
        (0x08 => pub shiftctrl: ReadWrite<u32, SM_SHIFTCTRL::Register>),
        (0x0c => pub addr: ReadOnly<u32>),
        (0x10 => pub instr: ReadWrite<u32>),
        (0x14 => pub pinctrl: ReadWrite<u32, SM_PINCTRL::Register>),
        (0x18 => @END),
    },
    pub PioRegisters {
        (0x000 => pub ctrl: ReadWrite<u32, CTRL::Register>),
        (0x004 => pub fstat: ReadOnly<u32, FSTAT::Register>),
        (0x008 => pub fdebug: ReadWrite<u32, FDEBUG::Register>),
        (0x00c => pub flevel: ReadOnly<u32>),
        (0x010 => pub txf: [WriteOnly<u32>; 4]),
        (0x020 => pub rxf: [ReadOnly<u32>; 4]),
        (0x030 => pub irq: ReadWrite<u32>),
        (0x034 => pub irq_force: WriteOnly<u32>),
        (0x038 => pub input_sync_bypass: ReadWrite<u32>),
        (0x03c => _reserved0),
        (0x048 => pub instr_mem: [WriteOnly<u32>; 32]),
        (0x0c8 => pub sm: [PioStateMachine; 4]),
        (0x128 => @END),
    },
    pub DmaChannel {
        (0x00 => pub read_addr: ReadWrite<u32>),
        (0x04 => pub write_addr: ReadWrite<u32>),
        (0x08 => pub trans_count: ReadWrite<u32>),
        (0x0c => pub ctrl_trig: ReadWrite<u32, DMA_CTRL::Register>),
        (0x10 => pub al1_ctrl: ReadWrite<u32, DMA_CTRL::Register>),
        (0x14 => _reserved0),
        (0x40 => @END),
    },
    pub DmaRegisters {
        (0x000 => pub ch: [DmaChannel; 12]),
        (0x300 => _reserved0),
        (0x400 => pub intr: ReadWrite<u32>),
        (0x404 => pub inte0: ReadWrite<u32>),
        (0x408 => pub intf0: ReadWrite<u32>),
        (0x40c => pub ints0: ReadWrite<u32>),
        (0x410 => _reserved1),
        (0x414 => pub inte1: ReadWrite<u32>),
        (0x418 => pub intf1: ReadWrite<u32>),
        (0x41c => pub ints1: ReadWrite<u32>),
        (0x420 => _reserved2),
        (0x444 => pub chan_abort: ReadWrite<u32>),
        (0x448 => @END),
    }
}

impl PioRegisters {
    /// # Safety
    /// `register_base` must be the base of a PIO block.
    pub unsafe fn new(register_base: usize) -> &'static PioRegisters {
        // SAFETY: the caller names a PIO block, which is mapped for the life of the chip
        unsafe { &*(register_base as *const PioRegisters) }
    }
}

impl DmaRegisters {
    /// # Safety
    /// `register_base` must be the DMA block base.
    pub unsafe fn new(register_base: usize) -> &'static DmaRegisters {
        // SAFETY: as for PioRegisters
        unsafe { &*(register_base as *const DmaRegisters) }
    }
}

#[inline]
unsafe fn reg_read(addr: usize) -> u32 {
    unsafe { ptr::read_volatile(addr as *const u32) }
}

#[inline]
unsafe fn reg_write(addr: usize, value: u32) {
    unsafe { ptr::write_volatile(addr as *mut u32, value) }
}

/// Take the blocks in `mask` out of reset and wait until they report ready.
/// Blocks already running are left alone.
pub fn unreset_blocks(mask: u32) {
    // SAFETY: RESETS is a fixed peripheral, the CLR alias only touches the bits in `mask`
    unsafe {
        if reg_read(RESETS_BASE + RESETS_RESET) & mask == 0 {
            return;
        }
        reg_write(RESETS_BASE + REG_ALIAS_CLR + RESETS_RESET, mask);
        while reg_read(RESETS_BASE + RESETS_RESET_DONE) & mask != mask {}
    }
}

/// Microseconds since boot from the free running 64-bit timer.
pub fn timer_us() -> u64 {
    // The raw registers are not latched, retry if the high word moved under us
    loop {
        // SAFETY: fixed read-only TIMER registers
        let hi = unsafe { reg_read(TIMER_BASE + TIMER_TIMERAWH) };
        let lo = unsafe { reg_read(TIMER_BASE + TIMER_TIMERAWL) };
        if hi == unsafe { reg_read(TIMER_BASE + TIMER_TIMERAWH) } {
            return ((hi as u64) << 32) | lo as u64;
        }
    }
}

pub fn gpio_in(pin: u8) -> bool {
    // SAFETY: fixed read-only SIO register
    unsafe { reg_read(SIO_BASE + SIO_GPIO_IN) & (1 << pin) != 0 }
}

pub fn gpio_set_function(pin: u8, function: u32) {
    let ctrl = IO_BANK0_BASE + 0x04 + 8 * pin as usize;
    // SAFETY: GPIO_CTRL of a pin checked against NUM_GPIOS by the config
    unsafe {
        let value = reg_read(ctrl) & !IO_GPIO_CTRL_FUNCSEL_MASK;
        reg_write(ctrl, value | function);
    }
}

/// Input enabled, output enabled, optional pull-up.
pub fn pad_configure(pin: u8, pull_up: bool) {
    let pad = PADS_BANK0_BASE + 0x04 + 4 * pin as usize;
    // SAFETY: pad register of a validated pin
    unsafe {
        reg_write(REG_ALIAS_CLR + pad, PADS_GPIO_OD | PADS_GPIO_PDE | PADS_GPIO_PUE);
        let set = if pull_up {
            PADS_GPIO_IE | PADS_GPIO_PUE
        } else {
            PADS_GPIO_IE
        };
        reg_write(REG_ALIAS_SET + pad, set);
    }
}

/// True while the core executes an exception or interrupt handler.
pub fn in_exception_context() -> bool {
    // SAFETY: ICSR is a read-only view of the core state
    unsafe { reg_read(PPB_BASE + PPB_ICSR) & ICSR_VECTACTIVE_MASK != 0 }
}

/// Clear any pending state of `irq`, give it `priority` and enable it.
pub fn nvic_enable(irq: u32, priority: u8) {
    let ipr = PPB_BASE + PPB_NVIC_IPR0 + 4 * (irq as usize / 4);
    let shift = 8 * (irq % 4);
    // SAFETY: NVIC registers of the executing core, `irq` is one of its 32 lines
    unsafe {
        // ARMv6-M only allows word access to the priority registers
        let value = reg_read(ipr) & !(0xff << shift);
        reg_write(ipr, value | ((priority as u32) << shift));
        reg_write(PPB_BASE + PPB_NVIC_ICPR, 1 << irq);
        reg_write(PPB_BASE + PPB_NVIC_ISER, 1 << irq);
    }
}
