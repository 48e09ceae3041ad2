// Block geometry
pub const SDIO_BLOCK_SIZE: usize = 512;
pub const SDIO_BLOCK_WORDS: usize = SDIO_BLOCK_SIZE / 4;
// Maximum number of blocks in one transfer session
pub const SDIO_MAX_BLOCKS: usize = 256;

// Timeouts, all compared as `now - start > timeout`
pub const SDIO_CMD_TIMEOUT_MS: u32 = 2;
pub const SDIO_TRANSFER_TIMEOUT_MS: u32 = 1000;
// Iteration bound for FIFO waits inside the completion handler
pub const SDIO_HANDLER_MAX_SPIN: u32 = 1000;

pub const SD_INIT_RETRIES: u32 = 5;
pub const SD_OP_COND_TIMEOUT_MS: u32 = 1000;
pub const SD_BUSY_TIMEOUT_MS: u32 = 100;

// Response lengths in bits, as clocked in by the command state machine
pub const SDIO_R1_BITS: u32 = 48;
pub const SDIO_R2_BITS: u32 = 136;
pub const SDIO_R2_WORDS: usize = 5;
// Reserved code in the first byte of every R2 reply
pub const SDIO_R2_CODE: u8 = 0x3F;

// Command indices
pub const MMC_CMD_GO_IDLE_STATE: u8 = 0;
pub const MMC_CMD_ALL_SEND_CID: u8 = 2;
pub const SD_CMD_SEND_RELATIVE_ADDR: u8 = 3;
pub const SD_CMD_APP_SET_BUS_WIDTH: u8 = 6;
pub const MMC_CMD_SELECT_CARD: u8 = 7;
pub const SD_CMD_SEND_IF_COND: u8 = 8;
pub const MMC_CMD_SEND_CSD: u8 = 9;
pub const MMC_CMD_STOP_TRANSMISSION: u8 = 12;
pub const MMC_CMD_SEND_STATUS: u8 = 13;
pub const MMC_CMD_SET_BLOCKLEN: u8 = 16;
pub const MMC_CMD_READ_SINGLE_BLOCK: u8 = 17;
pub const MMC_CMD_READ_MULTIPLE_BLOCK: u8 = 18;
pub const SD_CMD_APP_SET_WR_BLK_ERASE_COUNT: u8 = 23;
pub const MMC_CMD_WRITE_SINGLE_BLOCK: u8 = 24;
pub const MMC_CMD_WRITE_MULTIPLE_BLOCK: u8 = 25;
pub const SD_CMD_APP_SEND_OP_COND: u8 = 41;
pub const MMC_CMD_APP_CMD: u8 = 55;

// CMD8 argument: 2.7-3.6V supply, check pattern 0xAA
pub const SD_IF_COND_PATTERN: u32 = 0x1AA;
// ACMD41 argument: bit 31, HCS, XPC and the 3.0-3.1V window bit
pub const SD_OP_COND_ARG: u32 = 0xD004_0000;
// ACMD6 argument selecting the 4-bit bus
pub const SD_BUS_WIDTH_4: u32 = 2;

// Words framing each transmitted block. The data state machine shifts them out MSB first,
// so the start token idles the lines high for seven clocks and then drives the start bit,
// the end token drives the end bit and leaves the lines high.
pub const SDIO_TX_START_TOKEN: u32 = 0xFFFF_FFF0;
pub const SDIO_TX_END_TOKEN: u32 = 0xFFFF_FFFF;
// Free words the joined transmit FIFO needs for a block trailer plus the next start token
pub const SDIO_TX_TRAILER_WORDS: u32 = 4;
pub const SDIO_DATA_FIFO_DEPTH: u32 = 8;
