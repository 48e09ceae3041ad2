//! Checksums used on the SD bus.
//!
//! - CRC7 protects command and response frames (G(x) = x^7 + x^3 + 1).
//! - CRC16 (CCITT, G(x) = x^16 + x^12 + x^5 + 1) protects data blocks. In 4-bit mode every
//!   data line carries its own CRC16, so a block trailer is 4 x 16 = 64 bits.

/// Lookup table for CRC7. Entries hold the CRC shifted left by one, which is the layout the
/// CRC takes in the last byte of a frame, so the table can be chained as
/// `crc = CRC7_TABLE[crc ^ byte]`.
static CRC7_TABLE: [u8; 256] = crc7_table();

const fn crc7_table() -> [u8; 256] {
    // Polynomial 0x09 aligned to the top seven bits of a byte
    const POLY: u8 = 0x09 << 1;

    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC7 over `bytes`, returned in bits 7..1. Bit 0 is always clear, which lines it up with
/// the CRC byte of a frame once that byte's end bit is masked off.
pub fn crc7(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |crc, &byte| CRC7_TABLE[(crc ^ byte) as usize])
}

/// Four parallel CRC16s over a block held in memory as 32-bit words.
///
/// Each word holds 8 bits of every data line. Memory order is wire order, so the word is
/// reinterpreted big-endian first. The four accumulators are interleaved at nibble
/// granularity in one `u64`: bit `4 * j + d` is bit `j` of the CRC for line `d`. That is
/// exactly the layout the card clocks out after the block, so the result compares directly
/// with the two trailer words received from the card (first word in the upper half).
pub fn crc16_4bit(words: &[u32]) -> u64 {
    let mut crc: u64 = 0;
    for word in words {
        let data_in = u32::from_be_bytes(word.to_ne_bytes()) as u64;

        // Shift out 8 bits for each line
        let mut data_out = crc >> 32;
        crc <<= 32;

        // Feedback taps are 4 bits (one bit per line) apart in the packed form
        data_out ^= data_out >> 16;
        data_out ^= data_in >> 16;

        let xorred = data_out ^ data_in;
        crc ^= xorred;
        crc ^= xorred << (5 * 4);
        crc ^= xorred << (12 * 4);
    }
    crc
}
