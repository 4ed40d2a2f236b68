//! Non-reflected CRCs used by Ogg, MPEG-TS sections and FLAC frame headers.

const fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
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

const fn crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x07 } else { crc << 1 };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC32: [u32; 256] = crc32_table();
static CRC8: [u8; 256] = crc8_table();

/// CRC-32 with polynomial 0x04C11DB7, MSB first, no final xor.
///
/// Ogg pages use `init = 0`, MPEG-2 PSI sections use `init = 0xFFFF_FFFF`.
pub(crate) fn crc32(init: u32, data: &[u8]) -> u32 {
    data.iter().fold(init, |crc, &b| {
        (crc << 8) ^ CRC32[((crc >> 24) as u8 ^ b) as usize]
    })
}

/// CRC-8 with polynomial 0x07, as protecting FLAC frame headers.
pub(crate) fn crc8(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, &b| CRC8[(crc ^ b) as usize])
}
