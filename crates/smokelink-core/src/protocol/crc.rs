//! CRC-16 used by the frame layer
//!
//! CCITT polynomial 0x1021, MSB-first, no reflection and no final XOR.
//! With the default seed of 0xFFFF this is the CRC-16/CCITT-FALSE variant.

/// Generator polynomial
pub const CRC16_POLY: u16 = 0x1021;

/// Default seed for [`crc16`]
pub const CRC16_SEED: u16 = 0xFFFF;

/// Compute the frame CRC over `data` with the default seed
pub fn crc16(data: &[u8]) -> u16 {
    crc16_with_seed(data, CRC16_SEED)
}

/// Compute the frame CRC over `data`, starting from `seed`
///
/// Passing the result of a previous call as the seed continues the
/// checksum across split buffers.
pub fn crc16_with_seed(data: &[u8], seed: u16) -> u16 {
    let mut crc = seed;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
