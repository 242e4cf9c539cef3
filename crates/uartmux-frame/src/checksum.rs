//! CRC-8 integrity code for uartmux frames.
//!
//! CRC-8/SMBUS: polynomial `0x07`, initial value `0x00`, no reflection and
//! no final XOR. Computed over `address ‖ length ‖ payload`; the start marker
//! and the checksum byte itself are excluded.

/// Generator polynomial (x^8 + x^2 + x + 1).
pub const POLYNOMIAL: u8 = 0x07;

const TABLE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLYNOMIAL
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

/// Incremental CRC-8 state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc8 {
    state: u8,
}

impl Crc8 {
    pub fn new() -> Self {
        Self { state: 0 }
    }

    /// Feed a single byte.
    pub fn push(&mut self, byte: u8) {
        self.state = TABLE[(self.state ^ byte) as usize];
    }

    /// Feed a run of bytes.
    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.push(byte);
        }
    }

    pub fn finish(self) -> u8 {
        self.state
    }
}

/// Compute the CRC-8 of `bytes` in one call.
pub fn crc8(bytes: &[u8]) -> u8 {
    let mut crc = Crc8::new();
    crc.update(bytes);
    crc.finish()
}
