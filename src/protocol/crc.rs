use crc::{Crc, CRC_16_XMODEM};

/// CRC-16/XMODEM: poly 0x1021, init 0, no reflection, no final xor.
/// The 256-entry lookup table is built at compile time.
const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

pub fn checksum(data: &[u8]) -> u16 {
    CRC.checksum(data)
}

/// Checksum in wire order (little-endian).
pub fn crc16_xmodem_le(data: &[u8]) -> [u8; 2] {
    checksum(data).to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Bytewise reference: table entry i is byte i shifted through 0x1021 eight times.
    fn reference(data: &[u8]) -> u16 {
        let table: Vec<u16> = (0..256u16)
            .map(|i| {
                let mut c = i << 8;
                for _ in 0..8 {
                    c = if c & 0x8000 != 0 { (c << 1) ^ 0x1021 } else { c << 1 };
                }
                c
            })
            .collect();

        let mut crc: u16 = 0;
        for &byte in data {
            let idx = ((crc >> 8) ^ byte as u16) & 0xFF;
            crc = (crc << 8) ^ table[idx as usize];
        }
        crc
    }

    #[test]
    fn test_crc_check_value() {
        assert_eq!(checksum(b"123456789"), 0x31C3);
    }

    #[test]
    fn test_crc_empty() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(crc16_xmodem_le(&[]), [0x00, 0x00]);
    }

    #[test]
    fn test_crc_wire_order_is_little_endian() {
        let crc = checksum(b"123456789");
        assert_eq!(crc16_xmodem_le(b"123456789"), [0xC3, 0x31]);
        assert_eq!(u16::from_le_bytes(crc16_xmodem_le(b"123456789")), crc);
    }

    proptest! {
        #[test]
        fn prop_matches_table_reference(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(checksum(&data), reference(&data));
        }

        #[test]
        fn prop_deterministic(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(checksum(&data), checksum(&data));
        }
    }
}
