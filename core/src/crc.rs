//! Byte-wise CRC-32 (reflected, poly `0xEDB88320`, init `0xFFFFFFFF`, no final
//! XOR) used to seal page headers before they are written to the spare area.

pub fn crc32(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::crc32;

    #[test]
    fn known_test_vector() {
        // The textbook CRC-32 check value for "123456789" is 0xCBF43926, but
        // that includes the final XOR with 0xFFFFFFFF that this variant
        // omits, so the raw register value is the bitwise complement.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926 ^ 0xFFFF_FFFF);
    }

    #[test]
    fn empty_input() {
        assert_eq!(crc32(&[]), 0xFFFF_FFFF);
    }

    #[test]
    fn differs_on_single_bit_flip() {
        let a = crc32(b"the quick brown fox");
        let b = crc32(b"the quick brown fop");
        assert_ne!(a, b);
    }
}
