//! Checksums used on the wire by the two device protocols.

/// Folds `data` with XOR, starting from 0.
///
/// The ROM bootloader appends this to every address and data payload.
pub fn xor_sum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Calculates the CRC-16/CCITT-FALSE checksum for the given slice of `bytes`.
///
/// The CRC is implemented with the polynomial 0x1021 and the initial value of
/// 0xFFFF, MSB first, with no reflection and no final XOR.
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;

    for byte in bytes {
        crc ^= (*byte as u16) << 8;

        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn it_should_match_the_ccitt_false_check_value() {
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn it_should_checksum_frame_headers() {
        assert_eq!(crc16_ccitt(&hex!("7E 10 00 00")), 0x278C);
        assert_eq!(crc16_ccitt(&hex!("7E 06 00 00")), 0xD64F);
    }

    #[test]
    fn it_should_fold_an_empty_slice_to_zero() {
        assert_eq!(xor_sum(&[]), 0);
    }

    #[test]
    fn it_should_pass_single_bytes_through() {
        assert_eq!(xor_sum(&[0x5A]), 0x5A);
    }

    #[test]
    fn it_should_distribute_over_concatenation() {
        let s = hex!("01 02 03 04");
        let t = hex!("AA BB CC");
        let mut joined = s.to_vec();
        joined.extend_from_slice(&t);

        assert_eq!(xor_sum(&joined), xor_sum(&s) ^ xor_sum(&t));
    }

    #[test]
    fn it_should_checksum_a_write_data_block() {
        assert_eq!(xor_sum(&hex!("02 AA BB CC")), 0xDF);
    }
}
