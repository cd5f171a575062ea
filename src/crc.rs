// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The 24-bit software CRC the NVM controller's own flash-CRC command also
//! computes, used here to verify a HEX image against the on-chip result
//! without reading the chip back a second time.

/// Folds one little-endian 16-bit word into a running 24-bit CRC.
pub fn crc24(word: u16, crc: u32) -> u32 {
    let shifted = (crc << 1) ^ word as u32;
    let fold = if crc & 0x800000 != 0 { 0x80001b } else { 0 };
    (shifted ^ fold) & 0xffffff
}

/// Computes the CRC of `data` two bytes at a time, low byte first. An odd
/// trailing byte is paired with an implicit zero high byte.
pub fn crc24_block(data: &[u8], seed: u32) -> u32 {
    let mut crc = seed;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        crc = crc24((pair[1] as u16) << 8 | pair[0] as u16, crc);
    }
    if let [last] = chunks.remainder() {
        crc = crc24(*last as u16, crc);
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_length_block_returns_seed() {
        assert_eq!(crc24_block(&[], 0), 0);
        assert_eq!(crc24_block(&[], 0x123456), 0x123456);
    }

    #[test]
    fn single_word_matches_hand_computation() {
        let word = 0xA5C3u16;
        let expected = (0u32 ^ word as u32) & 0xffffff;
        assert_eq!(crc24(word, 0), expected);
    }

    #[test]
    fn block_folds_bytes_little_endian() {
        let data = [0x34, 0x12]; // word 0x1234
        assert_eq!(crc24_block(&data, 0), crc24(0x1234, 0));
    }

    #[test]
    fn odd_length_pads_final_byte_with_zero_high_byte() {
        let data = [0xAA];
        assert_eq!(crc24_block(&data, 0), crc24(0x00AA, 0));
    }

    #[test]
    fn top_bit_set_folds_in_the_polynomial() {
        let crc = crc24(0, 0x800000);
        assert_eq!(crc, (0x800000u32 << 1 ^ 0x80001b) & 0xffffff);
    }

    proptest::proptest! {
        #[test]
        fn result_always_fits_in_24_bits(data: Vec<u8>, seed: u32) {
            let crc = crc24_block(&data, seed & 0xffffff);
            proptest::prop_assert_eq!(crc & 0xffffff, crc);
        }

        #[test]
        fn splitting_a_block_on_a_word_boundary_does_not_change_the_result(
            head: Vec<u8>, tail: Vec<u8>
        ) {
            proptest::prop_assume!(head.len() % 2 == 0);
            let mut whole = head.clone();
            whole.extend_from_slice(&tail);
            let split = crc24_block(&tail, crc24_block(&head, 0));
            proptest::prop_assert_eq!(crc24_block(&whole, 0), split);
        }
    }
}
