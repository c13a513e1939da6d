//! Checksummed word encoding of key entropy.
//!
//! The encoding is BIP-39 compatible: the entropy bits are followed by the
//! first `entropy_bits / 32` bits of SHA-256(entropy), and the result is cut
//! into 11-bit groups (most significant bit first), each naming a word of the
//! sorted 2048-word English list.

use crate::crypto::cipher::{Key, KEY_SIZE};
use crate::crypto::hash::sha256;
use bip39::Language;
use thiserror::Error;

/// Bits carried by a single word.
const BITS_PER_WORD: usize = 11;

/// Largest entropy whose checksum still fits in one SHA-256 digest.
const MAX_ENTROPY_BYTES: usize = 1024;

/// Errors raised while encoding entropy or recovering it from words.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MnemonicError {
    #[error("Entropy length must be a non-zero multiple of 4 bytes, got {0}")]
    InvalidEntropyLength(usize),

    #[error("Unknown mnemonic word: {0}")]
    InvalidWord(String),

    #[error("Invalid mnemonic length: {0} words")]
    InvalidMnemonicLength(usize),

    #[error("Mnemonic checksum mismatch")]
    InvalidChecksum,
}

fn wordlist() -> &'static [&'static str] {
    Language::English.word_list()
}

fn push_byte_bits(bits: &mut Vec<bool>, bytes: &[u8]) {
    for byte in bytes {
        for i in (0..8).rev() {
            bits.push((byte >> i) & 1 == 1);
        }
    }
}

fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &bit| (acc << 1) | bit as u8))
        .collect()
}

fn checksum_bits(entropy: &[u8], len: usize) -> Vec<bool> {
    let mut bits = Vec::with_capacity(256);
    push_byte_bits(&mut bits, &sha256(entropy));
    bits.truncate(len);
    bits
}

/// Encode `entropy` as a list of words.
pub fn encode(entropy: &[u8]) -> Result<Vec<&'static str>, MnemonicError> {
    if entropy.is_empty() || entropy.len() % 4 != 0 || entropy.len() > MAX_ENTROPY_BYTES {
        return Err(MnemonicError::InvalidEntropyLength(entropy.len()));
    }

    let entropy_bits = entropy.len() * 8;
    let mut bits = Vec::with_capacity(entropy_bits + entropy_bits / 32);
    push_byte_bits(&mut bits, entropy);
    bits.extend(checksum_bits(entropy, entropy_bits / 32));

    let words = wordlist();
    Ok(bits
        .chunks(BITS_PER_WORD)
        .map(|group| {
            let index = group
                .iter()
                .fold(0usize, |acc, &bit| (acc << 1) | bit as usize);
            words[index]
        })
        .collect())
}

/// Recover the entropy encoded by `words`.
///
/// Fails on the first unknown word, on a word count that does not carry a
/// multiple of 33 bits, and on any checksum mismatch.
pub fn decode<S: AsRef<str>>(words: &[S]) -> Result<Vec<u8>, MnemonicError> {
    let list: &[&str] = wordlist();
    let mut bits = Vec::with_capacity(words.len() * BITS_PER_WORD);

    for word in words {
        let word = word.as_ref();
        let index = list
            .binary_search(&word)
            .map_err(|_| MnemonicError::InvalidWord(word.to_string()))?;
        for i in (0..BITS_PER_WORD).rev() {
            bits.push((index >> i) & 1 == 1);
        }
    }

    if bits.is_empty() || bits.len() % 33 != 0 || bits.len() / 33 > 256 {
        return Err(MnemonicError::InvalidMnemonicLength(words.len()));
    }

    let checksum_len = bits.len() / 33;
    let (entropy_bits, checksum) = bits.split_at(bits.len() - checksum_len);
    let entropy = bits_to_bytes(entropy_bits);

    if checksum_bits(&entropy, checksum_len) != checksum {
        return Err(MnemonicError::InvalidChecksum);
    }

    Ok(entropy)
}

/// Join words into a single space-separated phrase.
pub fn to_phrase(words: &[&str]) -> String {
    words.join(" ")
}

/// Decode a whitespace-separated phrase, ignoring case and extra spacing.
pub fn from_phrase(phrase: &str) -> Result<Vec<u8>, MnemonicError> {
    let words: Vec<String> = phrase
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    decode(&words)
}

impl Key {
    /// Render the key as a 24-word backup phrase.
    pub fn to_mnemonic(&self) -> Result<String, MnemonicError> {
        Ok(to_phrase(&encode(self.as_bytes())?))
    }

    /// Restore a key from its 24-word backup phrase.
    pub fn from_mnemonic(phrase: &str) -> crate::crypto::Result<Self> {
        let entropy = from_phrase(phrase)?;
        if entropy.len() != KEY_SIZE {
            let count = phrase.split_whitespace().count();
            return Err(MnemonicError::InvalidMnemonicLength(count).into());
        }
        Key::from_slice(&entropy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::secure_random_bytes;

    fn words(phrase: &str) -> Vec<&str> {
        phrase.split(' ').collect()
    }

    #[test]
    fn known_vectors() {
        let cases: [(Vec<u8>, &str); 5] = [
            (
                vec![0x00; 16],
                "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
            ),
            (
                vec![0x7f; 16],
                "legal winner thank year wave sausage worth useful legal winner thank yellow",
            ),
            (
                vec![0x80; 16],
                "letter advice cage absurd amount doctor acoustic avoid letter advice cage above",
            ),
            (
                vec![0xff; 16],
                "zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo zoo wrong",
            ),
            (
                vec![0x00; 32],
                "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon art",
            ),
        ];

        for (entropy, phrase) in cases {
            assert_eq!(to_phrase(&encode(&entropy).unwrap()), phrase);
            assert_eq!(decode(&words(phrase)).unwrap(), entropy);
        }
    }

    #[test]
    fn roundtrip_standard_lengths() {
        for (len, word_count) in [(16, 12), (20, 15), (24, 18), (28, 21), (32, 24)] {
            let entropy = secure_random_bytes(len);
            let encoded = encode(&entropy).unwrap();
            assert_eq!(encoded.len(), word_count);
            assert_eq!(decode(&encoded).unwrap(), entropy);
        }
    }

    #[test]
    fn invalid_entropy_length_rejected() {
        for len in [0, 3, 15, 17] {
            assert_eq!(
                encode(&vec![0u8; len]),
                Err(MnemonicError::InvalidEntropyLength(len))
            );
        }
    }

    #[test]
    fn unknown_word_rejected() {
        let mut phrase = words(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
        );
        phrase[4] = "abandonn";
        assert_eq!(
            decode(&phrase),
            Err(MnemonicError::InvalidWord("abandonn".to_string()))
        );
    }

    #[test]
    fn wrong_word_count_rejected() {
        assert_eq!(
            decode(&["abandon"; 11]),
            Err(MnemonicError::InvalidMnemonicLength(11))
        );
        assert_eq!(
            decode::<&str>(&[]),
            Err(MnemonicError::InvalidMnemonicLength(0))
        );
    }

    #[test]
    fn checksum_mismatch_rejected() {
        // "about" carries checksum 0b0011; "able" differs in the last bit.
        let mut phrase = vec!["abandon"; 11];
        phrase.push("able");
        assert_eq!(decode(&phrase), Err(MnemonicError::InvalidChecksum));

        assert_eq!(decode(&["abandon"; 12]), Err(MnemonicError::InvalidChecksum));
    }

    #[test]
    fn single_bit_flips_never_restore_the_original() {
        let list = wordlist();
        let entropy = secure_random_bytes(32);
        let encoded = encode(&entropy).unwrap();
        let checksum_len = 8;

        for position in 0..encoded.len() {
            let index = list.binary_search(&encoded[position]).unwrap();
            for bit in 0..BITS_PER_WORD {
                let mut corrupted = encoded.clone();
                corrupted[position] = list[index ^ (1 << bit)];

                match decode(&corrupted) {
                    Ok(recovered) => assert_ne!(recovered, entropy),
                    Err(e) => assert_eq!(e, MnemonicError::InvalidChecksum),
                }

                if position == encoded.len() - 1 && bit < checksum_len {
                    assert_eq!(decode(&corrupted), Err(MnemonicError::InvalidChecksum));
                }
            }
        }
    }

    #[test]
    fn phrase_parsing_is_lenient_about_spacing_and_case() {
        let entropy = from_phrase(
            "  Legal winner thank year wave sausage\nworth useful legal winner thank YELLOW ",
        )
        .unwrap();
        assert_eq!(entropy, vec![0x7f; 16]);
    }

    #[test]
    fn key_mnemonic_roundtrip() {
        let key = Key::generate();
        let phrase = key.to_mnemonic().unwrap();
        assert_eq!(phrase.split(' ').count(), 24);
        assert_eq!(Key::from_mnemonic(&phrase).unwrap(), key);
    }

    #[test]
    fn key_from_short_mnemonic_rejected() {
        let result = Key::from_mnemonic(
            "legal winner thank year wave sausage worth useful legal winner thank yellow",
        );
        assert!(matches!(
            result,
            Err(crate::crypto::CryptoError::Mnemonic(
                MnemonicError::InvalidMnemonicLength(12)
            ))
        ));
    }
}
