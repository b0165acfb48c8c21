//! Network header obfuscation.
//!
//! ```text
//! PrivacyRandom = (EncDST || EncTransportPDU || NetMIC)[0..7]
//! PECB          = e(PrivacyKey, 0x0000000000 || IVIndex || PrivacyRandom)
//! Obfuscated    = (CTL|TTL || SEQ || SRC) XOR PECB[0..6]
//! ```
//!
//! XOR is its own inverse, so the same function de-obfuscates.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::BLOCK_SIZE;

/// Octets of the encrypted network payload used as privacy random
pub const PRIVACY_RANDOM_SIZE: usize = 7;

/// Octets of the header covered by obfuscation
pub const OBFUSCATED_SIZE: usize = 6;

/// Single-block AES-128 encryption
pub fn aes_ecb(key: &[u8; BLOCK_SIZE], block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut out);
    out.into()
}

/// Privacy ECB block for a given IV index and encrypted payload
pub fn pecb(
    privacy_key: &[u8; BLOCK_SIZE],
    iv_index: u32,
    encrypted: &[u8],
) -> CryptoResult<[u8; BLOCK_SIZE]> {
    if encrypted.len() < PRIVACY_RANDOM_SIZE {
        return Err(CryptoError::ShortInput {
            need: PRIVACY_RANDOM_SIZE,
            have: encrypted.len(),
        });
    }
    let mut plaintext = [0u8; BLOCK_SIZE];
    plaintext[5..9].copy_from_slice(&iv_index.to_be_bytes());
    plaintext[9..].copy_from_slice(&encrypted[..PRIVACY_RANDOM_SIZE]);
    Ok(aes_ecb(privacy_key, &plaintext))
}

/// Obfuscate or de-obfuscate the six `CTL|TTL || SEQ || SRC` octets
pub fn obfuscate(
    privacy_key: &[u8; BLOCK_SIZE],
    iv_index: u32,
    encrypted: &[u8],
    fields: [u8; OBFUSCATED_SIZE],
) -> CryptoResult<[u8; OBFUSCATED_SIZE]> {
    let pecb = pecb(privacy_key, iv_index, encrypted)?;
    let mut out = fields;
    for (byte, mask) in out.iter_mut().zip(pecb.iter()) {
        *byte ^= mask;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(s: &str) -> [u8; 16] {
        let mut out = [0u8; 16];
        hex::decode_to_slice(s, &mut out).unwrap();
        out
    }

    #[test]
    fn test_obfuscation_sample() {
        // Privacy key of NetKey 7dd7364cd842ad18c17c2b820c84c3d6
        let privacy_key = block("8b84eedec100067d670971dd2aa700cf");
        let encrypted = hex::decode("b5e5bfdacbaf6cb7fb6bff871f035444ce83a670df").unwrap();
        let fields = [0x80, 0x00, 0x00, 0x01, 0x12, 0x01];

        let obfuscated = obfuscate(&privacy_key, 0x12345678, &encrypted, fields).unwrap();
        assert_eq!(hex::encode(obfuscated), "eca487516765");

        let restored = obfuscate(&privacy_key, 0x12345678, &encrypted, obfuscated).unwrap();
        assert_eq!(restored, fields);
    }

    #[test]
    fn test_short_payload() {
        assert!(matches!(
            pecb(&[0u8; 16], 0, &[1, 2, 3]),
            Err(CryptoError::ShortInput { need: 7, have: 3 })
        ));
    }
}
