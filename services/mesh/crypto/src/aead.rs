//! AES-CCM with the two MIC sizes used by the mesh stack.

use aes::Aes128;
use ccm::aead::{Aead, KeyInit, Payload};
use ccm::consts::{U13, U4, U8};
use ccm::Ccm;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::BLOCK_SIZE;
use crate::nonce::NONCE_SIZE;

type Ccm32 = Ccm<Aes128, U4, U13>;
type Ccm64 = Ccm<Aes128, U8, U13>;

/// Length of the message integrity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MicSize {
    /// 32-bit MIC
    Short,
    /// 64-bit MIC
    Long,
}

impl MicSize {
    /// MIC length in octets
    pub fn len(self) -> usize {
        match self {
            MicSize::Short => 4,
            MicSize::Long => 8,
        }
    }

    /// MIC size selected by the SZMIC/ASZMIC flag
    pub fn from_szmic(szmic: bool) -> Self {
        if szmic {
            MicSize::Long
        } else {
            MicSize::Short
        }
    }
}

/// Encrypt `plaintext` and append the MIC
pub fn seal(
    key: &[u8; BLOCK_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
    mic: MicSize,
) -> CryptoResult<Vec<u8>> {
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let result = match mic {
        MicSize::Short => Ccm32::new(key.into()).encrypt(nonce.into(), payload),
        MicSize::Long => Ccm64::new(key.into()).encrypt(nonce.into(), payload),
    };
    result.map_err(|_| CryptoError::Encryption)
}

/// Verify the trailing MIC and decrypt
pub fn open(
    key: &[u8; BLOCK_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
    mic: MicSize,
) -> CryptoResult<Vec<u8>> {
    if ciphertext.len() < mic.len() {
        return Err(CryptoError::ShortInput {
            need: mic.len(),
            have: ciphertext.len(),
        });
    }
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    let result = match mic {
        MicSize::Short => Ccm32::new(key.into()).decrypt(nonce.into(), payload),
        MicSize::Long => Ccm64::new(key.into()).decrypt(nonce.into(), payload),
    };
    result.map_err(|_| CryptoError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const KEY: [u8; 16] = [0x42; 16];
    const NONCE: [u8; 13] = [0x01; 13];

    #[test]
    fn test_seal_open() {
        let sealed = seal(&KEY, &NONCE, b"hello mesh", &[], MicSize::Short).unwrap();
        assert_eq!(sealed.len(), 10 + 4);
        let opened = open(&KEY, &NONCE, &sealed, &[], MicSize::Short).unwrap();
        assert_eq!(opened, b"hello mesh");

        let sealed = seal(&KEY, &NONCE, b"hello mesh", &[], MicSize::Long).unwrap();
        assert_eq!(sealed.len(), 10 + 8);
        assert!(open(&KEY, &NONCE, &sealed, &[], MicSize::Short).is_err());
    }

    #[test]
    fn test_wrong_nonce_rejected() {
        let sealed = seal(&KEY, &NONCE, b"abc", &[], MicSize::Short).unwrap();
        let other = [0x02; 13];
        assert_eq!(
            open(&KEY, &other, &sealed, &[], MicSize::Short),
            Err(CryptoError::Authentication)
        );
    }

    #[test]
    fn test_short_ciphertext() {
        assert_eq!(
            open(&KEY, &NONCE, &[1, 2, 3], &[], MicSize::Short),
            Err(CryptoError::ShortInput { need: 4, have: 3 })
        );
    }

    proptest! {
        #[test]
        fn prop_any_bit_flip_rejected(
            msg in proptest::collection::vec(any::<u8>(), 1..32),
            long in any::<bool>(),
            bit in any::<usize>(),
        ) {
            let mic = MicSize::from_szmic(long);
            let mut sealed = seal(&KEY, &NONCE, &msg, &[], mic).unwrap();
            let bit = bit % (sealed.len() * 8);
            sealed[bit / 8] ^= 1 << (bit % 8);
            prop_assert_eq!(
                open(&KEY, &NONCE, &sealed, &[], mic),
                Err(CryptoError::Authentication)
            );
        }
    }
}
