//! AES-CMAC and the mesh key derivation functions.
//!
//! ```text
//! s1(M)          = CMAC(0^128, M)
//! k1(N, SALT, P) = CMAC(CMAC(SALT, N), P)
//! k2(N, P)       = NID || EncryptionKey || PrivacyKey   (T = CMAC(s1("smk2"), N))
//! k3(N)          = CMAC(CMAC(s1("smk3"), N), "id64" || 0x01) mod 2^64
//! k4(N)          = CMAC(CMAC(s1("smk4"), N), "id6" || 0x01) mod 2^6
//! ```

use aes::cipher::generic_array::GenericArray;
use aes::Aes128;
use cmac::{Cmac, Mac};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an AES-128 key or CMAC output
pub const BLOCK_SIZE: usize = 16;

/// AES-CMAC over the concatenation of `parts`
pub fn aes_cmac(key: &[u8; BLOCK_SIZE], parts: &[&[u8]]) -> [u8; BLOCK_SIZE] {
    let mut mac = <Cmac<Aes128> as Mac>::new(GenericArray::from_slice(key));
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Salt generation function
pub fn s1(m: &[u8]) -> [u8; BLOCK_SIZE] {
    aes_cmac(&[0u8; BLOCK_SIZE], &[m])
}

/// Key derivation function used for the device key and session keys
pub fn k1(n: &[u8], salt: &[u8; BLOCK_SIZE], p: &[u8]) -> [u8; BLOCK_SIZE] {
    let t = aes_cmac(salt, &[n]);
    aes_cmac(&t, &[p])
}

/// Output of [`k2`]
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct K2Output {
    /// Network identifier (7 bits)
    pub nid: u8,
    /// Network encryption key
    pub encryption_key: [u8; BLOCK_SIZE],
    /// Network privacy key
    pub privacy_key: [u8; BLOCK_SIZE],
}

/// Network key material derivation
pub fn k2(n: &[u8; BLOCK_SIZE], p: &[u8]) -> K2Output {
    let salt = s1(b"smk2");
    let t = aes_cmac(&salt, &[n]);
    let t1 = aes_cmac(&t, &[p, &[0x01]]);
    let t2 = aes_cmac(&t, &[&t1, p, &[0x02]]);
    let t3 = aes_cmac(&t, &[&t2, p, &[0x03]]);
    K2Output {
        nid: t1[BLOCK_SIZE - 1] & 0x7F,
        encryption_key: t2,
        privacy_key: t3,
    }
}

/// Network ID derivation
pub fn k3(n: &[u8; BLOCK_SIZE]) -> [u8; 8] {
    let salt = s1(b"smk3");
    let t = aes_cmac(&salt, &[n]);
    let out = aes_cmac(&t, &[b"id64", &[0x01]]);
    let mut id = [0u8; 8];
    id.copy_from_slice(&out[8..]);
    id
}

/// Application key identifier derivation
pub fn k4(n: &[u8; BLOCK_SIZE]) -> u8 {
    let salt = s1(b"smk4");
    let t = aes_cmac(&salt, &[n]);
    aes_cmac(&t, &[b"id6", &[0x01]])[BLOCK_SIZE - 1] & 0x3F
}
