//! 13-octet AES-CCM nonces.
//!
//! ```text
//! network:     0x00 | CTL|TTL | SEQ(3) | SRC(2) | 0x0000 | IVIndex(4)
//! application: 0x01 | ASZMIC<<7 | SEQ(3) | SRC(2) | DST(2) | IVIndex(4)
//! device:      0x02 | ASZMIC<<7 | SEQ(3) | SRC(2) | DST(2) | IVIndex(4)
//! ```

/// Nonce length
pub const NONCE_SIZE: usize = 13;

/// Nonce type octet
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceType {
    /// Network layer
    Network = 0x00,
    /// Upper transport under an application key
    Application = 0x01,
    /// Upper transport under a device key
    Device = 0x02,
}

fn build(typ: NonceType, second: u8, seq: u32, src: u16, dst: u16, iv_index: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0] = typ as u8;
    nonce[1] = second;
    nonce[2..5].copy_from_slice(&seq.to_be_bytes()[1..]);
    nonce[5..7].copy_from_slice(&src.to_be_bytes());
    nonce[7..9].copy_from_slice(&dst.to_be_bytes());
    nonce[9..].copy_from_slice(&iv_index.to_be_bytes());
    nonce
}

/// Network nonce
pub fn network_nonce(ctl_ttl: u8, seq: u32, src: u16, iv_index: u32) -> [u8; NONCE_SIZE] {
    build(NonceType::Network, ctl_ttl, seq, src, 0x0000, iv_index)
}

/// Upper transport nonce; `akf` selects application over device nonce
pub fn upper_transport_nonce(
    akf: bool,
    aszmic: bool,
    seq: u32,
    src: u16,
    dst: u16,
    iv_index: u32,
) -> [u8; NONCE_SIZE] {
    let typ = if akf {
        NonceType::Application
    } else {
        NonceType::Device
    };
    build(typ, (aszmic as u8) << 7, seq, src, dst, iv_index)
}
