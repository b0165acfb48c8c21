//! Access layer opcodes.
//!
//! Opcodes occupy 1, 2 or 3 octets on the wire, selected by the top bits of
//! the first octet:
//!
//! ```text
//! 0xxxxxxx                      1 octet  (0x7F reserved)
//! 10xxxxxx xxxxxxxx             2 octets
//! 11xxxxxx xxxxxxxx xxxxxxxx    3 octets (vendor: opcode || company id)
//! ```

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::WireError;

/// Access opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Opcode(u32);

impl Opcode {
    /// Construct from a numeric value without validation
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Construct from a numeric value, rejecting values with no valid encoding
    pub fn try_new(value: u32) -> Result<Self, WireError> {
        let valid = match value {
            0x00..=0x7E => true,
            0x8000..=0xBFFF => true,
            0xC0_0000..=0xFF_FFFF => true,
            _ => false,
        };
        if valid {
            Ok(Self(value))
        } else {
            Err(WireError::Opcode(value))
        }
    }

    /// Numeric value
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Encoded length in octets
    pub fn len(self) -> usize {
        if self.0 < 0x80 {
            1
        } else if self.0 <= 0xFFFF {
            2
        } else {
            3
        }
    }

    /// Append the big-endian opcode octets
    pub fn encode(self, buf: &mut BytesMut) {
        match self.len() {
            1 => buf.put_u8(self.0 as u8),
            2 => buf.put_u16(self.0 as u16),
            _ => {
                buf.put_u8((self.0 >> 16) as u8);
                buf.put_u16(self.0 as u16);
            }
        }
    }

    /// Read an opcode from the front of an access payload
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if !buf.has_remaining() {
            return Err(WireError::need(1, 0));
        }
        let first = buf[0];
        let len = match first {
            0x7F => return Err(WireError::Opcode(first as u32)),
            b if b & 0x80 == 0 => 1,
            b if b & 0xC0 == 0x80 => 2,
            _ => 3,
        };
        if buf.remaining() < len {
            return Err(WireError::need(len, buf.remaining()));
        }
        let value = (0..len).fold(0u32, |acc, _| (acc << 8) | buf.get_u8() as u32);
        Ok(Self(value))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

impl From<Opcode> for u32 {
    fn from(opcode: Opcode) -> Self {
        opcode.0
    }
}

/// Split an access payload into its opcode and parameters
pub fn split_access_payload(mut payload: Bytes) -> Result<(Opcode, Bytes), WireError> {
    let opcode = Opcode::decode(&mut payload)?;
    Ok((opcode, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(opcode: Opcode) -> Vec<u8> {
        let mut buf = BytesMut::new();
        opcode.encode(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_opcode_lengths() {
        assert_eq!(encoded(Opcode::new(0x00)), vec![0x00]);
        assert_eq!(encoded(Opcode::new(0x52)), vec![0x52]);
        assert_eq!(encoded(Opcode::new(0x8231)), vec![0x82, 0x31]);
        assert_eq!(encoded(Opcode::new(0xC15900)), vec![0xC1, 0x59, 0x00]);
    }

    #[test]
    fn test_opcode_decode_by_prefix() {
        let mut buf = Bytes::from_static(&[0x80, 0x1F, 0xAA]);
        assert_eq!(Opcode::decode(&mut buf).unwrap(), Opcode::new(0x801F));
        assert_eq!(&buf[..], &[0xAA]);

        let (opcode, params) = split_access_payload(Bytes::from_static(&[0x52, 1, 2])).unwrap();
        assert_eq!(opcode.value(), 0x52);
        assert_eq!(&params[..], &[1, 2]);

        let mut buf = Bytes::from_static(&[0xC0, 0x01]);
        assert!(matches!(
            Opcode::decode(&mut buf),
            Err(WireError::Incomplete { need: 3, have: 2 })
        ));
    }

    #[test]
    fn test_opcode_reserved() {
        let mut buf = Bytes::from_static(&[0x7F]);
        assert_eq!(Opcode::decode(&mut buf), Err(WireError::Opcode(0x7F)));
        assert!(Opcode::try_new(0x7F).is_err());
        assert!(Opcode::try_new(0x80).is_err());
        assert!(Opcode::try_new(0xC000).is_err());
        assert!(Opcode::try_new(0x803D).is_ok());
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(Opcode::new(0x8003).to_string(), "0x8003");
    }
}
