//! Access parameter encoding and decoding.
//!
//! Access parameters are little-endian, with two quirks:
//!
//! - a NetKey/AppKey index pair packs two 12-bit indices into three octets
//! - a model identifier takes two octets when it fits in a signed 16-bit
//!   value (SIG model) and four octets otherwise (vendor model)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::WireError;

/// Largest key index (12 bits)
pub const MAX_KEY_INDEX: u16 = 0x0FFF;

/// Encoded size of a NetKey/AppKey index pair
pub const KEY_INDEX_PAIR_SIZE: usize = 3;

/// Encoded size of a SIG model identifier
pub const SIG_MODEL_ID_SIZE: usize = 2;

/// Encoded size of a vendor model identifier
pub const VENDOR_MODEL_ID_SIZE: usize = 4;

/// Whether a model id is written in the two-octet form
pub fn is_sig_model_id(model_id: u32) -> bool {
    i16::try_from(model_id as i32).is_ok()
}

/// Pack a NetKey index and AppKey index into three octets
pub fn pack_key_indexes(net_key_index: u16, app_key_index: u16) -> [u8; KEY_INDEX_PAIR_SIZE] {
    let net = net_key_index & MAX_KEY_INDEX;
    let app = app_key_index & MAX_KEY_INDEX;
    [
        (net & 0xFF) as u8,
        (((app & 0x0F) << 4) as u8) | ((net >> 8) as u8 & 0x0F),
        (app >> 4) as u8,
    ]
}

/// Unpack a NetKey/AppKey index pair
pub fn unpack_key_indexes(octets: [u8; KEY_INDEX_PAIR_SIZE]) -> (u16, u16) {
    let net = octets[0] as u16 | (((octets[1] & 0x0F) as u16) << 8);
    let app = (octets[1] >> 4) as u16 | ((octets[2] as u16) << 4);
    (net, app)
}

/// Builder for access message parameters
#[derive(Debug, Clone, Default)]
pub struct ParamBuilder {
    buf: BytesMut,
}

impl ParamBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Append a single octet
    pub fn u8(mut self, value: u8) -> Self {
        self.buf.put_u8(value);
        self
    }

    /// Append a little-endian u16
    pub fn u16_le(mut self, value: u16) -> Self {
        self.buf.put_u16_le(value);
        self
    }

    /// Append a little-endian address
    pub fn address(self, address: u16) -> Self {
        self.u16_le(address)
    }

    /// Append a single 12-bit key index in two octets
    pub fn key_index(self, index: u16) -> Self {
        self.u16_le(index & MAX_KEY_INDEX)
    }

    /// Append a packed NetKey/AppKey index pair
    pub fn key_index_pair(mut self, net_key_index: u16, app_key_index: u16) -> Self {
        self.buf
            .put_slice(&pack_key_indexes(net_key_index, app_key_index));
        self
    }

    /// Append a model identifier in its two- or four-octet form
    pub fn model_id(mut self, model_id: u32) -> Self {
        if is_sig_model_id(model_id) {
            self.buf.put_i16_le(model_id as i32 as i16);
        } else {
            let be = model_id.to_be_bytes();
            self.buf.put_slice(&[be[1], be[0], be[3], be[2]]);
        }
        self
    }

    /// Append raw octets
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.buf.put_slice(data);
        self
    }

    /// Finish and return the parameter block
    pub fn build(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over a received parameter block
#[derive(Debug, Clone)]
pub struct ParamReader {
    buf: Bytes,
}

impl ParamReader {
    /// Wrap a parameter block
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Octets left to read
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, need: usize) -> Result<(), WireError> {
        if self.buf.remaining() < need {
            Err(WireError::need(need, self.buf.remaining()))
        } else {
            Ok(())
        }
    }

    /// Read a single octet
    pub fn u8(&mut self) -> Result<u8, WireError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a little-endian u16
    pub fn u16_le(&mut self) -> Result<u16, WireError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    /// Read a little-endian address
    pub fn address(&mut self) -> Result<u16, WireError> {
        self.u16_le()
    }

    /// Read a single key index
    pub fn key_index(&mut self) -> Result<u16, WireError> {
        Ok(self.u16_le()? & MAX_KEY_INDEX)
    }

    /// Read a packed NetKey/AppKey index pair
    pub fn key_index_pair(&mut self) -> Result<(u16, u16), WireError> {
        self.ensure(KEY_INDEX_PAIR_SIZE)?;
        let mut octets = [0u8; KEY_INDEX_PAIR_SIZE];
        self.buf.copy_to_slice(&mut octets);
        Ok(unpack_key_indexes(octets))
    }

    /// Read a model identifier occupying the rest of the block
    pub fn model_id(&mut self) -> Result<u32, WireError> {
        match self.buf.remaining() {
            SIG_MODEL_ID_SIZE => Ok(self.buf.get_i16_le() as i32 as u32),
            VENDOR_MODEL_ID_SIZE => {
                let mut raw = [0u8; VENDOR_MODEL_ID_SIZE];
                self.buf.copy_to_slice(&mut raw);
                Ok(u32::from_be_bytes([raw[1], raw[0], raw[3], raw[2]]))
            }
            n if n < SIG_MODEL_ID_SIZE => Err(WireError::need(SIG_MODEL_ID_SIZE, n)),
            n => Err(WireError::Size(n)),
        }
    }

    /// Take the remaining octets
    pub fn rest(&mut self) -> Bytes {
        self.buf.split_to(self.buf.remaining())
    }

    /// Require that the block has been fully consumed
    pub fn finish(self) -> Result<(), WireError> {
        match self.buf.remaining() {
            0 => Ok(()),
            n => Err(WireError::Trailing(n)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_index_packing() {
        assert_eq!(pack_key_indexes(0x002, 0x001), [0x02, 0x10, 0x00]);
        assert_eq!(pack_key_indexes(0x456, 0x123), [0x56, 0x34, 0x12]);
        assert_eq!(unpack_key_indexes([0x56, 0x34, 0x12]), (0x456, 0x123));

        // Indices above 12 bits are masked
        assert_eq!(pack_key_indexes(0xFFFF, 0xFFFF), [0xFF, 0xFF, 0xFF]);
        assert_eq!(unpack_key_indexes([0xFF, 0xFF, 0xFF]), (0xFFF, 0xFFF));
    }

    #[test]
    fn test_sig_model_id() {
        let params = ParamBuilder::new()
            .address(0x0201)
            .address(0x0403)
            .model_id(0x1000)
            .build();
        assert_eq!(&params[..], &[0x01, 0x02, 0x03, 0x04, 0x00, 0x10]);

        let mut reader = ParamReader::new(params);
        assert_eq!(reader.address().unwrap(), 0x0201);
        assert_eq!(reader.address().unwrap(), 0x0403);
        assert_eq!(reader.model_id().unwrap(), 0x1000);
        reader.finish().unwrap();
    }

    #[test]
    fn test_vendor_model_id() {
        assert!(!is_sig_model_id(0x0059_0001));
        let params = ParamBuilder::new().model_id(0x0059_0001).build();
        assert_eq!(&params[..], &[0x59, 0x00, 0x01, 0x00]);
        assert_eq!(ParamReader::new(params).model_id().unwrap(), 0x0059_0001);
    }

    #[test]
    fn test_model_id_signed_range() {
        // 0x8000 does not fit in an i16 and takes the four-octet form
        assert!(!is_sig_model_id(0x8000));
        assert_eq!(ParamBuilder::new().model_id(0x8000).build().len(), 4);

        // A sign-extended value still fits and round-trips through two octets
        assert!(is_sig_model_id(0xFFFF_8000));
        let params = ParamBuilder::new().model_id(0xFFFF_8000).build();
        assert_eq!(&params[..], &[0x00, 0x80]);
        assert_eq!(ParamReader::new(params).model_id().unwrap(), 0xFFFF_8000);
    }

    #[test]
    fn test_reader_errors() {
        let mut reader = ParamReader::new(Bytes::from_static(&[0x01]));
        assert_eq!(
            reader.u16_le(),
            Err(WireError::Incomplete { need: 2, have: 1 })
        );
        assert_eq!(reader.model_id(), Err(WireError::Incomplete { need: 2, have: 1 }));

        let mut reader = ParamReader::new(Bytes::from_static(&[1, 2, 3]));
        assert_eq!(reader.model_id(), Err(WireError::Size(3)));

        let mut reader = ParamReader::new(Bytes::from_static(&[1, 2, 3]));
        reader.u8().unwrap();
        assert_eq!(reader.finish(), Err(WireError::Trailing(2)));
    }
}
