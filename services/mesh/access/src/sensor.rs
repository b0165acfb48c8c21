//! Sensor Get and Sensor Status.
//!
//! Sensor Status carries a list of marshalled sensor readings. Each reading
//! starts with a Format A or Format B header:
//!
//! ```text
//! Format A (2 octets, LE u16):  bit 0 = 0 | length-1 (4 bits) | property id (11 bits)
//! Format B (3 octets):          bit 0 = 1 | length-1 (7 bits) || property id (LE u16)
//! ```
//!
//! A Format B length field of `0x7F` encodes an empty value.

use bytes::Bytes;
use mesh_wire::{ParamBuilder, ParamReader};

use crate::AccessError;

/// Largest property id Format A can carry
pub const FORMAT_A_MAX_PROPERTY_ID: u16 = 0x07FF;

/// Largest value Format A can carry
pub const FORMAT_A_MAX_LENGTH: usize = 16;

/// Largest value Format B can carry
pub const FORMAT_B_MAX_LENGTH: usize = 127;

const FORMAT_B_ZERO_LENGTH: u8 = 0x7F;

/// Sensor Get, optionally restricted to one property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorGet {
    /// Property to query; all sensors when absent
    pub property_id: Option<u16>,
}

impl SensorGet {
    /// Empty, or `PropertyId (2, LE)`
    pub fn build_parameters(&self) -> Bytes {
        match self.property_id {
            Some(id) => ParamBuilder::new().u16_le(id).build(),
            None => Bytes::new(),
        }
    }

    /// Decode a 0- or 2-octet parameter block
    pub fn parse_parameters(params: Bytes) -> Result<Self, AccessError> {
        let mut reader = ParamReader::new(params);
        let property_id = match reader.remaining() {
            0 => None,
            _ => Some(reader.u16_le()?),
        };
        reader.finish()?;
        Ok(Self { property_id })
    }
}

/// One marshalled sensor reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorReading {
    /// Device property id
    pub property_id: u16,
    /// Raw property value
    pub value: Bytes,
}

impl SensorReading {
    /// Whether this reading fits the 2-octet Format A header
    pub fn fits_format_a(&self) -> bool {
        self.property_id <= FORMAT_A_MAX_PROPERTY_ID
            && (1..=FORMAT_A_MAX_LENGTH).contains(&self.value.len())
    }

    fn marshal(&self, builder: ParamBuilder) -> Result<ParamBuilder, AccessError> {
        let builder = if self.fits_format_a() {
            let header = (self.property_id << 5) | (((self.value.len() - 1) as u16) << 1);
            builder.u16_le(header)
        } else {
            let length = match self.value.len() {
                0 => FORMAT_B_ZERO_LENGTH,
                n if n <= FORMAT_B_MAX_LENGTH => (n - 1) as u8,
                n => {
                    return Err(AccessError::InvalidParameters(format!(
                        "sensor value of {n} bytes exceeds {FORMAT_B_MAX_LENGTH}"
                    )))
                }
            };
            builder.u8((length << 1) | 0x01).u16_le(self.property_id)
        };
        Ok(builder.bytes(&self.value))
    }

    fn unmarshal(reader: &mut ParamReader) -> Result<Self, AccessError> {
        let first = reader.u8()?;
        let (property_id, length) = if first & 0x01 == 0 {
            let second = reader.u8()?;
            let header = u16::from_le_bytes([first, second]);
            (header >> 5, (((header >> 1) & 0x0F) + 1) as usize)
        } else {
            let length = match first >> 1 {
                FORMAT_B_ZERO_LENGTH => 0,
                n => n as usize + 1,
            };
            (reader.u16_le()?, length)
        };
        if reader.remaining() < length {
            return Err(AccessError::InvalidParameters(format!(
                "sensor property {property_id:#06x} needs {length} bytes, {} left",
                reader.remaining()
            )));
        }
        let value = reader.rest();
        let (value, rest) = (value.slice(..length), value.slice(length..));
        *reader = ParamReader::new(rest);
        Ok(Self { property_id, value })
    }
}

/// Sensor Status
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SensorStatus {
    /// Readings in the order they were marshalled
    pub readings: Vec<SensorReading>,
}

impl SensorStatus {
    /// Concatenation of marshalled readings
    pub fn build_parameters(&self) -> Result<Bytes, AccessError> {
        let mut builder = ParamBuilder::new();
        for reading in &self.readings {
            builder = reading.marshal(builder)?;
        }
        Ok(builder.build())
    }

    /// Decode every marshalled reading in the block
    pub fn parse_parameters(params: Bytes) -> Result<Self, AccessError> {
        let mut reader = ParamReader::new(params);
        let mut readings = Vec::new();
        while reader.remaining() > 0 {
            readings.push(SensorReading::unmarshal(&mut reader)?);
        }
        Ok(Self { readings })
    }

    /// Reading for a property, if present
    pub fn reading(&self, property_id: u16) -> Option<&SensorReading> {
        self.readings.iter().find(|r| r.property_id == property_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sensor_get() {
        assert!(SensorGet::default().build_parameters().is_empty());

        let get = SensorGet {
            property_id: Some(0x004F),
        };
        let params = get.build_parameters();
        assert_eq!(&params[..], &[0x4F, 0x00]);
        assert_eq!(SensorGet::parse_parameters(params).unwrap(), get);

        assert!(SensorGet::parse_parameters(Bytes::from_static(&[1])).is_err());
    }

    #[test]
    fn test_format_a_layout() {
        // Present ambient temperature (0x004F), one octet
        let status = SensorStatus {
            readings: vec![SensorReading {
                property_id: 0x004F,
                value: Bytes::from_static(&[0x28]),
            }],
        };
        let params = status.build_parameters().unwrap();
        assert_eq!(&params[..], &[0xE0, 0x09, 0x28]);
        assert_eq!(SensorStatus::parse_parameters(params).unwrap(), status);
    }

    #[test]
    fn test_format_b_layout() {
        let status = SensorStatus {
            readings: vec![
                SensorReading {
                    property_id: 0x0900,
                    value: Bytes::from_static(&[0x01, 0x02]),
                },
                SensorReading {
                    property_id: 0x0042,
                    value: Bytes::new(),
                },
            ],
        };
        let params = status.build_parameters().unwrap();
        assert_eq!(
            &params[..],
            &[0x03, 0x00, 0x09, 0x01, 0x02, 0xFF, 0x42, 0x00]
        );
        let parsed = SensorStatus::parse_parameters(params).unwrap();
        assert_eq!(parsed, status);
        assert!(parsed.reading(0x0042).unwrap().value.is_empty());
    }

    #[test]
    fn test_truncated_value() {
        let params = Bytes::from_static(&[0xE2, 0x09, 0x28]);
        assert!(matches!(
            SensorStatus::parse_parameters(params),
            Err(AccessError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_value_too_long() {
        let status = SensorStatus {
            readings: vec![SensorReading {
                property_id: 1,
                value: Bytes::from(vec![0u8; 128]),
            }],
        };
        assert!(status.build_parameters().is_err());
    }

    proptest! {
        #[test]
        fn prop_sensor_status_round_trip(
            readings in proptest::collection::vec(
                (any::<u16>(), proptest::collection::vec(any::<u8>(), 0..=40)),
                0..6,
            )
        ) {
            let status = SensorStatus {
                readings: readings
                    .into_iter()
                    .map(|(property_id, value)| SensorReading { property_id, value: Bytes::from(value) })
                    .collect(),
            };
            let params = status.build_parameters().unwrap();
            prop_assert_eq!(SensorStatus::parse_parameters(params).unwrap(), status);
        }
    }
}
