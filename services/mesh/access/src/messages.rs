//! The closed set of access messages, dispatched by opcode.

use bytes::{BufMut, Bytes, BytesMut};
use mesh_wire::{split_access_payload, Opcode};

use crate::config::{
    AppKeyAdd, AppKeyStatus, ModelAppBind, ModelAppStatus, ModelSubscriptionAdd,
    ModelSubscriptionStatus,
};
use crate::opcodes::*;
use crate::sensor::{SensorGet, SensorStatus};
use crate::AccessError;

/// Key an access message is encrypted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySelector {
    /// The target node's device key
    Device,
    /// An application key by index
    Application(u16),
}

/// Access message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessMessage {
    /// Config AppKey Add
    AppKeyAdd(AppKeyAdd),
    /// Config AppKey Status
    AppKeyStatus(AppKeyStatus),
    /// Config Model App Bind
    ModelAppBind(ModelAppBind),
    /// Config Model App Status
    ModelAppStatus(ModelAppStatus),
    /// Config Model Subscription Add
    ModelSubscriptionAdd(ModelSubscriptionAdd),
    /// Config Model Subscription Status
    ModelSubscriptionStatus(ModelSubscriptionStatus),
    /// Sensor Get
    SensorGet(SensorGet),
    /// Sensor Status
    SensorStatus(SensorStatus),
}

impl AccessMessage {
    /// Opcode owned by this message type
    pub fn opcode(&self) -> Opcode {
        match self {
            AccessMessage::AppKeyAdd(_) => CONFIG_APPKEY_ADD,
            AccessMessage::AppKeyStatus(_) => CONFIG_APPKEY_STATUS,
            AccessMessage::ModelAppBind(_) => CONFIG_MODEL_APP_BIND,
            AccessMessage::ModelAppStatus(_) => CONFIG_MODEL_APP_STATUS,
            AccessMessage::ModelSubscriptionAdd(_) => CONFIG_MODEL_SUBSCRIPTION_ADD,
            AccessMessage::ModelSubscriptionStatus(_) => CONFIG_MODEL_SUBSCRIPTION_STATUS,
            AccessMessage::SensorGet(_) => SENSOR_GET,
            AccessMessage::SensorStatus(_) => SENSOR_STATUS,
        }
    }

    /// Short name for logs and events
    pub fn name(&self) -> &'static str {
        match self {
            AccessMessage::AppKeyAdd(_) => "Config AppKey Add",
            AccessMessage::AppKeyStatus(_) => "Config AppKey Status",
            AccessMessage::ModelAppBind(_) => "Config Model App Bind",
            AccessMessage::ModelAppStatus(_) => "Config Model App Status",
            AccessMessage::ModelSubscriptionAdd(_) => "Config Model Subscription Add",
            AccessMessage::ModelSubscriptionStatus(_) => "Config Model Subscription Status",
            AccessMessage::SensorGet(_) => "Sensor Get",
            AccessMessage::SensorStatus(_) => "Sensor Status",
        }
    }

    /// Whether this is a configuration message, which only the device key may protect
    pub fn is_config(&self) -> bool {
        !matches!(
            self,
            AccessMessage::SensorGet(_) | AccessMessage::SensorStatus(_)
        )
    }

    /// Status opcode a peer answers this request with
    pub fn expected_status(&self) -> Option<Opcode> {
        match self {
            AccessMessage::AppKeyAdd(_) => Some(CONFIG_APPKEY_STATUS),
            AccessMessage::ModelAppBind(_) => Some(CONFIG_MODEL_APP_STATUS),
            AccessMessage::ModelSubscriptionAdd(_) => Some(CONFIG_MODEL_SUBSCRIPTION_STATUS),
            AccessMessage::SensorGet(_) => Some(SENSOR_STATUS),
            _ => None,
        }
    }

    /// NetKey index referenced in the parameters
    pub fn net_key_index(&self) -> Option<u16> {
        match self {
            AccessMessage::AppKeyAdd(m) => Some(m.net_key_index),
            AccessMessage::AppKeyStatus(m) => Some(m.net_key_index),
            _ => None,
        }
    }

    /// AppKey index referenced in the parameters
    pub fn app_key_index(&self) -> Option<u16> {
        match self {
            AccessMessage::AppKeyAdd(m) => Some(m.app_key_index),
            AccessMessage::AppKeyStatus(m) => Some(m.app_key_index),
            AccessMessage::ModelAppBind(m) => Some(m.app_key_index),
            AccessMessage::ModelAppStatus(m) => Some(m.app_key_index),
            _ => None,
        }
    }

    /// Parameter block for this message
    pub fn build_parameters(&self) -> Result<Bytes, AccessError> {
        Ok(match self {
            AccessMessage::AppKeyAdd(m) => m.build_parameters(),
            AccessMessage::AppKeyStatus(m) => m.build_parameters(),
            AccessMessage::ModelAppBind(m) => m.build_parameters(),
            AccessMessage::ModelAppStatus(m) => m.build_parameters(),
            AccessMessage::ModelSubscriptionAdd(m) => m.build_parameters(),
            AccessMessage::ModelSubscriptionStatus(m) => m.build_parameters(),
            AccessMessage::SensorGet(m) => m.build_parameters(),
            AccessMessage::SensorStatus(m) => m.build_parameters()?,
        })
    }

    /// Decode a parameter block for a known opcode
    pub fn parse(opcode: Opcode, params: Bytes) -> Result<Self, AccessError> {
        Ok(match opcode {
            CONFIG_APPKEY_ADD => AccessMessage::AppKeyAdd(AppKeyAdd::parse_parameters(params)?),
            CONFIG_APPKEY_STATUS => {
                AccessMessage::AppKeyStatus(AppKeyStatus::parse_parameters(params)?)
            }
            CONFIG_MODEL_APP_BIND => {
                AccessMessage::ModelAppBind(ModelAppBind::parse_parameters(params)?)
            }
            CONFIG_MODEL_APP_STATUS => {
                AccessMessage::ModelAppStatus(ModelAppStatus::parse_parameters(params)?)
            }
            CONFIG_MODEL_SUBSCRIPTION_ADD => AccessMessage::ModelSubscriptionAdd(
                ModelSubscriptionAdd::parse_parameters(params)?,
            ),
            CONFIG_MODEL_SUBSCRIPTION_STATUS => AccessMessage::ModelSubscriptionStatus(
                ModelSubscriptionStatus::parse_parameters(params)?,
            ),
            SENSOR_GET => AccessMessage::SensorGet(SensorGet::parse_parameters(params)?),
            SENSOR_STATUS => AccessMessage::SensorStatus(SensorStatus::parse_parameters(params)?),
            other => return Err(AccessError::UnknownOpcode(other)),
        })
    }

    /// Decode a parameter block that must carry `expected`
    pub fn parse_expected(
        expected: Opcode,
        actual: Opcode,
        params: Bytes,
    ) -> Result<Self, AccessError> {
        if expected != actual {
            return Err(AccessError::UnexpectedOpcode { expected, actual });
        }
        Self::parse(actual, params)
    }

    /// Access payload: `Opcode || Parameters`
    pub fn encode(&self) -> Result<Bytes, AccessError> {
        let params = self.build_parameters()?;
        let opcode = self.opcode();
        let mut buf = BytesMut::with_capacity(opcode.len() + params.len());
        opcode.encode(&mut buf);
        buf.put_slice(&params);
        Ok(buf.freeze())
    }

    /// Decode an access payload
    pub fn decode(payload: Bytes) -> Result<Self, AccessError> {
        let (opcode, params) = split_access_payload(payload)?;
        Self::parse(opcode, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStatus;
    use crate::sensor::SensorReading;
    use mesh_crypto::ApplicationKey;

    fn samples() -> Vec<AccessMessage> {
        vec![
            AccessMessage::AppKeyAdd(AppKeyAdd {
                net_key_index: 0,
                app_key_index: 1,
                app_key: ApplicationKey::from_bytes([7; 16]),
            }),
            AccessMessage::AppKeyStatus(AppKeyStatus {
                status: ConfigStatus::SUCCESS,
                net_key_index: 0,
                app_key_index: 1,
            }),
            AccessMessage::ModelAppBind(ModelAppBind {
                element_address: 0x0002,
                app_key_index: 1,
                model_id: 0x1100,
            }),
            AccessMessage::ModelAppStatus(ModelAppStatus {
                status: ConfigStatus(0x02),
                element_address: 0x0002,
                app_key_index: 1,
                model_id: 0x0059_0001,
            }),
            AccessMessage::ModelSubscriptionAdd(ModelSubscriptionAdd {
                element_address: 0x0002,
                subscription_address: 0xC001,
                model_id: 0x1100,
            }),
            AccessMessage::ModelSubscriptionStatus(ModelSubscriptionStatus {
                status: ConfigStatus::SUCCESS,
                element_address: 0x0002,
                subscription_address: 0xC001,
                model_id: 0x1100,
            }),
            AccessMessage::SensorGet(SensorGet { property_id: None }),
            AccessMessage::SensorStatus(SensorStatus {
                readings: vec![SensorReading {
                    property_id: 0x004F,
                    value: Bytes::from_static(&[0x28]),
                }],
            }),
        ]
    }

    #[test]
    fn test_every_message_round_trips() {
        for msg in samples() {
            let payload = msg.encode().unwrap();
            assert_eq!(AccessMessage::decode(payload).unwrap(), msg, "{}", msg.name());
        }
    }

    #[test]
    fn test_payload_starts_with_opcode() {
        let payload = AccessMessage::SensorGet(SensorGet::default()).encode().unwrap();
        assert_eq!(&payload[..], &[0x82, 0x31]);

        let msg = &samples()[0];
        let payload = msg.encode().unwrap();
        assert_eq!(payload[0], 0x00);
        assert_eq!(payload.len(), 1 + AppKeyAdd::PARAMS_LEN);
    }

    #[test]
    fn test_unknown_opcode() {
        let payload = Bytes::from_static(&[0x82, 0x01, 0x00]);
        assert_eq!(
            AccessMessage::decode(payload),
            Err(AccessError::UnknownOpcode(Opcode::new(0x8201)))
        );
    }

    #[test]
    fn test_unexpected_opcode() {
        let err = AccessMessage::parse_expected(
            SENSOR_STATUS,
            CONFIG_APPKEY_STATUS,
            Bytes::from_static(&[0, 0, 0, 0]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            AccessError::UnexpectedOpcode {
                expected: SENSOR_STATUS,
                actual: CONFIG_APPKEY_STATUS
            }
        );
    }

    #[test]
    fn test_key_and_status_metadata() {
        let msgs = samples();
        assert!(msgs[0].is_config());
        assert!(!msgs[6].is_config());
        assert_eq!(msgs[0].expected_status(), Some(CONFIG_APPKEY_STATUS));
        assert_eq!(msgs[6].expected_status(), Some(SENSOR_STATUS));
        assert_eq!(msgs[1].expected_status(), None);
        assert_eq!(msgs[2].app_key_index(), Some(1));
        assert_eq!(msgs[4].app_key_index(), None);
    }
}
