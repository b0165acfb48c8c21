//! Configuration messages.
//!
//! All configuration messages are encrypted with the target node's device
//! key. Addresses and single key indices are little-endian; AppKey Add packs
//! both indices into three octets; model identifiers follow the SIG/vendor
//! two-or-four octet rule.

use std::fmt;

use bytes::Bytes;
use mesh_crypto::{ApplicationKey, KEY_SIZE};
use mesh_wire::{ParamBuilder, ParamReader};

use crate::AccessError;

/// Status code carried by configuration status messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigStatus(pub u8);

impl ConfigStatus {
    /// Success
    pub const SUCCESS: ConfigStatus = ConfigStatus(0x00);

    /// Whether the request succeeded
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Human-readable status name
    pub fn name(self) -> &'static str {
        match self.0 {
            0x00 => "Success",
            0x01 => "Invalid Address",
            0x02 => "Invalid Model",
            0x03 => "Invalid AppKey Index",
            0x04 => "Invalid NetKey Index",
            0x05 => "Insufficient Resources",
            0x06 => "Key Index Already Stored",
            0x07 => "Invalid Publish Parameters",
            0x08 => "Not a Subscribe Model",
            0x09 => "Storage Failure",
            0x0A => "Feature Not Supported",
            0x0B => "Cannot Update",
            0x0C => "Cannot Remove",
            0x0D => "Cannot Bind",
            0x0E => "Temporarily Unable to Change State",
            0x0F => "Cannot Set",
            0x10 => "Unspecified Error",
            0x11 => "Invalid Binding",
            _ => "Reserved",
        }
    }
}

impl fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.0)
    }
}

/// Config AppKey Add: delivers an application key to a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppKeyAdd {
    /// NetKey the application key is bound to
    pub net_key_index: u16,
    /// Index of the application key
    pub app_key_index: u16,
    /// Application key
    pub app_key: ApplicationKey,
}

impl AppKeyAdd {
    /// Parameter block length
    pub const PARAMS_LEN: usize = 3 + KEY_SIZE;

    /// `NetKeyIndex | AppKeyIndex (3) || AppKey (16)`
    pub fn build_parameters(&self) -> Bytes {
        ParamBuilder::new()
            .key_index_pair(self.net_key_index, self.app_key_index)
            .bytes(self.app_key.as_bytes())
            .build()
    }

    /// Decode a 19-octet parameter block
    pub fn parse_parameters(params: Bytes) -> Result<Self, AccessError> {
        let mut reader = ParamReader::new(params);
        let (net_key_index, app_key_index) = reader.key_index_pair()?;
        let key = reader.rest();
        let app_key = ApplicationKey::try_from_slice(&key)
            .map_err(|e| AccessError::InvalidParameters(e.to_string()))?;
        Ok(Self {
            net_key_index,
            app_key_index,
            app_key,
        })
    }
}

/// Config AppKey Status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppKeyStatus {
    /// Result of the add
    pub status: ConfigStatus,
    /// NetKey index echoed back
    pub net_key_index: u16,
    /// AppKey index echoed back
    pub app_key_index: u16,
}

impl AppKeyStatus {
    /// `Status || NetKeyIndex | AppKeyIndex (3)`
    pub fn build_parameters(&self) -> Bytes {
        ParamBuilder::new()
            .u8(self.status.0)
            .key_index_pair(self.net_key_index, self.app_key_index)
            .build()
    }

    /// Decode a 4-octet parameter block
    pub fn parse_parameters(params: Bytes) -> Result<Self, AccessError> {
        let mut reader = ParamReader::new(params);
        let status = ConfigStatus(reader.u8()?);
        let (net_key_index, app_key_index) = reader.key_index_pair()?;
        reader.finish()?;
        Ok(Self {
            status,
            net_key_index,
            app_key_index,
        })
    }
}

/// Config Model Subscription Add
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSubscriptionAdd {
    /// Element hosting the model
    pub element_address: u16,
    /// Group address to subscribe to
    pub subscription_address: u16,
    /// SIG or vendor model identifier
    pub model_id: u32,
}

impl ModelSubscriptionAdd {
    /// `ElementAddress (2) || Address (2) || ModelId (2|4)`, little-endian
    pub fn build_parameters(&self) -> Bytes {
        ParamBuilder::new()
            .address(self.element_address)
            .address(self.subscription_address)
            .model_id(self.model_id)
            .build()
    }

    /// Decode a 6- or 8-octet parameter block
    pub fn parse_parameters(params: Bytes) -> Result<Self, AccessError> {
        let mut reader = ParamReader::new(params);
        Ok(Self {
            element_address: reader.address()?,
            subscription_address: reader.address()?,
            model_id: reader.model_id()?,
        })
    }
}

/// Config Model Subscription Status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSubscriptionStatus {
    /// Result of the request
    pub status: ConfigStatus,
    /// Element hosting the model
    pub element_address: u16,
    /// Subscribed address
    pub subscription_address: u16,
    /// SIG or vendor model identifier
    pub model_id: u32,
}

impl ModelSubscriptionStatus {
    /// `Status || ElementAddress || Address || ModelId`
    pub fn build_parameters(&self) -> Bytes {
        ParamBuilder::new()
            .u8(self.status.0)
            .address(self.element_address)
            .address(self.subscription_address)
            .model_id(self.model_id)
            .build()
    }

    /// Decode a 7- or 9-octet parameter block
    pub fn parse_parameters(params: Bytes) -> Result<Self, AccessError> {
        let mut reader = ParamReader::new(params);
        Ok(Self {
            status: ConfigStatus(reader.u8()?),
            element_address: reader.address()?,
            subscription_address: reader.address()?,
            model_id: reader.model_id()?,
        })
    }
}

/// Config Model App Bind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelAppBind {
    /// Element hosting the model
    pub element_address: u16,
    /// Application key to bind
    pub app_key_index: u16,
    /// SIG or vendor model identifier
    pub model_id: u32,
}

impl ModelAppBind {
    /// `ElementAddress (2) || AppKeyIndex (2) || ModelId (2|4)`
    pub fn build_parameters(&self) -> Bytes {
        ParamBuilder::new()
            .address(self.element_address)
            .key_index(self.app_key_index)
            .model_id(self.model_id)
            .build()
    }

    /// Decode a 6- or 8-octet parameter block
    pub fn parse_parameters(params: Bytes) -> Result<Self, AccessError> {
        let mut reader = ParamReader::new(params);
        Ok(Self {
            element_address: reader.address()?,
            app_key_index: reader.key_index()?,
            model_id: reader.model_id()?,
        })
    }
}

/// Config Model App Status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelAppStatus {
    /// Result of the bind
    pub status: ConfigStatus,
    /// Element hosting the model
    pub element_address: u16,
    /// Application key index
    pub app_key_index: u16,
    /// SIG or vendor model identifier
    pub model_id: u32,
}

impl ModelAppStatus {
    /// `Status || ElementAddress || AppKeyIndex || ModelId`
    pub fn build_parameters(&self) -> Bytes {
        ParamBuilder::new()
            .u8(self.status.0)
            .address(self.element_address)
            .key_index(self.app_key_index)
            .model_id(self.model_id)
            .build()
    }

    /// Decode a 7- or 9-octet parameter block
    pub fn parse_parameters(params: Bytes) -> Result<Self, AccessError> {
        let mut reader = ParamReader::new(params);
        Ok(Self {
            status: ConfigStatus(reader.u8()?),
            element_address: reader.address()?,
            app_key_index: reader.key_index()?,
            model_id: reader.model_id()?,
        })
    }
}
