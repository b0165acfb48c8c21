//! Access layer messages for the mesh provisioner.
//!
//! Every supported message is a variant of [`AccessMessage`]. A variant
//! owns one opcode, knows how to build its parameter block and how to parse
//! a received one. Decoding an access payload dispatches on the opcode;
//! opcodes outside the set surface as [`AccessError::UnknownOpcode`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod messages;
pub mod opcodes;
pub mod sensor;

pub use config::{
    AppKeyAdd, AppKeyStatus, ConfigStatus, ModelAppBind, ModelAppStatus, ModelSubscriptionAdd,
    ModelSubscriptionStatus,
};
pub use error::AccessError;
pub use messages::{AccessMessage, KeySelector};
pub use sensor::{SensorGet, SensorReading, SensorStatus};
