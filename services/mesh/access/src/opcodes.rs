//! Opcodes of the supported access messages.

use mesh_wire::Opcode;

/// Config AppKey Add
pub const CONFIG_APPKEY_ADD: Opcode = Opcode::new(0x00);
/// Config AppKey Status
pub const CONFIG_APPKEY_STATUS: Opcode = Opcode::new(0x8003);
/// Config Model App Bind
pub const CONFIG_MODEL_APP_BIND: Opcode = Opcode::new(0x803D);
/// Config Model App Status
pub const CONFIG_MODEL_APP_STATUS: Opcode = Opcode::new(0x803E);
/// Config Model Subscription Add
pub const CONFIG_MODEL_SUBSCRIPTION_ADD: Opcode = Opcode::new(0x801B);
/// Config Model Subscription Status
pub const CONFIG_MODEL_SUBSCRIPTION_STATUS: Opcode = Opcode::new(0x801F);
/// Sensor Get
pub const SENSOR_GET: Opcode = Opcode::new(0x8231);
/// Sensor Status
pub const SENSOR_STATUS: Opcode = Opcode::new(0x52);
