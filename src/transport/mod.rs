//! MQTT plumbing for the bridge binary: broker endpoint handling and the
//! JSON published for each violation.

mod mqtt;
mod payload;

pub use mqtt::{parse_mqtt_endpoint, validate_loopback_addr, MqttEndpoint, TlsMaterials};
pub use payload::{violation_payload, ViolationMessage};
