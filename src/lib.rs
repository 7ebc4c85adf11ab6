// MQTT power switch firmware for the ESP32-solo board: toggles a relay
// output from broker status traffic, provisions WiFi and broker settings
// through a temporary access point, and clears the network association on a
// long press of the reset button.
//
// The control core below is hardware-agnostic; the ESP-IDF service
// implementations live in the `espidf`-gated modules at the bottom.

pub mod broker;
pub mod button;
pub mod clock;
pub mod config_store;
pub mod controller;
pub mod device_config;
pub mod gpio;
pub mod provisioning;

#[cfg(target_os = "espidf")]
pub mod board;
#[cfg(target_os = "espidf")]
pub mod mqtt_link;
#[cfg(target_os = "espidf")]
pub mod nvs_store;
#[cfg(target_os = "espidf")]
pub mod wifi_portal;
