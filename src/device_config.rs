// Device Configuration Module
// The eight operator-editable string parameters (broker connection settings
// plus GPIO assignments) with their persisted-form length limits and defaults.

use log::warn;
use serde::{Deserialize, Serialize};

// Field length limits mirror the persisted and provisioning-form
// representations (buffer sizes of the original hardware revision).
pub const MAX_SERVER_LEN: usize = 39;
pub const MAX_PORT_LEN: usize = 5;
pub const MAX_USER_LEN: usize = 39;
pub const MAX_PASSWORD_LEN: usize = 39;
pub const MAX_TOPIC_LEN: usize = 39;
pub const MAX_PIN_LEN: usize = 2;

// Compiled-in defaults, applied when no prior save exists or a field
// fails validation.
pub const DEFAULT_PORT: &str = "1883";
pub const DEFAULT_TOPIC: &str = "esp32solo";
pub const DEFAULT_BUTTON_PIN: u8 = 0;
pub const DEFAULT_LED_PIN: u8 = 14;
pub const DEFAULT_POWER_PIN: u8 = 5;

// Highest digital I/O line on the target (ESP32 exposes GPIO0..GPIO39).
const MAX_GPIO: u8 = 39;

/// One entry of the configuration form/persistence schema.
pub struct ConfigField {
    pub key: &'static str,
    pub label: &'static str,
    pub max_len: usize,
}

/// The full schema, in persisted-key order. `server` doubles as the
/// "a save exists" sentinel in the config store.
pub const CONFIG_FIELDS: [ConfigField; 8] = [
    ConfigField { key: "server", label: "MQTT server", max_len: MAX_SERVER_LEN },
    ConfigField { key: "port", label: "MQTT port", max_len: MAX_PORT_LEN },
    ConfigField { key: "user", label: "MQTT username", max_len: MAX_USER_LEN },
    ConfigField { key: "password", label: "MQTT password", max_len: MAX_PASSWORD_LEN },
    ConfigField { key: "topic", label: "MQTT topic", max_len: MAX_TOPIC_LEN },
    ConfigField { key: "button_pin", label: "Reset button pin", max_len: MAX_PIN_LEN },
    ConfigField { key: "led_pin", label: "Status LED pin", max_len: MAX_PIN_LEN },
    ConfigField { key: "power_pin", label: "Power control pin", max_len: MAX_PIN_LEN },
];

/// Parsed GPIO assignments for the three lines the controller drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinAssignment {
    pub button: u8,
    pub indicator: u8,
    pub output: u8,
}

/// Named string parameters loaded once at boot, optionally overwritten by
/// the provisioning portal, and written back only when a save was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub server: String,
    pub port: String,
    pub user: String,
    pub password: String,
    pub topic: String,
    pub button_pin: String,
    pub led_pin: String,
    pub power_pin: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: DEFAULT_PORT.to_string(),
            user: String::new(),
            password: String::new(),
            topic: DEFAULT_TOPIC.to_string(),
            button_pin: DEFAULT_BUTTON_PIN.to_string(),
            led_pin: DEFAULT_LED_PIN.to_string(),
            power_pin: DEFAULT_POWER_PIN.to_string(),
        }
    }
}

impl DeviceConfig {
    /// Read a field by its persisted key.
    pub fn get(&self, key: &str) -> Option<&str> {
        let value = match key {
            "server" => &self.server,
            "port" => &self.port,
            "user" => &self.user,
            "password" => &self.password,
            "topic" => &self.topic,
            "button_pin" => &self.button_pin,
            "led_pin" => &self.led_pin,
            "power_pin" => &self.power_pin,
            _ => return None,
        };
        Some(value.as_str())
    }

    /// Write a field by its persisted key, clamping to the field's maximum
    /// length. Returns false for an unknown key.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        let Some(field) = CONFIG_FIELDS.iter().find(|f| f.key == key) else {
            warn!("ignoring unknown config field '{}'", key);
            return false;
        };
        let value = clamp_field(value, field.max_len);
        match key {
            "server" => self.server = value,
            "port" => self.port = value,
            "user" => self.user = value,
            "password" => self.password = value,
            "topic" => self.topic = value,
            "button_pin" => self.button_pin = value,
            "led_pin" => self.led_pin = value,
            "power_pin" => self.power_pin = value,
            _ => unreachable!(),
        }
        true
    }

    /// Re-clamp every field to its maximum length. Cheap to call before a
    /// save; fields written through `set` are already within bounds.
    pub fn sanitize(&mut self) {
        for field in &CONFIG_FIELDS {
            let current = self.get(field.key).unwrap_or_default();
            if current.len() > field.max_len {
                let clamped = clamp_field(current, field.max_len);
                self.set(field.key, &clamped);
            }
        }
    }

    /// Parse the three pin fields, failing closed to the compiled-in
    /// default for anything that is not a valid GPIO line.
    pub fn pins(&self) -> PinAssignment {
        PinAssignment {
            button: parse_pin(&self.button_pin, DEFAULT_BUTTON_PIN),
            indicator: parse_pin(&self.led_pin, DEFAULT_LED_PIN),
            output: parse_pin(&self.power_pin, DEFAULT_POWER_PIN),
        }
    }
}

/// Deterministic truncation to `max_len` bytes, backing off to the nearest
/// char boundary so the result is always valid UTF-8.
pub fn clamp_field(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    warn!(
        "field value truncated from {} to {} bytes",
        value.len(),
        end
    );
    value[..end].to_string()
}

fn parse_pin(field: &str, fallback: u8) -> u8 {
    match field.trim().parse::<u8>() {
        Ok(pin) if pin <= MAX_GPIO => pin,
        _ => {
            warn!(
                "pin field '{}' is not a valid GPIO line, using {}",
                field, fallback
            );
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = DeviceConfig::default();
        assert_eq!(config.server, "");
        assert_eq!(config.port, "1883");
        assert_eq!(config.user, "");
        assert_eq!(config.password, "");
        assert_eq!(config.topic, "esp32solo");
        assert_eq!(config.button_pin, "0");
        assert_eq!(config.led_pin, "14");
        assert_eq!(config.power_pin, "5");
    }

    #[test]
    fn set_clamps_to_field_maximum() {
        let mut config = DeviceConfig::default();
        let long = "x".repeat(60);
        assert!(config.set("server", &long));
        assert_eq!(config.server.len(), MAX_SERVER_LEN);

        assert!(config.set("port", "123456"));
        assert_eq!(config.port, "12345");
    }

    #[test]
    fn clamp_respects_char_boundaries() {
        // 'é' is two bytes; a naive byte cut at 3 would split it.
        let clamped = clamp_field("aaéé", 3);
        assert_eq!(clamped, "aa");
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut config = DeviceConfig::default();
        assert!(!config.set("bogus", "value"));
        assert_eq!(config, DeviceConfig::default());
    }

    #[test]
    fn pins_parse_configured_values() {
        let mut config = DeviceConfig::default();
        config.set("button_pin", "4");
        config.set("led_pin", "2");
        config.set("power_pin", "27");
        assert_eq!(
            config.pins(),
            PinAssignment { button: 4, indicator: 2, output: 27 }
        );
    }

    #[test]
    fn invalid_pins_fail_closed_to_defaults() {
        let mut config = DeviceConfig::default();
        config.set("button_pin", "xx");
        config.set("led_pin", "99"); // parses but is not a GPIO line
        config.set("power_pin", "");
        assert_eq!(
            config.pins(),
            PinAssignment {
                button: DEFAULT_BUTTON_PIN,
                indicator: DEFAULT_LED_PIN,
                output: DEFAULT_POWER_PIN,
            }
        );
    }

    #[test]
    fn get_covers_every_schema_key() {
        let config = DeviceConfig::default();
        for field in &CONFIG_FIELDS {
            assert!(config.get(field.key).is_some(), "missing {}", field.key);
        }
        assert!(config.get("nope").is_none());
    }
}
