//! Environment configuration (prefix `MESHCORE_`).

use std::path::PathBuf;

/// Which transport configuration selects. Serial is the default when
/// nothing is set (with auto-detection of the port).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Serial,
    Tcp,
    Ble,
}

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Empty string triggers auto-detection.
    pub serial_port: String,
    pub serial_baudrate: u32,
    pub tcp_host: String,
    pub tcp_port: u16,
    pub ble_address: String,
    pub ble_pin: String,
    pub database_path: PathBuf,
    /// DEBUG | INFO | WARNING | ERROR.
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    Invalid { var: String, value: String },

    #[error("at most one of MESHCORE_SERIAL_PORT, MESHCORE_TCP_HOST, MESHCORE_BLE_ADDRESS may be set")]
    ConflictingTransports,

    #[error("MESHCORE_BLE_PIN is required when MESHCORE_BLE_ADDRESS is set")]
    MissingBlePin,

    #[error("BLE support is not compiled in (enable the `ble` feature)")]
    BleUnavailable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial_port: String::new(),
            serial_baudrate: 115_200,
            tcp_host: String::new(),
            tcp_port: 4000,
            ble_address: String::new(),
            ble_pin: String::new(),
            database_path: PathBuf::from("data/meshcore.db"),
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source (tests inject maps here).
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(port) = get("MESHCORE_SERIAL_PORT") {
            config.serial_port = port;
        }
        if let Some(baud) = get("MESHCORE_SERIAL_BAUDRATE") {
            config.serial_baudrate = baud.parse().map_err(|_| ConfigError::Invalid {
                var: "MESHCORE_SERIAL_BAUDRATE".to_string(),
                value: baud,
            })?;
        }
        if let Some(host) = get("MESHCORE_TCP_HOST") {
            config.tcp_host = host;
        }
        if let Some(port) = get("MESHCORE_TCP_PORT") {
            config.tcp_port = port.parse().map_err(|_| ConfigError::Invalid {
                var: "MESHCORE_TCP_PORT".to_string(),
                value: port,
            })?;
        }
        if let Some(address) = get("MESHCORE_BLE_ADDRESS") {
            config.ble_address = address;
        }
        if let Some(pin) = get("MESHCORE_BLE_PIN") {
            config.ble_pin = pin;
        }
        if let Some(path) = get("MESHCORE_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(level) = get("MESHCORE_LOG_LEVEL") {
            let level = level.to_uppercase();
            if !matches!(level.as_str(), "DEBUG" | "INFO" | "WARNING" | "ERROR") {
                return Err(ConfigError::Invalid {
                    var: "MESHCORE_LOG_LEVEL".to_string(),
                    value: level,
                });
            }
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let set = [
            !self.serial_port.is_empty(),
            !self.tcp_host.is_empty(),
            !self.ble_address.is_empty(),
        ];
        if set.iter().filter(|&&s| s).count() > 1 {
            return Err(ConfigError::ConflictingTransports);
        }
        if !self.ble_address.is_empty() {
            if self.ble_pin.is_empty() {
                return Err(ConfigError::MissingBlePin);
            }
            if cfg!(not(feature = "ble")) {
                return Err(ConfigError::BleUnavailable);
            }
        }
        Ok(())
    }

    pub fn connection_type(&self) -> ConnectionType {
        if !self.tcp_host.is_empty() {
            ConnectionType::Tcp
        } else if !self.ble_address.is_empty() {
            ConnectionType::Ble
        } else {
            ConnectionType::Serial
        }
    }

    /// RPC socket lives next to the database file.
    pub fn socket_path(&self) -> PathBuf {
        self.database_path
            .parent()
            .map(|dir| dir.join("meshgate.sock"))
            .unwrap_or_else(|| PathBuf::from("meshgate.sock"))
    }

    /// `tracing_subscriber` filter directive for the configured level.
    pub fn log_filter(&self) -> String {
        let level = match self.log_level.as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" => "error",
            _ => "info",
        };
        format!("meshgate={level}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_map(&[]).expect("config");
        assert_eq!(config.serial_port, "");
        assert_eq!(config.serial_baudrate, 115_200);
        assert_eq!(config.tcp_port, 4000);
        assert_eq!(config.log_level, "INFO");
        assert_eq!(config.connection_type(), ConnectionType::Serial);
    }

    #[test]
    fn test_tcp_selected_when_host_set() {
        let config = from_map(&[("MESHCORE_TCP_HOST", "10.0.0.5")]).expect("config");
        assert_eq!(config.connection_type(), ConnectionType::Tcp);
    }

    #[test]
    fn test_conflicting_transports_rejected() {
        let result = from_map(&[
            ("MESHCORE_SERIAL_PORT", "/dev/ttyACM0"),
            ("MESHCORE_TCP_HOST", "10.0.0.5"),
        ]);
        assert!(matches!(result, Err(ConfigError::ConflictingTransports)));
    }

    #[test]
    fn test_ble_requires_pin() {
        let result = from_map(&[("MESHCORE_BLE_ADDRESS", "AA:BB:CC:DD:EE:FF")]);
        assert!(matches!(
            result,
            Err(ConfigError::MissingBlePin) | Err(ConfigError::BleUnavailable)
        ));
    }

    #[test]
    fn test_invalid_baudrate_rejected() {
        let result = from_map(&[("MESHCORE_SERIAL_BAUDRATE", "fast")]);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let result = from_map(&[("MESHCORE_LOG_LEVEL", "TRACE")]);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_socket_path_next_to_database() {
        let config = from_map(&[("MESHCORE_DATABASE_PATH", "/var/lib/meshgate/gw.db")])
            .expect("config");
        assert_eq!(
            config.socket_path(),
            PathBuf::from("/var/lib/meshgate/meshgate.sock")
        );
    }

    #[test]
    fn test_log_filter_mapping() {
        let config = from_map(&[("MESHCORE_LOG_LEVEL", "WARNING")]).expect("config");
        assert_eq!(config.log_filter(), "meshgate=warn");
    }
}
