//! Environment-driven file locations. Everything else the agent needs lives
//! in the store or in the MQTT config file.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Location of the embedded database file.
    pub database_path: PathBuf,
    /// Location of the broker configuration JSON.
    pub mqtt_config_path: PathBuf,
    /// CA certificate used for the hosted broker's TLS endpoint.
    pub ca_cert_path: PathBuf,
}

impl Settings {
    pub fn from_env() -> Settings {
        Settings {
            database_path: expand_user(
                &std::env::var("BMS_IOT_DATABASE_PATH")
                    .unwrap_or_else(|_| "~/.bms/bms-iot.db".to_string()),
            ),
            mqtt_config_path: expand_user(
                &std::env::var("BMS_IOT_MQTT_CONFIG_PATH")
                    .unwrap_or_else(|_| "~/.bms-iot-mqtt-config.json".to_string()),
            ),
            ca_cert_path: expand_user(
                &std::env::var("BMS_IOT_CERT_PATH")
                    .unwrap_or_else(|_| "./emqxsl-ca.crt".to_string()),
            ),
        }
    }
}

fn expand_user(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_expansion_uses_home() {
        std::env::set_var("HOME", "/home/gw");
        assert_eq!(expand_user("~/.bms/db"), PathBuf::from("/home/gw/.bms/db"));
        assert_eq!(expand_user("/var/lib/db"), PathBuf::from("/var/lib/db"));
    }
}
