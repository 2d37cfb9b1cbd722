//! Broker settings loaded from the JSON config file the provisioning flow
//! drops on the device.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{MqttOptions, TlsConfiguration, Transport};
use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    8883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// TLS is the default for the hosted broker; local brokers may turn it
    /// off.
    #[serde(default = "default_true")]
    pub use_tls: bool,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub client_id: Option<String>,
}

pub fn load_config(path: &Path) -> Result<MqttSettings> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read MQTT config at '{}'", path.display()))?;
    let settings: MqttSettings = serde_json::from_str(&raw)
        .with_context(|| format!("invalid MQTT config at '{}'", path.display()))?;
    Ok(settings)
}

pub fn mqtt_options(
    settings: &MqttSettings,
    client_id: &str,
    ca_cert_path: &Path,
) -> Result<MqttOptions> {
    let mut options = MqttOptions::new(client_id, settings.host.clone(), settings.port);
    options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs));
    options.set_clean_session(settings.clean_session);

    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        options.set_credentials(username.clone(), password.clone());
    }

    if settings.use_tls {
        let ca = std::fs::read(ca_cert_path).with_context(|| {
            format!("cannot read broker CA certificate at '{}'", ca_cert_path.display())
        })?;
        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }));
    }

    Ok(options)
}
