use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::gateway::upnp::DEFAULT_SERVICE_TYPE;

#[derive(Clone, Deserialize, Serialize)]
pub struct Config {
    pub cluster_name: String,
    /// UPnP `WANIPConnection` control URL.  Without one, mappings are only
    /// kept in memory (dry run).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_url: Option<String>,
    pub service_type: String,
    pub manifest_path: PathBuf,
    pub poll_interval_secs: u64,
    pub resync_interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_address: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_address: Option<Ipv4Addr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_name: "kubernetes".into(),
            control_url: None,
            service_type: DEFAULT_SERVICE_TYPE.into(),
            manifest_path: "edgelb.services.json".into(),
            poll_interval_secs: 10,
            resync_interval_secs: 300,
            local_address: None,
            external_address: None,
            username: None,
            password: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("cluster_name", &self.cluster_name)
            .field("control_url", &self.control_url)
            .field("service_type", &self.service_type)
            .field("manifest_path", &self.manifest_path)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("resync_interval_secs", &self.resync_interval_secs)
            .field("local_address", &self.local_address)
            .field("external_address", &self.external_address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("edgelb.toml"))
                .merge(Json::file("edgelb.json"))
                .merge(Env::prefixed("EDGELB_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(secret_file) = std::env::var("EDGELB_PASSWORD_FILE") {
            config.password = Some(std::fs::read_to_string(secret_file)?.trim().to_string());
        }

        if config.poll_interval_secs == 0 {
            return Err(anyhow::anyhow!("poll_interval_secs must be positive"));
        }

        Ok(config)
    }

    /// Username and password, when both are set.
    pub fn credentials(&self) -> Option<(String, String)> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            _ => None,
        }
    }
}
