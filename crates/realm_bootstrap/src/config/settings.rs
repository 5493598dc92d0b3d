//! Configuration settings structures
//!
//! All sections deserialize with defaults, so a configuration file only needs
//! the values it wants to change.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Root configuration object, stored as TOML.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    /// World identity, listener ports and world rules
    pub server: ServerSettings,
    /// Database endpoint
    pub database: DatabaseSettings,
    /// Data directory and map selection
    pub map: MapSettings,
    /// Outbound notifications sent after startup
    pub notifications: NotificationSettings,
}

/// Server configuration settings
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ServerSettings {
    /// Name shown in logs, status replies and notifications
    pub name: String,

    /// Address all listeners bind to
    pub ip: String,

    pub game_port: u16,
    pub login_port: u16,
    pub status_port: u16,

    /// `pvp`, `no-pvp` or `pvp-enforced`; anything else aborts startup
    pub world_type: String,

    /// `daily`, `weekly`, `monthly` or `yearly`; anything else means never
    pub house_rent_period: String,

    /// Seconds between scheduled server saves (0 disables them)
    pub server_save_interval_secs: u64,

    /// PEM file holding the server's RSA private key
    pub rsa_key_file: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            name: "Realm".to_string(),
            ip: "0.0.0.0".to_string(),
            game_port: 7172,
            login_port: 7171,
            status_port: 7171,
            world_type: "pvp".to_string(),
            house_rent_period: "never".to_string(),
            server_save_interval_secs: 3600,
            rsa_key_file: "key.pem".to_string(),
        }
    }
}

/// Database connection settings
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Schema the server tables live in
    pub database: String,
    /// Seconds to wait for the connection to be established
    pub connect_timeout_secs: u64,
    /// Run `OPTIMIZE TABLE` on fragmented tables during startup
    pub optimize_tables: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "realm".to_string(),
            password: String::new(),
            database: "realm".to_string(),
            connect_timeout_secs: 5,
            optimize_tables: true,
        }
    }
}

/// Data and map settings
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct MapSettings {
    /// Root of the data files (items, scripts, world maps)
    pub data_directory: String,
    /// Main map file name under `<data_directory>/world`, without extension
    pub name: String,
    pub custom_map_enabled: bool,
    pub custom_map_name: String,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            data_directory: "data".to_string(),
            name: "realm".to_string(),
            custom_map_enabled: false,
            custom_map_name: "custom".to_string(),
        }
    }
}

/// Notification settings
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct NotificationSettings {
    /// Webhook that receives the "server is online" message
    pub webhook_url: Option<String>,
}

impl Config {
    /// Checks values that must be well-formed before any stage uses them.
    ///
    /// World type and rent period are deliberately not checked here; their
    /// own stages decide how to react to bad values.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.ip.parse::<IpAddr>().is_err() {
            return Err(format!("Invalid bind ip: {}", self.server.ip));
        }

        if self.server.name.trim().is_empty() {
            return Err("Server name cannot be empty".to_string());
        }

        if self.map.data_directory.is_empty() {
            return Err("Data directory cannot be empty".to_string());
        }

        if self.map.name.is_empty() {
            return Err("Map name cannot be empty".to_string());
        }

        if self.database.host.is_empty() {
            return Err("Database host cannot be empty".to_string());
        }

        if self.database.database.is_empty() {
            return Err("Database name cannot be empty".to_string());
        }

        if self.server.rsa_key_file.is_empty() {
            return Err("RSA key file cannot be empty".to_string());
        }

        Ok(())
    }

    pub fn bind_ip(&self) -> Result<IpAddr, String> {
        self.server
            .ip
            .parse()
            .map_err(|_| format!("Invalid bind ip: {}", self.server.ip))
    }
}
