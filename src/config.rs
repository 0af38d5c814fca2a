//! Server configuration loaded from the environment

use std::env;

use crate::error::{RelayError, Result};

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Port the HTTP listener binds to
    pub port: u16,
    /// URL the keep-alive task pings, if any
    pub self_ping_url: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            self_ping_url: None,
        }
    }
}

impl RelayConfig {
    /// Build a configuration from the environment.
    ///
    /// `PORT` selects the listen port (default 8080); a value that is present
    /// but unparseable is a configuration error. `SELF_PING_URL` enables the
    /// keep-alive task.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| RelayError::config(format!("Invalid PORT value: {}", raw)))?,
            Err(_) => defaults.port,
        };

        let self_ping_url = env::var("SELF_PING_URL").ok().filter(|u| !u.is_empty());

        Ok(Self {
            port,
            self_ping_url,
        })
    }
}
