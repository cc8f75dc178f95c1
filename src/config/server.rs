use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path prefix for every SCIM route.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Externally visible base URL, used for `meta.location`, `$ref` and
    /// binary callback URLs. Defaults to `http://{host}:{port}{base_path}`.
    #[serde(default)]
    pub public_url: Option<String>,

    /// Request body size limit in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Upper bound on `count` for list requests, and the page size when a
    /// client sends none.
    #[serde(default = "default_max_results")]
    pub max_results: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
            public_url: None,
            body_limit_bytes: default_body_limit(),
            max_results: default_max_results(),
        }
    }
}

impl ServerConfig {
    /// Base URL of the SCIM service without a trailing slash.
    pub fn public_base_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "http://{}:{}{}",
                self.host,
                self.port,
                self.base_path.trim_end_matches('/')
            ),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "server.base_path must start with '/': {}",
                self.base_path
            )));
        }
        if let Some(public_url) = &self.public_url {
            url::Url::parse(public_url).map_err(|e| {
                ConfigError::Validation(format!("server.public_url is not a valid URL: {}", e))
            })?;
        }
        if self.max_results == 0 {
            return Err(ConfigError::Validation(
                "server.max_results must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_base_path() -> String {
    "/scim/v2".to_string()
}

fn default_body_limit() -> usize {
    1024 * 1024 // 1 MB
}

fn default_max_results() -> u32 {
    200
}
