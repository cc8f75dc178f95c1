//! Configuration module for the SCIM bridge.
//!
//! The bridge is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! public_url = "https://${SCIM_HOST}/scim/v2"
//!
//! [observability.logging]
//! format = "json"
//!
//! [[mapping.resource_types]]
//! name = "User"
//! endpoint = "/Users"
//! schema = "urn:ietf:params:scim:schemas:core:2.0:User"
//! base_dn = "ou=people,dc=example,dc=com"
//! rdn_attribute = "uid"
//! ```

mod directory;
mod handlers;
mod mapping;
mod observability;
mod server;

use std::path::Path;

pub use directory::*;
pub use handlers::*;
pub use mapping::*;
pub use observability::*;
use serde::{Deserialize, Serialize};
pub use server::*;

/// Root configuration for the bridge.
///
/// Every section has defaults; an empty file starts a bridge that serves
/// no resource types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration (logging).
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Directory gateway configuration.
    #[serde(default)]
    pub directory: DirectoryConfig,

    /// Built-in attribute handler settings.
    #[serde(default)]
    pub handlers: HandlersConfig,

    /// SCIM-to-directory mapping.
    #[serde(default)]
    pub mapping: MappingConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: BridgeConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.mapping.validate()?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Invalid mapping: {0}")]
    Mapping(String),
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Skips commented lines (lines where content before the variable is a comment).
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else { continue };

            // Skip if this variable is inside a comment
            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const USER_MAPPING: &str = r#"
        [[mapping.resource_types]]
        name = "User"
        endpoint = "/Users"
        schema = "urn:ietf:params:scim:schemas:core:2.0:User"
        base_dn = "ou=people,dc=example,dc=com"
        filter = "(objectClass=inetOrgPerson)"
        object_classes = ["inetOrgPerson"]
        rdn_attribute = "uid"

        [[mapping.resource_types.schemas]]
        uri = "urn:ietf:params:scim:schemas:core:2.0:User"

        [[mapping.resource_types.schemas.attributes]]
        name = "userName"
        attribute = "uid"

        [[mapping.resource_types.schemas.attributes]]
        name = "emails"
        multi_valued = true
        types = [
            { type = "work", sub_attributes = [{ name = "value", attribute = "mail" }] },
        ]
    "#;

    #[test]
    fn test_empty_config() {
        let config = BridgeConfig::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.base_path, "/scim/v2");
        assert!(config.mapping.resource_types.is_empty());
        assert_eq!(config.handlers.lock_value, "000001010000Z");
    }

    #[test]
    fn test_mapping_config() {
        let config = BridgeConfig::from_str(USER_MAPPING).unwrap();
        let users = &config.mapping.resource_types[0];

        assert_eq!(users.id_attribute, "entryUUID");
        assert_eq!(users.schemas[0].attributes.len(), 2);
        let emails = &users.schemas[0].attributes[1];
        assert!(emails.multi_valued);
        assert!(emails.show);
        assert_eq!(emails.types[0].type_value, "work");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let err = BridgeConfig::from_str(
            r#"
            [server]
            prot = 9000
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validation_errors() {
        let err = BridgeConfig::from_str(&USER_MAPPING.replace("\"/Users\"", "\"Users\""))
            .unwrap_err();
        assert!(err.to_string().contains("endpoint must start with '/'"));

        let err = BridgeConfig::from_str(
            r#"
            [server]
            public_url = "not a url"
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_public_base_url() {
        let config = BridgeConfig::from_str(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9000
        "#,
        )
        .unwrap();
        assert_eq!(
            config.server.public_base_url(),
            "http://127.0.0.1:9000/scim/v2"
        );

        let config = BridgeConfig::from_str(
            r#"
            [server]
            public_url = "https://idm.example.com/scim/v2/"
        "#,
        )
        .unwrap();
        assert_eq!(
            config.server.public_base_url(),
            "https://idm.example.com/scim/v2"
        );
    }

    #[test]
    fn test_directory_seed_values() {
        let config = BridgeConfig::from_str(
            r#"
            [[directory.entries]]
            dn = "uid=bjensen,ou=people,dc=example,dc=com"
            attributes = { objectClass = ["top", "inetOrgPerson"], uid = "bjensen" }
        "#,
        )
        .unwrap();
        let seed = &config.directory.entries[0];
        assert_eq!(seed.attributes["objectClass"].iter().count(), 2);
        assert_eq!(
            seed.attributes["uid"].iter().collect::<Vec<_>>(),
            vec!["bjensen"]
        );
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(USER_MAPPING.as_bytes()).unwrap();

        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mapping.resource_types[0].name, "User");

        let err = BridgeConfig::from_file("/nonexistent/bridge.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_, _)));
    }

    #[test]
    fn test_env_var_expansion() {
        temp_env::with_var("TEST_BASE_DN", Some("dc=example,dc=com"), || {
            let result = expand_env_vars("base_dn = \"${TEST_BASE_DN}\"").unwrap();
            assert_eq!(result, "base_dn = \"dc=example,dc=com\"");
        });
    }

    #[test]
    fn test_env_var_missing() {
        temp_env::with_var_unset("TEST_MISSING_VAR", || {
            let err = expand_env_vars("x = \"${TEST_MISSING_VAR}\"").unwrap_err();
            assert!(matches!(err, ConfigError::EnvVarNotFound(name) if name == "TEST_MISSING_VAR"));
        });
    }

    #[test]
    fn test_env_var_in_comment_ignored() {
        let result = expand_env_vars("# base_dn = \"${NONEXISTENT_VAR}\"").unwrap();
        assert_eq!(result, "# base_dn = \"${NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_env_var_after_comment_ignored() {
        let result = expand_env_vars("key = \"value\" # ${NONEXISTENT_VAR}").unwrap();
        assert_eq!(result, "key = \"value\" # ${NONEXISTENT_VAR}");
    }

    #[test]
    fn test_multiline_with_comments() {
        temp_env::with_var("TEST_MULTI", Some("value1"), || {
            let input = r#"key1 = "${TEST_MULTI}"
# key2 = "${NONEXISTENT}"
key3 = "literal""#;
            let result = expand_env_vars(input).unwrap();
            assert_eq!(
                result,
                r#"key1 = "value1"
# key2 = "${NONEXISTENT}"
key3 = "literal""#
            );
        });
    }
}
