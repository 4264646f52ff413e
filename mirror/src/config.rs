use serde::Deserialize;
use std::collections::HashSet;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("At least one API key is required")]
    NoApiKeys,

    #[error("Empty API key")]
    EmptyApiKey,

    #[error("Duplicate API key")]
    DuplicateApiKey,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreType {
    Memory,
    Filesystem { base_dir: String, filename: String },
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    /// Values accepted in the `Authorization` header.
    pub api_keys: Vec<String>,
    pub store: StoreType,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.listener.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.api_keys.is_empty() {
            return Err(ValidationError::NoApiKeys);
        }

        let mut keys = HashSet::new();
        for key in &self.api_keys {
            if key.is_empty() {
                return Err(ValidationError::EmptyApiKey);
            }
            if !keys.insert(key) {
                return Err(ValidationError::DuplicateApiKey);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
api_keys:
    - key-one
    - key-two
store:
    type: filesystem
    base_dir: /var/lib/portal-db
    filename: portal.bin
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.listener, Listener::default());
        assert_eq!(
            config.store,
            StoreType::Filesystem {
                base_dir: "/var/lib/portal-db".into(),
                filename: "portal.bin".into(),
            }
        );

        let config: Config =
            serde_yaml::from_str("{api_keys: [k], store: {type: memory}, listener: {host: 0.0.0.0, port: 9000}}")
                .unwrap();
        assert_eq!(config.store, StoreType::Memory);
        assert_eq!(config.listener.port, 9000);
    }

    #[test]
    fn test_validation_errors() {
        let base_config = Config {
            listener: Listener::default(),
            api_keys: vec!["key".into()],
            store: StoreType::Memory,
        };

        let mut config = base_config.clone();
        config.listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = base_config.clone();
        config.api_keys.clear();
        assert_eq!(config.validate(), Err(ValidationError::NoApiKeys));

        let mut config = base_config.clone();
        config.api_keys.push("".into());
        assert_eq!(config.validate(), Err(ValidationError::EmptyApiKey));

        let mut config = base_config;
        config.api_keys.push("key".into());
        assert_eq!(config.validate(), Err(ValidationError::DuplicateApiKey));
    }

    #[test]
    fn test_unknown_store_type() {
        assert!(serde_yaml::from_str::<Config>("{api_keys: [k], store: {type: postgres}}").is_err());
    }
}
