use mirror::config::Config as PortalDbConfig;
use serde::Deserialize;
use std::fs::File;

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            sentry_dsn: None,
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".into()
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub portal_db: PortalDbConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror::config::StoreType;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn portal_db_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example/1
                level: debug
            portal_db:
                listener:
                    host: 0.0.0.0
                    port: 8080
                api_keys:
                    - secret
                store:
                    type: filesystem
                    base_dir: /var/lib/portal-db/
                    filename: portal.bin
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        let metrics = config.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_port, 8125);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.portal_db.api_keys, vec!["secret".to_string()]);
        assert_eq!(
            config.portal_db.store,
            StoreType::Filesystem {
                base_dir: "/var/lib/portal-db/".into(),
                filename: "portal.bin".into(),
            }
        );
    }

    #[test]
    fn minimal_config() {
        let tmp = write_tmp_file(
            r#"
            portal_db:
                api_keys: [secret]
                store:
                    type: memory
            "#,
        );
        let config = Config::from_file(tmp.path()).expect("load config");
        assert!(config.metrics.is_none());
        assert!(config.logging.sentry_dsn.is_none());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.portal_db.listener.port, 8080);
    }

    #[test]
    fn missing_file() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/portal-db.yaml"))
            .expect_err("missing file");
        assert!(matches!(err, ConfigError::LoadError(_)));
    }
}
