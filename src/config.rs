//! Server configuration, read once from `ASSETD_*` environment variables.

use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig as RustlsConfig;

use crate::inventory::InventorySettings;
use crate::limits::DEFAULT_OVERDUE_AFTER_MS;
use crate::model::Ms;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name}: cannot parse {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("both ASSETD_TLS_CERT and ASSETD_TLS_KEY must be set, or neither")]
    PartialTls,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub overdue_after_ms: Ms,
    pub sweep_interval: Duration,
    pub metrics_port: Option<u16>,
    /// How long shutdown waits for open connections, and how often it checks.
    pub drain_timeout: Duration,
    pub drain_poll: Duration,
    /// (cert, key) PEM paths.
    pub tls: Option<(PathBuf, PathBuf)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "assetd".into(),
            max_connections: 256,
            compact_threshold: 1_000,
            overdue_after_ms: DEFAULT_OVERDUE_AFTER_MS,
            sweep_interval: Duration::from_secs(60),
            metrics_port: None,
            drain_timeout: Duration::from_secs(10),
            drain_poll: Duration::from_millis(100),
            tls: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let tls = match (lookup("ASSETD_TLS_CERT"), lookup("ASSETD_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
            _ => return Err(ConfigError::PartialTls),
        };

        Ok(Self {
            port: parse_var(&lookup, "ASSETD_PORT")?.unwrap_or(defaults.port),
            bind: lookup("ASSETD_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("ASSETD_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: lookup("ASSETD_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_var(&lookup, "ASSETD_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
            compact_threshold: parse_var(&lookup, "ASSETD_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            overdue_after_ms: parse_var(&lookup, "ASSETD_OVERDUE_AFTER_MS")?
                .unwrap_or(defaults.overdue_after_ms),
            sweep_interval: parse_var(&lookup, "ASSETD_SWEEP_INTERVAL_SECS")?
                .map_or(defaults.sweep_interval, Duration::from_secs),
            metrics_port: parse_var(&lookup, "ASSETD_METRICS_PORT")?,
            drain_timeout: parse_var(&lookup, "ASSETD_DRAIN_TIMEOUT_SECS")?
                .map_or(defaults.drain_timeout, Duration::from_secs),
            drain_poll: parse_var(&lookup, "ASSETD_DRAIN_POLL_MS")?
                .map_or(defaults.drain_poll, Duration::from_millis),
            tls,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn inventory_settings(&self) -> InventorySettings {
        InventorySettings {
            compact_threshold: self.compact_threshold,
            overdue_after_ms: self.overdue_after_ms,
            sweep_interval: self.sweep_interval,
        }
    }

    /// Build the TLS acceptor when a certificate pair is configured.
    pub fn tls_acceptor(&self) -> io::Result<Option<TlsAcceptor>> {
        let Some((cert_path, key_path)) = &self.tls else {
            return Ok(None);
        };

        let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<_, _>>()?;

        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "no private key found in key file"))?;

        let mut config = RustlsConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;

        config.alpn_protocols = vec![b"postgresql".to_vec()];

        Ok(Some(TlsAcceptor::from(Arc::new(config))))
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    parsed.map(Some).map_err(|_| ConfigError::Invalid { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.port, 5433);
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.password, "assetd");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.overdue_after_ms, DEFAULT_OVERDUE_AFTER_MS);
        assert!(config.metrics_port.is_none());
        assert_eq!(config.drain_timeout, Duration::from_secs(10));
        assert_eq!(config.drain_poll, Duration::from_millis(100));
        assert!(config.tls_acceptor().unwrap().is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = from_pairs(&[
            ("ASSETD_PORT", "6000"),
            ("ASSETD_DATA_DIR", "/var/lib/assetd"),
            ("ASSETD_COMPACT_THRESHOLD", "50"),
            ("ASSETD_SWEEP_INTERVAL_SECS", "5"),
            ("ASSETD_METRICS_PORT", "9100"),
            ("ASSETD_DRAIN_TIMEOUT_SECS", "30"),
            ("ASSETD_DRAIN_POLL_MS", "250"),
        ])
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/assetd"));
        let settings = config.inventory_settings();
        assert_eq!(settings.compact_threshold, 50);
        assert_eq!(settings.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
        assert_eq!(config.drain_poll, Duration::from_millis(250));
    }

    #[test]
    fn bad_number_is_reported() {
        let err = from_pairs(&[("ASSETD_MAX_CONNECTIONS", "lots")]).unwrap_err();
        assert_eq!(err.to_string(), "ASSETD_MAX_CONNECTIONS: cannot parse \"lots\"");
    }

    #[test]
    fn tls_needs_both_files() {
        let err = from_pairs(&[("ASSETD_TLS_CERT", "cert.pem")]).unwrap_err();
        assert!(matches!(err, ConfigError::PartialTls));
    }

    #[test]
    fn missing_tls_file_is_an_io_error() {
        let config = from_pairs(&[
            ("ASSETD_TLS_CERT", "/nonexistent/cert.pem"),
            ("ASSETD_TLS_KEY", "/nonexistent/key.pem"),
        ])
        .unwrap();
        assert!(config.tls_acceptor().is_err());
    }
}
