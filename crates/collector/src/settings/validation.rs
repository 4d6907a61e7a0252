use crate::settings::Settings;
use anyhow::{Result, bail};
use std::net::{IpAddr, SocketAddr};

/// Validate the configuration values
pub fn validate_config(settings: &Settings) -> Result<()> {
    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&settings.log_level.to_lowercase().as_str()) {
        bail!(
            "Invalid log level '{}'. Valid options are: {:?}",
            settings.log_level,
            valid_log_levels
        );
    }

    if settings.store.path.trim().is_empty() {
        bail!("Store path cannot be empty");
    }

    if settings.store.transaction_timeout_ms == 0 {
        bail!("Store transaction_timeout_ms must be greater than 0");
    }

    if settings.buffer.bucket_width_ms == 0 {
        bail!("Buffer bucket_width_ms must be greater than 0");
    }

    if settings.flush.interval_seconds == 0 {
        bail!("Flush interval_seconds must be greater than 0");
    }

    // a bucket must be closed before it can be flushed
    if settings.flush.eligibility() < settings.buffer.bucket_width() {
        bail!(
            "Flush eligibility_seconds ({}s) must not be shorter than the bucket width ({}ms)",
            settings.flush.eligibility_seconds,
            settings.buffer.bucket_width_ms
        );
    }

    settings.query.status_lookback()?;
    settings.query.graph_lookback()?;

    if let Some(metrics) = &settings.metrics {
        if !validate_socket_addr(&metrics.addr) {
            bail!("Invalid SocketAddr: {}", metrics.addr)
        }
    }

    Ok(())
}

fn validate_socket_addr(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ipv4) => !ipv4.is_broadcast() && !ipv4.is_multicast(),
        IpAddr::V6(ipv6) => !ipv6.is_unspecified() && !ipv6.is_multicast(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MetricsSettings;
    use std::str::FromStr;

    fn create_valid_config() -> Settings {
        let mut settings = Settings::default();
        settings.store.path = "/var/lib/checker/summaries".to_string();
        settings.metrics = Some(MetricsSettings {
            addr: SocketAddr::from_str("127.0.0.1:9090").unwrap(),
        });
        settings
    }

    #[test]
    fn test_valid_config() {
        let config = create_valid_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = create_valid_config();
        config.log_level = "verbose".to_string();
        assert!(validate_config(&config).is_err());

        config.log_level = "DEBUG".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_values() {
        let mut config = create_valid_config();
        config.buffer.bucket_width_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = create_valid_config();
        config.flush.interval_seconds = 0;
        assert!(validate_config(&config).is_err());

        let mut config = create_valid_config();
        config.store.transaction_timeout_ms = 0;
        assert!(validate_config(&config).is_err());

        let mut config = create_valid_config();
        config.store.path = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_eligibility_shorter_than_bucket() {
        let mut config = create_valid_config();
        config.buffer.bucket_width_ms = 10_000;
        config.flush.eligibility_seconds = 5;
        assert!(validate_config(&config).is_err());

        config.flush.eligibility_seconds = 10;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_unparseable_lookback() {
        let mut config = create_valid_config();
        config.query.status_lookback = "an hour".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = create_valid_config();
        config.query.graph_lookback = "".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_metrics_addr() {
        let mut config = create_valid_config();

        config.metrics = Some(MetricsSettings {
            addr: SocketAddr::from_str("224.0.0.1:9090").unwrap(),
        });
        assert!(validate_config(&config).is_err());

        config.metrics = Some(MetricsSettings {
            addr: SocketAddr::from_str("255.255.255.255:9090").unwrap(),
        });
        assert!(validate_config(&config).is_err());

        config.metrics = Some(MetricsSettings {
            addr: SocketAddr::from_str("[::]:9090").unwrap(),
        });
        assert!(validate_config(&config).is_err());

        config.metrics = None;
        assert!(validate_config(&config).is_ok());
    }
}
