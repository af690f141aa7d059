// Configuration for the bridge server

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    /// Endpoint of the call-logic service told about every new call.
    pub call_logic_url: Option<String>,
    pub notify_timeout_secs: u64,
    /// Send a `clear` event so the carrier drops audio it already buffered.
    pub clear_on_barge_in: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8085,
            rate_limit_per_minute: 600,
            request_timeout_secs: 300,
            cors_allowed_origins: None,
            call_logic_url: None,
            notify_timeout_secs: 5,
            clear_on_barge_in: true,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env_parse("PORT").unwrap_or(defaults.port);

        let rate_limit_per_minute =
            env_parse("RATE_LIMIT_PER_MINUTE").unwrap_or(defaults.rate_limit_per_minute);

        let request_timeout_secs =
            env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(defaults.request_timeout_secs);

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            });

        let call_logic_url = std::env::var("CALL_LOGIC_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let notify_timeout_secs =
            env_parse("NOTIFY_TIMEOUT_SECS").unwrap_or(defaults.notify_timeout_secs);

        let clear_on_barge_in = std::env::var("CLEAR_ON_BARGE_IN")
            .ok()
            .map(|v| parse_flag(&v))
            .unwrap_or(defaults.clear_on_barge_in);

        Self {
            port,
            rate_limit_per_minute,
            request_timeout_secs,
            cors_allowed_origins,
            call_logic_url,
            notify_timeout_secs,
            clear_on_barge_in,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_secs(self.notify_timeout_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(parse_flag(" yes "));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("OFF"));
        assert!(!parse_flag("0"));
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8085);
        assert!(config.clear_on_barge_in);
        assert!(config.call_logic_url.is_none());
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
    }
}
