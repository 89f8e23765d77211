//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.joshua/config.json`) and environment.
//! Only the backend endpoint and the reconnect policy are configurable.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend WebSocket endpoint.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Reconnect delays after the connection drops.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Backend host, port and scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Host name or address (default "127.0.0.1"). Overridden by JOSHUA_HOST env.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port (default 8768).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use `wss://` instead of `ws://`.
    #[serde(default)]
    pub secure: bool,
}

/// Capped exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt (default 3000 ms).
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay (default 30000 ms).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Growth factor applied after each consecutive failure (default 2).
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

pub const DEFAULT_PORT: u16 = 8768;

/// Floor for the first reconnect delay.
pub const MIN_RECONNECT_DELAY_MS: u64 = 50;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_initial_delay_ms() -> u64 {
    3_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> u32 {
    2
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            secure: false,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl EndpointConfig {
    /// WebSocket URL for this endpoint: `ws(s)://host:port`, no path.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host.trim(), self.port)
    }

    /// Parse `host` or `host:port` (as typed into `/connect` or the desktop form).
    /// Keeps `secure` from `self`; the port falls back to the current one when omitted.
    pub fn with_address(&self, address: &str) -> Option<Self> {
        let address = address.trim();
        if address.is_empty() {
            return None;
        }
        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            // Bracketed IPv6: `[::1]` or `[::1]:9000`. Brackets stay in the host for the URL.
            let (inner, tail) = rest.split_once(']')?;
            if inner.is_empty() {
                return None;
            }
            let port = match tail {
                "" => self.port,
                t => t.strip_prefix(':')?.trim().parse().ok()?,
            };
            (format!("[{}]", inner), port)
        } else {
            match address.rsplit_once(':') {
                Some((h, p)) if !h.contains(':') => (h.to_string(), p.trim().parse().ok()?),
                _ => (address.to_string(), self.port),
            }
        };
        if host.trim().is_empty() {
            return None;
        }
        Some(Self {
            host,
            port,
            secure: self.secure,
        })
    }
}

impl ReconnectConfig {
    /// Never below [`MIN_RECONNECT_DELAY_MS`].
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms.max(MIN_RECONNECT_DELAY_MS))
    }

    pub fn max_delay(&self) -> Duration {
        self.initial_delay().max(Duration::from_millis(self.max_delay_ms))
    }
}

/// Resolve the backend host: env JOSHUA_HOST overrides config.
pub fn resolve_host(config: &Config) -> String {
    host_with_override(config, std::env::var("JOSHUA_HOST").ok())
}

fn host_with_override(config: &Config, env_host: Option<String>) -> String {
    env_host
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .unwrap_or_else(|| config.endpoint.host.trim().to_string())
}

pub fn resolve_endpoint(config: &Config, host: Option<String>, port: Option<u16>) -> EndpointConfig {
    EndpointConfig {
        host: host
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| resolve_host(config)),
        port: port.unwrap_or(config.endpoint.port),
        secure: config.endpoint.secure,
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("JOSHUA_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".joshua").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the default path (or JOSHUA_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_endpoint_and_reconnect() {
        let c = Config::default();
        assert_eq!(c.endpoint.port, 8768);
        assert_eq!(c.endpoint.host, "127.0.0.1");
        assert_eq!(c.endpoint.url(), "ws://127.0.0.1:8768");
        assert_eq!(c.reconnect.initial_delay(), Duration::from_secs(3));
        assert_eq!(c.reconnect.max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: Config = serde_json::from_str(r#"{"endpoint":{"host":"joshua.lan","secure":true}}"#)
            .unwrap();
        assert_eq!(c.endpoint.url(), "wss://joshua.lan:8768");
        assert_eq!(c.reconnect.multiplier, 2);
    }

    #[test]
    fn camel_case_reconnect_keys() {
        let c: Config =
            serde_json::from_str(r#"{"reconnect":{"initialDelayMs":500,"maxDelayMs":100}}"#).unwrap();
        assert_eq!(c.reconnect.initial_delay(), Duration::from_millis(500));
        // max never below initial
        assert_eq!(c.reconnect.max_delay(), Duration::from_millis(500));
    }

    #[test]
    fn with_address_parses_host_and_port() {
        let base = EndpointConfig::default();
        let e = base.with_address("10.0.0.5:9000").unwrap();
        assert_eq!(e.host, "10.0.0.5");
        assert_eq!(e.port, 9000);

        let e = base.with_address("gpu-box").unwrap();
        assert_eq!(e.host, "gpu-box");
        assert_eq!(e.port, 8768);

        assert!(base.with_address("   ").is_none());
        assert!(base.with_address("host:notaport").is_none());
        assert!(base.with_address(":9000").is_none());
    }

    #[test]
    fn with_address_accepts_bracketed_ipv6() {
        let base = EndpointConfig::default();
        let e = base.with_address("[::1]:9000").unwrap();
        assert_eq!(e.host, "[::1]");
        assert_eq!(e.port, 9000);
        assert_eq!(e.url(), "ws://[::1]:9000");

        let e = base.with_address("[fe80::2]").unwrap();
        assert_eq!(e.host, "[fe80::2]");
        assert_eq!(e.port, 8768);

        assert!(base.with_address("[::1").is_none());
        assert!(base.with_address("[]:9000").is_none());
        assert!(base.with_address("[::1]9000").is_none());
    }

    #[test]
    fn zero_initial_delay_is_clamped() {
        let c: Config =
            serde_json::from_str(r#"{"reconnect":{"initialDelayMs":0,"maxDelayMs":0}}"#).unwrap();
        assert_eq!(
            c.reconnect.initial_delay(),
            Duration::from_millis(MIN_RECONNECT_DELAY_MS)
        );
        assert_eq!(
            c.reconnect.max_delay(),
            Duration::from_millis(MIN_RECONNECT_DELAY_MS)
        );
    }

    #[test]
    fn flags_override_file_endpoint() {
        let mut c = Config::default();
        c.endpoint.port = 1234;
        let e = resolve_endpoint(&c, Some("example.org".into()), Some(4321));
        assert_eq!(e.url(), "ws://example.org:4321");
        let e = resolve_endpoint(&c, Some("  ".into()), None);
        assert_eq!(e.port, 1234);
    }

    #[test]
    fn env_host_overrides_file_host() {
        let mut c = Config::default();
        c.endpoint.host = " file-host ".into();
        assert_eq!(host_with_override(&c, None), "file-host");
        assert_eq!(host_with_override(&c, Some("   ".into())), "file-host");
        assert_eq!(host_with_override(&c, Some(" env-host ".into())), "env-host");
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let path = std::env::temp_dir().join("joshua-config-test-does-not-exist.json");
        let (c, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(c.endpoint, EndpointConfig::default());
    }
}
