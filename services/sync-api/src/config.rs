//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Marketplace client secrets are loaded from `{PLATFORM}_CLIENT_SECRET` env
//! vars or a per-platform secret file, never stored in the TOML directly to
//! avoid leaking secrets.

use common::Secret;
use marketplace::Platform;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    pub platforms: Vec<PlatformConfig>,
}

/// HTTP service settings
#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    pub account_file: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Token lifecycle tuning
#[derive(Debug, Deserialize)]
pub struct LifecycleConfig {
    /// A returned token is valid at least this far ahead of use
    #[serde(default = "default_safety_margin")]
    pub safety_margin_secs: u64,
    /// Cadence of the preventive refresh job
    #[serde(default = "default_preventive_interval")]
    pub preventive_interval_secs: u64,
    /// Preventive job renews tokens expiring within this threshold
    #[serde(default = "default_preventive_threshold")]
    pub preventive_threshold_secs: u64,
    /// Cadence of the quarantine recovery sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Concurrent recovery attempts within one sweep
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,
    /// Timeout for each token endpoint call
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
}

/// Per-endpoint rate limit thresholds (sliding 60s window)
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_refresh_limit")]
    pub force_refresh_per_minute: u64,
    #[serde(default = "default_reconnect_limit")]
    pub reconnect_per_minute: u64,
}

/// One marketplace integration
#[derive(Debug, Deserialize)]
pub struct PlatformConfig {
    pub name: Platform,
    pub token_endpoint: String,
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to the
    /// `{PLATFORM}_CLIENT_SECRET` env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
}

fn default_max_connections() -> usize {
    1000
}

fn default_safety_margin() -> u64 {
    60
}

fn default_preventive_interval() -> u64 {
    600
}

fn default_preventive_threshold() -> u64 {
    900
}

fn default_sweep_interval() -> u64 {
    1800
}

fn default_sweep_concurrency() -> usize {
    5
}

fn default_refresh_timeout() -> u64 {
    10
}

fn default_refresh_limit() -> u64 {
    10
}

fn default_reconnect_limit() -> u64 {
    5
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            safety_margin_secs: default_safety_margin(),
            preventive_interval_secs: default_preventive_interval(),
            preventive_threshold_secs: default_preventive_threshold(),
            sweep_interval_secs: default_sweep_interval(),
            sweep_concurrency: default_sweep_concurrency(),
            refresh_timeout_secs: default_refresh_timeout(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            force_refresh_per_minute: default_refresh_limit(),
            reconnect_per_minute: default_reconnect_limit(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order per platform:
    /// 1. `{PLATFORM}_CLIENT_SECRET` env var (e.g. `EBAY_CLIENT_SECRET`)
    /// 2. `client_secret_file` path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if config.platforms.is_empty() {
            return Err(common::Error::Config(
                "at least one [[platforms]] entry is required".into(),
            ));
        }

        for platform in &config.platforms {
            if !platform.token_endpoint.starts_with("http://")
                && !platform.token_endpoint.starts_with("https://")
            {
                return Err(common::Error::Config(format!(
                    "token_endpoint for {} must start with http:// or https://, got: {}",
                    platform.name, platform.token_endpoint
                )));
            }
        }

        for (index, platform) in config.platforms.iter().enumerate() {
            if config.platforms[index + 1..]
                .iter()
                .any(|other| other.name == platform.name)
            {
                return Err(common::Error::Config(format!(
                    "duplicate [[platforms]] entry for {}",
                    platform.name
                )));
            }
        }

        let lifecycle = &config.lifecycle;
        for (field, value) in [
            ("safety_margin_secs", lifecycle.safety_margin_secs),
            ("preventive_interval_secs", lifecycle.preventive_interval_secs),
            ("preventive_threshold_secs", lifecycle.preventive_threshold_secs),
            ("sweep_interval_secs", lifecycle.sweep_interval_secs),
            ("refresh_timeout_secs", lifecycle.refresh_timeout_secs),
        ] {
            if value == 0 {
                return Err(common::Error::Config(format!(
                    "{field} must be greater than 0"
                )));
            }
        }
        if lifecycle.sweep_concurrency == 0 {
            return Err(common::Error::Config(
                "sweep_concurrency must be greater than 0".into(),
            ));
        }
        if config.service.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        // Resolve client secrets: env var takes precedence over file
        for platform in &mut config.platforms {
            let env_key = format!(
                "{}_CLIENT_SECRET",
                platform.name.label().to_uppercase()
            );
            if let Ok(secret) = std::env::var(&env_key) {
                platform.client_secret = Some(Secret::new(secret));
            } else if let Some(ref secret_file) = platform.client_secret_file {
                let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                    common::Error::Config(format!(
                        "failed to read client_secret_file {}: {e}",
                        secret_file.display()
                    ))
                })?;
                let secret = secret.trim().to_owned();
                if !secret.is_empty() {
                    platform.client_secret = Some(Secret::new(secret));
                }
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("storelink-sync-api.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn valid_toml() -> &'static str {
        r#"
[service]
listen_addr = "127.0.0.1:8080"
account_file = "/var/lib/storelink/accounts.json"

[[platforms]]
name = "ebay"
token_endpoint = "https://api.ebay.com/identity/v1/oauth2/token"
client_id = "ebay-client-1"
"#
    }

    fn write_config(dir_name: &str, contents: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    #[test]
    fn load_valid_config_applies_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("EBAY_CLIENT_SECRET") };
        let (dir, path) = write_config("sync-api-test-valid", valid_toml());

        let config = Config::load(&path).unwrap();
        assert_eq!(config.service.max_connections, 1000);
        assert_eq!(config.lifecycle.safety_margin_secs, 60);
        assert_eq!(config.lifecycle.preventive_interval_secs, 600);
        assert_eq!(config.lifecycle.sweep_interval_secs, 1800);
        assert_eq!(config.limits.force_refresh_per_minute, 10);
        assert_eq!(config.limits.reconnect_per_minute, 5);
        assert_eq!(config.platforms.len(), 1);
        assert_eq!(config.platforms[0].name, Platform::Ebay);
        assert!(config.platforms[0].client_secret.is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_missing_file_errors() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn load_invalid_toml_errors() {
        let (dir, path) = write_config("sync-api-test-invalid", "not valid {{{{ toml");
        let result = Config::load(&path);
        assert!(result.is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn empty_platforms_rejected() {
        let toml_content = r#"
[service]
listen_addr = "127.0.0.1:8080"
account_file = "/tmp/accounts.json"

platforms = []
"#;
        let (dir, path) = write_config("sync-api-test-noplatforms", toml_content);
        let result = Config::load(&path);
        assert!(result.is_err(), "zero platforms must be rejected");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unknown_platform_name_rejected() {
        let toml_content = r#"
[service]
listen_addr = "127.0.0.1:8080"
account_file = "/tmp/accounts.json"

[[platforms]]
name = "walmart"
token_endpoint = "https://example.com/token"
client_id = "x"
"#;
        let (dir, path) = write_config("sync-api-test-badplatform", toml_content);
        let result = Config::load(&path);
        assert!(result.is_err(), "unsupported platform name must be rejected");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn duplicate_platform_rejected() {
        let toml_content = r#"
[service]
listen_addr = "127.0.0.1:8080"
account_file = "/tmp/accounts.json"

[[platforms]]
name = "ebay"
token_endpoint = "https://example.com/token"
client_id = "x"

[[platforms]]
name = "ebay"
token_endpoint = "https://example.com/token2"
client_id = "y"
"#;
        let (dir, path) = write_config("sync-api-test-dup", toml_content);
        let result = Config::load(&path);
        assert!(result.is_err(), "duplicate platform entries must be rejected");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("duplicate"), "got: {err}");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn token_endpoint_without_scheme_rejected() {
        let toml_content = r#"
[service]
listen_addr = "127.0.0.1:8080"
account_file = "/tmp/accounts.json"

[[platforms]]
name = "ebay"
token_endpoint = "api.ebay.com/token"
client_id = "x"
"#;
        let (dir, path) = write_config("sync-api-test-scheme", toml_content);
        let result = Config::load(&path);
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("must start with http"), "got: {err}");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn zero_safety_margin_rejected() {
        let toml_content = r#"
[service]
listen_addr = "127.0.0.1:8080"
account_file = "/tmp/accounts.json"

[lifecycle]
safety_margin_secs = 0

[[platforms]]
name = "ebay"
token_endpoint = "https://example.com/token"
client_id = "x"
"#;
        let (dir, path) = write_config("sync-api-test-margin", toml_content);
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn zero_sweep_concurrency_rejected() {
        let toml_content = r#"
[service]
listen_addr = "127.0.0.1:8080"
account_file = "/tmp/accounts.json"

[lifecycle]
sweep_concurrency = 0

[[platforms]]
name = "ebay"
token_endpoint = "https://example.com/token"
client_id = "x"
"#;
        let (dir, path) = write_config("sync-api-test-conc", toml_content);
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn client_secret_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let (dir, path) = write_config("sync-api-test-env-secret", valid_toml());

        unsafe { set_env("EBAY_CLIENT_SECRET", "s3cret-from-env") };
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.platforms[0].client_secret.as_ref().unwrap().expose(),
            "s3cret-from-env"
        );
        unsafe { remove_env("EBAY_CLIENT_SECRET") };

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn client_secret_from_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("EBAY_CLIENT_SECRET") };
        let dir = std::env::temp_dir().join("sync-api-test-file-secret");
        std::fs::create_dir_all(&dir).unwrap();
        let secret_path = dir.join("ebay_secret");
        std::fs::write(&secret_path, "s3cret-from-file\n").unwrap();

        let toml_content = format!(
            r#"
[service]
listen_addr = "127.0.0.1:8080"
account_file = "/tmp/accounts.json"

[[platforms]]
name = "ebay"
token_endpoint = "https://example.com/token"
client_id = "x"
client_secret_file = "{}"
"#,
            secret_path.display()
        );
        let config_path = dir.join("config.toml");
        std::fs::write(&config_path, &toml_content).unwrap();

        let config = Config::load(&config_path).unwrap();
        assert_eq!(
            config.platforms[0].client_secret.as_ref().unwrap().expose(),
            "s3cret-from-file"
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn client_secret_env_overrides_file() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = std::env::temp_dir().join("sync-api-test-secret-precedence");
        std::fs::create_dir_all(&dir).unwrap();
        let secret_path = dir.join("ebay_secret");
        std::fs::write(&secret_path, "file-value").unwrap();

        let toml_content = format!(
            r#"
[service]
listen_addr = "127.0.0.1:8080"
account_file = "/tmp/accounts.json"

[[platforms]]
name = "ebay"
token_endpoint = "https://example.com/token"
client_id = "x"
client_secret_file = "{}"
"#,
            secret_path.display()
        );
        let config_path = dir.join("config.toml");
        std::fs::write(&config_path, &toml_content).unwrap();

        unsafe { set_env("EBAY_CLIENT_SECRET", "env-value") };
        let config = Config::load(&config_path).unwrap();
        assert_eq!(
            config.platforms[0].client_secret.as_ref().unwrap().expose(),
            "env-value"
        );
        unsafe { remove_env("EBAY_CLIENT_SECRET") };

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("storelink-sync-api.toml"));
    }

    #[test]
    fn resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}
