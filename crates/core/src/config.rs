//! Runtime configuration, sourced entirely from the environment rather than
//! a config file — the admin key, tenant keys, timeout, and KV backend are
//! all decided once at startup and never written back out.

use std::collections::HashSet;
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    pub admin_api_key: String,
    pub tenant_api_keys: HashSet<String>,

    pub timeout_seconds: u64,
    pub redis_url: Option<String>,
    pub environment: String,

    pub log_level: String,
    pub logging_to_file: bool,
    pub log_dir: Option<String>,

    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub pid_file: String,
    pub shutdown_timeout: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: "./uniway.pid".to_string(),
            shutdown_timeout: 10,
        }
    }
}

impl Config {
    /// Build configuration from the process environment, matching the
    /// reference implementation's `os.environ` reads exactly (including the
    /// `adminadmin` default and the production-gated temp-key seeding).
    pub fn from_env() -> Self {
        let environment = env::var("ENVIRONMENT").unwrap_or_default();
        let admin_api_key = env::var("ADMIN_API_KEY").unwrap_or_else(|_| "adminadmin".to_string());

        let mut tenant_api_keys = HashSet::new();
        if environment != "production" {
            tenant_api_keys.insert(env::var("TEMP_API_KEY").unwrap_or_else(|_| "temp_api_key".to_string()));
            tenant_api_keys.insert(
                env::var("TEMP_API_KEY_ONE").unwrap_or_else(|_| "temp_api_key_one".to_string()),
            );
        } else {
            if let Ok(k) = env::var("TEMP_API_KEY") {
                tenant_api_keys.insert(k);
            }
            if let Ok(k) = env::var("TEMP_API_KEY_ONE") {
                tenant_api_keys.insert(k);
            }
        }

        let timeout_seconds = env::var("TIMEOUT_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
            admin_api_key,
            tenant_api_keys,
            timeout_seconds,
            redis_url: env::var("REDIS_URL").ok(),
            environment,
            log_level: env::var("LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),
            logging_to_file: env::var("LOG_TO_FILE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            log_dir: env::var("LOG_DIR").ok(),
            daemon: DaemonConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable tests must not run concurrently with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "ENVIRONMENT",
            "ADMIN_API_KEY",
            "TEMP_API_KEY",
            "TEMP_API_KEY_ONE",
            "TIMEOUT_SECONDS",
            "REDIS_URL",
        ] {
            unsafe { env::remove_var(key) };
        }
    }

    #[test]
    fn defaults_match_reference_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let cfg = Config::from_env();
        assert_eq!(cfg.admin_api_key, "adminadmin");
        assert_eq!(cfg.timeout_seconds, 60);
        assert!(cfg.redis_url.is_none());
        assert!(!cfg.tenant_api_keys.is_empty());
    }

    #[test]
    fn production_suppresses_default_tenant_keys() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe { env::set_var("ENVIRONMENT", "production") };
        let cfg = Config::from_env();
        assert!(cfg.tenant_api_keys.is_empty());
        unsafe { env::remove_var("ENVIRONMENT") };
    }

    #[test]
    fn explicit_temp_keys_are_honored_in_production() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("ENVIRONMENT", "production");
            env::set_var("TEMP_API_KEY", "sk-prod-tenant");
        }
        let cfg = Config::from_env();
        assert!(cfg.tenant_api_keys.contains("sk-prod-tenant"));
        clear_env();
    }
}
