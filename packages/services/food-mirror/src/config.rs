use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::{MirrorError, Result};

pub const DEFAULT_BASE_URL: &str = "https://world.openfoodfacts.org";
pub const DEFAULT_USER_AGENT: &str = "food-mirror/0.1 (local mirror sync)";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub db_path: PathBuf,
    pub base_url: String,
    pub user_agent: String,
    pub http_timeout_ms: u64,
    pub page_max_attempts: u32,
    pub http_retry_backoff_ms: u64,
    pub request_delay_ms: u64,
    pub auto_migrate: bool,
    pub log_format: LogFormat,
    pub sync: SyncSettings,
}

/// Per-run parameters, overridable from the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    pub country: String,
    pub recent_pages: u32,
    pub page_size: u32,
    pub ca_bundle: Option<PathBuf>,
    pub insecure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// How server certificates are verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustMode {
    System,
    CaBundle(PathBuf),
    Insecure,
}

impl fmt::Display for TrustMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustMode::System => write!(f, "system"),
            TrustMode::CaBundle(path) => write!(f, "ca-bundle:{}", path.display()),
            TrustMode::Insecure => write!(f, "insecure"),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            country: "fr".to_string(),
            recent_pages: 3,
            page_size: 200,
            ca_bundle: None,
            insecure: false,
        }
    }
}

impl SyncSettings {
    /// Exactly one trust mode; a bundle together with `insecure` is rejected.
    pub fn trust_mode(&self) -> Result<TrustMode> {
        match (&self.ca_bundle, self.insecure) {
            (Some(path), true) => Err(MirrorError::Configuration(format!(
                "both a CA bundle ({}) and insecure mode were requested; choose one",
                path.display()
            ))),
            (Some(path), false) => Ok(TrustMode::CaBundle(path.clone())),
            (None, true) => Ok(TrustMode::Insecure),
            (None, false) => Ok(TrustMode::System),
        }
    }

    pub fn validate(&self) -> Result<TrustMode> {
        if self.country.trim().is_empty() {
            return Err(MirrorError::Configuration("country must not be empty".into()));
        }
        if self.recent_pages == 0 {
            return Err(MirrorError::Configuration("recent_pages must be positive".into()));
        }
        if self.page_size == 0 {
            return Err(MirrorError::Configuration("page_size must be positive".into()));
        }
        self.trust_mode()
    }

    /// Command-line trust flags replace the environment's trust settings as a pair.
    pub fn with_trust_override(mut self, ca_bundle: Option<PathBuf>, insecure: bool) -> Self {
        if ca_bundle.is_some() || insecure {
            self.ca_bundle = ca_bundle;
            self.insecure = insecure;
        }
        self
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SyncSettings::default();

        let db_path = get("FOOD_MIRROR_DB").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data/food_mirror.sqlite"));
        let base_url = get("OFF_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let user_agent = get("OFF_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let http_timeout_ms: u64 = get("HTTP_TIMEOUT_MS").and_then(|s| s.parse().ok()).unwrap_or(30_000);
        let page_max_attempts: u32 = get("PAGE_MAX_ATTEMPTS").and_then(|s| s.parse().ok()).unwrap_or(3);
        let http_retry_backoff_ms: u64 = get("HTTP_RETRY_BACKOFF_MS").and_then(|s| s.parse().ok()).unwrap_or(500);
        let request_delay_ms: u64 = get("REQUEST_DELAY_MS").and_then(|s| s.parse().ok()).unwrap_or(0);
        let auto_migrate: bool = get("AUTO_MIGRATE").and_then(|s| s.to_lowercase().parse().ok()).unwrap_or(true);
        let log_format = match get("LOG_FORMAT").map(|s| s.to_lowercase()).as_deref() {
            Some("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        let country = get("SYNC_COUNTRY").unwrap_or(defaults.country);
        let recent_pages: u32 = get("SYNC_RECENT_PAGES").and_then(|s| s.parse().ok()).unwrap_or(defaults.recent_pages);
        let page_size: u32 = get("SYNC_PAGE_SIZE").and_then(|s| s.parse().ok()).unwrap_or(defaults.page_size);
        let ca_bundle = get("OFF_CA_BUNDLE").filter(|s| !s.trim().is_empty()).map(PathBuf::from);
        // OFF_SSL_VERIFY=0 turns verification off
        let insecure = get("OFF_SSL_VERIFY")
            .map(|s| matches!(s.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(false);

        Self {
            db_path,
            base_url,
            user_agent,
            http_timeout_ms,
            page_max_attempts,
            http_retry_backoff_ms,
            request_delay_ms,
            auto_migrate,
            log_format,
            sync: SyncSettings {
                country,
                recent_pages,
                page_size,
                ca_bundle,
                insecure,
            },
        }
    }

    pub fn validate(&self) -> Result<TrustMode> {
        let url = url::Url::parse(&self.base_url)
            .map_err(|e| MirrorError::Configuration(format!("invalid base URL {:?}: {}", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MirrorError::Configuration(format!(
                "base URL must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.page_max_attempts == 0 {
            return Err(MirrorError::Configuration("PAGE_MAX_ATTEMPTS must be at least 1".into()));
        }
        self.sync.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.sync, SyncSettings::default());
        assert_eq!(cfg.http_retry_backoff_ms, 500);
        assert_eq!(cfg.page_max_attempts, 3);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert!(cfg.auto_migrate);
        assert_eq!(cfg.validate().unwrap(), TrustMode::System);
    }

    #[test]
    fn env_overrides() {
        let cfg = config_from(&[
            ("SYNC_COUNTRY", "de"),
            ("SYNC_RECENT_PAGES", "5"),
            ("SYNC_PAGE_SIZE", "50"),
            ("OFF_SSL_VERIFY", "0"),
            ("LOG_FORMAT", "Pretty"),
            ("AUTO_MIGRATE", "FALSE"),
        ]);
        assert_eq!(cfg.sync.country, "de");
        assert_eq!(cfg.sync.recent_pages, 5);
        assert_eq!(cfg.sync.page_size, 50);
        assert!(cfg.sync.insecure);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert!(!cfg.auto_migrate);
        assert_eq!(cfg.validate().unwrap(), TrustMode::Insecure);
    }

    #[test]
    fn both_trust_settings_rejected() {
        let cfg = config_from(&[("OFF_CA_BUNDLE", "/etc/ca.pem"), ("OFF_SSL_VERIFY", "false")]);
        assert!(matches!(cfg.validate(), Err(MirrorError::Configuration(_))));
    }

    #[test]
    fn cli_trust_flags_replace_env_pair() {
        let env = SyncSettings {
            ca_bundle: Some(PathBuf::from("/env/ca.pem")),
            ..SyncSettings::default()
        };
        let overridden = env.clone().with_trust_override(None, true);
        assert_eq!(overridden.trust_mode().unwrap(), TrustMode::Insecure);

        let untouched = env.with_trust_override(None, false);
        assert_eq!(untouched.trust_mode().unwrap(), TrustMode::CaBundle(PathBuf::from("/env/ca.pem")));
    }

    #[test]
    fn invalid_settings() {
        let mut s = SyncSettings::default();
        s.page_size = 0;
        assert!(s.validate().is_err());

        let s = SyncSettings { country: "  ".into(), ..SyncSettings::default() };
        assert!(s.validate().is_err());

        let cfg = config_from(&[("OFF_BASE_URL", "ftp://example.org")]);
        assert!(cfg.validate().is_err());
    }
}
