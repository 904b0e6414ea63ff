//! Runtime configuration for the resilience layer.
//!
//! Values come from `CW_*` environment variables (a `.env` file is loaded
//! first when present). Anything unset or unparsable falls back to the
//! defaults below.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono_tz::Tz;
use log::warn;

/// Canonical provider names that always appear in the ledger.
pub const TWELVEDATA: &str = "twelvedata";
pub const EODHD: &str = "eodhd";
pub const ALPHAVANTAGE: &str = "alphavantage";
pub const RAVA: &str = "rava";

pub const CANONICAL_PROVIDERS: [&str; 3] = [TWELVEDATA, EODHD, ALPHAVANTAGE];

const DEFAULT_TWELVEDATA_CAP: u32 = 800;
const DEFAULT_EODHD_CAP: u32 = 20;
const DEFAULT_ALPHAVANTAGE_CAP: u32 = 25;
const DEFAULT_FALLBACK_CAP: u32 = 100;

const ONE_DAY: Duration = Duration::from_secs(86_400);

const DEFAULT_RAVA_PROFILE_URL: &str = "https://www.rava.com/perfil/{symbol}";
const DEFAULT_RAVA_HISTORICOS_URL: &str =
    "https://clasico.rava.com/lib/restapi/v3/publico/cotizaciones/historicos";

/// Normalize a provider name for use as a ledger key.
pub fn normalize_provider(provider: &str) -> String {
    provider.trim().to_lowercase()
}

/// Daily call caps per provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DailyCaps {
    caps: BTreeMap<String, u32>,
    /// Cap for providers without an explicit entry.
    pub fallback: u32,
}

impl DailyCaps {
    pub fn with_cap(mut self, provider: &str, cap: u32) -> Self {
        self.caps.insert(normalize_provider(provider), cap);
        self
    }

    /// Daily cap for `provider`.
    pub fn allowed_for(&self, provider: &str) -> u32 {
        self.caps
            .get(&normalize_provider(provider))
            .copied()
            .unwrap_or(self.fallback)
    }
}

impl Default for DailyCaps {
    fn default() -> Self {
        Self {
            caps: BTreeMap::new(),
            fallback: DEFAULT_FALLBACK_CAP,
        }
        .with_cap(TWELVEDATA, DEFAULT_TWELVEDATA_CAP)
        .with_cap(EODHD, DEFAULT_EODHD_CAP)
        .with_cap(ALPHAVANTAGE, DEFAULT_ALPHAVANTAGE_CAP)
    }
}

/// RAVA endpoints. `{symbol}` in the profile URL is replaced by the
/// url-encoded especie.
#[derive(Clone, Debug)]
pub struct RavaEndpoints {
    pub profile_url: String,
    pub historicos_url: String,
}

impl Default for RavaEndpoints {
    fn default() -> Self {
        Self {
            profile_url: DEFAULT_RAVA_PROFILE_URL.to_string(),
            historicos_url: DEFAULT_RAVA_HISTORICOS_URL.to_string(),
        }
    }
}

/// Complete configuration for caches, metrics and HTTP collaborators.
#[derive(Clone, Debug)]
pub struct ResilienceConfig {
    /// Base directory for every persisted document.
    pub data_dir: PathBuf,
    pub metrics_file: String,
    /// Directory (relative to `data_dir`) holding quote cache entries.
    pub quote_cache_dir: String,
    pub quote_cache_ttl: Duration,
    pub cedears_file: String,
    /// Freshness window of the CEDEAR snapshot.
    pub cedears_ttl: Duration,
    /// How long to stop re-scraping after a failed refresh.
    pub cedears_backoff: Duration,
    pub no_data_ttl: Duration,
    pub daily_caps: DailyCaps,
    /// Time zone whose calendar day delimits the ledger.
    pub ledger_timezone: Tz,
    pub http_timeout: Duration,
    /// Disable window applied when a provider signals a rate limit.
    pub rate_limit_cooldown: Duration,
    pub symbols_ttl: Duration,
    /// TTL for a symbol catalog built while one upstream was failing.
    pub symbols_degraded_ttl: Duration,
    pub eodhd_api_key: Option<String>,
    pub twelvedata_api_key: Option<String>,
    pub rava: RavaEndpoints,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            metrics_file: "provider_metrics.json".to_string(),
            quote_cache_dir: "quote_cache".to_string(),
            quote_cache_ttl: ONE_DAY,
            cedears_file: "cedears.json".to_string(),
            cedears_ttl: Duration::from_secs(900),
            cedears_backoff: Duration::from_secs(600),
            no_data_ttl: ONE_DAY,
            daily_caps: DailyCaps::default(),
            ledger_timezone: Tz::UTC,
            http_timeout: Duration::from_secs(8),
            rate_limit_cooldown: Duration::from_secs(3_600),
            symbols_ttl: ONE_DAY,
            symbols_degraded_ttl: Duration::from_secs(3_600),
            eodhd_api_key: None,
            twelvedata_api_key: None,
            rava: RavaEndpoints::default(),
        }
    }
}

impl ResilienceConfig {
    /// Rooted at `data_dir`, everything else default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Self {
        // A missing .env is the normal case in production.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let caps = DailyCaps {
            fallback: parse_or(&get, "CW_CAP_DEFAULT", defaults.daily_caps.fallback),
            ..defaults.daily_caps.clone()
        }
        .with_cap(
            TWELVEDATA,
            parse_or(&get, "CW_CAP_TWELVEDATA", DEFAULT_TWELVEDATA_CAP),
        )
        .with_cap(EODHD, parse_or(&get, "CW_CAP_EODHD", DEFAULT_EODHD_CAP))
        .with_cap(
            ALPHAVANTAGE,
            parse_or(&get, "CW_CAP_ALPHAVANTAGE", DEFAULT_ALPHAVANTAGE_CAP),
        );

        Self {
            data_dir: get("CW_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            metrics_file: get("CW_METRICS_FILE").unwrap_or(defaults.metrics_file),
            quote_cache_dir: get("CW_QUOTE_CACHE_DIR").unwrap_or(defaults.quote_cache_dir),
            quote_cache_ttl: secs_or(&get, "CW_QUOTE_CACHE_TTL_SECS", defaults.quote_cache_ttl),
            cedears_file: get("CW_CEDEARS_FILE").unwrap_or(defaults.cedears_file),
            cedears_ttl: secs_or(&get, "CW_CEDEARS_TTL_SECS", defaults.cedears_ttl),
            cedears_backoff: secs_or(&get, "CW_CEDEARS_BACKOFF_SECS", defaults.cedears_backoff),
            no_data_ttl: secs_or(&get, "CW_NO_DATA_TTL_SECS", defaults.no_data_ttl),
            daily_caps: caps,
            ledger_timezone: parse_or(&get, "CW_LEDGER_TZ", defaults.ledger_timezone),
            http_timeout: secs_or(&get, "CW_HTTP_TIMEOUT_SECS", defaults.http_timeout),
            rate_limit_cooldown: secs_or(
                &get,
                "CW_RATE_LIMIT_COOLDOWN_SECS",
                defaults.rate_limit_cooldown,
            ),
            symbols_ttl: secs_or(&get, "CW_SYMBOLS_TTL_SECS", defaults.symbols_ttl),
            symbols_degraded_ttl: secs_or(
                &get,
                "CW_SYMBOLS_DEGRADED_TTL_SECS",
                defaults.symbols_degraded_ttl,
            ),
            eodhd_api_key: get("CW_EODHD_API_KEY"),
            twelvedata_api_key: get("CW_TWELVEDATA_API_KEY"),
            rava: RavaEndpoints {
                profile_url: get("CW_RAVA_PROFILE_URL").unwrap_or(defaults.rava.profile_url),
                historicos_url: get("CW_RAVA_HISTORICOS_URL")
                    .unwrap_or(defaults.rava.historicos_url),
            },
        }
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.data_dir.join(&self.metrics_file)
    }

    pub fn quote_cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.quote_cache_dir)
    }

    pub fn cedears_path(&self) -> PathBuf {
        self.data_dir.join(&self.cedears_file)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> T
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value for {}: '{}'", key, raw);
            default
        }),
        None => default,
    }
}

fn secs_or<G>(get: &G, key: &str, default: Duration) -> Duration
where
    G: Fn(&str) -> Option<String>,
{
    Duration::from_secs(parse_or(get, key, default.as_secs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_caps() {
        let caps = DailyCaps::default();
        assert_eq!(caps.allowed_for("twelvedata"), 800);
        assert_eq!(caps.allowed_for("EODHD"), 20);
        assert_eq!(caps.allowed_for(" alphavantage "), 25);
        assert_eq!(caps.allowed_for("tiingo"), DEFAULT_FALLBACK_CAP);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ResilienceConfig::from_lookup(lookup(&[
            ("CW_DATA_DIR", "/var/lib/cedearwatch"),
            ("CW_CAP_EODHD", "100"),
            ("CW_NO_DATA_TTL_SECS", "3600"),
            ("CW_LEDGER_TZ", "America/Argentina/Buenos_Aires"),
            ("CW_EODHD_API_KEY", "demo"),
        ]));

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/cedearwatch"));
        assert_eq!(config.daily_caps.allowed_for(EODHD), 100);
        assert_eq!(config.daily_caps.allowed_for(TWELVEDATA), 800);
        assert_eq!(config.no_data_ttl, Duration::from_secs(3600));
        assert_eq!(config.ledger_timezone, chrono_tz::America::Argentina::Buenos_Aires);
        assert_eq!(config.eodhd_api_key.as_deref(), Some("demo"));
        assert!(config.twelvedata_api_key.is_none());
        assert_eq!(
            config.metrics_path(),
            PathBuf::from("/var/lib/cedearwatch/provider_metrics.json")
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ResilienceConfig::from_lookup(lookup(&[
            ("CW_CAP_TWELVEDATA", "lots"),
            ("CW_LEDGER_TZ", "Mars/Olympus"),
            ("CW_HTTP_TIMEOUT_SECS", "-5"),
            ("CW_TWELVEDATA_API_KEY", "   "),
        ]));

        assert_eq!(config.daily_caps.allowed_for(TWELVEDATA), 800);
        assert_eq!(config.ledger_timezone, Tz::UTC);
        assert_eq!(config.http_timeout, Duration::from_secs(8));
        assert!(config.twelvedata_api_key.is_none());
    }
}
