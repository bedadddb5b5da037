use crate::error::{Error, Result};
use crate::ledger::{Plan, PlanCatalog, SubscriptionTier};
use crate::rate_limit::RateLimitConfig;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const DEFAULT_RATE_LIMITS: &str = "minute=10/60,hour=100/3600,day=500/86400";

/// Configuration for the usage gate.
///
/// Plans, credit pricing and rate windows live here so that the services
/// receive them by construction instead of reading globals.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path (default: `.usage-gate/` in current directory)
    pub data_dir: PathBuf,

    /// Output format: "human" (default) or "json"
    pub output_format: String,

    /// Log level: "info", "debug", "warn", "error" (default: "info")
    pub log_level: String,

    /// Monthly quota of the FREE plan
    pub free_monthly_quota: u32,

    /// Monthly quota of the PREMIUM plan
    pub premium_monthly_quota: u32,

    /// PREMIUM monthly price in minor currency units
    pub premium_price: u64,

    /// Price recorded in history for one credit-funded operation
    pub credit_unit_price: u64,

    /// Lifetime of a purchased credit grant
    pub credit_validity_days: u32,

    /// Rate windows as `name=max/window_secs`, tightest first
    pub rate_limits: String,

    /// Compare-and-set attempts before a ledger update gives up
    pub max_cas_retries: u32,
}

impl Config {
    /// Create a new config with defaults
    pub fn new() -> Self {
        let data_dir = env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".usage-gate");

        Config {
            data_dir,
            output_format: "human".to_string(),
            log_level: "info".to_string(),
            free_monthly_quota: 3,
            premium_monthly_quota: 100,
            premium_price: 999,
            credit_unit_price: 29,
            credit_validity_days: 30,
            rate_limits: DEFAULT_RATE_LIMITS.to_string(),
            max_cas_retries: 3,
        }
    }

    /// Create config with custom data directory
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Config {
            data_dir,
            ..Config::new()
        }
    }

    pub fn get_data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    pub fn set_data_dir(&mut self, dir: PathBuf) {
        self.data_dir = dir;
    }

    pub fn get_output_format(&self) -> &str {
        &self.output_format
    }

    /// Set output format ("human" or "json")
    pub fn set_output_format(&mut self, format: String) {
        self.output_format = format;
    }

    pub fn get_log_level(&self) -> &str {
        &self.log_level
    }

    pub fn set_log_level(&mut self, level: String) {
        self.log_level = level;
    }

    /// Directory holding one snapshot file per user ledger
    pub fn get_ledger_dir(&self) -> PathBuf {
        self.data_dir.join("ledgers")
    }

    /// Directory holding one snapshot file per rate window
    pub fn get_window_dir(&self) -> PathBuf {
        self.data_dir.join("windows")
    }

    pub fn credit_validity(&self) -> Duration {
        Duration::from_secs(u64::from(self.credit_validity_days) * 24 * 60 * 60)
    }

    /// Build the plan catalog used by the usage ledger
    pub fn plan_catalog(&self) -> PlanCatalog {
        PlanCatalog {
            free: Plan {
                tier: SubscriptionTier::Free,
                monthly_quota: self.free_monthly_quota,
                price: 0,
                display_price: "Free".to_string(),
                features: vec![
                    format!("{} try-ons per month", self.free_monthly_quota),
                    "Standard resolution".to_string(),
                ],
            },
            premium: Plan {
                tier: SubscriptionTier::Premium,
                monthly_quota: self.premium_monthly_quota,
                price: self.premium_price,
                display_price: format!(
                    "${}.{:02}/month",
                    self.premium_price / 100,
                    self.premium_price % 100
                ),
                features: vec![
                    format!("{} try-ons per month", self.premium_monthly_quota),
                    "High resolution".to_string(),
                    "Priority processing".to_string(),
                ],
            },
            credit_unit_price: self.credit_unit_price,
            credit_validity: self.credit_validity(),
        }
    }

    /// Parse `rate_limits` into window configs, preserving order
    pub fn rate_limit_configs(&self) -> Result<Vec<RateLimitConfig>> {
        parse_rate_limits(&self.rate_limits)
    }

    /// Load config from environment variables
    ///
    /// Environment variables:
    /// - `USAGE_GATE_DATA_DIR`: override data directory
    /// - `USAGE_GATE_OUTPUT_FORMAT`: "human" or "json"
    /// - `USAGE_GATE_LOG_LEVEL`: log level
    /// - `USAGE_GATE_FREE_QUOTA`, `USAGE_GATE_PREMIUM_QUOTA`, `USAGE_GATE_PREMIUM_PRICE`
    /// - `USAGE_GATE_CREDIT_PRICE`, `USAGE_GATE_CREDIT_VALIDITY_DAYS`
    /// - `USAGE_GATE_RATE_LIMITS`: e.g. `minute=10/60,hour=100/3600`
    /// - `USAGE_GATE_CAS_RETRIES`
    ///
    /// Unparsable numeric values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Config::new();
        config.apply_env(false).ok();
        config
    }

    /// Like [`Config::from_env`], but rejects malformed values.
    pub fn try_from_env() -> Result<Self> {
        let mut config = Config::new();
        config.apply_env(true)?;
        config.rate_limit_configs()?;
        Ok(config)
    }

    fn apply_env(&mut self, strict: bool) -> Result<()> {
        if let Ok(dir) = env::var("USAGE_GATE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }

        if let Ok(format) = env::var("USAGE_GATE_OUTPUT_FORMAT") {
            self.output_format = format;
        }

        if let Ok(level) = env::var("USAGE_GATE_LOG_LEVEL") {
            self.log_level = level;
        }

        if let Ok(limits) = env::var("USAGE_GATE_RATE_LIMITS") {
            self.rate_limits = limits;
        }

        read_number("USAGE_GATE_FREE_QUOTA", &mut self.free_monthly_quota, strict)?;
        read_number("USAGE_GATE_PREMIUM_QUOTA", &mut self.premium_monthly_quota, strict)?;
        read_number("USAGE_GATE_PREMIUM_PRICE", &mut self.premium_price, strict)?;
        read_number("USAGE_GATE_CREDIT_PRICE", &mut self.credit_unit_price, strict)?;
        read_number(
            "USAGE_GATE_CREDIT_VALIDITY_DAYS",
            &mut self.credit_validity_days,
            strict,
        )?;
        read_number("USAGE_GATE_CAS_RETRIES", &mut self.max_cas_retries, strict)?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}

fn read_number<T: std::str::FromStr>(var: &str, slot: &mut T, strict: bool) -> Result<()> {
    let Ok(raw) = env::var(var) else {
        return Ok(());
    };
    match raw.trim().parse::<T>() {
        Ok(value) => {
            *slot = value;
            Ok(())
        }
        Err(_) if strict => Err(Error::InvalidConfig(format!(
            "{} must be a non-negative integer, got '{}'",
            var, raw
        ))),
        Err(_) => {
            warn!(var = var, value = %raw, "ignoring unparsable numeric override");
            Ok(())
        }
    }
}

/// Parse `name=max/window_secs[,name=max/window_secs...]`.
pub fn parse_rate_limits(list: &str) -> Result<Vec<RateLimitConfig>> {
    let mut configs = Vec::new();
    for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, rule) = entry.split_once('=').ok_or_else(|| {
            Error::InvalidConfig(format!("Rate limit '{}' must look like name=max/secs", entry))
        })?;
        let (max, secs) = rule.split_once('/').ok_or_else(|| {
            Error::InvalidConfig(format!("Rate limit '{}' must look like name=max/secs", entry))
        })?;
        let max: u32 = max.trim().parse().map_err(|_| {
            Error::InvalidConfig(format!("Invalid max requests in '{}'", entry))
        })?;
        let secs: u64 = secs.trim().parse().map_err(|_| {
            Error::InvalidConfig(format!("Invalid window seconds in '{}'", entry))
        })?;
        configs.push(RateLimitConfig::new(
            name.trim(),
            max,
            Duration::from_secs(secs),
        )?);
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::new();
        assert_eq!(config.output_format, "human");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.free_monthly_quota, 3);
        assert_eq!(config.credit_validity_days, 30);
        assert!(config.data_dir.ends_with(".usage-gate"));
    }

    #[test]
    fn test_config_paths() {
        let config = Config::new();
        assert!(config.get_ledger_dir().ends_with("ledgers"));
        assert!(config.get_window_dir().ends_with("windows"));
    }

    #[test]
    fn test_config_setters() {
        let mut config = Config::new();
        config.set_output_format("json".to_string());
        assert_eq!(config.get_output_format(), "json");

        config.set_log_level("debug".to_string());
        assert_eq!(config.get_log_level(), "debug");
    }

    #[test]
    fn test_plan_catalog_from_config() {
        let config = Config::new();
        let catalog = config.plan_catalog();
        assert_eq!(catalog.plan(SubscriptionTier::Free).monthly_quota, 3);
        assert_eq!(catalog.plan(SubscriptionTier::Premium).monthly_quota, 100);
        assert_eq!(catalog.premium.display_price, "$9.99/month");
        assert_eq!(catalog.credit_validity, Duration::from_secs(30 * 86_400));
    }

    #[test]
    fn test_default_rate_limits_parse_in_order() {
        let limits = Config::new().rate_limit_configs().unwrap();
        let names: Vec<&str> = limits.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["minute", "hour", "day"]);
        assert_eq!(limits[0].max_requests, 10);
        assert_eq!(limits[0].window, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_rate_limits_rejects_garbage() {
        assert!(parse_rate_limits("minute=ten/60").is_err());
        assert!(parse_rate_limits("minute").is_err());
        assert!(parse_rate_limits("minute=0/60").is_err());
        assert!(parse_rate_limits("minute=5/0").is_err());
    }
}
