use serde::Deserialize;
use smartpark_shared::Currency;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub paynow: PaynowConfig,
    #[serde(default)]
    pub reservations: ReservationRules,
    #[serde(default)]
    pub payments: PaymentRules,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub billing: BillingRules,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisConfig {
    /// Rate limiting is skipped when unset
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    #[default]
    Mock,
    Live,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PaynowCredentials {
    pub integration_id: String,
    pub integration_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaynowConfig {
    #[serde(default)]
    pub mode: GatewayMode,
    #[serde(default = "default_initiate_url")]
    pub initiate_url: String,
    /// Where Paynow posts status updates (our webhook)
    #[serde(default)]
    pub result_url: String,
    #[serde(default)]
    pub return_url: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub usd: PaynowCredentials,
    #[serde(default)]
    pub zwl: PaynowCredentials,
}

fn default_initiate_url() -> String {
    "https://www.paynow.co.zw/interface/remotetransaction".to_string()
}

fn default_gateway_timeout() -> u64 { 30 }

impl Default for PaynowConfig {
    fn default() -> Self {
        Self {
            mode: GatewayMode::Mock,
            initiate_url: default_initiate_url(),
            result_url: String::new(),
            return_url: String::new(),
            timeout_seconds: default_gateway_timeout(),
            usd: PaynowCredentials::default(),
            zwl: PaynowCredentials::default(),
        }
    }
}

impl PaynowConfig {
    pub fn credentials(&self, currency: Currency) -> &PaynowCredentials {
        match currency {
            Currency::Usd => &self.usd,
            Currency::Zwl => &self.zwl,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationRules {
    #[serde(default = "default_max_hours")]
    pub max_hours: u32,
}

fn default_max_hours() -> u32 { 24 }

impl Default for ReservationRules {
    fn default() -> Self {
        Self { max_hours: default_max_hours() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentRules {
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_minutes: i64,
}

fn default_pending_timeout() -> i64 { 30 }

impl Default for PaymentRules {
    fn default() -> Self {
        Self { pending_timeout_minutes: default_pending_timeout() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval")]
    pub interval_seconds: u64,
}

fn default_sweep_interval() -> u64 { 60 }

impl Default for SweeperConfig {
    fn default() -> Self {
        Self { interval_seconds: default_sweep_interval() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingRules {
    /// Charged per started hour past the reservation end; 0 disables billing
    #[serde(default = "default_overstay_rate")]
    pub overstay_hourly_rate: f64,
}

fn default_overstay_rate() -> f64 { 2.0 }

impl Default for BillingRules {
    fn default() -> Self {
        Self { overstay_hourly_rate: default_overstay_rate() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit")]
    pub requests: i64,
    #[serde(default = "default_rate_window")]
    pub window_seconds: i64,
}

fn default_rate_limit() -> i64 { 100 }
fn default_rate_window() -> i64 { 60 }

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: default_rate_limit(),
            window_seconds: default_rate_window(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `SMARTPARK__STORE__BACKEND=postgres`
            .add_source(config::Environment::with_prefix("SMARTPARK").separator("__"))
            .build()?;

        let config: Config = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.sweeper.interval_seconds == 0 {
            return Err(config::ConfigError::Message("sweeper.interval_seconds must be at least 1".into()));
        }
        if self.rate_limit.window_seconds <= 0 {
            return Err(config::ConfigError::Message("rate_limit.window_seconds must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            server: ServerConfig { port: 3000 },
            store: StoreConfig::default(),
            redis: RedisConfig::default(),
            auth: AuthConfig { jwt_secret: "secret".into(), jwt_expiration_seconds: 3600 },
            paynow: PaynowConfig::default(),
            reservations: ReservationRules::default(),
            payments: PaymentRules::default(),
            sweeper: SweeperConfig::default(),
            billing: BillingRules::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        assert!(config().validate().is_ok());

        let mut zero = config();
        zero.sweeper.interval_seconds = 0;
        assert!(zero.validate().is_err());

        let mut no_window = config();
        no_window.rate_limit.window_seconds = 0;
        assert!(no_window.validate().is_err());
    }
}
