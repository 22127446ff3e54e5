//! Layered application configuration: built-in defaults, overridden by
//! `config/default.toml` if present, overridden by `APP__*` environment
//! variables — the `dotenvy` + `config` crate combination from
//! `main.rs`, generalized into its own module.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    /// Background engine loop sweep interval — "sleeps briefly
    /// (hundreds of milliseconds)".
    pub background_loop_interval_ms: u64,
    pub max_retry_attempts: u32,
    pub base_retry_delay_ms: u64,
    /// Fee applied to direct/mint/merge matches — 2%, grounded in
    /// `predictions/engine/matching.py`'s `FEE_PERCENTAGE`.
    pub matching_fee_percentage: rust_decimal::Decimal,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .set_default("database_url", "postgres://localhost/predictions_core")?
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8080)?
            .set_default("background_loop_interval_ms", 250)?
            .set_default("max_retry_attempts", 5)?
            .set_default("base_retry_delay_ms", 10)?
            .set_default("matching_fee_percentage", "0.02")?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let raw: RawConfig = settings.try_deserialize()?;
        raw.into_app_config()
    }
}

/// Intermediate struct because `rust_decimal::Decimal` does not implement
/// `config`'s deserialization for every source type directly; the fee is
/// read as a string and parsed explicitly.
#[derive(Debug, Deserialize)]
struct RawConfig {
    database_url: String,
    server_host: String,
    server_port: u16,
    background_loop_interval_ms: u64,
    max_retry_attempts: u32,
    base_retry_delay_ms: u64,
    matching_fee_percentage: String,
}

impl RawConfig {
    fn into_app_config(self) -> anyhow::Result<AppConfig> {
        Ok(AppConfig {
            database_url: self.database_url,
            server_host: self.server_host,
            server_port: self.server_port,
            background_loop_interval_ms: self.background_loop_interval_ms,
            max_retry_attempts: self.max_retry_attempts,
            base_retry_delay_ms: self.base_retry_delay_ms,
            matching_fee_percentage: self.matching_fee_percentage.parse()?,
        })
    }
}
