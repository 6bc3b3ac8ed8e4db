//! Layered configuration: `config/default.toml` overridden by
//! `METERBILL_`-prefixed environment variables, mirroring the
//! layered-precedence philosophy of the teacher's own configuration module
//! (`aerolithdb-saas::config`) even though its distributed-database-specific
//! sections (storage tiers, consensus, P2P network) have no counterpart
//! here — see `spec.md` §9 / `SPEC_FULL.md` §6.1.

use config::{Config as RawConfig, Environment, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorSection,
    pub credential: CredentialSection,
    pub upstream: UpstreamSection,
    pub database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_cadence")]
    pub cadence: String,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            cadence: default_cadence(),
        }
    }
}

fn default_cadence() -> String {
    meterbill_monitor::MonitorConfig::default().cadence
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialSection {
    pub secret: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
}

fn default_issuer() -> String {
    "metering-service".to_string()
}

fn default_ttl_seconds() -> i64 {
    7_200
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    pub rate_plan_base_url: String,
    pub subscription_base_url: String,
    pub notifier_base_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub call_timeout_seconds: u64,
}

fn default_timeout_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl AppConfig {
    /// Loads `config/default.toml` (if present) and layers environment
    /// variables prefixed `METERBILL_` on top, with `__` as the nested-key
    /// separator (e.g. `METERBILL_CREDENTIAL__SECRET`).
    pub fn load() -> Result<Self, config::ConfigError> {
        RawConfig::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(Environment::with_prefix("METERBILL").separator("__"))
            .build()?
            .try_deserialize()
    }
}
