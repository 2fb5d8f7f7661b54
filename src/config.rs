// ⚙️ Harvest Configuration - defaults + REGISTRY_* environment overrides
//
// The core types never read the environment themselves; only the entry
// point builds a HarvestConfig and passes the pieces down.

use crate::fetcher::{EndpointSettings, CAPACITY};
use crate::stream::ExhaustionPolicy;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_PREFIX: &str = "REGISTRY_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub endpoint: EndpointSettings,
    pub page_size: u32,
    pub step_over_pages: u32,
    pub policy: ExhaustionPolicy,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Directory of `current.csv` + `<year>.csv` code-table files
    pub codes_dir: PathBuf,
    /// SQLite file harvested persons are stored in
    pub db_path: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        HarvestConfig {
            endpoint: EndpointSettings::default(),
            page_size: 200,
            step_over_pages: 1,
            policy: ExhaustionPolicy::default(),
            timeout_secs: 30,
            user_agent: format!("registry-harvest/{}", env!("CARGO_PKG_VERSION")),
            codes_dir: PathBuf::from("codes"),
            db_path: PathBuf::from("registry.db"),
        }
    }
}

impl HarvestConfig {
    /// Load `.env` (if any) and apply `REGISTRY_*` variables over the defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (environment, map in tests, ...)
    ///
    /// Keys are `REGISTRY_` + the upper-case field name, e.g.
    /// `REGISTRY_PAGE_SIZE`, `REGISTRY_BASE_URL`, `REGISTRY_DB_PATH`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));
        let mut config = HarvestConfig::default();

        if let Some(v) = get("BASE_URL") {
            config.endpoint.base_url = v;
        }
        if let Some(v) = get("ENDPOINT") {
            config.endpoint.endpoint = v;
        }
        if let Some(v) = get("TABLE_NAME") {
            config.endpoint.table_name = v;
        }
        if let Some(v) = get("SCENES") {
            config.endpoint.scenes = v;
        }
        if let Some(v) = get("PAGE_SIZE") {
            config.page_size = parse_var("PAGE_SIZE", &v)?;
        }
        if let Some(v) = get("STEP_OVER_PAGES") {
            config.step_over_pages = parse_var("STEP_OVER_PAGES", &v)?;
        }
        if let Some(v) = get("POLICY") {
            config.policy = v.parse().map_err(|e: String| anyhow!("{}POLICY: {}", ENV_PREFIX, e))?;
        }
        if let Some(v) = get("TIMEOUT_SECS") {
            config.timeout_secs = parse_var("TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("USER_AGENT") {
            config.user_agent = v;
        }
        if let Some(v) = get("CODES_DIR") {
            config.codes_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DB_PATH") {
            config.db_path = PathBuf::from(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 || u64::from(self.page_size) > CAPACITY {
            return Err(anyhow!(
                "page_size must be between 1 and {}, got {}",
                CAPACITY,
                self.page_size
            ));
        }
        if self.step_over_pages == 0 {
            return Err(anyhow!("step_over_pages must be at least 1"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be at least 1"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {}{}: {:?}", ENV_PREFIX, name, value))
}
