use crate::core::model::FundSeed;
use anyhow::{Context, Result, ensure};
use chrono::NaiveDate;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::{fs, path::Path, path::PathBuf};
use tracing::debug;

/// Currency of the BTC reference prices.
pub const BTC_PRICE_CURRENCY: &str = "USD";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FundConfig {
    pub ticker: String,
    /// Home market; `None` means every date is treated as trading.
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub seed: Option<FundSeed>,
    /// Comparable fund used by peer-ratio share estimation.
    #[serde(default)]
    pub peer: Option<String>,
    /// Currency NAV and market price are quoted in. Defaults to `BTC_PRICE_CURRENCY`.
    #[serde(default)]
    pub nav_currency: Option<String>,
}

impl FundConfig {
    /// Holdings-implied estimation is only meaningful when this holds.
    pub fn nav_in_btc_price_currency(&self) -> bool {
        self.nav_currency
            .as_deref()
            .is_none_or(|c| c.eq_ignore_ascii_case(BTC_PRICE_CURRENCY))
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MarketConfig {
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
    /// Years the holiday list is authoritative for. Defaults to the span of `holidays`.
    #[serde(default)]
    pub first_year: Option<i32>,
    #[serde(default)]
    pub last_year: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SourcesConfig {
    /// Highest priority first.
    #[serde(default)]
    pub priority: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct EstimationConfig {
    pub half_life_days: f64,
    pub staleness_days: i64,
    pub stale_confidence_cap: f64,
    pub gap_flow_confidence: f64,
    pub holdings_implied_confidence: f64,
    pub holdings_implied_degraded_confidence: f64,
    pub market_ratio_confidence: f64,
    pub peer_ratio_confidence: f64,
    pub carry_forward_confidence: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        EstimationConfig {
            half_life_days: 5.0,
            staleness_days: 10,
            stale_confidence_cap: 0.1,
            gap_flow_confidence: 0.2,
            holdings_implied_confidence: 0.9,
            holdings_implied_degraded_confidence: 0.6,
            market_ratio_confidence: 0.7,
            peer_ratio_confidence: 0.6,
            carry_forward_confidence: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ReconciliationConfig {
    pub flow_tolerance_btc: f64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        ReconciliationConfig {
            flow_tolerance_btc: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct InputsConfig {
    pub observations_dir: Option<String>,
    pub btc_prices: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub funds: Vec<FundConfig>,
    #[serde(default)]
    pub markets: BTreeMap<String, MarketConfig>,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub estimation: EstimationConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub inputs: InputsConfig,
    pub data_path: Option<String>,
    /// Directory relative input paths are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "etfagg", "etfagg")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(self.resolve_path(custom_path));
        }
        let proj_dirs = ProjectDirs::from("io", "etfagg", "etfagg")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.base_dir = path.as_ref().parent().map(Path::to_path_buf);
        config.validate()?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }

    pub fn fund(&self, ticker: &str) -> Option<&FundConfig> {
        self.funds.iter().find(|f| f.ticker == ticker)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for fund in &self.funds {
            ensure!(
                seen.insert(fund.ticker.as_str()),
                "Fund {} is configured more than once",
                fund.ticker
            );
            if let Some(peer) = &fund.peer {
                ensure!(peer != &fund.ticker, "Fund {} cannot be its own peer", fund.ticker);
            }
        }

        let e = &self.estimation;
        ensure!(e.half_life_days > 0.0, "half_life_days must be positive");
        ensure!(e.staleness_days >= 0, "staleness_days must not be negative");
        for (name, value) in [
            ("stale_confidence_cap", e.stale_confidence_cap),
            ("gap_flow_confidence", e.gap_flow_confidence),
            ("holdings_implied_confidence", e.holdings_implied_confidence),
            (
                "holdings_implied_degraded_confidence",
                e.holdings_implied_degraded_confidence,
            ),
            ("market_ratio_confidence", e.market_ratio_confidence),
            ("peer_ratio_confidence", e.peer_ratio_confidence),
            ("carry_forward_confidence", e.carry_forward_confidence),
        ] {
            ensure!(
                (0.0..=1.0).contains(&value),
                "{name} must be within [0, 1], got {value}"
            );
        }
        ensure!(
            self.reconciliation.flow_tolerance_btc >= 0.0,
            "flow_tolerance_btc must not be negative"
        );
        Ok(())
    }
}
