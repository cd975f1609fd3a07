use crate::core::model::RawObservation;
use crate::core::source::{BtcPrice, BtcPriceSource, ObservationSource};
use crate::providers::util::list_files;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Reads every `*.json` file of a directory as an array of observations.
pub struct JsonObservationProvider {
    dir: PathBuf,
}

impl JsonObservationProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[async_trait]
impl ObservationSource for JsonObservationProvider {
    fn name(&self) -> &str {
        "json"
    }

    async fn observations(&self) -> Result<Vec<RawObservation>> {
        let mut all = Vec::new();
        for path in list_files(&self.dir, |name| name.ends_with(".json")).await? {
            let batch: Vec<RawObservation> = read_json(&path).await?;
            debug!("Loaded {} observations from {}", batch.len(), path.display());
            all.extend(batch);
        }
        info!(count = all.len(), dir = %self.dir.display(), "JSON observations loaded");
        Ok(all)
    }
}

/// BTC reference closes from a JSON array of `{date, price_usd}`.
pub struct JsonBtcPriceProvider {
    path: PathBuf,
}

impl JsonBtcPriceProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BtcPriceSource for JsonBtcPriceProvider {
    async fn btc_prices(&self) -> Result<BTreeMap<NaiveDate, f64>> {
        let prices: Vec<BtcPrice> = read_json(&self.path).await?;
        let table: BTreeMap<NaiveDate, f64> = prices
            .into_iter()
            .filter(|p| p.price_usd > 0.0)
            .map(|p| (p.date, p.price_usd))
            .collect();
        info!(count = table.len(), "BTC prices loaded");
        Ok(table)
    }
}
