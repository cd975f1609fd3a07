//! Input abstractions feeding the engine.

use crate::core::model::RawObservation;
use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One BTC reference close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BtcPrice {
    pub date: NaiveDate,
    pub price_usd: f64,
}

#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn observations(&self) -> Result<Vec<RawObservation>>;
}

#[async_trait]
pub trait BtcPriceSource: Send + Sync {
    /// Reference closes by date. Later entries for the same date replace earlier ones.
    async fn btc_prices(&self) -> Result<BTreeMap<NaiveDate, f64>>;
}

/// Collects the observations of every source, in source order.
pub async fn collect_observations(sources: &[Box<dyn ObservationSource>]) -> Result<Vec<RawObservation>> {
    let batches = futures::future::try_join_all(sources.iter().map(|s| s.observations())).await?;
    Ok(batches.into_iter().flatten().collect())
}
