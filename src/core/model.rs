//! Canonical record model shared by every stage of the engine.

use crate::core::error::{EngineError, ReconciliationWarning};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// One provider's report for one fund on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub fund: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub nav: Option<f64>,
    #[serde(default)]
    pub market_price: Option<f64>,
    #[serde(default)]
    pub shares_outstanding: Option<f64>,
    #[serde(default)]
    pub holdings_btc: Option<f64>,
    #[serde(default)]
    pub flow_btc: Option<f64>,
    #[serde(default)]
    pub flow_usd: Option<f64>,
    pub source: String,
    pub collected_at: DateTime<Utc>,
}

impl RawObservation {
    pub fn value_of(&self, field: RecordField) -> Option<f64> {
        match field {
            RecordField::Nav => self.nav,
            RecordField::MarketPrice => self.market_price,
            RecordField::SharesOutstanding => self.shares_outstanding,
            RecordField::HoldingsBtc => self.holdings_btc,
            RecordField::FlowBtc => self.flow_btc,
            RecordField::FlowUsd => self.flow_usd,
        }
    }
}

/// Launch anchor for holdings reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundSeed {
    pub date: NaiveDate,
    #[serde(default)]
    pub holdings_btc: f64,
}

/// The per-fund numeric fields a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    Nav,
    MarketPrice,
    SharesOutstanding,
    HoldingsBtc,
    FlowBtc,
    FlowUsd,
}

impl RecordField {
    pub const ALL: [RecordField; 6] = [
        RecordField::Nav,
        RecordField::MarketPrice,
        RecordField::SharesOutstanding,
        RecordField::HoldingsBtc,
        RecordField::FlowBtc,
        RecordField::FlowUsd,
    ];
}

impl Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                RecordField::Nav => "nav",
                RecordField::MarketPrice => "market_price",
                RecordField::SharesOutstanding => "shares_outstanding",
                RecordField::HoldingsBtc => "holdings_btc",
                RecordField::FlowBtc => "flow_btc",
                RecordField::FlowUsd => "flow_usd",
            }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Observed,
    CarriedForward,
    Estimated,
}

impl Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Provenance::Observed => "observed",
                Provenance::CarriedForward => "carried-forward",
                Provenance::Estimated => "estimated",
            }
        )
    }
}

/// A value together with where it came from and how much to trust it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub value: Option<f64>,
    pub provenance: Provenance,
    pub confidence: f64,
}

impl Field {
    pub fn observed(value: f64) -> Self {
        Self {
            value: Some(value),
            provenance: Provenance::Observed,
            confidence: 1.0,
        }
    }

    pub fn carried(value: Option<f64>, confidence: f64) -> Self {
        Self {
            value,
            provenance: Provenance::CarriedForward,
            confidence: if value.is_some() { confidence } else { 0.0 },
        }
    }

    pub fn estimated(value: Option<f64>, confidence: f64) -> Self {
        Self {
            value,
            provenance: Provenance::Estimated,
            confidence: if value.is_some() { confidence } else { 0.0 },
        }
    }

    /// A gap nothing could fill.
    pub fn missing() -> Self {
        Self::estimated(None, 0.0)
    }

    /// An observed field whose sources disagreed.
    pub fn disputed() -> Self {
        Self {
            value: None,
            provenance: Provenance::Observed,
            confidence: 0.0,
        }
    }

    pub fn is_observed(&self) -> bool {
        self.provenance == Provenance::Observed && self.value.is_some()
    }
}

/// Non-fatal or field-scoped problems attached to the record they affect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordIssue {
    Error(EngineError),
    Warning(ReconciliationWarning),
}

/// The engine's output unit: exactly one per (fund, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDailyRecord {
    pub fund: String,
    pub date: NaiveDate,
    pub nav: Field,
    pub market_price: Field,
    pub shares_outstanding: Field,
    pub holdings_btc: Field,
    pub flow_btc: Field,
    pub flow_usd: Field,
    pub premium_discount: Option<f64>,
    pub btc_price: Option<f64>,
    #[serde(default)]
    pub issues: Vec<RecordIssue>,
}

impl CanonicalDailyRecord {
    pub fn empty(fund: &str, date: NaiveDate) -> Self {
        Self {
            fund: fund.to_string(),
            date,
            nav: Field::missing(),
            market_price: Field::missing(),
            shares_outstanding: Field::missing(),
            holdings_btc: Field::missing(),
            flow_btc: Field::missing(),
            flow_usd: Field::missing(),
            premium_discount: None,
            btc_price: None,
            issues: Vec::new(),
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            fund: self.fund.clone(),
            date: self.date,
        }
    }

    pub fn field(&self, field: RecordField) -> &Field {
        match field {
            RecordField::Nav => &self.nav,
            RecordField::MarketPrice => &self.market_price,
            RecordField::SharesOutstanding => &self.shares_outstanding,
            RecordField::HoldingsBtc => &self.holdings_btc,
            RecordField::FlowBtc => &self.flow_btc,
            RecordField::FlowUsd => &self.flow_usd,
        }
    }

    pub fn field_mut(&mut self, field: RecordField) -> &mut Field {
        match field {
            RecordField::Nav => &mut self.nav,
            RecordField::MarketPrice => &mut self.market_price,
            RecordField::SharesOutstanding => &mut self.shares_outstanding,
            RecordField::HoldingsBtc => &mut self.holdings_btc,
            RecordField::FlowBtc => &mut self.flow_btc,
            RecordField::FlowUsd => &mut self.flow_usd,
        }
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ReconciliationWarning> {
        self.issues.iter().filter_map(|issue| match issue {
            RecordIssue::Warning(w) => Some(w),
            RecordIssue::Error(_) => None,
        })
    }
}

/// Uniqueness key of the output set, ordered by fund then date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub fund: String,
    pub date: NaiveDate,
}

impl Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.fund, self.date)
    }
}
