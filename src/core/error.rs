//! Structured failures of the aggregation engine.
//!
//! Every variant is scoped to a fund, a (fund, date) or a single field, so it can
//! travel with the record it affects instead of aborting a run.

use crate::core::model::RecordField;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum EngineError {
    #[error("no seed configured for {fund}, holdings cannot be reconstructed")]
    MissingSeed { fund: String },

    #[error("{fund}@{date}: sources {sources:?} disagree on {field} and have no priority ordering")]
    ConflictUnresolved {
        fund: String,
        date: NaiveDate,
        field: RecordField,
        sources: Vec<String>,
    },

    #[error("{fund}@{date}: no strategy could estimate {field}")]
    EstimationUnavailable {
        fund: String,
        date: NaiveDate,
        field: RecordField,
    },

    #[error("{fund}: date {date} is not after {previous}")]
    OutOfOrder {
        fund: String,
        date: NaiveDate,
        previous: NaiveDate,
    },

    #[error("{fund}@{date}: more than one record for the same key")]
    DuplicateRecord { fund: String, date: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum WarningReason {
    /// A disclosure implies a different flow than the one recorded for the day.
    HoldingsDiscontinuity {
        implied_flow_btc: f64,
        recorded_flow_btc: f64,
    },
    /// Accumulated flows took holdings below zero.
    NegativeHoldings { holdings_btc: f64 },
}

/// Advisory finding surfaced for external review; never blocks emission.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{fund}@{date}: {reason:?}")]
pub struct ReconciliationWarning {
    pub fund: String,
    pub date: NaiveDate,
    pub reason: WarningReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EngineError::MissingSeed {
            fund: "IBIT".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "no seed configured for IBIT, holdings cannot be reconstructed"
        );

        let err = EngineError::ConflictUnresolved {
            fund: "GBTC".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            field: RecordField::Nav,
            sources: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().contains("disagree on nav"));
    }

    #[test]
    fn test_error_serializes_with_tag() {
        let err = EngineError::EstimationUnavailable {
            fund: "ARKB".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            field: RecordField::SharesOutstanding,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "estimation_unavailable");
        assert_eq!(json["field"], "shares_outstanding");
    }
}
