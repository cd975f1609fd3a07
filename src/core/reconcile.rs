//! Final assembly pass: derived fields, holdings discontinuities and the
//! one-record-per-key guarantee.

use crate::core::error::{EngineError, ReconciliationWarning, WarningReason};
use crate::core::holdings::HoldingsPoint;
use crate::core::model::{CanonicalDailyRecord, Field, Provenance, RecordIssue, RecordKey};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use tracing::warn;

/// Premium (positive) or discount (negative) of market price over NAV, in percent.
pub fn premium_discount(market_price: Option<f64>, nav: Option<f64>) -> Option<f64> {
    match (market_price, nav) {
        (Some(price), Some(nav)) if nav > 0.0 => Some((price - nav) / nav * 100.0),
        _ => None,
    }
}

/// Recomputes every field derived from other fields of the same record.
pub fn derive_fields(record: &mut CanonicalDailyRecord) {
    record.premium_discount = premium_discount(record.market_price.value, record.nav.value);
    let flow_usd = match (record.flow_btc.value, record.btc_price) {
        (Some(flow), Some(price)) => Some(flow * price),
        (Some(flow), None) if flow == 0.0 => Some(0.0),
        _ => None,
    };
    if flow_usd.is_some() {
        record.flow_usd = Field {
            value: flow_usd,
            provenance: record.flow_btc.provenance,
            confidence: record.flow_btc.confidence,
        };
    }
}

/// Applies a new BTC reference price to a record and refreshes what depends on it.
pub fn reprice(record: &mut CanonicalDailyRecord, btc_price: f64) {
    record.btc_price = Some(btc_price);
    derive_fields(record);
}

/// Flags disclosures whose implied flow disagrees with the recorded flow, and
/// holdings that went negative.
pub fn detect_discontinuities(
    fund: &str,
    points: &[HoldingsPoint],
    tolerance_btc: f64,
) -> Vec<ReconciliationWarning> {
    let mut warnings = Vec::new();
    for point in points {
        if let (Some(implied), Some(recorded)) = (point.implied_flow(), point.flow_btc.value)
            && point.flow_btc.provenance != Provenance::Estimated
            && (implied - recorded).abs() > tolerance_btc
        {
            warn!(%fund, date = %point.date, implied, recorded, "Holdings discontinuity");
            warnings.push(ReconciliationWarning {
                fund: fund.to_string(),
                date: point.date,
                reason: WarningReason::HoldingsDiscontinuity {
                    implied_flow_btc: implied,
                    recorded_flow_btc: recorded,
                },
            });
        }
        if let Some(holdings) = point.holdings.value
            && holdings < 0.0
        {
            warn!(%fund, date = %point.date, holdings, "Negative holdings");
            warnings.push(ReconciliationWarning {
                fund: fund.to_string(),
                date: point.date,
                reason: WarningReason::NegativeHoldings {
                    holdings_btc: holdings,
                },
            });
        }
    }
    warnings
}

/// Attaches each warning to the record of its (fund, date), if present.
pub fn attach_warnings(records: &mut [CanonicalDailyRecord], warnings: &[ReconciliationWarning]) {
    for warning in warnings {
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.fund == warning.fund && r.date == warning.date)
        {
            record.issues.push(RecordIssue::Warning(warning.clone()));
        }
    }
}

/// Builds the output set, failing on the first duplicate key.
pub fn assemble(
    records: impl IntoIterator<Item = CanonicalDailyRecord>,
) -> Result<BTreeMap<RecordKey, CanonicalDailyRecord>, EngineError> {
    let mut set = BTreeMap::new();
    for record in records {
        match set.entry(record.key()) {
            Entry::Occupied(e) => {
                let key: &RecordKey = e.key();
                return Err(EngineError::DuplicateRecord {
                    fund: key.fund.clone(),
                    date: key.date,
                });
            }
            Entry::Vacant(e) => {
                e.insert(record);
            }
        }
    }
    Ok(set)
}
