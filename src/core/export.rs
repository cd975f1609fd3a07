//! Structured JSON export of a record set, newest date first.

use crate::core::model::{CanonicalDailyRecord, Field, FundSeed};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalculationNotes {
    pub holdings_unit: &'static str,
    pub nav_unit: &'static str,
    pub shares_calculation: &'static str,
    pub non_trading_days: &'static str,
    pub initial_holdings_seeds_btc: BTreeMap<String, FundSeed>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportMetadata {
    pub total_records: usize,
    pub date_range: Option<DateRange>,
    pub funds: Vec<String>,
    pub calculation_notes: CalculationNotes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportFund {
    pub nav: Field,
    pub market_price: Field,
    pub premium_discount: Option<f64>,
    pub shares_outstanding: Field,
    pub holdings_btc: Field,
    pub flow_btc: Field,
    pub flow_usd: Field,
    pub issues: usize,
}

impl From<&CanonicalDailyRecord> for ExportFund {
    fn from(record: &CanonicalDailyRecord) -> Self {
        Self {
            nav: record.nav,
            market_price: record.market_price,
            premium_discount: record.premium_discount,
            shares_outstanding: record.shares_outstanding,
            holdings_btc: record.holdings_btc,
            flow_btc: record.flow_btc,
            flow_usd: record.flow_usd,
            issues: record.issues.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportDay {
    pub date: NaiveDate,
    pub bitcoin_price: Option<f64>,
    pub total_flows_btc: Option<f64>,
    pub total_flows_usd: Option<f64>,
    pub etfs: BTreeMap<String, ExportFund>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportDocument {
    pub metadata: ExportMetadata,
    pub daily_data: Vec<ExportDay>,
}

fn sum_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// Builds the export document. Contains no wall-clock data, so equal inputs give
/// identical documents.
pub fn build_export<'a>(
    records: impl IntoIterator<Item = &'a CanonicalDailyRecord>,
    seeds: BTreeMap<String, FundSeed>,
) -> ExportDocument {
    let mut by_date: BTreeMap<NaiveDate, Vec<&CanonicalDailyRecord>> = BTreeMap::new();
    let mut funds = Vec::new();
    let mut total_records = 0;
    for record in records {
        by_date.entry(record.date).or_default().push(record);
        if !funds.contains(&record.fund) {
            funds.push(record.fund.clone());
        }
        total_records += 1;
    }
    funds.sort();

    let date_range = by_date
        .keys()
        .next()
        .zip(by_date.keys().next_back())
        .map(|(start, end)| DateRange {
            start_date: *start,
            end_date: *end,
        });

    let daily_data = by_date
        .iter()
        .rev()
        .map(|(date, records)| ExportDay {
            date: *date,
            bitcoin_price: records.iter().find_map(|r| r.btc_price),
            total_flows_btc: sum_present(records.iter().map(|r| r.flow_btc.value)),
            total_flows_usd: sum_present(records.iter().map(|r| r.flow_usd.value)),
            etfs: records
                .iter()
                .map(|r| (r.fund.clone(), ExportFund::from(*r)))
                .collect(),
        })
        .collect();

    ExportDocument {
        metadata: ExportMetadata {
            total_records,
            date_range,
            funds,
            calculation_notes: CalculationNotes {
                holdings_unit: "BTC",
                nav_unit: "fund nav_currency, USD unless configured",
                shares_calculation: "shares = holdings_btc * btc_price_usd / nav_usd",
                non_trading_days: "carried forward from the last trading day of the fund's market",
                initial_holdings_seeds_btc: seeds,
            },
        },
        daily_data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn record(fund: &str, day: u32, flow_btc: Option<f64>) -> CanonicalDailyRecord {
        let mut record = CanonicalDailyRecord::empty(fund, d(day));
        if let Some(flow) = flow_btc {
            record.flow_btc = Field::observed(flow);
        }
        record.btc_price = Some(45_000.0);
        record
    }

    #[test]
    fn test_export_groups_by_date_newest_first() {
        let records = [
            record("IBIT", 11, Some(10.0)),
            record("FBTC", 11, Some(5.0)),
            record("IBIT", 12, None),
        ];
        let doc = build_export(&records, BTreeMap::new());

        assert_eq!(doc.metadata.total_records, 3);
        assert_eq!(doc.metadata.funds, vec!["FBTC", "IBIT"]);
        assert_eq!(
            doc.metadata.date_range,
            Some(DateRange {
                start_date: d(11),
                end_date: d(12)
            })
        );
        assert_eq!(doc.daily_data[0].date, d(12));
        assert_eq!(doc.daily_data[0].total_flows_btc, None);
        assert_eq!(doc.daily_data[1].total_flows_btc, Some(15.0));
        assert_eq!(doc.daily_data[1].etfs.len(), 2);
    }

    #[test]
    fn test_export_is_deterministic() {
        let records = [record("IBIT", 11, Some(1.0)), record("GBTC", 11, Some(-2.0))];
        let seeds = BTreeMap::from([(
            "GBTC".to_string(),
            FundSeed {
                date: d(11),
                holdings_btc: 621_499.0,
            },
        )]);
        let a = serde_json::to_string(&build_export(&records, seeds.clone())).unwrap();
        let b = serde_json::to_string(&build_export(&records, seeds)).unwrap();
        assert_eq!(a, b);
        assert!(a.contains("621499"));
    }
}
