//! Issuer daily NAV exports named `<ticker>_dailynav.csv`.
//!
//! Columns are positional: date, NAV, market close and, optionally, shares
//! outstanding. Header names vary between issuers and are ignored.

use crate::core::model::RawObservation;
use crate::core::source::ObservationSource;
use crate::providers::util::{list_files, modified_at, parse_date, parse_number};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const SUFFIX: &str = "_dailynav.csv";
pub const SOURCE: &str = "issuer";

pub struct DailyNavProvider {
    dir: PathBuf,
    tickers: Vec<String>,
}

impl DailyNavProvider {
    /// Only files whose prefix matches one of `tickers` (case-insensitively) are read.
    pub fn new(dir: impl Into<PathBuf>, tickers: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            tickers,
        }
    }

    fn ticker_for(&self, file_name: &str) -> Option<&str> {
        let slug = file_name.to_lowercase();
        let slug = slug.strip_suffix(SUFFIX)?;
        self.tickers
            .iter()
            .find(|t| t.eq_ignore_ascii_case(slug))
            .map(String::as_str)
    }
}

/// Parses one export. Rows without a date or a positive NAV are dropped, and the
/// last row for a date wins.
pub fn parse_dailynav(
    fund: &str,
    content: &str,
    collected_at: DateTime<Utc>,
) -> Result<Vec<RawObservation>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut rows: BTreeMap<NaiveDate, RawObservation> = BTreeMap::new();
    let mut skipped = 0usize;
    for row in reader.records() {
        let row = row.with_context(|| format!("Malformed daily NAV row for {fund}"))?;
        let cell = |i: usize| row.get(i).and_then(parse_number);
        let Some(date) = row.get(0).and_then(parse_date) else {
            skipped += 1;
            continue;
        };
        let Some(nav) = cell(1).filter(|n| *n > 0.0) else {
            skipped += 1;
            continue;
        };
        rows.insert(
            date,
            RawObservation {
                fund: fund.to_string(),
                date,
                nav: Some(nav),
                market_price: cell(2).filter(|p| *p > 0.0),
                shares_outstanding: cell(3).filter(|s| *s > 0.0),
                holdings_btc: None,
                flow_btc: None,
                flow_usd: None,
                source: SOURCE.to_string(),
                collected_at,
            },
        );
    }
    if skipped > 0 {
        debug!(%fund, skipped, "Skipped daily NAV rows without a date or NAV");
    }
    Ok(rows.into_values().collect())
}

#[async_trait]
impl ObservationSource for DailyNavProvider {
    fn name(&self) -> &str {
        "dailynav"
    }

    async fn observations(&self) -> Result<Vec<RawObservation>> {
        let mut all = Vec::new();
        let files = list_files(&self.dir, |name| name.to_lowercase().ends_with(SUFFIX)).await?;
        for path in files {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let Some(fund) = self.ticker_for(file_name) else {
                warn!("No configured fund for {}", path.display());
                continue;
            };
            let raw = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let content = String::from_utf8_lossy(&raw);
            let collected_at = modified_at(&path).await?;
            let rows = parse_dailynav(fund, &content, collected_at)?;
            if rows.is_empty() {
                warn!("{} has no usable rows", path.display());
            }
            debug!("{}: {} rows", fund, rows.len());
            all.extend(rows);
        }
        info!(count = all.len(), "Daily NAV observations loaded");
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn collected() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_mixed_rows() {
        let csv = "\
Date,NAV,Close,Shares Outstanding
20240111,\"25.10\",\"25.20\",\"1,000,000\"
2024-01-12,25.30,25.25,
20240113,,,
garbage,1,1,1
20240112,25.35,25.30,1100000
";
        let rows = parse_dailynav("IBIT", csv, collected()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].shares_outstanding, Some(1_000_000.0));
        assert_eq!(rows[0].source, SOURCE);
        // Later duplicate of the same date replaces the earlier row
        assert_eq!(rows[1].nav, Some(25.35));
        assert_eq!(rows[1].shares_outstanding, Some(1_100_000.0));
    }

    #[test]
    fn test_three_column_export() {
        let csv = "date,nav,close\n20240111,25.1,25.2\n";
        let rows = parse_dailynav("FBTC", csv, collected()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].shares_outstanding, None);
        assert_eq!(rows[0].market_price, Some(25.2));
    }

    #[tokio::test]
    async fn test_provider_matches_configured_tickers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ibit_dailynav.csv"),
            "date,nav,close\n20240111,25.1,25.2\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("zzzz_dailynav.csv"),
            "date,nav,close\n20240111,9.0,9.0\n",
        )
        .unwrap();

        let provider = DailyNavProvider::new(dir.path(), vec!["IBIT".to_string()]);
        let rows = provider.observations().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fund, "IBIT");
    }
}
