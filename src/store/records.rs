//! Persistence of canonical records, flows and BTC reference prices.

use crate::core::model::{CanonicalDailyRecord, Field};
use crate::core::reconcile::reprice;
use crate::store::{KeyValueCollection, KeyValueStore};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

const DAILY: &str = "daily_records";
const FLOWS: &str = "flows";
const PRICES: &str = "btc_prices";

/// Flow view of a record, kept in its own partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRow {
    pub fund: String,
    pub date: NaiveDate,
    pub flow_btc: Field,
    pub flow_usd: Field,
    pub btc_price: Option<f64>,
}

impl From<&CanonicalDailyRecord> for FlowRow {
    fn from(record: &CanonicalDailyRecord) -> Self {
        Self {
            fund: record.fund.clone(),
            date: record.date,
            flow_btc: record.flow_btc,
            flow_usd: record.flow_usd,
            btc_price: record.btc_price,
        }
    }
}

fn record_key(fund: &str, date: NaiveDate) -> Vec<u8> {
    format!("{fund}|{date}").into_bytes()
}

fn fund_prefix(fund: &str) -> Vec<u8> {
    format!("{fund}|").into_bytes()
}

pub struct RecordStore {
    store: KeyValueStore,
}

impl RecordStore {
    pub fn new(store: KeyValueStore) -> Self {
        Self { store }
    }

    async fn daily(&self) -> Result<Arc<dyn KeyValueCollection>> {
        self.store.collection(DAILY).await
    }

    async fn flows(&self) -> Result<Arc<dyn KeyValueCollection>> {
        self.store.collection(FLOWS).await
    }

    async fn prices(&self) -> Result<Arc<dyn KeyValueCollection>> {
        self.store.collection(PRICES).await
    }

    /// Replaces the stored record and flow row for the record's (fund, date).
    pub async fn upsert_record(&self, record: &CanonicalDailyRecord) -> Result<()> {
        let key = record_key(&record.fund, record.date);
        self.daily()
            .await?
            .put(&key, &serde_json::to_vec(record)?)
            .await
            .with_context(|| format!("Failed to store record {}", record.key()))?;
        self.flows()
            .await?
            .put(&key, &serde_json::to_vec(&FlowRow::from(record))?)
            .await
            .with_context(|| format!("Failed to store flows {}", record.key()))?;
        Ok(())
    }

    pub async fn upsert_records<'a>(
        &self,
        records: impl IntoIterator<Item = &'a CanonicalDailyRecord>,
    ) -> Result<usize> {
        let mut count = 0;
        for record in records {
            self.upsert_record(record).await?;
            count += 1;
        }
        debug!(count, "Records upserted");
        Ok(count)
    }

    /// Stores reference prices and recomputes the USD flows of every stored
    /// record on those dates. Returns the number of records repriced.
    pub async fn upsert_btc_prices(&self, prices: &BTreeMap<NaiveDate, f64>) -> Result<usize> {
        let collection = self.prices().await?;
        for (date, price) in prices {
            collection
                .put(date.to_string().as_bytes(), &serde_json::to_vec(price)?)
                .await?;
        }

        let mut repriced = 0;
        for (_, value) in self.daily().await?.scan_prefix(b"").await? {
            let mut record: CanonicalDailyRecord = serde_json::from_slice(&value)?;
            let Some(price) = prices.get(&record.date) else {
                continue;
            };
            if record.btc_price == Some(*price) {
                continue;
            }
            reprice(&mut record, *price);
            self.upsert_record(&record).await?;
            repriced += 1;
        }
        info!(prices = prices.len(), repriced, "BTC prices upserted");
        Ok(repriced)
    }

    pub async fn btc_price(&self, date: NaiveDate) -> Result<Option<f64>> {
        let value = self.prices().await?.get(date.to_string().as_bytes()).await?;
        value
            .map(|v| serde_json::from_slice(&v).context("Corrupt BTC price entry"))
            .transpose()
    }

    /// Stored records of one fund within the inclusive bounds, oldest first.
    pub async fn records_for_fund(
        &self,
        fund: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<CanonicalDailyRecord>> {
        let entries = self.daily().await?.scan_prefix(&fund_prefix(fund)).await?;
        let mut records = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            let record: CanonicalDailyRecord = serde_json::from_slice(&value)
                .with_context(|| format!("Corrupt stored record for {fund}"))?;
            if from.is_none_or(|f| record.date >= f) && to.is_none_or(|t| record.date <= t) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Deletes stored records and flows of `fund` within the inclusive bounds whose
    /// date is not in `keep`. Returns the number removed.
    pub async fn remove_stale(
        &self,
        fund: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        keep: &BTreeSet<NaiveDate>,
    ) -> Result<usize> {
        let daily = self.daily().await?;
        let flows = self.flows().await?;
        let mut removed = 0;
        for record in self.records_for_fund(fund, from, to).await? {
            if keep.contains(&record.date) {
                continue;
            }
            let key = record_key(fund, record.date);
            daily.remove(&key).await?;
            flows.remove(&key).await?;
            removed += 1;
        }
        if removed > 0 {
            info!(%fund, removed, "Stale records removed");
        }
        Ok(removed)
    }

    pub async fn flow(&self, fund: &str, date: NaiveDate) -> Result<Option<FlowRow>> {
        let value = self.flows().await?.get(&record_key(fund, date)).await?;
        value
            .map(|v| serde_json::from_slice(&v).context("Corrupt flow entry"))
            .transpose()
    }

    pub fn persist(&self) -> Result<()> {
        self.store.persist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Provenance;
    use tempfile::tempdir;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn record(fund: &str, day: u32, flow_btc: f64) -> CanonicalDailyRecord {
        let mut record = CanonicalDailyRecord::empty(fund, d(day));
        record.flow_btc = Field::observed(flow_btc);
        record.nav = Field::observed(25.0);
        reprice(&mut record, 40_000.0);
        record
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_key() {
        let store = RecordStore::new(KeyValueStore::in_memory());
        store.upsert_record(&record("IBIT", 11, 1.0)).await.unwrap();
        store.upsert_record(&record("IBIT", 11, 2.0)).await.unwrap();
        store.upsert_record(&record("IBIT", 12, 3.0)).await.unwrap();
        store.upsert_record(&record("FBTC", 11, 9.0)).await.unwrap();

        let records = store.records_for_fund("IBIT", None, None).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].flow_btc.value, Some(2.0));

        let window = store
            .records_for_fund("IBIT", Some(d(12)), Some(d(12)))
            .await
            .unwrap();
        assert_eq!(window.len(), 1);

        let flow = store.flow("FBTC", d(11)).await.unwrap().unwrap();
        assert_eq!(flow.flow_usd.value, Some(360_000.0));
    }

    #[tokio::test]
    async fn test_price_update_recomputes_flow_usd() {
        let store = RecordStore::new(KeyValueStore::in_memory());
        store
            .upsert_records(&[record("IBIT", 11, 2.0), record("IBIT", 12, 1.0)])
            .await
            .unwrap();

        let repriced = store
            .upsert_btc_prices(&BTreeMap::from([(d(11), 50_000.0)]))
            .await
            .unwrap();
        assert_eq!(repriced, 1);
        assert_eq!(store.btc_price(d(11)).await.unwrap(), Some(50_000.0));
        assert_eq!(store.btc_price(d(12)).await.unwrap(), None);

        let records = store.records_for_fund("IBIT", None, None).await.unwrap();
        assert_eq!(records[0].flow_usd.value, Some(100_000.0));
        assert_eq!(records[0].flow_usd.provenance, Provenance::Observed);
        assert_eq!(records[1].flow_usd.value, Some(40_000.0));

        let flow = store.flow("IBIT", d(11)).await.unwrap().unwrap();
        assert_eq!(flow.btc_price, Some(50_000.0));
        assert_eq!(flow.flow_usd.value, Some(100_000.0));
    }

    #[tokio::test]
    async fn test_remove_stale_keeps_emitted_dates_and_other_funds() {
        let store = RecordStore::new(KeyValueStore::in_memory());
        store
            .upsert_records(&[
                record("IBIT", 10, 1.0),
                record("IBIT", 11, 2.0),
                record("IBIT", 12, 3.0),
                record("FBTC", 10, 4.0),
            ])
            .await
            .unwrap();

        let keep = BTreeSet::from([d(11), d(12)]);
        let removed = store.remove_stale("IBIT", None, None, &keep).await.unwrap();
        assert_eq!(removed, 1);

        let dates: Vec<_> = store
            .records_for_fund("IBIT", None, None)
            .await
            .unwrap()
            .iter()
            .map(|r| r.date)
            .collect();
        assert_eq!(dates, vec![d(11), d(12)]);
        assert!(store.flow("IBIT", d(10)).await.unwrap().is_none());
        assert!(store.flow("FBTC", d(10)).await.unwrap().is_some());

        // Bounds limit what is pruned
        let removed = store
            .remove_stale("IBIT", Some(d(12)), None, &BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.records_for_fund("IBIT", None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disk_backed_records_persist() {
        let dir = tempdir().unwrap();
        {
            let store = RecordStore::new(KeyValueStore::open(dir.path()).unwrap());
            store.upsert_record(&record("GBTC", 11, -5.0)).await.unwrap();
            store.persist().unwrap();
        }
        let store = RecordStore::new(KeyValueStore::open(dir.path()).unwrap());
        let records = store.records_for_fund("GBTC", None, None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].flow_btc.value, Some(-5.0));
    }
}
