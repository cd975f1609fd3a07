use super::ui;
use crate::store::RecordStore;
use anyhow::{Result, ensure};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Sets the BTC reference price for one date and recomputes dependent USD flows.
pub async fn run(store: &RecordStore, date: NaiveDate, price_usd: f64) -> Result<()> {
    ensure!(price_usd > 0.0, "BTC price must be positive, got {price_usd}");
    let previous = store.btc_price(date).await?;
    let repriced = store
        .upsert_btc_prices(&BTreeMap::from([(date, price_usd)]))
        .await?;
    store.persist()?;

    let previous = previous.map_or("none".to_string(), |p| format!("{p:.2}"));
    println!(
        "BTC price for {}: {} -> {}",
        ui::style_text(&date.to_string(), ui::StyleType::TotalLabel),
        ui::style_text(&previous, ui::StyleType::Subtle),
        ui::style_text(&format!("{price_usd:.2}"), ui::StyleType::TotalValue)
    );
    println!("Recomputed USD flows for {repriced} records");
    Ok(())
}
