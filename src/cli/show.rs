use super::ui;
use crate::core::model::CanonicalDailyRecord;
use crate::store::RecordStore;
use anyhow::Result;
use chrono::NaiveDate;
use comfy_table::{Cell, Color};

pub fn display_records(fund: &str, records: &[CanonicalDailyRecord]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("NAV"),
        ui::header_cell("Price"),
        ui::header_cell("Prem/Disc"),
        ui::header_cell("Shares"),
        ui::header_cell("Holdings (BTC)"),
        ui::header_cell("Flow (BTC)"),
        ui::header_cell("Flow (USD)"),
        ui::header_cell("Issues"),
    ]);

    for record in records {
        table.add_row(vec![
            Cell::new(record.date),
            ui::field_cell(&record.nav, |v| format!("{v:.4}")),
            ui::field_cell(&record.market_price, |v| format!("{v:.2}")),
            ui::premium_cell(record.premium_discount),
            ui::field_cell(&record.shares_outstanding, |v| format!("{v:.0}")),
            ui::field_cell(&record.holdings_btc, |v| format!("{v:.2}")),
            ui::field_cell(&record.flow_btc, |v| format!("{v:.2}")),
            ui::field_cell(&record.flow_usd, |v| format!("{v:.0}")),
            ui::count_cell(record.issues.len(), Color::Red),
        ]);
    }

    let mut output = format!("Fund: {}\n\n", ui::style_text(fund, ui::StyleType::Title));
    output.push_str(&table.to_string());
    output.push_str(&format!(
        "\n\n{}",
        ui::style_text(
            "grey: carried forward, yellow: estimated (~confidence), red N/A: disputed",
            ui::StyleType::Subtle
        )
    ));
    output
}

pub async fn run(
    store: &RecordStore,
    fund: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<()> {
    let records = store.records_for_fund(fund, from, to).await?;
    if records.is_empty() {
        println!(
            "{}",
            ui::style_text(&format!("No stored records for {fund}"), ui::StyleType::Error)
        );
        return Ok(());
    }
    println!("{}", display_records(fund, &records));
    Ok(())
}
