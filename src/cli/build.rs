use super::ui;
use crate::core::config::AppConfig;
use crate::core::engine::{Engine, EngineInput, EngineOutput, FundReport, RunWindow};
use crate::core::export::build_export;
use crate::core::source::{BtcPriceSource, ObservationSource, collect_observations};
use crate::providers::{DailyNavProvider, JsonBtcPriceProvider, JsonObservationProvider};
use crate::store::RecordStore;
use anyhow::{Context, Result};
use comfy_table::{Cell, Color};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info};

/// Loads every configured input into an engine input.
pub async fn load_input(config: &AppConfig) -> Result<EngineInput> {
    let dir = config
        .inputs
        .observations_dir
        .as_deref()
        .map(|d| config.resolve_path(d))
        .context("inputs.observations_dir is not configured")?;
    let tickers = config.funds.iter().map(|f| f.ticker.clone()).collect();
    let sources: Vec<Box<dyn ObservationSource>> = vec![
        Box::new(JsonObservationProvider::new(&dir)),
        Box::new(DailyNavProvider::new(&dir, tickers)),
    ];
    for source in &sources {
        debug!("Reading observations from {} source", source.name());
    }
    let observations = collect_observations(&sources).await?;

    let btc_prices = match config.inputs.btc_prices.as_deref() {
        Some(path) => {
            JsonBtcPriceProvider::new(config.resolve_path(path))
                .btc_prices()
                .await?
        }
        None => BTreeMap::new(),
    };

    Ok(EngineInput {
        observations,
        btc_prices,
    })
}

/// Runs the engine over a loaded input.
pub fn run_engine(config: &AppConfig, input: &EngineInput, window: RunWindow) -> Result<EngineOutput> {
    info!(
        observations = input.observations.len(),
        prices = input.btc_prices.len(),
        "Inputs loaded"
    );
    let engine = Engine::from_config(config);
    Ok(engine.run(input, window)?)
}

/// Writes the export document for `output` to `path`.
pub async fn write_export(config: &AppConfig, output: &EngineOutput, path: &Path) -> Result<()> {
    let seeds = config
        .funds
        .iter()
        .filter_map(|f| f.seed.map(|s| (f.ticker.clone(), s)))
        .collect();
    let document = build_export(output.records.values(), seeds);
    let json = serde_json::to_string_pretty(&document)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write export to {}", path.display()))?;
    info!("Exported {} records to {}", document.metadata.total_records, path.display());
    Ok(())
}

pub fn display_reports(reports: &[FundReport]) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Fund"),
        ui::header_cell("From"),
        ui::header_cell("To"),
        ui::header_cell("Records"),
        ui::header_cell("Observed"),
        ui::header_cell("Carried"),
        ui::header_cell("Estimated"),
        ui::header_cell("Missing"),
        ui::header_cell("Errors"),
        ui::header_cell("Warnings"),
    ]);

    for report in reports {
        table.add_row(vec![
            Cell::new(&report.fund),
            ui::format_optional_cell(report.first_date, |d| d.to_string()),
            ui::format_optional_cell(report.last_date, |d| d.to_string()),
            Cell::new(report.records),
            Cell::new(report.observed_fields),
            Cell::new(report.carried_fields),
            ui::count_cell(report.estimated_fields, Color::Yellow),
            Cell::new(report.unavailable_fields),
            ui::count_cell(report.errors.len(), Color::Red),
            ui::count_cell(report.warnings.len(), Color::Yellow),
        ]);
    }

    let mut output = format!("{}\n\n", ui::style_text("Fund summary", ui::StyleType::Title));
    output.push_str(&table.to_string());

    let problems: Vec<String> = reports
        .iter()
        .flat_map(|r| {
            r.errors
                .iter()
                .map(|e| ui::style_text(&e.to_string(), ui::StyleType::Error))
                .chain(
                    r.warnings
                        .iter()
                        .map(|w| ui::style_text(&w.to_string(), ui::StyleType::Warning)),
                )
        })
        .collect();
    if !problems.is_empty() {
        output.push_str("\n\n");
        output.push_str(&problems.join("\n"));
    }
    output
}

pub async fn run(
    config: &AppConfig,
    store: &RecordStore,
    window: RunWindow,
    export: Option<&Path>,
) -> Result<()> {
    let input = load_input(config).await?;
    let output = run_engine(config, &input, window)?;

    let pb = ui::new_progress_bar(output.records.len() as u64, true);
    pb.set_message("Storing records...");
    for record in output.records.values() {
        store.upsert_record(record).await?;
        pb.inc(1);
    }
    pb.finish_and_clear();
    for report in &output.funds {
        let keep: BTreeSet<_> = output.fund_records(&report.fund).map(|r| r.date).collect();
        store
            .remove_stale(&report.fund, window.from, window.to, &keep)
            .await?;
    }
    store.upsert_btc_prices(&input.btc_prices).await?;
    store.persist()?;

    println!("{}", display_reports(&output.funds));

    if let Some(path) = export {
        write_export(config, &output, path).await?;
        ui::print_separator();
        println!(
            "Exported to {}",
            ui::style_text(&path.display().to_string(), ui::StyleType::TotalValue)
        );
    }
    Ok(())
}
