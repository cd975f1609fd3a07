//! Per-fund pipeline: merge, calendar expansion, holdings, estimation and
//! reconciliation, producing one canonical record per (fund, date).

use crate::core::calendar::{DayKind, TradingCalendar};
use crate::core::config::{AppConfig, EstimationConfig, FundConfig, ReconciliationConfig};
use crate::core::error::{EngineError, ReconciliationWarning};
use crate::core::estimator::{Anchor, EstimationContext, PeerQuote, estimate};
use crate::core::holdings::{FlowInput, HoldingsDay, HoldingsPoint, flow_field, reconstruct};
use crate::core::merge::{ResolvedDay, SourcePriority, resolve_day};
use crate::core::model::{
    CanonicalDailyRecord, Field, Provenance, RawObservation, RecordField, RecordIssue, RecordKey,
};
use crate::core::reconcile::{assemble, attach_warnings, derive_fields, detect_discontinuities};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

type FundDays = BTreeMap<NaiveDate, ResolvedDay>;

/// Inclusive bounds on the dates that are emitted. Computation always starts at
/// the seed regardless of `from`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunWindow {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl RunWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineInput {
    pub observations: Vec<RawObservation>,
    pub btc_prices: BTreeMap<NaiveDate, f64>,
}

/// Outcome for one fund. Fund-scoped errors never affect other funds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundReport {
    pub fund: String,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub records: usize,
    pub observed_fields: usize,
    pub carried_fields: usize,
    pub estimated_fields: usize,
    pub unavailable_fields: usize,
    /// Observations dated before the seed, which the run never reaches.
    pub pre_seed_observations: usize,
    pub errors: Vec<EngineError>,
    pub warnings: Vec<ReconciliationWarning>,
}

impl FundReport {
    fn new(fund: &str) -> Self {
        Self {
            fund: fund.to_string(),
            first_date: None,
            last_date: None,
            records: 0,
            observed_fields: 0,
            carried_fields: 0,
            estimated_fields: 0,
            unavailable_fields: 0,
            pre_seed_observations: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn tally(&mut self, records: &[CanonicalDailyRecord]) {
        self.records = records.len();
        self.first_date = records.first().map(|r| r.date);
        self.last_date = records.last().map(|r| r.date);
        for field in records.iter().flat_map(|r| RecordField::ALL.map(|f| *r.field(f))) {
            match (field.value, field.provenance) {
                (None, _) => self.unavailable_fields += 1,
                (Some(_), Provenance::Observed) => self.observed_fields += 1,
                (Some(_), Provenance::CarriedForward) => self.carried_fields += 1,
                (Some(_), Provenance::Estimated) => self.estimated_fields += 1,
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineOutput {
    #[serde(serialize_with = "records_as_list")]
    pub records: BTreeMap<RecordKey, CanonicalDailyRecord>,
    pub funds: Vec<FundReport>,
}

impl EngineOutput {
    pub fn fund_records<'a>(&'a self, fund: &'a str) -> impl Iterator<Item = &'a CanonicalDailyRecord> {
        self.records.values().filter(move |r| r.fund == fund)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ReconciliationWarning> {
        self.funds.iter().flat_map(|f| f.warnings.iter())
    }

    pub fn report(&self, fund: &str) -> Option<&FundReport> {
        self.funds.iter().find(|f| f.fund == fund)
    }
}

fn records_as_list<S: serde::Serializer>(
    records: &BTreeMap<RecordKey, CanonicalDailyRecord>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(records.values())
}

/// Anchors and the previous record carried from one date to the next.
#[derive(Debug, Default)]
struct FundState {
    last_nav: Option<Anchor>,
    last_shares: Option<Anchor>,
    last_nav_price_ratio: Option<Anchor>,
    previous: Option<CanonicalDailyRecord>,
}

impl FundState {
    fn observe(&mut self, record: &CanonicalDailyRecord) {
        let date = record.date;
        if let (true, Some(nav)) = (record.nav.is_observed(), record.nav.value) {
            self.last_nav = Some(Anchor { value: nav, date });
            if let (true, Some(price)) = (record.market_price.is_observed(), record.market_price.value)
                && price > 0.0
            {
                self.last_nav_price_ratio = Some(Anchor {
                    value: nav / price,
                    date,
                });
            }
        }
        if let (true, Some(shares)) = (
            record.shares_outstanding.is_observed(),
            record.shares_outstanding.value,
        ) {
            self.last_shares = Some(Anchor { value: shares, date });
        }
    }

    fn carried(&self, field: RecordField) -> Field {
        match &self.previous {
            Some(previous) => {
                let prior = previous.field(field);
                Field::carried(prior.value, prior.confidence)
            }
            None => Field::carried(None, 0.0),
        }
    }
}

/// Holds the calendar, source priority and policies, and runs every configured fund.
#[derive(Debug, Clone)]
pub struct Engine {
    funds: Vec<FundConfig>,
    calendar: TradingCalendar,
    priority: SourcePriority,
    estimation: EstimationConfig,
    reconciliation: ReconciliationConfig,
}

impl Engine {
    pub fn new(
        funds: Vec<FundConfig>,
        calendar: TradingCalendar,
        priority: SourcePriority,
        estimation: EstimationConfig,
        reconciliation: ReconciliationConfig,
    ) -> Self {
        Self {
            funds,
            calendar,
            priority,
            estimation,
            reconciliation,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.funds.clone(),
            TradingCalendar::from_config(&config.markets),
            SourcePriority::new(&config.sources.priority),
            config.estimation.clone(),
            config.reconciliation.clone(),
        )
    }

    /// Runs every configured fund. The only failure is a duplicate key in the
    /// assembled set; fund-scoped problems land in the fund reports.
    pub fn run(&self, input: &EngineInput, window: RunWindow) -> Result<EngineOutput, EngineError> {
        let resolved = self.resolve(&input.observations);
        for fund in resolved.keys() {
            if !self
                .funds
                .iter()
                .any(|f| &f.ticker == fund || f.peer.as_ref() == Some(fund))
            {
                warn!(%fund, "Observations for unconfigured fund ignored");
            }
        }

        let results: Vec<(FundReport, Vec<CanonicalDailyRecord>)> = self
            .funds
            .par_iter()
            .map(|fund| self.run_fund(fund, &resolved, input, window))
            .collect();

        let mut funds = Vec::with_capacity(results.len());
        let mut all_records = Vec::new();
        for (report, records) in results {
            info!(
                fund = %report.fund,
                records = report.records,
                estimated = report.estimated_fields,
                errors = report.errors.len(),
                warnings = report.warnings.len(),
                "Fund processed"
            );
            funds.push(report);
            all_records.extend(records);
        }

        Ok(EngineOutput {
            records: assemble(all_records)?,
            funds,
        })
    }

    /// Groups observations by fund and date, then merges each group.
    fn resolve(&self, observations: &[RawObservation]) -> BTreeMap<String, FundDays> {
        let mut grouped: BTreeMap<&str, BTreeMap<NaiveDate, Vec<&RawObservation>>> = BTreeMap::new();
        for obs in observations {
            grouped
                .entry(obs.fund.as_str())
                .or_default()
                .entry(obs.date)
                .or_default()
                .push(obs);
        }

        grouped
            .into_par_iter()
            .map(|(fund, days)| {
                let resolved = days
                    .into_iter()
                    .map(|(date, obs)| (date, resolve_day(fund, date, &obs, &self.priority)))
                    .collect::<FundDays>();
                (fund.to_string(), resolved)
            })
            .collect()
    }

    fn run_fund(
        &self,
        fund: &FundConfig,
        resolved: &BTreeMap<String, FundDays>,
        input: &EngineInput,
        window: RunWindow,
    ) -> (FundReport, Vec<CanonicalDailyRecord>) {
        let btc_prices = &input.btc_prices;
        let ticker = fund.ticker.as_str();
        let market = fund.market.as_deref();
        let mut report = FundReport::new(ticker);
        let empty = FundDays::new();
        let days = resolved.get(ticker).unwrap_or(&empty);
        let peer_days = fund.peer.as_deref().and_then(|p| resolved.get(p));
        if let Some(market) = market
            && !self.calendar.knows_market(market)
        {
            warn!(fund = %ticker, %market, "Unknown market, every date treated as trading");
        }

        let start = match (&fund.seed, days.keys().next()) {
            (Some(seed), _) => Some(seed.date),
            (None, first) => first.copied(),
        };
        let end = window.to.or_else(|| days.keys().next_back().copied());
        let (Some(start), Some(end)) = (start, end) else {
            if fund.seed.is_none() {
                report.errors.push(EngineError::MissingSeed {
                    fund: ticker.to_string(),
                });
            }
            debug!(fund = %ticker, "No dates to process");
            return (report, Vec::new());
        };
        if let Some(seed) = &fund.seed {
            report.pre_seed_observations = input
                .observations
                .iter()
                .filter(|o| o.fund == ticker && o.date < seed.date)
                .count();
            if report.pre_seed_observations > 0 {
                warn!(
                    fund = %ticker,
                    seed_date = %seed.date,
                    dropped = report.pre_seed_observations,
                    "Observations before the seed date ignored"
                );
            }
        }
        if let Some(market) = market
            && self.calendar.knows_market(market)
            && !self.calendar.covers_holidays(market, end)
        {
            warn!(fund = %ticker, %market, %end, "Holiday list does not cover the run end, only weekends are closed");
        }
        let dates: Vec<NaiveDate> = start.iter_days().take_while(|d| *d <= end).collect();
        debug!(fund = %ticker, %start, %end, days = dates.len(), "Expanded calendar");

        let holdings_days: Vec<HoldingsDay> = dates
            .iter()
            .map(|date| self.holdings_day(days.get(date), *date, market, btc_prices))
            .collect();
        let points: Option<Vec<HoldingsPoint>> = match reconstruct(
            ticker,
            fund.seed.as_ref(),
            &holdings_days,
            self.estimation.gap_flow_confidence,
        ) {
            Ok(points) => Some(points),
            Err(e) => {
                warn!(fund = %ticker, error = %e, "Holdings not reconstructed");
                report.errors.push(e);
                None
            }
        };

        let mut state = FundState::default();
        let mut records = Vec::new();
        for (i, (date, hday)) in dates.iter().zip(&holdings_days).enumerate() {
            let day = days.get(date);
            let mut record = match day {
                Some(day) => day.to_record(),
                None => CanonicalDailyRecord::empty(ticker, *date),
            };
            record.btc_price = btc_prices.get(date).copied();

            match &points {
                Some(points) => {
                    record.holdings_btc = points[i].holdings;
                    record.flow_btc = points[i].flow_btc;
                }
                None => {
                    record.flow_btc =
                        flow_field(hday.flow, hday.kind, self.estimation.gap_flow_confidence);
                }
            }

            let peer = peer_days.and_then(|p| p.get(date)).and_then(|p| {
                Some(PeerQuote {
                    market_price: p.observed(RecordField::MarketPrice)?,
                    nav: p.observed(RecordField::Nav)?,
                })
            });
            self.fill_day(&mut record, hday.kind, fund, &state, peer);
            derive_fields(&mut record);

            state.observe(&record);
            state.previous = Some(record.clone());
            if window.contains(*date) {
                records.push(record);
            }
        }

        if let Some(points) = &points {
            let warnings: Vec<ReconciliationWarning> = detect_discontinuities(
                ticker,
                points,
                self.reconciliation.flow_tolerance_btc,
            )
            .into_iter()
            .filter(|w| window.contains(w.date))
            .collect();
            attach_warnings(&mut records, &warnings);
            report.warnings = warnings;
        }

        report.tally(&records);
        (report, records)
    }

    fn holdings_day(
        &self,
        day: Option<&ResolvedDay>,
        date: NaiveDate,
        market: Option<&str>,
        btc_prices: &BTreeMap<NaiveDate, f64>,
    ) -> HoldingsDay {
        let kind = self.calendar.classify(market, date);
        let Some(day) = day else {
            return HoldingsDay {
                date,
                kind,
                flow: FlowInput::Missing,
                disclosed: None,
            };
        };
        let usd_flow_in_btc = || {
            let usd = day.observed(RecordField::FlowUsd)?;
            let price = btc_prices.get(&date).filter(|p| **p > 0.0)?;
            Some(usd / price)
        };
        let flow = match day.observed(RecordField::FlowBtc).or_else(usd_flow_in_btc) {
            Some(flow) => FlowInput::Observed(flow),
            None if day.is_disputed(RecordField::FlowBtc) => FlowInput::Disputed,
            None => FlowInput::Missing,
        };
        HoldingsDay {
            date,
            kind,
            flow,
            disclosed: day.observed(RecordField::HoldingsBtc),
        }
    }

    /// Fills market price, NAV and shares: carried on non-trading days, estimated
    /// on trading days. Observed and disputed fields are left alone.
    fn fill_day(
        &self,
        record: &mut CanonicalDailyRecord,
        kind: DayKind,
        fund: &FundConfig,
        state: &FundState,
        peer: Option<PeerQuote>,
    ) {
        let untouched = |field: &Field| field.provenance == Provenance::Observed;

        if kind == DayKind::NonTrading {
            debug!(
                fund = %record.fund,
                date = %record.date,
                last_trading_day = ?self.calendar.last_trading_day_before(fund.market.as_deref(), record.date),
                "Carrying forward"
            );
            for field in [
                RecordField::MarketPrice,
                RecordField::Nav,
                RecordField::SharesOutstanding,
            ] {
                if !untouched(record.field(field)) {
                    *record.field_mut(field) = state.carried(field);
                }
            }
            return;
        }

        let mut ctx = EstimationContext::new(record.date);
        ctx.holdings = record.holdings_btc;
        ctx.btc_price = record.btc_price;
        ctx.market_price = record.market_price.value;
        ctx.nav = record.nav;
        ctx.shares = record.shares_outstanding;
        ctx.last_nav = state.last_nav;
        ctx.last_shares = state.last_shares;
        ctx.last_nav_price_ratio = state.last_nav_price_ratio;
        ctx.peer = peer;
        ctx.nav_in_btc_price_currency = fund.nav_in_btc_price_currency();

        for field in [RecordField::Nav, RecordField::SharesOutstanding] {
            if untouched(record.field(field)) {
                continue;
            }
            let result = estimate(field, &ctx, &self.estimation);
            match result.strategy {
                Some(strategy) => {
                    debug!(fund = %record.fund, date = %record.date, %field, %strategy, confidence = result.confidence, "Estimated");
                }
                None => {
                    record
                        .issues
                        .push(RecordIssue::Error(EngineError::EstimationUnavailable {
                            fund: record.fund.clone(),
                            date: record.date,
                            field,
                        }));
                }
            }
            let estimated = result.to_field();
            *record.field_mut(field) = estimated;
            if field == RecordField::Nav {
                ctx.nav = estimated;
            }
        }
    }
}
