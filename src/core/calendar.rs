//! Trading-day classification per market.

use crate::core::config::MarketConfig;
use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Display;

/// How far back `last_trading_day_before` looks before giving up.
const MAX_LOOKBACK_DAYS: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayKind {
    Trading,
    NonTrading,
}

impl Display for DayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DayKind::Trading => write!(f, "trading"),
            DayKind::NonTrading => write!(f, "non-trading"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MarketDays {
    holidays: BTreeSet<NaiveDate>,
    years: Option<(i32, i32)>,
}

impl MarketDays {
    fn covers(&self, date: NaiveDate) -> bool {
        self.years
            .is_some_and(|(first, last)| (first..=last).contains(&date.year()))
    }
}

/// Read-only calendar lookup keyed by market identifier.
#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    markets: HashMap<String, MarketDays>,
}

impl TradingCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config<'a>(markets: impl IntoIterator<Item = (&'a String, &'a MarketConfig)>) -> Self {
        let mut calendar = Self::new();
        for (name, market) in markets {
            calendar.add_market(name, market);
        }
        calendar
    }

    pub fn add_market(&mut self, name: &str, market: &MarketConfig) {
        let holidays: BTreeSet<NaiveDate> = market.holidays.iter().copied().collect();
        let span = holidays
            .first()
            .zip(holidays.last())
            .map(|(first, last)| (first.year(), last.year()));
        let years = match (market.first_year, market.last_year, span) {
            (Some(first), Some(last), _) => Some((first, last)),
            (Some(first), None, Some((_, last))) => Some((first, last.max(first))),
            (None, Some(last), Some((first, _))) => Some((first.min(last), last)),
            (Some(year), None, None) | (None, Some(year), None) => Some((year, year)),
            (None, None, span) => span,
        };
        self.markets
            .insert(name.to_string(), MarketDays { holidays, years });
    }

    /// Weekends are non-trading for every known market. Holidays count only within
    /// the years a market's holiday list covers. Unknown markets are always trading.
    pub fn classify(&self, market: Option<&str>, date: NaiveDate) -> DayKind {
        let Some(days) = market.and_then(|m| self.markets.get(m)) else {
            return DayKind::Trading;
        };
        if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            return DayKind::NonTrading;
        }
        if days.covers(date) && days.holidays.contains(&date) {
            DayKind::NonTrading
        } else {
            DayKind::Trading
        }
    }

    /// Whether `market`'s holiday list is authoritative for the year of `date`.
    pub fn covers_holidays(&self, market: &str, date: NaiveDate) -> bool {
        self.markets.get(market).is_some_and(|days| days.covers(date))
    }

    pub fn is_trading_day(&self, market: Option<&str>, date: NaiveDate) -> bool {
        self.classify(market, date) == DayKind::Trading
    }

    pub fn knows_market(&self, market: &str) -> bool {
        self.markets.contains_key(market)
    }

    /// The closest trading day strictly before `date`, if one exists within the lookback window.
    /// Carry-forward copies the previous record, so the engine only logs this date.
    pub fn last_trading_day_before(&self, market: Option<&str>, date: NaiveDate) -> Option<NaiveDate> {
        (1..=MAX_LOOKBACK_DAYS)
            .filter_map(|n| date.checked_sub_days(Days::new(n)))
            .find(|d| self.is_trading_day(market, *d))
    }
}
