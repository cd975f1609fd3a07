//! Cross-source merge of the raw observations for one (fund, date).

use crate::core::error::EngineError;
use crate::core::model::{CanonicalDailyRecord, Field, RawObservation, RecordField, RecordIssue};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Ordered list of source identifiers, highest priority first.
#[derive(Debug, Clone, Default)]
pub struct SourcePriority {
    ranks: HashMap<String, usize>,
}

impl SourcePriority {
    pub fn new<S: AsRef<str>>(order: &[S]) -> Self {
        let mut ranks = HashMap::new();
        for (rank, source) in order.iter().enumerate() {
            // First mention wins if a source is listed twice
            ranks.entry(source.as_ref().to_string()).or_insert(rank);
        }
        Self { ranks }
    }

    pub fn rank(&self, source: &str) -> Option<usize> {
        self.ranks.get(source).copied()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldResolution {
    Absent,
    Observed { value: f64, source: String },
    Conflict(EngineError),
}

/// Field-wise outcome of merging one (fund, date).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDay {
    pub fund: String,
    pub date: NaiveDate,
    fields: BTreeMap<RecordField, FieldResolution>,
}

impl ResolvedDay {
    pub fn empty(fund: &str, date: NaiveDate) -> Self {
        Self {
            fund: fund.to_string(),
            date,
            fields: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: RecordField) -> &FieldResolution {
        self.fields.get(&field).unwrap_or(&FieldResolution::Absent)
    }

    pub fn observed(&self, field: RecordField) -> Option<f64> {
        match self.get(field) {
            FieldResolution::Observed { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn is_disputed(&self, field: RecordField) -> bool {
        matches!(self.get(field), FieldResolution::Conflict(_))
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &EngineError> {
        self.fields.values().filter_map(|r| match r {
            FieldResolution::Conflict(e) => Some(e),
            _ => None,
        })
    }

    /// Builds a record holding only what was observed. Conflicted fields stay empty
    /// and carry their error as an issue.
    pub fn to_record(&self) -> CanonicalDailyRecord {
        let mut record = CanonicalDailyRecord::empty(&self.fund, self.date);
        for field in RecordField::ALL {
            match self.get(field) {
                FieldResolution::Absent => {}
                FieldResolution::Observed { value, .. } => {
                    *record.field_mut(field) = Field::observed(*value);
                }
                FieldResolution::Conflict(e) => {
                    *record.field_mut(field) = Field::disputed();
                    record.issues.push(RecordIssue::Error(e.clone()));
                }
            }
        }
        record
    }
}

/// Picks the value for one field: the latest collection wins, ties go to the
/// better-ranked source, and equal values never conflict.
pub fn resolve_field(
    fund: &str,
    date: NaiveDate,
    field: RecordField,
    observations: &[&RawObservation],
    priority: &SourcePriority,
) -> FieldResolution {
    let candidates: Vec<(&RawObservation, f64)> = observations
        .iter()
        .filter(|o| o.fund == fund && o.date == date)
        .filter_map(|o| o.value_of(field).map(|v| (*o, v)))
        .collect();

    let Some(latest) = candidates.iter().map(|(o, _)| o.collected_at).max() else {
        return FieldResolution::Absent;
    };
    let mut top: Vec<(&RawObservation, f64)> = candidates
        .into_iter()
        .filter(|(o, _)| o.collected_at == latest)
        .collect();
    top.sort_by(|(a, _), (b, _)| {
        let ra = priority.rank(&a.source).unwrap_or(usize::MAX);
        let rb = priority.rank(&b.source).unwrap_or(usize::MAX);
        ra.cmp(&rb).then_with(|| a.source.cmp(&b.source))
    });

    let (first, first_value) = top[0];
    if top.iter().all(|(_, v)| *v == first_value) {
        return FieldResolution::Observed {
            value: first_value,
            source: first.source.clone(),
        };
    }

    let conflict = || {
        let sources: BTreeSet<String> = top.iter().map(|(o, _)| o.source.clone()).collect();
        debug!(%fund, %date, %field, ?sources, "Unresolvable source conflict");
        FieldResolution::Conflict(EngineError::ConflictUnresolved {
            fund: fund.to_string(),
            date,
            field,
            sources: sources.into_iter().collect(),
        })
    };

    if top.iter().any(|(o, _)| priority.rank(&o.source).is_none()) {
        return conflict();
    }

    let best_rank = priority.rank(&first.source);
    let best: Vec<&(&RawObservation, f64)> = top
        .iter()
        .filter(|(o, _)| priority.rank(&o.source) == best_rank)
        .collect();
    if best.iter().all(|(_, v)| *v == first_value) {
        debug!(%fund, %date, %field, source = %first.source, "Conflict settled by source priority");
        FieldResolution::Observed {
            value: first_value,
            source: first.source.clone(),
        }
    } else {
        conflict()
    }
}

pub fn resolve_day(
    fund: &str,
    date: NaiveDate,
    observations: &[&RawObservation],
    priority: &SourcePriority,
) -> ResolvedDay {
    let fields = RecordField::ALL
        .into_iter()
        .map(|field| (field, resolve_field(fund, date, field, observations, priority)))
        .filter(|(_, r)| *r != FieldResolution::Absent)
        .collect();
    ResolvedDay {
        fund: fund.to_string(),
        date,
        fields,
    }
}

/// Strict merge: any conflicting field fails the whole (fund, date).
pub fn merge_observations(
    fund: &str,
    date: NaiveDate,
    observations: &[&RawObservation],
    priority: &SourcePriority,
) -> Result<CanonicalDailyRecord, EngineError> {
    let day = resolve_day(fund, date, observations, priority);
    if let Some(err) = day.conflicts().next() {
        return Err(err.clone());
    }
    Ok(day.to_record())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, hour, 0, 0).unwrap()
    }

    fn obs(source: &str, collected_at: DateTime<Utc>, nav: Option<f64>) -> RawObservation {
        RawObservation {
            fund: "IBIT".to_string(),
            date: date(),
            nav,
            market_price: None,
            shares_outstanding: None,
            holdings_btc: None,
            flow_btc: None,
            flow_usd: None,
            source: source.to_string(),
            collected_at,
        }
    }

    #[test]
    fn test_most_recent_collection_wins() {
        let old = obs("issuer", at(1), Some(40.0));
        let new = obs("cmc", at(2), Some(41.0));
        let priority = SourcePriority::new(&["issuer", "cmc"]);

        let record = merge_observations("IBIT", date(), &[&old, &new], &priority).unwrap();
        assert_eq!(record.nav, Field::observed(41.0));
    }

    #[test]
    fn test_equal_timestamps_use_priority() {
        let issuer = obs("issuer", at(1), Some(40.0));
        let cmc = obs("cmc", at(1), Some(40.5));
        let priority = SourcePriority::new(&["issuer", "cmc"]);

        let resolution = resolve_field("IBIT", date(), RecordField::Nav, &[&cmc, &issuer], &priority);
        assert_eq!(
            resolution,
            FieldResolution::Observed {
                value: 40.0,
                source: "issuer".to_string()
            }
        );
    }

    #[test]
    fn test_unranked_sources_conflict() {
        let a = obs("scraper-a", at(1), Some(40.0));
        let b = obs("scraper-b", at(1), Some(40.5));
        let priority = SourcePriority::new(&["issuer"]);

        let err = merge_observations("IBIT", date(), &[&a, &b], &priority).unwrap_err();
        assert_eq!(
            err,
            EngineError::ConflictUnresolved {
                fund: "IBIT".to_string(),
                date: date(),
                field: RecordField::Nav,
                sources: vec!["scraper-a".to_string(), "scraper-b".to_string()],
            }
        );
    }

    #[test]
    fn test_equal_values_never_conflict() {
        let a = obs("scraper-a", at(1), Some(40.0));
        let b = obs("scraper-b", at(1), Some(40.0));
        let priority = SourcePriority::default();

        let record = merge_observations("IBIT", date(), &[&a, &b], &priority).unwrap();
        assert_eq!(record.nav.value, Some(40.0));
    }

    #[test]
    fn test_resolve_day_keeps_other_fields_on_conflict() {
        let mut a = obs("scraper-a", at(1), Some(40.0));
        a.flow_btc = Some(12.0);
        let b = obs("scraper-b", at(1), Some(40.5));
        let priority = SourcePriority::default();

        let day = resolve_day("IBIT", date(), &[&a, &b], &priority);
        assert!(day.is_disputed(RecordField::Nav));
        assert_eq!(day.observed(RecordField::FlowBtc), Some(12.0));
        assert_eq!(day.conflicts().count(), 1);

        let record = day.to_record();
        assert_eq!(record.nav, Field::disputed());
        assert_eq!(record.flow_btc, Field::observed(12.0));
        assert_eq!(record.issues.len(), 1);
    }

    #[test]
    fn test_absent_fields_stay_missing() {
        let a = obs("issuer", at(1), None);
        let day = resolve_day("IBIT", date(), &[&a], &SourcePriority::default());
        assert_eq!(*day.get(RecordField::Nav), FieldResolution::Absent);
        assert_eq!(day.to_record().nav, Field::missing());
    }
}
