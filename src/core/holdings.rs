//! Reconstruction of the BTC holdings series from a seed, daily flows and the
//! occasional direct disclosure.
//!
//! The running total is threaded through [`HoldingsAccumulator::step`] as an explicit
//! value; [`reconstruct`] is a fold over strictly increasing dates.

use crate::core::calendar::DayKind;
use crate::core::error::EngineError;
use crate::core::model::{Field, FundSeed, Provenance};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldingsState {
    Seeded,
    Accumulating,
    Resynced,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlowInput {
    Observed(f64),
    Missing,
    /// Sources disagreed on the flow; nothing is assumed beyond a zero-flow placeholder.
    Disputed,
}

/// Everything the reconstructor needs to know about one date.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoldingsDay {
    pub date: NaiveDate,
    pub kind: DayKind,
    pub flow: FlowInput,
    pub disclosed: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoldingsPoint {
    pub date: NaiveDate,
    pub holdings: Field,
    pub flow_btc: Field,
    pub state: HoldingsState,
    /// Holdings before this date's step was applied.
    pub previous_holdings: f64,
}

impl HoldingsPoint {
    /// Flow implied by a disclosure, relative to the previous day's holdings.
    pub fn implied_flow(&self) -> Option<f64> {
        match self.state {
            HoldingsState::Resynced => self.holdings.value.map(|h| h - self.previous_holdings),
            _ => None,
        }
    }
}

/// The recorded flow for a date: zero on quiet non-trading days, an
/// assumed zero on trading-day gaps.
pub fn flow_field(flow: FlowInput, kind: DayKind, gap_confidence: f64) -> Field {
    match (flow, kind) {
        (FlowInput::Observed(flow), _) => Field::observed(flow),
        (FlowInput::Missing, DayKind::NonTrading) => Field::carried(Some(0.0), 1.0),
        (FlowInput::Missing, DayKind::Trading) => Field::estimated(Some(0.0), gap_confidence),
        (FlowInput::Disputed, _) => Field::disputed(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HoldingsAccumulator {
    pub baseline: f64,
    /// Lowest confidence of any flow applied since the last anchor.
    pub chain_confidence: f64,
    pub state: HoldingsState,
    floor: NaiveDate,
    last_date: Option<NaiveDate>,
}

impl HoldingsAccumulator {
    pub fn seeded(seed: &FundSeed) -> Self {
        Self {
            baseline: seed.holdings_btc,
            chain_confidence: 1.0,
            state: HoldingsState::Seeded,
            floor: seed.date,
            last_date: None,
        }
    }

    fn check_order(&self, fund: &str, date: NaiveDate) -> Result<(), EngineError> {
        let out_of_order = match self.last_date {
            Some(previous) if date <= previous => Some(previous),
            None if date < self.floor => Some(self.floor),
            _ => None,
        };
        match out_of_order {
            Some(previous) => Err(EngineError::OutOfOrder {
                fund: fund.to_string(),
                date,
                previous,
            }),
            None => Ok(()),
        }
    }

    /// Applies one date. Returns the next accumulator and the point for that date.
    pub fn step(self, day: &HoldingsDay, gap_confidence: f64) -> (Self, HoldingsPoint) {
        let flow_field = flow_field(day.flow, day.kind, gap_confidence);

        let (holdings, next) = if let Some(disclosed) = day.disclosed {
            debug!(date = %day.date, disclosed, accumulated = self.baseline, "Holdings resynced from disclosure");
            (
                Field::observed(disclosed),
                Self {
                    baseline: disclosed,
                    chain_confidence: 1.0,
                    state: HoldingsState::Resynced,
                    ..self
                },
            )
        } else {
            match (day.flow, day.kind) {
                (FlowInput::Observed(flow), _) => {
                    let value = self.baseline + flow;
                    let provenance = if self.chain_confidence >= 1.0 {
                        Provenance::Observed
                    } else {
                        Provenance::Estimated
                    };
                    (
                        Field {
                            value: Some(value),
                            provenance,
                            confidence: self.chain_confidence,
                        },
                        Self {
                            baseline: value,
                            state: HoldingsState::Accumulating,
                            ..self
                        },
                    )
                }
                (FlowInput::Missing, DayKind::NonTrading) => (
                    Field::carried(Some(self.baseline), self.chain_confidence),
                    Self {
                        state: HoldingsState::Accumulating,
                        ..self
                    },
                ),
                (FlowInput::Missing, DayKind::Trading) | (FlowInput::Disputed, _) => {
                    let chain_confidence = self.chain_confidence.min(gap_confidence);
                    (
                        Field::estimated(Some(self.baseline), chain_confidence),
                        Self {
                            chain_confidence,
                            state: HoldingsState::Accumulating,
                            ..self
                        },
                    )
                }
            }
        };

        let point = HoldingsPoint {
            date: day.date,
            holdings,
            flow_btc: flow_field,
            state: next.state,
            previous_holdings: self.baseline,
        };
        (
            Self {
                last_date: Some(day.date),
                ..next
            },
            point,
        )
    }
}

/// Folds the date-ordered days of one fund into its holdings series.
pub fn reconstruct(
    fund: &str,
    seed: Option<&FundSeed>,
    days: &[HoldingsDay],
    gap_confidence: f64,
) -> Result<Vec<HoldingsPoint>, EngineError> {
    let seed = seed.ok_or_else(|| EngineError::MissingSeed {
        fund: fund.to_string(),
    })?;

    let (_, points) = days.iter().try_fold(
        (HoldingsAccumulator::seeded(seed), Vec::with_capacity(days.len())),
        |(acc, mut points), day| {
            acc.check_order(fund, day.date)?;
            let (acc, point) = acc.step(day, gap_confidence);
            points.push(point);
            Ok::<_, EngineError>((acc, points))
        },
    )?;
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAP: f64 = 0.2;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn seed(holdings_btc: f64) -> FundSeed {
        FundSeed {
            date: d(4),
            holdings_btc,
        }
    }

    fn trading(day: u32, flow: FlowInput) -> HoldingsDay {
        HoldingsDay {
            date: d(day),
            kind: DayKind::Trading,
            flow,
            disclosed: None,
        }
    }

    fn values(points: &[HoldingsPoint]) -> Vec<f64> {
        points.iter().map(|p| p.holdings.value.unwrap()).collect()
    }

    #[test]
    fn test_flows_accumulate_from_seed() {
        let days = [
            trading(4, FlowInput::Observed(10.0)),
            trading(5, FlowInput::Observed(-3.0)),
            trading(6, FlowInput::Observed(5.0)),
        ];
        let points = reconstruct("IBIT", Some(&seed(0.0)), &days, GAP).unwrap();
        assert_eq!(values(&points), vec![10.0, 7.0, 12.0]);
        assert!(points.iter().all(|p| p.holdings.provenance == Provenance::Observed));
        assert!(points.iter().all(|p| p.state == HoldingsState::Accumulating));
    }

    #[test]
    fn test_disclosure_overrides_and_rebases() {
        let mut days = [
            trading(4, FlowInput::Observed(10.0)),
            trading(5, FlowInput::Observed(-3.0)),
            trading(6, FlowInput::Observed(5.0)),
        ];
        days[1].disclosed = Some(6.0);
        let points = reconstruct("IBIT", Some(&seed(0.0)), &days, GAP).unwrap();
        assert_eq!(values(&points), vec![10.0, 6.0, 11.0]);
        assert_eq!(points[1].state, HoldingsState::Resynced);
        assert_eq!(points[1].implied_flow(), Some(-4.0));
        // The recorded flow stays as reported
        assert_eq!(points[1].flow_btc, Field::observed(-3.0));
        assert_eq!(points[2].state, HoldingsState::Accumulating);
    }

    #[test]
    fn test_non_trading_gap_carries_forward_exactly() {
        let days = [
            trading(8, FlowInput::Observed(2.5)),
            HoldingsDay {
                date: d(9),
                kind: DayKind::NonTrading,
                flow: FlowInput::Missing,
                disclosed: None,
            },
        ];
        let points = reconstruct("IBIT", Some(&seed(100.0)), &days, GAP).unwrap();
        assert_eq!(points[1].holdings.provenance, Provenance::CarriedForward);
        assert_eq!(points[1].holdings.value, points[0].holdings.value);
        assert_eq!(points[1].flow_btc.value, Some(0.0));
    }

    #[test]
    fn test_trading_gap_is_estimated_and_taints_chain() {
        let days = [
            trading(4, FlowInput::Missing),
            trading(5, FlowInput::Observed(4.0)),
            HoldingsDay {
                date: d(6),
                kind: DayKind::Trading,
                flow: FlowInput::Observed(1.0),
                disclosed: Some(50.0),
            },
            trading(7, FlowInput::Observed(1.0)),
        ];
        let points = reconstruct("IBIT", Some(&seed(40.0)), &days, GAP).unwrap();

        assert_eq!(points[0].holdings.provenance, Provenance::Estimated);
        assert_eq!(points[0].holdings.value, Some(40.0));
        assert_eq!(points[0].flow_btc.confidence, GAP);

        // Observed flow after a gap is still only as good as the chain
        assert_eq!(points[1].holdings.value, Some(44.0));
        assert_eq!(points[1].holdings.provenance, Provenance::Estimated);
        assert_eq!(points[1].holdings.confidence, GAP);

        // Disclosure restores full confidence going forward
        assert_eq!(points[3].holdings, Field::observed(51.0));
    }

    #[test]
    fn test_disputed_flow_is_not_guessed() {
        let days = [trading(4, FlowInput::Disputed)];
        let points = reconstruct("IBIT", Some(&seed(10.0)), &days, GAP).unwrap();
        assert_eq!(points[0].flow_btc, Field::disputed());
        assert_eq!(points[0].holdings.value, Some(10.0));
        assert_eq!(points[0].holdings.provenance, Provenance::Estimated);
    }

    #[test]
    fn test_missing_seed() {
        let err = reconstruct("ARKB", None, &[], GAP).unwrap_err();
        assert_eq!(
            err,
            EngineError::MissingSeed {
                fund: "ARKB".to_string()
            }
        );
    }

    #[test]
    fn test_out_of_order_dates_rejected() {
        let days = [
            trading(6, FlowInput::Observed(1.0)),
            trading(5, FlowInput::Observed(1.0)),
        ];
        let err = reconstruct("IBIT", Some(&seed(0.0)), &days, GAP).unwrap_err();
        assert!(matches!(err, EngineError::OutOfOrder { previous, .. } if previous == d(6)));

        let before_seed = [trading(3, FlowInput::Observed(1.0))];
        assert!(reconstruct("IBIT", Some(&seed(0.0)), &before_seed, GAP).is_err());
    }

    #[test]
    fn test_accumulation_identity_holds_without_disclosures() {
        let flows = [3.0, -1.5, 0.0, 7.25, -2.0, 1.0];
        let days: Vec<HoldingsDay> = flows
            .iter()
            .enumerate()
            .map(|(i, f)| trading(4 + i as u32, FlowInput::Observed(*f)))
            .collect();
        let points = reconstruct("IBIT", Some(&seed(5.0)), &days, GAP).unwrap();
        for pair in points.windows(2) {
            let expected = pair[0].holdings.value.unwrap() + pair[1].flow_btc.value.unwrap();
            assert_eq!(pair[1].holdings.value.unwrap(), expected);
        }
    }
}
