//! Confidence-weighted estimation of missing NAV and shares outstanding.

use crate::core::config::EstimationConfig;
use crate::core::model::{Field, Provenance, RecordField};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Display;

/// Closed set of estimation strategies, listed from lowest to highest variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    HoldingsImplied,
    MarketRatio,
    PeerRatio,
    CarryForward,
}

impl Strategy {
    pub const ALL: [Strategy; 4] = [
        Strategy::HoldingsImplied,
        Strategy::MarketRatio,
        Strategy::PeerRatio,
        Strategy::CarryForward,
    ];

    /// Tie-break order; lower wins.
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// The candidate this strategy yields for `field`, if it has what it needs.
    pub fn candidate(
        self,
        field: RecordField,
        ctx: &EstimationContext,
        policy: &EstimationConfig,
    ) -> Option<EstimationResult> {
        let (value, confidence, anchor) = match (self, field) {
            (Strategy::HoldingsImplied, RecordField::Nav) => {
                let (shares, shares_factor, anchor) = match ctx.shares.value {
                    Some(shares) if ctx.shares.provenance == Provenance::Observed => {
                        (shares, 1.0, ctx.date)
                    }
                    _ => {
                        let last = ctx.last_shares?;
                        (last.value, decay_factor(policy, ctx.gap(last)), last.date)
                    }
                };
                let (holdings_value, base) = holdings_basis(ctx, policy)?;
                positive(shares)?;
                (
                    holdings_value / shares,
                    base * shares_factor,
                    anchor,
                )
            }
            (Strategy::HoldingsImplied, RecordField::SharesOutstanding) => {
                let nav = positive(ctx.nav.value?)?;
                let (holdings_value, base) = holdings_basis(ctx, policy)?;
                (holdings_value / nav, base * ctx.nav.confidence, ctx.date)
            }
            (Strategy::MarketRatio, RecordField::Nav) => {
                let price = positive(ctx.market_price?)?;
                let ratio = ctx.last_nav_price_ratio?;
                (
                    price * ratio.value,
                    decayed_confidence(policy, policy.market_ratio_confidence, ctx.gap(ratio)),
                    ratio.date,
                )
            }
            (Strategy::PeerRatio, RecordField::SharesOutstanding) => {
                let peer = ctx.peer?;
                let last = ctx.last_shares?;
                let peer_nav = positive(peer.nav)?;
                (
                    last.value * (peer.market_price / peer_nav),
                    decayed_confidence(policy, policy.peer_ratio_confidence, ctx.gap(last)),
                    last.date,
                )
            }
            (Strategy::CarryForward, RecordField::Nav) => {
                let last = ctx.last_nav?;
                carry(ctx, policy, last)
            }
            (Strategy::CarryForward, RecordField::SharesOutstanding) => {
                let last = ctx.last_shares?;
                carry(ctx, policy, last)
            }
            _ => return None,
        };

        (value.is_finite() && value > 0.0).then_some(EstimationResult {
            value: Some(value),
            strategy: Some(self),
            confidence: confidence.clamp(0.0, 1.0),
            anchor: Some(anchor),
        })
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Strategy::HoldingsImplied => "holdings-implied",
                Strategy::MarketRatio => "market-ratio",
                Strategy::PeerRatio => "peer-ratio",
                Strategy::CarryForward => "carry-forward",
            }
        )
    }
}

/// A past observation an estimate can be derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub value: f64,
    pub date: NaiveDate,
}

/// Same-day market price and NAV of the comparable fund.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerQuote {
    pub market_price: f64,
    pub nav: f64,
}

/// What is known about a fund on the date being estimated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimationContext {
    pub date: NaiveDate,
    pub holdings: Field,
    pub btc_price: Option<f64>,
    pub market_price: Option<f64>,
    /// Today's NAV, observed or already estimated.
    pub nav: Field,
    /// Today's shares outstanding, if observed.
    pub shares: Field,
    pub last_nav: Option<Anchor>,
    pub last_shares: Option<Anchor>,
    /// NAV / market price on the last day both were observed.
    pub last_nav_price_ratio: Option<Anchor>,
    pub peer: Option<PeerQuote>,
    /// False when NAV is quoted in another currency than the BTC price.
    pub nav_in_btc_price_currency: bool,
}

impl EstimationContext {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            holdings: Field::missing(),
            btc_price: None,
            market_price: None,
            nav: Field::missing(),
            shares: Field::missing(),
            last_nav: None,
            last_shares: None,
            last_nav_price_ratio: None,
            peer: None,
            nav_in_btc_price_currency: true,
        }
    }

    fn gap(&self, anchor: Anchor) -> i64 {
        (self.date - anchor.date).num_days().max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    pub value: Option<f64>,
    pub strategy: Option<Strategy>,
    pub confidence: f64,
    pub anchor: Option<NaiveDate>,
}

impl EstimationResult {
    pub fn unavailable() -> Self {
        Self {
            value: None,
            strategy: None,
            confidence: 0.0,
            anchor: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.value.is_some()
    }

    pub fn to_field(&self) -> Field {
        Field::estimated(self.value, self.confidence)
    }
}

fn positive(value: f64) -> Option<f64> {
    (value > 0.0).then_some(value)
}

/// Holdings value in the BTC price currency and the base confidence it supports.
fn holdings_basis(ctx: &EstimationContext, policy: &EstimationConfig) -> Option<(f64, f64)> {
    if !ctx.nav_in_btc_price_currency {
        return None;
    }
    let holdings = positive(ctx.holdings.value?)?;
    let btc = positive(ctx.btc_price?)?;
    let base = if ctx.holdings.provenance == Provenance::Observed {
        policy.holdings_implied_confidence
    } else {
        policy.holdings_implied_degraded_confidence
    };
    Some((holdings * btc, base * ctx.holdings.confidence))
}

fn carry(ctx: &EstimationContext, policy: &EstimationConfig, last: Anchor) -> (f64, f64, NaiveDate) {
    (
        last.value,
        decayed_confidence(policy, policy.carry_forward_confidence, ctx.gap(last)),
        last.date,
    )
}

fn decay_factor(policy: &EstimationConfig, gap_days: i64) -> f64 {
    0.5_f64.powf(gap_days.max(0) as f64 / policy.half_life_days)
}

/// `base` halved every `half_life_days`, and capped once the anchor is stale.
/// Non-increasing in `gap_days`.
pub fn decayed_confidence(policy: &EstimationConfig, base: f64, gap_days: i64) -> f64 {
    let confidence = base * decay_factor(policy, gap_days);
    if gap_days > policy.staleness_days {
        confidence.min(policy.stale_confidence_cap)
    } else {
        confidence
    }
}

fn compare(a: &EstimationResult, b: &EstimationResult) -> Ordering {
    a.confidence
        .total_cmp(&b.confidence)
        .then_with(|| {
            let ra = a.strategy.map(Strategy::rank);
            let rb = b.strategy.map(Strategy::rank);
            rb.cmp(&ra)
        })
        .then_with(|| a.anchor.cmp(&b.anchor))
}

/// Every candidate the strategies can produce for `field`.
pub fn candidates(
    field: RecordField,
    ctx: &EstimationContext,
    policy: &EstimationConfig,
) -> Vec<EstimationResult> {
    Strategy::ALL
        .iter()
        .filter_map(|s| s.candidate(field, ctx, policy))
        .collect()
}

/// Highest-confidence candidate; ties go to the lower-variance strategy, then the
/// more recent anchor.
pub fn estimate(
    field: RecordField,
    ctx: &EstimationContext,
    policy: &EstimationConfig,
) -> EstimationResult {
    candidates(field, ctx, policy)
        .into_iter()
        .max_by(compare)
        .unwrap_or_else(EstimationResult::unavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, day).unwrap()
    }

    fn anchor(value: f64, day: u32) -> Anchor {
        Anchor {
            value,
            date: d(day),
        }
    }

    #[test]
    fn test_decay_is_monotonic_and_capped() {
        let policy = EstimationConfig::default();
        let mut previous = f64::INFINITY;
        for gap in 0..40 {
            let c = decayed_confidence(&policy, policy.carry_forward_confidence, gap);
            assert!(c <= previous, "confidence rose at gap {gap}");
            assert!((0.0..=1.0).contains(&c));
            previous = c;
        }
        assert_eq!(decayed_confidence(&policy, 0.5, 0), 0.5);
        assert_eq!(decayed_confidence(&policy, 0.5, 5), 0.25);
        assert!(decayed_confidence(&policy, 1.0, 11) <= policy.stale_confidence_cap);
    }

    #[test]
    fn test_holdings_implied_nav_with_observed_inputs() {
        let policy = EstimationConfig::default();
        let mut ctx = EstimationContext::new(d(10));
        ctx.holdings = Field::observed(1000.0);
        ctx.btc_price = Some(60_000.0);
        ctx.shares = Field::observed(2_000_000.0);
        ctx.last_nav = Some(anchor(29.0, 9));

        let result = estimate(RecordField::Nav, &ctx, &policy);
        assert_eq!(result.strategy, Some(Strategy::HoldingsImplied));
        assert_eq!(result.value, Some(30.0));
        assert_eq!(result.confidence, policy.holdings_implied_confidence);
        assert_eq!(result.anchor, Some(d(10)));
    }

    #[test]
    fn test_carry_forward_never_beats_higher_confidence() {
        let policy = EstimationConfig::default();
        let mut ctx = EstimationContext::new(d(10));
        ctx.market_price = Some(31.0);
        ctx.last_nav_price_ratio = Some(anchor(1.0, 9));
        ctx.last_nav = Some(anchor(30.0, 9));

        let all = candidates(RecordField::Nav, &ctx, &policy);
        assert_eq!(all.len(), 2);
        let result = estimate(RecordField::Nav, &ctx, &policy);
        assert_eq!(result.strategy, Some(Strategy::MarketRatio));
        assert_eq!(result.value, Some(31.0));
    }

    #[test]
    fn test_carry_forward_used_when_alone() {
        let policy = EstimationConfig::default();
        let mut ctx = EstimationContext::new(d(12));
        ctx.last_shares = Some(anchor(5_000.0, 10));

        let result = estimate(RecordField::SharesOutstanding, &ctx, &policy);
        assert_eq!(result.strategy, Some(Strategy::CarryForward));
        assert_eq!(result.value, Some(5_000.0));
        assert_eq!(
            result.confidence,
            decayed_confidence(&policy, policy.carry_forward_confidence, 2)
        );
    }

    #[test]
    fn test_peer_ratio_scales_last_shares() {
        let policy = EstimationConfig::default();
        let mut ctx = EstimationContext::new(d(10));
        ctx.last_shares = Some(anchor(1_000.0, 10));
        ctx.peer = Some(PeerQuote {
            market_price: 51.0,
            nav: 50.0,
        });

        let result = Strategy::PeerRatio
            .candidate(RecordField::SharesOutstanding, &ctx, &policy)
            .unwrap();
        assert_eq!(result.value, Some(1_020.0));
        assert_eq!(result.confidence, policy.peer_ratio_confidence);
        // Peer ratio beats plain carry-forward at the same anchor
        assert_eq!(
            estimate(RecordField::SharesOutstanding, &ctx, &policy).strategy,
            Some(Strategy::PeerRatio)
        );
    }

    #[test]
    fn test_peer_ratio_capped_when_stale() {
        let policy = EstimationConfig::default();
        let mut ctx = EstimationContext::new(d(25));
        ctx.last_shares = Some(anchor(1_000.0, 1));
        ctx.peer = Some(PeerQuote {
            market_price: 50.0,
            nav: 50.0,
        });
        let result = Strategy::PeerRatio
            .candidate(RecordField::SharesOutstanding, &ctx, &policy)
            .unwrap();
        assert!(result.confidence <= policy.stale_confidence_cap);
    }

    #[test]
    fn test_shares_from_estimated_nav() {
        let policy = EstimationConfig::default();
        let mut ctx = EstimationContext::new(d(10));
        ctx.holdings = Field::observed(10.0);
        ctx.btc_price = Some(50_000.0);
        ctx.nav = Field::estimated(Some(25.0), 0.5);

        let result = estimate(RecordField::SharesOutstanding, &ctx, &policy);
        assert_eq!(result.strategy, Some(Strategy::HoldingsImplied));
        assert_eq!(result.value, Some(20_000.0));
        assert_eq!(result.confidence, policy.holdings_implied_confidence * 0.5);
    }

    #[test]
    fn test_holdings_implied_skipped_for_foreign_currency_nav() {
        let policy = EstimationConfig::default();
        let mut ctx = EstimationContext::new(d(10));
        ctx.holdings = Field::observed(100.0);
        ctx.btc_price = Some(60_000.0);
        ctx.nav = Field::observed(8.0);
        ctx.shares = Field::observed(96_000.0);
        ctx.last_shares = Some(anchor(95_000.0, 9));
        ctx.nav_in_btc_price_currency = false;

        assert!(
            Strategy::HoldingsImplied
                .candidate(RecordField::SharesOutstanding, &ctx, &policy)
                .is_none()
        );
        assert!(
            Strategy::HoldingsImplied
                .candidate(RecordField::Nav, &ctx, &policy)
                .is_none()
        );
        let result = estimate(RecordField::SharesOutstanding, &ctx, &policy);
        assert_eq!(result.strategy, Some(Strategy::CarryForward));
        assert_eq!(result.value, Some(95_000.0));
    }

    #[test]
    fn test_tie_prefers_lower_variance_strategy() {
        let policy = EstimationConfig {
            market_ratio_confidence: 0.5,
            carry_forward_confidence: 0.5,
            ..EstimationConfig::default()
        };
        let mut ctx = EstimationContext::new(d(10));
        ctx.market_price = Some(40.0);
        ctx.last_nav_price_ratio = Some(anchor(1.0, 10));
        ctx.last_nav = Some(anchor(39.0, 10));

        let result = estimate(RecordField::Nav, &ctx, &policy);
        assert_eq!(result.strategy, Some(Strategy::MarketRatio));
    }

    #[test]
    fn test_no_anchor_means_unavailable() {
        let policy = EstimationConfig::default();
        let ctx = EstimationContext::new(d(10));
        let result = estimate(RecordField::Nav, &ctx, &policy);
        assert_eq!(result, EstimationResult::unavailable());
        assert_eq!(result.to_field(), Field::missing());
    }

    #[test]
    fn test_unsupported_fields_have_no_candidates() {
        let policy = EstimationConfig::default();
        let mut ctx = EstimationContext::new(d(10));
        ctx.last_nav = Some(anchor(30.0, 9));
        assert!(candidates(RecordField::FlowBtc, &ctx, &policy).is_empty());
    }
}
