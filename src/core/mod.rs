//! Domain core: record model, merge, calendar, holdings, estimation and reconciliation.

pub mod calendar;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod export;
pub mod holdings;
pub mod log;
pub mod merge;
pub mod model;
pub mod reconcile;
pub mod source;

pub use engine::{Engine, EngineInput, EngineOutput, FundReport, RunWindow};
pub use error::{EngineError, ReconciliationWarning};
pub use model::{CanonicalDailyRecord, Field, Provenance, RawObservation, RecordField, RecordKey};
pub use source::{BtcPriceSource, ObservationSource};
