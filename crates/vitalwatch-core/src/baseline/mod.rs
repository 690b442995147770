//! Baseline evaluation
//!
//! Readings are graded against per-demographic reference ranges. A range is
//! selected by vital sign, [`AgeGroup`] and gender; combinations without a
//! configured range are simply not compared.

pub mod evaluator;
pub mod table;

pub use evaluator::{compare, Alert, BaselineEvaluator, EvaluatorConfig, Severity};
pub use table::{AgeGroup, BaselineRange, BaselineTable};
