//! Severity-graded comparison of a reading against its baselines

use super::table::{AgeGroup, BaselineRange, BaselineTable};
use crate::reading::{Gender, Reading, VitalSign};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Normal => "NORMAL",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing one vital sign with its baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub vital_sign: VitalSign,
    pub message: String,
    pub severity: Severity,
    pub value: f64,
    pub baseline_min: f64,
    pub baseline_max: f64,
}

impl Alert {
    /// Whether this alert needs attention
    pub fn is_actionable(&self) -> bool {
        self.severity > Severity::Normal
    }
}

/// Demographic fallbacks for readings that lack age or gender
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub default_age: Option<u32>,
    pub default_gender: Option<Gender>,
}

/// Compare a value against a range
///
/// The critical limits are the outermost of the hard and warning bounds and
/// the normal band is the innermost, so a range whose warning bounds sit
/// outside `[min, max]` grades the gap between them as a warning.
pub fn compare(sign: VitalSign, value: f64, range: &BaselineRange) -> Alert {
    let (critical_lo, critical_hi) = range.critical_band();
    let (normal_lo, normal_hi) = range.normal_band();

    let (severity, message) = if value < critical_lo {
        (Severity::Critical, format!("{} is critically low", sign))
    } else if value > critical_hi {
        (Severity::Critical, format!("{} is critically high", sign))
    } else if value < normal_lo {
        (Severity::Warning, format!("{} is low", sign))
    } else if value > normal_hi {
        (Severity::Warning, format!("{} is high", sign))
    } else {
        (Severity::Normal, format!("{} is within normal range", sign))
    };

    Alert {
        vital_sign: sign,
        message,
        severity,
        value,
        baseline_min: range.min,
        baseline_max: range.max,
    }
}

/// Age- and gender-aware baseline rule engine
#[derive(Debug, Clone, Default)]
pub struct BaselineEvaluator {
    table: BaselineTable,
    config: EvaluatorConfig,
}

impl BaselineEvaluator {
    pub fn new(table: BaselineTable) -> Self {
        Self {
            table,
            config: EvaluatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn table(&self) -> &BaselineTable {
        &self.table
    }

    /// Grade every vital sign of `reading` that has a configured baseline
    ///
    /// Alerts come back in feature order. A reading with no usable age or
    /// gender (and no configured default) yields no alerts.
    pub fn evaluate(&self, reading: &Reading) -> Vec<Alert> {
        let age = reading.age().or(self.config.default_age);
        let gender = reading.gender().or(self.config.default_gender);

        let (age, gender) = match (age, gender) {
            (Some(age), Some(gender)) => (age, gender),
            _ => {
                tracing::debug!(
                    patient_id = %reading.patient_id(),
                    has_age = age.is_some(),
                    has_gender = gender.is_some(),
                    "Skipping baseline comparison: missing demographics"
                );
                return Vec::new();
            }
        };

        let group = AgeGroup::from_age(age);
        VitalSign::ALL
            .iter()
            .filter_map(|&sign| {
                self.table
                    .get(sign, group, gender)
                    .map(|range| compare(sign, reading.value(sign), range))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Vitals;
    use chrono::Utc;

    fn heart_rate_table() -> BaselineTable {
        BaselineTable::new().with_range(
            VitalSign::HeartRate,
            AgeGroup::Adult,
            Gender::Male,
            BaselineRange::new(60.0, 100.0).with_warning_max(110.0),
        )
    }

    fn reading(heart_rate: f64) -> Reading {
        Reading::new(
            Utc::now(),
            "P1",
            Vitals {
                heart_rate,
                temperature: 37.0,
                spo2: 98.0,
                respiratory_rate: 16.0,
                systolic_bp: 120.0,
                diastolic_bp: 80.0,
            },
        )
        .unwrap()
    }

    fn adult_male(heart_rate: f64) -> Reading {
        reading(heart_rate).with_age(40).with_gender(Gender::Male)
    }

    #[test]
    fn test_severity_resolution() {
        let evaluator = BaselineEvaluator::new(heart_rate_table());

        let cases = [
            (80.0, Severity::Normal, "heart_rate is within normal range"),
            (100.0, Severity::Normal, "heart_rate is within normal range"),
            (105.0, Severity::Warning, "heart_rate is high"),
            (110.0, Severity::Warning, "heart_rate is high"),
            (115.0, Severity::Critical, "heart_rate is critically high"),
            (55.0, Severity::Critical, "heart_rate is critically low"),
        ];

        for (value, severity, message) in cases {
            let alerts = evaluator.evaluate(&adult_male(value));
            assert_eq!(alerts.len(), 1, "value {}", value);
            assert_eq!(alerts[0].severity, severity, "value {}", value);
            assert_eq!(alerts[0].message, message);
            assert_eq!(alerts[0].baseline_min, 60.0);
            assert_eq!(alerts[0].baseline_max, 100.0);
        }
    }

    #[test]
    fn test_warning_bounds_inside_hard_bounds() {
        let range = BaselineRange::new(90.0, 140.0)
            .with_warning_min(100.0)
            .with_warning_max(130.0);

        assert_eq!(compare(VitalSign::SystolicBp, 95.0, &range).severity, Severity::Warning);
        assert_eq!(compare(VitalSign::SystolicBp, 95.0, &range).message, "systolic_bp is low");
        assert_eq!(compare(VitalSign::SystolicBp, 85.0, &range).severity, Severity::Critical);
        assert_eq!(compare(VitalSign::SystolicBp, 135.0, &range).severity, Severity::Warning);
        assert_eq!(compare(VitalSign::SystolicBp, 140.0, &range).severity, Severity::Warning);
        assert_eq!(compare(VitalSign::SystolicBp, 120.0, &range).severity, Severity::Normal);
    }

    #[test]
    fn test_signs_without_baseline_are_skipped() {
        let evaluator = BaselineEvaluator::new(heart_rate_table());
        let alerts = evaluator.evaluate(&adult_male(70.0));
        assert!(alerts.iter().all(|a| a.vital_sign == VitalSign::HeartRate));

        // Other demographics have no entry at all
        let child = reading(70.0).with_age(8).with_gender(Gender::Male);
        assert!(evaluator.evaluate(&child).is_empty());
        let female = reading(70.0).with_age(40).with_gender(Gender::Female);
        assert!(evaluator.evaluate(&female).is_empty());
    }

    #[test]
    fn test_missing_demographics() {
        let evaluator = BaselineEvaluator::new(heart_rate_table());
        assert!(evaluator.evaluate(&reading(130.0)).is_empty());
        assert!(evaluator.evaluate(&reading(130.0).with_age(40)).is_empty());

        let with_defaults = BaselineEvaluator::new(heart_rate_table()).with_config(EvaluatorConfig {
            default_age: Some(30),
            default_gender: Some(Gender::Male),
        });
        let alerts = with_defaults.evaluate(&reading(130.0));
        assert_eq!(alerts[0].severity, Severity::Critical);
    }

    #[test]
    fn test_alerts_in_feature_order() {
        let table = heart_rate_table()
            .with_range(VitalSign::DiastolicBp, AgeGroup::Adult, Gender::Male, BaselineRange::new(60.0, 90.0))
            .with_range(VitalSign::Spo2, AgeGroup::Adult, Gender::Male, BaselineRange::new(95.0, 100.0));
        let evaluator = BaselineEvaluator::new(table);

        let signs: Vec<VitalSign> = evaluator
            .evaluate(&adult_male(70.0))
            .iter()
            .map(|a| a.vital_sign)
            .collect();
        assert_eq!(signs, vec![VitalSign::HeartRate, VitalSign::Spo2, VitalSign::DiastolicBp]);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Normal);
        assert_eq!(serde_json::to_string(&Severity::Warning).unwrap(), "\"WARNING\"");
    }
}
