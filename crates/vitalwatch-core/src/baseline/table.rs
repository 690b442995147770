//! Baseline range table
//!
//! Three-level typed lookup `VitalSign -> AgeGroup -> Gender -> BaselineRange`
//! loaded from a JSON document shaped like:
//!
//! ```json
//! { "heart_rate": { "adult": { "M": { "min": 60, "max": 100, "warning_max": 110 } } } }
//! ```

use crate::config::ConfigError;
use crate::reading::{Gender, VitalSign};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Age bracket used to select a baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeGroup {
    Infant,
    Child,
    Adolescent,
    Adult,
    Elderly,
}

impl AgeGroup {
    pub fn from_age(age: u32) -> Self {
        match age {
            0 => AgeGroup::Infant,
            1..=11 => AgeGroup::Child,
            12..=17 => AgeGroup::Adolescent,
            18..=64 => AgeGroup::Adult,
            _ => AgeGroup::Elderly,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeGroup::Infant => "infant",
            AgeGroup::Child => "child",
            AgeGroup::Adolescent => "adolescent",
            AgeGroup::Adult => "adult",
            AgeGroup::Elderly => "elderly",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "infant" => Ok(AgeGroup::Infant),
            "child" => Ok(AgeGroup::Child),
            "adolescent" => Ok(AgeGroup::Adolescent),
            "adult" => Ok(AgeGroup::Adult),
            "elderly" => Ok(AgeGroup::Elderly),
            other => Err(format!("unknown age group '{}'", other)),
        }
    }
}

/// Hard and warning bounds for one (sign, age group, gender) combination
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineRange {
    pub min: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_max: Option<f64>,
}

impl BaselineRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            warning_min: None,
            warning_max: None,
        }
    }

    pub fn with_warning_min(mut self, value: f64) -> Self {
        self.warning_min = Some(value);
        self
    }

    pub fn with_warning_max(mut self, value: f64) -> Self {
        self.warning_max = Some(value);
        self
    }

    /// Warning bounds, defaulting to the hard bounds
    pub fn warning_bounds(&self) -> (f64, f64) {
        (
            self.warning_min.unwrap_or(self.min),
            self.warning_max.unwrap_or(self.max),
        )
    }

    /// Band outside of which a value is critical
    pub fn critical_band(&self) -> (f64, f64) {
        let (wmin, wmax) = self.warning_bounds();
        (self.min.min(wmin), self.max.max(wmax))
    }

    /// Band inside of which a value is normal
    pub fn normal_band(&self) -> (f64, f64) {
        let (wmin, wmax) = self.warning_bounds();
        (self.min.max(wmin), self.max.min(wmax))
    }

    fn check(&self) -> Result<(), String> {
        let values = [Some(self.min), Some(self.max), self.warning_min, self.warning_max];
        if values.iter().flatten().any(|v| !v.is_finite()) {
            return Err("bounds must be finite".to_string());
        }
        if self.min > self.max {
            return Err(format!("min {} exceeds max {}", self.min, self.max));
        }
        let (wmin, wmax) = self.warning_bounds();
        if wmin > wmax {
            return Err(format!("warning_min {} exceeds warning_max {}", wmin, wmax));
        }
        Ok(())
    }
}

type ByGender = HashMap<Gender, BaselineRange>;
type ByAgeGroup = HashMap<AgeGroup, ByGender>;

/// Baseline ranges for every configured combination
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaselineTable {
    ranges: HashMap<VitalSign, ByAgeGroup>,
}

impl BaselineTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a range
    pub fn insert(&mut self, sign: VitalSign, group: AgeGroup, gender: Gender, range: BaselineRange) {
        self.ranges
            .entry(sign)
            .or_default()
            .entry(group)
            .or_default()
            .insert(gender, range);
    }

    /// Builder-style [`insert`](Self::insert)
    pub fn with_range(
        mut self,
        sign: VitalSign,
        group: AgeGroup,
        gender: Gender,
        range: BaselineRange,
    ) -> Self {
        self.insert(sign, group, gender, range);
        self
    }

    pub fn get(&self, sign: VitalSign, group: AgeGroup, gender: Gender) -> Option<&BaselineRange> {
        self.ranges.get(&sign)?.get(&group)?.get(&gender)
    }

    /// Number of configured ranges
    pub fn len(&self) -> usize {
        self.ranges
            .values()
            .flat_map(|groups| groups.values())
            .map(|genders| genders.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse a baseline document
    ///
    /// Unknown vital-sign, age-group or gender keys are ignored with a
    /// warning. A structurally invalid document or an invalid range is an
    /// error.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let doc: JsonValue = serde_json::from_str(content).map_err(|e| ConfigError::Parse {
            format: "JSON",
            message: e.to_string(),
        })?;

        let signs = as_object(&doc, "baseline document")?;
        let mut table = Self::new();

        for (sign_key, groups) in signs {
            let sign = match VitalSign::from_str(sign_key) {
                Ok(sign) => sign,
                Err(_) => {
                    tracing::warn!(key = %sign_key, "Ignoring unknown vital sign in baselines");
                    continue;
                }
            };

            for (group_key, genders) in as_object(groups, sign_key)? {
                let group = match AgeGroup::from_str(group_key) {
                    Ok(group) => group,
                    Err(_) => {
                        tracing::warn!(key = %group_key, sign = %sign, "Ignoring unknown age group in baselines");
                        continue;
                    }
                };

                for (gender_key, raw) in as_object(genders, group_key)? {
                    let gender = match Gender::from_str(gender_key) {
                        Ok(gender) => gender,
                        Err(_) => {
                            tracing::warn!(key = %gender_key, sign = %sign, "Ignoring unknown gender in baselines");
                            continue;
                        }
                    };

                    let location = format!("{}.{}.{}", sign, group, gender);
                    let range: BaselineRange = serde_json::from_value(raw.clone())
                        .map_err(|e| ConfigError::Invalid(format!("baseline {}: {}", location, e)))?;
                    range
                        .check()
                        .map_err(|e| ConfigError::Invalid(format!("baseline {}: {}", location, e)))?;

                    table.insert(sign, group, gender, range);
                }
            }
        }

        Ok(table)
    }

    /// Load a baseline file
    ///
    /// A missing file yields an empty table and a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Baseline file not found, using empty baselines");
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let table = Self::from_json_str(&content)?;
        tracing::info!(path = %path.display(), ranges = table.len(), "Loaded baselines");
        Ok(table)
    }
}

fn as_object<'a>(
    value: &'a JsonValue,
    context: &str,
) -> Result<&'a serde_json::Map<String, JsonValue>, ConfigError> {
    value
        .as_object()
        .ok_or_else(|| ConfigError::Invalid(format!("{} must be a JSON object", context)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_age_group_boundaries() {
        assert_eq!(AgeGroup::from_age(0), AgeGroup::Infant);
        assert_eq!(AgeGroup::from_age(1), AgeGroup::Child);
        assert_eq!(AgeGroup::from_age(11), AgeGroup::Child);
        assert_eq!(AgeGroup::from_age(12), AgeGroup::Adolescent);
        assert_eq!(AgeGroup::from_age(17), AgeGroup::Adolescent);
        assert_eq!(AgeGroup::from_age(18), AgeGroup::Adult);
        assert_eq!(AgeGroup::from_age(64), AgeGroup::Adult);
        assert_eq!(AgeGroup::from_age(65), AgeGroup::Elderly);
    }

    #[test]
    fn test_parse_document() {
        let table = BaselineTable::from_json_str(
            r#"{
                "heart_rate": {
                    "adult": {
                        "M": {"min": 60, "max": 100, "warning_max": 110},
                        "F": {"min": 65, "max": 105}
                    }
                },
                "spo2": {"elderly": {"F": {"min": 92, "max": 100}}}
            }"#,
        )
        .unwrap();

        assert_eq!(table.len(), 3);
        let range = table
            .get(VitalSign::HeartRate, AgeGroup::Adult, Gender::Male)
            .unwrap();
        assert_eq!(range.warning_max, Some(110.0));
        assert_eq!(range.warning_bounds(), (60.0, 110.0));
        assert!(table
            .get(VitalSign::HeartRate, AgeGroup::Child, Gender::Male)
            .is_none());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let table = BaselineTable::from_json_str(
            r#"{
                "blood_glucose": {"adult": {"M": {"min": 4, "max": 8}}},
                "heart_rate": {
                    "toddler": {"M": {"min": 80, "max": 130}},
                    "adult": {"X": {"min": 60, "max": 100}, "M": {"min": 60, "max": 100}}
                }
            }"#,
        )
        .unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_invalid_documents() {
        assert!(matches!(
            BaselineTable::from_json_str("not json"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            BaselineTable::from_json_str("[1, 2]"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BaselineTable::from_json_str(r#"{"heart_rate": {"adult": {"M": {"min": 100, "max": 60}}}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BaselineTable::from_json_str(r#"{"heart_rate": {"adult": {"M": {"max": 60}}}}"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = BaselineTable::load(dir.path().join("absent.json")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"temperature": {{"child": {{"O": {{"min": 36.0, "max": 37.8}}}}}}}}"#).unwrap();
        file.flush().unwrap();

        let table = BaselineTable::load(file.path()).unwrap();
        assert_eq!(
            table.get(VitalSign::Temperature, AgeGroup::Child, Gender::Other),
            Some(&BaselineRange::new(36.0, 37.8))
        );
    }
}
