//! Validated vital-sign readings
//!
//! A [`Reading`] is the unit of data that flows through the pipeline. It can
//! only be built through validation, so every `Reading` held anywhere in the
//! system is within the absolute physiological bounds of [`VitalSign`].
//!
//! Sources decode their wire formats into a [`ReadingRecord`] first and then
//! convert with `Reading::try_from`, which keeps parsing and validation in
//! one place for CSV rows, JSON objects and simulated samples alike.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised when a reading fails validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A vital sign is outside its absolute bound
    #[error("{sign} value {value} outside allowed range [{min}, {max}]")]
    OutOfRange {
        sign: VitalSign,
        value: f64,
        min: f64,
        max: f64,
    },

    /// A vital sign is NaN or infinite
    #[error("{0} value is not a finite number")]
    NotFinite(VitalSign),

    /// The patient identifier is empty
    #[error("patient id must not be empty")]
    EmptyPatientId,

    /// The timestamp could not be parsed
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    /// The gender token is not recognised
    #[error("unknown gender token '{0}'")]
    UnknownGender(String),
}

/// The six measured vital signs, in feature order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalSign {
    HeartRate,
    Temperature,
    Spo2,
    RespiratoryRate,
    SystolicBp,
    DiastolicBp,
}

impl VitalSign {
    /// All signs in stable feature order
    pub const ALL: [VitalSign; 6] = [
        VitalSign::HeartRate,
        VitalSign::Temperature,
        VitalSign::Spo2,
        VitalSign::RespiratoryRate,
        VitalSign::SystolicBp,
        VitalSign::DiastolicBp,
    ];

    /// Field name used in every record format
    pub fn as_str(&self) -> &'static str {
        match self {
            VitalSign::HeartRate => "heart_rate",
            VitalSign::Temperature => "temperature",
            VitalSign::Spo2 => "spo2",
            VitalSign::RespiratoryRate => "respiratory_rate",
            VitalSign::SystolicBp => "systolic_bp",
            VitalSign::DiastolicBp => "diastolic_bp",
        }
    }

    /// Absolute physiological bound (inclusive)
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            VitalSign::HeartRate => (40.0, 200.0),
            VitalSign::Temperature => (35.0, 42.0),
            VitalSign::Spo2 => (70.0, 100.0),
            VitalSign::RespiratoryRate => (8.0, 40.0),
            VitalSign::SystolicBp => (70.0, 200.0),
            VitalSign::DiastolicBp => (40.0, 120.0),
        }
    }

    /// Position in the feature vector
    pub fn index(&self) -> usize {
        *self as usize
    }

    fn check(&self, value: f64) -> Result<f64, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NotFinite(*self));
        }
        let (min, max) = self.bounds();
        if value < min || value > max {
            return Err(ValidationError::OutOfRange {
                sign: *self,
                value,
                min,
                max,
            });
        }
        Ok(value)
    }
}

impl fmt::Display for VitalSign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VitalSign {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VitalSign::ALL
            .iter()
            .copied()
            .find(|sign| sign.as_str() == s)
            .ok_or_else(|| format!("unknown vital sign '{}'", s))
    }
}

/// Patient gender token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M", alias = "m", alias = "male", alias = "Male")]
    Male,
    #[serde(rename = "F", alias = "f", alias = "female", alias = "Female")]
    Female,
    #[serde(rename = "O", alias = "o", alias = "other", alias = "Other")]
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
            Gender::Other => "O",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" | "male" => Ok(Gender::Male),
            "f" | "female" => Ok(Gender::Female),
            "o" | "other" => Ok(Gender::Other),
            _ => Err(ValidationError::UnknownGender(s.to_string())),
        }
    }
}

/// The six measured values of a reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub heart_rate: f64,
    pub temperature: f64,
    pub spo2: f64,
    pub respiratory_rate: f64,
    pub systolic_bp: f64,
    pub diastolic_bp: f64,
}

impl Vitals {
    /// Value of a single sign
    pub fn get(&self, sign: VitalSign) -> f64 {
        match sign {
            VitalSign::HeartRate => self.heart_rate,
            VitalSign::Temperature => self.temperature,
            VitalSign::Spo2 => self.spo2,
            VitalSign::RespiratoryRate => self.respiratory_rate,
            VitalSign::SystolicBp => self.systolic_bp,
            VitalSign::DiastolicBp => self.diastolic_bp,
        }
    }

    /// Values in feature order
    pub fn to_array(&self) -> [f64; 6] {
        VitalSign::ALL.map(|sign| self.get(sign))
    }

    fn validate(&self) -> Result<(), ValidationError> {
        for sign in VitalSign::ALL {
            sign.check(self.get(sign))?;
        }
        Ok(())
    }
}

/// Wire shape of a reading, shared by every record format
///
/// Fields use the names of the tabular and JSON formats. The timestamp is
/// kept as text so that both RFC 3339 and naive ISO-8601 inputs are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingRecord {
    pub timestamp: String,
    pub patient_id: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<Gender>,
    pub heart_rate: f64,
    pub temperature: f64,
    pub spo2: f64,
    pub respiratory_rate: f64,
    pub systolic_bp: f64,
    pub diastolic_bp: f64,
}

/// An immutable, validated vital-sign measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ReadingRecord", into = "ReadingRecord")]
pub struct Reading {
    timestamp: DateTime<Utc>,
    patient_id: String,
    age: Option<u32>,
    gender: Option<Gender>,
    vitals: Vitals,
}

impl Reading {
    /// Build a reading, validating every field
    pub fn new(
        timestamp: DateTime<Utc>,
        patient_id: impl Into<String>,
        vitals: Vitals,
    ) -> Result<Self, ValidationError> {
        let patient_id = patient_id.into();
        if patient_id.trim().is_empty() {
            return Err(ValidationError::EmptyPatientId);
        }
        vitals.validate()?;

        Ok(Self {
            timestamp,
            patient_id,
            age: None,
            gender: None,
            vitals,
        })
    }

    /// Attach the patient's age in years
    pub fn with_age(mut self, age: u32) -> Self {
        self.age = Some(age);
        self
    }

    /// Attach the patient's gender
    pub fn with_gender(mut self, gender: Gender) -> Self {
        self.gender = Some(gender);
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    pub fn age(&self) -> Option<u32> {
        self.age
    }

    pub fn gender(&self) -> Option<Gender> {
        self.gender
    }

    pub fn vitals(&self) -> &Vitals {
        &self.vitals
    }

    /// Value of a single sign
    pub fn value(&self, sign: VitalSign) -> f64 {
        self.vitals.get(sign)
    }
}

impl TryFrom<ReadingRecord> for Reading {
    type Error = ValidationError;

    fn try_from(record: ReadingRecord) -> Result<Self, Self::Error> {
        let timestamp = parse_timestamp(&record.timestamp)?;
        let vitals = Vitals {
            heart_rate: record.heart_rate,
            temperature: record.temperature,
            spo2: record.spo2,
            respiratory_rate: record.respiratory_rate,
            systolic_bp: record.systolic_bp,
            diastolic_bp: record.diastolic_bp,
        };

        let mut reading = Reading::new(timestamp, record.patient_id, vitals)?;
        reading.age = record.age;
        reading.gender = record.gender;
        Ok(reading)
    }
}

impl From<Reading> for ReadingRecord {
    fn from(reading: Reading) -> Self {
        ReadingRecord {
            timestamp: format_timestamp(&reading.timestamp),
            patient_id: reading.patient_id,
            age: reading.age,
            gender: reading.gender,
            heart_rate: reading.vitals.heart_rate,
            temperature: reading.vitals.temperature,
            spo2: reading.vitals.spo2,
            respiratory_rate: reading.vitals.respiratory_rate,
            systolic_bp: reading.vitals.systolic_bp,
            diastolic_bp: reading.vitals.diastolic_bp,
        }
    }
}

/// Parse RFC 3339, or naive ISO-8601 interpreted as UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(ValidationError::InvalidTimestamp(raw.to_string()))
}

/// RFC 3339 with as many fractional digits as needed
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn normal_vitals() -> Vitals {
        Vitals {
            heart_rate: 72.0,
            temperature: 36.8,
            spo2: 98.0,
            respiratory_rate: 16.0,
            systolic_bp: 120.0,
            diastolic_bp: 80.0,
        }
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_valid_reading() {
        let reading = Reading::new(ts(), "P1", normal_vitals())
            .unwrap()
            .with_age(40)
            .with_gender(Gender::Female);

        assert_eq!(reading.patient_id(), "P1");
        assert_eq!(reading.age(), Some(40));
        assert_eq!(reading.gender(), Some(Gender::Female));
        assert_eq!(reading.value(VitalSign::Spo2), 98.0);
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let mut vitals = normal_vitals();
        vitals.heart_rate = 40.0;
        vitals.spo2 = 100.0;
        assert!(Reading::new(ts(), "P1", vitals).is_ok());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut vitals = normal_vitals();
        vitals.temperature = 42.5;

        let err = Reading::new(ts(), "P1", vitals).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfRange { sign: VitalSign::Temperature, .. }
        ));
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn test_nan_rejected() {
        let mut vitals = normal_vitals();
        vitals.respiratory_rate = f64::NAN;
        assert_eq!(
            Reading::new(ts(), "P1", vitals).unwrap_err(),
            ValidationError::NotFinite(VitalSign::RespiratoryRate)
        );
    }

    #[test]
    fn test_empty_patient_rejected() {
        assert_eq!(
            Reading::new(ts(), "  ", normal_vitals()).unwrap_err(),
            ValidationError::EmptyPatientId
        );
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T10:00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01 10:00:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01T10:00:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-01T12:00:00+02:00").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let reading = Reading::new(ts(), "P7", normal_vitals())
            .unwrap()
            .with_age(70)
            .with_gender(Gender::Male);

        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("\"gender\":\"M\""));
        assert!(json.contains("\"heart_rate\":72.0"));

        let parsed: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, reading);
    }

    #[test]
    fn test_deserialize_rejects_invalid() {
        let json = r#"{"timestamp":"2024-01-01T10:00:00","patient_id":"P1",
            "heart_rate":250,"temperature":37,"spo2":98,"respiratory_rate":16,
            "systolic_bp":120,"diastolic_bp":80}"#;
        assert!(serde_json::from_str::<Reading>(json).is_err());
    }

    #[test]
    fn test_gender_parsing() {
        assert_eq!("male".parse::<Gender>().unwrap(), Gender::Male);
        assert_eq!("F".parse::<Gender>().unwrap(), Gender::Female);
        assert!("x".parse::<Gender>().is_err());
    }

    #[test]
    fn test_vital_sign_names() {
        for sign in VitalSign::ALL {
            assert_eq!(sign.as_str().parse::<VitalSign>().unwrap(), sign);
        }
        assert_eq!(VitalSign::DiastolicBp.index(), 5);
    }

    fn vitals_within_bounds() -> impl Strategy<Value = Vitals> {
        (
            40.0..=200.0f64,
            35.0..=42.0f64,
            70.0..=100.0f64,
            8.0..=40.0f64,
            70.0..=200.0f64,
            40.0..=120.0f64,
        )
            .prop_map(|(hr, t, s, rr, sys, dia)| Vitals {
                heart_rate: hr,
                temperature: t,
                spo2: s,
                respiratory_rate: rr,
                systolic_bp: sys,
                diastolic_bp: dia,
            })
    }

    proptest! {
        #[test]
        fn prop_in_bounds_always_accepted(vitals in vitals_within_bounds()) {
            prop_assert!(Reading::new(ts(), "P1", vitals).is_ok());
        }

        #[test]
        fn prop_any_field_out_of_bounds_rejected(
            vitals in vitals_within_bounds(),
            index in 0usize..6,
            excess in 0.001..1000.0f64,
            below in any::<bool>(),
        ) {
            let sign = VitalSign::ALL[index];
            let (min, max) = sign.bounds();
            let bad = if below { min - excess } else { max + excess };

            let mut values = vitals.to_array();
            values[index] = bad;
            let vitals = Vitals {
                heart_rate: values[0],
                temperature: values[1],
                spo2: values[2],
                respiratory_rate: values[3],
                systolic_bp: values[4],
                diastolic_bp: values[5],
            };

            let is_out_of_range = matches!(
                Reading::new(ts(), "P1", vitals),
                Err(ValidationError::OutOfRange { sign: s, .. }) if s == sign
            );
            prop_assert!(is_out_of_range);
        }
    }
}
