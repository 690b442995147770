//! Synthetic reading stream
//!
//! Emits one random reading per call, emulating a device that samples at a
//! fixed cadence: a call made before `min_interval` has elapsed since the
//! previous sample returns an empty batch instead of sleeping.

use super::traits::{FetchBatch, Source, SourceError, SourceResult};
use crate::clock::{system_clock, Clock};
use crate::reading::{Gender, Reading, ValidationError, VitalSign, Vitals};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Typical resting range for a vital sign
pub fn normal_range(sign: VitalSign) -> (f64, f64) {
    match sign {
        VitalSign::HeartRate => (60.0, 100.0),
        VitalSign::Temperature => (36.5, 37.5),
        VitalSign::Spo2 => (95.0, 100.0),
        VitalSign::RespiratoryRate => (12.0, 20.0),
        VitalSign::SystolicBp => (110.0, 140.0),
        VitalSign::DiastolicBp => (60.0, 90.0),
    }
}

/// Standard normal sample via Box-Muller
pub fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Draw a full set of vitals, from the normal ranges or across the whole
/// admissible range when `abnormal` is set
pub fn random_vitals<R: Rng>(rng: &mut R, abnormal: bool) -> Vitals {
    let mut draw = |sign: VitalSign| {
        let (lo, hi) = if abnormal { sign.bounds() } else { normal_range(sign) };
        rng.gen_range(lo..=hi)
    };

    Vitals {
        heart_rate: draw(VitalSign::HeartRate),
        temperature: draw(VitalSign::Temperature),
        spo2: draw(VitalSign::Spo2),
        respiratory_rate: draw(VitalSign::RespiratoryRate),
        systolic_bp: draw(VitalSign::SystolicBp),
        diastolic_bp: draw(VitalSign::DiastolicBp),
    }
}

/// Spacing between readings in a mock dataset
pub const DATASET_INTERVAL_MINUTES: i64 = 5;

/// Longest dataset span accepted by callers that take user input (ten years)
pub const MAX_DATASET_HOURS: u32 = 10 * 365 * 24;

/// Build a mock dataset: one reading every five minutes per patient,
/// covering the `hours` leading up to `end`
///
/// Patients are named `PATIENT_1..=patients` and keep a fixed age and
/// gender. Each reading independently uses the abnormal pattern with
/// probability `abnormal_probability`.
pub fn mock_dataset<R: Rng>(
    rng: &mut R,
    patients: usize,
    hours: u32,
    abnormal_probability: f64,
    end: DateTime<Utc>,
) -> Result<Vec<Reading>, ValidationError> {
    let probability = abnormal_probability.clamp(0.0, 1.0);
    let start = chrono::Duration::try_hours(i64::from(hours))
        .and_then(|span| end.checked_sub_signed(span))
        .ok_or_else(|| ValidationError::InvalidTimestamp(format!("{} hours before {}", hours, end)))?;
    let step = chrono::Duration::minutes(DATASET_INTERVAL_MINUTES);
    let mut readings = Vec::new();

    for n in 1..=patients {
        let patient_id = format!("PATIENT_{}", n);
        let age = rng.gen_range(18..=90);
        let gender = if rng.gen_bool(0.5) {
            Gender::Male
        } else {
            Gender::Female
        };

        let mut ts = start;
        while ts <= end {
            let abnormal = rng.gen_bool(probability);
            let vitals = random_vitals(rng, abnormal);
            readings.push(
                Reading::new(ts, patient_id.clone(), vitals)?
                    .with_age(age)
                    .with_gender(gender),
            );
            ts = match ts.checked_add_signed(step) {
                Some(next) => next,
                None => break,
            };
        }
    }

    Ok(readings)
}

/// Settings for [`SimulatedSource`]
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Minimum spacing between two samples
    pub min_interval: Duration,
    /// Probability that a sample uses the abnormal pattern
    pub abnormal_probability: f64,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            abnormal_probability: 0.2,
            seed: None,
        }
    }
}

#[derive(Debug)]
struct SimulationState {
    rng: StdRng,
    last_sample: Option<DateTime<Utc>>,
}

/// Random reading generator with an enforced sampling cadence
#[derive(Debug)]
pub struct SimulatedSource {
    config: SimulationConfig,
    min_interval: chrono::Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<SimulationState>,
}

impl SimulatedSource {
    /// Create a source driven by the system clock
    pub fn new(config: SimulationConfig) -> SourceResult<Self> {
        Self::with_clock(config, system_clock())
    }

    /// Create a source driven by an explicit clock
    pub fn with_clock(config: SimulationConfig, clock: Arc<dyn Clock>) -> SourceResult<Self> {
        if !(0.0..=1.0).contains(&config.abnormal_probability) {
            return Err(SourceError::Configuration(format!(
                "abnormal_probability must be within [0, 1], got {}",
                config.abnormal_probability
            )));
        }
        let min_interval = chrono::Duration::from_std(config.min_interval)
            .map_err(|e| SourceError::Configuration(format!("min_interval: {}", e)))?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            config,
            min_interval,
            clock,
            state: Mutex::new(SimulationState {
                rng,
                last_sample: None,
            }),
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn generate(&self, state: &mut SimulationState, now: DateTime<Utc>) -> Result<Reading, ValidationError> {
        let rng = &mut state.rng;
        let abnormal = rng.gen_bool(self.config.abnormal_probability);
        let vitals = random_vitals(rng, abnormal);
        let patient_id = format!("PATIENT_{}", rng.gen_range(1..=100));
        let age = rng.gen_range(18..=90);
        let gender = if rng.gen_bool(0.5) {
            Gender::Male
        } else {
            Gender::Female
        };

        Ok(Reading::new(now, patient_id, vitals)?
            .with_age(age)
            .with_gender(gender))
    }
}

#[async_trait::async_trait]
impl Source for SimulatedSource {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn fetch(&self) -> SourceResult<FetchBatch> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(last) = state.last_sample {
            if now - last < self.min_interval {
                tracing::trace!(
                    elapsed_ms = (now - last).num_milliseconds(),
                    "Sample requested before interval elapsed"
                );
                return Ok(FetchBatch::empty());
            }
        }

        state.last_sample = Some(now);
        let mut batch = FetchBatch::empty();
        let result = self.generate(&mut state, now);
        batch.admit("simulated", result);
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn source(clock: Arc<ManualClock>) -> SimulatedSource {
        SimulatedSource::with_clock(
            SimulationConfig {
                min_interval: Duration::from_secs(1),
                abnormal_probability: 0.2,
                seed: Some(7),
            },
            clock,
        )
        .unwrap()
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_calls_faster_than_interval_are_empty() {
        let clock = Arc::new(ManualClock::new(start()));
        let source = source(clock.clone());

        assert_eq!(source.fetch().await.unwrap().len(), 1);
        clock.advance(chrono::Duration::milliseconds(300));
        assert!(source.fetch().await.unwrap().is_empty());
        clock.advance(chrono::Duration::milliseconds(300));
        assert!(source.fetch().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spaced_calls_each_produce_a_reading() {
        let clock = Arc::new(ManualClock::new(start()));
        let source = source(clock.clone());

        for _ in 0..3 {
            let batch = source.fetch().await.unwrap();
            assert_eq!(batch.len(), 1);
            let reading = &batch.readings[0];
            assert_eq!(reading.timestamp(), clock.now());
            assert!(reading.patient_id().starts_with("PATIENT_"));
            assert!((18..=90).contains(&reading.age().unwrap()));
            clock.advance(chrono::Duration::seconds(1));
        }
    }

    #[test]
    fn test_rejects_bad_probability() {
        let config = SimulationConfig {
            abnormal_probability: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            SimulatedSource::new(config),
            Err(SourceError::Configuration(_))
        ));
    }

    #[test]
    fn test_mock_dataset_cadence() {
        let mut rng = StdRng::seed_from_u64(2);
        let readings = mock_dataset(&mut rng, 3, 2, 0.2, start()).unwrap();

        // 2 hours at 5 minute spacing, both ends included
        assert_eq!(readings.len(), 3 * 25);
        let first: Vec<_> = readings
            .iter()
            .filter(|r| r.patient_id() == "PATIENT_1")
            .collect();
        assert_eq!(first.len(), 25);
        assert_eq!(first[0].timestamp(), start() - chrono::Duration::hours(2));
        assert_eq!(first[24].timestamp(), start());
        assert!(first.iter().all(|r| r.age() == first[0].age()));
    }

    #[test]
    fn test_mock_dataset_rejects_span_before_time_range() {
        let mut rng = StdRng::seed_from_u64(2);
        let err = mock_dataset(&mut rng, 1, u32::MAX, 0.0, start()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTimestamp(_)));

        let earliest = DateTime::<Utc>::MIN_UTC + chrono::Duration::minutes(7);
        let readings = mock_dataset(&mut rng, 1, 1, 0.0, earliest);
        assert!(matches!(readings, Err(ValidationError::InvalidTimestamp(_))));
    }

    #[test]
    fn test_random_vitals_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..200 {
            let normal = random_vitals(&mut rng, false);
            for sign in VitalSign::ALL {
                let (lo, hi) = normal_range(sign);
                assert!((lo..=hi).contains(&normal.get(sign)));
            }
            let abnormal = random_vitals(&mut rng, true);
            for sign in VitalSign::ALL {
                let (lo, hi) = sign.bounds();
                assert!((lo..=hi).contains(&abnormal.get(sign)));
            }
        }
    }
}
