//! Hardware-simulated sensor source
//!
//! [`DummySensor`] stands in for a bank of bedside sensors: each vital sign
//! drifts within its normal range between samples and is overlaid with
//! measurement noise, so a noisy sample can occasionally fall outside the
//! admissible bounds and be rejected just like a faulty real device.
//!
//! [`SensorSource`] turns one sensor sweep into one reading for a fixed
//! patient and optionally forwards it through a [`DeliverySink`].

use super::simulated::{normal_range, standard_normal};
use super::traits::{FetchBatch, Source, SourceError, SourceResult};
use crate::clock::{system_clock, Clock};
use crate::reading::{Gender, Reading, VitalSign, Vitals};
use crate::sink::DeliverySink;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One measurement from a single simulated sensor
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    pub sign: VitalSign,
    pub value: f64,
    pub unit: &'static str,
    pub sensor_id: &'static str,
    /// How close the value stayed to the normal range, in [0, 1]
    pub confidence: f64,
}

fn unit(sign: VitalSign) -> &'static str {
    match sign {
        VitalSign::HeartRate | VitalSign::RespiratoryRate => "bpm",
        VitalSign::Temperature => "°C",
        VitalSign::Spo2 => "%",
        VitalSign::SystolicBp | VitalSign::DiastolicBp => "mmHg",
    }
}

fn sensor_id(sign: VitalSign) -> &'static str {
    match sign {
        VitalSign::HeartRate => "hr_sensor",
        VitalSign::Temperature => "temp_sensor",
        VitalSign::Spo2 => "spo2_sensor",
        VitalSign::RespiratoryRate => "resp_sensor",
        VitalSign::SystolicBp | VitalSign::DiastolicBp => "bp_sensor",
    }
}

fn range_size(sign: VitalSign) -> f64 {
    let (lo, hi) = normal_range(sign);
    hi - lo
}

/// Simulated sensor bank with drift and noise
#[derive(Debug)]
pub struct DummySensor {
    noise_level: f64,
    rng: StdRng,
    last_values: HashMap<VitalSign, f64>,
}

impl DummySensor {
    /// Create a sensor bank; `noise_level` is a fraction of each normal range
    pub fn new(noise_level: f64, seed: Option<u64>) -> Self {
        Self {
            noise_level: noise_level.max(0.0),
            rng: seed.map(StdRng::seed_from_u64).unwrap_or_else(StdRng::from_entropy),
            last_values: HashMap::new(),
        }
    }

    fn next_base_value(&mut self, sign: VitalSign) -> f64 {
        let (lo, hi) = normal_range(sign);
        let value = match self.last_values.get(&sign) {
            None => self.rng.gen_range(lo..=hi),
            Some(last) => {
                let max_change = range_size(sign) * 0.1;
                (last + self.rng.gen_range(-max_change..=max_change)).clamp(lo, hi)
            }
        };
        self.last_values.insert(sign, value);
        value
    }

    fn confidence(value: f64, sign: VitalSign) -> f64 {
        let (lo, hi) = normal_range(sign);
        if (lo..=hi).contains(&value) {
            return 1.0;
        }
        let distance = (value - lo).abs().min((value - hi).abs());
        (1.0 - distance / range_size(sign)).max(0.0)
    }

    /// Sample a single vital sign
    pub fn read(&mut self, sign: VitalSign) -> SensorSample {
        let base = self.next_base_value(sign);
        let noise = standard_normal(&mut self.rng) * self.noise_level * range_size(sign);
        let value = base + noise;

        SensorSample {
            sign,
            value,
            unit: unit(sign),
            sensor_id: sensor_id(sign),
            confidence: Self::confidence(value, sign),
        }
    }

    /// Sample every vital sign, in feature order
    pub fn read_all(&mut self) -> Vec<SensorSample> {
        VitalSign::ALL.iter().map(|sign| self.read(*sign)).collect()
    }
}

/// Settings for [`SensorSource`]
#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub patient_id: String,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    pub noise_level: f64,
    pub seed: Option<u64>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            patient_id: "default".to_string(),
            age: None,
            gender: None,
            noise_level: 0.1,
            seed: None,
        }
    }
}

/// Source backed by a [`DummySensor`]
#[derive(Debug)]
pub struct SensorSource {
    name: String,
    config: SensorConfig,
    sensor: Mutex<DummySensor>,
    sink: Option<Arc<dyn DeliverySink>>,
    clock: Arc<dyn Clock>,
}

impl SensorSource {
    pub fn new(config: SensorConfig) -> SourceResult<Self> {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: SensorConfig, clock: Arc<dyn Clock>) -> SourceResult<Self> {
        if config.patient_id.trim().is_empty() {
            return Err(SourceError::Configuration(
                "sensor patient_id must not be empty".to_string(),
            ));
        }
        let sensor = DummySensor::new(config.noise_level, config.seed);

        Ok(Self {
            name: format!("sensor:{}", config.patient_id),
            config,
            sensor: Mutex::new(sensor),
            sink: None,
            clock,
        })
    }

    /// Forward every admitted reading through `sink`
    pub fn with_sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    fn sample(&self) -> Result<Reading, String> {
        let samples = self
            .sensor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .read_all();

        let value = |sign: VitalSign| {
            samples
                .iter()
                .find(|s| s.sign == sign)
                .map(|s| s.value)
                .unwrap_or(f64::NAN)
        };
        let vitals = Vitals {
            heart_rate: value(VitalSign::HeartRate),
            temperature: value(VitalSign::Temperature),
            spo2: value(VitalSign::Spo2),
            respiratory_rate: value(VitalSign::RespiratoryRate),
            systolic_bp: value(VitalSign::SystolicBp),
            diastolic_bp: value(VitalSign::DiastolicBp),
        };

        let mut reading = Reading::new(self.clock.now(), self.config.patient_id.clone(), vitals)
            .map_err(|e| e.to_string())?;
        if let Some(age) = self.config.age {
            reading = reading.with_age(age);
        }
        if let Some(gender) = self.config.gender {
            reading = reading.with_gender(gender);
        }
        Ok(reading)
    }
}

#[async_trait::async_trait]
impl Source for SensorSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> SourceResult<FetchBatch> {
        let mut batch = FetchBatch::empty();
        match self.sample() {
            Ok(reading) => {
                if let Some(ref sink) = self.sink {
                    if !sink.send(&reading).await {
                        tracing::warn!(
                            source = %self.name,
                            sink = sink.name(),
                            "Failed to deliver sensor reading"
                        );
                    }
                }
                batch.readings.push(reading);
            }
            Err(reason) => batch.skip(self.name.clone(), reason),
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;

    #[test]
    fn test_drift_stays_within_normal_range() {
        let mut sensor = DummySensor::new(0.0, Some(3));
        for _ in 0..100 {
            for sample in sensor.read_all() {
                let (lo, hi) = normal_range(sample.sign);
                assert!((lo..=hi).contains(&sample.value));
                assert_eq!(sample.confidence, 1.0);
            }
        }
    }

    #[test]
    fn test_sample_metadata() {
        let mut sensor = DummySensor::new(0.1, Some(3));
        let sample = sensor.read(VitalSign::DiastolicBp);
        assert_eq!(sample.unit, "mmHg");
        assert_eq!(sample.sensor_id, "bp_sensor");
        assert!((0.0..=1.0).contains(&sample.confidence));
    }

    #[tokio::test]
    async fn test_noiseless_sensor_yields_reading_and_delivers() {
        let (sink, mut rx) = ChannelSink::new("vital_signs", 8);
        let source = SensorSource::new(SensorConfig {
            patient_id: "BED_4".to_string(),
            age: Some(70),
            gender: Some(Gender::Female),
            noise_level: 0.0,
            seed: Some(11),
        })
        .unwrap()
        .with_sink(Arc::new(sink));

        let batch = source.fetch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.readings[0].patient_id(), "BED_4");
        assert_eq!(batch.readings[0].age(), Some(70));

        let delivered = rx.recv().await.unwrap();
        assert_eq!(&delivered, &batch.readings[0]);
    }

    #[tokio::test]
    async fn test_very_noisy_sensor_reports_skips() {
        let source = SensorSource::new(SensorConfig {
            noise_level: 50.0,
            seed: Some(5),
            ..Default::default()
        })
        .unwrap();

        let mut skipped = 0;
        for _ in 0..20 {
            let batch = source.fetch().await.unwrap();
            skipped += batch.skipped.len();
            assert_eq!(batch.len() + batch.skipped.len(), 1);
        }
        assert!(skipped > 0);
    }

    #[test]
    fn test_empty_patient_is_configuration_error() {
        let config = SensorConfig {
            patient_id: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            SensorSource::new(config),
            Err(SourceError::Configuration(_))
        ));
    }
}
