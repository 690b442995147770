//! Output formatting for analyses
//!
//! JSON output prints one analysis per line so it can be piped into other
//! tools. Text output prints a compact human-readable line per analysis
//! followed by indented alerts.

use clap::ValueEnum;
use serde::Serialize;
use std::io::{self, Write};
use vitalwatch_core::{Analysis, Severity};

/// Output format options
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug, Default)]
pub enum OutputFormat {
    /// JSON lines for machine processing
    #[default]
    Json,
    /// Human-readable text
    Text,
}

/// Running totals over a command's analyses
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub readings: usize,
    pub warnings: usize,
    pub critical: usize,
    pub anomalies: usize,
}

impl Summary {
    pub fn record(&mut self, analysis: &Analysis) {
        self.readings += 1;
        match analysis.highest_severity() {
            Severity::Critical => self.critical += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Normal => {}
        }
        if analysis.is_anomalous() {
            self.anomalies += 1;
        }
    }

    /// Whether anything needs attention
    pub fn flagged(&self) -> bool {
        self.warnings + self.critical + self.anomalies > 0
    }
}

/// Format one analysis as a text block
pub fn format_text(analysis: &Analysis) -> String {
    let reading = &analysis.reading;
    let vitals = reading.vitals();
    let mut out = format!(
        "{} {} [{}] HR {:.0} T {:.1} SpO2 {:.0} RR {:.0} BP {:.0}/{:.0} -> {}",
        reading.timestamp().format("%Y-%m-%d %H:%M:%S"),
        reading.patient_id(),
        analysis.source,
        vitals.heart_rate,
        vitals.temperature,
        vitals.spo2,
        vitals.respiratory_rate,
        vitals.systolic_bp,
        vitals.diastolic_bp,
        analysis.highest_severity(),
    );

    if let Some(ref verdict) = analysis.anomaly {
        out.push_str(&format!(
            " (anomaly: {}, confidence {:.2})",
            if verdict.is_anomaly { "yes" } else { "no" },
            verdict.confidence
        ));
    }

    for alert in analysis.alerts.iter().filter(|a| a.is_actionable()) {
        out.push_str(&format!(
            "\n  {:<8} {} ({:.1}, baseline {:.1}-{:.1})",
            alert.severity.as_str(),
            alert.message,
            alert.value,
            alert.baseline_min,
            alert.baseline_max
        ));
    }
    out
}

/// Write one analysis to `out`
pub fn write_analysis<W: Write>(out: &mut W, analysis: &Analysis, format: OutputFormat) -> io::Result<()> {
    match format {
        OutputFormat::Json => {
            let line = serde_json::to_string(analysis).map_err(io::Error::from)?;
            writeln!(out, "{}", line)
        }
        OutputFormat::Text => writeln!(out, "{}", format_text(analysis)),
    }
}

/// Write the closing summary to `out`
pub fn write_summary<W: Write>(out: &mut W, summary: &Summary, format: OutputFormat) -> io::Result<()> {
    match format {
        OutputFormat::Json => {
            let line = serde_json::to_string(&serde_json::json!({ "summary": summary }))
                .map_err(io::Error::from)?;
            writeln!(out, "{}", line)
        }
        OutputFormat::Text => writeln!(
            out,
            "{} reading(s): {} warning, {} critical, {} anomalous",
            summary.readings, summary.warnings, summary.critical, summary.anomalies
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use vitalwatch_core::baseline::{compare, BaselineRange};
    use vitalwatch_core::{Reading, VitalSign, Vitals};

    fn analysis(heart_rate: f64) -> Analysis {
        let reading = Reading::new(
            Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap(),
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
        .unwrap();
        let range = BaselineRange::new(60.0, 100.0).with_warning_max(110.0);
        let alert = compare(VitalSign::HeartRate, heart_rate, &range);

        serde_json::from_value(serde_json::json!({
            "cycle_id": "00000000-0000-0000-0000-000000000000",
            "source": "test",
            "reading": reading,
            "alerts": [alert],
            "anomaly": null,
        }))
        .unwrap()
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = Summary::default();
        summary.record(&analysis(80.0));
        assert!(!summary.flagged());

        summary.record(&analysis(105.0));
        summary.record(&analysis(120.0));
        assert_eq!(
            summary,
            Summary {
                readings: 3,
                warnings: 1,
                critical: 1,
                anomalies: 0,
            }
        );
        assert!(summary.flagged());
    }

    #[test]
    fn test_text_format_lists_actionable_alerts() {
        let text = format_text(&analysis(105.0));
        assert!(text.starts_with("2024-02-03 04:05:06 P1 [test] HR 105"));
        assert!(text.contains("-> WARNING"));
        assert!(text.contains("heart_rate is high"));

        let normal = format_text(&analysis(80.0));
        assert!(!normal.contains('\n'));
    }

    #[test]
    fn test_json_lines() {
        let mut buf = Vec::new();
        write_analysis(&mut buf, &analysis(80.0), OutputFormat::Json).unwrap();
        write_summary(&mut buf, &Summary::default(), OutputFormat::Json).unwrap();

        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["reading"]["patient_id"], "P1");
        assert_eq!(first["alerts"][0]["severity"], "NORMAL");
    }
}
