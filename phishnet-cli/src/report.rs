//! Console rendering of scan results.

use std::fmt::Write as _;

use phishnet_ml::{PredictionResult, ScanHistory};
use serde::Serialize;
use time::macros::format_description;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanReport {
    pub fn success(url: &str, prediction: PredictionResult) -> Self {
        Self {
            url: url.to_string(),
            prediction: Some(prediction),
            error: None,
        }
    }

    pub fn failure(url: &str, error: impl ToString) -> Self {
        Self {
            url: url.to_string(),
            prediction: None,
            error: Some(error.to_string()),
        }
    }
}

pub fn print_reports(reports: &[ScanReport], history: &ScanHistory, format: OutputFormat) {
    match format {
        OutputFormat::Text => print!("{}", render_text(reports, history)),
        OutputFormat::Json => println!("{}", render_json(reports)),
    }
}

pub fn render_text(reports: &[ScanReport], history: &ScanHistory) -> String {
    let mut out = String::new();
    let rule = "=".repeat(70);
    for report in reports {
        let _ = writeln!(out, "\n{rule}");
        let _ = writeln!(out, "{}", report.url);
        let _ = writeln!(out, "{rule}");
        match (&report.prediction, &report.error) {
            (Some(prediction), _) => write_prediction(&mut out, prediction),
            (None, Some(error)) => {
                let _ = writeln!(out, "  analysis failed: {error}");
            }
            (None, None) => {
                let _ = writeln!(out, "  analysis failed");
            }
        }
    }

    if !history.is_empty() {
        let _ = writeln!(out, "\nRECENT SCANS ({}):", history.len());
        let format = format_description!("[hour]:[minute]:[second]");
        for entry in history.iter() {
            let time = entry.timestamp.format(format).unwrap_or_default();
            let verdict = if entry.label { "PHISHING" } else { "legit" };
            let _ = writeln!(
                out,
                "  {time}  {verdict:<8} {:>6.1}%  {}",
                entry.confidence * 100.0,
                entry.url
            );
        }
    }
    out
}

fn write_prediction(out: &mut String, prediction: &PredictionResult) {
    let _ = writeln!(
        out,
        "  verdict:     {} ({:.1}% confidence)",
        prediction.verdict().to_uppercase(),
        prediction.confidence * 100.0
    );
    let _ = writeln!(
        out,
        "  p(phishing): {:.4}  (baseline {:.4})",
        prediction.phishing_probability, prediction.base_value
    );
    let _ = writeln!(out, "\n  {:<28} {:>10} {:>12}", "feature", "value", "attribution");
    for entry in prediction.attribution.ranked() {
        let value = if entry.value < 0.0 {
            "n/a".to_string()
        } else {
            format!("{}", entry.value)
        };
        let _ = writeln!(
            out,
            "  {:<28} {:>10} {:>+12.4}",
            entry.feature.label(),
            value,
            entry.attribution_score
        );
    }
}

pub fn render_json(reports: &[ScanReport]) -> String {
    let output = serde_json::json!({
        "results": reports,
        "summary": {
            "total": reports.len(),
            "phishing": reports.iter().filter(|r| r.prediction.as_ref().is_some_and(|p| p.label)).count(),
            "legitimate": reports.iter().filter(|r| r.prediction.as_ref().is_some_and(|p| !p.label)).count(),
            "errors": reports.iter().filter(|r| r.error.is_some()).count(),
        }
    });
    serde_json::to_string_pretty(&output).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_reported_per_url() {
        let reports = vec![ScanReport::failure("https://broken.example/", "model error")];
        let text = render_text(&reports, &ScanHistory::default());
        assert!(text.contains("https://broken.example/"));
        assert!(text.contains("analysis failed: model error"));
        assert!(!text.contains("RECENT SCANS"));

        let json: serde_json::Value = serde_json::from_str(&render_json(&reports)).unwrap();
        assert_eq!(json["summary"]["errors"], 1);
        assert_eq!(json["results"][0]["error"], "model error");
        assert!(json["results"][0].get("prediction").is_none());
    }
}
