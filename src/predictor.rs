//! Predict on a collected record and present the outcome.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{info, warn};

use crate::align::{EncodingOptions, align};
use crate::model::Model;
use crate::utils::{Prediction, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(anyhow!("unknown output format `{other}`; expected text or json")),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
        })
    }
}

/// Encoding used for a model: its own hints, with `drop_first` forced on when asked.
pub fn encoding_for(model: &Model, force_drop_first: bool) -> EncodingOptions {
    let mut encoding = model.encoding().clone();
    encoding.drop_first |= force_drop_first;
    encoding
}

/// Align `record` to the model's columns and predict.
pub fn predict_record(model: &Model, record: &Record, force_drop_first: bool) -> Result<Prediction> {
    let target = model.feature_names()?;
    let encoding = encoding_for(model, force_drop_first);
    let row = align(record, target, &encoding).context("failed to align form to model features")?;
    let prediction = model.predict(&row).context("prediction failed")?;
    info!(
        label = %prediction.label,
        score = ?prediction.score,
        columns = row.len(),
        "prediction complete"
    );
    Ok(prediction)
}

/// Score as a percentage rounded to two decimals.
pub fn score_percent(score: f64) -> f64 {
    (score * 10_000.0).round() / 100.0
}

#[derive(Serialize)]
struct JsonOutcome<'a> {
    label: &'a str,
    score: Option<f64>,
    model: &'a str,
}

pub fn render(prediction: &Prediction, origin: &str, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let mut out = format!("Prediction: {}", prediction.label);
            if let Some(score) = prediction.score {
                out.push_str(&format!("\nConfidence score: {:.2}%", score_percent(score)));
            }
            out
        }
        OutputFormat::Json => {
            let outcome = JsonOutcome {
                label: &prediction.label,
                score: prediction.score,
                model: origin,
            };
            // A struct of strings and an optional float always serializes.
            serde_json::to_string(&outcome).unwrap_or_default()
        }
    }
}

pub fn render_error(err: &anyhow::Error, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format!("Error: {err:#}"),
        OutputFormat::Json => serde_json::json!({ "error": format!("{err:#}") }).to_string(),
    }
}

/// Write the outcome of one submission; errors are rendered, not propagated.
///
/// `origin` names the model source; returns whether the submission succeeded.
pub fn present<W: Write>(
    outcome: &Result<Prediction>,
    origin: &str,
    format: OutputFormat,
    out: &mut W,
) -> Result<bool> {
    let (text, ok) = match outcome {
        Ok(prediction) => (render(prediction, origin, format), true),
        Err(err) => {
            warn!(origin, err = %format!("{err:#}"), "submission failed");
            (render_error(err, format), false)
        }
    };
    writeln!(out, "{text}").context("failed to write result")?;
    Ok(ok)
}
