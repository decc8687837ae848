//! Patient forms: typed field schemas and answer collection.
//!
//! Answers arrive as `name=value` strings (from flags, an answers file, or
//! interactive prompts) and are validated against a [`FormSchema`] into a
//! single-row [`Record`] in schema order.

use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, Write};
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::{debug, info};

use crate::utils::{FieldValue, Record, normalize_key};

#[derive(Debug, Error, PartialEq)]
pub enum FormError {
    #[error("unknown form `{0}`; expected basic, regional or clinical")]
    UnknownForm(String),
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("malformed field `{0}`; expected NAME=VALUE")]
    Malformed(String),
    #[error("field `{field}`: `{value}` is not a valid {expected}")]
    InvalidNumber {
        field: String,
        value: String,
        expected: &'static str,
    },
    #[error("field `{field}`: {value} is outside {min}..={max}")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },
    #[error("field `{field}`: `{value}` is not one of [{options}]")]
    NotAnOption {
        field: String,
        value: String,
        options: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Int { min: i64, max: i64, default: i64 },
    Float { min: f64, max: f64, default: f64 },
    /// Single choice kept as text; the first option is the default.
    Choice { options: &'static [&'static str] },
    /// Single choice the form expands itself into `<name>_<option>` booleans.
    Indicator { options: &'static [&'static str] },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    fn int(name: &'static str, label: &'static str, min: i64, max: i64, default: i64) -> Self {
        Self {
            name,
            label,
            kind: FieldKind::Int { min, max, default },
        }
    }

    fn float(name: &'static str, label: &'static str, min: f64, max: f64, default: f64) -> Self {
        Self {
            name,
            label,
            kind: FieldKind::Float { min, max, default },
        }
    }

    fn choice(name: &'static str, label: &'static str, options: &'static [&'static str]) -> Self {
        Self {
            name,
            label,
            kind: FieldKind::Choice { options },
        }
    }

    /// Human-readable type and range, used by prompts and `schema`.
    pub fn hint(&self) -> String {
        match &self.kind {
            FieldKind::Int { min, max, .. } => format!("integer {min}..={max}"),
            FieldKind::Float { min, max, .. } => format!("number {min}..={max}"),
            FieldKind::Choice { options } | FieldKind::Indicator { options } => {
                format!("one of {}", options.join(" | "))
            }
        }
    }

    pub fn default_text(&self) -> String {
        match &self.kind {
            FieldKind::Int { default, .. } => default.to_string(),
            FieldKind::Float { default, .. } => default.to_string(),
            FieldKind::Choice { options } | FieldKind::Indicator { options } => {
                options.first().copied().unwrap_or_default().to_string()
            }
        }
    }

    fn parse_into(&self, raw: &str, record: &mut Record) -> Result<(), FormError> {
        let raw = raw.trim();
        match &self.kind {
            FieldKind::Int { min, max, .. } => {
                let value = parse_whole(raw).ok_or_else(|| FormError::InvalidNumber {
                    field: self.name.to_string(),
                    value: raw.to_string(),
                    expected: "integer",
                })?;
                if value < *min || value > *max {
                    return Err(self.out_of_range(raw, min, max));
                }
                record.insert(self.name, FieldValue::Int(value));
            }
            FieldKind::Float { min, max, .. } => {
                let value: f64 = raw
                    .parse()
                    .ok()
                    .filter(|v: &f64| v.is_finite())
                    .ok_or_else(|| FormError::InvalidNumber {
                        field: self.name.to_string(),
                        value: raw.to_string(),
                        expected: "number",
                    })?;
                if value < *min || value > *max {
                    return Err(self.out_of_range(raw, min, max));
                }
                record.insert(self.name, FieldValue::Float(value));
            }
            FieldKind::Choice { options } => {
                let chosen = self.match_option(raw, options)?;
                record.insert(self.name, FieldValue::Text(chosen.to_string()));
            }
            FieldKind::Indicator { options } => {
                let chosen = self.match_option(raw, options)?;
                for option in options.iter() {
                    record.insert(
                        format!("{}_{}", self.name, option),
                        FieldValue::Bool(*option == chosen),
                    );
                }
            }
        }
        Ok(())
    }

    fn match_option(
        &self,
        raw: &str,
        options: &'static [&'static str],
    ) -> Result<&'static str, FormError> {
        options
            .iter()
            .copied()
            .find(|o| o.eq_ignore_ascii_case(raw))
            .ok_or_else(|| FormError::NotAnOption {
                field: self.name.to_string(),
                value: raw.to_string(),
                options: options.join(", "),
            })
    }

    fn out_of_range(&self, raw: &str, min: &impl fmt::Display, max: &impl fmt::Display) -> FormError {
        FormError::OutOfRange {
            field: self.name.to_string(),
            value: raw.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }
}

/// Built-in patient forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormKind {
    /// Age, gender, cancer type and smoking history.
    Basic,
    /// Diagnosis year, risk factors, region, type and stage.
    Regional,
    /// Risk factors, stage, and a cancer type the form one-hot encodes itself.
    Clinical,
}

impl FromStr for FormKind {
    type Err = FormError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(FormKind::Basic),
            "regional" => Ok(FormKind::Regional),
            "clinical" => Ok(FormKind::Clinical),
            other => Err(FormError::UnknownForm(other.to_string())),
        }
    }
}

impl fmt::Display for FormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FormKind::Basic => "basic",
            FormKind::Regional => "regional",
            FormKind::Clinical => "clinical",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormSchema {
    pub kind: FormKind,
    pub title: &'static str,
    pub fields: Vec<FieldSpec>,
}

const GENDERS: &[&str] = &["Male", "Female", "Other"];
const BINARY_GENDERS: &[&str] = &["Male", "Female"];
const STAGES: &[&str] = &["Stage 0", "Stage I", "Stage II", "Stage III", "Stage IV"];
const DIAGNOSED_STAGES: &[&str] = &["Stage I", "Stage II", "Stage III", "Stage IV"];

impl FormSchema {
    pub fn new(kind: FormKind) -> Self {
        let (title, fields) = match kind {
            FormKind::Basic => (
                "Cancer severity (basic)",
                vec![
                    FieldSpec::int("Age", "Age", 0, 100, 50),
                    FieldSpec::choice("Gender", "Gender", BINARY_GENDERS),
                    FieldSpec::choice(
                        "Cancer_Type",
                        "Cancer type",
                        &["Lung", "Breast", "Colon", "Other"],
                    ),
                    FieldSpec::choice("Smoking_History", "Smoking history", &["Yes", "No"]),
                ],
            ),
            FormKind::Regional => (
                "Cancer severity (regional)",
                vec![
                    FieldSpec::int("Year", "Year of diagnosis", 2015, 2024, 2015),
                    FieldSpec::float("Genetic_Risk", "Genetic risk", 0.0, 1.0, 0.5),
                    FieldSpec::float("Air_Pollution", "Air pollution", 0.0, 100.0, 50.0),
                    FieldSpec::float("Alcohol_Use", "Alcohol use", 0.0, 100.0, 20.0),
                    FieldSpec::float("Smoking", "Smoking", 0.0, 100.0, 30.0),
                    FieldSpec::float("Obesity_Level", "Obesity level", 0.0, 100.0, 25.0),
                    FieldSpec::float(
                        "Treatment_Cost_USD",
                        "Treatment cost (USD)",
                        0.0,
                        1_000_000.0,
                        20_000.0,
                    ),
                    FieldSpec::int("Survival_Years", "Expected survival years", 0, 20, 5),
                    FieldSpec::choice("Gender", "Gender", GENDERS),
                    FieldSpec::choice(
                        "Country_Region",
                        "Country",
                        &[
                            "USA", "UK", "India", "Russia", "China", "Brazil", "Pakistan",
                            "Canada", "Germany",
                        ],
                    ),
                    FieldSpec::choice(
                        "Cancer_Type",
                        "Cancer type",
                        &["Lung", "Colon", "Skin", "Prostate", "Leukemia", "Cervical", "Liver"],
                    ),
                    FieldSpec::choice("Cancer_Stage", "Cancer stage", DIAGNOSED_STAGES),
                ],
            ),
            FormKind::Clinical => (
                "Cancer severity (clinical)",
                vec![
                    FieldSpec::float("Genetic_Risk", "Genetic risk", 0.0, 10.0, 5.0),
                    FieldSpec::float("Air_Pollution", "Air pollution", 0.0, 10.0, 5.0),
                    FieldSpec::float("Alcohol_Use", "Alcohol use", 0.0, 10.0, 5.0),
                    FieldSpec::float("Smoking", "Smoking", 0.0, 10.0, 5.0),
                    FieldSpec::float("Obesity_Level", "Obesity level", 0.0, 10.0, 5.0),
                    FieldSpec::float(
                        "Treatment_Cost_USD",
                        "Treatment cost (USD)",
                        0.0,
                        100_000.0,
                        50_000.0,
                    ),
                    FieldSpec::float("Survival_Years", "Survival years", 0.0, 15.0, 5.0),
                    FieldSpec::choice("Cancer_Stage", "Cancer stage", STAGES),
                    FieldSpec {
                        name: "Cancer_Type",
                        label: "Cancer type",
                        kind: FieldKind::Indicator {
                            options: &[
                                "Cervical", "Colon", "Leukemia", "Liver", "Lung", "Prostate",
                                "Skin",
                            ],
                        },
                    },
                ],
            ),
        };
        Self {
            kind,
            title,
            fields,
        }
    }

    /// Validate answers into a record; unanswered fields take their default.
    pub fn collect(&self, answers: &[(String, String)]) -> Result<Record, FormError> {
        let mut by_key: HashMap<String, &str> = HashMap::with_capacity(answers.len());
        for (name, value) in answers {
            let key = normalize_key(name);
            if !self.fields.iter().any(|f| normalize_key(f.name) == key) {
                return Err(FormError::UnknownField(name.clone()));
            }
            // later answers win
            by_key.insert(key, value.as_str());
        }

        let mut record = Record::new();
        for field in &self.fields {
            let default = field.default_text();
            let raw = by_key
                .get(&normalize_key(field.name))
                .copied()
                .unwrap_or(default.as_str());
            field.parse_into(raw, &mut record)?;
        }
        debug!(form = %self.kind, answered = by_key.len(), columns = record.len(), "collected form");
        Ok(record)
    }

    /// Ask for every field on `output`, reading one line per field from `input`.
    ///
    /// Blank lines keep the default. Returns `None` when input is already at
    /// EOF; EOF part-way leaves the remaining fields at their defaults.
    pub fn prompt<R: BufRead, W: Write>(
        &self,
        input: &mut R,
        output: &mut W,
    ) -> Result<Option<Vec<(String, String)>>> {
        writeln!(output, "{}", self.title).context("failed to write prompt")?;
        let mut answers = Vec::new();
        for (i, field) in self.fields.iter().enumerate() {
            write!(
                output,
                "  {} [{}] (default {}): ",
                field.label,
                field.hint(),
                field.default_text()
            )
            .context("failed to write prompt")?;
            output.flush().context("failed to flush prompt")?;

            let mut line = String::new();
            let read = input
                .read_line(&mut line)
                .context("failed to read form answer")?;
            if read == 0 {
                if i == 0 {
                    return Ok(None);
                }
                break;
            }
            let line = line.trim();
            if !line.is_empty() {
                answers.push((field.name.to_string(), line.to_string()));
            }
        }
        Ok(Some(answers))
    }
}

/// Split `NAME=VALUE` pairs from the command line.
pub fn parse_field_args(args: &[String]) -> Result<Vec<(String, String)>, FormError> {
    args.iter()
        .map(|arg| {
            let (name, value) = arg
                .split_once('=')
                .ok_or_else(|| FormError::Malformed(arg.clone()))?;
            if name.trim().is_empty() {
                return Err(FormError::Malformed(arg.clone()));
            }
            Ok((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Integers, or numbers like `61.0` with no fractional part.
fn parse_whole(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0 && v.abs() <= i64::MAX as f64)
            .map(|v| v as i64)
    })
}

/// Read answers from a JSON object of field name to string, number or bool.
pub fn load_answers(path: &Path) -> Result<Vec<(String, String)>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read answers file at {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("answers file {} is not valid JSON", path.display()))?;
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("answers file {} must hold a JSON object", path.display()))?;

    let mut answers = Vec::with_capacity(object.len());
    for (name, value) in object {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            other => return Err(anyhow!("field `{name}` has unsupported value {other}")),
        };
        answers.push((name.clone(), text));
    }
    info!(path = %path.display(), answers = answers.len(), "loaded answers file");
    Ok(answers)
}
